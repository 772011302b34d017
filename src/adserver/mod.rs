use std::fmt::{Display, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod http;

pub use http::HttpAdServer;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RemoteCampaignId(pub String);

impl Display for RemoteCampaignId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RemoteBannerId(pub String);

impl Display for RemoteBannerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw targeting inputs. Level 1 holds content ids, level 3 holds categories.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetingKeys {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level1: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level3: Option<Vec<String>>,
}

/// Opaque handles the ad server hands back for a set of [`TargetingKeys`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct KeyHandles {
    #[serde(default)]
    pub level1: Vec<String>,
    #[serde(default)]
    pub level3: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewRemoteCampaign {
    pub owner_id: String,
    pub name: String,
    pub is_sponsored: bool,
    pub keys: KeyHandles,
    pub advertiser_id: String,
    pub customer_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteBanner {
    pub banner_id: RemoteBannerId,
    pub banner_slot: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdServerError {
    #[error("targeting key resolution failed: {0}")]
    TargetingResolution(String),
    #[error("remote campaign call failed: {0}")]
    RemoteCampaign(String),
    #[error("remote banner call failed: {0}")]
    RemoteBanner(String),
}

impl AdServerError {
    /// The ad server refuses to delete the only banner left in a running
    /// campaign. That is a problem with the requested change rather than with
    /// the remote system.
    pub fn is_last_banner_fault(&self) -> bool {
        match self {
            AdServerError::RemoteBanner(message) => {
                let message = message.to_lowercase();
                message.contains("last banner") && message.contains("active campaign")
            }
            _ => false,
        }
    }
}

/// The external ad-serving system. Implementations may not serialize calls
/// themselves; callers guarantee at most one banner mutation per remote
/// campaign at a time.
#[async_trait]
pub trait AdServer: Send + Sync {
    async fn resolve_targeting_keys(&self, keys: &TargetingKeys)
        -> Result<KeyHandles, AdServerError>;

    async fn create_remote_campaign(
        &self,
        campaign: &NewRemoteCampaign,
    ) -> Result<RemoteCampaignId, AdServerError>;

    async fn edit_remote_campaign(
        &self,
        remote_campaign_id: &RemoteCampaignId,
        name: Option<&str>,
        keys: Option<&KeyHandles>,
    ) -> Result<(), AdServerError>;

    /// Requests deletion of every campaign in `ids` and resolves once the
    /// remote side confirms all of them are gone, checking at most
    /// `max_attempts` times with `delay` in between.
    async fn delete_remote_campaigns(
        &self,
        ids: &[RemoteCampaignId],
        delay: Duration,
        max_attempts: u32,
    ) -> Result<(), AdServerError>;

    async fn create_remote_banner(
        &self,
        remote_campaign_id: &RemoteCampaignId,
        payload: &Value,
    ) -> Result<RemoteBanner, AdServerError>;

    async fn delete_remote_banner(&self, banner_id: &RemoteBannerId) -> Result<(), AdServerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_last_banner_fault() {
        let error = AdServerError::RemoteBanner(
            "Cannot remove the last banner from an active campaign".to_string(),
        );

        assert!(error.is_last_banner_fault());
    }

    #[test]
    fn other_faults_are_not_last_banner_faults() {
        let banner = AdServerError::RemoteBanner("banner 12 not found".to_string());
        let campaign = AdServerError::RemoteCampaign(
            "cannot remove the last banner from an active campaign".to_string(),
        );

        assert!(!banner.is_last_banner_fault());
        assert!(!campaign.is_last_banner_fault());
    }

    #[test]
    fn targeting_keys_omit_missing_levels() {
        let keys = TargetingKeys {
            level1: None,
            level3: Some(vec!["food".to_string()]),
        };

        let json = serde_json::to_value(&keys).unwrap();

        assert_eq!(json, serde_json::json!({ "level3": ["food"] }));
    }
}
