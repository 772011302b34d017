use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adserver::{RemoteBannerId, RemoteCampaignId};
use crate::typedid::{TypedId, TypedIdMarker};

pub mod db;
pub mod endpoints;
pub mod manager;

pub type CampaignId = TypedId<Campaign>;

/// Identifier of a card or minireel, chosen by the caller.
pub type ContentId = String;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Campaign {
    #[serde(rename = "_id")]
    pub id: CampaignId,
    pub advertiser_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub cards: Vec<ContentRef>,
    #[serde(default)]
    pub mini_reels: Vec<ContentRef>,
    #[serde(default)]
    pub mini_reel_groups: Vec<TargetGroup>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub modified_at: DateTime<Utc>,
}

impl TypedIdMarker for Campaign {
    fn tag() -> &'static str {
        "CAM"
    }
}

/// A sponsored card or minireel (or a minireel inside a target group) and the
/// remote objects provisioned for it so far.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContentRef {
    pub id: ContentId,
    #[serde(default)]
    pub remote_campaign_id: Option<RemoteCampaignId>,
    #[serde(default)]
    pub remote_banner_id: Option<RemoteBannerId>,
    #[serde(default)]
    pub remote_banner_slot: Option<i64>,
}

impl ContentRef {
    pub fn new(id: impl Into<ContentId>) -> ContentRef {
        ContentRef {
            id: id.into(),
            remote_campaign_id: None,
            remote_banner_id: None,
            remote_banner_slot: None,
        }
    }
}

/// A bundle of minireels served under one remote campaign whose targeting is
/// driven by `cards`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TargetGroup {
    #[serde(default)]
    pub remote_campaign_id: Option<RemoteCampaignId>,
    pub name: String,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cards: Vec<ContentId>,
    #[serde(default)]
    pub mini_reels: Vec<ContentRef>,
}

impl TargetGroup {
    pub fn is_provisionable(&self) -> bool {
        !self.cards.is_empty() && !self.mini_reels.is_empty()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContentKind {
    Card,
    MiniReel,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Card => "card",
            ContentKind::MiniReel => "minireel",
        }
    }
}
