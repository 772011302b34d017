use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::AdServerConfig;

use super::{
    AdServer, AdServerError, KeyHandles, NewRemoteCampaign, RemoteBanner, RemoteBannerId,
    RemoteCampaignId, TargetingKeys,
};

/// JSON-over-HTTP client for the ad server.
#[derive(Clone, Debug)]
pub struct HttpAdServer {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct FaultBody {
    message: String,
}

#[derive(Deserialize)]
struct CreatedCampaignBody {
    id: RemoteCampaignId,
}

#[derive(Serialize)]
struct EditCampaignBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    keys: Option<&'a KeyHandles>,
}

impl HttpAdServer {
    pub fn new(config: &AdServerConfig) -> HttpAdServer {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        HttpAdServer {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, String> {
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(describe_fault(response).await);
        }

        response.json().await.map_err(|err| err.to_string())
    }

    async fn send_empty(request: RequestBuilder) -> Result<(), String> {
        let response = request.send().await.map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(describe_fault(response).await);
        }

        Ok(())
    }

    async fn request_campaign_delete(&self, id: &RemoteCampaignId) -> Result<(), String> {
        let response = self
            .client
            .delete(self.url(&format!("/campaigns/{}", id)))
            .send()
            .await
            .map_err(|err| err.to_string())?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(describe_fault(response).await),
        }
    }

    async fn campaign_exists(&self, id: &RemoteCampaignId) -> Result<bool, String> {
        let response = self
            .client
            .get(self.url(&format!("/campaigns/{}", id)))
            .send()
            .await
            .map_err(|err| err.to_string())?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(describe_fault(response).await),
        }
    }
}

async fn describe_fault(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<FaultBody>().await {
        Ok(body) => format!("{}: {}", status, body.message),
        Err(_) => status.to_string(),
    }
}

#[async_trait]
impl AdServer for HttpAdServer {
    #[tracing::instrument(skip(self))]
    async fn resolve_targeting_keys(
        &self,
        keys: &TargetingKeys,
    ) -> Result<KeyHandles, AdServerError> {
        let request = self.client.post(self.url("/targeting/keys")).json(keys);

        HttpAdServer::send(request)
            .await
            .map_err(AdServerError::TargetingResolution)
    }

    #[tracing::instrument(skip(self))]
    async fn create_remote_campaign(
        &self,
        campaign: &NewRemoteCampaign,
    ) -> Result<RemoteCampaignId, AdServerError> {
        let request = self.client.post(self.url("/campaigns")).json(campaign);

        let body: CreatedCampaignBody = HttpAdServer::send(request)
            .await
            .map_err(AdServerError::RemoteCampaign)?;
        debug!("created remote campaign {}", body.id);

        Ok(body.id)
    }

    #[tracing::instrument(skip(self))]
    async fn edit_remote_campaign(
        &self,
        remote_campaign_id: &RemoteCampaignId,
        name: Option<&str>,
        keys: Option<&KeyHandles>,
    ) -> Result<(), AdServerError> {
        let request = self
            .client
            .patch(self.url(&format!("/campaigns/{}", remote_campaign_id)))
            .json(&EditCampaignBody { name, keys });

        HttpAdServer::send_empty(request)
            .await
            .map_err(AdServerError::RemoteCampaign)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_remote_campaigns(
        &self,
        ids: &[RemoteCampaignId],
        delay: Duration,
        max_attempts: u32,
    ) -> Result<(), AdServerError> {
        future::try_join_all(ids.iter().map(|id| self.request_campaign_delete(id)))
            .await
            .map_err(AdServerError::RemoteCampaign)?;

        let attempts = max_attempts.max(1);
        let mut remaining: Vec<&RemoteCampaignId> = ids.iter().collect();
        for attempt in 1..=attempts {
            if remaining.is_empty() {
                break;
            }

            tokio::time::sleep(delay).await;

            let present = future::try_join_all(remaining.iter().map(|id| self.campaign_exists(id)))
                .await
                .map_err(AdServerError::RemoteCampaign)?;
            remaining = remaining
                .into_iter()
                .zip(present)
                .filter_map(|(id, present)| if present { Some(id) } else { None })
                .collect();

            debug!(
                "delete check {}/{}: {} campaigns pending",
                attempt,
                attempts,
                remaining.len()
            );
        }

        if !remaining.is_empty() {
            return Err(AdServerError::RemoteCampaign(format!(
                "{} campaigns were not deleted after {} checks",
                remaining.len(),
                attempts
            )));
        }

        Ok(())
    }

    #[tracing::instrument(skip(self, payload))]
    async fn create_remote_banner(
        &self,
        remote_campaign_id: &RemoteCampaignId,
        payload: &Value,
    ) -> Result<RemoteBanner, AdServerError> {
        let request = self
            .client
            .post(self.url(&format!("/campaigns/{}/banners", remote_campaign_id)))
            .json(payload);

        HttpAdServer::send(request)
            .await
            .map_err(AdServerError::RemoteBanner)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_remote_banner(&self, banner_id: &RemoteBannerId) -> Result<(), AdServerError> {
        let request = self
            .client
            .delete(self.url(&format!("/banners/{}", banner_id)));

        HttpAdServer::send_empty(request)
            .await
            .map_err(AdServerError::RemoteBanner)
    }
}
