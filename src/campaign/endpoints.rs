use std::future::Future;

use actix_web::web::{Data, Json, Path};
use actix_web::{delete, get, post, put, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adserver::RemoteCampaignId;
use crate::database::Database;
use crate::error::Error;
use crate::sync::Pipeline;

use super::manager::{self, CampaignChanges};
use super::{Campaign, CampaignId, ContentId, ContentRef, TargetGroup};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TargetGroupBody {
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
    pub mini_reels: Vec<ContentId>,
}

impl TargetGroupBody {
    fn into_group(self) -> TargetGroup {
        TargetGroup {
            remote_campaign_id: self.remote_campaign_id,
            name: self.name,
            start_date: self.start_date,
            end_date: self.end_date,
            cards: self.cards,
            mini_reels: content_refs(self.mini_reels),
        }
    }

    fn render(group: TargetGroup) -> TargetGroupBody {
        TargetGroupBody {
            remote_campaign_id: group.remote_campaign_id,
            name: group.name,
            start_date: group.start_date,
            end_date: group.end_date,
            cards: group.cards,
            mini_reels: content_ids(group.mini_reels),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreateCampaignBody {
    pub advertiser_id: String,
    pub customer_id: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub cards: Vec<ContentId>,
    #[serde(default)]
    pub mini_reels: Vec<ContentId>,
    #[serde(default)]
    pub mini_reel_groups: Vec<TargetGroupBody>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EditCampaignBody {
    pub categories: Option<Vec<String>>,
    pub cards: Option<Vec<ContentId>>,
    pub mini_reels: Option<Vec<ContentId>>,
    pub mini_reel_groups: Option<Vec<TargetGroupBody>>,
}

impl EditCampaignBody {
    fn into_changes(self) -> CampaignChanges {
        CampaignChanges {
            categories: self.categories,
            cards: self.cards.map(content_refs),
            mini_reels: self.mini_reels.map(content_refs),
            mini_reel_groups: self.mini_reel_groups.map(into_groups),
        }
    }
}

/// What clients see of a campaign: nested lists carry content ids only.
#[derive(Clone, Debug, Serialize)]
pub struct CampaignBody {
    pub id: CampaignId,
    pub advertiser_id: String,
    pub customer_id: String,
    pub categories: Vec<String>,
    pub cards: Vec<ContentId>,
    pub mini_reels: Vec<ContentId>,
    pub mini_reel_groups: Vec<TargetGroupBody>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl CampaignBody {
    fn render(campaign: Campaign) -> CampaignBody {
        CampaignBody {
            id: campaign.id,
            advertiser_id: campaign.advertiser_id,
            customer_id: campaign.customer_id,
            categories: campaign.categories,
            cards: content_ids(campaign.cards),
            mini_reels: content_ids(campaign.mini_reels),
            mini_reel_groups: campaign
                .mini_reel_groups
                .into_iter()
                .map(TargetGroupBody::render)
                .collect(),
            created_at: campaign.created_at,
            modified_at: campaign.modified_at,
        }
    }
}

fn content_refs(ids: Vec<ContentId>) -> Vec<ContentRef> {
    ids.into_iter().map(ContentRef::new).collect()
}

fn content_ids(items: Vec<ContentRef>) -> Vec<ContentId> {
    items.into_iter().map(|item| item.id).collect()
}

fn into_groups(groups: Vec<TargetGroupBody>) -> Vec<TargetGroup> {
    groups.into_iter().map(TargetGroupBody::into_group).collect()
}

/// Runs `work` on its own task so a dropped request can't cancel a
/// reconciliation halfway through.
async fn run_detached<F, T>(work: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>> + 'static,
    T: 'static,
{
    actix_web::rt::spawn(work).await?
}

#[post("/campaigns")]
#[tracing::instrument(skip(db, pipeline))]
pub async fn create_campaign(
    db: Data<Box<dyn Database>>,
    pipeline: Data<Pipeline>,
    body: Json<CreateCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let body = body.into_inner();

    let changes = CampaignChanges {
        categories: Some(body.categories),
        cards: Some(content_refs(body.cards)),
        mini_reels: Some(content_refs(body.mini_reels)),
        mini_reel_groups: Some(into_groups(body.mini_reel_groups)),
    };
    let advertiser_id = body.advertiser_id;
    let customer_id = body.customer_id;
    let campaign = run_detached(async move {
        manager::create_campaign(
            &***db,
            &pipeline,
            advertiser_id,
            customer_id,
            changes,
        )
        .await
    })
    .await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[get("/campaigns")]
#[tracing::instrument(skip(db))]
pub async fn get_campaigns(db: Data<Box<dyn Database>>) -> Result<Json<Vec<CampaignBody>>, Error> {
    let campaigns = manager::get_campaigns(&***db).await?;

    let body = campaigns.into_iter().map(CampaignBody::render).collect();

    Ok(Json(body))
}

#[get("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db))]
pub async fn get_campaign_by_id(
    db: Data<Box<dyn Database>>,
    params: Path<CampaignId>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();

    let campaign = manager::expect_campaign_by_id(&***db, campaign_id).await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[put("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, pipeline))]
pub async fn edit_campaign(
    db: Data<Box<dyn Database>>,
    pipeline: Data<Pipeline>,
    params: Path<CampaignId>,
    body: Json<EditCampaignBody>,
) -> Result<Json<CampaignBody>, Error> {
    let campaign_id = params.into_inner();
    let changes = body.into_inner().into_changes();

    let campaign = run_detached(async move {
        manager::edit_campaign(&***db, &pipeline, campaign_id, changes).await
    })
    .await?;

    Ok(Json(CampaignBody::render(campaign)))
}

#[delete("/campaigns/{campaign_id}")]
#[tracing::instrument(skip(db, pipeline))]
pub async fn delete_campaign(
    db: Data<Box<dyn Database>>,
    pipeline: Data<Pipeline>,
    params: Path<CampaignId>,
) -> Result<HttpResponse, Error> {
    let campaign_id = params.into_inner();

    run_detached(async move { manager::delete_campaign(&***db, &pipeline, campaign_id).await })
        .await?;

    Ok(HttpResponse::NoContent().finish())
}
