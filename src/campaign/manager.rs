use std::collections::HashSet;

use chrono::Utc;
use tracing::warn;

use crate::database::Database;
use crate::error::Error;
use crate::sync::{Pipeline, SyncFailure};

use super::{Campaign, CampaignId, ContentRef, TargetGroup};

/// The caller-editable parts of a campaign. `None` keeps the current value.
#[derive(Clone, Debug, Default)]
pub struct CampaignChanges {
    pub categories: Option<Vec<String>>,
    pub cards: Option<Vec<ContentRef>>,
    pub mini_reels: Option<Vec<ContentRef>>,
    pub mini_reel_groups: Option<Vec<TargetGroup>>,
}

impl CampaignChanges {
    fn apply(self, mut campaign: Campaign) -> Campaign {
        if let Some(categories) = self.categories {
            campaign.categories = categories;
        }
        if let Some(cards) = self.cards {
            campaign.cards = cards;
        }
        if let Some(mini_reels) = self.mini_reels {
            campaign.mini_reels = mini_reels;
        }
        if let Some(mini_reel_groups) = self.mini_reel_groups {
            campaign.mini_reel_groups = mini_reel_groups;
        }
        campaign
    }
}

fn check_unique(list: &'static str, items: &[ContentRef]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(Error::DuplicateContentId {
                list,
                content_id: item.id.clone(),
            });
        }
    }

    Ok(())
}

fn validate_campaign(campaign: &Campaign) -> Result<(), Error> {
    check_unique("cards", &campaign.cards)?;
    check_unique("mini_reels", &campaign.mini_reels)?;
    for group in &campaign.mini_reel_groups {
        check_unique("mini_reel_groups.mini_reels", &group.mini_reels)?;
    }

    Ok(())
}

fn strip_remote_ids(items: &mut Vec<ContentRef>) {
    for item in items.iter_mut() {
        *item = ContentRef::new(item.id.clone());
    }
}

/// A new campaign owns nothing on the ad server yet.
fn forget_remote_ids(campaign: &mut Campaign) {
    strip_remote_ids(&mut campaign.cards);
    strip_remote_ids(&mut campaign.mini_reels);
    for group in &mut campaign.mini_reel_groups {
        if let Some(remote_campaign_id) = group.remote_campaign_id.take() {
            warn!(
                "ignoring remote campaign {} given for new group {:?}",
                remote_campaign_id, group.name
            );
        }
        strip_remote_ids(&mut group.mini_reels);
    }
}

#[tracing::instrument(skip(db, pipeline))]
pub async fn create_campaign(
    db: &dyn Database,
    pipeline: &Pipeline,
    advertiser_id: String,
    customer_id: String,
    changes: CampaignChanges,
) -> Result<Campaign, Error> {
    let now = Utc::now();
    let mut campaign = changes.apply(Campaign {
        id: CampaignId::new(),
        advertiser_id,
        customer_id,
        categories: vec![],
        cards: vec![],
        mini_reels: vec![],
        mini_reel_groups: vec![],
        created_at: now,
        modified_at: now,
    });
    forget_remote_ids(&mut campaign);
    validate_campaign(&campaign)?;

    match pipeline.on_create(campaign).await {
        Ok(campaign) => {
            db.campaigns().insert_campaign(&campaign).await?;
            Ok(campaign)
        }
        Err(SyncFailure { campaign, error }) => {
            warn!("storing partially synchronized campaign {}", campaign.id);
            db.campaigns().insert_campaign(&campaign).await?;
            Err(error)
        }
    }
}

#[tracing::instrument(skip(db))]
pub async fn get_campaigns(db: &dyn Database) -> Result<Vec<Campaign>, Error> {
    let campaigns = db.campaigns().fetch_campaigns().await?;

    Ok(campaigns)
}

#[tracing::instrument(skip(db))]
pub async fn expect_campaign_by_id(
    db: &dyn Database,
    campaign_id: CampaignId,
) -> Result<Campaign, Error> {
    let campaign = db
        .campaigns()
        .fetch_campaign_by_id(campaign_id)
        .await?
        .ok_or(Error::CampaignNotFound { campaign_id })?;

    Ok(campaign)
}

/// Reconciles the ad server with the changed campaign and stores the outcome.
/// A failed reconciliation still stores whatever remote ids it obtained.
#[tracing::instrument(skip(db, pipeline))]
pub async fn edit_campaign(
    db: &dyn Database,
    pipeline: &Pipeline,
    campaign_id: CampaignId,
    changes: CampaignChanges,
) -> Result<Campaign, Error> {
    let stored = expect_campaign_by_id(db, campaign_id).await?;
    let proposed = changes.apply(stored.clone());
    validate_campaign(&proposed)?;

    match pipeline.on_edit(proposed, &stored).await {
        Ok(campaign) => db.campaigns().replace_campaign(campaign).await,
        Err(SyncFailure { campaign, error }) => {
            warn!("storing partially synchronized campaign {}", campaign.id);
            db.campaigns().replace_campaign(campaign).await?;
            Err(error)
        }
    }
}

#[tracing::instrument(skip(db, pipeline))]
pub async fn delete_campaign(
    db: &dyn Database,
    pipeline: &Pipeline,
    campaign_id: CampaignId,
) -> Result<(), Error> {
    let stored = expect_campaign_by_id(db, campaign_id).await?;

    pipeline.on_delete(&stored).await?;
    db.campaigns().delete_campaign(campaign_id).await?;

    Ok(())
}
