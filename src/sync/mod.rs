//! Mirrors the nested lists of a campaign into the ad server.
//!
//! Every hook is driven by which sub-documents carry remote identifiers, so a
//! hook that failed half way can simply be run again on the document it
//! returned.

use std::sync::Arc;

use tracing::{debug, error};

use crate::adserver::{AdServer, AdServerError, RemoteCampaignId};
use crate::campaign::{Campaign, ContentKind};
use crate::config::SyncConfig;
use crate::error::Error;

mod banners;
mod diff;
mod groups;
pub mod locks;
mod sponsored;

use locks::CampaignLocks;

/// Why a stage stopped. Converted into an [`Error`] once the pipeline knows
/// which campaign it was working on.
#[derive(Debug)]
enum SyncError {
    /// Details were logged when the call failed.
    Remote,
    LastBanner(RemoteCampaignId),
}

impl SyncError {
    fn remote(error: AdServerError) -> SyncError {
        error!("ad server call failed: {}", error);
        SyncError::Remote
    }

    fn into_error(self, campaign: &Campaign) -> Error {
        match self {
            SyncError::Remote => Error::RemoteSyncFailed {
                campaign_id: campaign.id,
            },
            SyncError::LastBanner(remote_campaign_id) => Error::RemoteConstraintViolated {
                campaign_id: campaign.id,
                remote_campaign_id,
            },
        }
    }
}

/// A value together with whether producing it fully succeeded. On failure the
/// value still holds whatever remote identifiers were assigned before it.
type Partial<T> = (T, Result<(), SyncError>);

/// Keeps the first failure, but a constraint violation replaces a remote
/// failure.
fn merge(results: impl IntoIterator<Item = Result<(), SyncError>>) -> Result<(), SyncError> {
    let mut first: Option<SyncError> = None;
    for result in results {
        if let Err(err) = result {
            let replace = match (&first, &err) {
                (None, _) => true,
                (Some(SyncError::Remote), SyncError::LastBanner(_)) => true,
                _ => false,
            };
            if replace {
                first = Some(err);
            }
        }
    }

    match first {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn settle<T>(results: Vec<Partial<T>>) -> Partial<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut outcomes = Vec::with_capacity(results.len());
    for (value, result) in results {
        values.push(value);
        outcomes.push(result);
    }

    (values, merge(outcomes))
}

/// A create or edit that did not complete. `campaign` is the document as far
/// as it got and should be stored so a retry picks up from there.
#[derive(Debug)]
pub struct SyncFailure {
    pub campaign: Campaign,
    pub error: Error,
}

pub struct Pipeline {
    ad_server: Arc<dyn AdServer>,
    config: SyncConfig,
    locks: CampaignLocks,
}

impl Pipeline {
    pub fn new(ad_server: Arc<dyn AdServer>, config: SyncConfig) -> Pipeline {
        Pipeline {
            ad_server,
            config,
            locks: CampaignLocks::new(),
        }
    }

    /// Provisions remote campaigns and banners for every entry of a new
    /// campaign that doesn't have them yet.
    #[tracing::instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    pub async fn on_create(&self, mut campaign: Campaign) -> Result<Campaign, SyncFailure> {
        let cards = campaign.cards.clone();
        let mini_reels = campaign.mini_reels.clone();
        let groups = campaign.mini_reel_groups.clone();

        let ((cards, cards_result), (mini_reels, mini_reels_result), (groups, groups_result)) = futures::join!(
            self.create_sponsored(&campaign, ContentKind::Card, cards),
            self.create_sponsored(&campaign, ContentKind::MiniReel, mini_reels),
            self.create_groups(&campaign, groups),
        );

        campaign.cards = cards;
        campaign.mini_reels = mini_reels;
        campaign.mini_reel_groups = groups;

        match merge(vec![cards_result, mini_reels_result, groups_result]) {
            Ok(()) => Ok(campaign),
            Err(err) => Err(SyncFailure {
                error: err.into_error(&campaign),
                campaign,
            }),
        }
    }

    /// Brings the remote side from `stored` to `proposed`. The sponsored lists
    /// and the target groups are reconciled concurrently, each in the order
    /// clean, edit, create.
    #[tracing::instrument(skip(self, proposed, stored), fields(campaign_id = %stored.id))]
    pub async fn on_edit(
        &self,
        mut proposed: Campaign,
        stored: &Campaign,
    ) -> Result<Campaign, SyncFailure> {
        let categories_changed = !diff::same_set(&proposed.categories, &stored.categories);
        if categories_changed {
            debug!(
                "categories changed from {:?} to {:?}",
                stored.categories, proposed.categories
            );
        }

        let (((cards, mini_reels), sponsored_result), (groups, groups_result)) = futures::join!(
            self.edit_sponsored(&proposed, stored, categories_changed),
            self.edit_groups(&proposed, stored, categories_changed),
        );

        proposed.cards = cards;
        proposed.mini_reels = mini_reels;
        proposed.mini_reel_groups = groups;

        match merge(vec![sponsored_result, groups_result]) {
            Ok(()) => Ok(proposed),
            Err(err) => {
                // a retry must still see the categories as changed
                if categories_changed {
                    proposed.categories = stored.categories.clone();
                }
                Err(SyncFailure {
                    error: err.into_error(&proposed),
                    campaign: proposed,
                })
            }
        }
    }

    /// Removes every remote campaign the document owns in one batch. Group
    /// banners go away with their campaign.
    #[tracing::instrument(skip(self, stored), fields(campaign_id = %stored.id))]
    pub async fn on_delete(&self, stored: &Campaign) -> Result<(), Error> {
        let mut ids = diff::remote_campaign_ids(stored.cards.iter().chain(&stored.mini_reels));
        ids.extend(diff::group_campaign_ids(&stored.mini_reel_groups));

        self.delete_campaigns(ids)
            .await
            .map_err(|err| err.into_error(stored))
    }

    async fn delete_campaigns(&self, ids: Vec<RemoteCampaignId>) -> Result<(), SyncError> {
        if ids.is_empty() {
            debug!("no remote campaigns to delete");
            return Ok(());
        }

        debug!("deleting {} remote campaigns", ids.len());
        self.ad_server
            .delete_remote_campaigns(
                &ids,
                self.config.delete_delay(),
                self.config.delete_max_attempts,
            )
            .await
            .map_err(SyncError::remote)
    }
}
