use futures::future;
use tracing::{debug, info};

use crate::adserver::{KeyHandles, NewRemoteCampaign, TargetingKeys};
use crate::campaign::{Campaign, ContentKind, ContentRef};

use super::{diff, merge, settle, Partial, Pipeline, SyncError};

impl Pipeline {
    async fn sponsored_keys(
        &self,
        campaign: &Campaign,
        kind: ContentKind,
    ) -> Result<KeyHandles, SyncError> {
        let level1 = match kind {
            ContentKind::Card => Some(vec![campaign.id.to_string()]),
            ContentKind::MiniReel => None,
        };
        let keys = TargetingKeys {
            level1,
            level3: Some(campaign.categories.clone()),
        };

        self.ad_server
            .resolve_targeting_keys(&keys)
            .await
            .map_err(SyncError::remote)
    }

    /// Gives each item without one its own remote campaign holding a single
    /// banner. Items with a remote campaign but no banner only get the banner.
    #[tracing::instrument(skip(self, campaign, items), fields(campaign_id = %campaign.id))]
    pub(super) async fn create_sponsored(
        &self,
        campaign: &Campaign,
        kind: ContentKind,
        items: Vec<ContentRef>,
    ) -> Partial<Vec<ContentRef>> {
        if items
            .iter()
            .all(|item| item.remote_campaign_id.is_some() && item.remote_banner_id.is_some())
        {
            return (items, Ok(()));
        }

        let keys = if items.iter().any(|item| item.remote_campaign_id.is_none()) {
            match self.sponsored_keys(campaign, kind).await {
                Ok(keys) => Some(keys),
                Err(err) => return (items, Err(err)),
            }
        } else {
            None
        };

        let results = future::join_all(
            items
                .into_iter()
                .map(|item| self.provision_sponsored(campaign, kind, keys.as_ref(), item)),
        )
        .await;

        settle(results)
    }

    async fn provision_sponsored(
        &self,
        campaign: &Campaign,
        kind: ContentKind,
        keys: Option<&KeyHandles>,
        mut item: ContentRef,
    ) -> Partial<ContentRef> {
        let remote_campaign_id = match (item.remote_campaign_id.clone(), keys) {
            (Some(_), _) if item.remote_banner_id.is_some() => return (item, Ok(())),
            (Some(id), _) => id,
            (None, Some(keys)) => {
                let request = NewRemoteCampaign {
                    owner_id: item.id.clone(),
                    name: format!("{}_{}_{}", campaign.id, kind.as_str(), item.id),
                    is_sponsored: true,
                    keys: keys.clone(),
                    advertiser_id: campaign.advertiser_id.clone(),
                    customer_id: campaign.customer_id.clone(),
                };

                let id = match self.ad_server.create_remote_campaign(&request).await {
                    Ok(id) => id,
                    Err(err) => return (item, Err(SyncError::remote(err))),
                };
                info!("created remote campaign {} for {}", id, item.id);
                item.remote_campaign_id = Some(id.clone());
                id
            }
            (None, None) => return (item, Ok(())),
        };

        let result = self
            .reconcile_banners(
                Some(std::slice::from_mut(&mut item)),
                Some(&[]),
                kind,
                true,
                &remote_campaign_id,
            )
            .await;

        (item, result)
    }

    /// Deletes, in one batch, the remote campaigns of every sponsored entry
    /// the proposal dropped.
    #[tracing::instrument(skip(self, proposed, stored), fields(campaign_id = %stored.id))]
    async fn clean_sponsored(&self, proposed: &Campaign, stored: &Campaign) -> Result<(), SyncError> {
        let removed = diff::removed(&proposed.cards, &stored.cards)
            .into_iter()
            .chain(diff::removed(&proposed.mini_reels, &stored.mini_reels));

        self.delete_campaigns(diff::remote_campaign_ids(removed)).await
    }

    /// Pushes fresh keys to the remote campaign of every surviving entry.
    #[tracing::instrument(skip(self, proposed, stored), fields(campaign_id = %stored.id))]
    async fn retarget_sponsored(
        &self,
        proposed: &Campaign,
        stored: &Campaign,
        kind: ContentKind,
    ) -> Result<(), SyncError> {
        let (proposed_items, stored_items) = match kind {
            ContentKind::Card => (&proposed.cards, &stored.cards),
            ContentKind::MiniReel => (&proposed.mini_reels, &stored.mini_reels),
        };

        let targets: Vec<_> = diff::surviving(proposed_items, stored_items)
            .into_iter()
            .filter_map(|item| item.remote_campaign_id.as_ref())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let keys = self.sponsored_keys(proposed, kind).await?;
        debug!("retargeting {} remote campaigns", targets.len());

        let results = future::join_all(targets.into_iter().map(|remote_campaign_id| {
            self.ad_server
                .edit_remote_campaign(remote_campaign_id, None, Some(&keys))
        }))
        .await;

        merge(
            results
                .into_iter()
                .map(|result| result.map_err(SyncError::remote)),
        )
    }

    /// Clean, edit, then create the two sponsored lists of an edited campaign.
    pub(super) async fn edit_sponsored(
        &self,
        proposed: &Campaign,
        stored: &Campaign,
        categories_changed: bool,
    ) -> Partial<(Vec<ContentRef>, Vec<ContentRef>)> {
        if let Err(err) = self.clean_sponsored(proposed, stored).await {
            return ((stored.cards.clone(), stored.mini_reels.clone()), Err(err));
        }

        let cards = diff::carry_forward(&proposed.cards, &stored.cards);
        let mini_reels = diff::carry_forward(&proposed.mini_reels, &stored.mini_reels);

        if categories_changed {
            let (cards_result, mini_reels_result) = futures::join!(
                self.retarget_sponsored(proposed, stored, ContentKind::Card),
                self.retarget_sponsored(proposed, stored, ContentKind::MiniReel),
            );
            let result = merge(vec![cards_result, mini_reels_result]);
            if result.is_err() {
                return ((cards, mini_reels), result);
            }
        }

        let ((cards, cards_result), (mini_reels, mini_reels_result)) = futures::join!(
            self.create_sponsored(proposed, ContentKind::Card, cards),
            self.create_sponsored(proposed, ContentKind::MiniReel, mini_reels),
        );

        ((cards, mini_reels), merge(vec![cards_result, mini_reels_result]))
    }
}
