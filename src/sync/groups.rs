use futures::future;
use tracing::{debug, info, warn};

use crate::adserver::{NewRemoteCampaign, RemoteCampaignId, TargetingKeys};
use crate::campaign::{Campaign, ContentKind, TargetGroup};

use super::{diff, settle, Partial, Pipeline, SyncError};

impl Pipeline {
    #[tracing::instrument(skip(self, campaign, groups), fields(campaign_id = %campaign.id))]
    pub(super) async fn create_groups(
        &self,
        campaign: &Campaign,
        groups: Vec<TargetGroup>,
    ) -> Partial<Vec<TargetGroup>> {
        let results = future::join_all(
            groups
                .into_iter()
                .map(|group| self.provision_group(campaign, group)),
        )
        .await;

        settle(results)
    }

    async fn provision_group(&self, campaign: &Campaign, mut group: TargetGroup) -> Partial<TargetGroup> {
        if group.remote_campaign_id.is_some() {
            return (group, Ok(()));
        }
        if !group.is_provisionable() {
            info!(
                "skipping group {:?}: it needs both cards and minireels",
                group.name
            );
            return (group, Ok(()));
        }

        let keys = TargetingKeys {
            level1: Some(group.cards.clone()),
            level3: None,
        };
        let keys = match self.ad_server.resolve_targeting_keys(&keys).await {
            Ok(keys) => keys,
            Err(err) => return (group, Err(SyncError::remote(err))),
        };

        let request = NewRemoteCampaign {
            owner_id: campaign.id.to_string(),
            name: format!("{}_group_{:08x}", campaign.id, rand::random::<u32>()),
            is_sponsored: false,
            keys,
            advertiser_id: campaign.advertiser_id.clone(),
            customer_id: campaign.customer_id.clone(),
        };

        let remote_campaign_id = match self.ad_server.create_remote_campaign(&request).await {
            Ok(id) => id,
            Err(err) => return (group, Err(SyncError::remote(err))),
        };
        info!(
            "created remote campaign {} for group {:?}",
            remote_campaign_id, group.name
        );
        group.remote_campaign_id = Some(remote_campaign_id.clone());

        let result = self
            .reconcile_banners(
                Some(&mut group.mini_reels),
                Some(&[]),
                ContentKind::MiniReel,
                false,
                &remote_campaign_id,
            )
            .await;

        (group, result)
    }

    #[tracing::instrument(skip(self, proposed, stored), fields(campaign_id = %stored.id))]
    async fn clean_groups(&self, proposed: &Campaign, stored: &Campaign) -> Result<(), SyncError> {
        let removed = diff::removed_groups(&proposed.mini_reel_groups, &stored.mini_reel_groups);

        self.delete_campaigns(diff::group_campaign_ids(removed)).await
    }

    async fn retarget_group(
        &self,
        group: &TargetGroup,
        remote_campaign_id: &RemoteCampaignId,
    ) -> Result<(), SyncError> {
        let keys = TargetingKeys {
            level1: Some(group.cards.clone()),
            level3: None,
        };
        let keys = self
            .ad_server
            .resolve_targeting_keys(&keys)
            .await
            .map_err(SyncError::remote)?;

        debug!("retargeting group {}", remote_campaign_id);
        self.ad_server
            .edit_remote_campaign(remote_campaign_id, None, Some(&keys))
            .await
            .map_err(SyncError::remote)
    }

    /// Brings one already provisioned group in line with its stored copy:
    /// new targeting when its cards changed, then banner removals followed by
    /// banner creations.
    async fn edit_group(
        &self,
        proposed: &Campaign,
        stored: &Campaign,
        mut group: TargetGroup,
        categories_changed: bool,
    ) -> Partial<TargetGroup> {
        let remote_campaign_id = match &group.remote_campaign_id {
            Some(id) => id.clone(),
            None => return (group, Ok(())),
        };
        let previous = stored
            .mini_reel_groups
            .iter()
            .find(|candidate| candidate.remote_campaign_id.as_ref() == Some(&remote_campaign_id));
        let previous = match previous {
            Some(previous) => previous,
            None => {
                warn!(
                    "group {} is not part of the stored campaign, provisioning it anew",
                    remote_campaign_id
                );
                group.remote_campaign_id = None;
                group.mini_reels = diff::carry_forward(&group.mini_reels, &[]);
                return (group, Ok(()));
            }
        };

        let cards_changed = !diff::same_set(&group.cards, &previous.cards);
        let overlaps_sponsored = categories_changed
            && group
                .cards
                .iter()
                .any(|card| diff::contains_id(&proposed.cards, card));
        if cards_changed || overlaps_sponsored {
            if let Err(err) = self.retarget_group(&group, &remote_campaign_id).await {
                return (previous.clone(), Err(err));
            }
        }

        group.mini_reels = diff::carry_forward(&group.mini_reels, &previous.mini_reels);

        if let Err(err) = self
            .clean_banners(
                Some(&group.mini_reels),
                Some(&previous.mini_reels),
                &remote_campaign_id,
            )
            .await
        {
            let kept = TargetGroup {
                cards: group.cards,
                ..previous.clone()
            };
            return (kept, Err(err));
        }

        let result = self
            .reconcile_banners(
                Some(&mut group.mini_reels),
                Some(&previous.mini_reels),
                ContentKind::MiniReel,
                false,
                &remote_campaign_id,
            )
            .await;

        (group, result)
    }

    /// Clean, edit, then create the target groups of an edited campaign.
    pub(super) async fn edit_groups(
        &self,
        proposed: &Campaign,
        stored: &Campaign,
        categories_changed: bool,
    ) -> Partial<Vec<TargetGroup>> {
        if let Err(err) = self.clean_groups(proposed, stored).await {
            return (stored.mini_reel_groups.clone(), Err(err));
        }

        let results = future::join_all(
            proposed
                .mini_reel_groups
                .iter()
                .cloned()
                .map(|group| self.edit_group(proposed, stored, group, categories_changed)),
        )
        .await;
        let (groups, result) = settle(results);
        if result.is_err() {
            return (groups, result);
        }

        self.create_groups(proposed, groups).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::tests::{campaign, group, pipeline, provisioned};
    use super::*;
    use crate::adserver::test::{Call, MockAdServer};
    use crate::adserver::{AdServerError, RemoteBannerId};
    use crate::campaign::ContentRef;
    use crate::error::Error;

    fn remote(id: &str) -> RemoteCampaignId {
        RemoteCampaignId(id.into())
    }

    #[tokio::test]
    async fn group_without_cards_is_skipped() {
        let ad_server = Arc::new(MockAdServer::new());
        let campaign = campaign();

        let (groups, result) = pipeline(&ad_server)
            .create_groups(&campaign, vec![group(None, &[], &["reel-1"])])
            .await;
        result.unwrap();

        assert!(ad_server.calls().is_empty());
        assert_eq!(groups[0].remote_campaign_id, None);
    }

    #[tokio::test]
    async fn group_without_minireels_is_skipped() {
        let ad_server = Arc::new(MockAdServer::new());
        let campaign = campaign();

        let (groups, result) = pipeline(&ad_server)
            .create_groups(&campaign, vec![group(None, &["card-1"], &[])])
            .await;
        result.unwrap();

        assert!(ad_server.calls().is_empty());
        assert_eq!(groups[0].remote_campaign_id, None);
    }

    #[tokio::test]
    async fn eligible_group_gets_one_campaign_and_a_banner_per_minireel() {
        let ad_server = Arc::new(MockAdServer::new());
        let campaign = campaign();

        let (groups, result) = pipeline(&ad_server)
            .create_groups(
                &campaign,
                vec![group(None, &["card-1", "card-2"], &["reel-1", "reel-2"])],
            )
            .await;
        result.unwrap();

        let created = ad_server.created_campaigns();
        assert_eq!(created.len(), 1);
        assert!(created[0].name.starts_with(&format!("{}_group_", campaign.id)));
        assert_eq!(created[0].name.len(), format!("{}_group_", campaign.id).len() + 8);
        assert_eq!(created[0].owner_id, campaign.id.to_string());
        assert!(!created[0].is_sponsored);
        assert_eq!(
            created[0].keys.level1,
            vec!["key:card-1".to_string(), "key:card-2".to_string()]
        );

        let banners = ad_server.created_banners();
        assert_eq!(banners.len(), 2);
        assert!(banners.iter().all(|(id, _)| *id == remote("rc-1")));
        assert_eq!(groups[0].remote_campaign_id, Some(remote("rc-1")));
        assert!(groups[0]
            .mini_reels
            .iter()
            .all(|reel| reel.remote_banner_id.is_some()));
    }

    #[tokio::test]
    async fn group_edit_removes_banners_before_adding_them() {
        let ad_server = Arc::new(MockAdServer::new());
        let mut stored = campaign();
        let mut existing = group(Some("rc-g"), &["card-1"], &[]);
        existing.mini_reels = vec![provisioned("reel-a", "rc-g"), provisioned("reel-b", "rc-g")];
        stored.mini_reel_groups = vec![existing];
        let mut proposed = stored.clone();
        proposed.mini_reel_groups = vec![group(Some("rc-g"), &["card-1"], &["reel-b", "reel-c"])];

        let edited = pipeline(&ad_server)
            .on_edit(proposed, &stored)
            .await
            .unwrap();

        let banner_calls: Vec<Call> = ad_server
            .calls()
            .into_iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::CreateRemoteBanner { .. } | Call::DeleteRemoteBanner(_)
                )
            })
            .collect();
        assert_eq!(banner_calls.len(), 2);
        assert_eq!(
            banner_calls[0],
            Call::DeleteRemoteBanner(RemoteBannerId("banner-reel-a".into()))
        );
        assert!(matches!(
            &banner_calls[1],
            Call::CreateRemoteBanner { remote_campaign_id, payload }
                if *remote_campaign_id == remote("rc-g") && payload["extId"] == "reel-c"
        ));
        assert!(ad_server.edited_campaigns().is_empty());
        assert!(ad_server.deleted_campaign_batches().is_empty());

        let reels = &edited.mini_reel_groups[0].mini_reels;
        assert_eq!(reels[0], provisioned("reel-b", "rc-g"));
        assert_eq!(reels[1].remote_banner_id, Some(RemoteBannerId("rb-1".into())));
    }

    #[tokio::test]
    async fn changed_cards_retarget_the_group() {
        let ad_server = Arc::new(MockAdServer::new());
        let mut stored = campaign();
        let mut existing = group(Some("rc-g"), &["card-1"], &[]);
        existing.mini_reels = vec![provisioned("reel-a", "rc-g")];
        stored.mini_reel_groups = vec![existing];
        let mut proposed = stored.clone();
        proposed.mini_reel_groups = vec![group(Some("rc-g"), &["card-2", "card-1"], &["reel-a"])];

        pipeline(&ad_server)
            .on_edit(proposed, &stored)
            .await
            .unwrap();

        let edits = ad_server.edited_campaigns();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, remote("rc-g"));
        assert_eq!(
            edits[0].1.as_ref().map(|keys| keys.level1.clone()),
            Some(vec!["key:card-2".to_string(), "key:card-1".to_string()])
        );
        assert!(ad_server.created_banners().is_empty());
    }

    #[tokio::test]
    async fn category_change_retargets_groups_sharing_sponsored_cards() {
        let ad_server = Arc::new(MockAdServer::new());
        let mut stored = campaign();
        stored.cards = vec![provisioned("card-1", "rc-1")];
        let mut sharing = group(Some("rc-g1"), &["card-1"], &[]);
        sharing.mini_reels = vec![provisioned("reel-a", "rc-g1")];
        let mut separate = group(Some("rc-g2"), &["card-9"], &[]);
        separate.mini_reels = vec![provisioned("reel-b", "rc-g2")];
        stored.mini_reel_groups = vec![sharing, separate];
        let mut proposed = stored.clone();
        proposed.categories = vec!["food".into(), "sports".into()];

        pipeline(&ad_server)
            .on_edit(proposed, &stored)
            .await
            .unwrap();

        let mut edited: Vec<RemoteCampaignId> = ad_server
            .edited_campaigns()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        edited.sort();
        assert_eq!(edited, vec![remote("rc-1"), remote("rc-g1")]);
    }

    #[tokio::test]
    async fn removed_group_is_deleted_and_new_group_created() {
        let ad_server = Arc::new(MockAdServer::new());
        let mut stored = campaign();
        let mut existing = group(Some("rc-g"), &["card-1"], &[]);
        existing.mini_reels = vec![provisioned("reel-a", "rc-g")];
        stored.mini_reel_groups = vec![existing];
        let mut proposed = stored.clone();
        proposed.mini_reel_groups = vec![group(None, &["card-2"], &["reel-b"])];

        let edited = pipeline(&ad_server)
            .on_edit(proposed, &stored)
            .await
            .unwrap();

        assert_eq!(ad_server.deleted_campaign_batches(), vec![vec![remote("rc-g")]]);
        assert_eq!(ad_server.created_campaigns().len(), 1);
        assert_eq!(edited.mini_reel_groups.len(), 1);
        assert_eq!(edited.mini_reel_groups[0].remote_campaign_id, Some(remote("rc-1")));
    }

    #[tokio::test]
    async fn removing_the_last_banner_surfaces_a_constraint_violation() {
        let mut ad_server = MockAdServer::new();
        ad_server.on_delete_remote_banner = Box::new(|_| {
            Err(AdServerError::RemoteBanner(
                "Cannot remove the last banner from an active campaign".into(),
            ))
        });
        let ad_server = Arc::new(ad_server);
        let mut stored = campaign();
        let mut existing = group(Some("rc-g"), &["card-1"], &[]);
        existing.mini_reels = vec![provisioned("reel-a", "rc-g")];
        stored.mini_reel_groups = vec![existing];
        let mut proposed = stored.clone();
        proposed.mini_reel_groups[0].mini_reels = vec![ContentRef::new("reel-b")];

        let failure = pipeline(&ad_server)
            .on_edit(proposed, &stored)
            .await
            .unwrap_err();

        assert_eq!(
            failure.error,
            Error::RemoteConstraintViolated {
                campaign_id: stored.id,
                remote_campaign_id: remote("rc-g"),
            }
        );
        assert_eq!(failure.campaign.mini_reel_groups, stored.mini_reel_groups);
        assert!(ad_server.created_banners().is_empty());
    }

    #[tokio::test]
    async fn unknown_group_id_is_provisioned_anew() {
        let ad_server = Arc::new(MockAdServer::new());
        let stored = campaign();
        let mut foreign = group(Some("rc-of-another-campaign"), &["card-1"], &[]);
        foreign.mini_reels = vec![provisioned("reel-1", "rc-of-another-campaign")];
        let mut proposed = stored.clone();
        proposed.mini_reel_groups = vec![foreign];

        let edited = pipeline(&ad_server)
            .on_edit(proposed, &stored)
            .await
            .unwrap();

        assert!(ad_server.edited_campaigns().is_empty());
        assert!(ad_server.deleted_campaign_batches().is_empty());
        assert_eq!(ad_server.created_campaigns().len(), 1);
        let banners = ad_server.created_banners();
        assert_eq!(banners.len(), 1);
        assert_eq!(banners[0].0, remote("rc-1"));

        let created = &edited.mini_reel_groups[0];
        assert_eq!(created.remote_campaign_id, Some(remote("rc-1")));
        assert_eq!(created.mini_reels[0].remote_banner_id, Some(RemoteBannerId("rb-1".into())));

        pipeline(&ad_server).on_delete(&edited).await.unwrap();

        let deleted: Vec<RemoteCampaignId> =
            ad_server.deleted_campaign_batches().into_iter().flatten().collect();
        assert!(deleted.contains(&remote("rc-1")));
        assert!(!deleted.contains(&remote("rc-of-another-campaign")));
    }
}
