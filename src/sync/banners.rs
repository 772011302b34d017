use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adserver::RemoteCampaignId;
use crate::campaign::{ContentKind, ContentRef};

use super::{diff, Pipeline, SyncError};

fn banner_payload(template: &Value, kind: ContentKind, content_id: &str) -> Value {
    match template {
        Value::Object(fields) => {
            let mut fields = fields.clone();
            fields.insert("extId".into(), json!(content_id));
            fields.insert("kind".into(), json!(kind.as_str()));
            Value::Object(fields)
        }
        other => json!({ "template": other, "extId": content_id, "kind": kind.as_str() }),
    }
}

impl Pipeline {
    /// Gives every proposed item a banner in `remote_campaign_id`. Items the
    /// stored list already has a banner for inherit it; the others get a new
    /// one, created one after another while holding the campaign's lock.
    #[tracing::instrument(skip(self, proposed, stored))]
    pub(super) async fn reconcile_banners(
        &self,
        proposed: Option<&mut [ContentRef]>,
        stored: Option<&[ContentRef]>,
        kind: ContentKind,
        is_sponsored: bool,
        remote_campaign_id: &RemoteCampaignId,
    ) -> Result<(), SyncError> {
        let (proposed, stored) = match (proposed, stored) {
            (Some(proposed), Some(stored)) => (proposed, stored),
            _ => {
                debug!("nothing to reconcile");
                return Ok(());
            }
        };

        let mut queue = vec![];
        for (index, item) in proposed.iter_mut().enumerate() {
            let existing = stored
                .iter()
                .find(|existing| existing.id == item.id && existing.remote_banner_id.is_some());
            match existing {
                Some(existing) => {
                    item.remote_banner_id = existing.remote_banner_id.clone();
                    item.remote_banner_slot = existing.remote_banner_slot;
                }
                None if item.remote_banner_id.is_none() => queue.push(index),
                None => {}
            }
        }

        if queue.is_empty() {
            return Ok(());
        }

        let template = self.config.templates.select(kind, is_sponsored);
        let _guard = self.locks.lock(remote_campaign_id).await;
        for index in queue {
            let item = &mut proposed[index];
            let payload = banner_payload(template, kind, &item.id);
            let banner = self
                .ad_server
                .create_remote_banner(remote_campaign_id, &payload)
                .await
                .map_err(SyncError::remote)?;

            debug!(
                "created banner {} in slot {} for {}",
                banner.banner_id, banner.banner_slot, item.id
            );
            item.remote_banner_id = Some(banner.banner_id);
            item.remote_banner_slot = Some(banner.banner_slot);
        }

        Ok(())
    }

    /// Deletes the banners of stored items that are no longer proposed, one
    /// after another while holding the campaign's lock.
    #[tracing::instrument(skip(self, proposed, stored))]
    pub(super) async fn clean_banners(
        &self,
        proposed: Option<&[ContentRef]>,
        stored: Option<&[ContentRef]>,
        remote_campaign_id: &RemoteCampaignId,
    ) -> Result<(), SyncError> {
        let (proposed, stored) = match (proposed, stored) {
            (Some(proposed), Some(stored)) => (proposed, stored),
            _ => {
                debug!("nothing to clean");
                return Ok(());
            }
        };

        let banners: Vec<_> = diff::removed(proposed, stored)
            .into_iter()
            .filter_map(|item| match &item.remote_banner_id {
                Some(banner_id) => Some((item.id.as_str(), banner_id)),
                None => {
                    warn!(
                        "content {} has no banner to remove from {}",
                        item.id, remote_campaign_id
                    );
                    None
                }
            })
            .collect();

        if banners.is_empty() {
            return Ok(());
        }

        let _guard = self.locks.lock(remote_campaign_id).await;
        for (content_id, banner_id) in banners {
            self.ad_server
                .delete_remote_banner(banner_id)
                .await
                .map_err(|err| {
                    if err.is_last_banner_fault() {
                        warn!("{} would be left without banners: {}", remote_campaign_id, err);
                        SyncError::LastBanner(remote_campaign_id.clone())
                    } else {
                        SyncError::remote(err)
                    }
                })?;

            debug!("removed banner {} of {}", banner_id, content_id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::super::tests::{pipeline, provisioned};
    use super::*;
    use crate::adserver::test::{BannerEvent, MockAdServer};
    use crate::adserver::{AdServerError, RemoteBannerId};

    fn remote(id: &str) -> RemoteCampaignId {
        RemoteCampaignId(id.into())
    }

    #[tokio::test]
    async fn reconcile_keeps_known_banners_and_creates_the_rest() {
        let ad_server = Arc::new(MockAdServer::new());
        let stored = vec![provisioned("reel-a", "rc-9")];
        let mut proposed = vec![ContentRef::new("reel-a"), ContentRef::new("reel-b")];

        pipeline(&ad_server)
            .reconcile_banners(
                Some(&mut proposed),
                Some(&stored),
                ContentKind::MiniReel,
                false,
                &remote("rc-9"),
            )
            .await
            .unwrap();

        assert_eq!(
            proposed[0].remote_banner_id,
            Some(RemoteBannerId("banner-reel-a".into()))
        );
        assert_eq!(
            proposed[1].remote_banner_id,
            Some(RemoteBannerId("rb-1".into()))
        );
        assert_eq!(proposed[1].remote_banner_slot, Some(1));

        let created = ad_server.created_banners();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].0, remote("rc-9"));
        assert_eq!(created[0].1["extId"], "reel-b");
        assert_eq!(created[0].1["template"], "group-minireel");
    }

    #[tokio::test]
    async fn absent_lists_are_nothing_to_do() {
        let ad_server = Arc::new(MockAdServer::new());
        let pipeline = pipeline(&ad_server);
        let mut proposed = vec![ContentRef::new("card-a")];

        pipeline
            .reconcile_banners(
                Some(&mut proposed),
                None,
                ContentKind::Card,
                true,
                &remote("rc-1"),
            )
            .await
            .unwrap();
        pipeline
            .clean_banners(None, Some(&proposed), &remote("rc-1"))
            .await
            .unwrap();

        assert!(ad_server.calls().is_empty());
    }

    #[tokio::test]
    async fn clean_removes_only_dropped_banners() {
        let ad_server = Arc::new(MockAdServer::new());
        let stored = vec![
            provisioned("reel-a", "rc-1"),
            provisioned("reel-b", "rc-1"),
            ContentRef::new("reel-c"),
        ];
        let proposed = vec![ContentRef::new("reel-b")];

        pipeline(&ad_server)
            .clean_banners(Some(&proposed), Some(&stored), &remote("rc-1"))
            .await
            .unwrap();

        assert_eq!(
            ad_server.deleted_banners(),
            vec![RemoteBannerId("banner-reel-a".into())]
        );
    }

    #[tokio::test]
    async fn removing_the_last_banner_is_a_constraint_violation() {
        let mut ad_server = MockAdServer::new();
        ad_server.on_delete_remote_banner = Box::new(|_| {
            Err(AdServerError::RemoteBanner(
                "Cannot remove the last banner from an active campaign".into(),
            ))
        });
        let ad_server = Arc::new(ad_server);
        let stored = vec![provisioned("reel-a", "rc-1")];

        let result = pipeline(&ad_server)
            .clean_banners(Some(&[]), Some(&stored), &remote("rc-1"))
            .await;

        assert!(matches!(result, Err(SyncError::LastBanner(id)) if id == remote("rc-1")));
    }

    #[tokio::test]
    async fn other_banner_faults_are_remote_failures() {
        let mut ad_server = MockAdServer::new();
        ad_server.on_create_remote_banner =
            Box::new(|_| Err(AdServerError::RemoteBanner("template rejected".into())));
        let ad_server = Arc::new(ad_server);
        let mut proposed = vec![ContentRef::new("card-a")];

        let result = pipeline(&ad_server)
            .reconcile_banners(
                Some(&mut proposed),
                Some(&[]),
                ContentKind::Card,
                true,
                &remote("rc-1"),
            )
            .await;

        assert!(matches!(result, Err(SyncError::Remote)));
        assert_eq!(proposed[0].remote_banner_id, None);
    }

    #[tokio::test]
    async fn banner_calls_for_one_campaign_never_overlap() {
        let mut ad_server = MockAdServer::new();
        ad_server.banner_latency = Duration::from_millis(20);
        let ad_server = Arc::new(ad_server);
        let pipeline = pipeline(&ad_server);
        let stored = vec![provisioned("reel-a", "rc-1"), provisioned("reel-b", "rc-1")];
        let mut added = vec![
            ContentRef::new("reel-b"),
            ContentRef::new("reel-c"),
            ContentRef::new("reel-d"),
        ];
        let kept = vec![ContentRef::new("reel-b")];
        let rc1 = remote("rc-1");

        let (created, cleaned) = futures::join!(
            pipeline.reconcile_banners(
                Some(&mut added),
                Some(&stored),
                ContentKind::MiniReel,
                false,
                &rc1,
            ),
            pipeline.clean_banners(Some(&kept), Some(&stored), &rc1),
        );
        created.unwrap();
        cleaned.unwrap();

        let events = ad_server.banner_events();
        assert_eq!(events.len(), 6);
        for pair in events.chunks(2) {
            match pair {
                [BannerEvent::Started(started), BannerEvent::Finished(finished)] => {
                    assert_eq!(started, finished)
                }
                _ => panic!("overlapping banner calls: {:?}", events),
            }
        }
    }

    #[tokio::test]
    async fn banner_calls_for_different_campaigns_run_concurrently() {
        let mut ad_server = MockAdServer::new();
        ad_server.banner_latency = Duration::from_millis(20);
        let ad_server = Arc::new(ad_server);
        let pipeline = pipeline(&ad_server);
        let mut first = vec![ContentRef::new("reel-a")];
        let mut second = vec![ContentRef::new("reel-b")];
        let (rc1, rc2) = (remote("rc-1"), remote("rc-2"));

        let (a, b) = futures::join!(
            pipeline.reconcile_banners(
                Some(&mut first),
                Some(&[]),
                ContentKind::MiniReel,
                false,
                &rc1,
            ),
            pipeline.reconcile_banners(
                Some(&mut second),
                Some(&[]),
                ContentKind::MiniReel,
                false,
                &rc2,
            ),
        );
        a.unwrap();
        b.unwrap();

        let events = ad_server.banner_events();
        assert!(matches!(events[1], BannerEvent::Started(_)));
    }
}
