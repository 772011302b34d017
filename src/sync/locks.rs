use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::adserver::RemoteCampaignId;

type Slots = HashMap<RemoteCampaignId, Arc<AsyncMutex<()>>>;

/// Async mutexes keyed by remote campaign id. Holding the guard for an id is
/// the only way banners of that remote campaign get created or deleted, so
/// every banner mutation of one campaign runs one at a time while different
/// campaigns proceed independently.
#[derive(Clone, Default)]
pub struct CampaignLocks {
    slots: Arc<Mutex<Slots>>,
}

pub struct CampaignLockGuard {
    remote_campaign_id: RemoteCampaignId,
    slots: Arc<Mutex<Slots>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl CampaignLocks {
    pub fn new() -> CampaignLocks {
        CampaignLocks::default()
    }

    pub async fn lock(&self, remote_campaign_id: &RemoteCampaignId) -> CampaignLockGuard {
        let slot = lock_slots(&self.slots)
            .entry(remote_campaign_id.clone())
            .or_default()
            .clone();

        let guard = slot.lock_owned().await;

        CampaignLockGuard {
            remote_campaign_id: remote_campaign_id.clone(),
            slots: Arc::clone(&self.slots),
            guard: Some(guard),
        }
    }

    /// Number of remote campaigns currently locked or waited on.
    pub fn len(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for CampaignLockGuard {
    fn drop(&mut self) {
        let mut slots = lock_slots(&self.slots);
        drop(self.guard.take());

        // nobody else holds or waits on this slot
        let idle = slots
            .get(&self.remote_campaign_id)
            .map_or(false, |slot| Arc::strong_count(slot) == 1);
        if idle {
            slots.remove(&self.remote_campaign_id);
        }
    }
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
