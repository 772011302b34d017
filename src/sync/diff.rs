use std::collections::HashSet;
use std::hash::Hash;

use tracing::warn;

use crate::adserver::RemoteCampaignId;
use crate::campaign::{ContentRef, TargetGroup};

/// Order-insensitive comparison; duplicates don't count.
pub fn same_set<T: Eq + Hash>(a: &[T], b: &[T]) -> bool {
    let a: HashSet<&T> = a.iter().collect();
    let b: HashSet<&T> = b.iter().collect();
    a == b
}

pub fn contains_id(items: &[ContentRef], id: &str) -> bool {
    items.iter().any(|item| item.id == id)
}

/// Entries of `stored` whose content id no longer appears in `proposed`.
pub fn removed<'a>(proposed: &[ContentRef], stored: &'a [ContentRef]) -> Vec<&'a ContentRef> {
    stored
        .iter()
        .filter(|item| !contains_id(proposed, &item.id))
        .collect()
}

/// Entries of `stored` whose content id still appears in `proposed`.
pub fn surviving<'a>(proposed: &[ContentRef], stored: &'a [ContentRef]) -> Vec<&'a ContentRef> {
    stored
        .iter()
        .filter(|item| contains_id(proposed, &item.id))
        .collect()
}

/// Replaces every proposed entry that is already known with its stored copy,
/// so remote identifiers survive a proposal that only names content ids.
/// Entries the stored list doesn't know keep their content id only.
pub fn carry_forward(proposed: &[ContentRef], stored: &[ContentRef]) -> Vec<ContentRef> {
    proposed
        .iter()
        .map(|item| match stored.iter().find(|existing| existing.id == item.id) {
            Some(existing) => existing.clone(),
            None => ContentRef::new(item.id.clone()),
        })
        .collect()
}

/// Stored groups that vanished from the proposal, matched by remote id.
pub fn removed_groups<'a>(
    proposed: &[TargetGroup],
    stored: &'a [TargetGroup],
) -> Vec<&'a TargetGroup> {
    stored
        .iter()
        .filter(|group| match &group.remote_campaign_id {
            Some(id) => !proposed
                .iter()
                .any(|candidate| candidate.remote_campaign_id.as_ref() == Some(id)),
            None => true,
        })
        .collect()
}

/// Remote campaign ids of `items`, logging each entry that never obtained one.
pub fn remote_campaign_ids<'a>(
    items: impl IntoIterator<Item = &'a ContentRef>,
) -> Vec<RemoteCampaignId> {
    items
        .into_iter()
        .filter_map(|item| {
            if item.remote_campaign_id.is_none() {
                warn!("content {} has no remote campaign to remove", item.id);
            }
            item.remote_campaign_id.clone()
        })
        .collect()
}

pub fn group_campaign_ids<'a>(
    groups: impl IntoIterator<Item = &'a TargetGroup>,
) -> Vec<RemoteCampaignId> {
    groups
        .into_iter()
        .filter_map(|group| {
            if group.remote_campaign_id.is_none() {
                warn!("group {:?} has no remote campaign to remove", group.name);
            }
            group.remote_campaign_id.clone()
        })
        .collect()
}
