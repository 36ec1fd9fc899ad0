//! Delta planning module
//!
//! Compares the episodes a catalog offers with the episodes already on disk
//! and decides what to fetch in this run.

use crate::config::SyncMode;
use std::collections::BTreeSet;

/// Episodes selected for one series in one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Episodes to fetch now, ascending
    pub to_fetch: Vec<u32>,
    /// Episodes behind a remote numbering gap, left for a later run
    pub deferred: Vec<u32>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty() && self.deferred.is_empty()
    }
}

/// Computes the missing episodes, ascending and without duplicates
///
/// - `Full`: every remote episode that is not present locally.
/// - `Incremental`: every remote episode numbered above the highest local
///   one (0 when nothing is local). Gaps below that mark are never
///   backfilled; only `Full` repairs them.
pub fn plan_delta(remote: &[u32], local: &BTreeSet<u32>, mode: SyncMode) -> Vec<u32> {
    let remote: BTreeSet<u32> = remote.iter().copied().collect();

    match mode {
        SyncMode::Full => remote.difference(local).copied().collect(),
        SyncMode::Incremental => {
            let last = local.last().copied().unwrap_or(0);
            remote.into_iter().filter(|&episode| episode > last).collect()
        }
    }
}

/// Plans a run for one series
///
/// In `Incremental` mode episodes are expected to arrive in sequence, so the
/// plan stops at the first hole in the remote numbering: the first missing
/// episode is always fetched, later ones only while each is exactly one
/// above the previous. Everything after the hole is deferred and picked up by
/// the next run once the episodes before it are on disk.
pub fn plan_sync(remote: &[u32], local: &BTreeSet<u32>, mode: SyncMode) -> SyncPlan {
    let delta = plan_delta(remote, local, mode);

    match mode {
        SyncMode::Full => SyncPlan {
            to_fetch: delta,
            deferred: Vec::new(),
        },
        SyncMode::Incremental => {
            let contiguous = delta
                .windows(2)
                .position(|pair| pair[1] != pair[0] + 1)
                .map_or(delta.len(), |index| index + 1);

            let mut to_fetch = delta;
            let deferred = to_fetch.split_off(contiguous);
            SyncPlan { to_fetch, deferred }
        }
    }
}
