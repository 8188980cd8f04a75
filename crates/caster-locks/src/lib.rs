//! The per-group generation lock and the singleton production lock
//! (spec §3 "Locks", §4.4 non-overlap, §4.5).
//!
//! Both are thin typed wrappers over [`FastStore`]'s `set-if-absent with
//! TTL` primitive — no in-process mutex is involved, so acquisition is
//! valid across processes per spec §5.

use std::time::Duration;

use anyhow::{Context, Result};
use caster_store::FastStore;
use caster_types::{EpisodeId, GroupId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default TTL for the per-group generation lock (spec §4.4).
pub const DEFAULT_GENERATION_LOCK_TTL: Duration = Duration::from_secs(3_600);
/// Default TTL for an automatic production lock (spec §4.5).
pub const DEFAULT_PRODUCTION_LOCK_TTL: Duration = Duration::from_secs(7_200);
/// Default TTL for a manually-held production lock (spec §4.5).
pub const DEFAULT_MANUAL_PRODUCTION_LOCK_TTL: Duration = Duration::from_secs(86_400);

fn group_lock_key(group_id: GroupId) -> String {
    format!("overseer:group:{group_id}:lock")
}

const PRODUCTION_LOCK_KEY: &str = "podcast:production:active";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GroupLockValue {
    acquired_at: DateTime<Utc>,
}

/// The per-group lock that serializes episode generation (spec §4.4
/// non-overlap, §4.6 precondition 1). Acquired with a conditional
/// set-if-absent; released explicitly by C6's finally block, or reclaimed
/// automatically by TTL expiry for stuck pipelines (spec §5).
pub struct GroupLock;

impl GroupLock {
    /// Attempt to acquire the group's generation lock. Returns `true` if
    /// acquired, `false` if already held (spec: `SKIP(in-progress)` /
    /// `LockHeld`).
    pub fn try_acquire(store: &dyn FastStore, group_id: GroupId, ttl: Duration) -> Result<bool> {
        let value = serde_json::to_string(&GroupLockValue {
            acquired_at: Utc::now(),
        })
        .context("serialize group lock value")?;
        store.set_if_absent(&group_lock_key(group_id), &value, ttl)
    }

    pub fn release(store: &dyn FastStore, group_id: GroupId) -> Result<()> {
        store.delete(&group_lock_key(group_id))
    }

    pub fn is_held(store: &dyn FastStore, group_id: GroupId) -> Result<bool> {
        Ok(store.get(&group_lock_key(group_id))?.is_some())
    }
}

/// Singleton value stored at [`PRODUCTION_LOCK_KEY`] while an episode is
/// being generated, or while an admin has manually paused the review
/// router (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionLockInfo {
    pub group_id: GroupId,
    pub episode_id: Option<EpisodeId>,
    pub started_at: DateTime<Utc>,
    /// `true` if held via admin pause rather than an in-flight pipeline;
    /// such locks are not cleared by C6's finally block (spec §4.5).
    pub manual: bool,
}

/// The process-wide signal that pauses the Review Router (C2) while an
/// episode is being generated (spec C5).
pub struct ProductionLock;

impl ProductionLock {
    /// Set by C6 at pipeline entry. Acquisition failure (store
    /// unreachable) is logged by the caller and never a hard failure, per
    /// spec §4.5 — this function still returns the underlying error so the
    /// caller can decide and log; it does not itself swallow errors.
    pub fn set(
        store: &dyn FastStore,
        group_id: GroupId,
        episode_id: EpisodeId,
        ttl: Duration,
    ) -> Result<()> {
        let info = ProductionLockInfo {
            group_id,
            episode_id: Some(episode_id),
            started_at: Utc::now(),
            manual: false,
        };
        let value = serde_json::to_string(&info).context("serialize production lock value")?;
        store.set(PRODUCTION_LOCK_KEY, &value, ttl)
    }

    /// Set via admin pause, independent of any episode. Carries a longer
    /// TTL so pipeline completion does not release a manually held pause
    /// (spec §4.5).
    pub fn set_manual(store: &dyn FastStore, group_id: GroupId, ttl: Duration) -> Result<()> {
        let info = ProductionLockInfo {
            group_id,
            episode_id: None,
            started_at: Utc::now(),
            manual: true,
        };
        let value = serde_json::to_string(&info).context("serialize production lock value")?;
        store.set(PRODUCTION_LOCK_KEY, &value, ttl)
    }

    /// Clear on any pipeline exit path (success, caught error, panic). Per
    /// spec §4.5, this should never abort the pipeline; callers wrap it in
    /// a best-effort finally block.
    pub fn clear(store: &dyn FastStore) -> Result<()> {
        store.delete(PRODUCTION_LOCK_KEY)
    }

    /// Clear only if the held lock is not a manual pause. Used by C6's
    /// finally block so an admin's manual pause survives pipeline
    /// completion.
    pub fn clear_if_not_manual(store: &dyn FastStore) -> Result<()> {
        match Self::inspect(store)? {
            Some(info) if info.manual => Ok(()),
            _ => Self::clear(store),
        }
    }

    pub fn inspect(store: &dyn FastStore) -> Result<Option<ProductionLockInfo>> {
        let Some(raw) = store.get(PRODUCTION_LOCK_KEY)? else {
            return Ok(None);
        };
        let info = serde_json::from_str(&raw).context("deserialize production lock value")?;
        Ok(Some(info))
    }

    pub fn is_set(store: &dyn FastStore) -> Result<bool> {
        Ok(Self::inspect(store)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use caster_store::InMemoryFastStore;

    use super::*;

    #[test]
    fn group_lock_acquire_is_exclusive() {
        let store = InMemoryFastStore::new();
        let group = GroupId::new();
        assert!(GroupLock::try_acquire(&store, group, Duration::from_secs(60)).unwrap());
        assert!(!GroupLock::try_acquire(&store, group, Duration::from_secs(60)).unwrap());
        GroupLock::release(&store, group).unwrap();
        assert!(GroupLock::try_acquire(&store, group, Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn group_lock_expires_after_ttl() {
        let store = InMemoryFastStore::new();
        let group = GroupId::new();
        assert!(GroupLock::try_acquire(&store, group, Duration::from_millis(5)).unwrap());
        std::thread::sleep(Duration::from_millis(20));
        assert!(GroupLock::try_acquire(&store, group, Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn production_lock_round_trips_and_clears() {
        let store = InMemoryFastStore::new();
        let group = GroupId::new();
        let episode = EpisodeId::new();
        ProductionLock::set(&store, group, episode, Duration::from_secs(60)).unwrap();

        let info = ProductionLock::inspect(&store).unwrap().unwrap();
        assert_eq!(info.group_id, group);
        assert_eq!(info.episode_id, Some(episode));
        assert!(!info.manual);

        ProductionLock::clear(&store).unwrap();
        assert!(ProductionLock::inspect(&store).unwrap().is_none());
    }

    #[test]
    fn manual_production_lock_survives_pipeline_clear() {
        let store = InMemoryFastStore::new();
        let group = GroupId::new();
        ProductionLock::set_manual(&store, group, Duration::from_secs(86_400)).unwrap();

        ProductionLock::clear_if_not_manual(&store).unwrap();
        let info = ProductionLock::inspect(&store).unwrap();
        assert!(info.is_some());
        assert!(info.unwrap().manual);
    }

    #[test]
    fn automatic_production_lock_is_cleared_by_pipeline() {
        let store = InMemoryFastStore::new();
        let group = GroupId::new();
        ProductionLock::set(&store, group, EpisodeId::new(), Duration::from_secs(60)).unwrap();

        ProductionLock::clear_if_not_manual(&store).unwrap();
        assert!(ProductionLock::inspect(&store).unwrap().is_none());
    }
}
