//! Cadence controller (spec C4 / §4.4): decides, on each tick, whether a
//! group should `SKIP` or `GENERATE(bucket)` an episode.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use caster_collections::CollectionManager;
use caster_locks::GroupLock;
use caster_store::{DurableStore, FastStore};
use caster_types::{Bucket, GroupId, PodcastGroup};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

fn pending_apology_key(group_id: GroupId) -> String {
    format!("cadence:group:{group_id}:pending_apology")
}

fn status_key(group_id: GroupId) -> String {
    format!("cadence:group:{group_id}:status")
}

/// Why the controller chose to skip this tick (spec §4.4 steps 4/6/7 and
/// the non-overlap rule of §4.4/§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    NotDue,
    InsufficientContentRetry,
    InProgress,
    EmptyWeekly,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::NotDue => "not-due",
            SkipReason::InsufficientContentRetry => "insufficient-content-retry",
            SkipReason::InProgress => "in-progress",
            SkipReason::EmptyWeekly => "empty-weekly",
        };
        f.write_str(s)
    }
}

/// Result of one cadence decision for one group (spec §4.4 Contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceDecision {
    Skip(SkipReason),
    Generate(Bucket),
}

/// Per-group cadence state readable by the admin surface (spec §4.4
/// "Cadence status").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceStatus {
    pub bucket_considered: Bucket,
    pub last_reason: String,
    pub next_eligible_time: Option<DateTime<Utc>>,
    pub pending_apology: bool,
    pub decided_at: DateTime<Utc>,
}

pub struct CadenceController {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    collections: Arc<CollectionManager>,
    staleness_max: Duration,
    generation_lock_ttl: Duration,
}

impl CadenceController {
    pub fn new(
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        collections: Arc<CollectionManager>,
        staleness_max: Duration,
        generation_lock_ttl: Duration,
    ) -> Self {
        Self {
            fast,
            durable,
            collections,
            staleness_max,
            generation_lock_ttl,
        }
    }

    fn last_episode_time(&self, group_id: GroupId) -> Result<Option<DateTime<Utc>>> {
        let episodes = self.durable.episodes_for_group(group_id)?;
        Ok(episodes.iter().map(|e| e.created_at).max())
    }

    fn pending_apology(&self, group_id: GroupId) -> Result<bool> {
        Ok(self.fast.get(&pending_apology_key(group_id))?.as_deref() == Some("1"))
    }

    fn set_pending_apology(&self, group_id: GroupId) -> Result<()> {
        self.fast
            .set(&pending_apology_key(group_id), "1", Duration::from_secs(u32::MAX as u64))
    }

    /// Clear the apology flag. Called by the episode pipeline once an
    /// episode for this group reaches `published` (spec §4.4 step 7: "to
    /// be consumed by the next successful episode").
    pub fn consume_pending_apology(&self, group_id: GroupId) -> Result<()> {
        self.fast.delete(&pending_apology_key(group_id))
    }

    fn persist_status(&self, group_id: GroupId, status: &CadenceStatus) -> Result<()> {
        let raw = serde_json::to_string(status).context("serialize cadence status")?;
        self.fast
            .set(&status_key(group_id), &raw, Duration::from_secs(u32::MAX as u64))
    }

    pub fn status(&self, group_id: GroupId) -> Result<Option<CadenceStatus>> {
        match self.fast.get(&status_key(group_id))? {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).context("deserialize cadence status")?,
            )),
            None => Ok(None),
        }
    }

    /// Attempt to acquire the group's generation lock and return the
    /// corresponding decision: `Generate` on success, `Skip(InProgress)`
    /// if already held (spec §4.4 Non-overlap).
    fn finalize_generate(&self, group_id: GroupId, bucket: Bucket) -> Result<CadenceDecision> {
        if GroupLock::try_acquire(self.fast.as_ref(), group_id, self.generation_lock_ttl)? {
            Ok(CadenceDecision::Generate(bucket))
        } else {
            Ok(CadenceDecision::Skip(SkipReason::InProgress))
        }
    }

    /// Run the decision algorithm for one group (spec §4.4 steps 1-7) and
    /// persist its readable status.
    pub fn tick_group(&self, group: &PodcastGroup) -> Result<CadenceDecision> {
        let since_last = self.last_episode_time(group.id)?;
        let since = since_last.map(|t| Utc::now().signed_duration_since(t));

        let active = self.collections.get_active(group.id)?;
        let ready = self
            .collections
            .readiness(&active, group.min_articles, self.staleness_max)?;

        let preferred_window = chrono_window(group.preferred_bucket);
        if let Some(s) = since {
            if s < preferred_window {
                let status = CadenceStatus {
                    bucket_considered: group.preferred_bucket,
                    last_reason: SkipReason::NotDue.to_string(),
                    next_eligible_time: since_last.map(|t| t + preferred_window),
                    pending_apology: self.pending_apology(group.id)?,
                    decided_at: Utc::now(),
                };
                self.persist_status(group.id, &status)?;
                return Ok(CadenceDecision::Skip(SkipReason::NotDue));
            }
        }

        if ready {
            let decision = self.finalize_generate(group.id, group.preferred_bucket)?;
            let reason = match decision {
                CadenceDecision::Generate(_) => "ready".to_string(),
                CadenceDecision::Skip(r) => r.to_string(),
            };
            self.persist_status(
                group.id,
                &CadenceStatus {
                    bucket_considered: group.preferred_bucket,
                    last_reason: reason,
                    next_eligible_time: None,
                    pending_apology: self.pending_apology(group.id)?,
                    decided_at: Utc::now(),
                },
            )?;
            info!(group_id = %group.id, ?decision, "cadence decision");
            return Ok(decision);
        }

        let mut bucket = group.preferred_bucket;
        loop {
            if bucket.is_weekly() {
                if !active.article_ids.is_empty() {
                    let decision = self.finalize_generate(group.id, Bucket::Weekly)?;
                    let reason = match decision {
                        CadenceDecision::Generate(_) => "weekly-forced".to_string(),
                        CadenceDecision::Skip(r) => r.to_string(),
                    };
                    self.persist_status(
                        group.id,
                        &CadenceStatus {
                            bucket_considered: Bucket::Weekly,
                            last_reason: reason,
                            next_eligible_time: None,
                            pending_apology: self.pending_apology(group.id)?,
                            decided_at: Utc::now(),
                        },
                    )?;
                    return Ok(decision);
                }
                self.set_pending_apology(group.id)?;
                self.persist_status(
                    group.id,
                    &CadenceStatus {
                        bucket_considered: Bucket::Weekly,
                        last_reason: SkipReason::EmptyWeekly.to_string(),
                        next_eligible_time: since_last.map(|t| t + chrono_window(Bucket::Weekly)),
                        pending_apology: true,
                        decided_at: Utc::now(),
                    },
                )?;
                return Ok(CadenceDecision::Skip(SkipReason::EmptyWeekly));
            }

            let next_bucket = bucket.escalate();
            let next_window = chrono_window(next_bucket);
            if let Some(s) = since {
                if s < next_window {
                    self.persist_status(
                        group.id,
                        &CadenceStatus {
                            bucket_considered: next_bucket,
                            last_reason: SkipReason::InsufficientContentRetry.to_string(),
                            next_eligible_time: since_last.map(|t| t + next_window),
                            pending_apology: self.pending_apology(group.id)?,
                            decided_at: Utc::now(),
                        },
                    )?;
                    return Ok(CadenceDecision::Skip(SkipReason::InsufficientContentRetry));
                }
            }
            bucket = next_bucket;
        }
    }

    /// Decide for every currently active group (spec §4.4 "Periodic tick").
    pub fn tick_all(&self) -> Result<Vec<(GroupId, CadenceDecision)>> {
        let groups = self.durable.list_active_groups()?;
        groups
            .into_iter()
            .map(|group| {
                let decision = self.tick_group(&group)?;
                Ok((group.id, decision))
            })
            .collect()
    }
}

fn chrono_window(bucket: Bucket) -> chrono::Duration {
    chrono::Duration::from_std(bucket.window()).expect("bucket windows fit in chrono::Duration")
}

#[cfg(test)]
mod tests {
    use caster_store::{InMemoryDurableStore, InMemoryFastStore};
    use caster_types::{Article, ArticleId, Episode, FeedId, ReviewState};

    use super::*;

    fn controller() -> (CadenceController, Arc<dyn DurableStore>, Arc<dyn FastStore>) {
        let fast: Arc<dyn FastStore> = Arc::new(InMemoryFastStore::new());
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
        let collections = Arc::new(CollectionManager::new(durable.clone()));
        let ctrl = CadenceController::new(
            fast.clone(),
            durable.clone(),
            collections,
            Duration::from_secs(72 * 3600),
            Duration::from_secs(3600),
        );
        (ctrl, durable, fast)
    }

    fn sample_group(min_articles: u32, bucket: Bucket) -> PodcastGroup {
        PodcastGroup {
            min_articles,
            preferred_bucket: bucket,
            ..Default::default()
        }
    }

    fn add_article(durable: &dyn DurableStore, group_id: GroupId, collections: &CollectionManager, age_hours: i64) {
        let article = Article {
            id: ArticleId::new(),
            source_feed_id: FeedId::new(),
            canonical_link: "https://x".into(),
            title: "t".into(),
            body: "b".into(),
            publish_time: Utc::now() - chrono::Duration::hours(age_hours),
            ingest_time: Utc::now(),
            fingerprint: "fp".into(),
            review_state: ReviewState::Light,
            tags: Default::default(),
            summary: String::new(),
            confidence: 0.9,
            reviewing_model: None,
            collection_id: None,
            degraded: false,
            rejection_reason: None,
        };
        let id = article.id;
        durable.insert_article(article).unwrap();
        collections.assign(id, &[group_id]).unwrap();
    }

    #[test]
    fn brand_new_ready_group_generates_at_preferred_bucket() {
        let (ctrl, durable, _fast) = controller();
        let group = sample_group(3, Bucket::Daily);
        for _ in 0..3 {
            add_article(durable.as_ref(), group.id, &ctrl.collections, 1);
        }

        let decision = ctrl.tick_group(&group).unwrap();
        assert_eq!(decision, CadenceDecision::Generate(Bucket::Daily));
    }

    #[test]
    fn not_due_when_last_episode_recent() {
        let (ctrl, durable, _fast) = controller();
        let group = sample_group(3, Bucket::Daily);
        for _ in 0..3 {
            add_article(durable.as_ref(), group.id, &ctrl.collections, 1);
        }
        let mut episode = caster_types::Episode::new(group.id);
        episode.transition(caster_types::EpisodeStatus::Published);
        durable.insert_episode(episode).unwrap();

        let decision = ctrl.tick_group(&group).unwrap();
        assert_eq!(decision, CadenceDecision::Skip(SkipReason::NotDue));
    }

    #[test]
    fn escalates_to_weekly_and_generates_when_content_exists_but_below_min() {
        let (ctrl, durable, _fast) = controller();
        let group = sample_group(3, Bucket::Daily);
        add_article(durable.as_ref(), group.id, &ctrl.collections, 144);

        let mut stale_episode = Episode::new(group.id);
        stale_episode.created_at = Utc::now() - chrono::Duration::hours(8 * 24);
        stale_episode.transition(caster_types::EpisodeStatus::Published);
        durable.insert_episode(stale_episode).unwrap();

        let decision = ctrl.tick_group(&group).unwrap();
        assert_eq!(decision, CadenceDecision::Generate(Bucket::Weekly));

        let status = ctrl.status(group.id).unwrap().unwrap();
        assert!(!status.pending_apology);
    }

    #[test]
    fn empty_weekly_sets_pending_apology() {
        let (ctrl, durable, _fast) = controller();
        let group = sample_group(3, Bucket::Daily);

        let mut stale_episode = Episode::new(group.id);
        stale_episode.created_at = Utc::now() - chrono::Duration::hours(8 * 24);
        stale_episode.transition(caster_types::EpisodeStatus::Published);
        durable.insert_episode(stale_episode).unwrap();

        let decision = ctrl.tick_group(&group).unwrap();
        assert_eq!(decision, CadenceDecision::Skip(SkipReason::EmptyWeekly));

        let status = ctrl.status(group.id).unwrap().unwrap();
        assert!(status.pending_apology);
    }

    #[test]
    fn non_overlap_enforced_via_group_lock() {
        let (ctrl, durable, fast) = controller();
        let group = sample_group(3, Bucket::Daily);
        for _ in 0..3 {
            add_article(durable.as_ref(), group.id, &ctrl.collections, 1);
        }

        GroupLock::try_acquire(fast.as_ref(), group.id, Duration::from_secs(60)).unwrap();

        let decision = ctrl.tick_group(&group).unwrap();
        assert_eq!(decision, CadenceDecision::Skip(SkipReason::InProgress));
    }
}
