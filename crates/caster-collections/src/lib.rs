//! Collection lifecycle manager (spec C3 / §4.3).
//!
//! Owns the invariant that every active group has exactly one `building`
//! collection at a time: [`CollectionManager::get_active`] creates one
//! lazily, [`CollectionManager::snapshot`] atomically rotates it into a
//! `snapshot` plus a fresh successor via [`DurableStore::snapshot_collection`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use caster_store::DurableStore;
use caster_types::{Article, ArticleId, Collection, CollectionStatus, EpisodeId, GroupId};
use chrono::Utc;
use tracing::{info, warn};

/// Outcome of [`CollectionManager::snapshot`].
#[derive(Debug, Clone)]
pub enum SnapshotOutcome {
    Created(Collection),
    /// Spec §4.3 edge case: fewer than `min_articles` in the active
    /// collection. The building collection is left untouched.
    InsufficientContent { min_articles: u32, actual: usize },
}

pub struct CollectionManager {
    durable: Arc<dyn DurableStore>,
}

impl CollectionManager {
    pub fn new(durable: Arc<dyn DurableStore>) -> Self {
        Self { durable }
    }

    /// Returns the group's unique `building` collection, creating one if
    /// absent. Calling this twice in a row without an intervening snapshot
    /// returns the same collection id (spec §8 round-trip law).
    pub fn get_active(&self, group_id: GroupId) -> Result<Collection> {
        let mut building = self
            .durable
            .collections_by_group_status(group_id, CollectionStatus::Building)?;

        match building.len() {
            0 => {
                let collection = Collection {
                    id: Default::default(),
                    name: format!("Active collection for {group_id}"),
                    status: CollectionStatus::Building,
                    created_at: Utc::now(),
                    linked_episode_id: None,
                    parent_collection_id: None,
                    group_ids: [group_id].into_iter().collect(),
                    article_ids: Default::default(),
                };
                self.durable.insert_collection(collection.clone())?;
                Ok(collection)
            }
            1 => Ok(building.remove(0)),
            n => bail!(
                "invariant violated: group {group_id} has {n} building collections, expected exactly 1"
            ),
        }
    }

    /// Attach `article_id` to each listed group's active collection (spec
    /// §4.3 `assign`). The article's scalar `collection_id` is set to the
    /// *first* group's collection for backward compatibility; every
    /// assigned collection's `article_ids` set is authoritative.
    pub fn assign(&self, article_id: ArticleId, group_ids: &[GroupId]) -> Result<()> {
        let Some(mut article) = self.durable.get_article(article_id)? else {
            bail!("assign: article {article_id} not found");
        };

        for (idx, group_id) in group_ids.iter().enumerate() {
            let mut collection = self.get_active(*group_id)?;
            collection.article_ids.insert(article_id);
            self.durable.update_collection(collection.clone())?;
            if idx == 0 {
                article.collection_id = Some(collection.id);
            }
        }

        self.durable.update_article(article)?;
        Ok(())
    }

    /// Whether `collection` is ready for episode generation: at least
    /// `min_articles` articles, and the oldest one younger than
    /// `staleness_max` (spec §4.3 Readiness). Advisory only — the
    /// canonical check happens again at generation time.
    pub fn readiness(
        &self,
        collection: &Collection,
        min_articles: u32,
        staleness_max: Duration,
    ) -> Result<bool> {
        if collection.article_ids.len() < min_articles as usize {
            return Ok(false);
        }

        let articles: Vec<Article> = self.durable.articles_in_collection(collection.id)?;
        let Some(oldest) = articles.iter().map(|a| a.publish_time).min() else {
            return Ok(false);
        };

        let age = Utc::now().signed_duration_since(oldest);
        let staleness_max = chrono::Duration::from_std(staleness_max).unwrap_or(chrono::Duration::MAX);
        Ok(age < staleness_max)
    }

    /// Atomically rotate the group's active collection into a snapshot tied
    /// to `episode_id`, with a fresh successor (spec §4.3 `snapshot`,
    /// §4.3 Atomicity).
    pub fn snapshot(
        &self,
        group_id: GroupId,
        episode_id: EpisodeId,
        min_articles: u32,
    ) -> Result<SnapshotOutcome> {
        let active = self.get_active(group_id)?;
        let actual = active.article_ids.len();
        if actual < min_articles as usize {
            return Ok(SnapshotOutcome::InsufficientContent { min_articles, actual });
        }

        let snapshot_name = format!("Episode {episode_id} Snapshot");
        let (snapshot, _successor) =
            self.durable
                .snapshot_collection(active.id, episode_id, snapshot_name)?;
        info!(%group_id, %episode_id, collection_id = %snapshot.id, "collection snapshotted");
        Ok(SnapshotOutcome::Created(snapshot))
    }

    /// Mark one group's active collection `expired` if it is empty and
    /// older than `collection_ttl`, then immediately recreate the active
    /// collection so the "exactly one building collection" invariant holds
    /// continuously (spec §4.3 Expiration, §11 supplement).
    pub fn sweep_expired_for_group(&self, group_id: GroupId, collection_ttl: Duration) -> Result<bool> {
        let active = self.get_active(group_id)?;
        if !active.article_ids.is_empty() {
            return Ok(false);
        }

        let ttl = chrono::Duration::from_std(collection_ttl).unwrap_or(chrono::Duration::MAX);
        let age = Utc::now().signed_duration_since(active.created_at);
        if age < ttl {
            return Ok(false);
        }

        let mut expired = active;
        expired.status = CollectionStatus::Expired;
        self.durable.update_collection(expired.clone())?;
        warn!(%group_id, collection_id = %expired.id, "expired empty stale building collection");

        // Recreate immediately: the invariant is "exactly one building
        // collection per active group", never zero.
        self.get_active(group_id)?;
        Ok(true)
    }

    /// Sweep every listed group. Returns the number of collections expired.
    pub fn sweep_expired(
        &self,
        group_ids: impl IntoIterator<Item = GroupId>,
        collection_ttl: Duration,
    ) -> Result<u32> {
        let mut expired_count = 0;
        for group_id in group_ids {
            if self.sweep_expired_for_group(group_id, collection_ttl)? {
                expired_count += 1;
            }
        }
        Ok(expired_count)
    }
}
