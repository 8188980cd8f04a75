//! The persistent store contract (spec §4.7, §6.2).
//!
//! The orchestration core depends on exactly two kinds of external store,
//! expressed here as traits so no component couples to a specific storage
//! engine:
//!
//! - [`FastStore`] — the fast state store: TTL'd set-if-absent, get/delete,
//!   a TTL'd set for dedup, and a bounded FIFO queue. Backs the dedup
//!   filter, both locks, and the review queue.
//! - [`DurableStore`] — the durable relational store: CRUD plus indexed
//!   lookup by id and by `(group, status)`, and the one place atomicity
//!   across several rows is required — [`DurableStore::snapshot_collection`].
//!
//! Both traits ship an in-memory reference implementation
//! ([`InMemoryFastStore`], [`InMemoryDurableStore`]) used by every other
//! crate's tests and by `caster-cli`'s demo mode.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use caster_types::{
    Article, ArticleId, AudioFile, AudioFileId, Collection, CollectionId, CollectionStatus,
    Episode, EpisodeId, GroupId, PodcastGroup,
};

/// The fast-state store primitives of spec §4.7: `set-if-absent with TTL`,
/// `get`, `delete`, `set-add-if-absent with TTL`, and a bounded FIFO queue.
pub trait FastStore: Send + Sync {
    /// Set `key` to `value` with the given TTL, but only if it is currently
    /// absent or expired. Returns `true` if the write happened, `false` if
    /// an unexpired value already existed.
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Unconditionally overwrite `key`, refreshing its TTL.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<String>>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Insert `member` into the TTL'd set `set_key`, unless it is already
    /// present (and unexpired). Returns `true` if newly inserted.
    fn set_add_if_absent(&self, set_key: &str, member: &str, ttl: Duration) -> Result<bool>;

    /// Push onto the named bounded queue, blocking the caller while it is at
    /// `capacity`. This is the "bounded work channel" backpressure point of
    /// spec §4.2 and §5, implemented through the store rather than an
    /// in-process channel so the core stays multi-process-safe.
    fn queue_push_blocking(&self, queue: &str, value: String, capacity: usize) -> Result<()>;

    /// Pop from the named queue, blocking up to `timeout` for an item to
    /// appear. Returns `None` on timeout.
    fn queue_pop_timeout(&self, queue: &str, timeout: Duration) -> Result<Option<String>>;

    fn queue_len(&self, queue: &str) -> Result<usize>;
}

#[derive(Clone)]
struct TtlEntry {
    value: String,
    expires_at: Instant,
}

impl TtlEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct QueueState {
    items: std::collections::VecDeque<String>,
}

/// In-memory [`FastStore`] used by tests and the CLI demo mode. Not
/// durable across process restarts, matching spec §4.7's note that the
/// core depends only on the primitives, not on any specific engine.
#[derive(Default)]
pub struct InMemoryFastStore {
    entries: Mutex<HashMap<String, TtlEntry>>,
    sets: Mutex<HashMap<String, HashMap<String, Instant>>>,
    queues: Mutex<HashMap<String, QueueState>>,
    queue_cv: Condvar,
}

impl InMemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FastStore for InMemoryFastStore {
    fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("fast store lock poisoned");
        if let Some(existing) = entries.get(key) {
            if existing.is_live(now) {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            TtlEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("fast store lock poisoned");
        entries.insert(
            key.to_string(),
            TtlEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("fast store lock poisoned");
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .expect("fast store lock poisoned")
            .remove(key);
        Ok(())
    }

    fn set_add_if_absent(&self, set_key: &str, member: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut sets = self.sets.lock().expect("fast store lock poisoned");
        let set = sets.entry(set_key.to_string()).or_default();
        if let Some(expires_at) = set.get(member) {
            if now < *expires_at {
                return Ok(false);
            }
        }
        set.insert(member.to_string(), now + ttl);
        Ok(true)
    }

    fn queue_push_blocking(&self, queue: &str, value: String, capacity: usize) -> Result<()> {
        let mut queues = self.queues.lock().expect("fast store lock poisoned");
        loop {
            let state = queues.entry(queue.to_string()).or_default();
            if state.items.len() < capacity {
                state.items.push_back(value);
                self.queue_cv.notify_all();
                return Ok(());
            }
            queues = self
                .queue_cv
                .wait(queues)
                .expect("fast store condvar poisoned");
        }
    }

    fn queue_pop_timeout(&self, queue: &str, timeout: Duration) -> Result<Option<String>> {
        let mut queues = self.queues.lock().expect("fast store lock poisoned");
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(state) = queues.get_mut(queue) {
                if let Some(item) = state.items.pop_front() {
                    self.queue_cv.notify_all();
                    return Ok(Some(item));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _timeout_result) = self
                .queue_cv
                .wait_timeout(queues, deadline - now)
                .expect("fast store condvar poisoned");
            queues = guard;
        }
    }

    fn queue_len(&self, queue: &str) -> Result<usize> {
        let queues = self.queues.lock().expect("fast store lock poisoned");
        Ok(queues.get(queue).map(|s| s.items.len()).unwrap_or(0))
    }
}

/// The durable-store primitives of spec §4.7: transactional multi-row
/// writes, foreign-key integrity, and indexed lookup by id and by
/// `(group, status)`.
pub trait DurableStore: Send + Sync {
    fn insert_group(&self, group: PodcastGroup) -> Result<()>;
    fn get_group(&self, id: GroupId) -> Result<Option<PodcastGroup>>;
    fn update_group(&self, group: PodcastGroup) -> Result<()>;
    fn list_active_groups(&self) -> Result<Vec<PodcastGroup>>;

    fn insert_article(&self, article: Article) -> Result<()>;
    fn get_article(&self, id: ArticleId) -> Result<Option<Article>>;
    fn update_article(&self, article: Article) -> Result<()>;
    fn articles_in_collection(&self, collection_id: CollectionId) -> Result<Vec<Article>>;

    fn insert_collection(&self, collection: Collection) -> Result<()>;
    fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>>;
    fn update_collection(&self, collection: Collection) -> Result<()>;
    /// Indexed lookup by `(group, status)`, per spec §4.7.
    fn collections_by_group_status(
        &self,
        group_id: GroupId,
        status: CollectionStatus,
    ) -> Result<Vec<Collection>>;

    /// Atomically (spec §4.3): rename the active collection to a snapshot,
    /// link it to `episode_id`, and create a successor `building` collection
    /// with the same group assignment. Returns `(snapshot, successor)`. No
    /// partial state is ever observable by other callers.
    fn snapshot_collection(
        &self,
        active_id: CollectionId,
        episode_id: EpisodeId,
        snapshot_name: String,
    ) -> Result<(Collection, Collection)>;

    fn insert_episode(&self, episode: Episode) -> Result<()>;
    fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>>;
    fn update_episode(&self, episode: Episode) -> Result<()>;
    fn episodes_for_group(&self, group_id: GroupId) -> Result<Vec<Episode>>;

    fn insert_audio_file(&self, audio: AudioFile) -> Result<()>;
    fn audio_file_for_episode(&self, episode_id: EpisodeId) -> Result<Option<AudioFile>>;
}

#[derive(Default)]
struct DurableInner {
    groups: BTreeMap<GroupId, PodcastGroup>,
    articles: BTreeMap<ArticleId, Article>,
    collections: BTreeMap<CollectionId, Collection>,
    episodes: BTreeMap<EpisodeId, Episode>,
    audio_files: BTreeMap<AudioFileId, AudioFile>,
}

/// In-memory [`DurableStore`] used by tests and the CLI demo mode.
#[derive(Default)]
pub struct InMemoryDurableStore {
    inner: Mutex<DurableInner>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl DurableStore for InMemoryDurableStore {
    fn insert_group(&self, group: PodcastGroup) -> Result<()> {
        self.inner
            .lock()
            .expect("durable store lock poisoned")
            .groups
            .insert(group.id, group);
        Ok(())
    }

    fn get_group(&self, id: GroupId) -> Result<Option<PodcastGroup>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .groups
            .get(&id)
            .cloned())
    }

    fn update_group(&self, group: PodcastGroup) -> Result<()> {
        self.insert_group(group)
    }

    fn list_active_groups(&self) -> Result<Vec<PodcastGroup>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .groups
            .values()
            .filter(|g| g.active)
            .cloned()
            .collect())
    }

    fn insert_article(&self, article: Article) -> Result<()> {
        self.inner
            .lock()
            .expect("durable store lock poisoned")
            .articles
            .insert(article.id, article);
        Ok(())
    }

    fn get_article(&self, id: ArticleId) -> Result<Option<Article>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .articles
            .get(&id)
            .cloned())
    }

    fn update_article(&self, article: Article) -> Result<()> {
        self.insert_article(article)
    }

    fn articles_in_collection(&self, collection_id: CollectionId) -> Result<Vec<Article>> {
        let inner = self.inner.lock().expect("durable store lock poisoned");
        let Some(collection) = inner.collections.get(&collection_id) else {
            return Ok(Vec::new());
        };
        Ok(collection
            .article_ids
            .iter()
            .filter_map(|id| inner.articles.get(id))
            .cloned()
            .collect())
    }

    fn insert_collection(&self, collection: Collection) -> Result<()> {
        self.inner
            .lock()
            .expect("durable store lock poisoned")
            .collections
            .insert(collection.id, collection);
        Ok(())
    }

    fn get_collection(&self, id: CollectionId) -> Result<Option<Collection>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .collections
            .get(&id)
            .cloned())
    }

    fn update_collection(&self, collection: Collection) -> Result<()> {
        self.insert_collection(collection)
    }

    fn collections_by_group_status(
        &self,
        group_id: GroupId,
        status: CollectionStatus,
    ) -> Result<Vec<Collection>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .collections
            .values()
            .filter(|c| c.status == status && c.group_ids.contains(&group_id))
            .cloned()
            .collect())
    }

    fn snapshot_collection(
        &self,
        active_id: CollectionId,
        episode_id: EpisodeId,
        snapshot_name: String,
    ) -> Result<(Collection, Collection)> {
        let mut inner = self.inner.lock().expect("durable store lock poisoned");

        let Some(active) = inner.collections.get(&active_id).cloned() else {
            bail!("snapshot_collection: collection {active_id} not found");
        };
        if !active.is_building() {
            bail!("snapshot_collection: collection {active_id} is not building");
        }

        let mut snapshot = active;
        snapshot.name = snapshot_name;
        snapshot.status = CollectionStatus::Snapshot;
        snapshot.linked_episode_id = Some(episode_id);

        let successor = Collection {
            id: CollectionId::new(),
            name: format!("{} (active)", snapshot.name),
            status: CollectionStatus::Building,
            created_at: chrono::Utc::now(),
            linked_episode_id: None,
            parent_collection_id: Some(snapshot.id),
            group_ids: snapshot.group_ids.clone(),
            article_ids: Default::default(),
        };

        inner.collections.insert(snapshot.id, snapshot.clone());
        inner.collections.insert(successor.id, successor.clone());

        Ok((snapshot, successor))
    }

    fn insert_episode(&self, episode: Episode) -> Result<()> {
        self.inner
            .lock()
            .expect("durable store lock poisoned")
            .episodes
            .insert(episode.id, episode);
        Ok(())
    }

    fn get_episode(&self, id: EpisodeId) -> Result<Option<Episode>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .episodes
            .get(&id)
            .cloned())
    }

    fn update_episode(&self, episode: Episode) -> Result<()> {
        self.insert_episode(episode)
    }

    fn episodes_for_group(&self, group_id: GroupId) -> Result<Vec<Episode>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .episodes
            .values()
            .filter(|e| e.group_id == group_id)
            .cloned()
            .collect())
    }

    fn insert_audio_file(&self, audio: AudioFile) -> Result<()> {
        self.inner
            .lock()
            .expect("durable store lock poisoned")
            .audio_files
            .insert(audio.id, audio);
        Ok(())
    }

    fn audio_file_for_episode(&self, episode_id: EpisodeId) -> Result<Option<AudioFile>> {
        Ok(self
            .inner
            .lock()
            .expect("durable store lock poisoned")
            .audio_files
            .values()
            .find(|a| a.episode_id == episode_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use caster_types::CollectionId;

    use super::*;

    fn sample_collection(group: GroupId) -> Collection {
        Collection {
            id: CollectionId::new(),
            name: "Active".into(),
            status: CollectionStatus::Building,
            created_at: chrono::Utc::now(),
            linked_episode_id: None,
            parent_collection_id: None,
            group_ids: [group].into_iter().collect(),
            article_ids: Default::default(),
        }
    }

    #[test]
    fn set_if_absent_rejects_second_write_within_ttl() {
        let store = InMemoryFastStore::new();
        assert!(store.set_if_absent("k", "v1", Duration::from_secs(60)).unwrap());
        assert!(!store.set_if_absent("k", "v2", Duration::from_secs(60)).unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn set_if_absent_allows_write_after_ttl_expiry() {
        let store = InMemoryFastStore::new();
        assert!(store.set_if_absent("k", "v1", Duration::from_millis(5)).unwrap());
        thread::sleep(Duration::from_millis(20));
        assert!(store.set_if_absent("k", "v2", Duration::from_secs(60)).unwrap());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
    }

    #[test]
    fn queue_push_blocks_at_capacity_until_pop() {
        let store = Arc::new(InMemoryFastStore::new());
        store.queue_push_blocking("q", "a".into(), 1).unwrap();
        assert_eq!(store.queue_len("q").unwrap(), 1);

        let store2 = store.clone();
        let handle = thread::spawn(move || {
            store2.queue_push_blocking("q", "b".into(), 1).unwrap();
        });

        thread::sleep(Duration::from_millis(30));
        assert_eq!(store.queue_len("q").unwrap(), 1, "second push should still be blocked");

        let popped = store.queue_pop_timeout("q", Duration::from_secs(1)).unwrap();
        assert_eq!(popped.as_deref(), Some("a"));

        handle.join().unwrap();
        assert_eq!(store.queue_len("q").unwrap(), 1);
    }

    #[test]
    fn queue_pop_timeout_returns_none_when_empty() {
        let store = InMemoryFastStore::new();
        let popped = store.queue_pop_timeout("empty", Duration::from_millis(10)).unwrap();
        assert!(popped.is_none());
    }

    #[test]
    fn snapshot_collection_is_atomic_and_creates_successor() {
        let store = InMemoryDurableStore::new();
        let group = GroupId::new();
        let active = sample_collection(group);
        let active_id = active.id;
        store.insert_collection(active).unwrap();

        let episode_id = EpisodeId::new();
        let (snapshot, successor) = store
            .snapshot_collection(active_id, episode_id, "Episode Snapshot".into())
            .unwrap();

        assert_eq!(snapshot.status, CollectionStatus::Snapshot);
        assert_eq!(snapshot.linked_episode_id, Some(episode_id));
        assert_eq!(successor.status, CollectionStatus::Building);
        assert_eq!(successor.parent_collection_id, Some(snapshot.id));
        assert_eq!(successor.group_ids, snapshot.group_ids);
        assert!(successor.article_ids.is_empty());

        let building = store
            .collections_by_group_status(group, CollectionStatus::Building)
            .unwrap();
        assert_eq!(building.len(), 1);
        assert_eq!(building[0].id, successor.id);
    }

    #[test]
    fn snapshot_collection_rejects_non_building_input() {
        let store = InMemoryDurableStore::new();
        let group = GroupId::new();
        let mut c = sample_collection(group);
        c.status = CollectionStatus::Snapshot;
        let id = c.id;
        store.insert_collection(c).unwrap();

        let result = store.snapshot_collection(id, EpisodeId::new(), "X".into());
        assert!(result.is_err());
    }
}
