//! Configuration for the orchestration core.
//!
//! Two layers, per spec §4.2 step 4 and §9 "Global mutable state":
//!
//! - [`CasterConfig`] — bootstrap-time values (queue capacity, TTLs,
//!   per-stage deadlines) loaded from a `caster.toml` file with built-in
//!   defaults, mirroring the teacher's `.shipper.toml` merge-with-defaults
//!   pattern. These are not expected to change without a restart.
//! - [`ReviewConfig`] / [`ConfigStore`] — the runtime-tunable thresholds and
//!   worker count of spec §4.2, read through the fast store's
//!   `reviewer:config` key so changes "take effect on the next request"
//!   without a restart. Deliberately not cached: a 1-request staleness
//!   window is acceptable per spec §9.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use caster_store::FastStore;
use serde::{Deserialize, Serialize};

/// Default bootstrap config file name.
pub const CONFIG_FILE: &str = "caster.toml";

/// Fast-store key for the runtime-tunable review config blob (spec §6.2).
pub const REVIEWER_CONFIG_KEY: &str = "reviewer:config";

/// Bootstrap-time configuration, loaded once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CasterConfig {
    pub review: ReviewBootstrap,
    pub dedup: DedupBootstrap,
    pub collections: CollectionBootstrap,
    pub cadence: CadenceBootstrap,
    pub locks: LockBootstrap,
    pub pipeline: PipelineBootstrap,
}

impl Default for CasterConfig {
    fn default() -> Self {
        Self {
            review: ReviewBootstrap::default(),
            dedup: DedupBootstrap::default(),
            collections: CollectionBootstrap::default(),
            cadence: CadenceBootstrap::default(),
            locks: LockBootstrap::default(),
            pipeline: PipelineBootstrap::default(),
        }
    }
}

impl CasterConfig {
    /// Load from `path`, falling back to built-in defaults for any field
    /// the file omits. A missing file is not an error — it just means
    /// "use the defaults", matching the teacher's `load_config`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn load_or_default(dir: &Path) -> Result<Self> {
        Self::load(&dir.join(CONFIG_FILE))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewBootstrap {
    /// Default worker count if the runtime config store has none set yet.
    pub worker_count: u32,
    pub queue_capacity: usize,
    #[serde(with = "caster_duration")]
    pub light_soft_timeout: Duration,
    #[serde(with = "caster_duration")]
    pub light_hard_timeout: Duration,
    #[serde(with = "caster_duration")]
    pub heavy_soft_timeout: Duration,
    #[serde(with = "caster_duration")]
    pub heavy_hard_timeout: Duration,
    #[serde(with = "caster_duration")]
    pub pause_poll_interval: Duration,
}

impl Default for ReviewBootstrap {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            light_soft_timeout: Duration::from_millis(500),
            light_hard_timeout: Duration::from_secs(3),
            heavy_soft_timeout: Duration::from_secs(5),
            heavy_hard_timeout: Duration::from_secs(30),
            pause_poll_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupBootstrap {
    #[serde(with = "caster_duration")]
    pub ttl: Duration,
}

impl Default for DedupBootstrap {
    fn default() -> Self {
        Self {
            ttl: caster_dedup_default_ttl(),
        }
    }
}

fn caster_dedup_default_ttl() -> Duration {
    Duration::from_secs(2_592_000)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionBootstrap {
    pub min_articles: u32,
    #[serde(with = "caster_duration")]
    pub staleness_max: Duration,
    #[serde(with = "caster_duration")]
    pub collection_ttl: Duration,
}

impl Default for CollectionBootstrap {
    fn default() -> Self {
        Self {
            min_articles: 3,
            staleness_max: Duration::from_secs(72 * 3600),
            collection_ttl: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceBootstrap {
    #[serde(with = "caster_duration")]
    pub tick_interval: Duration,
}

impl Default for CadenceBootstrap {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2 * 3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockBootstrap {
    #[serde(with = "caster_duration")]
    pub generation_lock_ttl: Duration,
    #[serde(with = "caster_duration")]
    pub production_lock_ttl: Duration,
    #[serde(with = "caster_duration")]
    pub manual_production_lock_ttl: Duration,
}

impl Default for LockBootstrap {
    fn default() -> Self {
        Self {
            generation_lock_ttl: Duration::from_secs(3_600),
            production_lock_ttl: Duration::from_secs(7_200),
            manual_production_lock_ttl: Duration::from_secs(86_400),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineBootstrap {
    #[serde(with = "caster_duration")]
    pub script_soft: Duration,
    #[serde(with = "caster_duration")]
    pub script_hard: Duration,
    #[serde(with = "caster_duration")]
    pub edit_soft: Duration,
    #[serde(with = "caster_duration")]
    pub edit_hard: Duration,
    #[serde(with = "caster_duration")]
    pub tts_soft: Duration,
    #[serde(with = "caster_duration")]
    pub tts_hard: Duration,
}

impl Default for PipelineBootstrap {
    fn default() -> Self {
        Self {
            script_soft: Duration::from_secs(120),
            script_hard: Duration::from_secs(180),
            edit_soft: Duration::from_secs(60),
            edit_hard: Duration::from_secs(120),
            tts_soft: Duration::from_secs(600),
            tts_hard: Duration::from_secs(1_800),
        }
    }
}

/// Runtime-tunable review thresholds and worker count (spec §4.2 step 4,
/// §6.3 "Mutation of config values ... is permitted").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub light_threshold: f64,
    pub heavy_threshold: f64,
    pub worker_count: u32,
    pub min_articles: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            light_threshold: 0.4,
            heavy_threshold: 0.7,
            worker_count: 4,
            min_articles: 3,
        }
    }
}

/// Typed accessor over the fast store's `reviewer:config` key. Intentionally
/// uncached: every read goes to the store, accepting the 1-request
/// staleness window spec §9 allows.
pub struct ConfigStore<'a> {
    store: &'a dyn FastStore,
}

impl<'a> ConfigStore<'a> {
    pub fn new(store: &'a dyn FastStore) -> Self {
        Self { store }
    }

    pub fn get(&self) -> Result<ReviewConfig> {
        match self.store.get(REVIEWER_CONFIG_KEY)? {
            Some(raw) => {
                serde_json::from_str(&raw).context("deserialize reviewer:config blob")
            }
            None => Ok(ReviewConfig::default()),
        }
    }

    fn put(&self, config: &ReviewConfig) -> Result<()> {
        let raw = serde_json::to_string(config).context("serialize reviewer:config blob")?;
        // Config is not TTL'd; use a TTL long enough to be effectively
        // permanent and refreshed on every write.
        self.store.set(REVIEWER_CONFIG_KEY, &raw, Duration::from_secs(u32::MAX as u64))
    }

    pub fn set_light_threshold(&self, value: f64) -> Result<()> {
        let mut config = self.get()?;
        config.light_threshold = value;
        self.put(&config)
    }

    pub fn set_heavy_threshold(&self, value: f64) -> Result<()> {
        let mut config = self.get()?;
        config.heavy_threshold = value;
        self.put(&config)
    }

    pub fn set_worker_count(&self, value: u32) -> Result<()> {
        let mut config = self.get()?;
        config.worker_count = value;
        self.put(&config)
    }

    pub fn set_min_articles(&self, value: u32) -> Result<()> {
        let mut config = self.get()?;
        config.min_articles = value;
        self.put(&config)
    }
}

#[cfg(test)]
mod tests {
    use caster_store::InMemoryFastStore;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn load_or_default_without_file_uses_builtin_defaults() {
        let dir = tempdir().unwrap();
        let config = CasterConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.review.worker_count, 4);
        assert_eq!(config.collections.min_articles, 3);
    }

    #[test]
    fn load_parses_partial_toml_and_fills_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[review]\nworker_count = 8\n",
        )
        .unwrap();

        let config = CasterConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.review.worker_count, 8);
        assert_eq!(config.review.queue_capacity, 1024); // default filled in
    }

    #[test]
    fn config_store_round_trips_and_defaults_when_unset() {
        let store = InMemoryFastStore::new();
        let config_store = ConfigStore::new(&store);

        let initial = config_store.get().unwrap();
        assert_eq!(initial.light_threshold, 0.4);

        config_store.set_light_threshold(0.55).unwrap();
        config_store.set_worker_count(6).unwrap();

        let updated = config_store.get().unwrap();
        assert_eq!(updated.light_threshold, 0.55);
        assert_eq!(updated.worker_count, 6);
        assert_eq!(updated.heavy_threshold, 0.7); // untouched field preserved
    }
}
