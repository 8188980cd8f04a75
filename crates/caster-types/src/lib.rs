//! Core domain types for the podcast orchestration core.
//!
//! Mirrors spec §3 (Data Model) and §6.1 (Collaborator RPCs). Every entity
//! is identified by an opaque 128-bit id (backed by [`uuid::Uuid`]); cross-
//! subsystem references are always by id, never by object pointer, per the
//! "cyclic references" design note in spec §9.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(ArticleId, "Opaque identifier for an [`Article`].");
define_id!(CollectionId, "Opaque identifier for a [`Collection`].");
define_id!(GroupId, "Opaque identifier for a [`PodcastGroup`].");
define_id!(EpisodeId, "Opaque identifier for an [`Episode`].");
define_id!(AudioFileId, "Opaque identifier for an [`AudioFile`].");
define_id!(FeedId, "Opaque identifier for a source RSS feed.");
define_id!(PresenterId, "Opaque identifier for a presenter.");
define_id!(WriterId, "Opaque identifier for a writer.");

/// Review state of an [`Article`]. Once it leaves `Unreviewed` it is
/// terminal for that article (spec §3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Unreviewed,
    Light,
    Heavy,
    Rejected,
}

/// Which reviewer tier produced a [`ReviewResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewTier {
    Light,
    Heavy,
}

/// A reviewed news article, the unit of work flowing through C1 → C2 → C3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub source_feed_id: FeedId,
    pub canonical_link: String,
    pub title: String,
    pub body: String,
    pub publish_time: DateTime<Utc>,
    pub ingest_time: DateTime<Utc>,
    pub fingerprint: String,
    pub review_state: ReviewState,
    /// Lower-case, hyphen-separated, deduplicated, sorted. Cardinality <= 8.
    pub tags: BTreeSet<String>,
    /// <= 500 characters, single paragraph.
    pub summary: String,
    pub confidence: f64,
    pub reviewing_model: Option<String>,
    pub collection_id: Option<CollectionId>,
    /// Set when the heavy reviewer was needed but unavailable and the light
    /// result was kept as a fallback (spec §4.2 step 3).
    pub degraded: bool,
    /// Set for articles marked `rejected`; absent otherwise.
    pub rejection_reason: Option<String>,
}

impl Article {
    /// Byte size of the body, for the oversized-body permanent-failure check
    /// in spec §4.2.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }
}

/// Maximum article body size before it is a permanent (non-retryable)
/// failure, per spec §4.2.
pub const MAX_BODY_BYTES: usize = 512 * 1024;

/// Status of a [`Collection`] across its lifecycle (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    Building,
    Ready,
    Snapshot,
    Expired,
}

/// An append-only, snapshot-on-consume container of articles for one or
/// more [`PodcastGroup`]s (spec §3, §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub id: CollectionId,
    pub name: String,
    pub status: CollectionStatus,
    pub created_at: DateTime<Utc>,
    pub linked_episode_id: Option<EpisodeId>,
    pub parent_collection_id: Option<CollectionId>,
    pub group_ids: BTreeSet<GroupId>,
    pub article_ids: BTreeSet<ArticleId>,
}

impl Collection {
    pub fn is_building(&self) -> bool {
        self.status == CollectionStatus::Building
    }

    pub fn is_snapshot(&self) -> bool {
        self.status == CollectionStatus::Snapshot
    }
}

/// The cadence bucket a group's schedule prefers, or escalates into (spec
/// §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Daily,
    ThreeDay,
    Weekly,
}

impl Bucket {
    /// Target release window for this bucket.
    pub fn window(self) -> Duration {
        match self {
            Bucket::Daily => Duration::from_secs(24 * 3600),
            Bucket::ThreeDay => Duration::from_secs(72 * 3600),
            Bucket::Weekly => Duration::from_secs(168 * 3600),
        }
    }

    /// The next longer bucket to escalate into, per spec §4.4 step 7. Weekly
    /// is the ceiling.
    pub fn escalate(self) -> Bucket {
        match self {
            Bucket::Daily => Bucket::ThreeDay,
            Bucket::ThreeDay => Bucket::Weekly,
            Bucket::Weekly => Bucket::Weekly,
        }
    }

    pub fn is_weekly(self) -> bool {
        matches!(self, Bucket::Weekly)
    }
}

/// A podcast group: one show, one cadence, one active building collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodcastGroup {
    pub id: GroupId,
    pub name: String,
    pub category_tags: BTreeSet<String>,
    /// The group's preferred cadence bucket (spec §9 Open Question: the
    /// schedule field selects a bucket, not a cron expression).
    pub preferred_bucket: Bucket,
    pub min_articles: u32,
    pub presenter_ids: Vec<PresenterId>,
    pub writer_id: WriterId,
    pub target_minutes: u32,
    pub active: bool,
}

impl Default for PodcastGroup {
    fn default() -> Self {
        Self {
            id: GroupId::new(),
            name: String::new(),
            category_tags: BTreeSet::new(),
            preferred_bucket: Bucket::Daily,
            min_articles: 3,
            presenter_ids: Vec::new(),
            writer_id: WriterId::new(),
            target_minutes: 10,
            active: true,
        }
    }
}

/// Episode lifecycle status (spec §3, §4.6). Terminal states are
/// `Published` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Draft,
    Scripted,
    Edited,
    Voiced,
    Published,
    Failed,
}

impl EpisodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EpisodeStatus::Published | EpisodeStatus::Failed)
    }
}

/// Episode metadata produced by S4 (title/description/tags), either from the
/// Writer collaborator or synthesized as a fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// An episode being produced through the C6 state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub group_id: GroupId,
    pub snapshot_collection_id: Option<CollectionId>,
    pub status: EpisodeStatus,
    pub script: Option<String>,
    pub edited_script: Option<String>,
    pub metadata: Option<EpisodeMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    /// `degraded.editor=true` equivalent from spec §4.6 S3.
    pub degraded_editor: bool,
    pub publish_urls: Vec<String>,
    /// Carried forward from the cadence controller's pending-apology flag
    /// (spec §4.4 step 7, §11 supplement) and surfaced in metadata once the
    /// episode completes.
    pub apologized_for_gap: bool,
}

impl Episode {
    pub fn new(group_id: GroupId) -> Self {
        let now = Utc::now();
        Self {
            id: EpisodeId::new(),
            group_id,
            snapshot_collection_id: None,
            status: EpisodeStatus::Draft,
            script: None,
            edited_script: None,
            metadata: None,
            created_at: now,
            updated_at: now,
            failure_reason: None,
            degraded_editor: false,
            publish_urls: Vec::new(),
            apologized_for_gap: false,
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = EpisodeStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    pub fn transition(&mut self, status: EpisodeStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Synthesized audio for a [`Episode`], one-to-one after `voiced`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    pub id: AudioFileId,
    pub episode_id: EpisodeId,
    pub storage_path: String,
    pub duration_seconds: f64,
    pub byte_size: u64,
    pub format: String,
}

/// Error classification for retry/propagation decisions (spec §7). Attached
/// to `anyhow::Error` via `.context(ErrorClass::...)` where a caller needs to
/// branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Contract,
    Precondition,
    ResourceExhaustion,
    Infrastructure,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Contract => "contract",
            ErrorClass::Precondition => "precondition",
            ErrorClass::ResourceExhaustion => "resource-exhaustion",
            ErrorClass::Infrastructure => "infrastructure",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------
// Collaborator RPC payloads (spec §6.1). These are owned by the core; the
// prompt content behind them is not (spec §9).
// ---------------------------------------------------------------------

/// `POST /review` request to the Light or Heavy reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub article_id: ArticleId,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub hints: ReviewHints,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewHints {
    #[serde(default)]
    pub escalate: bool,
}

/// `POST /review` response from either reviewer tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResponse {
    pub tags: Vec<String>,
    pub summary: String,
    pub confidence: f64,
    pub model_id: String,
}

/// Article payload embedded in the Writer's `/script` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: ArticleId,
    pub title: String,
    pub summary: String,
    pub body: String,
}

/// `POST /script` request to the Writer collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub snapshot_id: CollectionId,
    pub articles: Vec<ArticleSummary>,
    pub presenters: Vec<String>,
    pub writer_profile: String,
    pub target_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub script: String,
}

/// `POST /metadata` request to the Writer collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub episode_id: EpisodeId,
    pub script: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataResponse {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// `POST /edit` request to the Editor collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRequest {
    pub script: String,
    pub context: EditContext,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditContext {
    pub group_name: String,
    pub target_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditResponse {
    pub edited_script: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// `POST /synthesize` request to the TTS collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizeRequest {
    pub episode_id: EpisodeId,
    pub script: String,
    /// Speaker-index (as string, e.g. "1") to presenter voice profile id.
    pub voice_map: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizeResponse {
    pub audio_url: String,
    pub duration_seconds: f64,
    pub byte_size: u64,
    pub format: String,
}

/// `POST /publish` request to the Publisher collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub episode_id: EpisodeId,
    pub audio_url: String,
    pub metadata: EpisodeMetadata,
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub results: Vec<PublishResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub platform: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}
