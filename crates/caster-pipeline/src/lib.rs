//! Episode generation pipeline (spec C6 / §4.6).
//!
//! Drives one [`caster_types::Episode`] through `draft -> scripted -> edited
//! -> voiced -> published`, calling out to four HTTP collaborators (Writer,
//! Editor, TTS, Publisher) in the same `reqwest::blocking` style as
//! `caster-review`'s reviewer clients. Non-overlap and the production pause
//! are enforced the same way C2/C4 do: typed wrappers over `caster-locks`,
//! never an in-process mutex.

mod script_cleaner;

pub use script_cleaner::clean_script;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use caster_collections::{CollectionManager, SnapshotOutcome};
use caster_locks::{GroupLock, ProductionLock};
use caster_retry::{TRANSIENT_RETRY, delay_for_attempt};
use caster_store::{DurableStore, FastStore};
use caster_types::{
    ArticleSummary, AudioFile, EditContext, EditRequest, EditResponse, Episode, EpisodeId,
    EpisodeMetadata, EpisodeStatus, GroupId, MetadataRequest, MetadataResponse, PublishRequest,
    PublishResponse, ScriptRequest, ScriptResponse, SynthesizeRequest, SynthesizeResponse,
};
use thiserror::Error;
use tracing::{info, warn};

/// Failure shape reported by a collaborator client, mirroring
/// `caster_review::ReviewCallError` (spec §7's `Transient`/other split).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    Timeout,
    Transient(String),
    Permanent(String),
}

impl std::fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollaboratorError::Timeout => write!(f, "timeout"),
            CollaboratorError::Transient(msg) => write!(f, "transient: {msg}"),
            CollaboratorError::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

/// `POST /script` capability (spec §6.1).
pub trait WriterClient: Send + Sync {
    fn script(&self, request: &ScriptRequest) -> Result<ScriptResponse, CollaboratorError>;
    fn metadata(&self, request: &MetadataRequest) -> Result<MetadataResponse, CollaboratorError>;
}

/// `POST /edit` capability.
pub trait EditorClient: Send + Sync {
    fn edit(&self, request: &EditRequest) -> Result<EditResponse, CollaboratorError>;
}

/// `POST /synthesize` capability.
pub trait TtsClient: Send + Sync {
    fn synthesize(&self, request: &SynthesizeRequest) -> Result<SynthesizeResponse, CollaboratorError>;
}

/// `POST /publish` capability.
pub trait PublisherClient: Send + Sync {
    fn publish(&self, request: &PublishRequest) -> Result<PublishResponse, CollaboratorError>;
}

fn classify_transport_error(err: &reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout
    } else {
        CollaboratorError::Transient(err.to_string())
    }
}

fn classify_response(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, CollaboratorError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(CollaboratorError::Transient(format!("status {status}")));
    }
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(CollaboratorError::Permanent(format!("status {status}: {body}")));
    }
    Ok(response)
}

/// Blocking HTTP client for the Writer collaborator (scripts + metadata).
pub struct HttpWriterClient {
    client: reqwest::blocking::Client,
    script_endpoint: String,
    metadata_endpoint: String,
}

impl HttpWriterClient {
    pub fn new(
        script_endpoint: impl Into<String>,
        metadata_endpoint: impl Into<String>,
        hard_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(hard_timeout)
            .build()
            .context("failed to build writer HTTP client")?;
        Ok(Self {
            client,
            script_endpoint: script_endpoint.into(),
            metadata_endpoint: metadata_endpoint.into(),
        })
    }
}

impl WriterClient for HttpWriterClient {
    fn script(&self, request: &ScriptRequest) -> Result<ScriptResponse, CollaboratorError> {
        let response = self
            .client
            .post(&self.script_endpoint)
            .json(request)
            .send()
            .map_err(|err| classify_transport_error(&err))?;
        classify_response(response)?
            .json::<ScriptResponse>()
            .map_err(|err| CollaboratorError::Permanent(format!("malformed script response: {err}")))
    }

    fn metadata(&self, request: &MetadataRequest) -> Result<MetadataResponse, CollaboratorError> {
        let response = self
            .client
            .post(&self.metadata_endpoint)
            .json(request)
            .send()
            .map_err(|err| classify_transport_error(&err))?;
        classify_response(response)?
            .json::<MetadataResponse>()
            .map_err(|err| CollaboratorError::Permanent(format!("malformed metadata response: {err}")))
    }
}

/// Blocking HTTP client for the Editor collaborator.
pub struct HttpEditorClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpEditorClient {
    pub fn new(endpoint: impl Into<String>, hard_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(hard_timeout)
            .build()
            .context("failed to build editor HTTP client")?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

impl EditorClient for HttpEditorClient {
    fn edit(&self, request: &EditRequest) -> Result<EditResponse, CollaboratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(|err| classify_transport_error(&err))?;
        classify_response(response)?
            .json::<EditResponse>()
            .map_err(|err| CollaboratorError::Permanent(format!("malformed edit response: {err}")))
    }
}

/// Blocking HTTP client for the TTS collaborator.
pub struct HttpTtsClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpTtsClient {
    pub fn new(endpoint: impl Into<String>, hard_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(hard_timeout)
            .build()
            .context("failed to build tts HTTP client")?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

impl TtsClient for HttpTtsClient {
    fn synthesize(&self, request: &SynthesizeRequest) -> Result<SynthesizeResponse, CollaboratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(|err| classify_transport_error(&err))?;
        classify_response(response)?
            .json::<SynthesizeResponse>()
            .map_err(|err| CollaboratorError::Permanent(format!("malformed synthesize response: {err}")))
    }
}

/// Blocking HTTP client for the Publisher collaborator.
pub struct HttpPublisherClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpPublisherClient {
    pub fn new(endpoint: impl Into<String>, hard_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(hard_timeout)
            .build()
            .context("failed to build publisher HTTP client")?;
        Ok(Self { client, endpoint: endpoint.into() })
    }
}

impl PublisherClient for HttpPublisherClient {
    fn publish(&self, request: &PublishRequest) -> Result<PublishResponse, CollaboratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(|err| classify_transport_error(&err))?;
        classify_response(response)?
            .json::<PublishResponse>()
            .map_err(|err| CollaboratorError::Permanent(format!("malformed publish response: {err}")))
    }
}

/// One retry after the spec §7 `Transient` backoff; permanent failures and
/// exhausted retries surface the last error immediately.
fn call_with_retry<T>(
    mut attempt: impl FnMut() -> Result<T, CollaboratorError>,
) -> Result<T, CollaboratorError> {
    match attempt() {
        Ok(value) => Ok(value),
        Err(CollaboratorError::Permanent(reason)) => Err(CollaboratorError::Permanent(reason)),
        Err(_transient_or_timeout) => {
            std::thread::sleep(delay_for_attempt(&TRANSIENT_RETRY, 1));
            attempt()
        }
    }
}

fn log_if_over_soft_deadline(stage: &str, started: Instant, soft_deadline: Duration) {
    let elapsed = started.elapsed();
    if elapsed > soft_deadline {
        warn!(stage, elapsed_ms = elapsed.as_millis(), soft_deadline_ms = soft_deadline.as_millis(), "pipeline stage exceeded soft deadline");
    }
}

/// Precondition failures raised before any `Episode` row exists (spec §4.6
/// preconditions 1-4). Once S1 has created the row, every further failure is
/// recorded on the row itself via [`Episode::fail`] and `generate` still
/// returns `Ok(episode_id)` — the caller reads `failure_reason` off the row.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("generation lock already held for group {0}")]
    LockHeld(GroupId),
    #[error("group {0} not found or not active")]
    InvalidGroup(GroupId),
    #[error("insufficient content: need {min_articles}, have {actual}")]
    InsufficientContent { min_articles: u32, actual: usize },
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

/// RAII "finally block" for spec §4.5/§4.6: on every exit path (including an
/// early `?` return or a panic unwind) releases the group's generation lock
/// and clears the production lock unless it is a manual admin pause.
struct PipelineGuard<'a> {
    fast: &'a dyn FastStore,
    group_id: GroupId,
}

impl<'a> PipelineGuard<'a> {
    fn new(fast: &'a dyn FastStore, group_id: GroupId) -> Self {
        Self { fast, group_id }
    }
}

impl Drop for PipelineGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = GroupLock::release(self.fast, self.group_id) {
            warn!(error = %err, group_id = %self.group_id, "failed to release group lock");
        }
        if let Err(err) = ProductionLock::clear_if_not_manual(self.fast) {
            warn!(error = %err, "failed to clear production lock");
        }
    }
}

/// Owns the four collaborator clients and drives one episode's state machine
/// end to end (spec C6).
pub struct EpisodePipeline {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    collections: Arc<CollectionManager>,
    writer: Arc<dyn WriterClient>,
    editor: Arc<dyn EditorClient>,
    tts: Arc<dyn TtsClient>,
    publisher: Arc<dyn PublisherClient>,
    generation_lock_ttl: Duration,
    production_lock_ttl: Duration,
    script_soft: Duration,
    edit_soft: Duration,
    tts_soft: Duration,
    publish_platforms: Vec<String>,
}

impl EpisodePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        collections: Arc<CollectionManager>,
        writer: Arc<dyn WriterClient>,
        editor: Arc<dyn EditorClient>,
        tts: Arc<dyn TtsClient>,
        publisher: Arc<dyn PublisherClient>,
        publish_platforms: Vec<String>,
    ) -> Self {
        Self {
            fast,
            durable,
            collections,
            writer,
            editor,
            tts,
            publisher,
            generation_lock_ttl: caster_locks::DEFAULT_GENERATION_LOCK_TTL,
            production_lock_ttl: caster_locks::DEFAULT_PRODUCTION_LOCK_TTL,
            script_soft: Duration::from_secs(120),
            edit_soft: Duration::from_secs(60),
            tts_soft: Duration::from_secs(600),
            publish_platforms,
        }
    }

    pub fn with_deadlines(mut self, script_soft: Duration, edit_soft: Duration, tts_soft: Duration) -> Self {
        self.script_soft = script_soft;
        self.edit_soft = edit_soft;
        self.tts_soft = tts_soft;
        self
    }

    pub fn with_lock_ttls(mut self, generation_lock_ttl: Duration, production_lock_ttl: Duration) -> Self {
        self.generation_lock_ttl = generation_lock_ttl;
        self.production_lock_ttl = production_lock_ttl;
        self
    }

    /// Run the full `draft -> ... -> published|voiced` pipeline for one
    /// group (spec §4.6). `Ok(episode_id)` is returned for every outcome
    /// from S1 onward, including stage failures recorded as
    /// `episode.failure_reason` — only the four true preconditions surface
    /// as `Err`.
    pub fn generate(&self, group_id: GroupId) -> Result<EpisodeId, PipelineError> {
        let Some(group) = self.durable.get_group(group_id)? else {
            return Err(PipelineError::InvalidGroup(group_id));
        };
        if !group.active {
            return Err(PipelineError::InvalidGroup(group_id));
        }

        if !GroupLock::try_acquire(self.fast.as_ref(), group_id, self.generation_lock_ttl)? {
            return Err(PipelineError::LockHeld(group_id));
        }
        let _guard = PipelineGuard::new(self.fast.as_ref(), group_id);

        let active = self.collections.get_active(group_id)?;
        if active.article_ids.len() < group.min_articles as usize {
            return Err(PipelineError::InsufficientContent {
                min_articles: group.min_articles,
                actual: active.article_ids.len(),
            });
        }

        // S1: draft the episode row and snapshot the active collection.
        let mut episode = Episode::new(group_id);
        self.durable.insert_episode(episode.clone())?;
        ProductionLock::set(self.fast.as_ref(), group_id, episode.id, self.production_lock_ttl)?;

        let snapshot = match self.collections.snapshot(group_id, episode.id, group.min_articles)? {
            SnapshotOutcome::Created(snapshot) => snapshot,
            SnapshotOutcome::InsufficientContent { min_articles, actual } => {
                episode.fail(format!("insufficient-content: need {min_articles}, have {actual}"));
                self.durable.update_episode(episode.clone())?;
                return Ok(episode.id);
            }
        };
        episode.snapshot_collection_id = Some(snapshot.id);
        self.durable.update_episode(episode.clone())?;

        let articles = self.durable.articles_in_collection(snapshot.id)?;
        let article_summaries: Vec<ArticleSummary> = articles
            .iter()
            .map(|a| ArticleSummary {
                id: a.id,
                title: a.title.clone(),
                summary: a.summary.clone(),
                body: a.body.clone(),
            })
            .collect();
        let presenters: Vec<String> = group.presenter_ids.iter().map(|p| p.to_string()).collect();

        // S2: script generation.
        let script_request = ScriptRequest {
            snapshot_id: snapshot.id,
            articles: article_summaries,
            presenters: presenters.clone(),
            writer_profile: group.writer_id.to_string(),
            target_minutes: group.target_minutes,
        };
        let started = Instant::now();
        let script = match call_with_retry(|| self.writer.script(&script_request)) {
            Ok(resp) => clean_script(&resp.script),
            Err(err) => {
                episode.fail(format!("writer-{err}"));
                self.durable.update_episode(episode.clone())?;
                return Ok(episode.id);
            }
        };
        log_if_over_soft_deadline("script", started, self.script_soft);
        episode.script = Some(script.clone());
        episode.transition(EpisodeStatus::Scripted);
        self.durable.update_episode(episode.clone())?;

        // S3: edit pass, with a degraded fallback to the unedited script if
        // the editor is unavailable (spec §4.6 S3).
        let edit_request = EditRequest {
            script: script.clone(),
            context: EditContext {
                group_name: group.name.clone(),
                target_minutes: group.target_minutes,
            },
        };
        let started = Instant::now();
        let (edited_script, degraded_editor) = match call_with_retry(|| self.editor.edit(&edit_request)) {
            Ok(EditResponse { edited_script, .. }) => (clean_script(&edited_script), false),
            Err(err) => {
                warn!(%group_id, error = %err, "editor unavailable, falling back to unedited script");
                (script.clone(), true)
            }
        };
        log_if_over_soft_deadline("edit", started, self.edit_soft);
        episode.edited_script = Some(edited_script.clone());
        episode.degraded_editor = degraded_editor;
        episode.transition(EpisodeStatus::Edited);
        self.durable.update_episode(episode.clone())?;

        // S4: best-effort metadata, never fatal (spec §4.6 S4).
        let metadata_request = MetadataRequest {
            episode_id: episode.id,
            script: edited_script.clone(),
        };
        let metadata = match call_with_retry(|| self.writer.metadata(&metadata_request)) {
            Ok(MetadataResponse { title, description, tags }) => EpisodeMetadata { title, description, tags },
            Err(err) => {
                warn!(%group_id, error = %err, "metadata generation unavailable, synthesizing fallback");
                EpisodeMetadata {
                    title: group.name.clone(),
                    description: edited_script.chars().take(280).collect(),
                    tags: group.category_tags.iter().cloned().collect(),
                }
            }
        };
        episode.metadata = Some(metadata.clone());
        self.durable.update_episode(episode.clone())?;

        // S5: TTS synthesis.
        let voice_map = presenters
            .iter()
            .enumerate()
            .map(|(idx, presenter)| ((idx + 1).to_string(), presenter.clone()))
            .collect();
        let synth_request = SynthesizeRequest {
            episode_id: episode.id,
            script: edited_script.clone(),
            voice_map,
        };
        let started = Instant::now();
        let synth = match call_with_retry(|| self.tts.synthesize(&synth_request)) {
            Ok(resp) => resp,
            Err(err) => {
                episode.fail(format!("tts-{err}"));
                self.durable.update_episode(episode.clone())?;
                return Ok(episode.id);
            }
        };
        log_if_over_soft_deadline("tts", started, self.tts_soft);

        let audio = AudioFile {
            id: Default::default(),
            episode_id: episode.id,
            storage_path: synth.audio_url.clone(),
            duration_seconds: synth.duration_seconds,
            byte_size: synth.byte_size,
            format: synth.format,
        };
        self.durable.insert_audio_file(audio)?;
        episode.transition(EpisodeStatus::Voiced);
        self.durable.update_episode(episode.clone())?;

        // S6: publish. An empty result set is retriable, not a failure — the
        // episode stays `voiced`. An explicit publish error is terminal
        // (spec §4.6 S6).
        let publish_request = PublishRequest {
            episode_id: episode.id,
            audio_url: synth.audio_url,
            metadata,
            platforms: self.publish_platforms.clone(),
        };
        match call_with_retry(|| self.publisher.publish(&publish_request)) {
            Ok(PublishResponse { results }) => {
                let urls: Vec<String> = results.iter().filter_map(|r| r.url.clone()).collect();
                if urls.is_empty() {
                    warn!(%group_id, episode_id = %episode.id, "publish returned no urls, episode stays voiced");
                } else {
                    episode.publish_urls = urls;
                    episode.transition(EpisodeStatus::Published);
                    info!(%group_id, episode_id = %episode.id, "episode published");
                }
            }
            Err(err) => {
                episode.fail(format!("publish-{err}"));
            }
        }
        self.durable.update_episode(episode.clone())?;

        Ok(episode.id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use caster_store::{InMemoryDurableStore, InMemoryFastStore};
    use caster_types::{Article, ArticleId, FeedId, PodcastGroup, PublishResult, ReviewState};
    use chrono::Utc;

    use super::*;

    struct FakeWriter {
        script: Result<ScriptResponse, CollaboratorError>,
        metadata: Result<MetadataResponse, CollaboratorError>,
    }

    impl WriterClient for FakeWriter {
        fn script(&self, _request: &ScriptRequest) -> Result<ScriptResponse, CollaboratorError> {
            self.script.clone()
        }
        fn metadata(&self, _request: &MetadataRequest) -> Result<MetadataResponse, CollaboratorError> {
            self.metadata.clone()
        }
    }

    struct FakeEditor {
        response: Result<EditResponse, CollaboratorError>,
    }

    impl EditorClient for FakeEditor {
        fn edit(&self, _request: &EditRequest) -> Result<EditResponse, CollaboratorError> {
            self.response.clone()
        }
    }

    struct FakeTts {
        response: Result<SynthesizeResponse, CollaboratorError>,
    }

    impl TtsClient for FakeTts {
        fn synthesize(&self, _request: &SynthesizeRequest) -> Result<SynthesizeResponse, CollaboratorError> {
            self.response.clone()
        }
    }

    struct FakePublisher {
        response: Mutex<Result<PublishResponse, CollaboratorError>>,
    }

    impl PublisherClient for FakePublisher {
        fn publish(&self, _request: &PublishRequest) -> Result<PublishResponse, CollaboratorError> {
            self.response.lock().unwrap().clone()
        }
    }

    fn sample_script_response() -> Result<ScriptResponse, CollaboratorError> {
        Ok(ScriptResponse { script: "Speaker 1: hello world".into() })
    }

    fn sample_metadata_response() -> Result<MetadataResponse, CollaboratorError> {
        Ok(MetadataResponse {
            title: "Title".into(),
            description: "Desc".into(),
            tags: vec!["news".into()],
        })
    }

    fn sample_edit_response() -> Result<EditResponse, CollaboratorError> {
        Ok(EditResponse { edited_script: "Speaker 1: hello edited world".into(), notes: None })
    }

    fn sample_synth_response() -> Result<SynthesizeResponse, CollaboratorError> {
        Ok(SynthesizeResponse {
            audio_url: "https://cdn.example.com/ep.mp3".into(),
            duration_seconds: 120.0,
            byte_size: 4096,
            format: "mp3".into(),
        })
    }

    fn sample_publish_response(with_url: bool) -> Result<PublishResponse, CollaboratorError> {
        Ok(PublishResponse {
            results: vec![PublishResult {
                platform: "spotify".into(),
                url: if with_url { Some("https://open.spotify.com/ep".into()) } else { None },
                error: if with_url { None } else { Some("rejected".into()) },
            }],
        })
    }

    struct Harness {
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        collections: Arc<CollectionManager>,
        group_id: GroupId,
    }

    fn setup(min_articles: u32, article_count: usize) -> Harness {
        let fast: Arc<dyn FastStore> = Arc::new(InMemoryFastStore::new());
        let durable: Arc<dyn DurableStore> = Arc::new(InMemoryDurableStore::new());
        let collections = Arc::new(CollectionManager::new(durable.clone()));

        let mut group = PodcastGroup::default();
        group.min_articles = min_articles;
        let group_id = group.id;
        durable.insert_group(group).unwrap();

        for _ in 0..article_count {
            let article = Article {
                id: ArticleId::new(),
                source_feed_id: FeedId::new(),
                canonical_link: "https://example.com".into(),
                title: "t".into(),
                body: "b".into(),
                publish_time: Utc::now(),
                ingest_time: Utc::now(),
                fingerprint: "fp".into(),
                review_state: ReviewState::Light,
                tags: Default::default(),
                summary: "s".into(),
                confidence: 0.9,
                reviewing_model: Some("light".into()),
                collection_id: None,
                degraded: false,
                rejection_reason: None,
            };
            let article_id = article.id;
            durable.insert_article(article).unwrap();
            collections.assign(article_id, &[group_id]).unwrap();
        }

        Harness { fast, durable, collections, group_id }
    }

    fn pipeline(
        harness: &Harness,
        writer: FakeWriter,
        editor: FakeEditor,
        tts: FakeTts,
        publisher: FakePublisher,
    ) -> EpisodePipeline {
        EpisodePipeline::new(
            harness.fast.clone(),
            harness.durable.clone(),
            harness.collections.clone(),
            Arc::new(writer),
            Arc::new(editor),
            Arc::new(tts),
            Arc::new(publisher),
            vec!["spotify".into()],
        )
    }

    #[test]
    fn happy_path_reaches_published() {
        let harness = setup(3, 3);
        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(sample_publish_response(true)) },
        );

        let episode_id = pipe.generate(harness.group_id).unwrap();
        let episode = harness.durable.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Published);
        assert!(!episode.publish_urls.is_empty());
        assert!(!GroupLock::is_held(harness.fast.as_ref(), harness.group_id).unwrap());
        assert!(!ProductionLock::is_set(harness.fast.as_ref()).unwrap());
    }

    #[test]
    fn insufficient_content_is_a_precondition_error_before_any_episode_row() {
        let harness = setup(5, 2);
        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(sample_publish_response(true)) },
        );

        let err = pipe.generate(harness.group_id).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientContent { .. }));
    }

    #[test]
    fn lock_held_precondition_is_surfaced_and_guard_still_releases_nothing_extra() {
        let harness = setup(3, 3);
        GroupLock::try_acquire(harness.fast.as_ref(), harness.group_id, Duration::from_secs(60)).unwrap();

        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(sample_publish_response(true)) },
        );

        let err = pipe.generate(harness.group_id).unwrap_err();
        assert!(matches!(err, PipelineError::LockHeld(_)));
    }

    #[test]
    fn writer_failure_fails_the_episode_row_with_reason() {
        let harness = setup(3, 3);
        let pipe = pipeline(
            &harness,
            FakeWriter {
                script: Err(CollaboratorError::Permanent("writer down".into())),
                metadata: sample_metadata_response(),
            },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(sample_publish_response(true)) },
        );

        let episode_id = pipe.generate(harness.group_id).unwrap();
        let episode = harness.durable.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Failed);
        assert!(episode.failure_reason.unwrap().starts_with("writer-"));
        assert!(!GroupLock::is_held(harness.fast.as_ref(), harness.group_id).unwrap());
    }

    #[test]
    fn editor_failure_degrades_to_unedited_script_and_continues() {
        let harness = setup(3, 3);
        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: Err(CollaboratorError::Timeout) },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(sample_publish_response(true)) },
        );

        let episode_id = pipe.generate(harness.group_id).unwrap();
        let episode = harness.durable.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Published);
        assert!(episode.degraded_editor);
        assert_eq!(episode.edited_script, episode.script);
    }

    #[test]
    fn tts_failure_fails_the_episode_row() {
        let harness = setup(3, 3);
        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: Err(CollaboratorError::Permanent("tts down".into())) },
            FakePublisher { response: Mutex::new(sample_publish_response(true)) },
        );

        let episode_id = pipe.generate(harness.group_id).unwrap();
        let episode = harness.durable.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Failed);
        assert!(episode.failure_reason.unwrap().starts_with("tts-"));
    }

    #[test]
    fn publish_returning_no_urls_stays_voiced_not_failed() {
        let harness = setup(3, 3);
        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(sample_publish_response(false)) },
        );

        let episode_id = pipe.generate(harness.group_id).unwrap();
        let episode = harness.durable.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Voiced);
        assert!(episode.publish_urls.is_empty());
    }

    #[test]
    fn explicit_publish_error_fails_the_episode_row() {
        let harness = setup(3, 3);
        let pipe = pipeline(
            &harness,
            FakeWriter { script: sample_script_response(), metadata: sample_metadata_response() },
            FakeEditor { response: sample_edit_response() },
            FakeTts { response: sample_synth_response() },
            FakePublisher { response: Mutex::new(Err(CollaboratorError::Permanent("platform rejected".into()))) },
        );

        let episode_id = pipe.generate(harness.group_id).unwrap();
        let episode = harness.durable.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(episode.status, EpisodeStatus::Failed);
        assert!(episode.failure_reason.unwrap().starts_with("publish-"));
    }
}
