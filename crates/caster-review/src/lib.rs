//! Two-tier review router (spec C2 / §4.2).
//!
//! Articles flow: bounded queue → light reviewer → (maybe) heavy reviewer →
//! sanitized `ReviewResult` persisted on the `Article` row. Workers are
//! plain OS threads polling a [`FastStore`]-backed queue, not an in-process
//! channel, so the queue stays valid across process boundaries (spec §5).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use caster_config::ConfigStore;
use caster_locks::ProductionLock;
use caster_retry::{TRANSIENT_RETRY, delay_for_attempt};
use caster_store::{DurableStore, FastStore};
use caster_types::{Article, ArticleId, MAX_BODY_BYTES, ReviewRequest, ReviewResponse, ReviewState, ReviewTier};
use tracing::{debug, info, warn};

/// Fast-store key for the bounded review queue (spec §6.2).
pub const QUEUE_KEY: &str = "reviewer:queue";

/// Failure shape a [`ReviewerClient`] reports, distinct enough for the
/// router to apply spec §4.2's "retry once, else surface" policy without
/// string-matching an error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewCallError {
    /// Hit the hard deadline without a response.
    Timeout,
    /// 5xx or a transport error that is plausibly transient.
    Transient(String),
    /// 4xx or a response that failed to parse — retrying would not help.
    Permanent(String),
}

impl std::fmt::Display for ReviewCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReviewCallError::Timeout => write!(f, "timeout"),
            ReviewCallError::Transient(msg) => write!(f, "transient: {msg}"),
            ReviewCallError::Permanent(msg) => write!(f, "permanent: {msg}"),
        }
    }
}

/// A single reviewer tier's capability: `POST /review` (spec §6.1).
pub trait ReviewerClient: Send + Sync {
    fn review(&self, request: &ReviewRequest) -> Result<ReviewResponse, ReviewCallError>;
}

/// Blocking HTTP client for a reviewer collaborator, in the teacher's
/// `reqwest::blocking` style (see `shipper-webhook::send_webhook`).
pub struct HttpReviewerClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpReviewerClient {
    pub fn new(endpoint: impl Into<String>, hard_timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(hard_timeout)
            .build()
            .context("failed to build reviewer HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

impl ReviewerClient for HttpReviewerClient {
    fn review(&self, request: &ReviewRequest) -> Result<ReviewResponse, ReviewCallError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    ReviewCallError::Timeout
                } else {
                    ReviewCallError::Transient(err.to_string())
                }
            })?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ReviewCallError::Transient(format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ReviewCallError::Permanent(format!("status {status}: {body}")));
        }

        response
            .json::<ReviewResponse>()
            .map_err(|err| ReviewCallError::Permanent(format!("malformed response body: {err}")))
    }
}

/// One retry after the spec §7 `Transient` backoff; permanent failures
/// surface immediately.
fn call_with_retry(
    client: &dyn ReviewerClient,
    request: &ReviewRequest,
) -> Result<ReviewResponse, ReviewCallError> {
    match client.review(request) {
        Ok(response) => Ok(response),
        Err(ReviewCallError::Permanent(reason)) => Err(ReviewCallError::Permanent(reason)),
        Err(_transient_or_timeout) => {
            std::thread::sleep(delay_for_attempt(&TRANSIENT_RETRY, 1));
            client.review(request)
        }
    }
}

/// Enforce spec §4.2's tag/summary shape: lower-case hyphenated tags,
/// deduplicated, sorted, capped at 8; summary capped at 500 characters.
fn sanitize(mut tags: Vec<String>, summary: String) -> (Vec<String>, String) {
    for tag in &mut tags {
        *tag = tag.trim().to_lowercase().replace(' ', "-");
    }
    tags.retain(|t| !t.is_empty());
    tags.sort();
    tags.dedup();
    tags.truncate(8);

    let summary = if summary.chars().count() > 500 {
        summary.chars().take(500).collect()
    } else {
        summary
    };

    (tags, summary)
}

/// Outcome of routing a single article through the two reviewer tiers.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
    Accepted {
        tags: Vec<String>,
        summary: String,
        confidence: f64,
        tier: ReviewTier,
        model_id: String,
        degraded: bool,
    },
    Rejected {
        reason: String,
    },
}

/// Thresholds read from [`ConfigStore`] (spec §4.2 step 4).
#[derive(Debug, Clone, Copy)]
pub struct RouteThresholds {
    pub light_threshold: f64,
    #[allow(dead_code)]
    pub heavy_threshold: f64,
}

/// Run the two-tier protocol for one article (spec §4.2 steps 1-3).
/// Pure apart from the two `ReviewerClient` calls — easy to test with fakes.
pub fn route_article(
    light: &dyn ReviewerClient,
    heavy: &dyn ReviewerClient,
    thresholds: RouteThresholds,
    article: &Article,
) -> RouteOutcome {
    if article.body_len() > MAX_BODY_BYTES {
        return RouteOutcome::Rejected {
            reason: format!("body exceeds {MAX_BODY_BYTES} bytes"),
        };
    }

    let request = ReviewRequest {
        article_id: article.id,
        title: article.title.clone(),
        body: article.body.clone(),
        hints: Default::default(),
    };

    let light_result = call_with_retry(light, &request);
    let (light_confidence, light_response) = match &light_result {
        Ok(resp) => (resp.confidence, Some(resp.clone())),
        // Spec §4.2 step 1: a timed-out (or otherwise failed, after retry)
        // light call is treated as confidence = 0, forcing escalation.
        Err(_) => (0.0, None),
    };

    let escalate_hint = request.hints.escalate;
    if light_confidence >= thresholds.light_threshold && !escalate_hint {
        let resp = light_response.expect("light_confidence >= threshold implies a light response");
        let (tags, summary) = sanitize(resp.tags, resp.summary);
        return RouteOutcome::Accepted {
            tags,
            summary,
            confidence: resp.confidence,
            tier: ReviewTier::Light,
            model_id: resp.model_id,
            degraded: false,
        };
    }

    match call_with_retry(heavy, &request) {
        Ok(resp) => {
            let (tags, summary) = sanitize(resp.tags, resp.summary);
            RouteOutcome::Accepted {
                tags,
                summary,
                confidence: resp.confidence,
                tier: ReviewTier::Heavy,
                model_id: resp.model_id,
                degraded: false,
            }
        }
        Err(_) => match light_response {
            Some(resp) => {
                let (tags, summary) = sanitize(resp.tags, resp.summary);
                RouteOutcome::Accepted {
                    tags,
                    summary,
                    confidence: resp.confidence,
                    tier: ReviewTier::Light,
                    model_id: resp.model_id,
                    degraded: true,
                }
            }
            None => RouteOutcome::Accepted {
                tags: Vec::new(),
                summary: String::new(),
                confidence: 0.0,
                tier: ReviewTier::Light,
                model_id: "unavailable".to_string(),
                degraded: true,
            },
        },
    }
}

fn confidence_bucket(confidence: f64) -> usize {
    ((confidence.clamp(0.0, 1.0) * 10.0) as usize).min(9)
}

/// Per-request counters of spec §4.2 "Metrics per request".
#[derive(Default)]
pub struct ReviewMetrics {
    light_accepted: AtomicU64,
    heavy_accepted: AtomicU64,
    degraded: AtomicU64,
    rejected: AtomicU64,
    confidence_buckets: Mutex<[u64; 10]>,
}

impl ReviewMetrics {
    fn record(&self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::Accepted {
                confidence,
                tier,
                degraded,
                ..
            } => {
                match tier {
                    ReviewTier::Light => self.light_accepted.fetch_add(1, Ordering::Relaxed),
                    ReviewTier::Heavy => self.heavy_accepted.fetch_add(1, Ordering::Relaxed),
                };
                if *degraded {
                    self.degraded.fetch_add(1, Ordering::Relaxed);
                }
                let mut buckets = self.confidence_buckets.lock().expect("metrics lock poisoned");
                buckets[confidence_bucket(*confidence)] += 1;
            }
            RouteOutcome::Rejected { .. } => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn light_accepted(&self) -> u64 {
        self.light_accepted.load(Ordering::Relaxed)
    }

    pub fn heavy_accepted(&self) -> u64 {
        self.heavy_accepted.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> u64 {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn confidence_histogram(&self) -> [u64; 10] {
        *self.confidence_buckets.lock().expect("metrics lock poisoned")
    }
}

/// The review router: owns the queue, the two reviewer collaborators, and
/// the worker pool that drains the queue.
pub struct ReviewRouter {
    fast: Arc<dyn FastStore>,
    durable: Arc<dyn DurableStore>,
    light: Arc<dyn ReviewerClient>,
    heavy: Arc<dyn ReviewerClient>,
    pub metrics: Arc<ReviewMetrics>,
    queue_capacity: usize,
}

impl ReviewRouter {
    pub fn new(
        fast: Arc<dyn FastStore>,
        durable: Arc<dyn DurableStore>,
        light: Arc<dyn ReviewerClient>,
        heavy: Arc<dyn ReviewerClient>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            fast,
            durable,
            light,
            heavy,
            metrics: Arc::new(ReviewMetrics::default()),
            queue_capacity,
        }
    }

    /// Enqueue an article for review; blocks the caller if the queue is at
    /// capacity (spec §4.2 "Queueing").
    pub fn submit(&self, article_id: ArticleId) -> Result<()> {
        self.fast
            .queue_push_blocking(QUEUE_KEY, article_id.to_string(), self.queue_capacity)
    }

    pub fn queue_len(&self) -> Result<usize> {
        self.fast.queue_len(QUEUE_KEY)
    }

    /// Worker loop body: pause while the production lock is set, otherwise
    /// pop one article and route it. Returns after processing at most one
    /// article (or none, on an empty/paused tick), so callers can drive it
    /// from a `while !shutdown` loop or a single test call.
    pub fn worker_tick(&self, pause_poll_interval: Duration, pop_timeout: Duration) -> Result<bool> {
        while ProductionLock::is_set(self.fast.as_ref())? {
            debug!("review worker pausing: production lock held");
            std::thread::sleep(pause_poll_interval);
        }

        let Some(raw_id) = self.fast.queue_pop_timeout(QUEUE_KEY, pop_timeout)? else {
            return Ok(false);
        };
        let article_id: ArticleId = raw_id
            .parse()
            .context("malformed article id in review queue")?;
        self.process(article_id)?;
        Ok(true)
    }

    fn process(&self, article_id: ArticleId) -> Result<()> {
        let Some(mut article) = self.durable.get_article(article_id)? else {
            warn!(%article_id, "review worker: article vanished before processing");
            return Ok(());
        };
        if !matches!(article.review_state, ReviewState::Unreviewed) {
            return Ok(());
        }

        let config = ConfigStore::new(self.fast.as_ref()).get()?;
        let thresholds = RouteThresholds {
            light_threshold: config.light_threshold,
            heavy_threshold: config.heavy_threshold,
        };

        let outcome = route_article(self.light.as_ref(), self.heavy.as_ref(), thresholds, &article);
        self.metrics.record(&outcome);

        match outcome {
            RouteOutcome::Accepted {
                tags,
                summary,
                confidence,
                tier,
                model_id,
                degraded,
            } => {
                article.review_state = match tier {
                    ReviewTier::Light => ReviewState::Light,
                    ReviewTier::Heavy => ReviewState::Heavy,
                };
                article.tags = tags.into_iter().collect();
                article.summary = summary;
                article.confidence = confidence;
                article.reviewing_model = Some(model_id);
                article.degraded = degraded;
                info!(%article_id, ?tier, degraded, "article reviewed");
            }
            RouteOutcome::Rejected { reason } => {
                article.review_state = ReviewState::Rejected;
                article.rejection_reason = Some(reason.clone());
                warn!(%article_id, reason, "article rejected by review router");
            }
        }

        self.durable.update_article(article)?;
        Ok(())
    }

    /// Spawn `count` worker threads, each looping `worker_tick` until
    /// `shutdown` is set. Returns the join handles so callers can wait for
    /// a clean stop.
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: u32,
        pause_poll_interval: Duration,
        shutdown: Arc<AtomicBool>,
    ) -> Vec<std::thread::JoinHandle<()>> {
        (0..count)
            .map(|idx| {
                let router = Arc::clone(self);
                let shutdown = Arc::clone(&shutdown);
                std::thread::Builder::new()
                    .name(format!("review-worker-{idx}"))
                    .spawn(move || {
                        while !shutdown.load(Ordering::Relaxed) {
                            if let Err(err) =
                                router.worker_tick(pause_poll_interval, Duration::from_millis(250))
                            {
                                warn!(error = %err, "review worker tick failed");
                            }
                        }
                    })
                    .expect("failed to spawn review worker thread")
            })
            .collect()
    }
}
