use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use caster_cadence::CadenceController;
use caster_collections::CollectionManager;
use caster_config::CasterConfig;
use caster_core::OrchestrationCore;
use caster_pipeline::{EpisodePipeline, HttpEditorClient, HttpPublisherClient, HttpTtsClient, HttpWriterClient};
use caster_review::{HttpReviewerClient, ReviewRouter};
use caster_store::{InMemoryDurableStore, InMemoryFastStore};
use caster_types::{Bucket, FeedId, GroupId, PodcastGroup, PresenterId, WriterId};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};

/// Admin CLI over one [`OrchestrationCore`] instance.
///
/// Backed by the in-memory store implementations (no persistent backend
/// ships in this workspace), so state lives only for the lifetime of one
/// invocation: useful for exercising the wiring end to end, not for running
/// a long-lived production instance.
#[derive(Parser, Debug)]
#[command(name = "caster", version)]
#[command(about = "Podcast orchestration core: ingest, cadence tick, forced generate, admin inspect")]
struct Cli {
    /// Directory to load caster.toml from (built-in defaults if absent).
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    #[arg(long, default_value = "http://localhost:8081/review")]
    light_reviewer_endpoint: String,
    #[arg(long, default_value = "http://localhost:8082/review")]
    heavy_reviewer_endpoint: String,
    #[arg(long, default_value = "http://localhost:8083/script")]
    writer_script_endpoint: String,
    #[arg(long, default_value = "http://localhost:8083/metadata")]
    writer_metadata_endpoint: String,
    #[arg(long, default_value = "http://localhost:8084/edit")]
    editor_endpoint: String,
    #[arg(long, default_value = "http://localhost:8085/synthesize")]
    tts_endpoint: String,
    #[arg(long, default_value = "http://localhost:8086/publish")]
    publisher_endpoint: String,

    /// Publish target platform (repeatable).
    #[arg(long = "platform", default_values_t = vec!["spotify".to_string()])]
    publish_platforms: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BucketArg {
    Daily,
    ThreeDay,
    Weekly,
}

impl From<BucketArg> for Bucket {
    fn from(value: BucketArg) -> Self {
        match value {
            BucketArg::Daily => Bucket::Daily,
            BucketArg::ThreeDay => Bucket::ThreeDay,
            BucketArg::Weekly => Bucket::Weekly,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a podcast group (no group bootstrap exists outside the CLI).
    AddGroup {
        name: String,
        #[arg(long, default_value_t = 3)]
        min_articles: u32,
        #[arg(long, value_enum, default_value_t = BucketArg::Daily)]
        bucket: BucketArg,
        #[arg(long = "tag")]
        category_tags: Vec<String>,
        #[arg(long = "presenter-id")]
        presenter_ids: Vec<PresenterId>,
        #[arg(long)]
        writer_id: WriterId,
        #[arg(long, default_value_t = 20)]
        target_minutes: u32,
    },
    /// Ingest one article: dedup, persist, assign to each group's active
    /// collection, enqueue for review.
    Ingest {
        #[arg(long = "group")]
        group_ids: Vec<GroupId>,
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value = "https://example.com/article")]
        canonical_link: String,
        #[arg(long)]
        feed_id: Option<FeedId>,
    },
    /// Run one review worker tick against the queue.
    ReviewTick,
    /// Run one cadence tick across every active group, generating episodes
    /// where due.
    Tick,
    /// Run the review worker pool and the cadence tick loop until killed.
    Run,
    /// Force-run the episode pipeline for one group, bypassing cadence
    /// (spec §7: "may be retried by re-invoking generate").
    Generate {
        #[arg(long)]
        group: GroupId,
    },
    /// Read-only cadence status for one group.
    CadenceStatus {
        #[arg(long)]
        group: GroupId,
    },
    /// Read-only production lock status.
    ProductionStatus,
    /// Read-only review router counters.
    ReviewMetrics,
    /// Read-only active-collection stats for one group.
    CollectionStats {
        #[arg(long)]
        group: GroupId,
    },
    /// Mutate the runtime-tunable review config.
    SetLightThreshold { value: f64 },
    SetHeavyThreshold { value: f64 },
    SetWorkerCount { value: u32 },
    SetMinArticles { value: u32 },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CasterConfig::load_or_default(&cli.config_dir)?;

    let fast: Arc<dyn caster_store::FastStore> = Arc::new(InMemoryFastStore::new());
    let durable: Arc<dyn caster_store::DurableStore> = Arc::new(InMemoryDurableStore::new());
    let collections = Arc::new(CollectionManager::new(durable.clone()));

    let light = Arc::new(HttpReviewerClient::new(
        &cli.light_reviewer_endpoint,
        config.review.light_hard_timeout,
    )?);
    let heavy = Arc::new(HttpReviewerClient::new(
        &cli.heavy_reviewer_endpoint,
        config.review.heavy_hard_timeout,
    )?);
    let review = Arc::new(ReviewRouter::new(
        fast.clone(),
        durable.clone(),
        light,
        heavy,
        config.review.queue_capacity,
    ));

    let writer = Arc::new(HttpWriterClient::new(
        &cli.writer_script_endpoint,
        &cli.writer_metadata_endpoint,
        config.pipeline.script_hard,
    )?);
    let editor = Arc::new(HttpEditorClient::new(&cli.editor_endpoint, config.pipeline.edit_hard)?);
    let tts = Arc::new(HttpTtsClient::new(&cli.tts_endpoint, config.pipeline.tts_hard)?);
    let publisher = Arc::new(HttpPublisherClient::new(&cli.publisher_endpoint, config.pipeline.tts_hard)?);
    let pipeline = Arc::new(
        EpisodePipeline::new(
            fast.clone(),
            durable.clone(),
            collections.clone(),
            writer,
            editor,
            tts,
            publisher,
            cli.publish_platforms.clone(),
        )
        .with_deadlines(config.pipeline.script_soft, config.pipeline.edit_soft, config.pipeline.tts_soft)
        .with_lock_ttls(config.locks.generation_lock_ttl, config.locks.production_lock_ttl),
    );

    let cadence = Arc::new(CadenceController::new(
        fast.clone(),
        durable.clone(),
        collections.clone(),
        config.collections.staleness_max,
        config.locks.generation_lock_ttl,
    ));

    let core = OrchestrationCore::new(
        fast.clone(),
        durable.clone(),
        config.dedup.ttl,
        review,
        collections,
        cadence,
        pipeline,
    );

    match cli.cmd {
        Commands::AddGroup {
            name,
            min_articles,
            bucket,
            category_tags,
            presenter_ids,
            writer_id,
            target_minutes,
        } => {
            let group = PodcastGroup {
                id: GroupId::new(),
                name,
                category_tags: category_tags.into_iter().collect(),
                preferred_bucket: bucket.into(),
                min_articles,
                presenter_ids,
                writer_id,
                target_minutes,
                active: true,
            };
            let group_id = group.id;
            durable.insert_group(group)?;
            println!("group_id: {group_id}");
        }
        Commands::Ingest { group_ids, title, body, canonical_link, feed_id } => {
            let outcome = core.ingest_article(
                feed_id.unwrap_or_default(),
                canonical_link,
                title,
                body,
                Utc::now(),
                &group_ids,
            )?;
            match outcome {
                caster_core::IngestOutcome::Accepted(article_id) => println!("accepted: {article_id}"),
                caster_core::IngestOutcome::Duplicate => println!("duplicate: rejected by dedup filter"),
            }
        }
        Commands::ReviewTick => {
            let processed = core
                .review
                .worker_tick(config.review.pause_poll_interval, Duration::from_millis(500))?;
            println!("processed_one_article: {processed}");
        }
        Commands::Tick => {
            let decisions = core.run_cadence_tick()?;
            for (group_id, decision) in decisions {
                println!("{group_id}: {decision:?}");
            }
        }
        Commands::Run => {
            core.run_forever(
                config.cadence.tick_interval,
                config.collections.collection_ttl,
                config.review.worker_count,
                config.review.pause_poll_interval,
                Arc::new(std::sync::atomic::AtomicBool::new(false)),
            )?;
        }
        Commands::Generate { group } => match core.pipeline.generate(group) {
            Ok(episode_id) => println!("episode_id: {episode_id}"),
            Err(err) => println!("precondition failed: {err}"),
        },
        Commands::CadenceStatus { group } => {
            print_json(&core.cadence_status(group)?)?;
        }
        Commands::ProductionStatus => {
            print_json(&core.production_status()?)?;
        }
        Commands::ReviewMetrics => {
            print_json(&core.review_metrics())?;
        }
        Commands::CollectionStats { group } => {
            print_json(&core.collection_stats(group)?)?;
        }
        Commands::SetLightThreshold { value } => {
            core.set_light_threshold(value)?;
            println!("light_threshold: {value}");
        }
        Commands::SetHeavyThreshold { value } => {
            core.set_heavy_threshold(value)?;
            println!("heavy_threshold: {value}");
        }
        Commands::SetWorkerCount { value } => {
            core.set_worker_count(value)?;
            println!("worker_count: {value}");
        }
        Commands::SetMinArticles { value } => {
            core.set_min_articles(value)?;
            println!("min_articles: {value}");
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serialize admin response")?);
    Ok(())
}
