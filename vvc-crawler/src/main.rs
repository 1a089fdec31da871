//! vvc-crawler - Vietnamese children's voice collection pipeline
//!
//! Crawls video platforms for clips likely to contain Vietnamese
//! children's speech, downloads audio, classifies it and persists every
//! step to a durable manifest shared safely between concurrent instances.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use vvc_crawler::config::CrawlerConfig;
use vvc_crawler::manifest::DownloadStatus;
use vvc_crawler::phases;
use vvc_crawler::pipeline::{self, PipelineContext};
use vvc_crawler::queue::QueueCoordinator;
use vvc_crawler::services::{
    CommandCollaborator, CommandUploader, HttpPlatformClient, Uploader,
};

#[derive(Parser)]
#[command(name = "vvc-crawler", version, about = "Vietnamese children's voice collection pipeline")]
struct Cli {
    /// Path to a TOML config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data root override (also VVC_DATA_ROOT)
    #[arg(long, global = true)]
    data_root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: search, download, analyze, filter, upload
    Crawl {
        /// Keep looping until interrupted
        #[arg(long)]
        forever: bool,
    },
    /// Discovery only: append new pending candidates
    Search,
    /// Download audio for pending records
    Download,
    /// Classify downloaded records
    Analyze,
    /// Settle classified files into language folders
    Filter,
    /// Upload qualifying records
    Upload,
    /// Queue-coordinated analyze worker
    Worker {
        /// Exit when the queue has no pending work instead of idling
        #[arg(long)]
        drain: bool,
    },
    /// Seed the processing queue from the manifest
    QueueInit {
        /// Move failed queue entries back to pending first
        #[arg(long)]
        requeue_failed: bool,
    },
    /// Backfill and quarantine malformed manifest records
    Repair,
    /// Print the channel-quality report
    Report,
    /// Feed promising channels back into the discovery sources
    Promote {
        /// Write the channels into the config file instead of just listing
        #[arg(long)]
        apply: bool,
    },
    /// Manifest and queue statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = CrawlerConfig::load(cli.config.as_deref(), cli.data_root.as_deref())?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_root = %config.data_root.display(),
        "Starting vvc-crawler"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received; finishing the unit in flight");
                cancel.cancel();
            }
        });
    }

    let platform = Arc::new(HttpPlatformClient::new(
        config.api_base_url.clone(),
        config.api_keys.clone(),
    )?);
    let audio = Arc::new(CommandCollaborator::new(
        config.ytdlp_bin.clone(),
        config.classifier_cmd.clone(),
        config.subprocess_timeout_secs,
    ));
    let uploader: Option<Arc<dyn Uploader>> = if config.uploader_cmd.is_empty() {
        None
    } else {
        Some(Arc::new(CommandUploader::new(
            config.uploader_cmd.clone(),
            config.subprocess_timeout_secs,
        )))
    };

    let config_path = cli.config.clone();
    let ctx = PipelineContext::new(config, platform, audio, uploader, cancel)?;

    match cli.command {
        Commands::Crawl { forever } => pipeline::run_crawl(&ctx, forever).await?,
        Commands::Search => {
            phases::search::run(&ctx).await?;
        }
        Commands::Download => {
            phases::download::run(&ctx).await?;
        }
        Commands::Analyze => {
            let outcome = phases::analyze::run(&ctx).await?;
            if !outcome.qualifying_channels.is_empty() {
                pipeline::mine_channels(&ctx, &outcome.qualifying_channels).await?;
            }
        }
        Commands::Filter => {
            phases::filter::run(&ctx).await?;
        }
        Commands::Upload => {
            phases::upload::run(&ctx).await?;
        }
        Commands::Worker { drain } => {
            let coordinator = new_coordinator(&ctx);
            pipeline::run_worker(&ctx, &coordinator, drain).await?;
        }
        Commands::QueueInit { requeue_failed } => {
            let coordinator = new_coordinator(&ctx);
            let manifest = ctx.store.load()?;
            let seeded = coordinator.init_from_manifest(&manifest, requeue_failed).await?;
            println!("Seeded {} queue entries", seeded);
        }
        Commands::Repair => {
            phases::repair::run(&ctx).await?;
        }
        Commands::Report => {
            let registry = ctx.registry.lock().unwrap();
            print!(
                "{}",
                vvc_crawler::report::channel_quality_report(
                    &registry,
                    ctx.config.min_videos_analyzed,
                    ctx.config.min_quality_score,
                )
            );
        }
        Commands::Promote { apply } => promote(&ctx, config_path.as_deref(), apply)?,
        Commands::Status => status(&ctx).await?,
    }

    Ok(())
}

fn new_coordinator(ctx: &PipelineContext) -> QueueCoordinator {
    let instance_id = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
    QueueCoordinator::new(
        ctx.config.queue_path(),
        ctx.config.backup_dir("queue"),
        instance_id,
        ctx.config.stale_timeout_secs,
    )
}

/// The explicit operator step that expands crawl scope: list promising
/// channels, optionally merging them into the config's channel sources.
fn promote(ctx: &PipelineContext, config_path: Option<&std::path::Path>, apply: bool) -> Result<()> {
    let promising: Vec<String> = {
        let registry = ctx.registry.lock().unwrap();
        registry
            .promising(ctx.config.min_videos_analyzed, ctx.config.min_quality_score)
            .iter()
            .map(|c| c.username.clone())
            .collect()
    };

    if promising.is_empty() {
        println!("No promising channels yet");
        return Ok(());
    }

    for username in &promising {
        println!("{}", username);
    }

    if apply {
        let Some(path) = config_path else {
            anyhow::bail!("--apply requires --config so the channel list has a file to land in");
        };
        let mut config: CrawlerConfig = vvc_common::config::read_toml_config(path)?;
        let mut added = 0;
        for username in &promising {
            if !config.channels.contains(username) {
                config.channels.push(username.clone());
                added += 1;
            }
        }
        vvc_common::config::write_toml_config(&config, path)?;
        println!("Added {} channels to {}", added, path.display());
    }

    Ok(())
}

async fn status(ctx: &PipelineContext) -> Result<()> {
    let manifest = ctx.store.load()?;

    let mut pending = 0;
    let mut success = 0;
    let mut failed = 0;
    let mut classified = 0;
    let mut qualified = 0;
    let mut uploaded = 0;
    let mut available = 0;
    for record in &manifest.records {
        match record.status {
            DownloadStatus::Pending => pending += 1,
            DownloadStatus::Success => success += 1,
            DownloadStatus::Failed => failed += 1,
        }
        if !record.needs_analysis() {
            classified += 1;
            if record.containing_children_voice == Some(true) {
                qualified += 1;
            }
        }
        if record.uploaded {
            uploaded += 1;
        }
        if record.file_available {
            available += 1;
        }
    }

    println!("Manifest: {} records", manifest.records.len());
    println!("  download: {} pending, {} success, {} failed", pending, success, failed);
    println!("  classified: {} ({} qualified)", classified, qualified);
    println!("  files available: {}, uploaded: {}", available, uploaded);
    println!(
        "  total audio: {}",
        vvc_common::human_time::format_duration(manifest.total_duration_seconds)
    );

    if ctx.config.queue_path().exists() {
        let coordinator = new_coordinator(ctx);
        let stats = coordinator.stats().await?;
        println!(
            "Queue: {} pending, {} processing, {} completed, {} failed across {} instances",
            stats.pending, stats.processing, stats.completed, stats.failed, stats.instances
        );
    } else {
        println!("Queue: not initialized");
    }

    Ok(())
}
