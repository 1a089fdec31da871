//! Pipeline orchestration
//!
//! Sequences the phases over one shared manifest, runs the channel-mining
//! feedback loop on qualifying videos, and drives forever mode with
//! cooperative cancellation. Within one process, phases run one at a time;
//! true parallelism comes from separate worker processes coordinating over
//! the queue file.

use crate::config::CrawlerConfig;
use crate::discovery::{ChannelRegistry, DiscoveryEngine};
use crate::manifest::{Manifest, ManifestStore};
use crate::phases::{self, PhaseSummary};
use crate::services::{AudioCollaborator, PlatformClient, Uploader};
use crate::urllist::UrlList;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a phase needs, constructed once per process.
///
/// Collaborators are explicit constructor arguments rather than globals;
/// the expensive ones (HTTP client, loaded models behind the classifier
/// command) are created once and reused for the process lifetime.
pub struct PipelineContext {
    pub config: CrawlerConfig,
    pub store: ManifestStore,
    pub urls: UrlList,
    pub registry: Mutex<ChannelRegistry>,
    pub platform: Arc<dyn PlatformClient>,
    pub audio: Arc<dyn AudioCollaborator>,
    pub uploader: Option<Arc<dyn Uploader>>,
    pub cancel: CancellationToken,
    download_counter: AtomicU64,
}

impl PipelineContext {
    pub fn new(
        config: CrawlerConfig,
        platform: Arc<dyn PlatformClient>,
        audio: Arc<dyn AudioCollaborator>,
        uploader: Option<Arc<dyn Uploader>>,
        cancel: CancellationToken,
    ) -> vvc_common::Result<Self> {
        let store = ManifestStore::new(config.manifest_path(), config.backup_dir("manifest"));
        let urls = UrlList::new(config.url_list_path(), config.backup_dir("url"));
        let registry = ChannelRegistry::load(config.channels_path(), config.backup_dir("channels"))?;

        Ok(Self {
            config,
            store,
            urls,
            registry: Mutex::new(registry),
            platform,
            audio,
            uploader,
            cancel,
            download_counter: AtomicU64::new(0),
        })
    }

    pub fn engine(&self) -> DiscoveryEngine {
        DiscoveryEngine::new(Arc::clone(&self.platform), self.config.clone())
    }

    /// Next globally unique download index for this process. Seeded from
    /// the manifest so restarts keep filenames collision-free.
    pub fn next_download_index(&self, manifest: &Manifest) -> u64 {
        self.download_counter
            .fetch_max(manifest.next_download_index(), Ordering::SeqCst);
        self.download_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of one full pipeline iteration.
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub summaries: Vec<PhaseSummary>,
    pub quota_exhausted: bool,
}

/// Run the full phase sequence once.
pub async fn run_once(ctx: &PipelineContext) -> Result<CrawlReport> {
    let mut report = CrawlReport::default();

    let search = phases::search::run(ctx).await?;
    report.quota_exhausted = search.quota_exhausted;
    report.summaries.push(search.summary);

    if ctx.is_cancelled() {
        return Ok(report);
    }

    report.summaries.push(phases::download::run(ctx).await?);

    if ctx.is_cancelled() {
        return Ok(report);
    }

    let analyze = phases::analyze::run(ctx).await?;
    report.summaries.push(analyze.summary);

    if !analyze.qualifying_channels.is_empty() && !ctx.is_cancelled() {
        let mining = mine_channels(ctx, &analyze.qualifying_channels).await?;
        report.summaries.push(mining);
    }

    if ctx.is_cancelled() {
        return Ok(report);
    }

    report.summaries.push(phases::filter::run(ctx).await?);

    if ctx.is_cancelled() {
        return Ok(report);
    }

    report.summaries.push(phases::upload::run(ctx).await?);

    Ok(report)
}

/// Run the pipeline until cancelled (forever mode) or once.
///
/// Quota exhaustion pauses the loop for the configured backoff before
/// re-probing; cancellation is cooperative and checked between units of
/// work, so an in-flight video finishes its manifest write first.
pub async fn run_crawl(ctx: &PipelineContext, forever: bool) -> Result<()> {
    loop {
        let report = run_once(ctx).await?;

        if !forever || ctx.is_cancelled() {
            return Ok(());
        }

        let wait = if report.quota_exhausted {
            tracing::warn!(
                wait_secs = ctx.config.quota_backoff_secs,
                "API quota exhausted; pausing before re-probing"
            );
            Duration::from_secs(ctx.config.quota_backoff_secs)
        } else {
            Duration::from_secs(ctx.config.loop_idle_secs)
        };

        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Queue-coordinated analyze loop.
///
/// Claims disjoint batches from the shared queue, analyzes each record and
/// reports completion, heartbeating at the configured interval so a crash
/// here returns the leases to pending for other instances. An empty claim
/// means "no work right now"; with `drain` the worker exits instead of
/// idling.
pub async fn run_worker(
    ctx: &PipelineContext,
    coordinator: &crate::queue::QueueCoordinator,
    drain: bool,
) -> Result<()> {
    let heartbeat_interval = Duration::from_secs(ctx.config.heartbeat_secs);

    loop {
        if ctx.is_cancelled() {
            break;
        }

        let mut manifest = ctx.store.load()?;
        let claimed = coordinator
            .claim(ctx.config.claim_batch_size, &manifest)
            .await?;

        if claimed.is_empty() {
            if drain {
                tracing::info!(instance = %coordinator.instance_id(), "No pending work; draining worker exits");
                break;
            }
            coordinator.heartbeat().await?;
            tokio::select! {
                _ = ctx.cancel.cancelled() => break,
                _ = tokio::time::sleep(heartbeat_interval) => {}
            }
            continue;
        }

        let mut last_heartbeat = std::time::Instant::now();

        for record in claimed {
            match phases::analyze::analyze_record(ctx, &mut manifest, &record.video_id).await {
                Ok(_) => {
                    coordinator.complete(&record.video_id).await?;
                }
                Err(e) => {
                    tracing::warn!(video_id = %record.video_id, error = %e, "Worker analysis failed");
                    coordinator.fail(&record.video_id).await?;
                }
            }

            if last_heartbeat.elapsed() >= heartbeat_interval {
                coordinator.heartbeat().await?;
                last_heartbeat = std::time::Instant::now();
            }

            // Cancellation is checked between units; the record in flight
            // finished its manifest write above
            if ctx.is_cancelled() {
                break;
            }
        }
    }

    Ok(())
}

/// Counts for one mined channel.
#[derive(Debug, Default)]
struct ChannelMiningOutcome {
    processed: usize,
    qualified: usize,
}

/// Exhaustively mine the channels behind qualifying videos.
///
/// Each candidate runs through the same qualification pipeline as
/// top-level discovery; channel discovery is never re-triggered for videos
/// found this way, so the fan-out is bounded at one level.
pub async fn mine_channels(ctx: &PipelineContext, usernames: &[String]) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("channel-mining");
    let mut mined_this_run: HashSet<String> = HashSet::new();

    for username in usernames {
        if ctx.is_cancelled() {
            break;
        }

        if mined_this_run.contains(username) {
            summary.skip();
            continue;
        }
        mined_this_run.insert(username.clone());

        let recently = {
            let registry = ctx.registry.lock().unwrap();
            registry.recently_crawled(username, ctx.config.channel_remine_hours)
        };
        if recently {
            tracing::debug!(channel = %username, "Channel crawled recently; skipping");
            summary.skip();
            continue;
        }

        match mine_one_channel(ctx, username).await {
            Ok(outcome) => {
                summary.success();
                let rate = if outcome.processed > 0 {
                    outcome.qualified as f64 / outcome.processed as f64
                } else {
                    0.0
                };
                tracing::info!(
                    channel = %username,
                    processed = outcome.processed,
                    qualified = outcome.qualified,
                    qualification_rate = rate,
                    "Channel mining complete"
                );
            }
            Err(e) if e.is_quota() => {
                tracing::warn!(channel = %username, "Quota exhausted during channel mining");
                summary.fail(username, e.to_string());
                break;
            }
            Err(e) => {
                summary.fail(username, e.to_string());
            }
        }
    }

    summary.log();
    Ok(summary)
}

async fn mine_one_channel(
    ctx: &PipelineContext,
    username: &str,
) -> vvc_common::Result<ChannelMiningOutcome> {
    let mut manifest = ctx.store.load()?;
    let mut known = ctx.urls.load()?;
    known.extend(manifest.successful_urls());

    let engine = ctx.engine();
    let discovered = engine.discover_channel(username, &known).await?;

    let mut outcome = ChannelMiningOutcome::default();

    for meta in discovered.accepted {
        if ctx.is_cancelled() {
            break;
        }

        // The same qualification path as top-level discovery: enqueue,
        // download, classify. Registry updates happen inside analyze.
        if manifest.get(&meta.video_id).is_none() {
            let record = crate::manifest::ManifestRecord::pending(
                &meta.video_id,
                &meta.url,
                &meta.title,
                &meta.channel,
            );
            ctx.store.append_and_save(&mut manifest, record)?;
            ctx.urls.append(&meta.url)?;
        }

        if let Err(e) = phases::download::download_record(ctx, &mut manifest, &meta.video_id).await
        {
            tracing::warn!(video_id = %meta.video_id, error = %e, "Channel candidate download failed");
            continue;
        }

        match phases::analyze::analyze_record(ctx, &mut manifest, &meta.video_id).await {
            Ok(Some(qualified)) => {
                outcome.processed += 1;
                if qualified {
                    outcome.qualified += 1;
                }
            }
            Ok(None) => {}
            Err(e) if e.is_quota() => return Err(e),
            Err(e) => {
                tracing::warn!(video_id = %meta.video_id, error = %e, "Channel candidate analysis failed");
            }
        }
    }

    {
        let mut registry = ctx.registry.lock().unwrap();
        registry.mark_crawled(username)?;
    }

    Ok(outcome)
}
