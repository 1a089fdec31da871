//! Download phase
//!
//! Downloads audio for every pending record. Ordering is manifest-first:
//! the success record is persisted before the file moves from the incoming
//! directory to its final location, so a crash in between is self-healing
//! (the filter phase's filename search recovers the true location).
//! Failures are persisted immediately as `status=failed` so a candidate is
//! never retried as new.

use super::PhaseSummary;
use crate::manifest::{DownloadStatus, Manifest};
use crate::pipeline::PipelineContext;
use crate::services::DownloadOutcome;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use vvc_common::Error;

pub async fn run(ctx: &PipelineContext) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("download");
    let mut manifest = ctx.store.load()?;

    let pending_ids: Vec<String> = manifest
        .records
        .iter()
        .filter(|r| r.has_valid_id() && r.status == DownloadStatus::Pending)
        .map(|r| r.video_id.clone())
        .collect();

    tracing::info!(pending = pending_ids.len(), "Download phase starting");

    let workers = ctx.config.download_workers.max(1);

    // Batches of bounded concurrent downloads; manifest writes and file
    // moves stay serialized on this task
    for chunk in pending_ids.chunks(workers) {
        if ctx.is_cancelled() {
            break;
        }

        let mut tasks: JoinSet<(String, u64, vvc_common::Result<DownloadOutcome>)> =
            JoinSet::new();

        for video_id in chunk {
            let Some(record) = manifest.get(video_id) else {
                continue;
            };
            let url = record.url.clone();
            let video_id = video_id.clone();
            let index = ctx.next_download_index(&manifest);
            let audio = Arc::clone(&ctx.audio);
            let incoming = incoming_dir(ctx);
            let stem = format!("clip_{:06}_{}", index, video_id);

            tasks.spawn(async move {
                let result = audio.download(&url, &incoming, &stem).await;
                (video_id, index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (video_id, index, result) = joined?;
            apply_download_result(ctx, &mut manifest, &video_id, index, result, &mut summary);
        }
    }

    summary.log();
    Ok(summary)
}

/// Download one record synchronously; used by channel mining where
/// candidates qualify one at a time. Already-settled records are a no-op.
pub async fn download_record(
    ctx: &PipelineContext,
    manifest: &mut Manifest,
    video_id: &str,
) -> vvc_common::Result<()> {
    let record = manifest
        .get(video_id)
        .ok_or_else(|| Error::NotFound(video_id.to_string()))?;
    if record.status != DownloadStatus::Pending {
        return Ok(());
    }

    let url = record.url.clone();
    let index = ctx.next_download_index(manifest);
    let stem = format!("clip_{:06}_{}", index, video_id);
    let result = ctx.audio.download(&url, &incoming_dir(ctx), &stem).await;

    let mut summary = PhaseSummary::new("download");
    apply_download_result(ctx, manifest, video_id, index, result, &mut summary);
    match summary.errors.into_iter().next() {
        Some((_, message)) => Err(Error::Internal(message)),
        None => Ok(()),
    }
}

fn incoming_dir(ctx: &PipelineContext) -> PathBuf {
    ctx.config.audio_dir().join("incoming")
}

fn apply_download_result(
    ctx: &PipelineContext,
    manifest: &mut Manifest,
    video_id: &str,
    index: u64,
    result: vvc_common::Result<DownloadOutcome>,
    summary: &mut PhaseSummary,
) {
    let Some(record) = manifest.get(video_id) else {
        summary.fail(video_id, "record vanished during download");
        return;
    };
    let previous = record.clone();

    match result {
        Ok(outcome) => match outcome.audio_path {
            Some(tmp_path) => {
                let file_name = tmp_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| format!("clip_{:06}_{}.mp3", index, video_id));
                let final_path = ctx.config.audio_dir().join(&file_name);

                {
                    let record = manifest.get_mut(video_id).expect("record present");
                    record.status = DownloadStatus::Success;
                    record.output_path = Some(final_path.display().to_string());
                    record.download_index = index;
                    record.file_available = true;
                    if outcome.duration_seconds.is_some() {
                        record.duration_seconds = outcome.duration_seconds;
                    }
                }

                // Manifest first, then the file move
                if let Err(e) = ctx.store.save(manifest) {
                    *manifest.get_mut(video_id).expect("record present") = previous;
                    summary.fail(video_id, format!("manifest save failed: {}", e));
                    return;
                }

                if let Err(e) = std::fs::rename(&tmp_path, &final_path) {
                    // Recoverable: the file stays under the data root and the
                    // filter phase's filename search will correct the path
                    tracing::warn!(
                        video_id = %video_id,
                        from = %tmp_path.display(),
                        to = %final_path.display(),
                        error = %e,
                        "File move after manifest write failed; filter will recover"
                    );
                }

                tracing::info!(
                    video_id = %video_id,
                    path = %final_path.display(),
                    download_index = index,
                    "Download complete"
                );
                summary.success();
            }
            None => {
                mark_failed(ctx, manifest, video_id, summary, "download produced no audio file");
            }
        },
        Err(e) => {
            mark_failed(ctx, manifest, video_id, summary, &e.to_string());
        }
    }
}

fn mark_failed(
    ctx: &PipelineContext,
    manifest: &mut Manifest,
    video_id: &str,
    summary: &mut PhaseSummary,
    message: &str,
) {
    if let Some(record) = manifest.get_mut(video_id) {
        record.status = DownloadStatus::Failed;
    }
    if let Err(e) = ctx.store.save(manifest) {
        tracing::error!(video_id = %video_id, error = %e, "Failed to persist failed status");
    }
    tracing::warn!(video_id = %video_id, error = %message, "Download failed");
    summary.fail(video_id, message);
}
