//! Analyze phase
//!
//! Classifies every downloaded record that is unclassified or incompletely
//! classified (a record claiming `classified` with part of the tuple
//! missing is re-analyzed). Classification is the most expensive step per
//! item, so the full tuple is persisted after every single file; a crash
//! loses at most the file in flight. Channel quality bookkeeping is
//! updated per video as well.

use super::PhaseSummary;
use crate::manifest::{store, DownloadStatus, Manifest};
use crate::pipeline::PipelineContext;
use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use vvc_common::Error;

pub struct AnalyzeOutcome {
    pub summary: PhaseSummary,
    /// Channels behind newly qualifying videos, candidates for mining
    pub qualifying_channels: Vec<String>,
}

pub async fn run(ctx: &PipelineContext) -> Result<AnalyzeOutcome> {
    let mut summary = PhaseSummary::new("analyze");
    let mut qualifying_channels: Vec<String> = Vec::new();

    let mut manifest = ctx.store.load()?;

    let candidate_ids: Vec<String> = manifest
        .records
        .iter()
        .filter(|r| r.has_valid_id() && r.status == DownloadStatus::Success && r.needs_analysis())
        .map(|r| r.video_id.clone())
        .collect();

    tracing::info!(candidates = candidate_ids.len(), "Analyze phase starting");

    for video_id in candidate_ids {
        if ctx.is_cancelled() {
            break;
        }

        match analyze_record(ctx, &mut manifest, &video_id).await {
            Ok(Some(qualified)) => {
                summary.success();
                if qualified {
                    let channel = manifest
                        .get(&video_id)
                        .map(|r| r.channel.clone())
                        .unwrap_or_default();
                    if !channel.is_empty() && !qualifying_channels.contains(&channel) {
                        qualifying_channels.push(channel);
                    }
                }
            }
            Ok(None) => summary.skip(),
            Err(e) if e.is_quota() => {
                summary.fail(&video_id, e.to_string());
                break;
            }
            Err(e) => summary.fail(&video_id, e.to_string()),
        }
    }

    summary.log();
    Ok(AnalyzeOutcome {
        summary,
        qualifying_channels,
    })
}

/// Classify one record and persist the full classification tuple.
///
/// Returns `Some(qualified)` after a fresh classification, `None` when the
/// record was skipped (already complete, or its audio file is gone).
pub async fn analyze_record(
    ctx: &PipelineContext,
    manifest: &mut Manifest,
    video_id: &str,
) -> vvc_common::Result<Option<bool>> {
    let record = manifest
        .get(video_id)
        .ok_or_else(|| Error::NotFound(video_id.to_string()))?;

    if record.status != DownloadStatus::Success || !record.needs_analysis() {
        return Ok(None);
    }

    let Some(audio_path) = resolve_audio_path(ctx, manifest, video_id)? else {
        return Ok(None);
    };

    let classification = ctx.audio.classify(&audio_path).await?;

    if let Some(message) = classification.error {
        return Err(Error::Internal(format!("classifier error: {}", message)));
    }

    let qualified = classification.is_target_language && classification.has_target_voice;
    let previous = manifest.get(video_id).expect("record present").clone();
    let channel = previous.channel.clone();

    {
        let record = manifest.get_mut(video_id).expect("record present");
        record.classified = true;
        record.containing_children_voice = Some(classification.has_target_voice);
        record.voice_analysis_confidence = Some(classification.confidence);
        record.classification_timestamp = Some(Utc::now());
        record.language_folder = classification
            .detected_language
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        record.file_available = true;
    }

    if let Err(e) = ctx.store.save(manifest) {
        *manifest.get_mut(video_id).expect("record present") = previous;
        return Err(e);
    }

    tracing::info!(
        video_id = %video_id,
        has_target_voice = classification.has_target_voice,
        is_target_language = classification.is_target_language,
        confidence = classification.confidence,
        "Classification persisted"
    );

    // Per-video channel bookkeeping; a crash mid-channel loses at most one
    // video's worth
    {
        let mut registry = ctx.registry.lock().unwrap();
        registry.record_analysis(&channel, qualified)?;
    }

    Ok(Some(qualified))
}

/// Resolve the record's audio file, correcting a stale recorded path via
/// recursive filename search. When the file cannot be found at all the
/// record is marked unavailable and persisted.
fn resolve_audio_path(
    ctx: &PipelineContext,
    manifest: &mut Manifest,
    video_id: &str,
) -> vvc_common::Result<Option<PathBuf>> {
    let record = manifest.get(video_id).expect("record present");

    if let Some(path) = record.output_path.as_deref() {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    let file_name = record.output_file_name();
    if let Some(name) = file_name {
        if let Some(found) = store::locate_by_filename(&ctx.config.data_root, &name) {
            tracing::info!(
                video_id = %video_id,
                path = %found.display(),
                "Recovered stale audio path via filename search"
            );
            let record = manifest.get_mut(video_id).expect("record present");
            record.output_path = Some(found.display().to_string());
            record.file_available = true;
            ctx.store.save(manifest)?;
            return Ok(Some(found));
        }
    }

    tracing::warn!(video_id = %video_id, "Audio file not found; marking unavailable");
    let record = manifest.get_mut(video_id).expect("record present");
    record.file_available = false;
    ctx.store.save(manifest)?;
    Ok(None)
}
