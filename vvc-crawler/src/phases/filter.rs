//! Filter phase
//!
//! Settles fully classified records: verifies the audio file physically
//! exists (correcting stale paths via filename search), moves qualifying
//! files into their sanitized language folder and everything else into the
//! reversible no-voice holding area, then de-duplicates the manifest and
//! the collected-URLs file.

use super::PhaseSummary;
use crate::manifest::store;
use crate::pipeline::PipelineContext;
use anyhow::Result;
use std::path::PathBuf;

pub async fn run(ctx: &PipelineContext) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("filter");

    // Loading already drops duplicate ids keep-first; the save at the end
    // persists that
    let mut manifest = ctx.store.load()?;

    let settled_ids: Vec<String> = manifest
        .records
        .iter()
        .filter(|r| r.has_valid_id() && !r.needs_analysis())
        .map(|r| r.video_id.clone())
        .collect();

    tracing::info!(classified = settled_ids.len(), "Filter phase starting");

    for video_id in settled_ids {
        if ctx.is_cancelled() {
            break;
        }

        let record = manifest.get(&video_id).expect("record present").clone();

        // Physical presence check with recursive-path correction
        let current = match record.output_path.as_deref().map(PathBuf::from) {
            Some(path) if path.exists() => Some(path),
            _ => record
                .output_file_name()
                .and_then(|name| store::locate_by_filename(&ctx.config.data_root, &name)),
        };

        let Some(current) = current else {
            let entry = manifest.get_mut(&video_id).expect("record present");
            if entry.file_available {
                entry.file_available = false;
                ctx.store.save(&mut manifest)?;
                tracing::warn!(video_id = %video_id, "Audio file lost; marked unavailable");
            }
            summary.skip();
            continue;
        };

        let file_name = current
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let dest_dir = if record.containing_children_voice == Some(true) {
            ctx.config
                .final_audio_dir()
                .join(record.sanitized_language_folder())
        } else {
            // Reversible cleanup rather than deletion
            ctx.config.no_voice_dir()
        };
        let dest = dest_dir.join(&file_name);

        if current == dest {
            // Already settled; just heal bookkeeping if it drifted
            let entry = manifest.get_mut(&video_id).expect("record present");
            let recorded = entry.output_path.as_deref().map(PathBuf::from);
            if recorded.as_deref() != Some(dest.as_path()) || !entry.file_available {
                entry.output_path = Some(dest.display().to_string());
                entry.file_available = true;
                ctx.store.save(&mut manifest)?;
            }
            summary.skip();
            continue;
        }

        std::fs::create_dir_all(&dest_dir)?;
        if let Err(e) = std::fs::rename(&current, &dest) {
            summary.fail(&video_id, format!("move failed: {}", e));
            continue;
        }

        let previous = manifest.get(&video_id).expect("record present").clone();
        {
            let entry = manifest.get_mut(&video_id).expect("record present");
            entry.output_path = Some(dest.display().to_string());
            entry.file_available = true;
        }
        if let Err(e) = ctx.store.save(&mut manifest) {
            *manifest.get_mut(&video_id).expect("record present") = previous;
            summary.fail(&video_id, format!("manifest save failed: {}", e));
            continue;
        }

        tracing::info!(
            video_id = %video_id,
            to = %dest.display(),
            kept = record.containing_children_voice == Some(true),
            "File settled"
        );
        summary.success();
    }

    ctx.store.save(&mut manifest)?;
    ctx.urls.dedup()?;

    summary.log();
    Ok(summary)
}
