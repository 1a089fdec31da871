//! Upload phase
//!
//! Uploads every qualifying, available, not-yet-uploaded record. The
//! `uploaded` flag flips only after the uploader confirms success; failed
//! uploads stay `uploaded=false` for the next pass.

use super::PhaseSummary;
use crate::pipeline::PipelineContext;
use anyhow::Result;
use std::path::PathBuf;

pub async fn run(ctx: &PipelineContext) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("upload");

    let Some(uploader) = ctx.uploader.as_ref() else {
        tracing::info!("No uploader configured; upload phase skipped");
        return Ok(summary);
    };

    let mut manifest = ctx.store.load()?;

    let upload_ids: Vec<String> = manifest
        .records
        .iter()
        .filter(|r| {
            r.has_valid_id()
                && !r.needs_analysis()
                && r.containing_children_voice == Some(true)
                && r.file_available
                && !r.uploaded
        })
        .map(|r| r.video_id.clone())
        .collect();

    tracing::info!(eligible = upload_ids.len(), "Upload phase starting");

    for video_id in upload_ids {
        if ctx.is_cancelled() {
            break;
        }

        let record = manifest.get(&video_id).expect("record present").clone();
        let Some(path) = record.output_path.as_deref().map(PathBuf::from) else {
            summary.skip();
            continue;
        };

        if !path.exists() {
            let entry = manifest.get_mut(&video_id).expect("record present");
            entry.file_available = false;
            ctx.store.save(&mut manifest)?;
            summary.skip();
            continue;
        }

        match uploader.upload(&path, &video_id).await {
            Ok(()) => {
                let previous = manifest.get(&video_id).expect("record present").clone();
                manifest.get_mut(&video_id).expect("record present").uploaded = true;
                if let Err(e) = ctx.store.save(&mut manifest) {
                    *manifest.get_mut(&video_id).expect("record present") = previous;
                    summary.fail(&video_id, format!("manifest save failed: {}", e));
                    continue;
                }
                tracing::info!(video_id = %video_id, "Upload confirmed");
                summary.success();
            }
            Err(e) => {
                // uploaded stays false; retried on the next pass
                summary.fail(&video_id, e.to_string());
            }
        }
    }

    summary.log();
    Ok(summary)
}
