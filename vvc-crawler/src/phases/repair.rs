//! Repair pass
//!
//! Separate from the normal phases: backfills missing fields with explicit,
//! loudly-logged defaults and quarantines records missing their identity
//! fields. Never runs implicitly.

use super::PhaseSummary;
use crate::manifest::DownloadStatus;
use crate::pipeline::PipelineContext;
use anyhow::Result;

pub async fn run(ctx: &PipelineContext) -> Result<PhaseSummary> {
    let mut summary = PhaseSummary::new("repair");
    let mut manifest = ctx.store.load()?;

    for record in manifest.records.iter_mut() {
        let mut changed = false;

        if !record.has_valid_id() {
            if record.status != DownloadStatus::Failed {
                tracing::error!(
                    url = %record.url,
                    "Record missing identity; quarantined as failed"
                );
                record.status = DownloadStatus::Failed;
                changed = true;
            }
        } else {
            if record.classified && record.needs_analysis() {
                tracing::warn!(
                    video_id = %record.video_id,
                    "Incomplete classification tuple; reset for re-analysis"
                );
                record.classified = false;
                changed = true;
            }

            if record.status == DownloadStatus::Success && record.output_path.is_none() {
                tracing::warn!(
                    video_id = %record.video_id,
                    "Success without output path; reset to pending"
                );
                record.status = DownloadStatus::Pending;
                record.file_available = false;
                changed = true;
            }

            let actually_available = record
                .output_path
                .as_deref()
                .map(|p| std::path::Path::new(p).exists())
                .unwrap_or(false);
            if record.file_available != actually_available {
                tracing::warn!(
                    video_id = %record.video_id,
                    file_available = actually_available,
                    "Corrected stale file availability"
                );
                record.file_available = actually_available;
                changed = true;
            }
        }

        if changed {
            summary.success();
        } else {
            summary.skip();
        }
    }

    ctx.store.save(&mut manifest)?;
    summary.log();
    Ok(summary)
}
