//! Search phase
//!
//! Appends brand-new pending candidates from the configured queries and
//! channel sources; never mutates existing records. Quota exhaustion stops
//! the phase early and is surfaced to the orchestrator, which decides
//! whether to pause and re-probe (forever mode) or stop with state saved.

use super::PhaseSummary;
use crate::manifest::ManifestRecord;
use crate::pipeline::PipelineContext;
use anyhow::Result;

pub struct SearchOutcome {
    pub summary: PhaseSummary,
    pub quota_exhausted: bool,
}

enum SourceKind {
    Query,
    Channel,
}

pub async fn run(ctx: &PipelineContext) -> Result<SearchOutcome> {
    let mut summary = PhaseSummary::new("search");
    let mut quota_exhausted = false;

    let mut manifest = ctx.store.load()?;
    let mut known = ctx.urls.load()?;
    known.extend(manifest.successful_urls());

    let engine = ctx.engine();

    let sources: Vec<(SourceKind, String)> = ctx
        .config
        .queries
        .iter()
        .map(|q| (SourceKind::Query, q.clone()))
        .chain(
            ctx.config
                .channels
                .iter()
                .map(|c| (SourceKind::Channel, c.clone())),
        )
        .collect();

    'sources: for (kind, source) in sources {
        if ctx.is_cancelled() {
            break;
        }

        let discovered = match kind {
            SourceKind::Query => engine.discover_query(&source, &known).await,
            SourceKind::Channel => engine.discover_channel(&source, &known).await,
        };

        let discovered = match discovered {
            Ok(discovered) => discovered,
            Err(e) if e.is_quota() => {
                tracing::warn!(source = %source, "Quota exhausted; stopping search phase");
                quota_exhausted = true;
                break;
            }
            Err(e) => {
                summary.fail(&source, e.to_string());
                continue;
            }
        };

        for meta in discovered.accepted {
            if ctx.is_cancelled() {
                break 'sources;
            }

            // URL dedup already happened in the engine; the id guard keeps
            // the manifest uniqueness invariant when the same video surfaces
            // under a different canonical URL
            if manifest.get(&meta.video_id).is_some() {
                summary.skip();
                continue;
            }

            let record =
                ManifestRecord::pending(&meta.video_id, &meta.url, &meta.title, &meta.channel);
            if let Err(e) = ctx.store.append_and_save(&mut manifest, record) {
                summary.fail(&meta.video_id, e.to_string());
                continue;
            }
            ctx.urls.append(&meta.url)?;
            known.insert(meta.url);
            summary.success();
        }
    }

    summary.log();
    Ok(SearchOutcome {
        summary,
        quota_exhausted,
    })
}
