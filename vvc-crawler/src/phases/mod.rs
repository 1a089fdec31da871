//! Pipeline phases
//!
//! Search → Download → Analyze → Filter → Upload, plus the out-of-band
//! repair pass. Each phase is a re-entrant function over the manifest:
//! running it twice with no new input settles to a no-op. One item's
//! failure never aborts a batch; every phase ends with a counts summary.

pub mod analyze;
pub mod download;
pub mod filter;
pub mod repair;
pub mod search;
pub mod upload;

/// Aggregate counts every phase reports when it finishes.
#[derive(Debug, Clone, Default)]
pub struct PhaseSummary {
    pub phase: String,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Per-record error messages, itemized in the final log line
    pub errors: Vec<(String, String)>,
}

impl PhaseSummary {
    pub fn new(phase: &str) -> Self {
        Self {
            phase: phase.to_string(),
            ..Default::default()
        }
    }

    pub fn success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn skip(&mut self) {
        self.processed += 1;
        self.skipped += 1;
    }

    pub fn fail(&mut self, video_id: &str, message: impl Into<String>) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push((video_id.to_string(), message.into()));
    }

    /// Log the end-of-phase summary; itemizes errors when there are any.
    pub fn log(&self) {
        tracing::info!(
            phase = %self.phase,
            processed = self.processed,
            succeeded = self.succeeded,
            failed = self.failed,
            skipped = self.skipped,
            "Phase complete"
        );
        for (video_id, message) in &self.errors {
            tracing::warn!(phase = %self.phase, video_id = %video_id, error = %message, "Item failed");
        }
    }
}
