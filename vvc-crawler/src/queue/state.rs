//! Queue file schema
//!
//! `{version, created, last_updated, instances, queue: {pending,
//! processing, completed, failed}, records}`. A video id lives in at most
//! one bucket at a time; state transitions move ids between buckets, never
//! copy them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const QUEUE_FILE_VERSION: u32 = 1;

/// Per-instance lease bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub last_heartbeat: DateTime<Utc>,
    pub claimed_records: Vec<String>,
}

/// Per-record processing bookkeeping; the manifest stays the source of
/// truth for content, this only tracks queue history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordBookkeeping {
    pub instance_id: Option<String>,
    pub processing_started: Option<DateTime<Utc>>,
    pub attempts: u32,
}

/// The four mutually exclusive buckets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueBuckets {
    pub pending: Vec<String>,
    pub processing: HashMap<String, Vec<String>>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
}

/// Whole queue document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueFile {
    pub version: u32,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub instances: HashMap<String, InstanceInfo>,
    pub queue: QueueBuckets,
    pub records: HashMap<String, RecordBookkeeping>,
}

impl Default for QueueFile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            version: QUEUE_FILE_VERSION,
            created: now,
            last_updated: now,
            instances: HashMap::new(),
            queue: QueueBuckets::default(),
            records: HashMap::new(),
        }
    }
}

impl QueueFile {
    /// True when the id is tracked in any bucket.
    pub fn contains(&self, video_id: &str) -> bool {
        self.queue.pending.iter().any(|id| id == video_id)
            || self
                .queue
                .processing
                .values()
                .any(|ids| ids.iter().any(|id| id == video_id))
            || self.queue.completed.iter().any(|id| id == video_id)
            || self.queue.failed.iter().any(|id| id == video_id)
    }

    /// Number of buckets holding the id; the partition invariant requires
    /// this to be 0 or 1 at every observation point.
    pub fn bucket_count(&self, video_id: &str) -> usize {
        let mut count = 0;
        if self.queue.pending.iter().any(|id| id == video_id) {
            count += 1;
        }
        if self
            .queue
            .processing
            .values()
            .any(|ids| ids.iter().any(|id| id == video_id))
        {
            count += 1;
        }
        if self.queue.completed.iter().any(|id| id == video_id) {
            count += 1;
        }
        if self.queue.failed.iter().any(|id| id == video_id) {
            count += 1;
        }
        count
    }

    /// Add untracked ids to pending. Ids already in any bucket are skipped,
    /// so re-seeding is idempotent.
    pub fn seed_pending<I: IntoIterator<Item = String>>(&mut self, ids: I) -> usize {
        let mut added = 0;
        for id in ids {
            if id.trim().is_empty() || self.contains(&id) {
                continue;
            }
            self.queue.pending.push(id.clone());
            self.records.entry(id).or_default();
            added += 1;
        }
        added
    }

    /// Move every failed id back to pending; the explicit recovery pass.
    pub fn requeue_failed(&mut self) -> usize {
        let failed = std::mem::take(&mut self.queue.failed);
        let count = failed.len();
        for id in failed {
            if let Some(bookkeeping) = self.records.get_mut(&id) {
                bookkeeping.instance_id = None;
                bookkeeping.processing_started = None;
            }
            self.queue.pending.push(id);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_idempotent_and_skips_tracked() {
        let mut queue = QueueFile::default();
        let added = queue.seed_pending(["a".to_string(), "b".to_string(), "".to_string()]);
        assert_eq!(added, 2);
        assert_eq!(queue.queue.pending, vec!["a", "b"]);

        queue.queue.completed.push(queue.queue.pending.remove(0));
        let added = queue.seed_pending(["a".to_string(), "c".to_string()]);
        assert_eq!(added, 1);
        assert_eq!(queue.queue.pending, vec!["b", "c"]);
        assert_eq!(queue.bucket_count("a"), 1);
    }

    #[test]
    fn requeue_failed_moves_never_copies() {
        let mut queue = QueueFile::default();
        queue.seed_pending(["a".to_string()]);
        queue.queue.pending.clear();
        queue.queue.failed.push("a".to_string());

        assert_eq!(queue.requeue_failed(), 1);
        assert!(queue.queue.failed.is_empty());
        assert_eq!(queue.queue.pending, vec!["a"]);
        assert_eq!(queue.bucket_count("a"), 1);
    }
}
