//! Claim/complete/fail coordination over the shared queue file
//!
//! State machine per record: `pending → processing(instance) → {completed |
//! failed}`. Failed ids re-enter pending only through the explicit
//! requeue recovery pass. Every mutation runs under the advisory lock and
//! is persisted via backup + atomic replace before the lock drops.

use super::lock::PathLock;
use super::state::QueueFile;
use crate::manifest::{Manifest, ManifestRecord};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use vvc_common::{fsjson, Error, Result};

/// Aggregate queue counts for the status surface.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub instances: usize,
}

pub struct QueueCoordinator {
    queue_path: PathBuf,
    backup_dir: PathBuf,
    instance_id: String,
    stale_timeout: ChronoDuration,
    lock_attempts: u32,
    lock_backoff_ms: u64,
}

impl QueueCoordinator {
    pub fn new(
        queue_path: PathBuf,
        backup_dir: PathBuf,
        instance_id: String,
        stale_timeout_secs: u64,
    ) -> Self {
        Self {
            queue_path,
            backup_dir,
            instance_id,
            stale_timeout: ChronoDuration::seconds(stale_timeout_secs as i64),
            lock_attempts: 20,
            lock_backoff_ms: 50,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Seed the queue's pending bucket from manifest records that still
    /// need analysis. Already-tracked ids are skipped; optionally the
    /// failed bucket is drained back to pending first.
    pub async fn init_from_manifest(
        &self,
        manifest: &Manifest,
        requeue_failed: bool,
    ) -> Result<usize> {
        let candidate_ids: Vec<String> = manifest
            .records
            .iter()
            .filter(|r| r.has_valid_id() && r.needs_analysis())
            .map(|r| r.video_id.clone())
            .collect();

        self.with_locked("queue-init", move |queue| {
            let mut requeued = 0;
            if requeue_failed {
                requeued = queue.requeue_failed();
            }
            let added = queue.seed_pending(candidate_ids);
            tracing::info!(added, requeued, "Queue seeded from manifest");
            added + requeued
        })
        .await
    }

    /// Claim up to `batch_size` pending ids for this instance.
    ///
    /// Runs the stale-instance sweep first so no claim is ever starved
    /// behind a dead peer's leases. An empty return means "no more work
    /// right now", not termination; other instances may still be producing
    /// pending work.
    pub async fn claim(
        &self,
        batch_size: usize,
        manifest: &Manifest,
    ) -> Result<Vec<ManifestRecord>> {
        let instance = self.instance_id.clone();
        let stale_timeout = self.stale_timeout;

        let claimed_ids = self
            .with_locked("claim", move |queue| {
                sweep_stale_instances(queue, stale_timeout);

                let take = batch_size.min(queue.queue.pending.len());
                let claimed: Vec<String> = queue.queue.pending.drain(..take).collect();

                let now = Utc::now();
                for id in &claimed {
                    let bookkeeping = queue.records.entry(id.clone()).or_default();
                    bookkeeping.instance_id = Some(instance.clone());
                    bookkeeping.processing_started = Some(now);
                    bookkeeping.attempts += 1;
                }

                queue
                    .queue
                    .processing
                    .entry(instance.clone())
                    .or_default()
                    .extend(claimed.iter().cloned());

                let entry = queue
                    .instances
                    .entry(instance.clone())
                    .or_insert_with(|| super::state::InstanceInfo {
                        last_heartbeat: now,
                        claimed_records: Vec::new(),
                    });
                entry.last_heartbeat = now;
                entry.claimed_records.extend(claimed.iter().cloned());

                claimed
            })
            .await?;

        // Materialize claimed work from the manifest (read-only)
        let mut records = Vec::with_capacity(claimed_ids.len());
        let mut missing = Vec::new();
        for id in &claimed_ids {
            match manifest.get(id) {
                Some(record) => records.push(record.clone()),
                None => missing.push(id.clone()),
            }
        }

        // Ids the manifest no longer knows cannot be processed; park them in
        // failed so they are not claimed again until an operator requeues
        if !missing.is_empty() {
            tracing::warn!(
                count = missing.len(),
                "Claimed ids missing from manifest; marking failed"
            );
            for id in missing {
                self.fail(&id).await?;
            }
        }

        tracing::info!(
            instance = %self.instance_id,
            claimed = records.len(),
            "Claim complete"
        );
        Ok(records)
    }

    /// Mark a claimed id done. Returns `Ok(false)` (a no-op, not an error)
    /// when the id is not in this instance's processing list.
    pub async fn complete(&self, video_id: &str) -> Result<bool> {
        self.finish(video_id, Outcome::Completed).await
    }

    /// Mark a claimed id failed. Failed ids are not re-queued
    /// automatically.
    pub async fn fail(&self, video_id: &str) -> Result<bool> {
        self.finish(video_id, Outcome::Failed).await
    }

    /// Refresh this instance's heartbeat. Workers call this at a bounded
    /// interval (at most half the stale timeout) while holding claims.
    pub async fn heartbeat(&self) -> Result<()> {
        let instance = self.instance_id.clone();
        self.with_locked("heartbeat", move |queue| {
            let now = Utc::now();
            let entry = queue
                .instances
                .entry(instance)
                .or_insert_with(|| super::state::InstanceInfo {
                    last_heartbeat: now,
                    claimed_records: Vec::new(),
                });
            entry.last_heartbeat = now;
        })
        .await
    }

    /// Re-queue the leases of every instance whose heartbeat is older than
    /// the stale timeout. Also runs implicitly at the start of each claim.
    pub async fn cleanup_stale_instances(&self) -> Result<usize> {
        let stale_timeout = self.stale_timeout;
        self.with_locked("cleanup-stale", move |queue| {
            sweep_stale_instances(queue, stale_timeout)
        })
        .await
    }

    /// Aggregate counts without mutating anything.
    pub async fn stats(&self) -> Result<QueueStats> {
        let queue = self.load_queue()?;
        Ok(QueueStats {
            pending: queue.queue.pending.len(),
            processing: queue.queue.processing.values().map(|v| v.len()).sum(),
            completed: queue.queue.completed.len(),
            failed: queue.queue.failed.len(),
            instances: queue.instances.len(),
        })
    }

    async fn finish(&self, video_id: &str, outcome: Outcome) -> Result<bool> {
        let instance = self.instance_id.clone();
        let id = video_id.to_string();

        self.with_locked(outcome.operation(), move |queue| {
            let Some(processing) = queue.queue.processing.get_mut(&instance) else {
                return false;
            };
            let Some(position) = processing.iter().position(|p| p == &id) else {
                return false;
            };

            processing.remove(position);
            if processing.is_empty() {
                queue.queue.processing.remove(&instance);
            }
            if let Some(entry) = queue.instances.get_mut(&instance) {
                entry.claimed_records.retain(|c| c != &id);
            }
            if let Some(bookkeeping) = queue.records.get_mut(&id) {
                bookkeeping.instance_id = None;
                bookkeeping.processing_started = None;
            }

            match outcome {
                Outcome::Completed => queue.queue.completed.push(id),
                Outcome::Failed => queue.queue.failed.push(id),
            }
            true
        })
        .await
    }

    /// Exclusive read-modify-write of the queue file: lock, load (or
    /// default), mutate, backup + atomic replace, unlock.
    async fn with_locked<T, F>(&self, operation: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut QueueFile) -> T,
    {
        let lock = PathLock::acquire(
            &self.queue_path,
            operation,
            self.lock_attempts,
            self.lock_backoff_ms,
        )
        .await?;

        let mut queue = self.load_queue()?;
        let result = mutate(&mut queue);
        queue.last_updated = Utc::now();

        fsjson::backup_file(&self.queue_path, &self.backup_dir)?;
        fsjson::write_json_atomic(&self.queue_path, &queue)?;

        lock.release()?;
        Ok(result)
    }

    fn load_queue(&self) -> Result<QueueFile> {
        match fsjson::read_json(&self.queue_path) {
            Ok(queue) => Ok(queue),
            Err(Error::NotFound(_)) => Ok(QueueFile::default()),
            Err(e) => Err(e),
        }
    }
}

#[derive(Clone, Copy)]
enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    fn operation(self) -> &'static str {
        match self {
            Outcome::Completed => "complete",
            Outcome::Failed => "fail",
        }
    }
}

/// Move every stale instance's claimed ids back to pending and delete the
/// instance entry. Orphaned processing lists (instance entry already gone)
/// are swept the same way so no claim survives without a live owner.
fn sweep_stale_instances(queue: &mut QueueFile, stale_timeout: ChronoDuration) -> usize {
    let now = Utc::now();
    let stale: Vec<String> = queue
        .instances
        .iter()
        .filter(|(_, info)| now.signed_duration_since(info.last_heartbeat) > stale_timeout)
        .map(|(id, _)| id.clone())
        .collect();

    let mut requeued = 0;

    for instance_id in &stale {
        if let Some(claimed) = queue.queue.processing.remove(instance_id) {
            for id in claimed {
                if let Some(bookkeeping) = queue.records.get_mut(&id) {
                    bookkeeping.instance_id = None;
                    bookkeeping.processing_started = None;
                }
                if !queue.queue.pending.iter().any(|p| p == &id) {
                    queue.queue.pending.push(id);
                    requeued += 1;
                }
            }
        }
        queue.instances.remove(instance_id);
        tracing::warn!(instance = %instance_id, "Removed stale instance; leases re-queued");
    }

    let orphaned: Vec<String> = queue
        .queue
        .processing
        .keys()
        .filter(|id| !queue.instances.contains_key(*id))
        .cloned()
        .collect();

    for instance_id in orphaned {
        if let Some(claimed) = queue.queue.processing.remove(&instance_id) {
            for id in claimed {
                if let Some(bookkeeping) = queue.records.get_mut(&id) {
                    bookkeeping.instance_id = None;
                    bookkeeping.processing_started = None;
                }
                if !queue.queue.pending.iter().any(|p| p == &id) {
                    queue.queue.pending.push(id);
                    requeued += 1;
                }
            }
        }
        tracing::warn!(instance = %instance_id, "Re-queued orphaned claims");
    }

    requeued
}
