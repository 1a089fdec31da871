//! Durable, atomic, corruption-resistant manifest storage
//!
//! Save ordering: timestamped backup of the existing file → recompute the
//! derived duration total → write a temp file in the target directory →
//! atomic rename. A failed save leaves the previous manifest intact, so
//! callers roll back their in-memory mutation instead of diverging.

use super::record::{self, ManifestRecord};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use vvc_common::{fsjson, Error, Result};
use walkdir::WalkDir;

/// Whole-document manifest shape: `{"total_duration_seconds": .., "records": [..]}`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub total_duration_seconds: f64,
    pub records: Vec<ManifestRecord>,
}

impl Manifest {
    /// Find a record by id; invalid-id records never match.
    pub fn get(&self, video_id: &str) -> Option<&ManifestRecord> {
        if video_id.trim().is_empty() {
            return None;
        }
        self.records.iter().find(|r| r.video_id == video_id)
    }

    /// Mutable lookup by id.
    pub fn get_mut(&mut self, video_id: &str) -> Option<&mut ManifestRecord> {
        if video_id.trim().is_empty() {
            return None;
        }
        self.records.iter_mut().find(|r| r.video_id == video_id)
    }

    /// Canonical URLs of records that downloaded successfully; the second
    /// dedup layer used by discovery.
    pub fn successful_urls(&self) -> HashSet<String> {
        self.records
            .iter()
            .filter(|r| r.status == record::DownloadStatus::Success)
            .map(|r| r.url.clone())
            .collect()
    }

    /// Next download index: one past the highest index ever persisted.
    pub fn next_download_index(&self) -> u64 {
        self.records
            .iter()
            .map(|r| r.download_index)
            .max()
            .map(|max| max + 1)
            .unwrap_or(1)
    }

    /// Recompute the derived duration sum. Missing durations count as zero
    /// and are logged, never guessed.
    pub fn recompute_total_duration(&mut self) {
        let mut total = 0.0;
        for record in &self.records {
            match record.duration_seconds {
                Some(secs) if secs.is_finite() && secs >= 0.0 => total += secs,
                Some(bad) => {
                    tracing::warn!(
                        video_id = %record.video_id,
                        duration = bad,
                        "Non-numeric duration treated as 0 in total"
                    );
                }
                None => {
                    tracing::debug!(
                        video_id = %record.video_id,
                        "Missing duration treated as 0 in total"
                    );
                }
            }
        }
        self.total_duration_seconds = total;
    }
}

/// Owns persistence of the manifest document.
pub struct ManifestStore {
    path: PathBuf,
    backup_dir: PathBuf,
}

impl ManifestStore {
    pub fn new(path: PathBuf, backup_dir: PathBuf) -> Self {
        Self { path, backup_dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest.
    ///
    /// A missing file synthesizes an empty manifest. A parse failure is
    /// surfaced as `DataCorruption` — existing (possibly truncated) data is
    /// never silently replaced. Records pass through the ordered migration
    /// steps, then duplicates by non-empty `video_id` are dropped keep-first
    /// with a warning per drop.
    pub fn load(&self) -> Result<Manifest> {
        let mut raw: serde_json::Value = match fsjson::read_json(&self.path) {
            Ok(raw) => raw,
            Err(Error::NotFound(_)) => {
                tracing::info!(path = %self.path.display(), "No manifest yet; starting empty");
                return Ok(Manifest::default());
            }
            Err(e) => return Err(e),
        };

        if let Some(records) = raw.get_mut("records").and_then(|r| r.as_array_mut()) {
            for value in records.iter_mut() {
                record::migrate_record_value(value);
            }
        }

        let mut manifest: Manifest = serde_json::from_value(raw).map_err(|e| {
            Error::DataCorruption(format!("{}: {}", self.path.display(), e))
        })?;

        manifest.records = dedup_records(std::mem::take(&mut manifest.records));
        Ok(manifest)
    }

    /// Persist the manifest: backup, recompute totals, atomic replace.
    pub fn save(&self, manifest: &mut Manifest) -> Result<()> {
        fsjson::backup_file(&self.path, &self.backup_dir)?;
        manifest.recompute_total_duration();
        fsjson::write_json_atomic(&self.path, manifest)?;
        tracing::debug!(
            path = %self.path.display(),
            records = manifest.records.len(),
            total_duration = manifest.total_duration_seconds,
            "Manifest saved"
        );
        Ok(())
    }

    /// Append a record and persist. On save failure the append is rolled
    /// back so in-memory and on-disk state cannot diverge.
    pub fn append_and_save(
        &self,
        manifest: &mut Manifest,
        record: ManifestRecord,
    ) -> Result<()> {
        let video_id = record.video_id.clone();
        manifest.records.push(record);
        if let Err(e) = self.save(manifest) {
            manifest.records.pop();
            tracing::error!(
                video_id = %video_id,
                error = %e,
                "Manifest save failed; rolled back in-memory append"
            );
            return Err(e);
        }
        Ok(())
    }
}

/// Keep-first dedup over non-empty video ids; invalid-id records are kept
/// as-is (they carry no identity to collide on).
fn dedup_records(records: Vec<ManifestRecord>) -> Vec<ManifestRecord> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        if !record.has_valid_id() {
            kept.push(record);
            continue;
        }
        if seen.insert(record.video_id.clone()) {
            kept.push(record);
        } else {
            tracing::warn!(
                video_id = %record.video_id,
                url = %record.url,
                "Dropping duplicate manifest record (keeping first occurrence)"
            );
        }
    }

    kept
}

/// Best-effort recursive search for a file by name under `root`.
///
/// Recovers records whose recorded path went stale because the filter phase
/// (or an operator) moved the file.
pub fn locate_by_filename(root: &Path, file_name: &str) -> Option<PathBuf> {
    if file_name.is_empty() || !root.exists() {
        return None;
    }

    for entry in WalkDir::new(root).follow_links(false) {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file()
                    && entry.file_name().to_string_lossy() == file_name
                {
                    return Some(entry.path().to_path_buf());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error walking directory during filename search");
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::record::DownloadStatus;

    fn store(dir: &tempfile::TempDir) -> ManifestStore {
        ManifestStore::new(
            dir.path().join("manifest.json"),
            dir.path().join("backups").join("url"),
        )
    }

    #[test]
    fn missing_manifest_synthesized_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = store(&dir).load().unwrap();
        assert!(manifest.records.is_empty());
        assert_eq!(manifest.total_duration_seconds, 0.0);
    }

    #[test]
    fn corrupt_manifest_is_fatal_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{\"records\": [tru").unwrap();

        let err = store(&dir).load().unwrap_err();
        assert!(matches!(err, Error::DataCorruption(_)));
        // Original bytes untouched
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"records\": [tru"
        );
    }

    #[test]
    fn duplicates_dropped_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let mut manifest = Manifest::default();

        let mut first = ManifestRecord::pending("a", "https://x/a", "first", "c");
        first.duration_seconds = Some(10.0);
        manifest.records.push(first);
        manifest
            .records
            .push(ManifestRecord::pending("a", "https://x/a2", "second", "c"));
        manifest
            .records
            .push(ManifestRecord::pending("", "https://x/b", "no id", "c"));
        s.save(&mut manifest).unwrap();

        let loaded = s.load().unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[0].title, "first");
        assert!(!loaded.records[1].has_valid_id());
    }

    #[test]
    fn save_recomputes_total_duration() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let mut manifest = Manifest::default();
        manifest.total_duration_seconds = 9999.0; // stale derived value

        let mut a = ManifestRecord::pending("a", "https://x/a", "", "");
        a.duration_seconds = Some(30.0);
        let mut b = ManifestRecord::pending("b", "https://x/b", "", "");
        b.duration_seconds = None;
        manifest.records.push(a);
        manifest.records.push(b);

        s.save(&mut manifest).unwrap();
        assert_eq!(manifest.total_duration_seconds, 30.0);

        let loaded = s.load().unwrap();
        assert_eq!(loaded.total_duration_seconds, 30.0);
    }

    #[test]
    fn save_writes_backup_of_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let mut manifest = Manifest::default();
        s.save(&mut manifest).unwrap();
        // First save had nothing to back up
        assert!(std::fs::read_dir(dir.path().join("backups").join("url"))
            .map(|d| d.count())
            .unwrap_or(0) == 0);

        manifest
            .records
            .push(ManifestRecord::pending("a", "https://x/a", "", ""));
        s.save(&mut manifest).unwrap();
        assert_eq!(
            std::fs::read_dir(dir.path().join("backups").join("url"))
                .unwrap()
                .count(),
            1
        );
    }

    #[test]
    fn round_trip_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let mut manifest = Manifest::default();
        let mut record = ManifestRecord::pending("a", "https://x/a", "title", "chan");
        record.status = DownloadStatus::Success;
        record.output_path = Some("/tmp/a.mp3".into());
        record.duration_seconds = Some(12.5);
        manifest.records.push(record.clone());

        s.save(&mut manifest).unwrap();
        let loaded = s.load().unwrap();
        assert_eq!(loaded.records, vec![record]);
    }

    #[test]
    fn locate_by_filename_finds_moved_file() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("final_audio").join("vi");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("clip_7.mp3"), b"x").unwrap();

        let found = locate_by_filename(dir.path(), "clip_7.mp3").unwrap();
        assert_eq!(found, nested.join("clip_7.mp3"));
        assert!(locate_by_filename(dir.path(), "absent.mp3").is_none());
    }

    #[test]
    fn next_download_index_is_monotonic() {
        let mut manifest = Manifest::default();
        assert_eq!(manifest.next_download_index(), 1);

        let mut record = ManifestRecord::pending("a", "https://x/a", "", "");
        record.download_index = 41;
        manifest.records.push(record);
        assert_eq!(manifest.next_download_index(), 42);
    }
}
