//! Atomic JSON file helpers
//!
//! All shared on-disk state (manifest, queue, channel registry) is mutated
//! via backup → modify in memory → temp file → atomic rename. The temp file
//! is created in the target's own directory so the rename never crosses a
//! filesystem boundary.

use crate::{Error, Result};
use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Read and deserialize a whole-document JSON file.
///
/// A missing file is `Error::NotFound`; a parse failure is
/// `Error::DataCorruption` carrying the serde diagnostics (line/column),
/// never silently replaced with a default.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(path.display().to_string()));
        }
        Err(e) => return Err(Error::Io(e)),
    };

    serde_json::from_str(&content).map_err(|e| {
        Error::DataCorruption(format!(
            "{}: {} (line {}, column {})",
            path.display(),
            e,
            e.line(),
            e.column()
        ))
    })
}

/// Serialize and atomically write a whole-document JSON file.
///
/// Writes pretty-printed UTF-8 to `<path>.tmp` in the same directory, fsyncs,
/// then renames over the target. Readers never observe a half-written file.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = tmp_sibling(path);
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("JSON serialize failed: {}", e)))?;

    {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Copy the current file (if any) into `backup_dir` with a timestamped name.
///
/// Returns the backup path, or `None` when there was nothing to back up.
pub fn backup_file(path: &Path, backup_dir: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }

    fs::create_dir_all(backup_dir)?;

    let stem = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("backup");
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.3f");
    let backup_path = backup_dir.join(format!("{}.{}", stem, timestamp));

    fs::copy(path, &backup_path)?;
    Ok(Some(backup_path))
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("out.json");
    path.with_file_name(format!("{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "x".into(),
            count: 3,
        };

        write_json_atomic(&path, &doc).unwrap();
        let loaded: Doc = read_json(&path).unwrap();
        assert_eq!(loaded, doc);

        // No leftover temp file after a successful write
        assert!(!path.with_file_name("doc.json.tmp").exists());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Doc>(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn truncated_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{\"name\": \"x\", \"cou").unwrap();

        let err = read_json::<Doc>(&path).unwrap_err();
        assert!(matches!(err, Error::DataCorruption(_)));
        // Diagnostics include position information
        assert!(err.to_string().contains("line"));
    }

    #[test]
    fn backup_copies_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let backups = dir.path().join("backups");

        assert!(backup_file(&path, &backups).unwrap().is_none());

        fs::write(&path, "{}").unwrap();
        let backup = backup_file(&path, &backups).unwrap().unwrap();
        assert!(backup.exists());
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("doc.json."));
    }
}
