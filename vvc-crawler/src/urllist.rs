//! Collected-URLs text file
//!
//! Newline-delimited canonical URLs. Append-only during discovery (the
//! first dedup layer); exact-line de-duplication happens in the filter
//! phase via an atomic rewrite.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use vvc_common::{fsjson, Result};

pub struct UrlList {
    path: PathBuf,
    backup_dir: PathBuf,
}

impl UrlList {
    pub fn new(path: PathBuf, backup_dir: PathBuf) -> Self {
        Self { path, backup_dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All collected URLs as a set. Missing file reads as empty.
    pub fn load(&self) -> Result<HashSet<String>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    /// Append one canonical URL.
    pub fn append(&self, url: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", url.trim())?;
        Ok(())
    }

    /// Remove exact duplicate lines keep-first, preserving order.
    ///
    /// Rewrites through a temp file + rename after a backup, like every
    /// other shared file. Returns the number of lines dropped.
    pub fn dedup(&self) -> Result<usize> {
        if !self.path.exists() {
            return Ok(0);
        }

        let content = std::fs::read_to_string(&self.path)?;
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        let mut dropped = 0;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if seen.insert(line.to_string()) {
                kept.push(line.to_string());
            } else {
                dropped += 1;
            }
        }

        if dropped == 0 {
            return Ok(0);
        }

        fsjson::backup_file(&self.path, &self.backup_dir)?;

        let tmp = self.path.with_file_name(format!(
            "{}.tmp",
            self.path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("urls.txt")
        ));
        std::fs::write(&tmp, kept.join("\n") + "\n")?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::info!(dropped, kept = kept.len(), "De-duplicated URL list");
        Ok(dropped)
    }
}
