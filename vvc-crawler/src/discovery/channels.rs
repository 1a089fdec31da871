//! Channel registry and quality scoring
//!
//! One `ChannelInfo` per discovered channel, created on the first video
//! from that channel and updated on every analysis after that; entries are
//! never deleted. The registry is persisted after every single video so a
//! crash mid-channel loses at most one video's worth of bookkeeping.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vvc_common::{fsjson, Error, Result};

/// Cumulative quality bookkeeping for one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelInfo {
    pub username: String,
    pub qualified_videos: u64,
    pub total_analyzed: u64,
    pub quality_score: f64,
    pub last_crawled: Option<DateTime<Utc>>,
}

impl Default for ChannelInfo {
    fn default() -> Self {
        Self {
            username: String::new(),
            qualified_videos: 0,
            total_analyzed: 0,
            quality_score: 0.0,
            last_crawled: None,
        }
    }
}

impl ChannelInfo {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Default::default()
        }
    }

    fn record_analysis(&mut self, qualified: bool) {
        self.total_analyzed += 1;
        if qualified {
            self.qualified_videos += 1;
        }
        self.quality_score = self.qualified_videos as f64 / self.total_analyzed as f64;
    }

    /// Promising once the sample is large enough and the ratio clears the
    /// threshold.
    pub fn is_promising(&self, min_videos_analyzed: u64, min_quality_score: f64) -> bool {
        self.total_analyzed >= min_videos_analyzed && self.quality_score >= min_quality_score
    }
}

/// Persistent channel registry sidecar (`channels.json`).
pub struct ChannelRegistry {
    path: PathBuf,
    backup_dir: PathBuf,
    channels: BTreeMap<String, ChannelInfo>,
}

impl ChannelRegistry {
    /// Load the registry; a missing file starts empty, corruption is fatal.
    pub fn load(path: PathBuf, backup_dir: PathBuf) -> Result<Self> {
        let channels = match fsjson::read_json::<BTreeMap<String, ChannelInfo>>(&path) {
            Ok(channels) => channels,
            Err(Error::NotFound(_)) => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            backup_dir,
            channels,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, username: &str) -> Option<&ChannelInfo> {
        self.channels.get(username)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.channels.values()
    }

    /// Record one analyzed video for `username` and persist immediately.
    pub fn record_analysis(&mut self, username: &str, qualified: bool) -> Result<()> {
        if username.trim().is_empty() {
            return Ok(());
        }

        let info = self
            .channels
            .entry(username.to_string())
            .or_insert_with(|| ChannelInfo::new(username));
        info.record_analysis(qualified);

        tracing::debug!(
            channel = username,
            qualified_videos = info.qualified_videos,
            total_analyzed = info.total_analyzed,
            quality_score = info.quality_score,
            "Channel quality updated"
        );

        self.save()
    }

    /// Stamp a channel as crawled now and persist.
    pub fn mark_crawled(&mut self, username: &str) -> Result<()> {
        let info = self
            .channels
            .entry(username.to_string())
            .or_insert_with(|| ChannelInfo::new(username));
        info.last_crawled = Some(Utc::now());
        self.save()
    }

    /// Whether channel mining should skip this channel.
    ///
    /// A channel crawled within the re-mine window is skipped; a zero-hour
    /// window means only the current run's `mark_crawled` stamps matter,
    /// restoring per-run-only tracking.
    pub fn recently_crawled(&self, username: &str, remine_hours: i64) -> bool {
        let Some(last) = self.channels.get(username).and_then(|c| c.last_crawled) else {
            return false;
        };
        if remine_hours <= 0 {
            return false;
        }
        Utc::now().signed_duration_since(last) < ChronoDuration::hours(remine_hours)
    }

    /// All channels currently clearing the promising thresholds.
    pub fn promising(&self, min_videos_analyzed: u64, min_quality_score: f64) -> Vec<&ChannelInfo> {
        self.channels
            .values()
            .filter(|c| c.is_promising(min_videos_analyzed, min_quality_score))
            .collect()
    }

    fn save(&self) -> Result<()> {
        fsjson::backup_file(&self.path, &self.backup_dir)?;
        fsjson::write_json_atomic(&self.path, &self.channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(dir: &tempfile::TempDir) -> ChannelRegistry {
        ChannelRegistry::load(
            dir.path().join("channels.json"),
            dir.path().join("backups").join("channels"),
        )
        .unwrap()
    }

    #[test]
    fn quality_score_tracks_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);

        reg.record_analysis("kids_tv", true).unwrap();
        reg.record_analysis("kids_tv", false).unwrap();
        reg.record_analysis("kids_tv", true).unwrap();

        let info = reg.get("kids_tv").unwrap();
        assert_eq!(info.total_analyzed, 3);
        assert_eq!(info.qualified_videos, 2);
        assert!((info.quality_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn persisted_after_every_video() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);
        reg.record_analysis("a", true).unwrap();

        // A second registry loaded from disk already sees the update
        let reloaded = registry(&dir);
        assert_eq!(reloaded.get("a").unwrap().total_analyzed, 1);
    }

    #[test]
    fn promising_requires_sample_and_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);

        for i in 0..4 {
            reg.record_analysis("small", i % 2 == 0).unwrap();
        }
        // 4 analyzed at 50%: sample too small for min 5
        assert!(reg.promising(5, 0.3).is_empty());

        reg.record_analysis("small", true).unwrap();
        let promising = reg.promising(5, 0.3);
        assert_eq!(promising.len(), 1);
        assert_eq!(promising[0].username, "small");

        // Ratio below threshold is never promising regardless of sample
        for _ in 0..10 {
            reg.record_analysis("bad", false).unwrap();
        }
        assert!(reg.promising(5, 0.3).iter().all(|c| c.username != "bad"));
    }

    #[test]
    fn remine_window_skips_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);

        assert!(!reg.recently_crawled("a", 24));
        reg.mark_crawled("a").unwrap();
        assert!(reg.recently_crawled("a", 24));
        // Zero window restores per-run-only tracking
        assert!(!reg.recently_crawled("a", 0));
    }

    #[test]
    fn ignores_empty_usernames() {
        let dir = tempfile::tempdir().unwrap();
        let mut reg = registry(&dir);
        reg.record_analysis("  ", true).unwrap();
        assert_eq!(reg.iter().count(), 0);
    }
}
