//! Crawler configuration
//!
//! Multi-tier resolution with CLI → ENV → TOML priority; every knob has a
//! compiled default so a bare `vvc-crawler crawl` works out of the box.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vvc_common::Result;

/// Crawler configuration, loaded from TOML with serde defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CrawlerConfig {
    /// Data root; manifest, queue, URL list, audio and backups live under it
    pub data_root: PathBuf,

    /// Search queries fed to discovery, one per line in spirit of the
    /// operator-editable query list
    pub queries: Vec<String>,

    /// Channel usernames injected as additional discovery sources
    pub channels: Vec<String>,

    /// Minimum clip duration accepted pre-download (seconds)
    pub min_duration_seconds: f64,
    /// Maximum clip duration accepted pre-download (seconds)
    pub max_duration_seconds: f64,
    /// Minimum view count accepted pre-download
    pub min_view_count: u64,
    /// Candidates whose title/description contain any of these are rejected
    pub exclude_keywords: Vec<String>,

    /// Maximum results to accumulate per query (trimmed to exact count)
    pub max_results_per_query: usize,
    /// Hard ceiling on pages fetched per query; guards against cursor bugs
    pub max_pages_per_query: usize,
    /// Cooldown between result pages (milliseconds)
    pub page_cooldown_ms: u64,

    /// Bounded retry budget for transient upstream errors
    pub max_retries: u32,
    /// Base delay for exponential retry backoff (milliseconds)
    pub retry_backoff_ms: u64,
    /// Wait before re-probing key availability after quota exhaustion (seconds)
    pub quota_backoff_secs: u64,

    /// Simultaneous downloads within one process
    pub download_workers: usize,

    /// Queue instance heartbeat interval (seconds)
    pub heartbeat_secs: u64,
    /// Instances silent longer than this are presumed crashed (seconds)
    pub stale_timeout_secs: u64,
    /// Records claimed per `claim()` call in worker mode
    pub claim_batch_size: usize,

    /// Minimum analyzed videos before a channel can be judged
    pub min_videos_analyzed: u64,
    /// Qualified/analyzed ratio at which a channel becomes promising
    pub min_quality_score: f64,
    /// Channels crawled within this window are not re-mined (hours);
    /// 0 restores per-run-only tracking
    pub channel_remine_hours: i64,

    /// Platform API base URL (search + channel endpoints)
    pub api_base_url: String,
    /// API keys, rotated as quotas exhaust
    pub api_keys: Vec<String>,

    /// yt-dlp binary used by the download collaborator
    pub ytdlp_bin: String,
    /// Classifier command; receives the audio path, prints JSON on stdout
    pub classifier_cmd: Vec<String>,
    /// Upload command; receives the audio path and video id. Empty disables
    /// the upload phase
    pub uploader_cmd: Vec<String>,
    /// Download/classify subprocess timeout (seconds)
    pub subprocess_timeout_secs: u64,
    /// Idle wait between forever-mode iterations (seconds)
    pub loop_idle_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("./vvc_data"),
            queries: Vec::new(),
            channels: Vec::new(),
            min_duration_seconds: 10.0,
            max_duration_seconds: 600.0,
            min_view_count: 100,
            exclude_keywords: Vec::new(),
            max_results_per_query: 200,
            max_pages_per_query: 50,
            page_cooldown_ms: 1000,
            max_retries: 3,
            retry_backoff_ms: 500,
            quota_backoff_secs: 300,
            download_workers: 4,
            heartbeat_secs: 30,
            stale_timeout_secs: 300,
            claim_batch_size: 10,
            min_videos_analyzed: 5,
            min_quality_score: 0.3,
            channel_remine_hours: 0,
            api_base_url: "https://open.tikapi.io".to_string(),
            api_keys: Vec::new(),
            ytdlp_bin: "yt-dlp".to_string(),
            classifier_cmd: vec!["vvc-classify".to_string()],
            uploader_cmd: Vec::new(),
            subprocess_timeout_secs: 600,
            loop_idle_secs: 60,
        }
    }
}

impl CrawlerConfig {
    /// Load configuration for a run.
    ///
    /// `config_path` (CLI) wins; otherwise the platform config file is used
    /// when present; otherwise compiled defaults. The data root may then be
    /// overridden by CLI argument or `VVC_DATA_ROOT`.
    pub fn load(config_path: Option<&Path>, data_root_arg: Option<&str>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => vvc_common::config::read_toml_config(path)?,
            None => match vvc_common::config::default_config_file() {
                Ok(path) => vvc_common::config::read_toml_config(&path)?,
                Err(_) => CrawlerConfig::default(),
            },
        };

        if data_root_arg.is_some() || std::env::var("VVC_DATA_ROOT").is_ok() {
            config.data_root =
                vvc_common::config::resolve_data_root(data_root_arg, "VVC_DATA_ROOT");
        }

        Ok(config)
    }

    /// Manifest JSON path
    pub fn manifest_path(&self) -> PathBuf {
        self.data_root.join("manifest.json")
    }

    /// Processing queue JSON path
    pub fn queue_path(&self) -> PathBuf {
        self.data_root.join("processing_queue.json")
    }

    /// Newline-delimited collected-URLs file
    pub fn url_list_path(&self) -> PathBuf {
        self.data_root.join("collected_urls.txt")
    }

    /// Channel registry sidecar
    pub fn channels_path(&self) -> PathBuf {
        self.data_root.join("channels.json")
    }

    /// Directory downloads land in before filtering
    pub fn audio_dir(&self) -> PathBuf {
        self.data_root.join("audio")
    }

    /// Final per-language destination root
    pub fn final_audio_dir(&self) -> PathBuf {
        self.data_root.join("final_audio")
    }

    /// Reversible holding area for clips without a target voice
    pub fn no_voice_dir(&self) -> PathBuf {
        self.data_root.join("backups").join("no_voice")
    }

    /// Backup directory segregated by origin (`manifest`, `url`, `queue`,
    /// `channels`)
    pub fn backup_dir(&self, origin: &str) -> PathBuf {
        self.data_root.join("backups").join(origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CrawlerConfig::default();
        assert!(config.min_duration_seconds < config.max_duration_seconds);
        assert!(config.stale_timeout_secs >= config.heartbeat_secs * 2);
        assert!(config.claim_batch_size > 0);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = toml::from_str::<CrawlerConfig>("no_such_knob = true").unwrap_err();
        assert!(err.to_string().contains("no_such_knob"));
    }

    #[test]
    fn paths_derive_from_data_root() {
        let mut config = CrawlerConfig::default();
        config.data_root = PathBuf::from("/srv/vvc");
        assert_eq!(config.manifest_path(), PathBuf::from("/srv/vvc/manifest.json"));
        assert_eq!(
            config.queue_path(),
            PathBuf::from("/srv/vvc/processing_queue.json")
        );
        assert_eq!(
            config.backup_dir("queue"),
            PathBuf::from("/srv/vvc/backups/queue")
        );
    }
}
