//! Shared test fixtures: scripted collaborators and pipeline contexts over
//! a temporary data root.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use vvc_common::{Error, Result};
use vvc_crawler::config::CrawlerConfig;
use vvc_crawler::pipeline::PipelineContext;
use vvc_crawler::services::{
    AudioCollaborator, Classification, DownloadOutcome, PlatformClient, SearchPage,
};

/// Platform client that always returns an empty page.
pub struct EmptyPlatform;

#[async_trait]
impl PlatformClient for EmptyPlatform {
    async fn search_page(&self, _query: &str, _cursor: Option<&str>) -> Result<SearchPage> {
        Ok(SearchPage::default())
    }

    async fn channel_page(&self, _username: &str, _cursor: Option<&str>) -> Result<SearchPage> {
        Ok(SearchPage::default())
    }
}

/// Collaborator double: downloads write a real file into the destination,
/// classifications come from a per-video script.
pub struct ScriptedCollaborator {
    pub verdicts: Mutex<HashMap<String, Classification>>,
    pub default_verdict: Classification,
    pub fail_download_for: Mutex<Vec<String>>,
    pub download_calls: AtomicUsize,
    pub classify_calls: AtomicUsize,
}

impl ScriptedCollaborator {
    pub fn new() -> Self {
        Self {
            verdicts: Mutex::new(HashMap::new()),
            default_verdict: qualified_verdict("vi"),
            fail_download_for: Mutex::new(Vec::new()),
            download_calls: AtomicUsize::new(0),
            classify_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_default_verdict(verdict: Classification) -> Self {
        Self {
            default_verdict: verdict,
            ..Self::new()
        }
    }

    pub fn script(&self, video_id: &str, verdict: Classification) {
        self.verdicts
            .lock()
            .unwrap()
            .insert(video_id.to_string(), verdict);
    }

    pub fn fail_download(&self, video_id: &str) {
        self.fail_download_for
            .lock()
            .unwrap()
            .push(video_id.to_string());
    }
}

pub fn qualified_verdict(language: &str) -> Classification {
    Classification {
        is_target_language: true,
        detected_language: Some(language.to_string()),
        has_target_voice: true,
        confidence: 0.9,
        error: None,
    }
}

pub fn unqualified_verdict() -> Classification {
    Classification {
        is_target_language: false,
        detected_language: Some("en".to_string()),
        has_target_voice: false,
        confidence: 0.8,
        error: None,
    }
}

#[async_trait]
impl AudioCollaborator for ScriptedCollaborator {
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_stem: &str,
    ) -> Result<DownloadOutcome> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_download_for
            .lock()
            .unwrap()
            .iter()
            .any(|id| url.contains(id.as_str()))
        {
            return Err(Error::Internal(format!("scripted download failure: {}", url)));
        }

        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(format!("{}.mp3", file_stem));
        std::fs::write(&path, b"scripted audio")?;
        Ok(DownloadOutcome {
            audio_path: Some(path),
            duration_seconds: Some(30.0),
        })
    }

    async fn classify(&self, audio_path: &Path) -> Result<Classification> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);

        let haystack = audio_path.display().to_string();
        let verdicts = self.verdicts.lock().unwrap();
        let verdict = verdicts
            .iter()
            .find(|(video_id, _)| haystack.contains(video_id.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_verdict.clone());
        Ok(verdict)
    }
}

pub fn test_config(data_root: &Path) -> CrawlerConfig {
    CrawlerConfig {
        data_root: data_root.to_path_buf(),
        download_workers: 2,
        page_cooldown_ms: 0,
        retry_backoff_ms: 1,
        stale_timeout_secs: 300,
        heartbeat_secs: 30,
        ..CrawlerConfig::default()
    }
}

pub fn make_ctx(data_root: &Path, audio: Arc<dyn AudioCollaborator>) -> PipelineContext {
    PipelineContext::new(
        test_config(data_root),
        Arc::new(EmptyPlatform),
        audio,
        None,
        CancellationToken::new(),
    )
    .unwrap()
}

pub fn manifest_bytes(data_root: &Path) -> Vec<u8> {
    std::fs::read(data_root.join("manifest.json")).unwrap()
}

pub fn manifest_path(data_root: &Path) -> PathBuf {
    data_root.join("manifest.json")
}
