//! Audio download and classification collaborators
//!
//! The pipeline consumes two black-box capabilities: "given a URL, return a
//! local audio file and duration" and "given an audio file, return a
//! language/voice verdict". The production implementation shells out to
//! yt-dlp and a configured classifier command; neither's internals are
//! modeled here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use vvc_common::{Error, Result};

/// Download result: audio path and duration, either may be absent when the
/// platform withholds them.
#[derive(Debug, Clone, Default)]
pub struct DownloadOutcome {
    pub audio_path: Option<PathBuf>,
    pub duration_seconds: Option<f64>,
}

/// Classifier verdict for one audio file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub is_target_language: bool,
    #[serde(default)]
    pub detected_language: Option<String>,
    pub has_target_voice: bool,
    pub confidence: f64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Seam over download + classify.
#[async_trait]
pub trait AudioCollaborator: Send + Sync {
    /// Download the audio of `url` into `dest_dir`, naming the file after
    /// `file_stem`.
    async fn download(&self, url: &str, dest_dir: &Path, file_stem: &str)
        -> Result<DownloadOutcome>;

    /// Classify a local audio file.
    async fn classify(&self, audio_path: &Path) -> Result<Classification>;
}

/// Seam over the upload destination.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, audio_path: &Path, video_id: &str) -> Result<()>;
}

/// Subprocess-backed uploader: runs the configured command with the audio
/// path and video id; a zero exit confirms the upload.
pub struct CommandUploader {
    cmd: Vec<String>,
    timeout: Duration,
}

impl CommandUploader {
    pub fn new(cmd: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            cmd,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl Uploader for CommandUploader {
    async fn upload(&self, audio_path: &Path, video_id: &str) -> Result<()> {
        let Some((program, args)) = self.cmd.split_first() else {
            return Err(Error::Config("uploader command not configured".to_string()));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(audio_path)
            .arg(video_id)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn uploader: {}", e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(Error::Transient(format!(
                    "uploader timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transient(format!(
                "uploader failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }
        Ok(())
    }
}

/// Subprocess-backed collaborator: yt-dlp for download, a configured
/// command printing JSON on stdout for classification.
pub struct CommandCollaborator {
    ytdlp_bin: String,
    classifier_cmd: Vec<String>,
    timeout: Duration,
}

impl CommandCollaborator {
    pub fn new(ytdlp_bin: String, classifier_cmd: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            ytdlp_bin,
            classifier_cmd,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Run a command with a timeout; the child is killed and reaped when
    /// the deadline passes.
    async fn run_with_timeout(&self, mut command: Command, what: &str) -> Result<std::process::Output> {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| {
            Error::Internal(format!("failed to spawn {}: {}", what, e))
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => Ok(output?),
            Err(_) => {
                tracing::error!(
                    what,
                    timeout_secs = self.timeout.as_secs(),
                    "Subprocess timed out; killing"
                );
                Err(Error::Transient(format!(
                    "{} timed out after {}s",
                    what,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl AudioCollaborator for CommandCollaborator {
    async fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_stem: &str,
    ) -> Result<DownloadOutcome> {
        std::fs::create_dir_all(dest_dir)?;

        let output_template = dest_dir.join(format!("{}.%(ext)s", file_stem));
        let mut command = Command::new(&self.ytdlp_bin);
        command
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--print")
            .arg("duration")
            .arg("--output")
            .arg(&output_template)
            .arg(url);
        command.kill_on_drop(true);

        let output = self.run_with_timeout(command, "yt-dlp").await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.lines().last().unwrap_or("unknown error").to_string();
            tracing::warn!(url = %url, error = %message, "yt-dlp failed");
            return Err(Error::Internal(format!("yt-dlp failed: {}", message)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut audio_path = None;
        let mut duration_seconds = None;
        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Ok(secs) = line.parse::<f64>() {
                duration_seconds = Some(secs);
            } else {
                audio_path = Some(PathBuf::from(line));
            }
        }

        // yt-dlp sometimes reports the pre-conversion path; fall back to the
        // mp3 the output template produces
        if let Some(path) = &audio_path {
            if !path.exists() {
                let fallback = dest_dir.join(format!("{}.mp3", file_stem));
                if fallback.exists() {
                    audio_path = Some(fallback);
                }
            }
        }

        Ok(DownloadOutcome {
            audio_path,
            duration_seconds,
        })
    }

    async fn classify(&self, audio_path: &Path) -> Result<Classification> {
        let Some((program, args)) = self.classifier_cmd.split_first() else {
            return Err(Error::Config("classifier command not configured".to_string()));
        };

        let mut command = Command::new(program);
        command.args(args).arg(audio_path);
        command.kill_on_drop(true);

        let output = self.run_with_timeout(command, "classifier").await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Internal(format!(
                "classifier failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        serde_json::from_slice(&output.stdout).map_err(|e| {
            Error::Internal(format!("classifier output was not valid JSON: {}", e))
        })
    }
}
