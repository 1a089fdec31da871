//! Manifest record schema and load-time migrations
//!
//! Records are deserialized into one canonical typed structure. Legacy
//! manifests are upgraded by an explicit, ordered list of migration steps
//! applied once at load time; business logic never branches on "does this
//! key exist".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Download outcome for one video. Reflects the download, not the
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Success,
    Failed,
}

impl Default for DownloadStatus {
    fn default() -> Self {
        DownloadStatus::Pending
    }
}

/// One discovered video and everything known about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestRecord {
    /// Unique key within the manifest; records with an empty id are invalid
    /// and excluded from dedup and active processing
    pub video_id: String,
    /// Canonical source URL
    pub url: String,
    /// Filesystem location of the downloaded audio; None until a download
    /// succeeds
    pub output_path: Option<String>,
    pub status: DownloadStatus,
    /// True only once classification produced the full tuple; see
    /// [`ManifestRecord::needs_analysis`]
    pub classified: bool,
    pub containing_children_voice: Option<bool>,
    pub voice_analysis_confidence: Option<f64>,
    pub classification_timestamp: Option<DateTime<Utc>>,
    /// Detected-language bucket for final file placement; sanitized before
    /// use as a directory name
    pub language_folder: String,
    /// Whether `output_path` currently resolves to an existing file
    pub file_available: bool,
    pub uploaded: bool,
    /// Monotonic per-process counter embedded in generated filenames
    pub download_index: u64,
    pub duration_seconds: Option<f64>,
    pub title: String,
    /// Channel the video belongs to; empty when the platform withheld it
    pub channel: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Default for ManifestRecord {
    fn default() -> Self {
        Self {
            video_id: String::new(),
            url: String::new(),
            output_path: None,
            status: DownloadStatus::Pending,
            classified: false,
            containing_children_voice: None,
            voice_analysis_confidence: None,
            classification_timestamp: None,
            language_folder: String::new(),
            file_available: false,
            uploaded: false,
            download_index: 0,
            duration_seconds: None,
            title: String::new(),
            channel: String::new(),
            timestamp: None,
        }
    }
}

impl ManifestRecord {
    /// New pending record for a freshly discovered candidate.
    pub fn pending(video_id: &str, url: &str, title: &str, channel: &str) -> Self {
        Self {
            video_id: video_id.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            channel: channel.to_string(),
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }

    /// Records with a null/empty id carry no identity.
    pub fn has_valid_id(&self) -> bool {
        !self.video_id.trim().is_empty()
    }

    /// True when the record has never been classified, or claims to be
    /// classified but is missing part of the classification tuple. The
    /// incomplete case is treated as unclassified so the next Analyze pass
    /// self-heals it.
    pub fn needs_analysis(&self) -> bool {
        !self.classified
            || self.containing_children_voice.is_none()
            || self.voice_analysis_confidence.is_none()
            || self.classification_timestamp.is_none()
    }

    /// Fully classified and the target voice was found.
    pub fn is_qualified(&self) -> bool {
        !self.needs_analysis() && self.containing_children_voice == Some(true)
    }

    /// Language bucket safe for use as a directory name. Path separators and
    /// parent components are stripped; an empty result falls back to
    /// "unknown".
    pub fn sanitized_language_folder(&self) -> String {
        let cleaned: String = self
            .language_folder
            .chars()
            .filter(|c| !matches!(c, '/' | '\\' | ':'))
            .collect();
        let cleaned = cleaned.replace("..", "").trim().to_string();
        if cleaned.is_empty() {
            "unknown".to_string()
        } else {
            cleaned
        }
    }

    /// Filename component of `output_path`, if any.
    pub fn output_file_name(&self) -> Option<String> {
        self.output_path
            .as_deref()
            .and_then(|p| std::path::Path::new(p).file_name())
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
    }
}

/// One schema migration step applied to a raw record object.
type MigrationStep = fn(&mut serde_json::Map<String, serde_json::Value>) -> bool;

/// Ordered migration steps; each returns true when it changed the record.
const MIGRATIONS: &[(&str, MigrationStep)] = &[
    ("rename has_children_voice", migrate_children_voice_rename),
    ("normalize legacy status values", migrate_status_values),
];

/// Upgrade a raw record object in place, logging every applied step.
pub fn migrate_record_value(raw: &mut serde_json::Value) {
    let Some(obj) = raw.as_object_mut() else {
        return;
    };

    for (name, step) in MIGRATIONS {
        if step(obj) {
            let video_id = obj
                .get("video_id")
                .and_then(|v| v.as_str())
                .unwrap_or("<no id>");
            tracing::info!(video_id, migration = name, "Applied manifest record migration");
        }
    }
}

fn migrate_children_voice_rename(obj: &mut serde_json::Map<String, serde_json::Value>) -> bool {
    if obj.contains_key("containing_children_voice") {
        // Canonical key present; drop the legacy one if both exist
        return obj.remove("has_children_voice").is_some();
    }
    match obj.remove("has_children_voice") {
        Some(value) => {
            obj.insert("containing_children_voice".to_string(), value);
            true
        }
        None => false,
    }
}

fn migrate_status_values(obj: &mut serde_json::Map<String, serde_json::Value>) -> bool {
    let Some(status) = obj.get("status").and_then(|v| v.as_str()) else {
        return false;
    };
    let canonical = match status {
        "completed" | "downloaded" => "success",
        "error" => "failed",
        _ => return false,
    };
    obj.insert(
        "status".to_string(),
        serde_json::Value::String(canonical.to_string()),
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incomplete_classification_needs_analysis() {
        let mut record = ManifestRecord::pending("a", "https://x/a", "t", "c");
        record.classified = true;
        record.containing_children_voice = Some(true);
        record.voice_analysis_confidence = Some(0.9);
        // classification_timestamp still missing
        assert!(record.needs_analysis());

        record.classification_timestamp = Some(Utc::now());
        assert!(!record.needs_analysis());
        assert!(record.is_qualified());
    }

    #[test]
    fn language_folder_sanitized() {
        let mut record = ManifestRecord::default();
        record.language_folder = "../..//vi".to_string();
        assert_eq!(record.sanitized_language_folder(), "vi");

        record.language_folder = "  ".to_string();
        assert_eq!(record.sanitized_language_folder(), "unknown");

        record.language_folder = "vi\\north".to_string();
        assert_eq!(record.sanitized_language_folder(), "vinorth");
    }

    #[test]
    fn legacy_children_voice_key_renamed() {
        let mut raw = json!({
            "video_id": "a",
            "url": "https://x/a",
            "has_children_voice": true,
        });
        migrate_record_value(&mut raw);

        let record: ManifestRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.containing_children_voice, Some(true));
    }

    #[test]
    fn canonical_key_wins_over_legacy() {
        let mut raw = json!({
            "video_id": "a",
            "containing_children_voice": false,
            "has_children_voice": true,
        });
        migrate_record_value(&mut raw);

        let record: ManifestRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.containing_children_voice, Some(false));
    }

    #[test]
    fn legacy_status_values_normalized() {
        let mut raw = json!({"video_id": "a", "status": "completed"});
        migrate_record_value(&mut raw);
        let record: ManifestRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.status, DownloadStatus::Success);

        let mut raw = json!({"video_id": "b", "status": "error"});
        migrate_record_value(&mut raw);
        let record: ManifestRecord = serde_json::from_value(raw).unwrap();
        assert_eq!(record.status, DownloadStatus::Failed);
    }
}
