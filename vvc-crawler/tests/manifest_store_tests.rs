//! Manifest persistence properties: uniqueness, round-trip stability and
//! legacy-schema migration.

use vvc_crawler::manifest::{DownloadStatus, Manifest, ManifestRecord, ManifestStore};

fn store(dir: &tempfile::TempDir) -> ManifestStore {
    ManifestStore::new(
        dir.path().join("manifest.json"),
        dir.path().join("backups").join("url"),
    )
}

#[test]
fn video_id_stays_unique_across_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);

    // Repeated load/mutate/save cycles, some of them injecting duplicates
    let mut manifest = s.load().unwrap();
    for round in 0..5 {
        for i in 0..4 {
            let id = format!("v{}", i);
            let record = ManifestRecord::pending(&id, &format!("https://x/{}?r={}", id, round), "", "");
            manifest.records.push(record);
        }
        s.save(&mut manifest).unwrap();
        manifest = s.load().unwrap();

        let mut ids: Vec<&str> = manifest
            .records
            .iter()
            .filter(|r| r.has_valid_id())
            .map(|r| r.video_id.as_str())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4, "round {}: duplicate ids survived", round);
    }
}

#[test]
fn save_load_round_trip_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);

    let mut manifest = Manifest::default();
    let mut record = ManifestRecord::pending("a", "https://x/a", "title", "chan");
    record.status = DownloadStatus::Success;
    record.duration_seconds = Some(42.0);
    record.output_path = Some("/data/audio/clip_000001_a.mp3".to_string());
    manifest.records.push(record);
    manifest
        .records
        .push(ManifestRecord::pending("b", "https://x/b", "", ""));

    s.save(&mut manifest).unwrap();
    let first = std::fs::read(dir.path().join("manifest.json")).unwrap();

    // save(load(path)) leaves the document byte-identical
    let mut reloaded = s.load().unwrap();
    s.save(&mut reloaded).unwrap();
    let second = std::fs::read(dir.path().join("manifest.json")).unwrap();

    assert_eq!(first, second);
}

#[test]
fn legacy_document_migrates_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(
        &path,
        r#"{
  "total_duration_seconds": 10.0,
  "records": [
    {
      "video_id": "old1",
      "url": "https://x/old1",
      "status": "completed",
      "has_children_voice": true,
      "classified": true,
      "voice_analysis_confidence": 0.7,
      "classification_timestamp": "2024-05-01T10:00:00Z",
      "duration_seconds": 10.0
    }
  ]
}"#,
    )
    .unwrap();

    let s = store(&dir);
    let manifest = s.load().unwrap();
    let record = manifest.get("old1").unwrap();

    assert_eq!(record.status, DownloadStatus::Success);
    assert_eq!(record.containing_children_voice, Some(true));
    assert!(!record.needs_analysis());
}

#[test]
fn empty_id_records_do_not_join_active_processing() {
    let dir = tempfile::tempdir().unwrap();
    let s = store(&dir);

    let mut manifest = Manifest::default();
    manifest
        .records
        .push(ManifestRecord::pending("", "https://x/ghost", "", ""));
    s.save(&mut manifest).unwrap();

    let loaded = s.load().unwrap();
    assert_eq!(loaded.records.len(), 1);
    assert!(loaded.get("").is_none());
}
