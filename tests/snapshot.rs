use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use skv::{DocStore, ExpirySpec, SessionRegistry, SnapshotReader, SnapshotWriter};
use tempfile::TempDir;
use walkdir::WalkDir;

#[test]
fn registry_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut registry = SessionRegistry::new();
    registry
        .start(1, false, None)
        .unwrap()
        .set("x".to_string(), json!(1));
    registry
        .start(2, false, None)
        .unwrap()
        .set("y".to_string(), json!("z"));

    let writer = SnapshotWriter::new(dir.path());
    let snapshot = writer.save_registry(&registry, "backup", None).unwrap();
    assert_eq!(snapshot.sessions, 2);
    assert_eq!(snapshot.keys, 2);

    let mut restored = SessionRegistry::new();
    let reader = SnapshotReader::new(dir.path());
    let result = reader.load_registry("backup", &mut restored).unwrap();

    assert_eq!(result.sessions, 2);
    assert_eq!(result.keys, 2);
    assert_eq!(restored.count_sessions(), 2);
    assert_eq!(restored.count_keys(), 2);
    assert_eq!(restored.session(1).unwrap().store().get("x"), Some(&json!(1)));
    assert_eq!(restored.session(2).unwrap().store().get("y"), Some(&json!("z")));
}

#[test]
fn the_most_recent_save_wins() {
    let dir = TempDir::new().unwrap();
    let writer = SnapshotWriter::new(dir.path());

    let mut registry = SessionRegistry::new();
    registry
        .start(1, false, None)
        .unwrap()
        .set("x".to_string(), json!("old"));
    writer.save_registry(&registry, "backup", None).unwrap();

    registry
        .get_store(1)
        .unwrap()
        .set("x".to_string(), json!("new"));
    writer.save_registry(&registry, "backup", None).unwrap();

    let mut restored = SessionRegistry::new();
    SnapshotReader::new(dir.path())
        .load_registry("backup", &mut restored)
        .unwrap();

    assert_eq!(restored.count_sessions(), 1);
    assert_eq!(
        restored.session(1).unwrap().store().get("x"),
        Some(&json!("new"))
    );
}

#[test]
fn session_settings_survive_the_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut registry = SessionRegistry::new();
    registry.start(
        9,
        true,
        Some(ExpirySpec {
            duration: Duration::from_secs(60),
            delete_on_expire: true,
        }),
    );

    SnapshotWriter::new(dir.path())
        .save_registry(&registry, "backup", None)
        .unwrap();

    let mut restored = SessionRegistry::new();
    SnapshotReader::new(dir.path())
        .load_registry("backup", &mut restored)
        .unwrap();

    let session = restored.session(9).unwrap();
    assert!(session.shared());
    let spec = session.expiry().unwrap();
    assert_eq!(spec.duration, Duration::from_secs(60));
    assert!(spec.delete_on_expire);
    // the restored session is back in the expiry index
    assert_eq!(restored.count_expiring(), 1);
}

#[test]
fn a_large_save_spans_multiple_chunks() {
    let dir = TempDir::new().unwrap();
    let mut rng = SmallRng::seed_from_u64(42);
    let mut registry = SessionRegistry::new();

    for token in 1..=50 {
        let store = registry.start(token, false, None).unwrap();
        let filler: String = (0..200).map(|_| rng.gen_range('a'..='z')).collect();
        store.set("payload".to_string(), json!(filler));
    }

    // a 2 KiB cap forces several chunk files for ~50 records
    let writer = SnapshotWriter::with_chunk_limit(dir.path(), 2 * 1024);
    writer.save_registry(&registry, "bulk", None).unwrap();

    let chunk_count = WalkDir::new(dir.path())
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().parent().and_then(Path::file_name) == Some("data".as_ref())
        })
        .count();
    assert!(chunk_count >= 2, "expected >= 2 chunks, got {}", chunk_count);

    let mut restored = SessionRegistry::new();
    let result = SnapshotReader::new(dir.path())
        .load_registry("bulk", &mut restored)
        .unwrap();
    assert_eq!(result.sessions, 50);
    assert_eq!(result.keys, 50);
    assert_eq!(restored.count_sessions(), 50);
}

#[test]
fn a_selected_save_excludes_other_sessions() {
    let dir = TempDir::new().unwrap();
    let mut registry = SessionRegistry::new();
    for token in [1, 2, 3] {
        registry
            .start(token, false, None)
            .unwrap()
            .set("k".to_string(), json!(token));
    }

    let selection: HashSet<u64> = vec![1, 3].into_iter().collect();
    let snapshot = SnapshotWriter::new(dir.path())
        .save_registry(&registry, "partial", Some(&selection))
        .unwrap();
    assert_eq!(snapshot.sessions, 2);

    let mut restored = SessionRegistry::new();
    SnapshotReader::new(dir.path())
        .load_registry("partial", &mut restored)
        .unwrap();
    assert!(restored.contains(1));
    assert!(!restored.contains(2));
    assert!(restored.contains(3));
}

#[test]
fn raw_store_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut store = DocStore::new();
    store.set("a".to_string(), json!({"n": 1}));
    store.set("b".to_string(), json!([1, 2, 3]));

    let snapshot = SnapshotWriter::new(dir.path()).save_store(&store, "raw").unwrap();
    assert_eq!(snapshot.sessions, 0);
    assert_eq!(snapshot.keys, 2);

    let mut restored = DocStore::new();
    let result = SnapshotReader::new(dir.path())
        .load_store("raw", &mut restored)
        .unwrap();
    assert_eq!(result.keys, 2);
    assert_eq!(restored.get("a"), Some(&json!({"n": 1})));
    assert_eq!(restored.get("b"), Some(&json!([1, 2, 3])));

    // the dataset holds raw keys, so a registry load must refuse it
    let mut registry = SessionRegistry::new();
    assert!(SnapshotReader::new(dir.path())
        .load_registry("raw", &mut registry)
        .is_err());
}

#[test]
fn loading_an_unknown_name_fails() {
    let dir = TempDir::new().unwrap();
    let mut registry = SessionRegistry::new();
    assert!(SnapshotReader::new(dir.path())
        .load_registry("nothing-here", &mut registry)
        .is_err());
}

// writes a dataset by hand so the metadata can be given an arbitrary status
fn write_dataset(root: &Path, name: &str, stamp: &str, status: u8, records: &str) {
    let dataset = root.join(name).join(stamp);
    fs::create_dir_all(dataset.join("md")).unwrap();
    fs::create_dir_all(dataset.join("data")).unwrap();
    let md = format!(
        r#"{{"name":"{}","version":2,"status":{},"start":1,"complete":2,"saveDataType":1}}"#,
        name, status
    );
    fs::write(dataset.join("md").join("md.json"), md).unwrap();
    fs::write(dataset.join("data").join("0"), records).unwrap();
}

#[test]
fn incomplete_datasets_are_rejected() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), "crashed", "100", 0, "[]");
    write_dataset(dir.path(), "failed", "100", 2, "[]");

    let reader = SnapshotReader::new(dir.path());
    let mut registry = SessionRegistry::new();
    assert!(reader.load_registry("crashed", &mut registry).is_err());
    assert!(reader.load_registry("failed", &mut registry).is_err());
    assert_eq!(registry.count_sessions(), 0);
}

#[test]
fn a_malformed_chunk_aborts_the_load() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path(), "garbled", "100", 1, "this is not json");

    let mut registry = SessionRegistry::new();
    assert!(SnapshotReader::new(dir.path())
        .load_registry("garbled", &mut registry)
        .is_err());
}

#[test]
fn datasets_use_the_expected_layout() {
    let dir = TempDir::new().unwrap();
    let mut registry = SessionRegistry::new();
    registry
        .start(5, true, None)
        .unwrap()
        .set("k".to_string(), json!("v"));

    let snapshot = SnapshotWriter::new(dir.path())
        .save_registry(&registry, "layout", None)
        .unwrap();

    // <root>/<name>/<timestamp>/md/md.json with a numeric timestamp directory
    let stamp = snapshot.dir.file_name().unwrap().to_str().unwrap();
    assert!(stamp.parse::<u128>().is_ok());
    assert_eq!(snapshot.dir.parent().unwrap(), dir.path().join("layout"));

    let metadata: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(snapshot.dir.join("md").join("md.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(metadata["name"], json!("layout"));
    assert_eq!(metadata["version"], json!(2));
    assert_eq!(metadata["status"], json!(1));
    assert_eq!(metadata["saveDataType"], json!(1));
    assert!(metadata["complete"].as_u64().unwrap() >= metadata["start"].as_u64().unwrap());

    // one chunk, a complete JSON array of session records
    let chunk: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(snapshot.dir.join("data").join("0")).unwrap())
            .unwrap();
    let records = chunk.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["sh"]["tkn"], json!(5));
    assert_eq!(records[0]["sh"]["shared"], json!(true));
    assert_eq!(records[0]["sh"]["expiry"]["duration"], json!(0));
    assert_eq!(records[0]["keys"]["k"], json!("v"));
}
