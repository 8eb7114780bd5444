// tests/state_store.rs
use disaster_alerts::state::DedupState;
use disaster_alerts::Event;
use std::fs;

fn ev(source: &str, id: &str, updated: &str) -> Event {
    Event::new(id, source).with_updated(updated)
}

#[test]
fn recorded_events_stay_duplicates_across_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("state.json");

    let mut state = DedupState::load(&path).unwrap();
    let a = ev("usgs", "us1", "2025-01-01T00:00:00Z");
    let b = ev("nws", "urn:1", "2025-01-01T01:00:00Z");
    assert!(state.is_new(&a) && state.is_new(&b));

    state.record(&[a.clone(), b.clone()]);
    state.save(&path).unwrap();

    let loaded = DedupState::load(&path).unwrap();
    assert_eq!(loaded, state);
    assert!(!loaded.is_new(&a));
    assert!(!loaded.is_new(&b));
    assert!(loaded.is_new(&ev("usgs", "us2", "2025-01-01T00:00:00Z")));
    assert!(!dir.path().join("state").join("state.json.tmp").exists());
}

#[test]
fn lru_keeps_exactly_the_most_recent_ids() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let mut state = DedupState::with_lru_limit(3);
    for i in 0..5 {
        state.record(&[ev("usgs", &format!("q{i}"), "2025-01-01T00:00:00Z")]);
    }
    assert_eq!(state.ids("usgs"), ["q4", "q3", "q2"].map(String::from));

    // Re-recording moves to the front without growing the list.
    state.record(&[ev("usgs", "q2", "2025-01-01T00:00:00Z")]);
    assert_eq!(state.ids("usgs"), ["q2", "q4", "q3"].map(String::from));

    state.save(&path).unwrap();
    let loaded = DedupState::load(&path).unwrap();
    assert_eq!(loaded.lru_limit, 3);
    assert_eq!(loaded.ids("usgs").len(), 3);
    assert!(loaded.is_new(&ev("usgs", "q0", "2025-01-01T00:00:00Z")));
}

#[test]
fn watermark_is_advisory_only() {
    let mut state = DedupState::default();
    state.record(&[ev("nws", "late", "2025-06-01T00:00:00Z")]);
    // Older than the watermark but never seen: still new.
    assert!(state.is_new(&ev("nws", "early", "2024-01-01T00:00:00Z")));
    assert_eq!(state.last_updated("nws"), Some("2025-06-01T00:00:00Z"));
}

#[test]
fn corrupt_file_is_backed_up_once_and_reset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let backup = dir.path().join("state.json.bak");

    fs::write(&path, "{ not json").unwrap();
    let state = DedupState::load(&path).unwrap();
    assert!(state.providers.is_empty());
    assert!(!path.exists());
    assert_eq!(fs::read_to_string(&backup).unwrap(), "{ not json");

    // A second corruption must not clobber the first backup.
    fs::write(&path, "garbage #2").unwrap();
    let state = DedupState::load(&path).unwrap();
    assert!(state.providers.is_empty());
    assert!(!path.exists());
    assert_eq!(fs::read_to_string(&backup).unwrap(), "{ not json");
}

#[test]
fn wrongly_typed_values_are_dropped_not_the_whole_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(
        &path,
        r#"{"version": "one", "lru_limit": null, "providers": {
            "usgs": {"ids": ["q1", "q2"], "last_updated": 1735689600},
            "nws": {"ids": ["w1", null, 7, "w2"], "last_updated": "2025-01-01T00:00:00Z"},
            "gdacs": {"ids": "oops", "last_updated": false},
            "broken": [1, 2, 3]
        }}"#,
    )
    .unwrap();

    let state = DedupState::load(&path).unwrap();
    assert!(path.exists());
    assert!(!dir.path().join("state.json.bak").exists());

    assert_eq!(state.version, 1);
    assert!(state.lru_limit >= 1);
    assert!(!state.is_new(&ev("usgs", "q1", "")));
    assert!(!state.is_new(&ev("usgs", "q2", "")));
    assert_eq!(state.last_updated("usgs"), None);
    assert_eq!(state.ids("nws"), ["w1", "w2"].map(String::from));
    assert_eq!(state.last_updated("nws"), Some("2025-01-01T00:00:00Z"));
    assert!(state.ids("gdacs").is_empty());
    assert!(state.source("gdacs").is_some());
    assert!(state.source("broken").is_none());
}

#[test]
fn null_sections_load_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, r#"{"providers": null, "lru_limit": "25"}"#).unwrap();

    let state = DedupState::load(&path).unwrap();
    assert!(state.providers.is_empty());
    assert_eq!(state.lru_limit, 25);
    assert!(!dir.path().join("state.json.bak").exists());
}

#[test]
fn non_object_document_counts_as_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(&path, r#"["q1", "q2"]"#).unwrap();

    let state = DedupState::load(&path).unwrap();
    assert!(state.providers.is_empty());
    assert!(dir.path().join("state.json.bak").exists());
}

#[test]
fn partial_document_fills_defaults_and_ignores_unknown_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(
        &path,
        r#"{"providers": {"usgs": {"ids": ["a", "b"]}}, "written_by": "cron"}"#,
    )
    .unwrap();

    let state = DedupState::load(&path).unwrap();
    assert_eq!(state.version, 1);
    assert_eq!(state.ids("usgs"), ["a", "b"].map(String::from));
    assert_eq!(state.last_updated("usgs"), None);
    assert!(!state.is_new(&ev("usgs", "a", "")));
}

#[test]
fn configured_limit_trims_loaded_lists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    fs::write(
        &path,
        r#"{"version": 1, "lru_limit": 10, "providers": {"nws": {"ids": ["c", "b", "a"], "last_updated": null}}}"#,
    )
    .unwrap();

    let mut state = DedupState::load(&path).unwrap();
    state.set_lru_limit(2);
    assert_eq!(state.ids("nws"), ["c", "b"].map(String::from));
    assert_eq!(state.lru_limit, 2);
}
