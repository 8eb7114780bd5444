// tests/pipeline_e2e.rs
use anyhow::{bail, Result};
use async_trait::async_trait;
use disaster_alerts::config::{EarthquakeThresholds, Settings};
use disaster_alerts::ingest::types::SourceProvider;
use disaster_alerts::notify::Notifier;
use disaster_alerts::{run_with, DedupState, Event};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

struct MockProvider {
    name: &'static str,
    events: Vec<Event>,
}

#[async_trait]
impl SourceProvider for MockProvider {
    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        Ok(self.events.clone())
    }
    fn name(&self) -> &'static str {
        self.name
    }
}

struct FailingProvider;

#[async_trait]
impl SourceProvider for FailingProvider {
    async fn fetch_latest(&self) -> Result<Vec<Event>> {
        bail!("upstream returned 503")
    }
    fn name(&self) -> &'static str {
        "nws"
    }
}

#[derive(Default)]
struct RecordingNotifier {
    fail: bool,
    sent: Mutex<Vec<(String, Vec<String>, Vec<String>)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, group: &str, events: &[Event], recipients: &[String]) -> Result<()> {
        if self.fail {
            bail!("smtp: connection refused");
        }
        self.sent.lock().unwrap().push((
            group.to_string(),
            events.iter().map(|e| e.id.clone()).collect(),
            recipients.to_vec(),
        ));
        Ok(())
    }
    fn name(&self) -> &'static str {
        "recording"
    }
}

fn quake(id: &str, mag: f64) -> Event {
    Event::new(id, "usgs")
        .with_title(format!("M {mag:.1} - test"))
        .with_attr("mag", mag)
        .with_updated("2025-01-01T00:00:00Z")
}

fn settings(state_file: &Path) -> Settings {
    let mut s = Settings::default();
    s.paths.state_file = state_file.to_path_buf();
    s.thresholds.earthquake = Some(EarthquakeThresholds {
        min_magnitude: Some(3.0),
        max_depth_km: None,
    });
    s.recipients = HashMap::from([("default".to_string(), vec!["ops@example.com".to_string()])]);
    s
}

fn usgs(events: Vec<Event>) -> Vec<Box<dyn SourceProvider>> {
    vec![Box::new(MockProvider { name: "usgs", events })]
}

#[tokio::test]
async fn notifies_once_then_only_new_events() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let s = settings(&state_file);

    let notifier = RecordingNotifier::default();
    let n = run_with(&s, &usgs(vec![quake("q1", 2.0), quake("q2", 4.5)]), &notifier)
        .await
        .unwrap();
    assert_eq!(n, 1);
    {
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "default");
        assert_eq!(sent[0].1, vec!["q2"]);
        assert_eq!(sent[0].2, vec!["ops@example.com"]);
    }

    let state = DedupState::load(&state_file).unwrap();
    assert_eq!(state.ids("usgs"), ["q2".to_string()]);
    assert_eq!(state.last_updated("usgs"), Some("2025-01-01T00:00:00Z"));

    let notifier = RecordingNotifier::default();
    let n = run_with(
        &s,
        &usgs(vec![quake("q1", 2.0), quake("q2", 4.5), quake("q3", 5.0)]),
        &notifier,
    )
    .await
    .unwrap();
    assert_eq!(n, 1);
    assert_eq!(notifier.sent.lock().unwrap()[0].1, vec!["q3"]);

    let state = DedupState::load(&state_file).unwrap();
    assert_eq!(state.ids("usgs"), ["q3".to_string(), "q2".to_string()]);
}

#[tokio::test]
async fn delivery_failure_persists_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let s = settings(&state_file);

    let failing = RecordingNotifier {
        fail: true,
        ..Default::default()
    };
    let err = run_with(&s, &usgs(vec![quake("q2", 4.5)]), &failing)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("connection refused"));
    assert!(!state_file.exists());

    // Same event goes out on the next healthy run.
    let notifier = RecordingNotifier::default();
    let n = run_with(&s, &usgs(vec![quake("q2", 4.5)]), &notifier).await.unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn group_without_recipients_is_skipped_and_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let mut s = settings(&state_file);
    s.app.routing.fallback_to_default = false;

    let events = vec![
        quake("q2", 4.5),
        Event::new("w1", "nws").with_routing_key("severe").with_severity("Severe"),
    ];
    let providers: Vec<Box<dyn SourceProvider>> = vec![Box::new(MockProvider { name: "mixed", events })];

    let notifier = RecordingNotifier::default();
    let n = run_with(&s, &providers, &notifier).await.unwrap();
    assert_eq!(n, 1);

    let state = DedupState::load(&state_file).unwrap();
    assert_eq!(state.ids("usgs"), ["q2".to_string()]);
    assert!(state.ids("nws").is_empty());
}

#[tokio::test]
async fn missing_id_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(&dir.path().join("state.json"));

    let notifier = RecordingNotifier::default();
    let err = run_with(&s, &usgs(vec![quake("q2", 4.5), quake(" ", 5.0)]), &notifier)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("usgs") && msg.contains("#1"), "{msg}");
    assert!(notifier.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failing_provider_does_not_stop_the_others() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(&dir.path().join("state.json"));

    let providers: Vec<Box<dyn SourceProvider>> = vec![
        Box::new(FailingProvider),
        Box::new(MockProvider {
            name: "usgs",
            events: vec![quake("q2", 4.5)],
        }),
    ];
    let notifier = RecordingNotifier::default();
    assert_eq!(run_with(&s, &providers, &notifier).await.unwrap(), 1);
}

#[tokio::test]
async fn untagged_events_take_the_provider_name() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("state.json");
    let s = settings(&state_file);

    let mut ev = quake("q9", 4.0);
    ev.source = String::new();
    let notifier = RecordingNotifier::default();
    assert_eq!(run_with(&s, &usgs(vec![ev]), &notifier).await.unwrap(), 1);

    let state = DedupState::load(&state_file).unwrap();
    assert_eq!(state.ids("usgs"), ["q9".to_string()]);
}

#[tokio::test]
async fn empty_fetch_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let state_file = dir.path().join("nested").join("state.json");
    let s = settings(&state_file);

    let notifier = RecordingNotifier::default();
    assert_eq!(run_with(&s, &usgs(vec![]), &notifier).await.unwrap(), 0);
    assert!(!state_file.exists());
}
