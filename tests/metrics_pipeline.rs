// tests/metrics_pipeline.rs
use anyhow::Result;
use async_trait::async_trait;
use disaster_alerts::ingest::providers::usgs::UsgsProvider;
use disaster_alerts::ingest::types::SourceProvider;
use disaster_alerts::metrics::Metrics;
use disaster_alerts::notify::Notifier;
use disaster_alerts::{run_with, Event, Settings};
use std::collections::HashMap;

struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn deliver(&self, _group: &str, _events: &[Event], _recipients: &[String]) -> Result<()> {
        Ok(())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}

// Single test per binary: the recorder is process-global.
#[tokio::test]
async fn run_metrics_are_exposed_and_written() {
    let metrics = Metrics::init().expect("recorder");

    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.paths.state_file = dir.path().join("state.json");
    settings.thresholds.global.min_severity = Some("moderate".into());
    settings.recipients = HashMap::from([("default".to_string(), vec!["ops@example.com".to_string()])]);

    let fixture = std::fs::read_to_string("tests/fixtures/usgs_sample.geojson").expect("fixture");
    let providers: Vec<Box<dyn SourceProvider>> = vec![Box::new(UsgsProvider::from_fixture(&fixture))];

    let n = run_with(&settings, &providers, &NullNotifier).await.unwrap();
    assert_eq!(n, 2);
    // Second run: everything is a duplicate.
    assert_eq!(run_with(&settings, &providers, &NullNotifier).await.unwrap(), 0);

    let out = metrics.handle.render();
    assert!(out.contains("alerts_fetched_total"));
    assert!(out.contains("alerts_rejected_total"));
    assert!(out.contains("alerts_duplicate_total"));
    assert!(out.contains("alerts_notified_total"));
    assert!(out.contains("alerts_groups_sent_total"));
    assert!(out.contains("alerts_pipeline_last_run_ts"));
    assert!(out.contains("ingest_parse_ms"));

    let path = dir.path().join("metrics").join("alerts.prom");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    metrics.write_textfile(&path).unwrap();
    assert!(std::fs::read_to_string(&path).unwrap().contains("alerts_notified_total"));
}
