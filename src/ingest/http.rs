// src/ingest/http.rs
//! Shared GET-JSON helper for feeds and detail documents. Single attempt;
//! callers decide what a failure means.

use anyhow::{bail, Context, Result};
use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

pub const ENV_USER_AGENT: &str = "DISASTER_ALERTS_UA";
const DEFAULT_UA: &str = concat!("disaster-alerts/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const ACCEPT: &str = "application/geo+json, application/json;q=0.9, */*;q=0.1";

pub fn user_agent() -> String {
    std::env::var(ENV_USER_AGENT).unwrap_or_else(|_| DEFAULT_UA.to_string())
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .user_agent(user_agent())
        .timeout(DEFAULT_TIMEOUT)
        .build()
        .context("building http client")
}

/// GET `url` and decode the body as JSON. `304 Not Modified` yields an empty
/// object; other non-2xx statuses are errors.
pub async fn get_json(client: &Client, url: &str, query: &[(&str, String)]) -> Result<Value> {
    let resp = client
        .get(url)
        .header(header::ACCEPT, ACCEPT)
        .query(query)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;

    let status = resp.status();
    if status == StatusCode::NOT_MODIFIED {
        tracing::debug!(url, "304 not modified");
        return Ok(Value::Object(Default::default()));
    }
    if !status.is_success() {
        bail!("GET {url} -> HTTP {status}");
    }

    let ctype = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !ctype.contains("json") {
        tracing::warn!(url, content_type = %ctype, "expected JSON content type");
    }

    let body = resp.text().await.with_context(|| format!("reading body of {url}"))?;
    serde_json::from_str(&body).with_context(|| format!("decoding JSON from {url}"))
}
