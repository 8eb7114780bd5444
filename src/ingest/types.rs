// src/ingest/types.rs
use anyhow::Result;

use crate::event::Event;

/// A hazard feed. Implementations normalize their records into [`Event`]s,
/// skip individual malformed features themselves, and return an error only
/// when the feed as a whole could not be fetched or parsed.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<Event>>;
    /// Source tag stamped on records that arrive without one.
    fn name(&self) -> &'static str;
}
