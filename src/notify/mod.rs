// src/notify/mod.rs
pub mod detail_cache;
pub mod email;
pub mod format;

use anyhow::Result;

use crate::event::Event;

pub use detail_cache::DetailCache;
pub use email::EmailNotifier;
pub use format::{compose_message, ComposedMessage};

/// Delivery channel for one routing group.
///
/// Called once per group per run; an error aborts the run before anything is
/// persisted, so the same events are retried next time.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, group: &str, events: &[Event], recipients: &[String]) -> Result<()>;

    fn name(&self) -> &'static str;
}
