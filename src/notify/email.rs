// src/notify/email.rs
use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::Tz;
use lettre::message::{Mailbox, Message, MultiPart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use reqwest::Client;
use std::sync::Arc;

use super::{format::compose_message, DetailCache, Notifier};
use crate::config::{EmailConfig, Settings};
use crate::event::Event;

/// SMTP delivery (multipart text + HTML), one message per routing group with
/// every recipient of the group on the `To:` line.
pub struct EmailNotifier {
    config: EmailConfig,
    client: Client,
    details: Arc<DetailCache>,
    display_tz: Tz,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig, client: Client, details: Arc<DetailCache>) -> Self {
        Self {
            config,
            client,
            details,
            display_tz: Tz::UTC,
        }
    }

    pub fn with_display_tz(mut self, tz: Tz) -> Self {
        self.display_tz = tz;
        self
    }

    pub fn from_settings(settings: &Settings, client: Client, details: Arc<DetailCache>) -> Self {
        Self::new(settings.email.clone(), client, details).with_display_tz(settings.app.display_tz())
    }

    fn build_message(
        &self,
        from: &str,
        group: &str,
        events: &[Event],
        recipients: &[String],
        wkts: &[Option<String>],
    ) -> Result<Message> {
        let composed = compose_message(group, events, wkts, Utc::now(), self.display_tz);

        let from: Mailbox = from
            .parse()
            .with_context(|| format!("invalid sender address {from:?}"))?;
        let mut builder = Message::builder().from(from).subject(composed.subject);
        for r in recipients {
            let to: Mailbox = r
                .trim()
                .parse()
                .with_context(|| format!("invalid recipient address {r:?}"))?;
            builder = builder.to(to);
        }
        builder
            .multipart(MultiPart::alternative_plain_html(composed.text, composed.html))
            .context("build email")
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn deliver(&self, group: &str, events: &[Event], recipients: &[String]) -> Result<()> {
        let (user, password, from) = self.config.require()?;

        let wkts = self.details.wkts_for(&self.client, events).await;
        let msg = self.build_message(from, group, events, recipients, &wkts)?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.smtp_host)
            .with_context(|| format!("invalid SMTP_HOST {:?}", self.config.smtp_host))?
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .build();

        tracing::debug!(group, recipients = recipients.len(), "sending email");
        mailer.send(msg).await.context("send email")?;
        tracing::info!(
            group,
            events = events.len(),
            recipients = %recipients.join(", "),
            "email sent"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
