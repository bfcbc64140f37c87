use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::db::ExtractionRow;
use crate::parser::OutcomeKind;
use crate::settings::NotifySettings;

pub type EventSender = mpsc::UnboundedSender<Event>;

/// Row counts for one processing run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub parsed: usize,
    pub missing_description: usize,
    pub parse_failures: usize,
    pub fetch_failures: usize,
}

impl BatchSummary {
    pub fn record(&mut self, kind: OutcomeKind) {
        self.total += 1;
        match kind {
            OutcomeKind::Parsed => self.parsed += 1,
            OutcomeKind::MissingDescription => self.missing_description += 1,
            OutcomeKind::ParseFailure => self.parse_failures += 1,
            OutcomeKind::FetchFailure => self.fetch_failures += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RecordFailed {
        page_id: i64,
        url: String,
        kind: OutcomeKind,
        message: String,
        at: DateTime<Utc>,
    },
    BatchCompleted {
        message: String,
        summary: BatchSummary,
        at: DateTime<Utc>,
    },
}

impl Event {
    /// A failure event for parse and fetch failures; `None` otherwise.
    pub fn record_failed(row: &ExtractionRow) -> Option<Self> {
        if !row.outcome.is_failure() {
            return None;
        }
        Some(Event::RecordFailed {
            page_id: row.page_id,
            url: row.url.clone(),
            kind: row.outcome,
            message: row.error.clone().unwrap_or_default(),
            at: Utc::now(),
        })
    }

    pub fn batch_completed(message: &str, summary: BatchSummary) -> Self {
        Event::BatchCompleted {
            message: message.to_string(),
            summary,
            at: Utc::now(),
        }
    }

    /// One human-readable line.
    pub fn text(&self) -> String {
        match self {
            Event::RecordFailed { page_id, url, kind, message, .. } => format!(
                "Row {} ({}) failed with {}: {}",
                page_id,
                url,
                kind.as_str(),
                message
            ),
            Event::BatchCompleted { message, summary, .. } => format!(
                "{} {} rows: {} parsed, {} missing description, {} parse failures, {} fetch failures.",
                message,
                summary.total,
                summary.parsed,
                summary.missing_description,
                summary.parse_failures,
                summary.fetch_failures
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    event: &'a Event,
}

/// Where events go.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, event: &Event) -> Result<(), NotifyError>;
}

/// Writes each event as a log line.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn deliver(&self, event: &Event) -> Result<(), NotifyError> {
        match event {
            Event::RecordFailed { .. } => warn!("{}", event.text()),
            Event::BatchCompleted { .. } => info!("{}", event.text()),
        }
        Ok(())
    }
}

/// POSTs each event as JSON.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Sink for WebhookSink {
    async fn deliver(&self, event: &Event) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            text: event.text(),
            event,
        };
        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub struct Notifier {
    sinks: Vec<Box<dyn Sink>>,
    on_record_error: bool,
}

impl Notifier {
    pub fn new(sinks: Vec<Box<dyn Sink>>, on_record_error: bool) -> Self {
        Self {
            sinks,
            on_record_error,
        }
    }

    pub fn from_settings(settings: &NotifySettings, client: Client) -> Self {
        let mut sinks: Vec<Box<dyn Sink>> = vec![Box::new(LogSink)];
        if let Some(url) = &settings.webhook_url {
            sinks.push(Box::new(WebhookSink::new(client, url.clone())));
        }
        Self::new(sinks, settings.on_record_error)
    }

    fn wants(&self, event: &Event) -> bool {
        match event {
            Event::RecordFailed { .. } => self.on_record_error,
            Event::BatchCompleted { .. } => true,
        }
    }

    /// Send to every sink. A failing sink is logged and skipped.
    pub async fn dispatch(&self, event: &Event) {
        if !self.wants(event) {
            return;
        }
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event).await {
                warn!("Notification failed: {}", e);
            }
        }
    }

    /// Drain events from a channel until every sender is dropped.
    pub fn spawn(self) -> (EventSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                self.dispatch(&event).await;
            }
        });
        (tx, handle)
    }
}
