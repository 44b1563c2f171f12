//! Notifiers for chat channels and live web clients.
//!
//! Chat and email channels (Slack, Telegram, Postmark) do not get one message per change. A
//! [`BatchingNotifier`] queues the changes it accepts, and its [`Batcher`]
//! task turns each period's worth into a single message for a
//! [`MessageSink`].

use async_trait::async_trait;
use chrono::{DurationRound, TimeDelta};
use common::{Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use watcher::{ChangeEvent, Notifier, Resource};

/// Queue size between a batching notifier and its batcher
const BATCH_CHANNEL_SIZE: usize = 1024;

/// Timeout for outbound chat API requests
const SINK_TIMEOUT: Duration = Duration::from_secs(5);

/// Render a batch of events, one line per event:
/// `<time> <link>: <error or OK>`.
pub fn render_message(events: &[Arc<ChangeEvent>]) -> String {
    events
        .iter()
        .map(|event| {
            let at = event
                .detected_at
                .duration_round(TimeDelta::seconds(1))
                .unwrap_or(event.detected_at);
            let text = event.error_text().unwrap_or_else(|| "OK".to_string());
            format!("{} {}: {}", at.format("%Y-%m-%d %H:%M:%S UTC"), event.link(), text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Destination for rendered messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Notifier that feeds a [`Batcher`].
pub struct BatchingNotifier {
    name: String,
    tx: mpsc::Sender<Arc<ChangeEvent>>,
    only_errors: bool,
}

impl BatchingNotifier {
    /// Create the notifier and the batcher task that drains it.
    pub fn new(
        sink: Arc<dyn MessageSink>,
        message_period: Duration,
        only_errors: bool,
    ) -> (Self, Batcher) {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_SIZE);
        let notifier = Self {
            name: sink.name().to_string(),
            tx,
            only_errors,
        };
        let batcher = Batcher {
            rx,
            sink,
            message_period,
            batch: Vec::new(),
        };
        (notifier, batcher)
    }

    /// Whether `event` is worth a chat message.
    ///
    /// Only health flips and changes in an ongoing failure qualify; content
    /// changes alone do not.
    pub fn accepts(&self, event: &ChangeEvent) -> bool {
        event.status_flipped() && (!self.only_errors || !event.current.good())
    }
}

#[async_trait]
impl Notifier for BatchingNotifier {
    async fn notify(&self, event: Arc<ChangeEvent>) {
        if !self.accepts(&event) {
            return;
        }

        if self.tx.send(event).await.is_err() {
            warn!(notifier = %self.name, "Batcher stopped, dropping change");
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Collects accepted changes and sends one message per period.
pub struct Batcher {
    rx: mpsc::Receiver<Arc<ChangeEvent>>,
    sink: Arc<dyn MessageSink>,
    message_period: Duration,
    batch: Vec<Arc<ChangeEvent>>,
}

impl Batcher {
    /// Run until the notifier side is dropped, then flush what is left.
    pub async fn run(mut self) {
        info!(notifier = self.sink.name(), "Notifier started");

        let mut timer = interval(self.message_period);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(event) => {
                        debug!(notifier = self.sink.name(), link = event.link(), "Queued change");
                        self.batch.push(event);
                    }
                    None => {
                        self.flush().await;
                        break;
                    }
                },

                _ = timer.tick() => {
                    self.flush().await;
                }
            }
        }

        info!(notifier = self.sink.name(), "Notifier stopped");
    }

    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.batch);
        debug!(notifier = self.sink.name(), count = batch.len(), "Sending updates");

        let message = render_message(&batch);
        if let Err(e) = self.sink.send(&message).await {
            warn!(notifier = self.sink.name(), error = %e, "Failed to send message");
        }
    }
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(SINK_TIMEOUT)
        .build()
        .map_err(|e| Error::notify(format!("failed to build HTTP client: {}", e)))
}

/// Slack incoming webhook.
pub struct SlackSink {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackSink {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl MessageSink for SlackSink {
    async fn send(&self, text: &str) -> Result<()> {
        info!(notifier = "slack", "Sending message");

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| Error::notify(format!("slack request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notify(format!("slack returned {}", status)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "slack"
    }
}

/// Telegram bot, messaging every configured chat.
pub struct TelegramSink {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    users: Vec<i64>,
}

impl TelegramSink {
    pub fn new(bot_token: impl Into<String>, users: Vec<i64>) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            api_base: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            users,
        })
    }

    /// Point the sink at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn send_to(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| Error::notify(format!("telegram request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notify(format!("telegram returned {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSink for TelegramSink {
    async fn send(&self, text: &str) -> Result<()> {
        info!(notifier = "telegram", users = self.users.len(), "Sending message");

        let results = join_all(self.users.iter().map(|&user| self.send_to(user, text))).await;

        let mut failed = 0;
        for (user, result) in self.users.iter().zip(results) {
            if let Err(e) = result {
                warn!(notifier = "telegram", user, error = %e, "Failed to send message");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(Error::notify(format!(
                "telegram delivery failed for {} of {} chats",
                failed,
                self.users.len()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Postmark email API. One email per message, copied to every extra
/// recipient.
pub struct PostmarkSink {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from_email: String,
    emails: Vec<String>,
    subject: String,
}

impl PostmarkSink {
    pub fn new(
        api_key: impl Into<String>,
        from_email: impl Into<String>,
        emails: Vec<String>,
        subject: impl Into<String>,
    ) -> Result<Self> {
        if emails.is_empty() {
            return Err(Error::config("postmark needs at least one recipient"));
        }
        Ok(Self {
            client: http_client()?,
            api_url: "https://api.postmarkapp.com/email".to_string(),
            api_key: api_key.into(),
            from_email: from_email.into(),
            emails,
            subject: subject.into(),
        })
    }

    /// Send to another endpoint instead of the Postmark API.
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }
}

#[async_trait]
impl MessageSink for PostmarkSink {
    async fn send(&self, text: &str) -> Result<()> {
        info!(notifier = "postmark", recipients = self.emails.len(), "Sending message");

        let body = serde_json::json!({
            "From": self.from_email,
            "To": self.emails[0],
            "Cc": self.emails[1..].join(","),
            "Subject": self.subject,
            "TextBody": text,
        });
        let response = self
            .client
            .post(&self.api_url)
            .header("X-Postmark-Server-Token", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::notify(format!("postmark request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::notify(format!("postmark returned {}", status)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "postmark"
    }
}

/// Pushes the new snapshot of every changed resource to live web clients.
#[derive(Clone)]
pub struct WebNotifier {
    tx: broadcast::Sender<Resource>,
}

impl WebNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Resource> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for WebNotifier {
    async fn notify(&self, event: Arc<ChangeEvent>) {
        // No receivers just means nobody is watching.
        let _ = self.tx.send(event.current.clone());
    }

    fn name(&self) -> &str {
        "web"
    }
}
