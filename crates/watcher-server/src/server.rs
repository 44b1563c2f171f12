//! Wiring of the store, checker, scheduler, notifiers and web API.

use crate::config::Config;
use crate::http_server::{self, AppState};
use crate::notifier::{
    BatchingNotifier, MessageSink, PostmarkSink, SlackSink, TelegramSink, WebNotifier,
};
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use watcher::{
    HttpChecker, NotificationBus, Notifier, Scheduler, SqliteStore, WatcherMetrics, bootstrap,
};

/// How long pending chat messages may take to go out on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The webwatch service
pub struct WatchServer {
    config: Config,
    links: Vec<String>,
}

impl WatchServer {
    pub fn new(config: Config, links: Vec<String>) -> Self {
        Self { config, links }
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
    }

    /// Run until `shutdown` completes.
    ///
    /// Startup failures (state database, initial load, web listener) are
    /// returned as errors. Once running, the service only stops on shutdown.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        let config = self.config;
        info!(links = self.links.len(), "Starting webwatch");

        let store = Arc::new(
            SqliteStore::open(&config.watcher.db_path)
                .await
                .with_context(|| format!("failed to open {}", config.watcher.db_path))?,
        );
        let checker = Arc::new(HttpChecker::new(config.watcher.check_timeout)?);

        let resources = bootstrap(&self.links, store.as_ref(), checker.as_ref())
            .await
            .context("failed to load resources")?;

        let metrics = if config.metrics.enabled {
            Some(Arc::new(WatcherMetrics::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
        let mut batchers = Vec::new();

        if config.slack.enabled {
            let url = config.slack.webhook_url.clone().unwrap_or_default();
            let sink = SlackSink::new(url)?;
            batchers.push(Self::add_batching(
                &mut notifiers,
                Arc::new(sink),
                config.slack.message_period,
                config.slack.only_errors,
            ));
        }

        if config.telegram.enabled {
            let token = config.telegram.bot_token.clone().unwrap_or_default();
            let sink = TelegramSink::new(token, config.telegram.users.clone())?;
            batchers.push(Self::add_batching(
                &mut notifiers,
                Arc::new(sink),
                config.telegram.message_period,
                config.telegram.only_errors,
            ));
        }

        if config.postmark.enabled {
            let postmark = &config.postmark;
            let sink = PostmarkSink::new(
                postmark.api_key.clone().unwrap_or_default(),
                postmark.from_email.clone().unwrap_or_default(),
                postmark.emails.clone(),
                postmark.subject.clone(),
            )?;
            batchers.push(Self::add_batching(
                &mut notifiers,
                Arc::new(sink),
                postmark.message_period,
                postmark.only_errors,
            ));
        }

        let web = if config.web.enabled {
            let listener = TcpListener::bind(&config.web.listen_addr)
                .await
                .with_context(|| format!("failed to bind {}", config.web.listen_addr))?;
            let events = WebNotifier::new(config.web.channel_size);
            notifiers.push(Arc::new(events.clone()));
            Some((listener, events))
        } else {
            None
        };

        info!(notifiers = notifiers.len(), "Notifiers configured");

        let scheduler = Scheduler::new(
            resources,
            config.to_scheduler_config(),
            checker,
            store,
            NotificationBus::new(notifiers),
            metrics.clone(),
        )?;
        let stop = scheduler.stop_handle();

        let web_handle = web.map(|(listener, events)| {
            let state = AppState {
                view: scheduler.view(),
                events,
                metrics,
            };
            tokio::spawn(async move {
                if let Err(e) = http_server::serve(listener, state).await {
                    warn!(error = %e, "Web server error");
                }
            })
        });

        let mut scheduler_handle = tokio::spawn(scheduler.run());

        let exited = tokio::select! {
            _ = shutdown => false,
            result = &mut scheduler_handle => {
                result.context("scheduler task failed")?;
                true
            }
        };

        if exited {
            warn!("Scheduler exited");
        } else {
            stop.stop();
            scheduler_handle.await.context("scheduler task failed")?;
        }

        if let Some(handle) = web_handle {
            handle.abort();
        }

        // The scheduler owned the notifiers; with it gone the batchers
        // flush what they hold and exit.
        for handle in batchers {
            if tokio::time::timeout(DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Timed out sending pending notifications");
            }
        }

        info!("webwatch stopped");
        Ok(())
    }

    fn add_batching(
        notifiers: &mut Vec<Arc<dyn Notifier>>,
        sink: Arc<dyn MessageSink>,
        message_period: Duration,
        only_errors: bool,
    ) -> JoinHandle<()> {
        info!(notifier = sink.name(), ?message_period, only_errors, "Notifier enabled");
        let (notifier, batcher) = BatchingNotifier::new(sink, message_period, only_errors);
        notifiers.push(Arc::new(notifier));
        tokio::spawn(batcher.run())
    }
}
