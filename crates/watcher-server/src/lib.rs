//! webwatch service
//!
//! Runs the [`watcher`] scheduler over a list of URLs and tells people when
//! something changes.
//!
//! # Components
//!
//! - **Config**: YAML settings and the URL list
//! - **Notifiers**: batched Slack, Telegram and Postmark messages, live web events
//! - **Web API**: resource listing, server-sent events, Prometheus metrics
//! - **Server**: wires everything together and handles shutdown

pub mod config;
pub mod http_server;
pub mod notifier;
pub mod server;
pub mod targets;

pub use config::{Config, ConfigError};
pub use http_server::{AppState, ResourceEntry};
pub use notifier::{
    BatchingNotifier, Batcher, MessageSink, PostmarkSink, SlackSink, TelegramSink, WebNotifier,
    render_message,
};
pub use server::WatchServer;
pub use targets::load_targets;
