//! Change-detecting HTTP watcher.
//!
//! This crate watches a fixed list of URLs and reports when they change:
//! - content changes, detected through a SHA-256 fingerprint of the body
//! - status changes and transport errors
//!
//! # Features
//!
//! - One polling scheduler for any number of resources, no per-resource timers
//! - Separate recheck intervals for good and failing resources
//! - At most one check in flight per resource
//! - State persisted in SQLite and restored on restart
//! - Pluggable notifiers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use watcher::{
//!     HttpChecker, NotificationBus, Scheduler, SchedulerConfig, SqliteStore, bootstrap,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let links = vec!["https://example.com/".to_string()];
//! let store = Arc::new(SqliteStore::open("./.watcher.db").await?);
//! let checker = Arc::new(HttpChecker::new(Duration::from_secs(5))?);
//!
//! let resources = bootstrap(&links, store.as_ref(), checker.as_ref()).await?;
//! let scheduler = Scheduler::new(
//!     resources,
//!     SchedulerConfig::default(),
//!     checker,
//!     store,
//!     NotificationBus::default(),
//!     None,
//! )?;
//!
//! let view = scheduler.view();
//! tokio::spawn(scheduler.run());
//!
//! for resource in view.snapshot() {
//!     println!("{} good={}", resource.link, resource.good());
//! }
//! # Ok(())
//! # }
//! ```

pub mod checker;
pub mod detector;
pub mod metrics;
pub mod notifier;
pub mod scheduler;
pub mod store;
pub mod types;

pub use checker::{Checker, HttpChecker};
pub use detector::detect;
pub use metrics::WatcherMetrics;
pub use notifier::{NotificationBus, Notifier};
pub use scheduler::{ResourceView, Scheduler, SchedulerConfig, StopHandle, bootstrap};
pub use store::{SqliteStore, StateStore};
pub use types::{
    Aspect, ChangeEvent, ChangeSet, Fingerprint, Observation, Resource, ResourceId, StoredState,
};
