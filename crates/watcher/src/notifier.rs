//! Fan-out of change events to notifiers.

use crate::types::ChangeEvent;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// A channel that wants to hear about changes.
///
/// `notify` is called once per non-empty change event. Delivery failures are
/// the notifier's own concern; nothing is retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: Arc<ChangeEvent>);

    /// Name used in logs
    fn name(&self) -> &str;
}

/// Ordered set of notifiers, fixed at composition time.
#[derive(Clone, Default)]
pub struct NotificationBus {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationBus {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Hand `event` to every notifier on its own task.
    ///
    /// Returns immediately; a slow notifier never holds up the caller.
    pub fn publish(&self, event: ChangeEvent) {
        if event.is_empty() {
            return;
        }

        let event = Arc::new(event);
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let event = event.clone();
            debug!(notifier = notifier.name(), id = event.resource_id, "Publishing change");
            tokio::spawn(async move {
                notifier.notify(event).await;
            });
        }
    }
}
