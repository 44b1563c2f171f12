//! Polling scheduler.
//!
//! A single control loop owns every [`Resource`] and the set of resources
//! with a check in flight. On each tick it dispatches a check task for every
//! idle resource that is due; each task checks, detects changes against the
//! snapshot it was given, persists a non-empty change and hands the event back
//! over one channel. The loop then applies the new snapshot, marks the
//! resource idle and publishes the event.

use crate::checker::Checker;
use crate::detector::detect;
use crate::metrics::WatcherMetrics;
use crate::notifier::NotificationBus;
use crate::store::StateStore;
use crate::types::{ChangeEvent, Resource, ResourceId};
use chrono::{DateTime, Utc};
use common::{Error, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

/// Scheduling parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Recheck interval of a good resource
    pub healthy_interval: Duration,

    /// Recheck interval of a resource that is not good
    pub unhealthy_interval: Duration,

    /// Period of the due scan
    pub tick: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            healthy_interval: Duration::from_secs(10),
            unhealthy_interval: Duration::from_secs(1),
            tick: Duration::from_millis(100),
        }
    }
}

/// Read-only view of the resources, shared with readers on other threads.
///
/// Updated by the control loop after each applied result. A reader may see
/// some resources before and others after a concurrent update.
#[derive(Clone, Default)]
pub struct ResourceView {
    resources: Arc<DashMap<ResourceId, Resource>>,
}

impl ResourceView {
    fn publish(&self, resource: &Resource) {
        self.resources.insert(resource.id, resource.clone());
    }

    /// All resources, ordered by id.
    pub fn snapshot(&self) -> Vec<Resource> {
        let mut resources: Vec<Resource> = self
            .resources
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        resources.sort_by_key(|r| r.id);
        resources
    }

    pub fn get(&self, id: ResourceId) -> Option<Resource> {
        self.resources.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Stops a running scheduler.
#[derive(Clone)]
pub struct StopHandle(Arc<Notify>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.notify_one();
    }
}

/// Load every link from the store, checking unseen links once.
///
/// Links are handled concurrently and the result keeps input order; the id
/// of a resource is its position in `links`. Fails if `links` is empty or
/// the store cannot be read or written.
pub async fn bootstrap(
    links: &[String],
    store: &dyn StateStore,
    checker: &dyn Checker,
) -> Result<Vec<Resource>> {
    if links.is_empty() {
        return Err(Error::config("no links to watch"));
    }

    let loads = links
        .iter()
        .enumerate()
        .map(|(id, link)| load_resource(id, link, store, checker));
    let resources = futures::future::try_join_all(loads).await?;

    info!(count = resources.len(), "Resources loaded");
    Ok(resources)
}

async fn load_resource(
    id: ResourceId,
    link: &str,
    store: &dyn StateStore,
    checker: &dyn Checker,
) -> Result<Resource> {
    if let Some(stored) = store.load(link).await? {
        debug!(id, link, status = stored.status, "Loaded stored state");
        return Ok(Resource::from_stored(id, stored, Utc::now()));
    }

    let blank = Resource::new(id, link, Utc::now());
    let observation = checker.check(link).await;
    let resource = detect(&blank, &observation).current;
    store.upsert(&resource.stored_state()).await?;

    info!(
        id,
        link,
        status = resource.status,
        error = %resource.error,
        "Established baseline for new link"
    );
    Ok(resource)
}

/// A finished check on its way back to the control loop.
struct CheckOutcome {
    event: ChangeEvent,
    duration: Duration,
}

/// The control loop.
pub struct Scheduler {
    resources: Vec<Resource>,
    in_flight: HashSet<ResourceId>,
    config: SchedulerConfig,
    checker: Arc<dyn Checker>,
    store: Arc<dyn StateStore>,
    bus: NotificationBus,
    view: ResourceView,
    metrics: Option<Arc<WatcherMetrics>>,
    stop_signal: Arc<Notify>,
}

impl Scheduler {
    /// Create a scheduler over `resources`.
    ///
    /// The id of every resource must equal its position, as handed out by
    /// [`bootstrap`]; anything else is rejected.
    pub fn new(
        resources: Vec<Resource>,
        config: SchedulerConfig,
        checker: Arc<dyn Checker>,
        store: Arc<dyn StateStore>,
        bus: NotificationBus,
        metrics: Option<Arc<WatcherMetrics>>,
    ) -> Result<Self> {
        if let Some((index, resource)) = resources
            .iter()
            .enumerate()
            .find(|(index, resource)| resource.id != *index)
        {
            return Err(Error::config(format!(
                "resource {} ({}) is at position {}",
                resource.id, resource.link, index
            )));
        }

        let view = ResourceView::default();
        for resource in &resources {
            view.publish(resource);
        }

        let scheduler = Self {
            resources,
            in_flight: HashSet::new(),
            config,
            checker,
            store,
            bus,
            view,
            metrics,
            stop_signal: Arc::new(Notify::new()),
        };
        scheduler.update_gauges();
        Ok(scheduler)
    }

    /// Shared read-only view of the resources
    pub fn view(&self) -> ResourceView {
        self.view.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop_signal.clone())
    }

    /// Run until stopped.
    pub async fn run(mut self) {
        info!(
            resources = self.resources.len(),
            healthy_interval = ?self.config.healthy_interval,
            unhealthy_interval = ?self.config.unhealthy_interval,
            "Scheduler started"
        );

        // Each resource has at most one outcome pending, so sends never wait.
        let (results_tx, mut results_rx) = mpsc::channel(self.resources.len().max(1));
        let mut tick = interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stop_signal = self.stop_signal.clone();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.dispatch_due(Utc::now(), &results_tx);
                }
                Some(outcome) = results_rx.recv() => {
                    self.handle_outcome(outcome);
                }
                _ = stop_signal.notified() => {
                    info!(in_flight = self.in_flight.len(), "Scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Dispatch a check for every idle resource due at `now`.
    fn dispatch_due(&mut self, now: DateTime<Utc>, results_tx: &mpsc::Sender<CheckOutcome>) {
        let due: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|r| !self.in_flight.contains(&r.id))
            .filter(|r| {
                now >= r.due_at(self.config.healthy_interval, self.config.unhealthy_interval)
            })
            .map(|r| r.id)
            .collect();

        for id in due {
            self.in_flight.insert(id);
            let snapshot = self.resources[id].clone();
            debug!(id, link = %snapshot.link, good = snapshot.good(), "Dispatching check");
            self.spawn_check(snapshot, results_tx.clone());
        }

        if let Some(ref m) = self.metrics {
            m.set_in_flight(self.in_flight.len());
        }
    }

    fn spawn_check(&self, snapshot: Resource, results_tx: mpsc::Sender<CheckOutcome>) {
        let checker = self.checker.clone();
        let store = self.store.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let observation = checker.check(&snapshot.link).await;
            let event = detect(&snapshot, &observation);

            if !event.is_empty() {
                if let Err(e) = store.upsert(&event.current.stored_state()).await {
                    warn!(id = event.resource_id, link = %snapshot.link, error = %e, "Failed to persist change");
                    if let Some(ref m) = metrics {
                        m.record_store_error();
                    }
                }
            }

            let outcome = CheckOutcome {
                event,
                duration: observation.duration,
            };
            if results_tx.send(outcome).await.is_err() {
                debug!(link = %snapshot.link, "Scheduler gone, dropping check result");
            }
        });
    }

    /// Apply a finished check and mark its resource idle again.
    fn handle_outcome(&mut self, outcome: CheckOutcome) {
        let CheckOutcome { event, duration } = outcome;
        let id = event.resource_id;

        if !self.in_flight.remove(&id) {
            error!(id, "Received a result for a resource that is not in flight, ignoring");
            if let Some(ref m) = self.metrics {
                m.record_dedup_violation();
            }
            return;
        }

        let Some(slot) = self.resources.get_mut(id) else {
            error!(id, "Received a result for an unknown resource, ignoring");
            return;
        };
        *slot = event.current.clone();
        self.view.publish(slot);

        if let Some(ref m) = self.metrics {
            m.record_check(outcome_label(&event.current), duration);
            m.record_change(&event.changed);
        }
        self.update_gauges();

        if event.is_empty() {
            debug!(id, link = %event.current.link, "No change");
            return;
        }

        info!(
            id,
            link = %event.current.link,
            aspects = %event.changed,
            status = event.current.status,
            error = %event.current.error,
            "Resource changed"
        );
        self.bus.publish(event);
    }

    fn update_gauges(&self) {
        if let Some(ref m) = self.metrics {
            let good = self.resources.iter().filter(|r| r.good()).count();
            m.set_health(good, self.resources.len() - good);
            m.set_in_flight(self.in_flight.len());
        }
    }
}

fn outcome_label(resource: &Resource) -> &'static str {
    if resource.good() {
        "ok"
    } else if resource.error.is_empty() {
        "bad"
    } else {
        "error"
    }
}
