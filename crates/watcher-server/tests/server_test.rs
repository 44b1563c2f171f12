//! Integration tests for the web API and the assembled service

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use watcher::{
    HttpChecker, NotificationBus, Notifier, Scheduler, SchedulerConfig, SqliteStore,
    WatcherMetrics, bootstrap,
};
use watcher_server::http_server;
use watcher_server::{AppState, Config, WatchServer, WebNotifier};

/// Start a page whose status code can be changed while it is served.
async fn page_server() -> (String, Arc<AtomicU16>) {
    let status = Arc::new(AtomicU16::new(200));
    let app = Router::new()
        .route(
            "/",
            get(|State(status): State<Arc<AtomicU16>>| async move {
                let code = StatusCode::from_u16(status.load(Ordering::SeqCst)).unwrap();
                (code, "page body")
            }),
        )
        .with_state(status.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/", addr), status)
}

/// Start a Slack webhook stand-in that forwards message texts.
async fn slack_server() -> (String, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let app = Router::new()
        .route(
            "/hook",
            post(
                |State(tx): State<mpsc::UnboundedSender<String>>, Json(body): Json<Value>| async move {
                    let _ = tx.send(body["text"].as_str().unwrap_or_default().to_string());
                    StatusCode::OK
                },
            ),
        )
        .with_state(tx);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), rx)
}

fn fast_schedule() -> SchedulerConfig {
    SchedulerConfig {
        healthy_interval: Duration::from_millis(50),
        unhealthy_interval: Duration::from_millis(50),
        tick: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_api_endpoints() {
    let (link, status) = page_server().await;
    let links = vec![link.clone()];

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let checker = Arc::new(HttpChecker::new(Duration::from_secs(2)).unwrap());
    let resources = bootstrap(&links, store.as_ref(), checker.as_ref())
        .await
        .unwrap();

    let events = WebNotifier::new(16);
    let metrics = Arc::new(WatcherMetrics::new());
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(events.clone())];
    let scheduler = Scheduler::new(
        resources,
        fast_schedule(),
        checker,
        store,
        NotificationBus::new(notifiers),
        Some(metrics.clone()),
    )
    .unwrap();
    let state = AppState {
        view: scheduler.view(),
        events,
        metrics: Some(metrics),
    };
    let stop = scheduler.stop_handle();
    let scheduler_handle = tokio::spawn(scheduler.run());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(http_server::serve(listener, state));

    let client = reqwest::Client::new();

    let health = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status(), 200);
    assert_eq!(health.text().await.unwrap(), "ok");

    let list: Value = client
        .get(format!("{}/api/list", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = list.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["id"], 0);
    assert_eq!(entries[0]["url"], link.as_str());
    assert_eq!(entries[0]["status"], 200);
    assert_eq!(entries[0]["good"], true);

    // Subscribe before the page breaks
    let mut sse = client
        .get(format!("{}/api/events", base))
        .send()
        .await
        .unwrap();
    assert_eq!(sse.status(), 200);

    status.store(500, Ordering::SeqCst);

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut buffer = String::new();
        while let Some(chunk) = sse.chunk().await.unwrap() {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            if buffer.contains("event: update") && buffer.contains("\"good\":false") {
                break;
            }
        }
        buffer
    })
    .await
    .expect("Timeout waiting for update event");
    assert!(received.contains("\"status\":500"));

    let metrics_text = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics_text.contains("webwatch_checks_total"));
    assert!(metrics_text.contains("webwatch_changes_total{aspect=\"status_or_error\"}"));

    stop.stop();
    scheduler_handle.await.unwrap();
}

#[tokio::test]
async fn test_service_sends_slack_message_on_failure() {
    let (link, status) = page_server().await;
    let (hook, mut messages) = slack_server().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.watcher.period = Duration::from_millis(50);
    config.watcher.error_period = Duration::from_millis(50);
    config.watcher.tick = Duration::from_millis(10);
    config.watcher.db_path = dir.path().join("state.db").display().to_string();
    config.slack.enabled = true;
    config.slack.webhook_url = Some(hook);
    config.slack.message_period = Duration::from_millis(100);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = WatchServer::new(config, vec![link.clone()]);
    let handle = tokio::spawn(server.run_until(async move {
        let _ = shutdown_rx.await;
    }));

    // Let the service establish its baseline
    tokio::time::sleep(Duration::from_millis(300)).await;
    status.store(502, Ordering::SeqCst);

    let message = tokio::time::timeout(Duration::from_secs(5), messages.recv())
        .await
        .expect("Timeout waiting for slack message")
        .expect("Channel closed");
    assert!(message.contains(&link));
    assert!(message.ends_with("502 status"));

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_service_fails_without_database() {
    let mut config = Config::default();
    config.watcher.db_path = "/nonexistent/dir/state.db".to_string();

    let server = WatchServer::new(config, vec!["http://127.0.0.1:1/".to_string()]);
    let result = server.run_until(async {}).await;

    assert!(result.is_err());
}
