//! HTTP checks producing observations.

use crate::types::{FINGERPRINT_LEN, Fingerprint, Observation};
use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// Default timeout of a single check.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Error text of a check that ran out of time.
pub const TIMED_OUT: &str = "request timed out";

/// Performs one check of a link.
///
/// Implementations never retry and never fail: every failure is reported
/// through the returned observation.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Check `link` once
    async fn check(&self, link: &str) -> Observation;

    /// Get the name of this checker
    fn name(&self) -> &str;
}

/// Fingerprint of an in-memory body.
pub fn fingerprint(body: &[u8]) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(body);
    finish(hasher)
}

fn finish(hasher: Sha256) -> Fingerprint {
    let mut digest = [0u8; FINGERPRINT_LEN];
    digest.copy_from_slice(&hasher.finalize());
    Fingerprint::new(digest)
}

/// HTTP GET checker
pub struct HttpChecker {
    timeout_duration: Duration,
    client: reqwest::Client,
}

impl HttpChecker {
    /// Create a new HTTP checker
    pub fn new(timeout_duration: Duration) -> common::Result<Self> {
        // The deadline is enforced around the whole check, not by the client
        let client = reqwest::Client::builder()
            .build()
            .map_err(common::Error::check)?;

        Ok(Self {
            timeout_duration,
            client,
        })
    }

    /// Send the request and hash the body chunk by chunk.
    async fn fetch(&self, link: &str) -> Result<(u16, Fingerprint), reqwest::Error> {
        let mut response = self.client.get(link).send().await?;
        let status = response.status().as_u16();

        let mut hasher = Sha256::new();
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
        }

        Ok((status, finish(hasher)))
    }
}

/// Error text including every distinct cause, joined with `": "`.
fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return TIMED_OUT.to_string();
    }

    let mut text = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.contains(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}

#[async_trait]
impl Checker for HttpChecker {
    async fn check(&self, link: &str) -> Observation {
        let start = Instant::now();

        match timeout(self.timeout_duration, self.fetch(link)).await {
            Ok(Ok((status, fingerprint))) => {
                let duration = start.elapsed();
                debug!(link, status, duration_ms = duration.as_millis(), "HTTP check completed");
                Observation::response(fingerprint, status, Utc::now(), duration)
            }
            Ok(Err(e)) => {
                let duration = start.elapsed();
                debug!(link, error = %e, "HTTP check failed");
                Observation::failure(describe(&e), Utc::now(), duration)
            }
            Err(_) => {
                let duration = start.elapsed();
                debug!(link, "HTTP check timed out");
                Observation::failure(TIMED_OUT, Utc::now(), duration)
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, routing::get};
    use tokio::net::TcpListener;

    async fn serve() -> String {
        let app = Router::new()
            .route("/", get(|| async { "hello" }))
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint(b"hello"), fingerprint(b"hello"));
        assert_ne!(fingerprint(b"hello"), fingerprint(b"hello!"));
        assert!(!fingerprint(b"").is_empty());
    }

    #[tokio::test]
    async fn test_http_checker_success() {
        let base = serve().await;
        let checker = HttpChecker::new(Duration::from_secs(2)).unwrap();

        let observation = checker.check(&format!("{}/", base)).await;
        assert_eq!(observation.status, 200);
        assert!(observation.error.is_empty());
        assert_eq!(observation.fingerprint, fingerprint(b"hello"));
    }

    #[tokio::test]
    async fn test_http_checker_non_2xx_is_not_a_failure() {
        let base = serve().await;
        let checker = HttpChecker::new(Duration::from_secs(2)).unwrap();

        let observation = checker.check(&format!("{}/missing", base)).await;
        assert_eq!(observation.status, 404);
        assert!(!observation.is_failure());
        assert_eq!(observation.fingerprint, fingerprint(b"nope"));
    }

    #[tokio::test]
    async fn test_http_checker_timeout() {
        let base = serve().await;
        let checker = HttpChecker::new(Duration::from_millis(100)).unwrap();

        let observation = checker.check(&format!("{}/slow", base)).await;
        assert_eq!(observation.status, 0);
        assert_eq!(observation.error, TIMED_OUT);
        assert!(observation.fingerprint.is_empty());
        assert!(observation.duration < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_http_checker_connection_refused() {
        let checker = HttpChecker::new(Duration::from_millis(500)).unwrap();

        let observation = checker.check("http://127.0.0.1:1/").await;
        assert_eq!(observation.status, 0);
        assert!(observation.fingerprint.is_empty());
        assert_ne!(observation.error, TIMED_OUT);
        assert!(
            observation.error.to_lowercase().contains("refused"),
            "Cause missing from {:?}",
            observation.error
        );
    }

    #[tokio::test]
    async fn test_http_checker_timeout_text_is_stable() {
        // Accepts connections and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let checker = HttpChecker::new(Duration::from_millis(50)).unwrap();
        let link = format!("http://{}/", addr);
        for _ in 0..20 {
            let observation = checker.check(&link).await;
            assert_eq!(observation.error, TIMED_OUT);
        }
    }
}
