//! Resource, observation and change event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Process-local resource identifier, assigned in input order at load time.
pub type ResourceId = usize;

/// HTTP status treated as healthy.
pub const STATUS_OK: u16 = 200;

/// Length of a content fingerprint in bytes (SHA-256).
pub const FINGERPRINT_LEN: usize = 32;

/// Fixed-size digest of a response body. Empty until a body was fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Fingerprint(Option<[u8; FINGERPRINT_LEN]>);

impl Fingerprint {
    /// Fingerprint of a resource that was never fetched successfully.
    pub const fn empty() -> Self {
        Self(None)
    }

    pub const fn new(digest: [u8; FINGERPRINT_LEN]) -> Self {
        Self(Some(digest))
    }

    /// Rebuild a fingerprint from stored bytes. Zero bytes means empty.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return Some(Self::empty());
        }
        let digest: [u8; FINGERPRINT_LEN] = bytes.try_into().ok()?;
        Some(Self::new(digest))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Raw bytes, empty slice for an empty fingerprint.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.0 {
            Some(digest) => digest,
            None => &[],
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A monitored URL and its last observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    pub id: ResourceId,

    #[serde(rename = "url")]
    pub link: String,

    /// Time of the most recent detected change
    pub last_change: DateTime<Utc>,

    /// Time of the most recent completed check attempt
    pub last_check: DateTime<Utc>,

    /// Last HTTP status, 0 when the last attempt got no response
    pub status: u16,

    /// Last transport error, empty when none
    pub error: String,

    #[serde(skip)]
    pub fingerprint: Fingerprint,
}

impl Resource {
    /// Create a resource with no observed state yet.
    pub fn new(id: ResourceId, link: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            link: link.into(),
            last_change: DateTime::<Utc>::UNIX_EPOCH,
            last_check: now,
            status: 0,
            error: String::new(),
            fingerprint: Fingerprint::empty(),
        }
    }

    /// Restore a resource from its persisted state.
    pub fn from_stored(id: ResourceId, stored: StoredState, now: DateTime<Utc>) -> Self {
        Self {
            id,
            link: stored.link,
            last_change: stored.last_change,
            last_check: now,
            status: stored.status,
            error: stored.error,
            fingerprint: stored.fingerprint,
        }
    }

    /// True if the last request succeeded with a 200.
    pub fn good(&self) -> bool {
        self.error.is_empty() && self.status == STATUS_OK
    }

    /// Time at which the resource becomes due for its next check.
    pub fn due_at(&self, healthy: Duration, unhealthy: Duration) -> DateTime<Utc> {
        let interval = if self.good() { healthy } else { unhealthy };
        chrono::Duration::from_std(interval)
            .ok()
            .and_then(|delta| self.last_check.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Persistable part of the resource.
    pub fn stored_state(&self) -> StoredState {
        StoredState {
            link: self.link.clone(),
            last_change: self.last_change,
            fingerprint: self.fingerprint,
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// The durable row of a resource, keyed by link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    pub link: String,
    pub last_change: DateTime<Utc>,
    pub fingerprint: Fingerprint,
    pub status: u16,
    pub error: String,
}

/// Result of a single check, not yet compared against stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub fingerprint: Fingerprint,
    pub status: u16,
    pub error: String,
    pub observed_at: DateTime<Utc>,
    pub duration: Duration,
}

impl Observation {
    /// A completed response.
    pub fn response(
        fingerprint: Fingerprint,
        status: u16,
        observed_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            fingerprint,
            status,
            error: String::new(),
            observed_at,
            duration,
        }
    }

    /// A request that failed before a body could be read.
    pub fn failure(
        error: impl Into<String>,
        observed_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            fingerprint: Fingerprint::empty(),
            status: 0,
            error: error.into(),
            observed_at,
            duration,
        }
    }

    pub fn is_failure(&self) -> bool {
        !self.error.is_empty()
    }
}

/// One aspect of a resource that a check can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    Content,
    StatusOrError,
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aspect::Content => write!(f, "content"),
            Aspect::StatusOrError => write!(f, "status_or_error"),
        }
    }
}

/// Set of changed aspects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    content: bool,
    status_or_error: bool,
}

impl ChangeSet {
    pub fn insert(&mut self, aspect: Aspect) {
        match aspect {
            Aspect::Content => self.content = true,
            Aspect::StatusOrError => self.status_or_error = true,
        }
    }

    pub fn contains(&self, aspect: Aspect) -> bool {
        match aspect {
            Aspect::Content => self.content,
            Aspect::StatusOrError => self.status_or_error,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.content && !self.status_or_error
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = Aspect> + '_ {
        [Aspect::Content, Aspect::StatusOrError]
            .into_iter()
            .filter(|aspect| self.contains(*aspect))
    }
}

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|a| a.to_string()).collect();
        write!(f, "[{}]", names.join(","))
    }
}

/// Outcome of comparing an observation to the stored state of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub resource_id: ResourceId,
    pub previous: Resource,
    pub current: Resource,
    pub changed: ChangeSet,
    pub detected_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    pub fn link(&self) -> &str {
        &self.current.link
    }

    /// Human readable failure of the new state, `None` when it is good.
    pub fn error_text(&self) -> Option<String> {
        if !self.current.error.is_empty() {
            Some(self.current.error.clone())
        } else if self.current.status != STATUS_OK {
            Some(format!("{} status", self.current.status))
        } else {
            None
        }
    }

    /// True when health flipped, or when it stayed bad in a different way.
    pub fn status_flipped(&self) -> bool {
        if self.previous.good() != self.current.good() {
            return true;
        }
        !self.current.good()
            && (self.current.status != self.previous.status
                || self.current.error != self.previous.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(status: u16, error: &str) -> Resource {
        let mut r = Resource::new(0, "http://example.com", Utc::now());
        r.status = status;
        r.error = error.to_string();
        r
    }

    #[test]
    fn test_good_requires_200_and_no_error() {
        assert!(resource(200, "").good());
        assert!(!resource(500, "").good());
        assert!(!resource(0, "timeout").good());
        assert!(!resource(200, "body read failed").good());
    }

    #[test]
    fn test_due_at_uses_health_interval() {
        let healthy = Duration::from_secs(10);
        let unhealthy = Duration::from_secs(1);

        let good = resource(200, "");
        assert_eq!(
            good.due_at(healthy, unhealthy),
            good.last_check + chrono::Duration::seconds(10)
        );

        let bad = resource(503, "");
        assert_eq!(
            bad.due_at(healthy, unhealthy),
            bad.last_check + chrono::Duration::seconds(1)
        );
    }

    #[test]
    fn test_fingerprint_from_slice() {
        assert_eq!(Fingerprint::from_slice(&[]), Some(Fingerprint::empty()));
        assert_eq!(
            Fingerprint::from_slice(&[7u8; FINGERPRINT_LEN]),
            Some(Fingerprint::new([7u8; FINGERPRINT_LEN]))
        );
        assert_eq!(Fingerprint::from_slice(&[1, 2, 3]), None);
    }

    #[test]
    fn test_fingerprint_display_is_hex() {
        let fp = Fingerprint::new([0xab; FINGERPRINT_LEN]);
        assert_eq!(fp.to_string(), "ab".repeat(FINGERPRINT_LEN));
        assert_eq!(Fingerprint::empty().to_string(), "");
    }

    #[test]
    fn test_change_set() {
        let mut set = ChangeSet::default();
        assert!(set.is_empty());

        set.insert(Aspect::StatusOrError);
        assert!(!set.is_empty());
        assert!(set.contains(Aspect::StatusOrError));
        assert!(!set.contains(Aspect::Content));
        assert_eq!(set.len(), 1);
        assert_eq!(set.to_string(), "[status_or_error]");
    }

    #[test]
    fn test_error_text() {
        let now = Utc::now();
        let event = |current: Resource| ChangeEvent {
            resource_id: 0,
            previous: resource(200, ""),
            current,
            changed: ChangeSet::default(),
            detected_at: now,
        };

        assert_eq!(event(resource(200, "")).error_text(), None);
        assert_eq!(
            event(resource(404, "")).error_text().as_deref(),
            Some("404 status")
        );
        assert_eq!(
            event(resource(0, "connection refused")).error_text().as_deref(),
            Some("connection refused")
        );
    }

    #[test]
    fn test_status_flipped() {
        let now = Utc::now();
        let event = |previous: Resource, current: Resource| ChangeEvent {
            resource_id: 0,
            previous,
            current,
            changed: ChangeSet::default(),
            detected_at: now,
        };

        assert!(event(resource(200, ""), resource(500, "")).status_flipped());
        assert!(event(resource(0, "timeout"), resource(200, "")).status_flipped());
        assert!(event(resource(0, "timeout"), resource(500, "")).status_flipped());
        assert!(!event(resource(200, ""), resource(200, "")).status_flipped());
        assert!(!event(resource(500, ""), resource(500, "")).status_flipped());
    }

    #[test]
    fn test_resource_json_shape() {
        let r = resource(200, "");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["url"], "http://example.com");
        assert_eq!(json["status"], 200);
        assert_eq!(json["error"], "");
        assert!(json.get("fingerprint").is_none());
    }
}
