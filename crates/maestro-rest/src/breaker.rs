//! Per-endpoint circuit breaker.
//!
//! One breaker exists per `(service, endpoint-template)`, where the
//! template collapses UUIDs and numeric path segments to `{id}` so that
//! `/api/users/42` and `/api/users/7` share failure accounting.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::warn;

use maestro_core::metrics_defs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Classic three-state breaker: `fail_max` consecutive failures trip it
/// open, `reset_timeout` later a single probe call is allowed through.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    fail_max: u32,
    reset_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, fail_max: u32, reset_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            fail_max,
            reset_timeout,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed right now. An `Open` breaker whose reset
    /// timeout elapsed transitions to `HalfOpen` and admits one probe.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.transition(&mut inner, BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call: resets the failure streak and closes the
    /// breaker from any state.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        if inner.state != BreakerState::Closed {
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    /// Record a transport-class failure. A failed half-open probe reopens
    /// immediately; in closed state the streak must reach `fail_max`.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.consecutive_failures += 1;
        let should_open = match inner.state {
            BreakerState::HalfOpen => true,
            BreakerState::Closed => inner.consecutive_failures >= self.fail_max,
            BreakerState::Open => false,
        };
        if should_open {
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, BreakerState::Open);
            warn!(
                endpoint = %self.endpoint,
                failures = inner.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        inner.state = to;
        counter!(
            metrics_defs::BREAKER_TRANSITIONS,
            "endpoint" => self.endpoint.clone(),
            "state" => to.as_str()
        )
        .increment(1);
    }
}

/// Collapse UUIDs and integer path segments to `{id}` so endpoints with
/// path parameters share a breaker and a latency series.
pub fn endpoint_template(path: &str) -> String {
    let (path, _query) = match path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path, None),
    };
    path.split('/')
        .map(|segment| {
            if segment.is_empty() {
                ""
            } else if is_numeric(segment) || is_uuid(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn is_uuid(s: &str) -> bool {
    s.len() == 36 && uuid::Uuid::parse_str(s).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_collapses_ids() {
        assert_eq!(endpoint_template("/api/users/42"), "/api/users/{id}");
        assert_eq!(
            endpoint_template("/api/reminders/7f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f"),
            "/api/reminders/{id}"
        );
        assert_eq!(
            endpoint_template("/api/users/42/secretary/7f8a1c4e-2b3d-4f5a-9c8b-1a2b3c4d5e6f"),
            "/api/users/{id}/secretary/{id}"
        );
        assert_eq!(
            endpoint_template("/api/messages?user_id=1&limit=50"),
            "/api/messages"
        );
    }

    #[test]
    fn opens_after_fail_max_consecutive_failures() {
        let b = CircuitBreaker::new("/x", 3, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        assert!(!b.try_acquire());
    }

    #[test]
    fn success_resets_the_streak() {
        let b = CircuitBreaker::new("/x", 3, Duration::from_secs(30));
        b.record_failure();
        b.record_failure();
        b.record_success();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn half_opens_after_reset_timeout_and_closes_on_probe_success() {
        let b = CircuitBreaker::new("/x", 1, Duration::from_millis(0));
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
        // Zero reset timeout: the next acquire flips to half-open.
        assert!(b.try_acquire());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_success();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn failed_probe_reopens_immediately() {
        let b = CircuitBreaker::new("/x", 5, Duration::from_millis(0));
        for _ in 0..5 {
            b.record_failure();
        }
        assert!(b.try_acquire());
        assert_eq!(b.state(), BreakerState::HalfOpen);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Open);
    }
}
