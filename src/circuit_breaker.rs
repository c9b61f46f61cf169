/**
 * Circuit Breaker (§4.B)
 *
 * DESIGN DECISION: a persistent three-state atomic machine attached to each
 * external dependency, instead of a per-call retry counter
 * WHY: generalizes `agent_network.rs`'s `AgentConnection` — which tracked a
 * single connection's own retry count and reset it per call — into shared,
 * cross-call failure memory so that once a dependency is unhealthy, every
 * caller fails fast instead of each independently rediscovering the outage
 *
 * PATTERN: atomics instead of a mutex; breaker state is read on every call's
 * hot path and must never block
 */

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::options::CircuitBreakerOptions;
use crate::error::{Error, Result};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Three-state failure-isolation gate around a single dependency (§4.B).
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    state: AtomicU8,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_failure_time: AtomicI64,
    failure_threshold: u32,
    recovery_threshold: u32,
    timeout_window_s: i64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, options: &CircuitBreakerOptions) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_failure_time: AtomicI64::new(0),
            failure_threshold: options.failure_threshold,
            recovery_threshold: options.recovery_threshold,
            timeout_window_s: options.timeout_window_s as i64,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, resolving an Open breaker to HalfOpen once the timeout
    /// window has elapsed since the last recorded failure.
    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => BreakerState::Closed,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => {
                let last_failure = self.last_failure_time.load(Ordering::Acquire);
                if now_unix() - last_failure >= self.timeout_window_s {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
        }
    }

    /// Must be called before attempting the guarded call. Returns
    /// `Err(CircuitOpen)` if the call should fail fast.
    pub fn guard(&self) -> Result<()> {
        match self.state() {
            BreakerState::Open => Err(Error::CircuitOpen(self.name.clone())),
            BreakerState::HalfOpen => {
                // Lazily transition the stored state so subsequent callers
                // observe HalfOpen without recomputing the elapsed window.
                let _ = self.state.compare_exchange(
                    STATE_OPEN,
                    STATE_HALF_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                Ok(())
            }
            BreakerState::Closed => Ok(()),
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                let successes = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.recovery_threshold {
                    self.reset_to_closed();
                }
            }
            STATE_CLOSED => {
                self.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        self.last_failure_time.store(now_unix(), Ordering::Release);
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => self.trip_open(),
            STATE_CLOSED => {
                let failures = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.failure_threshold {
                    self.trip_open();
                }
            }
            _ => {}
        }
    }

    fn trip_open(&self) {
        self.state.store(STATE_OPEN, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
    }

    fn reset_to_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
    }

    /// Administrative override (`circuit reset <name>` CLI command, §6).
    pub fn force_reset(&self) {
        self.reset_to_closed();
    }
}

/// Observable breaker state, resolved lazily from stored atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Exponential backoff schedule for the pipeline's retry loop (§4.F):
/// base 100ms, doubling, capped at 5s, ±20% jitter. Grounded on
/// `agent_network.rs::AgentConnection::retry_with_backoff`'s
/// `100 * (1 << retry_count)` schedule, extended with a cap and jitter.
pub fn backoff_duration(attempt: u32, base_ms: u64, jitter_seed: u64) -> std::time::Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(5_000);
    let jitter_range = (capped as f64 * 0.2) as u64;
    let jitter = if jitter_range == 0 { 0 } else { jitter_seed % (2 * jitter_range + 1) };
    let signed_jitter = jitter as i64 - jitter_range as i64;
    let final_ms = (capped as i64 + signed_jitter).max(0) as u64;
    std::time::Duration::from_millis(final_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CircuitBreakerOptions {
        CircuitBreakerOptions { failure_threshold: 3, recovery_threshold: 2, timeout_window_s: 300 }
    }

    #[test]
    fn closed_breaker_allows_calls() {
        let breaker = CircuitBreaker::new("store", &options());
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.guard().is_ok());
    }

    #[test]
    fn threshold_minus_one_failures_keep_breaker_closed_one_more_trips_it() {
        let breaker = CircuitBreaker::new("store", &options());
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(breaker.guard(), Err(Error::CircuitOpen(_))));
    }

    #[test]
    fn half_open_recovers_to_closed_after_recovery_threshold_successes() {
        let breaker = CircuitBreaker::new("store", &options());
        breaker.trip_open();
        breaker.state.store(STATE_HALF_OPEN, Ordering::Release);

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_immediately() {
        let breaker = CircuitBreaker::new("store", &options());
        breaker.trip_open();
        breaker.state.store(STATE_HALF_OPEN, Ordering::Release);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn force_reset_clears_an_open_breaker() {
        let breaker = CircuitBreaker::new("store", &options());
        breaker.trip_open();
        breaker.force_reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn backoff_is_exponential_capped_and_jittered_within_20_percent() {
        let d0 = backoff_duration(0, 100, 7);
        let d4 = backoff_duration(4, 100, 7);
        let d_cap = backoff_duration(20, 100, 7);
        assert!(d0.as_millis() <= 120);
        assert!(d4.as_millis() <= (1600.0 * 1.2) as u128);
        assert!(d_cap.as_millis() <= (5000.0 * 1.2) as u128);
    }
}
