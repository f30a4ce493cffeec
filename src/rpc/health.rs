//! Per-endpoint health tracking with a circuit breaker.
//!
//! An endpoint trips open after 5 consecutive failures inside a 60 s window.
//! After a 30 s cool-down a single half-open probe is allowed through; a
//! successful probe closes the circuit, a failed one re-opens it.
//!
//! Counters are lock-free atomics so the hot path never takes a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

/// Consecutive failures that trip the breaker.
const FAILURE_THRESHOLD: u32 = 5;
/// Failures older than this no longer count toward the threshold.
const FAILURE_WINDOW_MS: u64 = 60_000;
/// Open-state cool-down before a half-open probe is allowed.
const COOLDOWN_MS: u64 = 30_000;

/// Milliseconds since process start; monotonic and atomically storable.
#[derive(Debug, Clone, Copy)]
pub struct HealthClock {
    start: Instant,
}

impl HealthClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for HealthClock {
    fn default() -> Self {
        Self::new()
    }
}

/// What the gateway may do with an endpoint right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// Circuit closed, use freely.
    Healthy,
    /// Circuit open but cooled down; exactly one probe request may pass.
    Probe,
    /// Circuit open, skip this endpoint.
    Open,
}

pub struct EndpointHealth {
    /// Consecutive failures within the current window.
    consecutive_failures: AtomicU32,
    /// Clock reading of the first failure in the current streak.
    streak_started_ms: AtomicU64,
    /// Non-zero while the circuit is open; value is when it opened.
    opened_at_ms: AtomicU64,
    /// Guards the single half-open probe slot.
    probe_in_flight: AtomicBool,
    // Lifetime stats, surfaced by the health probe task.
    total_failures: AtomicU64,
    total_successes: AtomicU64,
}

impl EndpointHealth {
    pub fn new() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            streak_started_ms: AtomicU64::new(0),
            opened_at_ms: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
        }
    }

    pub fn availability(&self, now_ms: u64) -> Availability {
        let opened = self.opened_at_ms.load(Ordering::Acquire);
        if opened == 0 {
            return Availability::Healthy;
        }
        if now_ms.saturating_sub(opened) < COOLDOWN_MS {
            return Availability::Open;
        }
        // Cooled down: admit one probe at a time.
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Availability::Probe
        } else {
            Availability::Open
        }
    }

    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_ms.store(0, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
    }

    pub fn record_failure(&self, now_ms: u64) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.probe_in_flight.store(false, Ordering::Release);

        // If the circuit was already open (failed probe), restart the cool-down.
        if self.opened_at_ms.load(Ordering::Acquire) != 0 {
            self.opened_at_ms.store(now_ms.max(1), Ordering::Release);
            return;
        }

        let streak_start = self.streak_started_ms.load(Ordering::Acquire);
        let fresh_streak = self.consecutive_failures.load(Ordering::Acquire) == 0
            || now_ms.saturating_sub(streak_start) > FAILURE_WINDOW_MS;

        let count = if fresh_streak {
            self.streak_started_ms.store(now_ms, Ordering::Release);
            self.consecutive_failures.store(1, Ordering::Release);
            1
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
        };

        if count >= FAILURE_THRESHOLD {
            self.opened_at_ms.store(now_ms.max(1), Ordering::Release);
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at_ms.load(Ordering::Acquire) != 0
    }

    pub fn stats(&self) -> (u64, u64) {
        (
            self.total_successes.load(Ordering::Relaxed),
            self.total_failures.load(Ordering::Relaxed),
        )
    }
}

impl Default for EndpointHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trips_after_threshold() {
        let h = EndpointHealth::new();
        for i in 0..FAILURE_THRESHOLD - 1 {
            h.record_failure(1000 + i as u64);
            assert_eq!(h.availability(2000), Availability::Healthy, "failure {i}");
        }
        h.record_failure(1500);
        assert!(h.is_open());
        assert_eq!(h.availability(1600), Availability::Open);
    }

    #[test]
    fn test_window_resets_streak() {
        let h = EndpointHealth::new();
        for i in 0..FAILURE_THRESHOLD - 1 {
            h.record_failure(i as u64 * 10);
        }
        // Next failure lands outside the 60 s window: streak restarts at 1.
        h.record_failure(FAILURE_WINDOW_MS + 1000);
        assert!(!h.is_open());
    }

    #[test]
    fn test_half_open_probe_single_slot() {
        let h = EndpointHealth::new();
        for _ in 0..FAILURE_THRESHOLD {
            h.record_failure(1000);
        }
        assert!(h.is_open());
        // Before cool-down: still open.
        assert_eq!(h.availability(1000 + COOLDOWN_MS - 1), Availability::Open);
        // After cool-down: exactly one probe passes.
        let t = 1000 + COOLDOWN_MS + 1;
        assert_eq!(h.availability(t), Availability::Probe);
        assert_eq!(h.availability(t), Availability::Open);
    }

    #[test]
    fn test_probe_success_closes_circuit() {
        let h = EndpointHealth::new();
        for _ in 0..FAILURE_THRESHOLD {
            h.record_failure(1000);
        }
        let t = 1000 + COOLDOWN_MS + 1;
        assert_eq!(h.availability(t), Availability::Probe);
        h.record_success();
        assert!(!h.is_open());
        assert_eq!(h.availability(t + 1), Availability::Healthy);
    }

    #[test]
    fn test_probe_failure_reopens() {
        let h = EndpointHealth::new();
        for _ in 0..FAILURE_THRESHOLD {
            h.record_failure(1000);
        }
        let t = 1000 + COOLDOWN_MS + 1;
        assert_eq!(h.availability(t), Availability::Probe);
        h.record_failure(t);
        assert!(h.is_open());
        // Cool-down restarted from the probe failure.
        assert_eq!(h.availability(t + 1), Availability::Open);
        assert_eq!(h.availability(t + COOLDOWN_MS + 1), Availability::Probe);
    }
}
