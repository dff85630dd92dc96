//! Circuit breaker per target class
//!
//! Tracks call outcomes inside a sliding time window and short-circuits calls
//! once the class looks degraded:
//! - Closed: normal operation, calls proceed
//! - Open: consecutive-failure or failure-rate threshold crossed, calls fail fast
//! - `HalfOpen`: cooldown elapsed, exactly one probe call is let through
//!
//! A successful probe closes the circuit, a failed probe re-opens it. Only the
//! call holding the current [`HalfOpenLease`] moves the state out of
//! `HalfOpen`; late outcomes from calls admitted earlier are counted but
//! decide nothing. A probe whose outcome is never reported releases its lease
//! after another cooldown.

use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::target::TargetClass;
use crate::config::BreakerSettings;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

/// Identifies the call admitted while half-open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HalfOpenLease(u64);

/// Admission decision for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// Circuit closed
    Allow,
    /// This call is the single half-open probe; its outcome decides the next state
    Probe(HalfOpenLease),
    /// Fail fast without attempting the call
    Reject { retry_after: Duration },
}

impl BreakerDecision {
    /// Lease to hand back with the call's outcome, if this call holds one
    #[must_use]
    pub fn lease(self) -> Option<HalfOpenLease> {
        match self {
            Self::Probe(lease) => Some(lease),
            Self::Allow | Self::Reject { .. } => None,
        }
    }
}

/// Health tracking for a single target class
#[derive(Debug, Clone)]
struct ClassHealth {
    state: CircuitState,
    /// `(when, succeeded)` for each reported call inside the window
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
    /// Lease of the call currently deciding a half-open circuit
    lease: Option<HalfOpenLease>,
    leases_issued: u64,
    total_calls: u64,
    total_failures: u64,
    times_opened: u64,
}

impl ClassHealth {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            outcomes: VecDeque::new(),
            opened_at: None,
            probe_started: None,
            lease: None,
            leases_issued: 0,
            total_calls: 0,
            total_failures: 0,
            times_opened: 0,
        }
    }

    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some((at, _)) = self.outcomes.front() {
            if now.duration_since(*at) > window {
                self.outcomes.pop_front();
            } else {
                break;
            }
        }
    }

    /// Failures at the tail of the window with no success in between
    fn consecutive_failures(&self) -> u32 {
        self.outcomes
            .iter()
            .rev()
            .take_while(|(_, ok)| !ok)
            .count() as u32
    }

    fn window_failures(&self) -> u32 {
        self.outcomes.iter().filter(|(_, ok)| !ok).count() as u32
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.probe_started = None;
        self.lease = None;
        self.times_opened += 1;
    }

    fn issue_lease(&mut self, now: Instant) -> HalfOpenLease {
        self.leases_issued += 1;
        let lease = HalfOpenLease(self.leases_issued);
        self.probe_started = Some(now);
        self.lease = Some(lease);
        lease
    }

    /// Whether `lease` is the one currently deciding a half-open circuit
    fn holds(&self, lease: Option<HalfOpenLease>) -> bool {
        self.state == CircuitState::HalfOpen && lease.is_some() && self.lease == lease
    }
}

/// Point-in-time view of one class, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: TargetClass,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub window_calls: u32,
    pub window_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub times_opened: u64,
}

/// Circuit breaker keyed by target class
pub struct CircuitBreaker {
    classes: DashMap<TargetClass, ClassHealth>,
    settings: BreakerSettings,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            classes: DashMap::new(),
            settings,
        }
    }

    /// Decide whether a call against `class` may be attempted
    pub fn check(&self, class: TargetClass) -> BreakerDecision {
        let now = Instant::now();
        let cooldown = self.settings.cooldown();
        let mut health = self.classes.entry(class).or_insert_with(ClassHealth::new);

        match health.state {
            CircuitState::Closed => BreakerDecision::Allow,
            CircuitState::Open => {
                let opened = health.opened_at.unwrap_or(now);
                let elapsed = now.duration_since(opened);
                if elapsed >= cooldown {
                    health.state = CircuitState::HalfOpen;
                    let lease = health.issue_lease(now);
                    info!(
                        "Circuit breaker HALF-OPEN for {class} calls after {elapsed:?}, admitting probe"
                    );
                    BreakerDecision::Probe(lease)
                } else {
                    BreakerDecision::Reject {
                        retry_after: cooldown - elapsed,
                    }
                }
            }
            CircuitState::HalfOpen => match health.probe_started {
                Some(started) if now.duration_since(started) < cooldown => {
                    BreakerDecision::Reject {
                        retry_after: cooldown - now.duration_since(started),
                    }
                }
                _ => {
                    let lease = health.issue_lease(now);
                    debug!("Circuit breaker re-issuing probe lease for {class} calls");
                    BreakerDecision::Probe(lease)
                }
            },
        }
    }

    /// Record a successful call; closes a half-open circuit when `lease` is current
    pub fn record_success(&self, class: TargetClass, lease: Option<HalfOpenLease>) {
        let now = Instant::now();
        let window = self.settings.window();
        let mut health = self.classes.entry(class).or_insert_with(ClassHealth::new);

        health.total_calls += 1;
        if health.holds(lease) {
            health.state = CircuitState::Closed;
            health.outcomes.clear();
            health.opened_at = None;
            health.probe_started = None;
            health.lease = None;
            info!("Circuit breaker CLOSED for {class} calls, probe succeeded");
        }
        health.outcomes.push_back((now, true));
        health.prune(window, now);
    }

    /// Record a failed call; may open the circuit
    ///
    /// A half-open circuit re-opens only on the failure of the call holding
    /// `lease`.
    pub fn record_failure(&self, class: TargetClass, lease: Option<HalfOpenLease>, error: &str) {
        let now = Instant::now();
        let window = self.settings.window();
        let mut health = self.classes.entry(class).or_insert_with(ClassHealth::new);

        health.total_calls += 1;
        health.total_failures += 1;
        health.outcomes.push_back((now, false));
        health.prune(window, now);

        let decides = health.holds(lease);
        match health.state {
            CircuitState::HalfOpen if decides => {
                health.open(now);
                warn!("Circuit breaker re-OPENED for {class} calls, probe failed: {error}");
            }
            CircuitState::HalfOpen => {
                debug!("Circuit breaker ignoring late failure for half-open {class} calls: {error}");
            }
            CircuitState::Closed => {
                let consecutive = health.consecutive_failures();
                let calls = health.outcomes.len() as u32;
                let failures = health.window_failures();
                let rate = f64::from(failures) / f64::from(calls.max(1));

                if consecutive >= self.settings.failure_threshold {
                    health.open(now);
                    warn!(
                        "Circuit breaker OPEN for {class} calls after {consecutive} consecutive failures. Last error: {error}"
                    );
                } else if calls >= self.settings.minimum_calls && rate >= self.settings.failure_rate {
                    health.open(now);
                    warn!(
                        "Circuit breaker OPEN for {class} calls, failure rate {:.0}% over {calls} calls. Last error: {error}",
                        rate * 100.0
                    );
                } else {
                    debug!(
                        "Circuit breaker failure for {class} calls ({consecutive}/{}): {error}",
                        self.settings.failure_threshold
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a probe lease without reporting an outcome
    ///
    /// Used when the probe call ended in a way that says nothing about the
    /// health of the class (throttling, cancellation).
    pub fn release_probe(&self, class: TargetClass, lease: Option<HalfOpenLease>) {
        if let Some(mut health) = self.classes.get_mut(&class)
            && health.holds(lease)
        {
            health.probe_started = None;
            health.lease = None;
        }
    }

    #[must_use]
    pub fn state(&self, class: TargetClass) -> CircuitState {
        self.classes
            .get(&class)
            .map_or(CircuitState::Closed, |h| h.state)
    }

    /// Snapshot of every class that has seen traffic
    #[must_use]
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        TargetClass::ALL
            .iter()
            .filter_map(|class| {
                self.classes.get(class).map(|h| BreakerSnapshot {
                    target: *class,
                    state: h.state,
                    consecutive_failures: h.consecutive_failures(),
                    window_calls: h.outcomes.len() as u32,
                    window_failures: h.window_failures(),
                    total_calls: h.total_calls,
                    total_failures: h.total_failures,
                    times_opened: h.times_opened,
                })
            })
            .collect()
    }

    /// Classes currently short-circuited (open or probing)
    #[must_use]
    pub fn open_classes(&self) -> Vec<TargetClass> {
        self.classes
            .iter()
            .filter(|entry| entry.value().state != CircuitState::Closed)
            .map(|entry| *entry.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerSettings {
            failure_threshold: threshold,
            cooldown_secs,
            ..BreakerSettings::default()
        })
    }

    fn lease_of(decision: BreakerDecision) -> HalfOpenLease {
        decision.lease().expect("half-open admission")
    }

    /// Push an open circuit past its cooldown
    fn expire_cooldown(cb: &CircuitBreaker, class: TargetClass) {
        let mut h = cb.classes.get_mut(&class).expect("tracked class");
        h.opened_at = Some(Instant::now() - Duration::from_secs(cb.settings.cooldown_secs + 1));
    }

    #[test]
    fn closed_circuit_allows_calls() {
        let cb = breaker(3, 60);
        assert_eq!(cb.check(TargetClass::Api), BreakerDecision::Allow);
        cb.record_success(TargetClass::Api, None);
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Closed);
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let cb = breaker(3, 60);
        for _ in 0..2 {
            assert_eq!(cb.check(TargetClass::Api), BreakerDecision::Allow);
            cb.record_failure(TargetClass::Api, None, "503");
        }
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Closed);
        cb.record_failure(TargetClass::Api, None, "503");
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Open);
        assert!(matches!(
            cb.check(TargetClass::Api),
            BreakerDecision::Reject { .. }
        ));
        // Navigation is unaffected
        assert_eq!(cb.check(TargetClass::Navigation), BreakerDecision::Allow);
    }

    #[test]
    fn success_resets_consecutive_count() {
        let cb = breaker(3, 60);
        cb.record_failure(TargetClass::Api, None, "e");
        cb.record_failure(TargetClass::Api, None, "e");
        cb.record_success(TargetClass::Api, None);
        cb.record_failure(TargetClass::Api, None, "e");
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Closed);
    }

    #[test]
    fn opens_on_failure_rate() {
        let settings = BreakerSettings {
            failure_threshold: 100,
            failure_rate: 0.5,
            minimum_calls: 4,
            ..BreakerSettings::default()
        };
        let cb = CircuitBreaker::new(settings);
        cb.record_success(TargetClass::Api, None);
        cb.record_failure(TargetClass::Api, None, "e");
        cb.record_success(TargetClass::Api, None);
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Closed);
        cb.record_failure(TargetClass::Api, None, "e");
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Open);
    }

    #[test]
    fn zero_cooldown_admits_exactly_one_probe() {
        let cb = breaker(1, 0);
        cb.record_failure(TargetClass::Navigation, None, "timeout");
        let lease = lease_of(cb.check(TargetClass::Navigation));
        assert_eq!(cb.state(TargetClass::Navigation), CircuitState::HalfOpen);
        cb.record_success(TargetClass::Navigation, Some(lease));
        assert_eq!(cb.state(TargetClass::Navigation), CircuitState::Closed);
    }

    #[test]
    fn failed_probe_reopens() {
        let cb = breaker(1, 0);
        cb.record_failure(TargetClass::Api, None, "e");
        let lease = lease_of(cb.check(TargetClass::Api));
        cb.record_failure(TargetClass::Api, Some(lease), "still down");
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Open);
        let snap = cb.snapshot();
        assert_eq!(snap[0].times_opened, 2);
    }

    #[test]
    fn second_caller_rejected_while_probe_in_flight() {
        let cb = breaker(1, 1);
        cb.record_failure(TargetClass::Api, None, "e");
        expire_cooldown(&cb, TargetClass::Api);
        let lease = lease_of(cb.check(TargetClass::Api));
        assert!(matches!(
            cb.check(TargetClass::Api),
            BreakerDecision::Reject { .. }
        ));
        cb.release_probe(TargetClass::Api, Some(lease));
        assert!(matches!(cb.check(TargetClass::Api), BreakerDecision::Probe(_)));
    }

    #[test]
    fn late_outcomes_of_earlier_calls_do_not_decide_half_open() {
        let cb = breaker(1, 1);
        // Admitted while closed, still running when the circuit trips
        assert_eq!(cb.check(TargetClass::Api), BreakerDecision::Allow);
        cb.record_failure(TargetClass::Api, None, "503");
        expire_cooldown(&cb, TargetClass::Api);
        let lease = lease_of(cb.check(TargetClass::Api));

        cb.record_success(TargetClass::Api, None);
        assert_eq!(cb.state(TargetClass::Api), CircuitState::HalfOpen);
        cb.record_failure(TargetClass::Api, None, "late 503");
        assert_eq!(cb.state(TargetClass::Api), CircuitState::HalfOpen);
        cb.release_probe(TargetClass::Api, None);
        assert!(matches!(
            cb.check(TargetClass::Api),
            BreakerDecision::Reject { .. }
        ));

        cb.record_success(TargetClass::Api, Some(lease));
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Closed);
        assert_eq!(cb.snapshot()[0].total_calls, 4);
    }

    #[test]
    fn superseded_lease_is_ignored() {
        let cb = breaker(1, 0);
        cb.record_failure(TargetClass::Api, None, "e");
        let first = lease_of(cb.check(TargetClass::Api));
        // Zero cooldown: the unreported lease is re-issued right away
        let second = lease_of(cb.check(TargetClass::Api));
        assert_ne!(first, second);

        cb.record_success(TargetClass::Api, Some(first));
        assert_eq!(cb.state(TargetClass::Api), CircuitState::HalfOpen);
        cb.record_failure(TargetClass::Api, Some(second), "still down");
        assert_eq!(cb.state(TargetClass::Api), CircuitState::Open);
    }
}
