//! Circuit breaker for node protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: node assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests decide the outcome
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_fails >= threshold, or window failure rate >= threshold
//! Open → Half-Open: first allow_request after the cooldown (counts as trial 1)
//! Half-Open → Closed: every one of half_open_max_calls trials succeeded
//! Half-Open → Open: any trial failed once half_open_max_calls were issued
//! ```
//!
//! # Design Decisions
//! - One breaker per protected resource, created at startup
//! - All operations of one breaker run under its own mutex
//! - Unknown resources fail open

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    at: Instant,
    failed: bool,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    /// Outcomes inside the trailing window, oldest first.
    requests: VecDeque<Outcome>,
    consecutive_fails: u32,
    state_changed_at: Instant,
    half_open_calls: u32,
    half_open_success: u32,
}

impl BreakerState {
    fn new(now: Instant) -> Self {
        Self {
            state: CircuitState::Closed,
            requests: VecDeque::new(),
            consecutive_fails: 0,
            state_changed_at: now,
            half_open_calls: 0,
            half_open_success: 0,
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub window_requests: usize,
    pub window_failures: usize,
    pub consecutive_fails: u32,
    pub half_open_calls: u32,
    pub half_open_success: u32,
}

/// Admission gate for one protected resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a breaker; out-of-range settings fall back to their defaults.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: config.normalized(),
            inner: Mutex::new(BreakerState::new(Instant::now())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn allow_request(&self) -> bool {
        self.allow_request_at(Instant::now())
    }

    /// Admission decision as of `now`.
    pub fn allow_request_at(&self, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooldown = Duration::from_secs(self.config.cooldown_seconds);
                if now.saturating_duration_since(inner.state_changed_at) >= cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen, now);
                    // This call is the first half-open trial.
                    inner.half_open_calls = 1;
                    inner.half_open_success = 0;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_result(&self, success: bool) {
        self.record_result_at(success, Instant::now())
    }

    /// Record an outcome observed at `now`.
    pub fn record_result_at(&self, success: bool, now: Instant) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();

        inner.requests.push_back(Outcome { at: now, failed: !success });
        let window = Duration::from_secs(self.config.window_seconds);
        while let Some(front) = inner.requests.front() {
            if now.saturating_duration_since(front.at) > window {
                inner.requests.pop_front();
            } else {
                break;
            }
        }

        if success {
            inner.consecutive_fails = 0;
        } else {
            inner.consecutive_fails += 1;
        }

        match inner.state {
            CircuitState::Closed => {
                if self.should_open(&inner) {
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => {
                if success {
                    inner.half_open_success += 1;
                }
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    if inner.half_open_success >= self.config.half_open_max_calls {
                        self.transition(&mut inner, CircuitState::Closed, now);
                        inner.consecutive_fails = 0;
                        inner.requests.clear();
                    } else {
                        self.transition(&mut inner, CircuitState::Open, now);
                    }
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Force Closed with empty history.
    pub fn reset(&self) {
        let mut inner = self.lock();
        *inner = BreakerState::new(Instant::now());
        tracing::info!(breaker = %self.name, "Circuit breaker reset");
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            window_requests: inner.requests.len(),
            window_failures: inner.requests.iter().filter(|r| r.failed).count(),
            consecutive_fails: inner.consecutive_fails,
            half_open_calls: inner.half_open_calls,
            half_open_success: inner.half_open_success,
        }
    }

    fn should_open(&self, inner: &BreakerState) -> bool {
        if inner.consecutive_fails >= self.config.consecutive_fails {
            return true;
        }
        if inner.requests.is_empty() {
            return false;
        }
        let failures = inner.requests.iter().filter(|r| r.failed).count();
        let rate = failures as f64 / inner.requests.len() as f64;
        rate >= self.config.failure_rate
    }

    fn transition(&self, inner: &mut BreakerState, next: CircuitState, now: Instant) {
        if inner.state == next {
            return;
        }
        let prev = inner.state;
        inner.state = next;
        inner.state_changed_at = now;
        tracing::info!(breaker = %self.name, from = %prev, to = %next, "Circuit breaker state change");
        metrics::record_breaker_transition(&self.name, prev.as_str(), next.as_str());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One breaker per protected resource.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new<I, S>(config: CircuitBreakerConfig, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let config = config.normalized();
        let breakers = DashMap::new();
        for resource in resources {
            let resource = resource.into();
            breakers.insert(resource.clone(), Arc::new(CircuitBreaker::new(resource, config.clone())));
        }
        Self { config, breakers }
    }

    pub fn get(&self, resource: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(resource).map(|b| Arc::clone(b.value()))
    }

    /// Breaker for `resource`, created on first use.
    pub fn ensure(&self, resource: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(resource, self.config.clone())))
            .value()
            .clone()
    }

    /// Unknown resources are always admitted.
    pub fn allow_request(&self, resource: &str) -> bool {
        self.get(resource).map(|b| b.allow_request()).unwrap_or(true)
    }

    pub fn record_result(&self, resource: &str, success: bool) {
        if let Some(b) = self.get(resource) {
            b.record_result(success);
        }
    }

    /// Unknown resources report Closed.
    pub fn state(&self, resource: &str) -> CircuitState {
        self.get(resource).map(|b| b.state()).unwrap_or(CircuitState::Closed)
    }

    pub fn reset(&self, resource: &str) {
        if let Some(b) = self.get(resource) {
            b.reset();
        }
    }

    pub fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            window_seconds: 60,
            failure_rate: 0.5,
            consecutive_fails: 5,
            cooldown_seconds: 30,
            half_open_max_calls: 3,
        }
    }

    fn open_breaker(cb: &CircuitBreaker, at: Instant) {
        for _ in 0..cb.config().consecutive_fails {
            cb.record_result_at(false, at);
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_consecutive_failures_open_regardless_of_rate() {
        let cfg = CircuitBreakerConfig { failure_rate: 1.0, ..config() };
        let cb = CircuitBreaker::new("n1", cfg);
        let t0 = Instant::now();
        // Dilute the window so the rate stays under 1.0.
        cb.record_result_at(true, t0);
        for _ in 0..4 {
            cb.record_result_at(false, t0);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_result_at(false, t0);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_failure_rate_opens_below_consecutive_threshold() {
        let cb = CircuitBreaker::new("n1", config());
        let t0 = Instant::now();
        cb.record_result_at(true, t0);
        assert_eq!(cb.state(), CircuitState::Closed);
        // 1 failure out of 2 = 0.5.
        cb.record_result_at(false, t0);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.snapshot().consecutive_fails, 1);
    }

    #[test]
    fn test_window_prunes_old_entries() {
        let cfg = CircuitBreakerConfig { failure_rate: 0.6, ..config() };
        let cb = CircuitBreaker::new("n1", cfg);
        let t0 = Instant::now();
        cb.record_result_at(false, t0);
        cb.record_result_at(true, t0);
        cb.record_result_at(true, t0);

        let later = t0 + Duration::from_secs(61);
        cb.record_result_at(true, later);
        let snap = cb.snapshot();
        assert_eq!(snap.window_requests, 1);
        assert_eq!(snap.window_failures, 0);
    }

    #[test]
    fn test_open_rejects_until_cooldown() {
        let cb = CircuitBreaker::new("n1", config());
        let t0 = Instant::now();
        open_breaker(&cb, t0);

        assert!(!cb.allow_request_at(t0 + Duration::from_secs(29)));
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.allow_request_at(t0 + Duration::from_secs(30)));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_calls, 1);
    }

    #[test]
    fn test_half_open_allows_exactly_max_calls() {
        let cb = CircuitBreaker::new("n1", config());
        let t0 = Instant::now();
        open_breaker(&cb, t0);

        let t1 = t0 + Duration::from_secs(31);
        let allowed = (0..10).filter(|_| cb.allow_request_at(t1)).count();
        assert_eq!(allowed, 3);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new("n1", config());
        let t0 = Instant::now();
        open_breaker(&cb, t0);

        let t1 = t0 + Duration::from_secs(31);
        assert!(cb.allow_request_at(t1));
        cb.record_result_at(true, t1);
        assert!(cb.allow_request_at(t1));
        cb.record_result_at(false, t1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.allow_request_at(t1));
        cb.record_result_at(true, t1);
        assert_eq!(cb.state(), CircuitState::Open);

        // Cooldown restarts from the reopen.
        assert!(!cb.allow_request_at(t1 + Duration::from_secs(29)));
        assert!(cb.allow_request_at(t1 + Duration::from_secs(30)));
    }

    #[test]
    fn test_recovery_scenario() {
        let cb = CircuitBreaker::new("n1", config());
        let t0 = Instant::now();
        cb.record_result_at(true, t0);
        for _ in 0..5 {
            cb.record_result_at(false, t0);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        let t1 = t0 + Duration::from_secs(30);
        assert!(cb.allow_request_at(t1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_calls, 1);
        cb.record_result_at(true, t1);

        for _ in 0..2 {
            assert!(cb.allow_request_at(t1));
            cb.record_result_at(true, t1);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        let snap = cb.snapshot();
        assert_eq!(snap.window_requests, 0);
        assert_eq!(snap.consecutive_fails, 0);
    }

    #[test]
    fn test_reset_from_any_state() {
        let cb = CircuitBreaker::new("n1", config());
        let t0 = Instant::now();
        open_breaker(&cb, t0);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        let snap = cb.snapshot();
        assert_eq!(snap.window_requests, 0);
        assert_eq!(snap.consecutive_fails, 0);

        open_breaker(&cb, t0);
        assert!(cb.allow_request_at(t0 + Duration::from_secs(60)));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().half_open_calls, 0);
    }

    #[test]
    fn test_disabled_breaker_is_frozen_closed() {
        let cfg = CircuitBreakerConfig { enabled: false, ..config() };
        let cb = CircuitBreaker::new("n1", cfg);
        for _ in 0..20 {
            cb.record_result(false);
            assert!(cb.allow_request());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().window_requests, 0);
    }

    #[test]
    fn test_invalid_config_falls_back_to_defaults() {
        let cfg = CircuitBreakerConfig {
            enabled: true,
            window_seconds: 0,
            failure_rate: 1.5,
            consecutive_fails: 0,
            cooldown_seconds: 0,
            half_open_max_calls: 0,
        };
        let cb = CircuitBreaker::new("n1", cfg);
        assert_eq!(cb.config(), &CircuitBreakerConfig::default());
    }

    #[test]
    fn test_unknown_resource_fails_open() {
        let registry = BreakerRegistry::new(config(), ["n1"]);
        assert!(registry.allow_request("ghost"));
        assert_eq!(registry.state("ghost"), CircuitState::Closed);
        registry.record_result("ghost", false);
        assert!(registry.get("ghost").is_none());
    }

    #[test]
    fn test_registry_tracks_breakers_independently() {
        let registry = BreakerRegistry::new(config(), ["n1", "n2"]);
        for _ in 0..5 {
            registry.record_result("n1", false);
        }
        assert_eq!(registry.state("n1"), CircuitState::Open);
        assert_eq!(registry.state("n2"), CircuitState::Closed);
        assert!(!registry.allow_request("n1"));

        registry.reset("n1");
        assert_eq!(registry.state("n1"), CircuitState::Closed);

        let created = registry.ensure("n3");
        assert_eq!(created.name(), "n3");
        assert_eq!(registry.snapshots().len(), 3);
    }
}
