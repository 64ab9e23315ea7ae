//! Circuit breaker: stop calling a dependency that keeps failing.
//!
//! ```text
//!   closed --(failure_threshold consecutive failures)--> open
//!   open   --(reset_timeout elapsed, next call)-------> half-open (one trial)
//!   half-open --(trial ok)--> closed
//!   half-open --(trial fails)--> open
//! ```
//!
//! All transitions happen under one mutex so a breaker shared by parallel
//! workflow branches admits exactly one half-open trial.

use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Point-in-time view of a breaker, for logs and status output
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub config: BreakerConfig,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. Pure read: an open breaker whose cooldown has elapsed
    /// still reports `Open` until a call actually acquires the trial.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
            config: self.config,
        }
    }

    /// Ask permission to make a call.
    ///
    /// Closed admits everything. Open rejects until the cooldown elapses,
    /// then moves to half-open and hands out a single trial permit. Half-open
    /// rejects while that trial is outstanding.
    ///
    /// The returned permit settles the call. A trial permit dropped without
    /// being settled (the caller was cancelled) counts as a failed trial.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(true);
                if !cooled {
                    return Err(self.rejection(&inner));
                }
                inner.state = CircuitState::HalfOpen;
                tracing::debug!(breaker = %self.name, "half-open, admitting trial call");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.rejection(&inner));
                }
                true
            }
        };
        if trial {
            inner.trial_in_flight = true;
        }
        Ok(BreakerPermit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn rejection(&self, inner: &Inner) -> Error {
        Error::circuit_open(&self.name)
            .with_operation("breaker::try_acquire")
            .with_context("state", inner.state.to_string())
            .with_context("failures", inner.failure_count.to_string())
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen {
            tracing::info!(breaker = %self.name, "trial succeeded, closing");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.last_failure = Some(now);
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "failure threshold reached, opening"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.failure_count += 1;
                inner.state = CircuitState::Open;
                inner.last_failure = Some(now);
                inner.trial_in_flight = false;
                tracing::warn!(breaker = %self.name, "trial failed, reopening");
            }
            CircuitState::Open => {
                // A call admitted before the trip finished late.
                inner.failure_count += 1;
                inner.last_failure = Some(now);
            }
        }
    }

    /// Force the breaker back to closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
    }

    /// Run one call through the breaker without retry or timeout
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let permit = self.try_acquire()?;
        let result = fut.await;
        permit.settle(&result);
        result
    }
}

/// Admission to one call through a [`CircuitBreaker`].
#[must_use = "dropping an unsettled trial permit reopens the breaker"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    pub fn settle<T>(self, result: &Result<T>) {
        match result {
            Ok(_) => self.success(),
            Err(_) => self.failure(),
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.settled || !self.trial {
            return;
        }
        tracing::warn!(breaker = %self.breaker.name, "trial call abandoned, reopening");
        self.breaker.record_failure();
    }
}

/// Breakers keyed by operation name, created on first use with a shared
/// config. The owner decides the naming scheme (e.g. `chat:<agent>`).
#[derive(Debug, Default)]
pub struct BreakerSet {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerSet {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.config)))
            .clone()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let breakers = self.breakers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut snaps: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }
}
