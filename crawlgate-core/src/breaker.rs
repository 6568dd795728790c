//! Three-state circuit breaker for calls to a remote queue service.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { trial_in_flight: bool },
}

/// Fails fast while a dependency is known to be down.
///
/// `failure_threshold` consecutive failures open the breaker for
/// `open_duration`. After that exactly one trial call goes through: success
/// closes the breaker, failure opens it again. Only the trial call moves the
/// breaker out of half-open; calls admitted while closed that finish late
/// never close an open breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    open_duration: Duration,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: config.open_duration(),
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    pub fn state(&self) -> BreakerState {
        match *self.state.lock() {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { until } if Instant::now() >= until => BreakerState::HalfOpen,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    /// Run `call` through the breaker. Transport errors and 5xx responses
    /// count as failures; anything else proves the dependency is reachable.
    pub async fn call<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut permit = self.admit()?;
        let result = call.await;

        match &result {
            Err(err) if counts_as_failure(err) => self.on_failure(permit.trial),
            _ => self.on_success(permit.trial),
        }
        permit.settled = true;
        result
    }

    fn admit(&self) -> Result<Permit<'_>> {
        let mut state = self.state.lock();
        let trial = match *state {
            State::Closed { .. } => false,
            State::Open { until } if Instant::now() >= until => {
                info!(breaker = %self.name, "Breaker half-open, admitting trial call");
                *state = State::HalfOpen {
                    trial_in_flight: true,
                };
                true
            }
            State::HalfOpen {
                trial_in_flight: false,
            } => {
                *state = State::HalfOpen {
                    trial_in_flight: true,
                };
                true
            }
            State::Open { .. } | State::HalfOpen { .. } => {
                return Err(GateError::Unavailable(format!(
                    "{} circuit is open",
                    self.name
                )));
            }
        };

        Ok(Permit {
            breaker: self,
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut state = self.state.lock();
        match *state {
            State::HalfOpen { .. } if trial => {
                info!(breaker = %self.name, "Breaker closed");
                *state = State::Closed { failures: 0 };
            }
            State::Closed { .. } => *state = State::Closed { failures: 0 },
            State::Open { .. } | State::HalfOpen { .. } => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut state = self.state.lock();
        let failures = match *state {
            State::Closed { failures } => failures + 1,
            State::HalfOpen { .. } if trial => self.failure_threshold,
            State::Open { .. } | State::HalfOpen { .. } => return,
        };

        if failures >= self.failure_threshold {
            warn!(
                breaker = %self.name,
                failures,
                open_for_ms = self.open_duration.as_millis() as u64,
                "Breaker opened"
            );
            *state = State::Open {
                until: Instant::now() + self.open_duration,
            };
        } else {
            *state = State::Closed { failures };
        }
    }

    /// A trial call that was dropped before finishing frees the slot for the
    /// next caller.
    fn abandon(&self, trial: bool) {
        if !trial {
            return;
        }
        let mut state = self.state.lock();
        if let State::HalfOpen { trial_in_flight } = &mut *state {
            *trial_in_flight = false;
        }
    }
}

#[derive(Debug)]
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.abandon(self.trial);
        }
    }
}

fn counts_as_failure(err: &GateError) -> bool {
    match err {
        GateError::Transport(_) | GateError::Unavailable(_) => true,
        GateError::Remote { status, .. } => *status >= 500,
        _ => false,
    }
}
