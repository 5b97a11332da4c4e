//! Circuit breaker around external action calls.
//!
//! Each downstream service gets its own breaker. After `failure_threshold`
//! consecutive failures the circuit opens and calls are refused without
//! touching the service. Once `reset_timeout` has elapsed a single trial call
//! is let through (half-open): success closes the circuit, failure re-opens
//! it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial call
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_seconds: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout() -> u64 {
    60
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_seconds: default_reset_timeout(),
        }
    }
}

/// Outcome of a call made through the breaker
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The circuit refused the call; the service was not invoked
    #[error("Circuit open for service '{service}'")]
    CircuitOpen { service: String },

    /// The service was invoked and failed
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Circuit {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn state(&self, reset_timeout: Duration) -> CircuitState {
        match self.opened_at {
            None => CircuitState::Closed,
            Some(opened) if opened.elapsed() >= reset_timeout => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }
}

/// Per-service circuit breakers
pub struct CircuitBreaker {
    settings: BreakerSettings,
    circuits: Mutex<HashMap<String, Circuit>>,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.reset_timeout_seconds)
    }

    /// Current state of a service's circuit
    pub fn state(&self, service: &str) -> CircuitState {
        let circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        circuits
            .get(service)
            .map(|c| c.state(self.reset_timeout()))
            .unwrap_or(CircuitState::Closed)
    }

    /// Run `call` if the service's circuit allows it
    pub async fn call<T, E, F>(&self, service: &str, call: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let trial = self.admit(service)?;
        let mut guard = TrialGuard {
            breaker: self,
            service,
            armed: trial,
        };

        let result = call.await;
        guard.armed = false;
        self.record(service, result.is_ok());
        result.map_err(CallError::Inner)
    }

    /// Whether the call may proceed, and if so whether it is the half-open
    /// trial
    fn admit<E>(&self, service: &str) -> Result<bool, CallError<E>> {
        let reset_timeout = self.reset_timeout();
        let mut circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        let circuit = circuits.entry(service.to_string()).or_insert_with(Circuit::new);

        match circuit.state(reset_timeout) {
            CircuitState::Closed => Ok(false),
            CircuitState::HalfOpen if !circuit.trial_in_flight => {
                circuit.trial_in_flight = true;
                info!(service, "Circuit half-open, allowing trial call");
                Ok(true)
            }
            CircuitState::HalfOpen | CircuitState::Open => Err(CallError::CircuitOpen {
                service: service.to_string(),
            }),
        }
    }

    fn record(&self, service: &str, success: bool) {
        let mut circuits = self.circuits.lock().unwrap_or_else(|p| p.into_inner());
        let circuit = circuits.entry(service.to_string()).or_insert_with(Circuit::new);
        circuit.trial_in_flight = false;

        if success {
            if circuit.opened_at.is_some() {
                info!(service, "Circuit closed after successful trial call");
            }
            circuit.consecutive_failures = 0;
            circuit.opened_at = None;
            return;
        }

        circuit.consecutive_failures += 1;
        let was_open = circuit.opened_at.is_some();
        if was_open || circuit.consecutive_failures >= self.settings.failure_threshold {
            circuit.opened_at = Some(Instant::now());
            warn!(
                service,
                failures = circuit.consecutive_failures,
                "Circuit opened"
            );
        }
    }
}

/// Frees the half-open trial slot if the trial call is dropped before it
/// completes
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    service: &'a str,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut circuits = self
            .breaker
            .circuits
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(circuit) = circuits.get_mut(self.service) {
            circuit.trial_in_flight = false;
        }
        debug!(service = self.service, "Trial call abandoned");
    }
}
