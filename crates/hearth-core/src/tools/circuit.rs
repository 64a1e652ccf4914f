//! Per-tool circuit breakers.
//!
//! One state object per tool name lives in a `DashMap`; every transition for a
//! tool happens while holding that tool's entry lock, so the counter and state
//! never race under concurrent dispatch. Locks are never held across an await.
//!
//! Each time a circuit opens its generation advances. A permit remembers the
//! generation it was issued in, and ordinary (non-trial) outcomes from an
//! earlier generation are ignored, so only the trial call decides how a
//! half-open circuit leaves that state.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected without touching the network.
    Open,
    /// One trial call decides whether to close or re-open.
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures before the circuit opens.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&hearth_config::CircuitConfig> for CircuitBreakerConfig {
    fn from(cfg: &hearth_config::CircuitConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            reset_timeout: Duration::from_secs(cfg.reset_timeout_secs),
        }
    }
}

/// How a dispatched call ended, as far as the breaker is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// 2xx.
    Success,
    /// Any other non-5xx status: the service answered but refused the call.
    Rejected,
    /// 5xx, timeout or network failure.
    Failure,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    generation: u64,
}

impl Default for Circuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            trial_in_flight: false,
            generation: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub tool: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Process-wide table of circuits keyed by tool name.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    circuits: DashMap<String, Circuit>,
}

/// Permission to make one call. Must be settled with [`CircuitPermit::record`];
/// a trial permit dropped unsettled (cancelled call) frees the trial slot and
/// leaves the circuit half-open.
#[must_use]
pub struct CircuitPermit<'a> {
    breakers: &'a CircuitBreakers,
    tool: String,
    trial: bool,
    generation: u64,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record(mut self, outcome: CallOutcome) {
        self.settled = true;
        self.breakers
            .settle(&self.tool, self.trial, self.generation, outcome);
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breakers.release_trial(&self.tool);
        }
    }
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: DashMap::new(),
        }
    }

    /// Ask to call `tool`. `None` means the circuit rejects the call.
    pub fn try_acquire(&self, tool: &str) -> Option<CircuitPermit<'_>> {
        let (trial, generation) = {
            let mut circuit = self.circuits.entry(tool.to_string()).or_default();
            let state = circuit.state;
            let trial = match state {
                CircuitState::Closed => false,
                CircuitState::Open => {
                    let cooled = circuit
                        .last_failure
                        .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                    if !cooled {
                        return None;
                    }
                    info!("Circuit for '{tool}' half-open, allowing one trial call");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.trial_in_flight = true;
                    true
                }
                CircuitState::HalfOpen => {
                    if circuit.trial_in_flight {
                        return None;
                    }
                    circuit.trial_in_flight = true;
                    true
                }
            };
            (trial, circuit.generation)
        };

        Some(CircuitPermit {
            breakers: self,
            tool: tool.to_string(),
            trial,
            generation,
            settled: false,
        })
    }

    fn settle(&self, tool: &str, trial: bool, generation: u64, outcome: CallOutcome) {
        let Some(mut circuit) = self.circuits.get_mut(tool) else {
            return;
        };
        if trial {
            circuit.trial_in_flight = false;
        } else if circuit.generation != generation || circuit.state != CircuitState::Closed {
            debug!("Ignoring {outcome:?} for '{tool}' from before the circuit opened");
            return;
        }

        match outcome {
            CallOutcome::Success => close(tool, &mut circuit),
            // The service answered; only a half-open trial learns anything from it.
            CallOutcome::Rejected => {
                if circuit.state == CircuitState::HalfOpen {
                    close(tool, &mut circuit);
                }
            }
            CallOutcome::Failure => {
                circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
                circuit.last_failure = Some(Instant::now());
                let state = circuit.state;
                match state {
                    CircuitState::HalfOpen => {
                        circuit.state = CircuitState::Open;
                        circuit.generation += 1;
                        warn!("Trial call to '{tool}' failed, circuit re-opened");
                    }
                    CircuitState::Closed
                        if circuit.consecutive_failures >= self.config.failure_threshold =>
                    {
                        circuit.state = CircuitState::Open;
                        circuit.generation += 1;
                        warn!(
                            "Circuit for '{tool}' opened after {} consecutive failures, cooling down {:?}",
                            circuit.consecutive_failures, self.config.reset_timeout
                        );
                    }
                    _ => {}
                }
            }
        }
    }

    fn release_trial(&self, tool: &str) {
        if let Some(mut circuit) = self.circuits.get_mut(tool) {
            circuit.trial_in_flight = false;
        }
    }

    /// Current state; tools never called are `Closed`. An open circuit whose
    /// timeout has elapsed still reads `Open` until the next call arrives.
    pub fn state(&self, tool: &str) -> CircuitState {
        self.circuits
            .get(tool)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn consecutive_failures(&self, tool: &str) -> u32 {
        self.circuits
            .get(tool)
            .map_or(0, |c| c.consecutive_failures)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut rows: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|entry| CircuitSnapshot {
                tool: entry.key().clone(),
                state: entry.state,
                consecutive_failures: entry.consecutive_failures,
            })
            .collect();
        rows.sort_by(|a, b| a.tool.cmp(&b.tool));
        rows
    }
}

fn close(tool: &str, circuit: &mut Circuit) {
    if circuit.state != CircuitState::Closed {
        info!("Circuit for '{tool}' closed");
    }
    circuit.state = CircuitState::Closed;
    circuit.consecutive_failures = 0;
    circuit.last_failure = None;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakers(threshold: u32, reset_secs: u64) -> CircuitBreakers {
        CircuitBreakers::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(reset_secs),
        })
    }

    fn fail(b: &CircuitBreakers, tool: &str) {
        b.try_acquire(tool).unwrap().record(CallOutcome::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_threshold() {
        let b = breakers(3, 30);
        fail(&b, "t");
        fail(&b, "t");
        assert_eq!(b.state("t"), CircuitState::Closed);
        fail(&b, "t");
        assert_eq!(b.state("t"), CircuitState::Open);
        assert!(b.try_acquire("t").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_counter() {
        let b = breakers(3, 30);
        fail(&b, "t");
        fail(&b, "t");
        b.try_acquire("t").unwrap().record(CallOutcome::Success);
        fail(&b, "t");
        fail(&b, "t");
        assert_eq!(b.state("t"), CircuitState::Closed);
        assert_eq!(b.consecutive_failures("t"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_never_count() {
        let b = breakers(2, 30);
        for _ in 0..10 {
            b.try_acquire("t").unwrap().record(CallOutcome::Rejected);
        }
        assert_eq!(b.state("t"), CircuitState::Closed);
        assert_eq!(b.consecutive_failures("t"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_one_trial() {
        let b = breakers(1, 30);
        fail(&b, "t");

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(b.try_acquire("t").is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        let trial = b.try_acquire("t").unwrap();
        assert!(trial.is_trial());
        assert_eq!(b.state("t"), CircuitState::HalfOpen);
        assert!(b.try_acquire("t").is_none());

        trial.record(CallOutcome::Success);
        assert_eq!(b.state("t"), CircuitState::Closed);
        assert!(!b.try_acquire("t").unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_fresh_timestamp() {
        let b = breakers(1, 30);
        fail(&b, "t");
        tokio::time::advance(Duration::from_secs(30)).await;

        b.try_acquire("t").unwrap().record(CallOutcome::Failure);
        assert_eq!(b.state("t"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(b.try_acquire("t").is_none());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(b.try_acquire("t").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_trial_frees_slot() {
        let b = breakers(1, 5);
        fail(&b, "t");
        tokio::time::advance(Duration::from_secs(5)).await;

        drop(b.try_acquire("t").unwrap());
        assert_eq!(b.state("t"), CircuitState::HalfOpen);
        assert!(b.try_acquire("t").unwrap().is_trial());
    }

    #[tokio::test(start_paused = true)]
    async fn circuits_are_per_tool() {
        let b = breakers(1, 30);
        fail(&b, "chore_tool");
        assert_eq!(b.state("chore_tool"), CircuitState::Open);
        assert!(b.try_acquire("screen_tool").is_some());

        let snap = b.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].tool, "chore_tool");
        assert_eq!(snap[0].state, CircuitState::Open);
        assert_eq!(snap[1].state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn late_outcome_from_before_opening_is_ignored() {
        let b = breakers(1, 30);
        let early = b.try_acquire("t").unwrap();
        fail(&b, "t");
        assert_eq!(b.state("t"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(30)).await;
        let trial = b.try_acquire("t").unwrap();
        assert!(trial.is_trial());

        early.record(CallOutcome::Success);
        assert_eq!(b.state("t"), CircuitState::HalfOpen);
        assert!(b.try_acquire("t").is_none());

        trial.record(CallOutcome::Failure);
        assert_eq!(b.state("t"), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn late_failure_cannot_reopen_after_trial_closed() {
        let b = breakers(1, 30);
        let early = b.try_acquire("t").unwrap();
        fail(&b, "t");
        tokio::time::advance(Duration::from_secs(30)).await;
        b.try_acquire("t").unwrap().record(CallOutcome::Success);
        assert_eq!(b.state("t"), CircuitState::Closed);

        early.record(CallOutcome::Failure);
        assert_eq!(b.state("t"), CircuitState::Closed);
        assert_eq!(b.consecutive_failures("t"), 0);
    }

    #[test]
    fn config_from_settings() {
        let cfg = CircuitBreakerConfig::from(&hearth_config::CircuitConfig {
            failure_threshold: 0,
            reset_timeout_secs: 7,
        });
        assert_eq!(cfg.failure_threshold, 1);
        assert_eq!(cfg.reset_timeout, Duration::from_secs(7));
    }
}
