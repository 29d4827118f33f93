//! Circuit breaker expressed as lifecycle hooks.
//!
//! After `failure_threshold` consecutive failed invocations the breaker opens
//! and its `before` hook rejects further invocations until `reset_after` has
//! elapsed. The next invocation after that is a probe: success closes the
//! circuit, failure opens it again. Other invocations are rejected while the
//! probe is in flight; a probe with no outcome after `reset_after` is
//! abandoned and the next caller becomes the probe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::{HookId, HookManager, HookStage};
use crate::context::ExecutionContext;

/// Circuit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation. Tracks consecutive failures toward the threshold.
    Closed { consecutive_failures: u32 },
    /// Rejecting invocations until `opened_at + reset_after`.
    Open { opened_at: Instant },
    /// One probe invocation, admitted at `probe_started`, is in flight.
    HalfOpen { probe_started: Instant },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_after: Duration,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: u32, reset_after: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            reset_after,
            state: Mutex::new(CircuitState::Closed {
                consecutive_failures: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().expect("circuit state lock poisoned").clone()
    }

    /// Check admission, moving Open -> HalfOpen once the wait has elapsed.
    /// Only the caller that makes that move is admitted as the probe.
    pub fn check(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().expect("circuit state lock poisoned");
        match *state {
            CircuitState::Closed { .. } => return Ok(()),
            CircuitState::Open { opened_at } => {
                let remaining = self.reset_after.saturating_sub(opened_at.elapsed());
                if !remaining.is_zero() {
                    anyhow::bail!(
                        "circuit '{}' is open for another {:.1}s",
                        self.name,
                        remaining.as_secs_f64()
                    );
                }
                tracing::info!(circuit = %self.name, "circuit half-open, allowing probe");
            }
            CircuitState::HalfOpen { probe_started } => {
                if probe_started.elapsed() < self.reset_after {
                    anyhow::bail!("circuit '{}' is half-open with a probe in flight", self.name);
                }
                tracing::warn!(circuit = %self.name, "probe produced no outcome, allowing another");
            }
        }
        *state = CircuitState::HalfOpen {
            probe_started: Instant::now(),
        };
        Ok(())
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit state lock poisoned");
        if !matches!(*state, CircuitState::Closed { .. }) {
            tracing::info!(circuit = %self.name, "circuit closed");
        }
        *state = CircuitState::Closed {
            consecutive_failures: 0,
        };
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("circuit state lock poisoned");
        let failures = match *state {
            CircuitState::Closed {
                consecutive_failures,
            } => consecutive_failures + 1,
            CircuitState::HalfOpen { .. } => self.failure_threshold,
            CircuitState::Open { .. } => return,
        };
        if failures >= self.failure_threshold {
            tracing::warn!(circuit = %self.name, failures, "circuit opened");
            *state = CircuitState::Open {
                opened_at: Instant::now(),
            };
        } else {
            *state = CircuitState::Closed {
                consecutive_failures: failures,
            };
        }
    }

    /// Attach the breaker's `before`, `on_success` and `on_error` hooks.
    ///
    /// Rejections raised by the breaker's own `before` hook are not counted
    /// as failures.
    pub fn install(self: &Arc<Self>, hooks: &mut HookManager) -> Vec<HookId> {
        let gate = Arc::clone(self);
        let on_success = Arc::clone(self);
        let on_error = Arc::clone(self);
        vec![
            hooks.on(HookStage::Before, format!("circuit:{}", self.name), move |_| {
                gate.check()
            }),
            hooks.on(
                HookStage::OnSuccess,
                format!("circuit:{}", self.name),
                move |_| {
                    on_success.record_success();
                    Ok(())
                },
            ),
            hooks.on(
                HookStage::OnError,
                format!("circuit:{}", self.name),
                move |ctx: &ExecutionContext| {
                    if ctx.error().is_none_or(|e| e.kind != "hook") {
                        on_error.record_failure();
                    }
                    Ok(())
                },
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold() {
        let breaker = CircuitBreaker::new("db", 2, Duration::from_secs(10));
        breaker.record_failure();
        assert_eq!(
            breaker.state(),
            CircuitState::Closed {
                consecutive_failures: 1
            }
        );
        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
        assert!(breaker.check().is_err());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new("db", 3, Duration::from_secs(10));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(
            breaker.state(),
            CircuitState::Closed {
                consecutive_failures: 1
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_after_reset_window() {
        let breaker = CircuitBreaker::new("api", 1, Duration::from_secs(5));
        breaker.record_failure();
        assert!(breaker.check().is_err());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(breaker.check().is_ok());
        assert!(matches!(breaker.state(), CircuitState::HalfOpen { .. }));

        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));

        tokio::time::advance(Duration::from_secs(5)).await;
        breaker.check().unwrap();
        breaker.record_success();
        assert_eq!(
            breaker.state(),
            CircuitState::Closed {
                consecutive_failures: 0
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_a_single_probe() {
        let breaker = CircuitBreaker::new("api", 1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;

        breaker.check().unwrap();
        let err = breaker.check().unwrap_err();
        assert!(err.to_string().contains("probe in flight"));
        assert!(breaker.check().is_err());

        breaker.record_success();
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_is_replaced_after_reset_window() {
        let breaker = CircuitBreaker::new("api", 1, Duration::from_secs(5));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(5)).await;
        breaker.check().unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(breaker.check().is_err());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_err());
    }

    #[test]
    fn install_registers_three_stages() {
        let breaker = Arc::new(CircuitBreaker::new("svc", 1, Duration::from_secs(1)));
        let mut hooks = HookManager::new();
        let ids = breaker.install(&mut hooks);
        assert_eq!(ids.len(), 3);
        assert_eq!(hooks.len(HookStage::Before), 1);
        assert_eq!(hooks.len(HookStage::OnSuccess), 1);
        assert_eq!(hooks.len(HookStage::OnError), 1);
    }
}
