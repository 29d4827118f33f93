//! Retry policy with exponential backoff and jitter.
//!
//! A `RetryPolicy` is immutable configuration shared by `Arc` across many
//! nodes. The attempt counter and recorded delays live in the state of a
//! single [`run_with_retry`] call, never in the policy.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rampart_types::config::RetryConfig;
use rampart_types::event::EngineEvent;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ActionError, BreakChain, PolicyError, RetryExhaustedError, error_record};
use crate::event::EventBus;

/// Classifies a failure as retryable (`true`) or terminal (`false`).
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
    jitter_bound: Duration,
    max_delay: Option<Duration>,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    /// Build a validated policy without jitter or delay ceiling.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            jitter_bound: Duration::ZERO,
            max_delay: None,
            predicate: None,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::default()
    }

    /// Build from the `[retry]` config section. A non-empty
    /// `non_retryable_kinds` installs a predicate rejecting those kinds.
    pub fn from_config(config: &RetryConfig) -> Result<Self, PolicyError> {
        let base_delay = secs("base_delay_secs", config.base_delay_secs)?;
        let jitter_bound = secs("jitter_bound_secs", config.jitter_bound_secs)?;
        let max_delay = config
            .max_delay_secs
            .map(|v| secs("max_delay_secs", v))
            .transpose()?;

        let mut policy = Self::new(config.max_attempts, base_delay, config.backoff_multiplier)?
            .with_jitter(jitter_bound);
        if let Some(max_delay) = max_delay {
            policy = policy.with_max_delay(max_delay);
        }
        if !config.non_retryable_kinds.is_empty() {
            let kinds = config.non_retryable_kinds.clone();
            policy = policy.with_predicate(move |err| {
                let kind = error_record(err).kind;
                !kinds.iter().any(|k| *k == kind)
            });
        }
        Ok(policy)
    }

    pub fn with_jitter(mut self, jitter_bound: Duration) -> Self {
        self.jitter_bound = jitter_bound;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(
                self.backoff_multiplier.to_string(),
            ));
        }
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter_bound(&self) -> Duration {
        self.jitter_bound
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay to wait after the given failed attempt (1-based):
    /// `base_delay * multiplier^(attempt-1) + random(0, jitter_bound)`,
    /// capped at `max_delay` when set.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let jitter = if self.jitter_bound.is_zero() {
            0.0
        } else {
            rand::random::<f64>() * self.jitter_bound.as_secs_f64()
        };
        let delay = Duration::try_from_secs_f64(backoff + jitter).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Break signals are never retried; everything else defers to the
    /// predicate, or is retryable when none is set.
    pub fn is_retryable(&self, err: &anyhow::Error) -> bool {
        if err.downcast_ref::<BreakChain>().is_some() {
            return false;
        }
        self.predicate.as_ref().is_none_or(|p| p(err))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_bound: Duration::ZERO,
            max_delay: None,
            predicate: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_bound", &self.jitter_bound)
            .field("max_delay", &self.max_delay)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

fn secs(field: &'static str, value: f64) -> Result<Duration, PolicyError> {
    if !value.is_finite() || value < 0.0 {
        return Err(PolicyError::InvalidDelay {
            field,
            value: value.to_string(),
        });
    }
    Ok(Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX))
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

/// Attempts made and delays slept by one retry loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptTrail {
    pub attempts: u32,
    pub retry_delays: Vec<Duration>,
}

/// Run `attempt` until it succeeds, the policy declines to retry, or
/// `max_attempts` is reached. `attempt` receives the 1-based attempt number.
pub async fn run_with_retry<F, Fut>(
    policy: &RetryPolicy,
    action: &str,
    execution_id: Uuid,
    events: &EventBus,
    mut attempt: F,
) -> (Result<Value, ActionError>, AttemptTrail)
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<Value>>,
{
    let mut trail = AttemptTrail::default();
    loop {
        trail.attempts += 1;
        let err = match attempt(trail.attempts).await {
            Ok(value) => return (Ok(value), trail),
            Err(err) => err,
        };

        if let Some(signal) = err.downcast_ref::<BreakChain>() {
            tracing::info!(action, reason = %signal.reason, "break signal raised");
            let outcome = Err(ActionError::Break {
                action: action.to_string(),
                reason: signal.reason.clone(),
            });
            return (outcome, trail);
        }

        let cause = error_record(&err);
        if !policy.is_retryable(&err) {
            tracing::debug!(action, kind = %cause.kind, "failure is not retryable");
            let outcome = Err(ActionError::Failed {
                action: action.to_string(),
                cause,
            });
            return (outcome, trail);
        }

        if trail.attempts >= policy.max_attempts() {
            if policy.retries_enabled() {
                tracing::error!(
                    action,
                    attempts = trail.attempts,
                    error = %cause.message,
                    "all retry attempts failed"
                );
            }
            let outcome = Err(ActionError::RetryExhausted(RetryExhaustedError {
                action: action.to_string(),
                attempts: trail.attempts,
                cause,
            }));
            return (outcome, trail);
        }

        let delay = policy.delay_for(trail.attempts);
        tracing::warn!(
            action,
            attempt = trail.attempts,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %cause.message,
            "attempt failed, retrying"
        );
        events.publish(EngineEvent::RetryScheduled {
            execution_id,
            name: action.to_string(),
            attempt: trail.attempts,
            delay_ms: delay.as_millis() as u64,
            error: cause.message,
        });
        tokio::time::sleep(delay).await;
        trail.retry_delays.push(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::WorkerFailure;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_secs(1), 2.0).unwrap()
    }

    #[test]
    fn validation_rejects_bad_ranges() {
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO, 2.0).unwrap_err(),
            PolicyError::ZeroAttempts
        );
        assert!(matches!(
            RetryPolicy::new(3, Duration::ZERO, 0.5),
            Err(PolicyError::InvalidMultiplier(_))
        ));
        assert!(RetryPolicy::new(3, Duration::ZERO, f64::NAN).is_err());
        assert!(RetryPolicy::new(3, Duration::ZERO, 1.0).is_ok());
    }

    #[test]
    fn delays_grow_geometrically_without_jitter() {
        let policy = policy(5);
        let delays: Vec<_> = (1..=4).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn jitter_stays_within_bound_and_cap_applies() {
        let policy = policy(3).with_jitter(Duration::from_millis(500));
        for _ in 0..100 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_secs(1) && d <= Duration::from_millis(1500));
        }
        let capped = policy.with_max_delay(Duration::from_millis(1200));
        for attempt in 1..6 {
            assert!(capped.delay_for(attempt) <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn from_config_validates_and_builds_predicate() {
        let mut config = RetryConfig {
            max_attempts: 4,
            non_retryable_kinds: vec!["unknown_task".into()],
            ..RetryConfig::default()
        };
        let policy = RetryPolicy::from_config(&config).unwrap();
        assert_eq!(policy.max_attempts(), 4);
        assert!(!policy.is_retryable(&anyhow::Error::new(WorkerFailure::UnknownTask(
            "x".into()
        ))));
        assert!(policy.is_retryable(&anyhow::anyhow!("transient")));

        config.base_delay_secs = -1.0;
        assert!(matches!(
            RetryPolicy::from_config(&config),
            Err(PolicyError::InvalidDelay { field: "base_delay_secs", .. })
        ));
    }

    #[test]
    fn break_signal_is_never_retryable() {
        let policy = policy(5);
        assert!(!policy.is_retryable(&anyhow::Error::new(BreakChain::new("done"))));
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_body_runs_max_attempts_times() {
        let calls = AtomicU32::new(0);
        let (outcome, trail) = run_with_retry(
            &policy(4),
            "flaky",
            Uuid::now_v7(),
            &EventBus::default(),
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("down")) }
            },
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(trail.attempts, 4);
        assert_eq!(trail.retry_delays.len(), 3);
        match outcome {
            Err(ActionError::RetryExhausted(e)) => {
                assert_eq!(e.attempts, 4);
                assert_eq!(e.cause.message, "down");
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_and_records_delays() {
        let calls = AtomicU32::new(0);
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let started = tokio::time::Instant::now();

        let (outcome, trail) = run_with_retry(&policy(3), "step1", Uuid::now_v7(), &events, |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::anyhow!("not yet"))
                } else {
                    Ok(Value::from("ok"))
                }
            }
        })
        .await;

        assert_eq!(outcome.unwrap(), Value::from("ok"));
        assert_eq!(
            trail.retry_delays,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(matches!(
            rx.try_recv().unwrap(),
            EngineEvent::RetryScheduled { attempt: 1, delay_ms: 1000, .. }
        ));
    }

    #[tokio::test]
    async fn predicate_rejection_stops_immediately() {
        let policy = policy(5).with_predicate(|err| !err.to_string().contains("fatal"));
        let calls = AtomicU32::new(0);
        let (outcome, trail) = run_with_retry(&policy, "once", Uuid::now_v7(), &EventBus::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("fatal: bad config")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(trail.attempts, 1);
        assert!(matches!(outcome, Err(ActionError::Failed { .. })));
    }

    #[tokio::test]
    async fn break_signal_short_circuits() {
        let (outcome, trail) = run_with_retry(
            &policy(5),
            "gate",
            Uuid::now_v7(),
            &EventBus::default(),
            |_| async { Err(anyhow::Error::new(BreakChain::new("nothing to do"))) },
        )
        .await;
        assert_eq!(trail.attempts, 1);
        match outcome {
            Err(ActionError::Break { reason, .. }) => assert_eq!(reason, "nothing to do"),
            other => panic!("expected Break, got {other:?}"),
        }
    }
}
