//! Bounded retry bookkeeping
//!
//! Pure state for the async retry controller: per-call attempt/delay tracking and the
//! run-scoped loop guard. Nothing here sleeps or performs I/O.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::errors::{PipelineError, ProviderErrorKind};

/// Retry limits applied to every provider call in a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `base_delay * n`
    pub base_delay: Duration,
    /// Ceiling on attempts across the whole run
    pub max_steps: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, base_delay: Duration::from_secs(10), max_steps: 20 }
    }
}

impl RetryPolicy {
    /// Linear backoff: strictly increasing in `attempt` whenever `base_delay` is non-zero.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// What the controller should do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Per-call retry state, created for one call and dropped afterwards
#[derive(Clone, Debug)]
pub struct RetryState {
    attempt: u32,
    delay: Duration,
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            delay: Duration::ZERO,
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Decide whether a failure of `kind` on the current attempt is retried.
    ///
    /// A provider `hint` (Retry-After) raises the wait. Later waits in the same call always
    /// exceed the previous one by at least `base_delay`, hint or not.
    pub fn on_failure(&mut self, kind: ProviderErrorKind, hint: Option<Duration>) -> RetryDecision {
        if !kind.is_retryable() || self.attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let linear = self.base_delay.saturating_mul(self.attempt);
        let stepped = if self.delay.is_zero() {
            linear
        } else {
            self.delay.saturating_add(self.base_delay)
        };
        self.delay = linear.max(stepped).max(hint.unwrap_or_default());
        RetryDecision::RetryAfter(self.delay)
    }
}

/// Run-scoped ceiling on provider attempts, shared by every retried operation
#[derive(Debug)]
pub struct StepGuard {
    max_steps: u32,
    taken: AtomicU32,
}

impl StepGuard {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps, taken: AtomicU32::new(0) }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn taken(&self) -> u32 {
        self.taken.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u32 {
        self.max_steps.saturating_sub(self.taken())
    }

    /// Claim one step. Fails, without counting, when the claim would exceed the ceiling.
    pub fn step(&self) -> Result<u32, PipelineError> {
        self.taken
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |taken| {
                (taken < self.max_steps).then_some(taken + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| PipelineError::LoopGuardExceeded { max_steps: self.max_steps })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::{RetryDecision, RetryPolicy, RetryState, StepGuard};
    use crate::errors::{PipelineError, ProviderErrorKind};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, base_delay: Duration::from_millis(100), max_steps: 20 }
    }

    #[test]
    fn transient_failures_back_off_linearly_until_attempts_run_out() {
        let mut state = RetryState::new(&policy(3));

        state.begin_attempt();
        assert_eq!(
            state.on_failure(ProviderErrorKind::Transient, None),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        state.begin_attempt();
        assert_eq!(
            state.on_failure(ProviderErrorKind::RateLimited, None),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        state.begin_attempt();
        assert_eq!(state.on_failure(ProviderErrorKind::Transient, None), RetryDecision::GiveUp);
        assert_eq!(state.attempt(), 3);
    }

    #[test]
    fn retry_after_hint_lifts_every_later_wait() {
        let mut state = RetryState::new(&policy(5));

        state.begin_attempt();
        assert_eq!(
            state.on_failure(ProviderErrorKind::RateLimited, Some(Duration::from_secs(6))),
            RetryDecision::RetryAfter(Duration::from_secs(6))
        );
        state.begin_attempt();
        assert_eq!(
            state.on_failure(ProviderErrorKind::Transient, None),
            RetryDecision::RetryAfter(Duration::from_millis(6_100))
        );
        state.begin_attempt();
        assert_eq!(
            state.on_failure(ProviderErrorKind::Transient, Some(Duration::from_millis(50))),
            RetryDecision::RetryAfter(Duration::from_millis(6_200))
        );
        assert_eq!(state.delay(), Duration::from_millis(6_200));
    }

    #[test]
    fn fatal_failures_are_never_retried() {
        let mut state = RetryState::new(&policy(5));
        state.begin_attempt();
        assert_eq!(state.on_failure(ProviderErrorKind::Fatal, None), RetryDecision::GiveUp);
        assert_eq!(state.delay(), Duration::ZERO);
    }

    #[test]
    fn step_guard_aborts_exactly_past_the_ceiling() {
        let guard = StepGuard::new(3);

        assert_eq!(guard.step(), Ok(1));
        assert_eq!(guard.step(), Ok(2));
        assert_eq!(guard.step(), Ok(3));
        assert_eq!(guard.step(), Err(PipelineError::LoopGuardExceeded { max_steps: 3 }));
        assert_eq!(guard.taken(), 3);
        assert_eq!(guard.remaining(), 0);
    }

    proptest! {
        #[test]
        fn backoff_is_strictly_increasing(base_ms in 1u64..60_000, attempt in 1u32..1_000) {
            let policy = RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_millis(base_ms),
                max_steps: u32::MAX,
            };
            prop_assert!(policy.delay_for_attempt(attempt + 1) > policy.delay_for_attempt(attempt));
        }

        #[test]
        fn waits_within_a_call_strictly_increase(
            base_ms in 1u64..10_000,
            hints in proptest::collection::vec(proptest::option::of(0u64..120_000), 1..8),
        ) {
            let mut state = RetryState::new(&RetryPolicy {
                max_attempts: u32::MAX,
                base_delay: Duration::from_millis(base_ms),
                max_steps: u32::MAX,
            });
            let mut previous = Duration::ZERO;
            for hint in hints {
                state.begin_attempt();
                let decision =
                    state.on_failure(ProviderErrorKind::Transient, hint.map(Duration::from_millis));
                let RetryDecision::RetryAfter(delay) = decision else {
                    return Err(TestCaseError::fail("retryable failure must be retried"));
                };
                prop_assert!(delay > previous);
                prop_assert_eq!(state.delay(), delay);
                previous = delay;
            }
        }

        #[test]
        fn step_counter_never_decreases(max_steps in 0u32..50, claims in 0usize..80) {
            let guard = StepGuard::new(max_steps);
            let mut previous = guard.taken();
            for _ in 0..claims {
                let outcome = guard.step();
                let now = guard.taken();
                prop_assert!(now >= previous);
                prop_assert!(now <= max_steps);
                prop_assert_eq!(outcome.is_err(), previous == max_steps);
                previous = now;
            }
        }
    }
}
