//! Async retry controller: bounded attempts, linear backoff, and the run-wide loop guard.

use std::future::Future;
use std::pin::Pin;

use propwise_core::{PipelineError, ProviderError, RetryDecision, RetryPolicy, RetryState, StepGuard};
use tracing::{info, warn};

/// Boxed future for one attempt, borrowing the caller's state for `'a`.
pub type AttemptFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Runs provider calls under a [`RetryPolicy`], charging each attempt to a shared [`StepGuard`].
#[derive(Clone, Debug)]
pub struct RetryController<'g> {
    policy: RetryPolicy,
    guard: &'g StepGuard,
    correlation_id: String,
}

impl<'g> RetryController<'g> {
    pub fn new(policy: RetryPolicy, guard: &'g StepGuard, correlation_id: impl Into<String>) -> Self {
        Self { policy, guard, correlation_id: correlation_id.into() }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `work` until it succeeds, fails fatally, or runs out of attempts.
    ///
    /// Every attempt claims a loop-guard step first; an exhausted guard aborts with
    /// [`PipelineError::LoopGuardExceeded`] before the attempt is made.
    pub async fn execute<S, T, F>(
        &self,
        operation: &str,
        state: &mut S,
        mut work: F,
    ) -> Result<T, PipelineError>
    where
        S: Send,
        T: Send,
        F: for<'s> FnMut(&'s mut S) -> AttemptFuture<'s, T>,
    {
        let mut retry = RetryState::new(&self.policy);

        loop {
            let step = self.guard.step()?;
            let attempt = retry.begin_attempt();

            let error = match work(state).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            event_name = "pipeline.retry.recovered",
                            correlation_id = %self.correlation_id,
                            operation,
                            attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match retry.on_failure(error.kind, error.retry_after) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        event_name = "pipeline.retry.scheduled",
                        correlation_id = %self.correlation_id,
                        operation,
                        attempt,
                        step,
                        error_class = error.kind.as_str(),
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    warn!(
                        event_name = "pipeline.retry.exhausted",
                        correlation_id = %self.correlation_id,
                        operation,
                        attempts = attempt,
                        error_class = error.kind.as_str(),
                        error = %error,
                        "provider call gave up"
                    );
                    return Err(PipelineError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last: error,
                    });
                }
            }
        }
    }
}
