use std::sync::Arc;

use propwise_core::{ProviderError, ProviderProfile, RunMetrics};
use tracing::{info, warn};

use crate::llm::{ModelProvider, ModelRequest, ModelResponse};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveSlot {
    Primary,
    Secondary,
}

struct BoundProvider {
    provider: Arc<dyn ModelProvider>,
    profile: ProviderProfile,
}

impl BoundProvider {
    fn new(provider: Arc<dyn ModelProvider>) -> Self {
        let profile = ProviderProfile::new(provider.id().clone(), provider.capability());
        Self { provider, profile }
    }
}

/// Primary/secondary provider pair for one run.
///
/// A rate-limited primary is marked quota-exhausted and the binding switches to the
/// secondary for the rest of the run. Other failures are returned to the caller unchanged.
pub struct FallbackBinding {
    primary: BoundProvider,
    secondary: BoundProvider,
    active: ActiveSlot,
    correlation_id: String,
}

impl FallbackBinding {
    pub fn new(
        primary: Arc<dyn ModelProvider>,
        secondary: Arc<dyn ModelProvider>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            primary: BoundProvider::new(primary),
            secondary: BoundProvider::new(secondary),
            active: ActiveSlot::Primary,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn active_slot(&self) -> ActiveSlot {
        self.active
    }

    pub fn active_profile(&self) -> &ProviderProfile {
        &self.bound(self.active).profile
    }

    pub fn primary_profile(&self) -> &ProviderProfile {
        &self.primary.profile
    }

    /// The provider not currently serving the run, used for side-by-side comparison.
    pub fn alternate(&self) -> Arc<dyn ModelProvider> {
        let slot = match self.active {
            ActiveSlot::Primary => ActiveSlot::Secondary,
            ActiveSlot::Secondary => ActiveSlot::Primary,
        };
        Arc::clone(&self.bound(slot).provider)
    }

    fn bound(&self, slot: ActiveSlot) -> &BoundProvider {
        match slot {
            ActiveSlot::Primary => &self.primary,
            ActiveSlot::Secondary => &self.secondary,
        }
    }

    /// Invoke the active provider, switching to the secondary once on a primary rate limit.
    pub async fn call(
        &mut self,
        request: &ModelRequest,
        metrics: &mut RunMetrics,
    ) -> Result<ModelResponse, ProviderError> {
        match self.invoke_active(request, metrics).await {
            Err(error) if error.is_rate_limited() && self.active == ActiveSlot::Primary => {
                self.primary.profile.mark_quota_exhausted();
                self.active = ActiveSlot::Secondary;
                warn!(
                    event_name = "pipeline.provider.fallback",
                    correlation_id = %self.correlation_id,
                    from = %self.primary.profile.id(),
                    to = %self.secondary.profile.id(),
                    error = %error,
                    "primary provider rate limited, switching to secondary"
                );
                self.invoke_active(request, metrics).await
            }
            other => other,
        }
    }

    async fn invoke_active(
        &self,
        request: &ModelRequest,
        metrics: &mut RunMetrics,
    ) -> Result<ModelResponse, ProviderError> {
        let bound = self.bound(self.active);
        let operation = format!("provider.{}", bound.profile.id());
        metrics.record_active_provider(bound.profile.id());

        let result = bound.provider.invoke(request).await;
        metrics.record_call(&operation, result.is_ok(), true);
        match &result {
            Ok(response) => {
                metrics.record_tokens(response.usage.input_tokens, response.usage.output_tokens);
                metrics.record_interaction();
                info!(
                    event_name = "pipeline.provider.call_succeeded",
                    correlation_id = %self.correlation_id,
                    provider = %bound.profile.id(),
                    role = %request.role,
                    input_tokens = response.usage.input_tokens,
                    output_tokens = response.usage.output_tokens,
                    "provider call succeeded"
                );
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.provider.call_failed",
                    correlation_id = %self.correlation_id,
                    provider = %bound.profile.id(),
                    role = %request.role,
                    error_class = error.kind.as_str(),
                    error = %error,
                    "provider call failed"
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use propwise_core::{ProviderError, ProviderErrorKind, RunMetrics};

    use super::{ActiveSlot, FallbackBinding};
    use crate::llm::ModelRequest;
    use crate::providers::ScriptedProvider;
    use crate::roles::AgentRole;

    fn request() -> ModelRequest {
        ModelRequest::for_role(AgentRole::Team, "price the flats")
    }

    #[tokio::test]
    async fn rate_limited_primary_switches_to_secondary_for_the_run() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .then_fail(ProviderError::rate_limited("primary", "quota exhausted"))
                .with_fallback_reply("primary report"),
        );
        let secondary =
            Arc::new(ScriptedProvider::new("secondary").with_fallback_reply("secondary report"));
        let mut binding = FallbackBinding::new(primary.clone(), secondary.clone(), "corr");
        let mut metrics = RunMetrics::new();

        let first = binding.call(&request(), &mut metrics).await.expect("secondary answers");
        assert_eq!(first.text, "secondary report");
        assert_eq!(binding.active_slot(), ActiveSlot::Secondary);
        assert!(binding.primary_profile().is_quota_exhausted());

        let second = binding.call(&request(), &mut metrics).await.expect("still secondary");
        assert_eq!(second.text, "secondary report");
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 2);
        assert_eq!(metrics.external_api_calls(), 3);
        assert_eq!(binding.alternate().id().as_str(), "primary");
    }

    #[tokio::test]
    async fn transient_primary_failure_does_not_switch() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .then_fail(ProviderError::transient("primary", "connection reset")),
        );
        let secondary = Arc::new(ScriptedProvider::new("secondary").with_fallback_reply("unused"));
        let mut binding = FallbackBinding::new(primary, secondary.clone(), "corr");
        let mut metrics = RunMetrics::new();

        let error = binding.call(&request(), &mut metrics).await.expect_err("surfaced");

        assert_eq!(error.kind, ProviderErrorKind::Transient);
        assert_eq!(binding.active_slot(), ActiveSlot::Primary);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn rate_limited_secondary_is_returned_to_the_caller() {
        let primary = Arc::new(
            ScriptedProvider::new("primary")
                .then_fail(ProviderError::rate_limited("primary", "quota")),
        );
        let secondary = Arc::new(
            ScriptedProvider::new("secondary")
                .then_fail(ProviderError::rate_limited("secondary", "quota")),
        );
        let mut binding = FallbackBinding::new(primary, secondary, "corr");
        let mut metrics = RunMetrics::new();

        let error = binding.call(&request(), &mut metrics).await.expect_err("both limited");

        assert!(error.is_rate_limited());
        assert_eq!(error.provider, "secondary");
        assert_eq!(binding.active_slot(), ActiveSlot::Secondary);
    }
}
