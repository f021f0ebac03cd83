use async_trait::async_trait;
use propwise_core::{ProviderError, ProviderId, RunMetrics};

use crate::roles::AgentRole;

/// One request to a model backend: a role's standing instructions plus the task text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelRequest {
    pub role: AgentRole,
    pub instructions: String,
    pub prompt: String,
}

impl ModelRequest {
    pub fn for_role(role: AgentRole, prompt: impl Into<String>) -> Self {
        Self { role, instructions: role.instructions().to_string(), prompt: prompt.into() }
    }

    pub fn estimated_input_tokens(&self) -> u64 {
        estimate_tokens(&self.instructions) + estimate_tokens(&self.prompt)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelResponse {
    pub text: String,
    pub provider: ProviderId,
    pub usage: TokenUsage,
}

impl ModelResponse {
    /// Build a response, estimating usage for backends that report none.
    pub fn with_estimated_usage(
        provider: ProviderId,
        request: &ModelRequest,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        let usage = TokenUsage {
            input_tokens: request.estimated_input_tokens(),
            output_tokens: estimate_tokens(&text),
        };
        Self { text, provider, usage }
    }
}

/// Uniform call contract to a single model backend.
///
/// Implementations classify their own failures into [`ProviderError`] and never retry.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn capability(&self) -> &str {
        "text-generation"
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError>;
}

/// Invoke `provider` once and record the call, its tokens and the interaction in `metrics`.
pub async fn invoke_recorded(
    provider: &dyn ModelProvider,
    request: &ModelRequest,
    metrics: &mut RunMetrics,
    operation: &str,
    external: bool,
) -> Result<ModelResponse, ProviderError> {
    let result = provider.invoke(request).await;
    metrics.record_call(operation, result.is_ok(), external);
    if let Ok(response) = &result {
        metrics.record_tokens(response.usage.input_tokens, response.usage.output_tokens);
        metrics.record_interaction();
    }
    result
}

/// Coarse token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    chars.div_ceil(4)
}
