use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    RateLimited,
    Transient,
    Fatal,
}

impl ProviderErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Transient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map an HTTP status code to the failure class the retry and fallback layers act on.
pub fn classify_http_status(status: u16) -> ProviderErrorKind {
    match status {
        429 => ProviderErrorKind::RateLimited,
        408 | 500 | 502 | 503 | 504 => ProviderErrorKind::Transient,
        505..=599 => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Fatal,
    }
}

/// A classified failure from one provider invocation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub provider: String,
    pub status_code: Option<u16>,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error from `{}`", self.kind, self.provider)?;
        if let Some(status) = self.status_code {
            write!(f, " (HTTP {status})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl ProviderError {
    pub fn new(
        kind: ProviderErrorKind,
        provider: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            provider: provider.into(),
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, provider, message).with_status(429)
    }

    pub fn transient(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, provider, message)
    }

    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Fatal, provider, message)
    }

    pub fn from_status(
        provider: impl Into<String>,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            kind: classify_http_status(status),
            provider: provider.into(),
            status_code: Some(status),
            message: message.into(),
            retry_after,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == ProviderErrorKind::RateLimited
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Reasons a pipeline run ends in `Aborted`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("prompt blocked by guardrail `{check}`: {rationale}")]
    GuardrailBlocked { check: String, rationale: String },
    #[error("loop guard exceeded: run attempted more than {max_steps} steps")]
    LoopGuardExceeded { max_steps: u32 },
    #[error("{operation} failed after {attempts} attempt(s): {last}")]
    RetriesExhausted { operation: String, attempts: u32, last: ProviderError },
    #[error("run timed out after {0:?}")]
    RunTimedOut(Duration),
    #[error("property source `{source_name}` failed: {message}")]
    Source { source_name: String, message: String },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl PipelineError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::GuardrailBlocked { .. } => "guardrail_block",
            Self::LoopGuardExceeded { .. } => "loop_guard",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::RunTimedOut(_) => "timeout",
            Self::Source { .. } => "source",
            Self::Domain(_) => "invariant",
        }
    }

    pub fn last_provider_error(&self) -> Option<&ProviderError> {
        match self {
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

impl From<FlowTransitionError> for PipelineError {
    fn from(value: FlowTransitionError) -> Self {
        Self::Domain(DomainError::FlowTransition(value))
    }
}
