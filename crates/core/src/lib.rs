pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod guardrails;
pub mod metrics;
pub mod pii;
pub mod retry;
pub mod sink;

pub use domain::guardrail::{CheckKind, GuardrailCheck, GuardrailReport, Verdict};
pub use domain::provider::{ProviderId, ProviderKind, ProviderProfile};
pub use domain::run::{PipelineRun, ProviderComparison, RunId, SealedRun};
pub use errors::{
    classify_http_status, DomainError, PipelineError, ProviderError, ProviderErrorKind,
};
pub use flows::{FlowEngine, PipelineFlow, RunEvent, RunState};
pub use metrics::{MetricsSnapshot, RunMetrics, TokenPricing};
pub use pii::mask_pii;
pub use retry::{RetryDecision, RetryPolicy, RetryState, StepGuard};
pub use sink::{PersistError, PersistReceipt, ReportSink};
