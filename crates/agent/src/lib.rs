//! Agent runtime: provider adapters, fallback and retry, guardrail agents, and the pipeline
//! orchestrator.
//!
//! # Architecture
//!
//! A run follows a fixed path:
//! 1. **Pre-check** (`guardrails`) - pattern screen of the prompt; a block ends the run
//! 2. **Delegation** (`runtime`) - masked property records (`tools`) and the team brief
//!    (`roles`) go to one team call through the `fallback` binding, under the `retry` controller
//! 3. **Post-check** (`guardrails`) - pattern and model-backed checks of the report
//! 4. **Persistence** - the report sink writes the artifact
//!
//! # Key Types
//!
//! - `PipelineRuntime` - the orchestrator (see `runtime`)
//! - `ModelProvider` - uniform call contract implemented by `providers`
//! - `FallbackBinding` - primary/secondary pair with a sticky switch on rate limits
//!
//! # Safety Principle
//!
//! Prompts are screened before any model sees them, and property records are PII-masked before
//! they leave the tool boundary. Post-check findings are advisory and never alter the report.

pub mod fallback;
pub mod guardrails;
pub mod llm;
pub mod providers;
pub mod retry;
pub mod roles;
pub mod runtime;
pub mod tools;

pub use fallback::{ActiveSlot, FallbackBinding};
pub use guardrails::{EvaluatorSettings, GuardrailEvaluator};
pub use llm::{ModelProvider, ModelRequest, ModelResponse, TokenUsage};
pub use retry::RetryController;
pub use runtime::{PipelineRuntime, RuntimeBuildError, RuntimeSettings};
pub use tools::{PropertyRecord, PropertySource};
