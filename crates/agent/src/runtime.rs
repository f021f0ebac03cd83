use std::sync::Arc;
use std::time::Duration;

use propwise_core::audit::{AuditContext, AuditSink, NoopAuditSink};
use propwise_core::config::AppConfig;
use propwise_core::flows::TransitionOutcome;
use propwise_core::metrics::score_hallucination;
use propwise_core::{
    FlowEngine, PipelineError, PipelineFlow, PipelineRun, ProviderComparison, ProviderError,
    ReportSink, RetryPolicy, RunEvent, RunMetrics, SealedRun, StepGuard, TokenPricing,
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::fallback::FallbackBinding;
use crate::guardrails::{EvaluatorSettings, GuardrailEvaluator};
use crate::llm::{invoke_recorded, ModelProvider, ModelRequest, ModelResponse};
use crate::providers::build_provider;
use crate::retry::RetryController;
use crate::roles::{compose_team_brief, AgentRole};
use crate::tools::{fetch_masked_records, records_to_json, source_from_config, PropertySource};

const ACTOR: &str = "pipeline";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub policy: RetryPolicy,
    pub min_report_chars: usize,
    pub compare_providers: bool,
    pub pricing: TokenPricing,
    pub run_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            min_report_chars: 50,
            compare_providers: false,
            pricing: TokenPricing::default(),
            run_timeout: Duration::from_secs(900),
        }
    }
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            policy: config.retry.policy(),
            min_report_chars: config.guardrails.min_report_chars,
            compare_providers: config.pipeline.compare_providers,
            pricing: config.pricing.token_pricing(),
            run_timeout: config.pipeline.run_timeout(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeBuildError {
    #[error("could not configure provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("could not configure property source: {0}")]
    Source(#[from] PipelineError),
}

/// Drives one prompt through pre-check, delegated generation, post-check and persistence.
pub struct PipelineRuntime {
    primary: Arc<dyn ModelProvider>,
    secondary: Arc<dyn ModelProvider>,
    evaluator: GuardrailEvaluator,
    source: Arc<dyn PropertySource>,
    sink: Arc<dyn ReportSink>,
    audit: Arc<dyn AuditSink>,
    engine: FlowEngine<PipelineFlow>,
    settings: RuntimeSettings,
}

/// Mutable borrows one team call needs for each attempt.
struct TeamCall<'a> {
    binding: &'a mut FallbackBinding,
    metrics: &'a mut RunMetrics,
}

struct Generated {
    brief: String,
    response: ModelResponse,
}

impl PipelineRuntime {
    pub fn new(
        primary: Arc<dyn ModelProvider>,
        secondary: Arc<dyn ModelProvider>,
        evaluator: GuardrailEvaluator,
        source: Arc<dyn PropertySource>,
        sink: Arc<dyn ReportSink>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            primary,
            secondary,
            evaluator,
            source,
            sink,
            audit: Arc::new(NoopAuditSink),
            engine: FlowEngine::default(),
            settings,
        }
    }

    /// Wire real providers and the configured property source.
    pub fn from_config(
        config: &AppConfig,
        sink: Arc<dyn ReportSink>,
    ) -> Result<Self, RuntimeBuildError> {
        let primary = build_provider(&config.providers.primary)?;
        let secondary = build_provider(&config.providers.secondary)?;
        let guardrail = build_provider(config.providers.guardrail_or_secondary())?;
        let evaluator = GuardrailEvaluator::new(guardrail, EvaluatorSettings::from_config(config));
        let source = source_from_config(config)?;

        Ok(Self::new(
            primary,
            secondary,
            evaluator,
            source,
            sink,
            RuntimeSettings::from_config(config),
        ))
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// Run one prompt to completion.
    ///
    /// Every run ends sealed in `Done` or `Aborted`; the error path is reserved for
    /// lifecycle invariant violations.
    pub async fn run(&self, prompt: &str) -> Result<SealedRun, PipelineError> {
        let mut run = PipelineRun::new(prompt);
        let correlation_id = run.id().to_string();
        let audit = AuditContext::for_run(run.id(), ACTOR);
        let started = Instant::now();
        let deadline = started + self.settings.run_timeout;

        info!(
            event_name = "pipeline.run.started",
            correlation_id = %correlation_id,
            prompt_chars = prompt.chars().count(),
            "pipeline run started"
        );
        self.advance(&mut run, RunEvent::Started, &audit)?;

        run.record_pre_check(self.evaluator.pre_check(prompt));
        if let Some(block) = run.pre_check().first_block().cloned() {
            warn!(
                event_name = "pipeline.guardrail.prompt_blocked",
                correlation_id = %correlation_id,
                check = %block.name,
                rationale = %block.rationale,
                "prompt blocked before any provider call"
            );
            self.advance(&mut run, RunEvent::PromptBlocked, &audit)?;
            run.record_failure(PipelineError::GuardrailBlocked {
                check: block.name,
                rationale: block.rationale,
            });
            let sealed = run.seal(None);
            self.record_outcome(&sealed).await;
            return Ok(sealed);
        }
        self.advance(&mut run, RunEvent::PromptCleared, &audit)?;

        let guard = StepGuard::new(self.settings.policy.max_steps);
        let controller = RetryController::new(self.settings.policy.clone(), &guard, &correlation_id);
        let mut binding = FallbackBinding::new(
            Arc::clone(&self.primary),
            Arc::clone(&self.secondary),
            &correlation_id,
        );
        let mut metrics = RunMetrics::new();

        let generated = match tokio::time::timeout_at(
            deadline,
            self.generate(prompt, &controller, &mut binding, &mut metrics, &correlation_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::RunTimedOut(self.settings.run_timeout)),
        };
        let generated = match generated {
            Ok(generated) => generated,
            Err(error) => {
                return self.abort(run, error, &metrics, started, &audit).await;
            }
        };

        if self.settings.compare_providers {
            match self.compare(&generated, &controller, &binding, &mut metrics).await {
                Ok(comparison) => run.record_comparison(comparison),
                Err(error @ PipelineError::LoopGuardExceeded { .. }) => {
                    return self.abort(run, error, &metrics, started, &audit).await;
                }
                Err(error) => warn!(
                    event_name = "pipeline.comparison.failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "provider comparison skipped"
                ),
            }
        }

        let report = generated.response.text;
        run.record_report(report.clone());
        self.advance(&mut run, RunEvent::ReportGenerated, &audit)?;

        let post_check = match tokio::time::timeout_at(
            deadline,
            self.evaluator.post_check(&report, &guard, &mut metrics, &correlation_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PipelineError::RunTimedOut(self.settings.run_timeout)),
        };
        match post_check {
            Ok(checks) => run.record_post_check(checks),
            Err(error) => return self.abort(run, error, &metrics, started, &audit).await,
        }
        for check in run.post_check().flagged() {
            warn!(
                event_name = "pipeline.guardrail.flagged",
                correlation_id = %correlation_id,
                check = %check.name,
                kind = check.kind.as_str(),
                "post-check flagged the report"
            );
        }

        metrics.record_hallucination_score(score_hallucination(&report));
        run.record_metrics(metrics.snapshot(&self.settings.pricing, started.elapsed()));

        if report.trim().chars().count() < self.settings.min_report_chars {
            warn!(
                event_name = "pipeline.run.degraded_output",
                correlation_id = %correlation_id,
                report_chars = report.trim().chars().count(),
                min_report_chars = self.settings.min_report_chars,
                "report below minimum length, skipping persistence"
            );
            self.advance(&mut run, RunEvent::OutputDegraded, &audit)?;
            let sealed = self.finish(run, None);
            self.record_outcome(&sealed).await;
            return Ok(sealed);
        }

        self.advance(&mut run, RunEvent::ChecksCompleted, &audit)?;
        match self.sink.persist(&run).await {
            Ok(receipt) => {
                for warning in &receipt.warnings {
                    warn!(
                        event_name = "pipeline.persist.partial",
                        correlation_id = %correlation_id,
                        warning = %warning,
                        "secondary persistence write failed"
                    );
                }
                self.advance(&mut run, RunEvent::Persisted, &audit)?;
                Ok(self.finish(run, Some(receipt.location)))
            }
            Err(error) => {
                warn!(
                    event_name = "pipeline.persist.failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "artifact could not be written"
                );
                self.advance(&mut run, RunEvent::PersistFailed, &audit)?;
                let sealed = self.finish(run, None);
                self.record_outcome(&sealed).await;
                Ok(sealed)
            }
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        controller: &RetryController<'_>,
        binding: &mut FallbackBinding,
        metrics: &mut RunMetrics,
        correlation_id: &str,
    ) -> Result<Generated, PipelineError> {
        let records = fetch_masked_records(self.source.as_ref(), metrics, correlation_id).await?;
        let brief = compose_team_brief(&records_to_json(&records), prompt);
        let request = ModelRequest::for_role(AgentRole::Team, brief.clone());

        let mut call = TeamCall { binding, metrics };
        let response = controller
            .execute("team.report", &mut call, |call| {
                let request = request.clone();
                Box::pin(async move { call.binding.call(&request, call.metrics).await })
            })
            .await?;

        Ok(Generated { brief, response })
    }

    /// Ask the alternate provider for a second report and have the comparer weigh both.
    ///
    /// The comparer is pinned to the secondary provider and never moves the team binding.
    async fn compare(
        &self,
        generated: &Generated,
        controller: &RetryController<'_>,
        binding: &FallbackBinding,
        metrics: &mut RunMetrics,
    ) -> Result<ProviderComparison, PipelineError> {
        let alternate = binding.alternate();
        let alternate_id = alternate.id().clone();
        let operation = format!("provider.{alternate_id}");
        let request = ModelRequest::for_role(AgentRole::Team, generated.brief.clone());

        let alternate_report = controller
            .execute("comparison.alternate", metrics, |metrics| {
                let alternate = Arc::clone(&alternate);
                let request = request.clone();
                let operation = operation.clone();
                Box::pin(async move {
                    invoke_recorded(alternate.as_ref(), &request, metrics, &operation, true)
                        .await
                        .map(|response| response.text)
                })
            })
            .await?;

        let comparer_prompt = format!(
            "Version A ({}):\n{}\n\nVersion B ({}):\n{}",
            generated.response.provider, generated.response.text, alternate_id, alternate_report
        );
        let request = ModelRequest::for_role(AgentRole::Comparer, comparer_prompt);
        let comparer = Arc::clone(&self.secondary);
        let operation = format!("provider.{}", comparer.id());
        let verdict = controller
            .execute("comparison.verdict", metrics, |metrics| {
                let comparer = Arc::clone(&comparer);
                let request = request.clone();
                let operation = operation.clone();
                Box::pin(async move {
                    invoke_recorded(comparer.as_ref(), &request, metrics, &operation, true)
                        .await
                        .map(|response| response.text)
                })
            })
            .await?;

        Ok(ProviderComparison {
            primary: generated.response.provider.clone(),
            alternate: alternate_id,
            alternate_report: Some(alternate_report),
            verdict,
        })
    }

    fn advance(
        &self,
        run: &mut PipelineRun,
        event: RunEvent,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, PipelineError> {
        let outcome = self.engine.apply_with_audit(
            &run.state(),
            &event,
            &run.flow_context(),
            self.audit.as_ref(),
            audit,
        )?;
        run.apply(&outcome)?;
        info!(
            event_name = "pipeline.run.transition",
            correlation_id = %audit.correlation_id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            event = ?outcome.event,
            "run state advanced"
        );
        Ok(outcome)
    }

    async fn abort(
        &self,
        mut run: PipelineRun,
        error: PipelineError,
        metrics: &RunMetrics,
        started: Instant,
        audit: &AuditContext,
    ) -> Result<SealedRun, PipelineError> {
        warn!(
            event_name = "pipeline.run.aborted",
            correlation_id = %audit.correlation_id,
            error_class = error.error_class(),
            error = %error,
            "pipeline run aborted"
        );
        run.record_metrics(metrics.snapshot(&self.settings.pricing, started.elapsed()));
        run.record_failure(error);
        self.advance(&mut run, RunEvent::RunFailed, audit)?;
        let sealed = run.seal(None);
        self.record_outcome(&sealed).await;
        Ok(sealed)
    }

    async fn record_outcome(&self, sealed: &SealedRun) {
        for warning in self.sink.record_outcome(sealed).await {
            warn!(
                event_name = "pipeline.persist.outcome_failed",
                correlation_id = %sealed.id(),
                state = sealed.state().as_str(),
                warning = %warning,
                "run outcome could not be recorded"
            );
        }
    }

    fn finish(&self, run: PipelineRun, artifact: Option<String>) -> SealedRun {
        let sealed = run.seal(artifact);
        info!(
            event_name = "pipeline.run.completed",
            correlation_id = %sealed.id(),
            state = sealed.state().as_str(),
            artifact = sealed.artifact().unwrap_or("none"),
            api_calls = sealed.metrics().api_calls,
            external_api_calls = sealed.metrics().external_api_calls,
            "pipeline run completed"
        );
        sealed
    }
}
