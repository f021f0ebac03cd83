use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::guardrail::GuardrailReport;
use crate::domain::provider::ProviderId;
use crate::errors::{DomainError, PipelineError};
use crate::flows::{RunContext, RunState, TransitionOutcome};
use crate::metrics::MetricsSnapshot;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used to keep artifact names short but unique per second.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of asking the comparer agent to weigh the two providers' reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderComparison {
    pub primary: ProviderId,
    pub alternate: ProviderId,
    pub alternate_report: Option<String>,
    pub verdict: String,
}

/// One pass through the pipeline. Mutated only by the orchestrator, then sealed.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineRun {
    id: RunId,
    prompt: String,
    started_at: DateTime<Utc>,
    state: RunState,
    pre_check: GuardrailReport,
    report: Option<String>,
    post_check: GuardrailReport,
    comparison: Option<ProviderComparison>,
    metrics: MetricsSnapshot,
    failure: Option<PipelineError>,
}

impl PipelineRun {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::with_id(RunId::generate(), prompt)
    }

    pub fn with_id(id: RunId, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            started_at: Utc::now(),
            state: RunState::Idle,
            pre_check: GuardrailReport::new(),
            report: None,
            post_check: GuardrailReport::new(),
            comparison: None,
            metrics: MetricsSnapshot::default(),
            failure: None,
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn pre_check(&self) -> &GuardrailReport {
        &self.pre_check
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn post_check(&self) -> &GuardrailReport {
        &self.post_check
    }

    pub fn comparison(&self) -> Option<&ProviderComparison> {
        self.comparison.as_ref()
    }

    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    pub fn failure(&self) -> Option<&PipelineError> {
        self.failure.as_ref()
    }

    pub fn flow_context(&self) -> RunContext {
        RunContext {
            pre_check_blocked: self.pre_check.is_blocked(),
            has_report: self.report.as_deref().is_some_and(|text| !text.trim().is_empty()),
        }
    }

    /// Move to the outcome's target state. The outcome must start from the current state.
    pub fn apply(&mut self, outcome: &TransitionOutcome) -> Result<(), DomainError> {
        if outcome.from != self.state {
            return Err(DomainError::InvariantViolation(format!(
                "transition from {} applied to run in state {}",
                outcome.from, self.state
            )));
        }
        self.state = outcome.to;
        Ok(())
    }

    pub fn record_pre_check(&mut self, report: GuardrailReport) {
        self.pre_check = report;
    }

    pub fn record_report(&mut self, text: impl Into<String>) {
        self.report = Some(text.into());
    }

    pub fn record_post_check(&mut self, report: GuardrailReport) {
        self.post_check = report;
    }

    pub fn record_comparison(&mut self, comparison: ProviderComparison) {
        self.comparison = Some(comparison);
    }

    pub fn record_metrics(&mut self, metrics: MetricsSnapshot) {
        self.metrics = metrics;
    }

    pub fn record_failure(&mut self, failure: PipelineError) {
        self.failure = Some(failure);
    }

    /// Freeze the run. Callers seal only after reaching `Done` or `Aborted`.
    pub fn seal(self, artifact: Option<String>) -> SealedRun {
        SealedRun { run: self, artifact, finished_at: Utc::now() }
    }
}

/// A finished run. Read-only; derefs to the underlying [`PipelineRun`].
#[derive(Clone, Debug, PartialEq)]
pub struct SealedRun {
    run: PipelineRun,
    artifact: Option<String>,
    finished_at: DateTime<Utc>,
}

impl SealedRun {
    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn succeeded(&self) -> bool {
        self.run.state == RunState::Done
    }
}

impl Deref for SealedRun {
    type Target = PipelineRun;

    fn deref(&self) -> &Self::Target {
        &self.run
    }
}

#[cfg(test)]
mod tests {
    use super::{PipelineRun, RunId};
    use crate::domain::guardrail::{GuardrailCheck, GuardrailReport, Verdict};
    use crate::flows::{FlowEngine, RunEvent, RunState};

    #[test]
    fn run_follows_engine_outcomes() {
        let engine = FlowEngine::default();
        let mut run = PipelineRun::with_id(RunId::new("abcdef1234"), "housing report");

        let outcome =
            engine.apply(&run.state(), &RunEvent::Started, &run.flow_context()).expect("start");
        run.apply(&outcome).expect("outcome matches current state");

        assert_eq!(run.state(), RunState::PreChecking);
        assert_eq!(run.id().short(), "abcdef12");
    }

    #[test]
    fn stale_outcome_is_rejected() {
        let engine = FlowEngine::default();
        let mut run = PipelineRun::new("housing report");
        let outcome = engine
            .apply(&RunState::PreChecking, &RunEvent::PromptCleared, &run.flow_context())
            .expect("valid in isolation");

        assert!(run.apply(&outcome).is_err());
        assert_eq!(run.state(), RunState::Idle);
    }

    #[test]
    fn flow_context_reflects_pre_check_and_report() {
        let mut run = PipelineRun::new("weapons market");
        let mut report = GuardrailReport::new();
        report.push(GuardrailCheck::pattern("forbidden_topic", Verdict::Block, "weapons"));
        run.record_pre_check(report);
        run.record_report("   ");

        let context = run.flow_context();
        assert!(context.pre_check_blocked);
        assert!(!context.has_report);
    }

    #[test]
    fn sealed_run_exposes_artifact_and_outcome() {
        let run = PipelineRun::new("villa prices");
        let sealed = run.seal(Some("reports/report.md".to_string()));

        assert_eq!(sealed.artifact(), Some("reports/report.md"));
        assert_eq!(sealed.prompt(), "villa prices");
        assert!(!sealed.succeeded());
    }
}
