//! Guardrail evaluator: pattern checks from `propwise-core` plus model-backed semantic checks.

use std::sync::Arc;

use propwise_core::config::AppConfig;
use propwise_core::guardrails::{evaluate_prompt, evaluate_report_patterns};
use propwise_core::{
    GuardrailCheck, GuardrailReport, PipelineError, RetryPolicy, RunMetrics, StepGuard, Verdict,
};
use tracing::{debug, warn};

use crate::llm::{invoke_recorded, ModelProvider, ModelRequest};
use crate::retry::RetryController;
use crate::roles::AgentRole;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SemanticCheck {
    pub name: &'static str,
    pub role: AgentRole,
    pub task: &'static str,
    pub excerpt: Excerpt,
}

/// How much of the report a semantic check gets to see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Excerpt {
    OffTopic,
    Standard,
}

/// Fixed evaluation order; the post-check report lists checks in this order.
pub const SEMANTIC_CHECKS: &[SemanticCheck] = &[
    SemanticCheck {
        name: "off_topic_llm",
        role: AgentRole::OffTopic,
        task: "Is this text off-topic for real estate pricing and client reporting?",
        excerpt: Excerpt::OffTopic,
    },
    SemanticCheck {
        name: "hallucination",
        role: AgentRole::Hallucination,
        task: "Does this report contain hallucinated or fabricated content?",
        excerpt: Excerpt::Standard,
    },
    SemanticCheck {
        name: "pii_leak",
        role: AgentRole::PiiDetector,
        task: "Does this report leak personally identifiable information?",
        excerpt: Excerpt::Standard,
    },
    SemanticCheck {
        name: "goal_adherence",
        role: AgentRole::Goal,
        task: "Does this report meet its goals?",
        excerpt: Excerpt::Standard,
    },
    SemanticCheck {
        name: "quality",
        role: AgentRole::Judge,
        task: "Rate the quality of this report out of 10.",
        excerpt: Excerpt::Standard,
    },
    SemanticCheck {
        name: "fact_check",
        role: AgentRole::FactCheck,
        task: "Check the facts in this report.",
        excerpt: Excerpt::Standard,
    },
    SemanticCheck {
        name: "format",
        role: AgentRole::Format,
        task: "Does this report follow the expected structure?",
        excerpt: Excerpt::Standard,
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvaluatorSettings {
    pub semantic_checks: bool,
    pub off_topic_excerpt_chars: usize,
    pub excerpt_chars: usize,
    pub policy: RetryPolicy,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            semantic_checks: true,
            off_topic_excerpt_chars: 1500,
            excerpt_chars: 2000,
            policy: RetryPolicy::default(),
        }
    }
}

impl EvaluatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            semantic_checks: config.guardrails.semantic_checks,
            off_topic_excerpt_chars: config.guardrails.off_topic_excerpt_chars,
            excerpt_chars: config.guardrails.excerpt_chars,
            policy: config.retry.policy(),
        }
    }
}

pub struct GuardrailEvaluator {
    provider: Arc<dyn ModelProvider>,
    settings: EvaluatorSettings,
}

impl GuardrailEvaluator {
    pub fn new(provider: Arc<dyn ModelProvider>, settings: EvaluatorSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Pattern-only prompt screen. Never calls a model.
    pub fn pre_check(&self, prompt: &str) -> GuardrailReport {
        evaluate_prompt(prompt)
    }

    /// Evaluate a generated report. Findings are advisory; only the loop guard aborts.
    pub async fn post_check(
        &self,
        report: &str,
        guard: &StepGuard,
        metrics: &mut RunMetrics,
        correlation_id: &str,
    ) -> Result<GuardrailReport, PipelineError> {
        let mut result = GuardrailReport::new();
        result.extend(evaluate_report_patterns(report));

        if !self.settings.semantic_checks {
            debug!(
                event_name = "pipeline.guardrail.semantic_skipped",
                correlation_id,
                "semantic checks disabled"
            );
            return Ok(result);
        }

        let controller = RetryController::new(self.settings.policy.clone(), guard, correlation_id);
        for check in SEMANTIC_CHECKS {
            let outcome = self.run_semantic(check, report, &controller, metrics).await;
            match outcome {
                Ok(finding) => result.push(finding),
                Err(error @ PipelineError::LoopGuardExceeded { .. }) => return Err(error),
                Err(error) => {
                    warn!(
                        event_name = "pipeline.guardrail.check_failed",
                        correlation_id,
                        check = check.name,
                        error_class = error.error_class(),
                        error = %error,
                        "semantic check failed, recording as flag"
                    );
                    result.push(GuardrailCheck::semantic(
                        check.name,
                        Verdict::Flag,
                        format!("check could not run: {error}"),
                    ));
                }
            }
        }

        Ok(result)
    }

    async fn run_semantic(
        &self,
        check: &SemanticCheck,
        report: &str,
        controller: &RetryController<'_>,
        metrics: &mut RunMetrics,
    ) -> Result<GuardrailCheck, PipelineError> {
        let limit = match check.excerpt {
            Excerpt::OffTopic => self.settings.off_topic_excerpt_chars,
            Excerpt::Standard => self.settings.excerpt_chars,
        };
        let request =
            ModelRequest::for_role(check.role, format!("{}\n\n{}", check.task, excerpt(report, limit)));
        let operation = format!("guardrail.{}", check.name);
        let provider = Arc::clone(&self.provider);

        let text = controller
            .execute(&operation, metrics, |metrics| {
                let provider = Arc::clone(&provider);
                let request = request.clone();
                let operation = operation.clone();
                Box::pin(async move {
                    invoke_recorded(provider.as_ref(), &request, metrics, &operation, false)
                        .await
                        .map(|response| response.text)
                })
            })
            .await?;

        let verdict = parse_verdict(&text);
        debug!(check = check.name, verdict = verdict.as_str(), "semantic check answered");
        Ok(GuardrailCheck::semantic(check.name, verdict, text))
    }
}

/// Read the verdict from the first non-empty line. Anything but an explicit `PASS` is a flag.
pub fn parse_verdict(answer: &str) -> Verdict {
    let first = answer.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default();
    let token: String = first
        .trim_start_matches(|c: char| !c.is_ascii_alphabetic())
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();

    match token.to_ascii_uppercase().as_str() {
        "PASS" => Verdict::Pass,
        _ => Verdict::Flag,
    }
}

fn excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
