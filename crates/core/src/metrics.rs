use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::domain::provider::ProviderId;

const HEDGING_MARKERS: &[&str] = &["i don't know", "i do not know", "could be"];
const HEDGED_SCORE: f64 = 0.2;
const CONFIDENT_SCORE: f64 = 1.0;

/// Per-million-token rates used to derive the estimated run cost
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub input_usd_per_million: Decimal,
    pub output_usd_per_million: Decimal,
}

impl Default for TokenPricing {
    fn default() -> Self {
        Self {
            input_usd_per_million: Decimal::new(15, 1),
            output_usd_per_million: Decimal::new(50, 1),
        }
    }
}

impl TokenPricing {
    pub fn estimate_cost(&self, tokens_input: u64, tokens_output: u64) -> Decimal {
        let million = Decimal::from(1_000_000u64);
        let input = Decimal::from(tokens_input) / million * self.input_usd_per_million;
        let output = Decimal::from(tokens_output) / million * self.output_usd_per_million;
        (input + output).round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStats {
    pub calls: u64,
    pub successes: u64,
    pub external: bool,
}

/// Counters for one pipeline run. Owned by the orchestrator for the duration of the run.
#[derive(Clone, Debug, Default)]
pub struct RunMetrics {
    api_calls: u64,
    external_api_calls: u64,
    operations: BTreeMap<String, OperationStats>,
    inter_agent_interactions: u64,
    tokens_input: u64,
    tokens_output: u64,
    hallucination_score: Option<f64>,
    active_provider: Option<ProviderId>,
}

impl RunMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&mut self, operation: &str, success: bool, external: bool) {
        self.api_calls += 1;
        if external {
            self.external_api_calls += 1;
        }
        let stats = self.operations.entry(operation.to_string()).or_default();
        stats.calls += 1;
        if success {
            stats.successes += 1;
        }
        stats.external |= external;
    }

    pub fn record_tokens(&mut self, input: u64, output: u64) {
        self.tokens_input = self.tokens_input.saturating_add(input);
        self.tokens_output = self.tokens_output.saturating_add(output);
    }

    pub fn record_interaction(&mut self) {
        self.inter_agent_interactions += 1;
    }

    pub fn record_hallucination_score(&mut self, score: f64) {
        self.hallucination_score = Some(score.clamp(0.0, 1.0));
    }

    pub fn record_active_provider(&mut self, provider: &ProviderId) {
        self.active_provider = Some(provider.clone());
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls
    }

    pub fn external_api_calls(&self) -> u64 {
        self.external_api_calls
    }

    pub fn operation(&self, name: &str) -> Option<&OperationStats> {
        self.operations.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.api_calls == 0
            && self.inter_agent_interactions == 0
            && self.tokens_input == 0
            && self.tokens_output == 0
    }

    pub fn snapshot(&self, pricing: &TokenPricing, elapsed: Duration) -> MetricsSnapshot {
        MetricsSnapshot {
            api_calls: self.api_calls,
            external_api_calls: self.external_api_calls,
            operations: self.operations.clone(),
            inter_agent_interactions: self.inter_agent_interactions,
            tokens_input: self.tokens_input,
            tokens_output: self.tokens_output,
            estimated_cost_usd: pricing.estimate_cost(self.tokens_input, self.tokens_output),
            hallucination_score: self.hallucination_score,
            active_provider: self.active_provider.clone(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Read-only view of a finished run's metrics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub api_calls: u64,
    pub external_api_calls: u64,
    pub operations: BTreeMap<String, OperationStats>,
    pub inter_agent_interactions: u64,
    pub tokens_input: u64,
    pub tokens_output: u64,
    pub estimated_cost_usd: Decimal,
    pub hallucination_score: Option<f64>,
    pub active_provider: Option<ProviderId>,
    pub elapsed_ms: u64,
}

impl MetricsSnapshot {
    pub fn tool_success_rate(&self, operation: &str) -> Option<f64> {
        self.operations
            .get(operation)
            .filter(|stats| stats.calls > 0)
            .map(|stats| stats.successes as f64 / stats.calls as f64)
    }

    pub fn is_zero(&self) -> bool {
        self.api_calls == 0
            && self.external_api_calls == 0
            && self.operations.is_empty()
            && self.inter_agent_interactions == 0
            && self.tokens_input == 0
            && self.tokens_output == 0
    }
}

/// Coarse hallucination signal: 1.0 means the report reads as grounded, 0.2 means it hedges.
pub fn score_hallucination(report: &str) -> f64 {
    let lowered = report.to_lowercase();
    if HEDGING_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        HEDGED_SCORE
    } else {
        CONFIDENT_SCORE
    }
}
