use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use propwise_core::{CheckKind, PipelineRun, RunId, Verdict};

pub mod run;

pub use run::SqlRunRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Which guardrail pass produced a stored check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStage {
    Pre,
    Post,
}

impl CheckStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pre" => Some(Self::Pre),
            "post" => Some(Self::Post),
            _ => None,
        }
    }
}

/// One ledger row, as listed by `propwise history`. Blocked, aborted and degraded runs
/// have no artifact path.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: RunId,
    pub prompt: String,
    pub artifact_path: Option<String>,
    pub state: String,
    pub error_class: Option<String>,
    pub active_provider: Option<String>,
    pub flagged_checks: i64,
    pub api_calls: i64,
    pub external_api_calls: i64,
    pub estimated_cost_usd: String,
    pub hallucination_score: Option<f64>,
    pub elapsed_ms: i64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoredCheck {
    pub stage: CheckStage,
    pub name: String,
    pub kind: CheckKind,
    pub verdict: Verdict,
    pub rationale: String,
}

#[async_trait]
pub trait RunLedgerRepository: Send + Sync {
    async fn record_run(
        &self,
        run: &PipelineRun,
        artifact_path: Option<&str>,
    ) -> Result<(), RepositoryError>;

    async fn list_recent(&self, limit: u32) -> Result<Vec<RunSummary>, RepositoryError>;

    async fn checks_for_run(&self, run_id: &RunId) -> Result<Vec<StoredCheck>, RepositoryError>;
}
