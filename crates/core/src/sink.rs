use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::run::{PipelineRun, SealedRun};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("could not write artifact `{path}`: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("could not render artifact: {0}")]
    Render(String),
    #[error("run ledger write failed: {0}")]
    Ledger(String),
    #[error("run is not persistable: {0}")]
    NotPersistable(String),
}

/// Where a persisted run ended up, plus any secondary writes that failed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PersistReceipt {
    pub location: String,
    pub warnings: Vec<String>,
}

impl PersistReceipt {
    pub fn at(location: impl Into<String>) -> Self {
        Self { location: location.into(), warnings: Vec::new() }
    }
}

#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn persist(&self, run: &PipelineRun) -> Result<PersistReceipt, PersistError>;

    /// Record a run that ended without an artifact (blocked, aborted or degraded).
    ///
    /// Returns one warning per failed write; nothing here stops the run.
    async fn record_outcome(&self, _run: &SealedRun) -> Vec<String> {
        Vec::new()
    }
}

/// Keeps persisted runs and artifact-less outcomes in memory. Useful for tests.
#[derive(Clone, Default)]
pub struct InMemoryReportSink {
    runs: Arc<Mutex<Vec<PipelineRun>>>,
    outcomes: Arc<Mutex<Vec<SealedRun>>>,
}

impl InMemoryReportSink {
    pub fn runs(&self) -> Vec<PipelineRun> {
        match self.runs.lock() {
            Ok(runs) => runs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn outcomes(&self) -> Vec<SealedRun> {
        match self.outcomes.lock() {
            Ok(outcomes) => outcomes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ReportSink for InMemoryReportSink {
    async fn persist(&self, run: &PipelineRun) -> Result<PersistReceipt, PersistError> {
        match self.runs.lock() {
            Ok(mut runs) => runs.push(run.clone()),
            Err(poisoned) => poisoned.into_inner().push(run.clone()),
        }
        Ok(PersistReceipt::at(format!("memory://{}", run.id())))
    }

    async fn record_outcome(&self, run: &SealedRun) -> Vec<String> {
        match self.outcomes.lock() {
            Ok(mut outcomes) => outcomes.push(run.clone()),
            Err(poisoned) => poisoned.into_inner().push(run.clone()),
        }
        Vec::new()
    }
}
