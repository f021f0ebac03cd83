use std::sync::Arc;

use async_trait::async_trait;
use propwise_core::{PersistError, PersistReceipt, PipelineRun, ReportSink, SealedRun};

use crate::artifact::MarkdownArtifactWriter;
use crate::repositories::RunLedgerRepository;

/// Writes the markdown artifact, then records the run in the ledger when one is attached.
///
/// The artifact is the primary write. A ledger failure is reported as a receipt warning.
/// Runs that end without an artifact still reach the ledger through `record_outcome`.
pub struct ArtifactReportSink {
    writer: MarkdownArtifactWriter,
    ledger: Option<Arc<dyn RunLedgerRepository>>,
}

impl ArtifactReportSink {
    pub fn new(writer: MarkdownArtifactWriter) -> Self {
        Self { writer, ledger: None }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn RunLedgerRepository>) -> Self {
        self.ledger = Some(ledger);
        self
    }
}

#[async_trait]
impl ReportSink for ArtifactReportSink {
    async fn persist(&self, run: &PipelineRun) -> Result<PersistReceipt, PersistError> {
        let path = self.writer.write(run).await?;
        let location = path.display().to_string();
        let mut receipt = PersistReceipt::at(location.clone());

        if let Some(ledger) = &self.ledger {
            if let Err(error) = ledger.record_run(run, Some(&location)).await {
                receipt.warnings.push(format!("run ledger write failed: {error}"));
            }
        }

        Ok(receipt)
    }

    async fn record_outcome(&self, run: &SealedRun) -> Vec<String> {
        let Some(ledger) = &self.ledger else {
            return Vec::new();
        };
        match ledger.record_run(run, None).await {
            Ok(()) => Vec::new(),
            Err(error) => vec![format!("run ledger write failed: {error}")],
        }
    }
}
