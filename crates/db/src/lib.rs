pub mod artifact;
pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod sink;

pub use artifact::{artifact_file_name, MarkdownArtifactWriter};
pub use connection::{connect, connect_with_settings, DbPool};
pub use repositories::{RepositoryError, RunLedgerRepository, RunSummary, SqlRunRepository};
pub use sink::ArtifactReportSink;
