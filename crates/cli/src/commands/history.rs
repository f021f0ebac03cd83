use propwise_core::config::{AppConfig, LoadOptions};
use propwise_db::{connect, migrations, RunLedgerRepository, RunSummary, SqlRunRepository};
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult, EXIT_OK, EXIT_STORAGE};

#[derive(Debug, Serialize)]
struct HistoryOutcome {
    command: &'static str,
    status: &'static str,
    runs: Vec<RunSummary>,
}

/// Most recent ledger rows, newest first. Artifact-less runs carry their state and error class.
pub fn run(mut options: LoadOptions, limit: u32) -> CommandResult {
    options.offline = true;
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("history", &error),
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_STORAGE,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string()))?;
        migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string()))?;
        let repository = SqlRunRepository::new(pool.clone());
        let runs = repository
            .list_recent(limit.max(1))
            .await
            .map_err(|error| ("ledger_query", error.to_string()))?;
        pool.close().await;
        Ok::<Vec<RunSummary>, (&'static str, String)>(runs)
    });

    match result {
        Ok(runs) => CommandResult::with_payload(
            EXIT_OK,
            &HistoryOutcome { command: "history", status: "ok", runs },
        ),
        Err((error_class, message)) => {
            CommandResult::failure("history", error_class, message, EXIT_STORAGE)
        }
    }
}
