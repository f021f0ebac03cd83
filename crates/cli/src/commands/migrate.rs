use propwise_core::config::{AppConfig, LoadOptions};
use propwise_db::{connect, migrations};

use crate::commands::{current_thread_runtime, CommandResult, EXIT_STORAGE};

/// Apply pending run-ledger migrations. Provider credentials are not needed.
pub fn run(mut options: LoadOptions) -> CommandResult {
    options.offline = true;
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("migrate", &error),
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
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
        pool.close().await;
        Ok::<(), (&'static str, String)>(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message)) => {
            CommandResult::failure("migrate", error_class, message, EXIT_STORAGE)
        }
    }
}
