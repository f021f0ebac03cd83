use std::sync::Arc;

use anyhow::Context;
use propwise_agent::providers::ScriptedProvider;
use propwise_agent::tools::StaticPropertySource;
use propwise_agent::{EvaluatorSettings, GuardrailEvaluator, PipelineRuntime, RuntimeSettings};
use propwise_core::config::{AppConfig, LoadOptions};
use propwise_core::{MetricsSnapshot, PipelineError, ReportSink, RunState, SealedRun};
use propwise_db::{
    connect, migrations, ArtifactReportSink, MarkdownArtifactWriter, SqlRunRepository,
};
use serde::Serialize;
use tracing::warn;

use crate::commands::{
    current_thread_runtime, CommandResult, EXIT_CONFIG, EXIT_GUARDRAIL_BLOCK, EXIT_OK,
    EXIT_RUN_ABORTED, EXIT_STORAGE,
};
use crate::logging::init_logging;

const COMMAND: &str = "run";

const DRY_RUN_REPORT: &str = "# Real Estate Market Report (dry run)\n\n\
Apartment prices in Lyon and Bordeaux track the sample listings; the Nice villa sits at the top \
of the range.\n\nRecommendation: compare price per square metre before making an offer.";

const DRY_RUN_VERDICT: &str = "Dry run: no issues detected.";

#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub prompt: Option<String>,
    pub compare: bool,
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RunOutcome<'a> {
    command: &'static str,
    status: &'static str,
    run_id: &'a str,
    state: &'static str,
    artifact: Option<&'a str>,
    error_class: Option<&'static str>,
    message: String,
    flagged_checks: Vec<&'a str>,
    metrics: &'a MetricsSnapshot,
}

pub fn run(mut options: LoadOptions, args: RunArgs) -> CommandResult {
    options.offline = args.dry_run;
    if args.compare {
        options.overrides.compare_providers = Some(true);
    }

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure(COMMAND, &error),
    };
    init_logging(&config.logging);

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_STORAGE,
            );
        }
    };

    let prompt = args.prompt.unwrap_or_else(|| config.pipeline.default_prompt.clone());
    runtime.block_on(async {
        let pipeline = if args.dry_run {
            dry_run_pipeline(&config)
        } else {
            let sink = report_sink(&config).await;
            match PipelineRuntime::from_config(&config, Arc::new(sink)) {
                Ok(pipeline) => pipeline,
                Err(error) => {
                    return CommandResult::failure(
                        COMMAND,
                        "pipeline_setup",
                        error.to_string(),
                        EXIT_CONFIG,
                    );
                }
            }
        };

        match pipeline.run(&prompt).await {
            Ok(sealed) => render_outcome(&sealed),
            Err(error) => CommandResult::failure(
                COMMAND,
                error.error_class(),
                error.to_string(),
                EXIT_RUN_ABORTED,
            ),
        }
    })
}

/// Artifact writer plus the run ledger when the database is reachable.
async fn report_sink(config: &AppConfig) -> ArtifactReportSink {
    let sink = ArtifactReportSink::new(MarkdownArtifactWriter::new(&config.reports.output_dir));
    match open_ledger(config).await {
        Ok(ledger) => sink.with_ledger(Arc::new(ledger)),
        Err(error) => {
            warn!(
                event_name = "pipeline.persist.ledger_unavailable",
                correlation_id = "startup",
                error = %format!("{error:#}"),
                "run ledger unavailable, writing artifacts only"
            );
            sink
        }
    }
}

async fn open_ledger(config: &AppConfig) -> anyhow::Result<SqlRunRepository> {
    let pool = connect(&config.database)
        .await
        .with_context(|| format!("could not connect to `{}`", config.database.url))?;
    migrations::run_pending(&pool).await.context("could not apply run-ledger migrations")?;
    Ok(SqlRunRepository::new(pool))
}

/// Scripted providers and sample listings: the whole pipeline, offline.
fn dry_run_pipeline(config: &AppConfig) -> PipelineRuntime {
    let primary =
        Arc::new(ScriptedProvider::new("dry-run:primary").with_fallback_reply(DRY_RUN_REPORT));
    let secondary =
        Arc::new(ScriptedProvider::new("dry-run:secondary").with_fallback_reply(DRY_RUN_REPORT));
    let guardrail =
        Arc::new(ScriptedProvider::new("dry-run:guardrail").with_fallback_reply(DRY_RUN_VERDICT));
    let sink: Arc<dyn ReportSink> =
        Arc::new(ArtifactReportSink::new(MarkdownArtifactWriter::new(&config.reports.output_dir)));

    PipelineRuntime::new(
        primary,
        secondary,
        GuardrailEvaluator::new(guardrail, EvaluatorSettings::from_config(config)),
        Arc::new(StaticPropertySource::sample()),
        sink,
        RuntimeSettings::from_config(config),
    )
}

fn render_outcome(sealed: &SealedRun) -> CommandResult {
    let failure = sealed.failure();
    let blocked = matches!(failure, Some(PipelineError::GuardrailBlocked { .. }));
    let (status, exit_code) = match sealed.state() {
        RunState::Done => ("ok", EXIT_OK),
        _ if blocked => ("blocked", EXIT_GUARDRAIL_BLOCK),
        _ => ("aborted", EXIT_RUN_ABORTED),
    };
    let message = match (failure, sealed.artifact()) {
        (Some(error), _) => error.to_string(),
        (None, Some(path)) => format!("report written to {path}"),
        (None, None) => "report not persisted".to_string(),
    };

    let payload = RunOutcome {
        command: COMMAND,
        status,
        run_id: sealed.id().as_str(),
        state: sealed.state().as_str(),
        artifact: sealed.artifact(),
        error_class: failure.map(PipelineError::error_class),
        message,
        flagged_checks: sealed.post_check().flagged().map(|check| check.name.as_str()).collect(),
        metrics: sealed.metrics(),
    };
    CommandResult::with_payload(exit_code, &payload)
}
