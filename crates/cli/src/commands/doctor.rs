use propwise_agent::providers::build_provider;
use propwise_core::config::{AppConfig, DataSourceKind, LoadOptions};
use propwise_db::connect;
use serde::Serialize;

use crate::commands::{current_thread_runtime, CommandResult, EXIT_DOCTOR_FAILED, EXIT_OK};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code =
        if report.overall_status == CheckStatus::Pass { EXIT_OK } else { EXIT_DOCTOR_FAILED };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_providers(&config));
            checks.push(check_data_source(&config));
            checks.push(check_output_dir(&config));
            checks.push(check_database_connectivity(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.push(DoctorCheck::skipped("provider_readiness"));
            checks.push(DoctorCheck::skipped("data_source"));
            checks.push(DoctorCheck::skipped("report_output_dir"));
            checks.push(DoctorCheck::skipped("database_connectivity"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Build every configured adapter; no request is sent.
fn check_providers(config: &AppConfig) -> DoctorCheck {
    let sections = [
        &config.providers.primary,
        &config.providers.secondary,
        config.providers.guardrail_or_secondary(),
    ];
    let mut ready = Vec::new();
    for section in sections {
        match build_provider(section) {
            Ok(provider) => ready.push(provider.id().to_string()),
            Err(error) => return DoctorCheck::fail("provider_readiness", error.to_string()),
        }
    }
    ready.dedup();
    DoctorCheck::pass("provider_readiness", format!("adapters ready: {}", ready.join(", ")))
}

fn check_data_source(config: &AppConfig) -> DoctorCheck {
    match config.data.source {
        DataSourceKind::Airtable => DoctorCheck::pass(
            "data_source",
            format!(
                "airtable base `{}`, table `{}`",
                config.airtable.base_id.as_deref().unwrap_or_default(),
                config.airtable.table_name.as_deref().unwrap_or_default()
            ),
        ),
        DataSourceKind::Fixture => match config.data.fixture_path.as_deref() {
            Some(path) if path.is_file() => {
                DoctorCheck::pass("data_source", format!("fixture `{}`", path.display()))
            }
            Some(path) => {
                DoctorCheck::fail("data_source", format!("fixture `{}` not found", path.display()))
            }
            None => DoctorCheck::fail("data_source", "data.fixture_path is not configured"),
        },
    }
}

fn check_output_dir(config: &AppConfig) -> DoctorCheck {
    let dir = &config.reports.output_dir;
    match std::fs::create_dir_all(dir) {
        Ok(()) => DoctorCheck::pass("report_output_dir", format!("`{}` is usable", dir.display())),
        Err(error) => DoctorCheck::fail(
            "report_output_dir",
            format!("could not create `{}`: {error}", dir.display()),
        ),
    }
}

fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| format!("failed to connect to database: {error}"))?;

        pool.close().await;
        Ok::<(), String>(())
    });

    match result {
        Ok(()) => DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => DoctorCheck::fail("database_connectivity", error),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
