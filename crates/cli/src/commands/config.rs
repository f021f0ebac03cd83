use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use propwise_core::config::{AppConfig, LoadOptions, ProviderConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use toml::Value;

use crate::commands::{CommandResult, EXIT_OK};

#[derive(Debug, Serialize)]
struct ConfigOutcome {
    command: &'static str,
    status: &'static str,
    precedence: &'static str,
    config_file: Option<String>,
    fields: Vec<ConfigField>,
}

#[derive(Debug, Serialize)]
struct ConfigField {
    key: String,
    value: String,
    source: String,
}

/// Effective config with per-field source attribution. Secrets are redacted.
///
/// Credentials are not required here, so the command works before keys are configured.
pub fn run(mut options: LoadOptions) -> CommandResult {
    options.offline = true;
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("config", &error),
    };

    let config_file_path = detect_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let attribute = |key: &str, env_key: &str, value: String| ConfigField {
        key: key.to_string(),
        value,
        source: field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
    };

    let mut fields = vec![
        attribute("database.url", "PROPWISE_DATABASE_URL", config.database.url.clone()),
        attribute(
            "database.max_connections",
            "PROPWISE_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
    ];

    let providers = [
        ("providers.primary", "PROPWISE_PRIMARY", Some(&config.providers.primary)),
        ("providers.secondary", "PROPWISE_SECONDARY", Some(&config.providers.secondary)),
        ("providers.guardrail", "PROPWISE_GUARDRAIL", config.providers.guardrail.as_ref()),
    ];
    for (section, env_prefix, provider) in providers {
        let Some(provider) = provider else {
            fields.push(ConfigField {
                key: section.to_string(),
                value: "<unset, uses providers.secondary>".to_string(),
                source: "default".to_string(),
            });
            continue;
        };
        fields.extend(provider_fields(provider, section, env_prefix, &attribute));
    }

    fields.extend([
        attribute(
            "airtable.api_key",
            "PROPWISE_AIRTABLE_API_KEY",
            redact(&config.airtable.api_key),
        ),
        attribute(
            "airtable.base_id",
            "PROPWISE_AIRTABLE_BASE_ID",
            config.airtable.base_id.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        attribute(
            "airtable.table_name",
            "PROPWISE_AIRTABLE_TABLE_NAME",
            config.airtable.table_name.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        attribute("data.source", "PROPWISE_DATA_SOURCE", format!("{:?}", config.data.source)),
        attribute(
            "retry.max_attempts",
            "PROPWISE_RETRY_MAX_ATTEMPTS",
            config.retry.max_attempts.to_string(),
        ),
        attribute(
            "retry.base_delay_ms",
            "PROPWISE_RETRY_BASE_DELAY_MS",
            config.retry.base_delay_ms.to_string(),
        ),
        attribute(
            "retry.max_steps",
            "PROPWISE_RETRY_MAX_STEPS",
            config.retry.max_steps.to_string(),
        ),
        attribute(
            "guardrails.semantic_checks",
            "PROPWISE_GUARDRAILS_SEMANTIC_CHECKS",
            config.guardrails.semantic_checks.to_string(),
        ),
        attribute(
            "guardrails.min_report_chars",
            "PROPWISE_GUARDRAILS_MIN_REPORT_CHARS",
            config.guardrails.min_report_chars.to_string(),
        ),
        attribute(
            "reports.output_dir",
            "PROPWISE_REPORTS_OUTPUT_DIR",
            config.reports.output_dir.display().to_string(),
        ),
        attribute(
            "pipeline.run_timeout_secs",
            "PROPWISE_PIPELINE_RUN_TIMEOUT_SECS",
            config.pipeline.run_timeout_secs.to_string(),
        ),
        attribute(
            "pipeline.compare_providers",
            "PROPWISE_PIPELINE_COMPARE_PROVIDERS",
            config.pipeline.compare_providers.to_string(),
        ),
        attribute("logging.level", "PROPWISE_LOGGING_LEVEL", config.logging.level.clone()),
        attribute(
            "logging.format",
            "PROPWISE_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]);

    let payload = ConfigOutcome {
        command: "config",
        status: "ok",
        precedence: "overrides > env > file > default",
        config_file: config_file_path.map(|path| path.display().to_string()),
        fields,
    };
    CommandResult::with_payload(EXIT_OK, &payload)
}

fn provider_fields(
    provider: &ProviderConfig,
    section: &str,
    env_prefix: &str,
    attribute: &impl Fn(&str, &str, String) -> ConfigField,
) -> Vec<ConfigField> {
    vec![
        attribute(
            &format!("{section}.kind"),
            &format!("{env_prefix}_PROVIDER"),
            provider.kind.as_str().to_string(),
        ),
        attribute(
            &format!("{section}.model"),
            &format!("{env_prefix}_MODEL"),
            provider.model.clone(),
        ),
        attribute(
            &format!("{section}.api_key"),
            &format!("{env_prefix}_API_KEY"),
            redact(&provider.api_key),
        ),
        attribute(
            &format!("{section}.base_url"),
            &format!("{env_prefix}_BASE_URL"),
            provider.base_url.clone(),
        ),
    ]
}

fn detect_config_path(explicit_path: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path);
    }

    [PathBuf::from("propwise.toml"), PathBuf::from("config/propwise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

/// Keep at most a four-character prefix so operators can tell keys apart.
fn redact(secret: &Option<SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= 8 {
        return "<redacted>".to_string();
    }

    let prefix: String = trimmed.chars().take(4).collect();
    format!("{prefix}***")
}
