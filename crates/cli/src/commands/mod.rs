pub mod check;
pub mod config;
pub mod doctor;
pub mod history;
pub mod migrate;
pub mod run;

use propwise_core::config::{ConfigError, LoadOptions};
use serde::Serialize;

pub const EXIT_OK: u8 = 0;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_GUARDRAIL_BLOCK: u8 = 3;
pub const EXIT_RUN_ABORTED: u8 = 4;
pub const EXIT_STORAGE: u8 = 5;
pub const EXIT_DOCTOR_FAILED: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
        };
        Self { exit_code: EXIT_OK, output: serialize_payload(&payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
        };
        Self { exit_code, output: serialize_payload(&payload) }
    }

    pub fn config_failure(command: &str, error: &ConfigError) -> Self {
        let message = format!("configuration issue: {error}");
        Self::failure(command, "config_validation", message, EXIT_CONFIG)
    }

    /// Wrap a command-specific payload.
    pub fn with_payload<T: Serialize>(exit_code: u8, payload: &T) -> Self {
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Config options every command starts from.
pub fn load_options(config_path: Option<std::path::PathBuf>) -> LoadOptions {
    LoadOptions { config_path, ..LoadOptions::default() }
}

pub(crate) fn current_thread_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread().enable_all().build()
}

fn serialize_payload<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
