use propwise_core::guardrails::evaluate_prompt;
use propwise_core::GuardrailCheck;
use serde::Serialize;

use crate::commands::{CommandResult, EXIT_GUARDRAIL_BLOCK, EXIT_OK};

#[derive(Debug, Serialize)]
struct CheckOutcome<'a> {
    command: &'static str,
    status: &'static str,
    blocked_by: Option<&'a str>,
    checks: &'a [GuardrailCheck],
}

/// Pre-check a prompt without loading config or touching a provider.
pub fn run(prompt: &str) -> CommandResult {
    let report = evaluate_prompt(prompt);
    let block = report.first_block();

    let payload = CheckOutcome {
        command: "check",
        status: if block.is_some() { "blocked" } else { "pass" },
        blocked_by: block.map(|check| check.name.as_str()),
        checks: report.checks(),
    };
    let exit_code = if block.is_some() { EXIT_GUARDRAIL_BLOCK } else { EXIT_OK };
    CommandResult::with_payload(exit_code, &payload)
}
