pub mod guardrail;
pub mod provider;
pub mod run;
