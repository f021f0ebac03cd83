use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    PreChecking,
    Running,
    PostChecking,
    Persisting,
    Done,
    Aborted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PreChecking => "pre_checking",
            Self::Running => "running",
            Self::PostChecking => "post_checking",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Aborted => "aborted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(Self::Idle),
            "pre_checking" => Some(Self::PreChecking),
            "running" => Some(Self::Running),
            "post_checking" => Some(Self::PostChecking),
            "persisting" => Some(Self::Persisting),
            "done" => Some(Self::Done),
            "aborted" => Some(Self::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunEvent {
    Started,
    PromptCleared,
    PromptBlocked,
    ReportGenerated,
    RunFailed,
    ChecksCompleted,
    OutputDegraded,
    Persisted,
    PersistFailed,
}

/// Context the transition table consults for guarded edges.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RunContext {
    pub pre_check_blocked: bool,
    pub has_report: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunAction {
    EvaluatePrompt,
    DelegateToTeam,
    EvaluateReport,
    PersistArtifact,
    SealRun,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: RunState,
    pub to: RunState,
    pub event: RunEvent,
    pub actions: Vec<RunAction>,
}
