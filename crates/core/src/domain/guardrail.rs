use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Pattern,
    Semantic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Flag,
    Block,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Flag => "flag",
            Self::Block => "block",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pass" => Some(Self::Pass),
            "flag" => Some(Self::Flag),
            "block" => Some(Self::Block),
            _ => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CheckKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Semantic => "semantic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pattern" => Some(Self::Pattern),
            "semantic" => Some(Self::Semantic),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailCheck {
    pub name: String,
    pub kind: CheckKind,
    pub verdict: Verdict,
    pub rationale: String,
}

impl GuardrailCheck {
    pub fn pattern(name: impl Into<String>, verdict: Verdict, rationale: impl Into<String>) -> Self {
        Self { name: name.into(), kind: CheckKind::Pattern, verdict, rationale: rationale.into() }
    }

    pub fn semantic(
        name: impl Into<String>,
        verdict: Verdict,
        rationale: impl Into<String>,
    ) -> Self {
        Self { name: name.into(), kind: CheckKind::Semantic, verdict, rationale: rationale.into() }
    }
}

/// Ordered, append-only results of one guardrail evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailReport {
    checks: Vec<GuardrailCheck>,
}

impl GuardrailReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, check: GuardrailCheck) {
        self.checks.push(check);
    }

    pub fn checks(&self) -> &[GuardrailCheck] {
        &self.checks
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn first_block(&self) -> Option<&GuardrailCheck> {
        self.checks.iter().find(|check| check.verdict == Verdict::Block)
    }

    pub fn is_blocked(&self) -> bool {
        self.first_block().is_some()
    }

    pub fn flagged(&self) -> impl Iterator<Item = &GuardrailCheck> {
        self.checks.iter().filter(|check| check.verdict == Verdict::Flag)
    }

    pub fn find(&self, name: &str) -> Option<&GuardrailCheck> {
        self.checks.iter().find(|check| check.name == name)
    }
}

impl Extend<GuardrailCheck> for GuardrailReport {
    fn extend<T: IntoIterator<Item = GuardrailCheck>>(&mut self, iter: T) {
        self.checks.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardrailCheck, GuardrailReport, Verdict};

    #[test]
    fn report_preserves_insertion_order_and_finds_first_block() {
        let mut report = GuardrailReport::new();
        report.push(GuardrailCheck::pattern("prompt_injection", Verdict::Pass, "no match"));
        report.push(GuardrailCheck::pattern("forbidden_topic", Verdict::Block, "weapons"));
        report.push(GuardrailCheck::semantic("quality", Verdict::Block, "second block"));

        let names: Vec<_> = report.checks().iter().map(|check| check.name.as_str()).collect();
        assert_eq!(names, vec!["prompt_injection", "forbidden_topic", "quality"]);
        assert!(report.is_blocked());
        assert_eq!(report.first_block().map(|check| check.name.as_str()), Some("forbidden_topic"));
    }

    #[test]
    fn flags_do_not_count_as_blocks() {
        let mut report = GuardrailReport::new();
        report.push(GuardrailCheck::pattern("bias", Verdict::Flag, "mentions religion"));

        assert!(!report.is_blocked());
        assert_eq!(report.flagged().count(), 1);
        assert_eq!(Verdict::parse("flag"), Some(Verdict::Flag));
        assert_eq!(Verdict::parse("maybe"), None);
    }
}
