use std::fmt;

use serde::Serialize;

/// Standing brief for the report team. The team call carries these plus every member role.
pub const TEAM_INSTRUCTIONS: &[&str] = &[
    "Produce a client-ready real estate report with masked PII, predictions, insights, and recommendations.",
    "Give the report a clear title such as 'Real Estate Market Report'.",
    "Ensure responses are on-topic, hallucination-free, and without PII leaks.",
];

pub const TEAM_MEMBERS: &[AgentRole] = &[
    AgentRole::Data,
    AgentRole::Pricing,
    AgentRole::Analysis,
    AgentRole::Reporting,
    AgentRole::Benchmark,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Team,
    Data,
    Pricing,
    Analysis,
    Reporting,
    Benchmark,
    Goal,
    Judge,
    FactCheck,
    Format,
    Comparer,
    OffTopic,
    Hallucination,
    PiiDetector,
}

impl AgentRole {
    pub fn name(self) -> &'static str {
        match self {
            Self::Team => "report_team",
            Self::Data => "data_agent",
            Self::Pricing => "pricing_agent",
            Self::Analysis => "analysis_agent",
            Self::Reporting => "reporting_agent",
            Self::Benchmark => "benchmark_agent",
            Self::Goal => "goal_agent",
            Self::Judge => "judge_agent",
            Self::FactCheck => "fact_check_agent",
            Self::Format => "format_agent",
            Self::Comparer => "comparer_agent",
            Self::OffTopic => "off_topic_agent",
            Self::Hallucination => "hallucination_agent",
            Self::PiiDetector => "pii_detector_agent",
        }
    }

    pub fn instructions(self) -> &'static str {
        match self {
            Self::Team => {
                "You coordinate a real estate pricing team and write the final client report."
            }
            Self::Data => "Collect property data from the provided records.",
            Self::Pricing => "Predict real estate prices based on property features.",
            Self::Analysis => "Analyze property prices and market trends.",
            Self::Reporting => "Generate the final client report.",
            Self::Benchmark => {
                "Benchmark the predictions against market data and note the agents' timing, quality and hallucinations."
            }
            Self::Goal => {
                "Check that the report meets its goals: clear, structured, free of PII, with trends and recommendations. Start your answer with PASS or FLAG on its own line, then give a short explanation."
            }
            Self::Judge => {
                "Evaluate the quality of the report. Give a score out of 10 and an explanation. Start your answer with PASS (score 6 or more) or FLAG on its own line."
            }
            Self::FactCheck => {
                "Check the report for factual accuracy and point out doubtful or invented claims. Start your answer with PASS or FLAG on its own line, then give a short explanation."
            }
            Self::Format => {
                "Check that the report can be expressed with the fields title, summary, predictions, insights and recommendations. Start your answer with PASS or FLAG on its own line, then give a short explanation."
            }
            Self::Comparer => {
                "Compare two versions of the report and decide which one is better for clarity, precision and completeness."
            }
            Self::OffTopic => {
                "Detect whether a text is off-topic, meaning unrelated to real estate pricing, market analysis or client reporting. Start your answer with PASS or FLAG on its own line, then give a short explanation."
            }
            Self::Hallucination => {
                "Check the report for hallucinations or irrelevant fabricated content. Start your answer with PASS or FLAG on its own line, then give a short explanation."
            }
            Self::PiiDetector => {
                "Ensure no personally identifiable information (emails, phone numbers, names) leaks into the report. Start your answer with PASS or FLAG on its own line, then give a short explanation."
            }
        }
    }

    /// Guard roles open their answer with a `PASS` or `FLAG` line.
    pub fn answers_with_verdict(self) -> bool {
        matches!(
            self,
            Self::Goal
                | Self::Judge
                | Self::FactCheck
                | Self::Format
                | Self::OffTopic
                | Self::Hallucination
                | Self::PiiDetector
        )
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compose the single team brief: instructions, member roles, masked records and the request.
pub fn compose_team_brief(records_json: &str, prompt: &str) -> String {
    let mut brief = String::new();
    brief.push_str("Team instructions:\n");
    for line in TEAM_INSTRUCTIONS {
        brief.push_str("- ");
        brief.push_str(line);
        brief.push('\n');
    }
    brief.push_str("\nTeam members:\n");
    for member in TEAM_MEMBERS {
        brief.push_str(&format!("- {}: {}\n", member.name(), member.instructions()));
    }
    brief.push_str("\nProperty records (PII masked):\n");
    brief.push_str(records_json);
    brief.push_str("\n\nRequest:\n");
    brief.push_str(prompt);
    brief
}

#[cfg(test)]
mod tests {
    use super::{compose_team_brief, AgentRole, TEAM_MEMBERS};

    #[test]
    fn guard_roles_ask_for_a_verdict_line() {
        for role in [
            AgentRole::OffTopic,
            AgentRole::Hallucination,
            AgentRole::PiiDetector,
            AgentRole::Goal,
            AgentRole::Judge,
            AgentRole::FactCheck,
            AgentRole::Format,
        ] {
            assert!(role.answers_with_verdict(), "{role} should answer PASS or FLAG");
            assert!(role.instructions().contains("PASS"), "{role} instructions lack the format");
        }
        assert!(!AgentRole::Comparer.answers_with_verdict());
    }

    #[test]
    fn team_brief_lists_members_records_and_request() {
        let brief = compose_team_brief("[{\"city\":\"Nice\"}]", "Price the villas");

        for member in TEAM_MEMBERS {
            assert!(brief.contains(member.name()));
        }
        assert!(brief.contains("{\"city\":\"Nice\"}"));
        assert!(brief.ends_with("Price the villas"));
    }
}
