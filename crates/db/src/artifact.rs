use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context, Tera};

use propwise_core::{PersistError, PipelineRun, RunId};

const ARTIFACT_TEMPLATE: &str = r#"{{ report }}

---

# Guardrail Results
{% for check in checks -%}
- {{ check.name }} [{{ check.kind }}]: {{ check.verdict }} - {{ check.rationale }}
{% endfor -%}
{% if comparison %}
---

# Provider Comparison
- primary: {{ comparison.primary }}
- alternate: {{ comparison.alternate }}
- verdict: {{ comparison.verdict }}
{% endif %}
---

# Run Metrics
- run_id: {{ run_id }}
- generated_at: {{ generated_at }}
{% for metric in metrics -%}
- {{ metric.label }}: {{ metric.value }}
{% endfor -%}
"#;

#[derive(Serialize)]
struct CheckLine<'a> {
    name: &'a str,
    kind: &'static str,
    verdict: &'static str,
    rationale: String,
}

#[derive(Serialize)]
struct ComparisonView<'a> {
    primary: &'a str,
    alternate: &'a str,
    verdict: String,
}

#[derive(Serialize)]
struct MetricLine {
    label: String,
    value: String,
}

impl MetricLine {
    fn new(label: impl Into<String>, value: impl ToString) -> Self {
        Self { label: label.into(), value: value.to_string() }
    }
}

/// `report_YYYYmmdd_HHMMSS_<run8>.md`
pub fn artifact_file_name(run_id: &RunId, at: DateTime<Utc>) -> String {
    format!("report_{}_{}.md", at.format("%Y%m%d_%H%M%S"), run_id.short())
}

/// Collapse a multi-line rationale onto one line so each check stays one line.
fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Writes one markdown artifact per persisted run.
#[derive(Clone, Debug)]
pub struct MarkdownArtifactWriter {
    output_dir: PathBuf,
}

impl MarkdownArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self { output_dir: output_dir.into() }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn render(
        &self,
        run: &PipelineRun,
        generated_at: DateTime<Utc>,
    ) -> Result<String, PersistError> {
        let report =
            run.report().filter(|report| !report.trim().is_empty()).ok_or_else(|| {
                PersistError::NotPersistable(format!("run {} has no report", run.id()))
            })?;

        let checks: Vec<CheckLine<'_>> = run
            .post_check()
            .checks()
            .iter()
            .map(|check| CheckLine {
                name: &check.name,
                kind: check.kind.as_str(),
                verdict: check.verdict.as_str(),
                rationale: single_line(&check.rationale),
            })
            .collect();

        let comparison = run.comparison().map(|comparison| ComparisonView {
            primary: comparison.primary.as_str(),
            alternate: comparison.alternate.as_str(),
            verdict: single_line(&comparison.verdict),
        });

        let snapshot = run.metrics();
        let mut metrics = vec![
            MetricLine::new("api_calls", snapshot.api_calls),
            MetricLine::new("external_api_calls", snapshot.external_api_calls),
            MetricLine::new("inter_agent_interactions", snapshot.inter_agent_interactions),
            MetricLine::new("tokens_input", snapshot.tokens_input),
            MetricLine::new("tokens_output", snapshot.tokens_output),
            MetricLine::new("estimated_cost_usd", snapshot.estimated_cost_usd),
            MetricLine::new(
                "hallucination_score",
                snapshot
                    .hallucination_score
                    .map_or_else(|| "n/a".to_string(), |score| format!("{score:.1}")),
            ),
            MetricLine::new(
                "active_provider",
                snapshot.active_provider.as_ref().map_or("none", |provider| provider.as_str()),
            ),
            MetricLine::new("elapsed_ms", snapshot.elapsed_ms),
        ];
        for operation in snapshot.operations.keys() {
            if let Some(rate) = snapshot.tool_success_rate(operation) {
                metrics.push(MetricLine::new(
                    format!("success_rate.{operation}"),
                    format!("{rate:.2}"),
                ));
            }
        }

        let mut context = Context::new();
        context.insert("report", report.trim_end());
        context.insert("checks", &checks);
        context.insert("comparison", &comparison);
        context.insert("run_id", run.id().as_str());
        context.insert("generated_at", &generated_at.to_rfc3339());
        context.insert("metrics", &metrics);

        Tera::one_off(ARTIFACT_TEMPLATE, &context, false)
            .map_err(|error| PersistError::Render(error.to_string()))
    }

    /// Render and write the artifact, returning its path.
    pub async fn write(&self, run: &PipelineRun) -> Result<PathBuf, PersistError> {
        let generated_at = Utc::now();
        let body = self.render(run, generated_at)?;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| PersistError::Io { path: self.output_dir.clone(), source })?;
        let path = self.output_dir.join(artifact_file_name(run.id(), generated_at));
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| PersistError::Io { path: path.clone(), source })?;
        Ok(path)
    }
}
