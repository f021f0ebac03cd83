use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use propwise_core::config::{AirtableConfig, AppConfig, DataSourceKind};
use propwise_core::{mask_pii, PipelineError, RunMetrics};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

/// One property record as a flat field map.
pub type PropertyRecord = BTreeMap<String, String>;

/// Where property records come from.
#[async_trait]
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether fetching counts as an external API call.
    fn is_external(&self) -> bool;

    async fn fetch_records(&self) -> Result<Vec<PropertyRecord>, PipelineError>;
}

/// Build the source `data.source` selects.
pub fn source_from_config(config: &AppConfig) -> Result<Arc<dyn PropertySource>, PipelineError> {
    match config.data.source {
        DataSourceKind::Airtable => Ok(Arc::new(AirtableSource::from_config(&config.airtable)?)),
        DataSourceKind::Fixture => {
            let path = config.data.fixture_path.clone().ok_or_else(|| {
                source_error(FixtureSource::NAME, "data.fixture_path is not configured")
            })?;
            Ok(Arc::new(FixtureSource::new(path)))
        }
    }
}

/// Fetch every record and mask PII in each value before it leaves the tool boundary.
pub async fn fetch_masked_records(
    source: &dyn PropertySource,
    metrics: &mut RunMetrics,
    correlation_id: &str,
) -> Result<Vec<PropertyRecord>, PipelineError> {
    let operation = format!("tool.{}", source.name());
    let result = source.fetch_records().await;
    metrics.record_call(&operation, result.is_ok(), source.is_external());

    let records = match result {
        Ok(records) => records,
        Err(error) => {
            warn!(
                event_name = "pipeline.tool.fetch_failed",
                correlation_id,
                source = source.name(),
                error = %error,
                "property source failed"
            );
            return Err(error);
        }
    };

    let masked: Vec<PropertyRecord> = records
        .into_iter()
        .map(|record| record.into_iter().map(|(field, value)| (field, mask_pii(&value))).collect())
        .collect();
    info!(
        event_name = "pipeline.tool.records_fetched",
        correlation_id,
        source = source.name(),
        records = masked.len(),
        "property records fetched and masked"
    );
    Ok(masked)
}

/// Serialize records for the team brief.
pub fn records_to_json(records: &[PropertyRecord]) -> String {
    serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".to_string())
}

fn source_error(source_name: &str, message: impl Into<String>) -> PipelineError {
    PipelineError::Source { source_name: source_name.to_string(), message: message.into() }
}

fn flatten_fields(fields: serde_json::Map<String, Value>) -> PropertyRecord {
    fields
        .into_iter()
        .map(|(field, value)| {
            let text = match value {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (field, text)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct AirtablePage {
    #[serde(default)]
    records: Vec<AirtableRecord>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirtableRecord {
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
}

/// Airtable REST source, paginated with the `offset` cursor.
pub struct AirtableSource {
    client: Client,
    base_url: String,
    base_id: String,
    table_name: String,
    api_key: SecretString,
}

impl AirtableSource {
    const NAME: &'static str = "airtable";
    const MAX_PAGES: usize = 100;

    pub fn from_config(config: &AirtableConfig) -> Result<Self, PipelineError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| source_error(Self::NAME, "airtable.api_key is not configured"))?;
        let base_id = config
            .base_id
            .clone()
            .ok_or_else(|| source_error(Self::NAME, "airtable.base_id is not configured"))?;
        let table_name = config
            .table_name
            .clone()
            .ok_or_else(|| source_error(Self::NAME, "airtable.table_name is not configured"))?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| source_error(Self::NAME, format!("http client: {error}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            base_id,
            table_name,
            api_key,
        })
    }

    async fn fetch_page(&self, offset: Option<&str>) -> Result<AirtablePage, PipelineError> {
        let url = format!("{}/v0/{}/{}", self.base_url, self.base_id, self.table_name);
        let mut request = self.client.get(url).bearer_auth(self.api_key.expose_secret());
        if let Some(offset) = offset {
            request = request.query(&[("offset", offset)]);
        }

        let response = request
            .send()
            .await
            .map_err(|error| source_error(Self::NAME, format!("request failed: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(source_error(Self::NAME, format!("HTTP {}: {body}", status.as_u16())));
        }

        response
            .json::<AirtablePage>()
            .await
            .map_err(|error| source_error(Self::NAME, format!("could not decode page: {error}")))
    }
}

#[async_trait]
impl PropertySource for AirtableSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_external(&self) -> bool {
        true
    }

    async fn fetch_records(&self) -> Result<Vec<PropertyRecord>, PipelineError> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        for _ in 0..Self::MAX_PAGES {
            let page = self.fetch_page(offset.as_deref()).await?;
            records.extend(page.records.into_iter().map(|record| flatten_fields(record.fields)));
            match page.offset {
                Some(next) => offset = Some(next),
                None => return Ok(records),
            }
        }

        Err(source_error(Self::NAME, format!("more than {} pages", Self::MAX_PAGES)))
    }
}

/// JSON file source: either an array of field maps or an Airtable-shaped `{"records": [...]}`.
pub struct FixtureSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureDocument {
    Records(Vec<serde_json::Map<String, Value>>),
    Airtable { records: Vec<AirtableRecord> },
}

impl FixtureSource {
    const NAME: &'static str = "fixture";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PropertySource for FixtureSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_external(&self) -> bool {
        false
    }

    async fn fetch_records(&self) -> Result<Vec<PropertyRecord>, PipelineError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|error| {
            source_error(Self::NAME, format!("could not read `{}`: {error}", self.path.display()))
        })?;
        let document: FixtureDocument = serde_json::from_str(&raw).map_err(|error| {
            source_error(Self::NAME, format!("could not parse `{}`: {error}", self.path.display()))
        })?;

        Ok(match document {
            FixtureDocument::Records(records) => records.into_iter().map(flatten_fields).collect(),
            FixtureDocument::Airtable { records } => {
                records.into_iter().map(|record| flatten_fields(record.fields)).collect()
            }
        })
    }
}

/// In-memory records for dry runs and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticPropertySource {
    records: Vec<PropertyRecord>,
}

impl StaticPropertySource {
    pub fn new(records: Vec<PropertyRecord>) -> Self {
        Self { records }
    }

    /// A handful of listings, with contact details that masking must remove.
    pub fn sample() -> Self {
        let listing = |pairs: &[(&str, &str)]| -> PropertyRecord {
            pairs.iter().map(|(field, value)| (field.to_string(), value.to_string())).collect()
        };
        Self::new(vec![
            listing(&[
                ("type", "apartment"),
                ("city", "Lyon"),
                ("surface_m2", "64"),
                ("price_eur", "289000"),
                ("contact", "claire.martin@example.com"),
            ]),
            listing(&[
                ("type", "villa"),
                ("city", "Nice"),
                ("surface_m2", "180"),
                ("price_eur", "1150000"),
                ("contact", "0612345678"),
            ]),
            listing(&[
                ("type", "apartment"),
                ("city", "Bordeaux"),
                ("surface_m2", "48"),
                ("price_eur", "212000"),
                ("contact", "agency@example.org"),
            ]),
        ])
    }
}

#[async_trait]
impl PropertySource for StaticPropertySource {
    fn name(&self) -> &str {
        "static"
    }

    fn is_external(&self) -> bool {
        false
    }

    async fn fetch_records(&self) -> Result<Vec<PropertyRecord>, PipelineError> {
        Ok(self.records.clone())
    }
}
