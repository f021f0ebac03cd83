use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::provider::ProviderKind;
use crate::metrics::TokenPricing;
use crate::retry::RetryPolicy;

pub const DEFAULT_PROMPT: &str = "Collect all property data from Airtable, mask PII, predict prices, analyze trends, benchmark against market data, and produce a final client-ready report.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub airtable: AirtableConfig,
    pub data: DataConfig,
    pub retry: RetryConfig,
    pub guardrails: GuardrailsConfig,
    pub pricing: PricingConfig,
    pub reports: ReportsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub primary: ProviderConfig,
    pub secondary: ProviderConfig,
    /// Backend for the guardrail agents. Falls back to `secondary` when unset.
    pub guardrail: Option<ProviderConfig>,
}

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AirtableConfig {
    pub api_key: Option<SecretString>,
    pub base_id: Option<String>,
    pub table_name: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DataConfig {
    pub source: DataSourceKind,
    pub fixture_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_steps: u32,
}

#[derive(Clone, Debug)]
pub struct GuardrailsConfig {
    pub semantic_checks: bool,
    pub min_report_chars: usize,
    pub off_topic_excerpt_chars: usize,
    pub excerpt_chars: usize,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    pub input_usd_per_million: Decimal,
    pub output_usd_per_million: Decimal,
}

#[derive(Clone, Debug)]
pub struct ReportsConfig {
    pub output_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub run_timeout_secs: u64,
    pub compare_providers: bool,
    pub default_prompt: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSourceKind {
    Airtable,
    Fixture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub primary_model: Option<String>,
    pub secondary_model: Option<String>,
    pub compare_providers: Option<bool>,
    pub semantic_checks: Option<bool>,
    pub reports_output_dir: Option<PathBuf>,
    pub retry_base_delay_ms: Option<u64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    /// Skip credential checks, for commands that never reach a provider or Airtable.
    pub offline: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://propwise.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            providers: ProvidersConfig {
                primary: ProviderConfig::defaults_for(ProviderKind::Mistral),
                secondary: ProviderConfig::defaults_for(ProviderKind::Gemini),
                guardrail: None,
            },
            airtable: AirtableConfig {
                api_key: None,
                base_id: None,
                table_name: None,
                base_url: "https://api.airtable.com".to_string(),
                timeout_secs: 30,
            },
            data: DataConfig { source: DataSourceKind::Airtable, fixture_path: None },
            retry: RetryConfig { max_attempts: 5, base_delay_ms: 10_000, max_steps: 20 },
            guardrails: GuardrailsConfig {
                semantic_checks: true,
                min_report_chars: 50,
                off_topic_excerpt_chars: 1_500,
                excerpt_chars: 2_000,
            },
            pricing: PricingConfig {
                input_usd_per_million: Decimal::new(15, 1),
                output_usd_per_million: Decimal::new(50, 1),
            },
            reports: ReportsConfig { output_dir: PathBuf::from("reports") },
            pipeline: PipelineConfig {
                run_timeout_secs: 900,
                compare_providers: false,
                default_prompt: DEFAULT_PROMPT.to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl ProviderConfig {
    pub fn defaults_for(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: kind.default_model().to_string(),
            api_key: None,
            base_url: kind.default_base_url().to_string(),
            timeout_secs: 60,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn apply_patch(&mut self, patch: ProviderPatch) {
        if let Some(kind) = patch.kind {
            if kind != self.kind {
                *self = Self::defaults_for(kind);
            }
        }
        if let Some(model) = patch.model {
            self.model = model;
        }
        if let Some(api_key_value) = patch.api_key {
            self.api_key = Some(secret_value(api_key_value));
        }
        if let Some(base_url) = patch.base_url {
            self.base_url = base_url;
        }
        if let Some(timeout_secs) = patch.timeout_secs {
            self.timeout_secs = timeout_secs;
        }
    }

    fn apply_env(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let kind_key = format!("{prefix}_PROVIDER");
        if let Some(value) = read_env(&kind_key) {
            let kind: ProviderKind = value
                .parse()
                .map_err(|_| ConfigError::InvalidEnvOverride { key: kind_key.clone(), value })?;
            if kind != self.kind {
                *self = Self::defaults_for(kind);
            }
        }
        if let Some(value) = read_env(&format!("{prefix}_MODEL")) {
            self.model = value;
        }
        if let Some(value) = read_env(&format!("{prefix}_API_KEY")) {
            self.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env(&format!("{prefix}_BASE_URL")) {
            self.base_url = value;
        }
        let timeout_key = format!("{prefix}_TIMEOUT_SECS");
        if let Some(value) = read_env(&timeout_key) {
            self.timeout_secs = parse_u64(&timeout_key, &value)?;
        }
        Ok(())
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_steps: self.max_steps,
        }
    }
}

impl PricingConfig {
    pub fn token_pricing(&self) -> TokenPricing {
        TokenPricing {
            input_usd_per_million: self.input_usd_per_million,
            output_usd_per_million: self.output_usd_per_million,
        }
    }
}

impl PipelineConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

impl ProvidersConfig {
    pub fn guardrail_or_secondary(&self) -> &ProviderConfig {
        self.guardrail.as_ref().unwrap_or(&self.secondary)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for DataSourceKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "airtable" => Ok(Self::Airtable),
            "fixture" => Ok(Self::Fixture),
            other => Err(ConfigError::Validation(format!(
                "unsupported data source `{other}` (expected airtable|fixture)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("propwise.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        if options.offline {
            config.validate_offline()?;
        } else {
            config.validate()?;
        }

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(providers) = patch.providers {
            if let Some(primary) = providers.primary {
                self.providers.primary.apply_patch(primary);
            }
            if let Some(secondary) = providers.secondary {
                self.providers.secondary.apply_patch(secondary);
            }
            if let Some(guardrail) = providers.guardrail {
                let kind = guardrail.kind.unwrap_or(self.providers.secondary.kind);
                let mut config = ProviderConfig::defaults_for(kind);
                config.apply_patch(guardrail);
                self.providers.guardrail = Some(config);
            }
        }

        if let Some(airtable) = patch.airtable {
            if let Some(airtable_api_key_value) = airtable.api_key {
                self.airtable.api_key = Some(secret_value(airtable_api_key_value));
            }
            if let Some(base_id) = airtable.base_id {
                self.airtable.base_id = Some(base_id);
            }
            if let Some(table_name) = airtable.table_name {
                self.airtable.table_name = Some(table_name);
            }
            if let Some(base_url) = airtable.base_url {
                self.airtable.base_url = base_url;
            }
            if let Some(timeout_secs) = airtable.timeout_secs {
                self.airtable.timeout_secs = timeout_secs;
            }
        }

        if let Some(data) = patch.data {
            if let Some(source) = data.source {
                self.data.source = source;
            }
            if let Some(fixture_path) = data.fixture_path {
                self.data.fixture_path = Some(fixture_path);
            }
        }

        if let Some(retry) = patch.retry {
            if let Some(max_attempts) = retry.max_attempts {
                self.retry.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = retry.base_delay_ms {
                self.retry.base_delay_ms = base_delay_ms;
            }
            if let Some(max_steps) = retry.max_steps {
                self.retry.max_steps = max_steps;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(semantic_checks) = guardrails.semantic_checks {
                self.guardrails.semantic_checks = semantic_checks;
            }
            if let Some(min_report_chars) = guardrails.min_report_chars {
                self.guardrails.min_report_chars = min_report_chars;
            }
            if let Some(off_topic_excerpt_chars) = guardrails.off_topic_excerpt_chars {
                self.guardrails.off_topic_excerpt_chars = off_topic_excerpt_chars;
            }
            if let Some(excerpt_chars) = guardrails.excerpt_chars {
                self.guardrails.excerpt_chars = excerpt_chars;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(input) = pricing.input_usd_per_million {
                self.pricing.input_usd_per_million = input;
            }
            if let Some(output) = pricing.output_usd_per_million {
                self.pricing.output_usd_per_million = output;
            }
        }

        if let Some(reports) = patch.reports {
            if let Some(output_dir) = reports.output_dir {
                self.reports.output_dir = output_dir;
            }
        }

        if let Some(pipeline) = patch.pipeline {
            if let Some(run_timeout_secs) = pipeline.run_timeout_secs {
                self.pipeline.run_timeout_secs = run_timeout_secs;
            }
            if let Some(compare_providers) = pipeline.compare_providers {
                self.pipeline.compare_providers = compare_providers;
            }
            if let Some(default_prompt) = pipeline.default_prompt {
                self.pipeline.default_prompt = default_prompt;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PROPWISE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("PROPWISE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("PROPWISE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("PROPWISE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("PROPWISE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        self.providers.primary.apply_env("PROPWISE_PRIMARY")?;
        self.providers.secondary.apply_env("PROPWISE_SECONDARY")?;
        if read_env("PROPWISE_GUARDRAIL_PROVIDER").is_some()
            || read_env("PROPWISE_GUARDRAIL_API_KEY").is_some()
        {
            let mut guardrail = self
                .providers
                .guardrail
                .clone()
                .unwrap_or_else(|| self.providers.secondary.clone());
            guardrail.apply_env("PROPWISE_GUARDRAIL")?;
            self.providers.guardrail = Some(guardrail);
        }

        if let Some(value) = read_env("PROPWISE_AIRTABLE_API_KEY") {
            self.airtable.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("PROPWISE_AIRTABLE_BASE_ID") {
            self.airtable.base_id = Some(value);
        }
        if let Some(value) = read_env("PROPWISE_AIRTABLE_TABLE_NAME") {
            self.airtable.table_name = Some(value);
        }
        if let Some(value) = read_env("PROPWISE_AIRTABLE_BASE_URL") {
            self.airtable.base_url = value;
        }

        if let Some(value) = read_env("PROPWISE_DATA_SOURCE") {
            self.data.source = value.parse()?;
        }
        if let Some(value) = read_env("PROPWISE_DATA_FIXTURE_PATH") {
            self.data.fixture_path = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("PROPWISE_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_u32("PROPWISE_RETRY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("PROPWISE_RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_u64("PROPWISE_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("PROPWISE_RETRY_MAX_STEPS") {
            self.retry.max_steps = parse_u32("PROPWISE_RETRY_MAX_STEPS", &value)?;
        }

        if let Some(value) = read_env("PROPWISE_GUARDRAILS_SEMANTIC_CHECKS") {
            self.guardrails.semantic_checks =
                parse_bool("PROPWISE_GUARDRAILS_SEMANTIC_CHECKS", &value)?;
        }
        if let Some(value) = read_env("PROPWISE_GUARDRAILS_MIN_REPORT_CHARS") {
            self.guardrails.min_report_chars =
                parse_usize("PROPWISE_GUARDRAILS_MIN_REPORT_CHARS", &value)?;
        }

        if let Some(value) = read_env("PROPWISE_PRICING_INPUT_USD_PER_MILLION") {
            self.pricing.input_usd_per_million =
                parse_decimal("PROPWISE_PRICING_INPUT_USD_PER_MILLION", &value)?;
        }
        if let Some(value) = read_env("PROPWISE_PRICING_OUTPUT_USD_PER_MILLION") {
            self.pricing.output_usd_per_million =
                parse_decimal("PROPWISE_PRICING_OUTPUT_USD_PER_MILLION", &value)?;
        }

        if let Some(value) = read_env("PROPWISE_REPORTS_OUTPUT_DIR") {
            self.reports.output_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("PROPWISE_PIPELINE_RUN_TIMEOUT_SECS") {
            self.pipeline.run_timeout_secs =
                parse_u64("PROPWISE_PIPELINE_RUN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("PROPWISE_PIPELINE_COMPARE_PROVIDERS") {
            self.pipeline.compare_providers =
                parse_bool("PROPWISE_PIPELINE_COMPARE_PROVIDERS", &value)?;
        }

        let log_level =
            read_env("PROPWISE_LOGGING_LEVEL").or_else(|| read_env("PROPWISE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PROPWISE_LOGGING_FORMAT").or_else(|| read_env("PROPWISE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(primary_model) = overrides.primary_model {
            self.providers.primary.model = primary_model;
        }
        if let Some(secondary_model) = overrides.secondary_model {
            self.providers.secondary.model = secondary_model;
        }
        if let Some(compare_providers) = overrides.compare_providers {
            self.pipeline.compare_providers = compare_providers;
        }
        if let Some(semantic_checks) = overrides.semantic_checks {
            self.guardrails.semantic_checks = semantic_checks;
        }
        if let Some(output_dir) = overrides.reports_output_dir {
            self.reports.output_dir = output_dir;
        }
        if let Some(base_delay_ms) = overrides.retry_base_delay_ms {
            self.retry.base_delay_ms = base_delay_ms;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_scoped(true)
    }

    /// Everything [`AppConfig::validate`] checks except api keys and Airtable credentials.
    pub fn validate_offline(&self) -> Result<(), ConfigError> {
        self.validate_scoped(false)
    }

    fn validate_scoped(&self, credentials: bool) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_provider("providers.primary", &self.providers.primary, credentials)?;
        validate_provider("providers.secondary", &self.providers.secondary, credentials)?;
        if let Some(guardrail) = &self.providers.guardrail {
            validate_provider("providers.guardrail", guardrail, credentials)?;
        }
        validate_data(&self.data, &self.airtable, credentials)?;
        validate_retry(&self.retry)?;
        validate_guardrails(&self.guardrails)?;
        validate_pricing(&self.pricing)?;
        validate_pipeline(&self.pipeline)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("propwise.toml"), PathBuf::from("config/propwise.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_provider(
    section: &str,
    provider: &ProviderConfig,
    credentials: bool,
) -> Result<(), ConfigError> {
    if provider.model.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{section}.model must not be empty")));
    }

    if provider.timeout_secs == 0 || provider.timeout_secs > 300 {
        return Err(ConfigError::Validation(format!(
            "{section}.timeout_secs must be in range 1..=300"
        )));
    }

    if !provider.base_url.starts_with("http://") && !provider.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "{section}.base_url must start with http:// or https://"
        )));
    }

    if !credentials {
        return Ok(());
    }

    let missing = provider
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing {
        return Err(ConfigError::Validation(format!(
            "{section}.api_key is required for {} (get one from {})",
            provider.kind.as_str(),
            provider.kind.console_url()
        )));
    }

    Ok(())
}

fn validate_data(
    data: &DataConfig,
    airtable: &AirtableConfig,
    credentials: bool,
) -> Result<(), ConfigError> {
    match data.source {
        DataSourceKind::Airtable if !credentials => {
            if airtable.timeout_secs == 0 || airtable.timeout_secs > 300 {
                return Err(ConfigError::Validation(
                    "airtable.timeout_secs must be in range 1..=300".to_string(),
                ));
            }
        }
        DataSourceKind::Airtable => {
            let missing_key = airtable
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing_key {
                return Err(ConfigError::Validation(
                    "airtable.api_key is required when data.source = \"airtable\". Create a personal access token at https://airtable.com/create/tokens".to_string(),
                ));
            }
            let missing_base = airtable.base_id.as_deref().map(str::trim).unwrap_or("").is_empty();
            if missing_base {
                return Err(ConfigError::Validation(
                    "airtable.base_id is required when data.source = \"airtable\"".to_string(),
                ));
            }
            let missing_table =
                airtable.table_name.as_deref().map(str::trim).unwrap_or("").is_empty();
            if missing_table {
                return Err(ConfigError::Validation(
                    "airtable.table_name is required when data.source = \"airtable\"".to_string(),
                ));
            }
            if airtable.timeout_secs == 0 || airtable.timeout_secs > 300 {
                return Err(ConfigError::Validation(
                    "airtable.timeout_secs must be in range 1..=300".to_string(),
                ));
            }
        }
        DataSourceKind::Fixture => {
            if data.fixture_path.is_none() {
                return Err(ConfigError::Validation(
                    "data.fixture_path is required when data.source = \"fixture\"".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_retry(retry: &RetryConfig) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "retry.max_attempts must be greater than zero".to_string(),
        ));
    }
    if retry.base_delay_ms == 0 {
        return Err(ConfigError::Validation(
            "retry.base_delay_ms must be greater than zero".to_string(),
        ));
    }
    if retry.max_steps == 0 {
        return Err(ConfigError::Validation(
            "retry.max_steps must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_guardrails(guardrails: &GuardrailsConfig) -> Result<(), ConfigError> {
    if guardrails.off_topic_excerpt_chars == 0 || guardrails.excerpt_chars == 0 {
        return Err(ConfigError::Validation(
            "guardrails excerpt sizes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.input_usd_per_million.is_sign_negative()
        || pricing.output_usd_per_million.is_sign_negative()
    {
        return Err(ConfigError::Validation(
            "pricing rates must not be negative".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> Result<(), ConfigError> {
    if pipeline.run_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "pipeline.run_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if pipeline.default_prompt.trim().is_empty() {
        return Err(ConfigError::Validation(
            "pipeline.default_prompt must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| invalid_override(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| invalid_override(key, value))
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    Decimal::from_str(value.trim()).map_err(|_| invalid_override(key, value))
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    providers: Option<ProvidersPatch>,
    airtable: Option<AirtablePatch>,
    data: Option<DataPatch>,
    retry: Option<RetryPatch>,
    guardrails: Option<GuardrailsPatch>,
    pricing: Option<PricingPatch>,
    reports: Option<ReportsPatch>,
    pipeline: Option<PipelinePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    primary: Option<ProviderPatch>,
    secondary: Option<ProviderPatch>,
    guardrail: Option<ProviderPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderPatch {
    kind: Option<ProviderKind>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AirtablePatch {
    api_key: Option<String>,
    base_id: Option<String>,
    table_name: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DataPatch {
    source: Option<DataSourceKind>,
    fixture_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RetryPatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_steps: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailsPatch {
    semantic_checks: Option<bool>,
    min_report_chars: Option<usize>,
    off_topic_excerpt_chars: Option<usize>,
    excerpt_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    input_usd_per_million: Option<Decimal>,
    output_usd_per_million: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
struct ReportsPatch {
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PipelinePatch {
    run_timeout_secs: Option<u64>,
    compare_providers: Option<bool>,
    default_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use rust_decimal::Decimal;
    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, DataSourceKind, LoadOptions, LogFormat};
    use crate::domain::provider::ProviderKind;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const CREDENTIAL_VARS: [&str; 5] = [
        "PROPWISE_PRIMARY_API_KEY",
        "PROPWISE_SECONDARY_API_KEY",
        "PROPWISE_AIRTABLE_API_KEY",
        "PROPWISE_AIRTABLE_BASE_ID",
        "PROPWISE_AIRTABLE_TABLE_NAME",
    ];

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn set_credentials() {
        env::set_var("PROPWISE_PRIMARY_API_KEY", "mistral-secret-value");
        env::set_var("PROPWISE_SECONDARY_API_KEY", "gemini-secret-value");
        env::set_var("PROPWISE_AIRTABLE_API_KEY", "pat-secret-value");
        env::set_var("PROPWISE_AIRTABLE_BASE_ID", "appBase");
        env::set_var("PROPWISE_AIRTABLE_TABLE_NAME", "Properties");
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_pipeline_contract() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        set_credentials();

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let policy = config.retry.policy();

            ensure(policy.max_attempts == 5, "default max attempts should be 5")?;
            ensure(policy.base_delay == Duration::from_secs(10), "default delay should be 10s")?;
            ensure(policy.max_steps == 20, "default loop guard should be 20 steps")?;
            ensure(config.guardrails.min_report_chars == 50, "default minimum should be 50")?;
            ensure(
                config.providers.primary.kind == ProviderKind::Mistral,
                "primary should default to mistral",
            )?;
            ensure(
                config.providers.secondary.kind == ProviderKind::Gemini,
                "secondary should default to gemini",
            )?;
            ensure(
                config.pricing.input_usd_per_million == Decimal::new(15, 1),
                "input pricing should default to 1.5",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        result
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_MISTRAL_KEY", "mistral-from-env");
        env::set_var("TEST_GEMINI_KEY", "gemini-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("propwise.toml");
            fs::write(
                &path,
                r#"
[providers.primary]
api_key = "${TEST_MISTRAL_KEY}"

[providers.secondary]
api_key = "${TEST_GEMINI_KEY}"

[data]
source = "fixture"
fixture_path = "fixtures/properties.json"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let primary = config.providers.primary.api_key.as_ref();
            ensure(
                primary.map(|key| key.expose_secret() == "mistral-from-env").unwrap_or(false),
                "primary key should be interpolated from environment",
            )?;
            let secondary = config.providers.secondary.api_key.as_ref();
            ensure(
                secondary.map(|key| key.expose_secret() == "gemini-from-env").unwrap_or(false),
                "secondary key should be interpolated from environment",
            )?;
            ensure(config.data.source == DataSourceKind::Fixture, "fixture source should load")?;
            Ok(())
        })();

        clear_vars(&["TEST_MISTRAL_KEY", "TEST_GEMINI_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("PROPWISE_LOG_LEVEL", "warn");
        env::set_var("PROPWISE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["PROPWISE_LOG_LEVEL", "PROPWISE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("PROPWISE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("PROPWISE_RETRY_MAX_ATTEMPTS", "3");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("propwise.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[retry]
max_attempts = 7
max_steps = 12

[providers.primary]
model = "mistral-small-latest"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.retry.max_attempts == 3, "env max attempts should win over file")?;
            ensure(config.retry.max_steps == 12, "file max steps should win over default")?;
            ensure(
                config.providers.primary.model == "mistral-small-latest",
                "file model should win over default",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["PROPWISE_DATABASE_URL", "PROPWISE_RETRY_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::remove_var("PROPWISE_AIRTABLE_API_KEY");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("airtable.api_key")
            );
            ensure(has_message, "validation failure should mention airtable.api_key")
        })();

        clear_vars(&CREDENTIAL_VARS);
        result
    }

    #[test]
    fn offline_load_does_not_require_credentials() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&CREDENTIAL_VARS);

        let online = AppConfig::load(LoadOptions::default());
        ensure(online.is_err(), "online load should require api keys")?;

        let config = AppConfig::load(LoadOptions { offline: true, ..LoadOptions::default() })
            .map_err(|err| format!("offline load failed: {err}"))?;
        ensure(config.providers.primary.api_key.is_none(), "no key should be invented")?;
        ensure(config.validate_offline().is_ok(), "offline validation should pass")?;
        ensure(config.validate().is_err(), "full validation should still fail")
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();
        env::set_var("PROPWISE_RETRY_MAX_STEPS", "many");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected invalid override to fail".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. } if key == "PROPWISE_RETRY_MAX_STEPS"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&CREDENTIAL_VARS);
        clear_vars(&["PROPWISE_RETRY_MAX_STEPS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        set_credentials();

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("mistral-secret-value"),
                "debug output should not contain the primary api key",
            )?;
            ensure(
                !debug.contains("pat-secret-value"),
                "debug output should not contain the airtable token",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&CREDENTIAL_VARS);
        result
    }
}
