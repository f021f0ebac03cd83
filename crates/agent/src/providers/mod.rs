//! Concrete model backends and the HTTP plumbing they share.

pub mod gemini;
pub mod mistral;
pub mod scripted;

use std::sync::Arc;
use std::time::Duration;

use propwise_core::config::ProviderConfig;
use propwise_core::{ProviderError, ProviderKind};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;

use crate::llm::ModelProvider;

pub use gemini::GeminiProvider;
pub use mistral::MistralProvider;
pub use scripted::{ScriptedOutcome, ScriptedProvider};

/// Build the adapter a provider config section describes.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    let provider_name = config.kind.as_str();
    let api_key = config
        .api_key
        .as_ref()
        .map(|key| key.expose_secret().to_string())
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ProviderError::fatal(provider_name, "api key is not configured"))?;
    let client = http_client(provider_name, config.timeout())?;

    let provider: Arc<dyn ModelProvider> = match config.kind {
        ProviderKind::Mistral => Arc::new(MistralProvider::new(
            client,
            config.base_url.clone(),
            config.model.clone(),
            api_key.into(),
        )),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(
            client,
            config.base_url.clone(),
            config.model.clone(),
            api_key.into(),
        )),
    };
    Ok(provider)
}

pub(crate) fn http_client(provider: &str, timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder().timeout(timeout).build().map_err(|error| {
        ProviderError::fatal(provider, format!("could not build http client: {error}"))
    })
}

/// Timeouts and connection failures are transient; a request that cannot be built is fatal.
pub(crate) fn classify_send_error(provider: &str, error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::transient(provider, format!("request timed out: {error}"))
    } else if error.is_connect() {
        ProviderError::transient(provider, format!("connection failed: {error}"))
    } else if error.is_builder() {
        ProviderError::fatal(provider, format!("invalid request: {error}"))
    } else {
        ProviderError::transient(provider, format!("request failed: {error}"))
    }
}

pub(crate) fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Turn a provider response into a decoded body or a status-classified error.
pub(crate) async fn decode_response<T>(provider: &str, response: Response) -> Result<T, ProviderError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|error| ProviderError::transient(provider, format!("body read failed: {error}")))?;

    if !status.is_success() {
        return Err(ProviderError::from_status(
            provider,
            status.as_u16(),
            truncate(&body, 500),
            retry_after,
        ));
    }

    serde_json::from_str(&body).map_err(|error| {
        ProviderError::fatal(provider, format!("could not decode response: {error}"))
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    use super::{endpoint, parse_retry_after, truncate};

    #[test]
    fn retry_after_seconds_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn endpoint_joins_without_double_slashes() {
        assert_eq!(
            endpoint("https://api.mistral.ai/", "/v1/chat/completions"),
            "https://api.mistral.ai/v1/chat/completions"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééééé", 2), "éé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
