use async_trait::async_trait;
use propwise_core::{ProviderError, ProviderId};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{classify_send_error, decode_response, endpoint};
use crate::llm::{ModelProvider, ModelRequest, ModelResponse, TokenUsage};

const PROVIDER: &str = "gemini";

/// Gemini `generateContent` adapter.
pub struct GeminiProvider {
    id: ProviderId,
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl GeminiProvider {
    pub fn new(client: Client, base_url: String, model: String, api_key: SecretString) -> Self {
        Self { id: ProviderId::new(format!("{PROVIDER}:{model}")), client, base_url, model, api_key }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part { text: &request.instructions }],
            },
            contents: [Content { role: Some("user"), parts: [Part { text: &request.prompt }] }],
        };

        let path = format!("v1beta/models/{}:generateContent", self.model);
        let response = self
            .client
            .post(endpoint(&self.base_url, &path))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| classify_send_error(PROVIDER, error))?;

        let parsed: GenerateResponse = decode_response(PROVIDER, response).await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .filter_map(|candidate| candidate.content)
            .flat_map(|content| content.parts)
            .filter_map(|part| part.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(match parsed.usage_metadata {
            Some(usage) => ModelResponse {
                text,
                provider: self.id.clone(),
                usage: TokenUsage {
                    input_tokens: usage.prompt_token_count,
                    output_tokens: usage.candidates_token_count,
                },
            },
            None => ModelResponse::with_estimated_usage(self.id.clone(), request, text),
        })
    }
}
