use async_trait::async_trait;
use propwise_core::{ProviderError, ProviderId};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{classify_send_error, decode_response, endpoint};
use crate::llm::{ModelProvider, ModelRequest, ModelResponse, TokenUsage};

const PROVIDER: &str = "mistral";

/// Mistral chat-completions adapter.
pub struct MistralProvider {
    id: ProviderId,
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl MistralProvider {
    pub fn new(client: Client, base_url: String, model: String, api_key: SecretString) -> Self {
        Self { id: ProviderId::new(format!("{PROVIDER}:{model}")), client, base_url, model, api_key }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[async_trait]
impl ModelProvider for MistralProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: &request.instructions },
                ChatMessage { role: "user", content: &request.prompt },
            ],
        };

        let response = self
            .client
            .post(endpoint(&self.base_url, "v1/chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| classify_send_error(PROVIDER, error))?;

        let parsed: ChatResponse = decode_response(PROVIDER, response).await?;
        let text = parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(match parsed.usage {
            Some(usage) => ModelResponse {
                text,
                provider: self.id.clone(),
                usage: TokenUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                },
            },
            None => ModelResponse::with_estimated_usage(self.id.clone(), request, text),
        })
    }
}
