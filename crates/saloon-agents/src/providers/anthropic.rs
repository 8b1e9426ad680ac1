//! Anthropic messages API.

use async_trait::async_trait;
use saloon_coordination::negotiation::AgentError;
use serde::{Deserialize, Serialize};

use super::{non_blank, send, ChatProvider};
use crate::config::ProviderSettings;

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, settings: ProviderSettings) -> Self {
        Self { http, settings }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.settings.base_url.trim_end_matches('/'))
    }
}

/// Concatenated text blocks of a messages body.
pub fn parse_message(body: &str) -> Result<String, AgentError> {
    let response: MessagesResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::Transient(format!("unreadable message: {}", e)))?;
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect();
    non_blank((!text.is_empty()).then(|| text.join("\n")))
}

#[async_trait]
impl ChatProvider for AnthropicClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Permanent("ANTHROPIC_API_KEY is not set".into()))?;
        let request = MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            system,
            messages: vec![Message {
                role: "user",
                content: user,
            }],
            temperature: self.settings.temperature,
        };
        let body = send(
            self.http
                .post(self.endpoint())
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&request),
        )
        .await?;
        parse_message(&body)
    }
}
