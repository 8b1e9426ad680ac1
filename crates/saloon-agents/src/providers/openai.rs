//! OpenAI-compatible chat completions.

use async_trait::async_trait;
use saloon_coordination::negotiation::AgentError;
use serde::{Deserialize, Serialize};

use super::{non_blank, send, ChatProvider};
use crate::config::ProviderSettings;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    settings: ProviderSettings,
}

impl OpenAiClient {
    pub fn new(http: reqwest::Client, settings: ProviderSettings) -> Self {
        Self { http, settings }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'))
    }
}

/// Completion text from a chat-completions body.
pub fn parse_completion(body: &str) -> Result<String, AgentError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| AgentError::Transient(format!("unreadable completion: {}", e)))?;
    non_blank(response.choices.into_iter().next().and_then(|c| c.message.content))
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.settings.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Permanent("OPENAI_API_KEY is not set".into()))?;
        let request = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let body = send(
            self.http
                .post(self.endpoint())
                .bearer_auth(api_key)
                .json(&request),
        )
        .await?;
        parse_completion(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Book Title: Salt"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "Book Title: Salt");
    }

    #[test]
    fn test_parse_blank_completion_is_empty() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert_eq!(parse_completion(body), Err(AgentError::Empty));
        assert_eq!(parse_completion(r#"{"choices":[]}"#), Err(AgentError::Empty));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let mut settings = ProviderSettings::default();
        settings.base_url = "http://localhost:8080/v1/".into();
        let client = OpenAiClient::new(reqwest::Client::new(), settings);
        assert_eq!(client.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_missing_key_is_permanent() {
        let client = OpenAiClient::new(reqwest::Client::new(), ProviderSettings::default());
        let err = client.complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, AgentError::Permanent(_)));
    }
}
