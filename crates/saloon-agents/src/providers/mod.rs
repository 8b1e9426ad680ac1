//! HTTP provider clients and the role router.
//!
//! | Status / failure             | AgentError     |
//! |------------------------------|----------------|
//! | 429                          | `RateLimited` (honours `Retry-After` seconds) |
//! | 408, 5xx, network, timeouts  | `Transient`    |
//! | 400, 401, 403, 404, other 4xx| `Permanent`    |
//! | success with blank text      | `Empty`        |

pub mod anthropic;
pub mod judge;
pub mod openai;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use saloon_coordination::negotiation::{AgentClient, AgentError, AgentRequest, Role};
use tracing::debug;

use crate::config::{AgentSpec, ProviderKind, SaloonConfig};
use crate::extract::shape_reply;
use crate::prompts::PromptBuilder;

pub use anthropic::AnthropicClient;
pub use judge::ModelJudge;
pub use openai::OpenAiClient;

/// Longest error body kept in an error message.
const MAX_ERROR_BODY: usize = 300;

/// One completion against one provider. Retries and timeouts are the
/// coordinator's job, not the client's.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, AgentError>;
}

/// Shared HTTP client for all providers.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .build()
        .context("Failed to build HTTP client")
}

/// Classify a non-success response.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> AgentError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, MAX_ERROR_BODY));
    match status.as_u16() {
        429 => AgentError::RateLimited {
            message: detail,
            retry_after: retry_after(headers),
        },
        408 => AgentError::Transient(detail),
        500..=599 => AgentError::Transient(detail),
        _ => AgentError::Permanent(detail),
    }
}

/// Classify a transport failure.
pub fn classify_transport(error: &reqwest::Error) -> AgentError {
    if error.is_builder() {
        AgentError::Permanent(format!("invalid request: {}", error))
    } else {
        AgentError::Transient(format!("network error: {}", error))
    }
}

/// `Retry-After` given in whole seconds. HTTP-date values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Completion text, or `Empty` when the provider answered with nothing.
pub fn non_blank(text: Option<String>) -> Result<String, AgentError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(AgentError::Empty),
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Send a prepared request and return the body of a successful response.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<String, AgentError> {
    let response = request.send().await.map_err(|e| classify_transport(&e))?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(|e| classify_transport(&e))?;
    if !status.is_success() {
        return Err(classify_status(status, &headers, &body));
    }
    Ok(body)
}

/// Build the provider client for `kind`, using `model` when given.
///
/// A missing API key is not an error here: the client reports a
/// `Permanent` failure on first use, so unused providers need no key.
pub fn provider_for(
    config: &SaloonConfig,
    http: &reqwest::Client,
    kind: ProviderKind,
    model: Option<&str>,
) -> Arc<dyn ChatProvider> {
    let mut settings = config.providers.get(kind).clone();
    if let Some(model) = model {
        settings.model = model.to_string();
    }
    match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiClient::new(http.clone(), settings)),
        ProviderKind::Anthropic => Arc::new(AnthropicClient::new(http.clone(), settings)),
    }
}

/// [`AgentClient`] that routes each role to the provider of the agent
/// holding it, builds the persona prompts and shapes the reply.
pub struct ProviderRouter {
    members: HashMap<Role, Arc<dyn ChatProvider>>,
    prompts: PromptBuilder,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            prompts: PromptBuilder::new(),
        }
    }

    pub fn with_member(mut self, role: Role, provider: Arc<dyn ChatProvider>) -> Self {
        self.members.insert(role, provider);
        self
    }

    pub fn from_config(config: &SaloonConfig, http: &reqwest::Client, agents: &[AgentSpec]) -> Self {
        agents.iter().fold(Self::new(), |router, agent| {
            router.with_member(
                agent.role,
                provider_for(config, http, agent.provider, agent.model.as_deref()),
            )
        })
    }

    pub fn provider(&self, role: Role) -> Option<&Arc<dyn ChatProvider>> {
        self.members.get(&role)
    }
}

impl Default for ProviderRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentClient for ProviderRouter {
    async fn invoke(&self, request: &AgentRequest) -> Result<String, AgentError> {
        let provider = self.members.get(&request.role).ok_or_else(|| {
            AgentError::Permanent(format!("no provider configured for role {}", request.role))
        })?;
        let system = self.prompts.system_prompt(request);
        let user = self.prompts.user_prompt(request);
        debug!(
            session = %request.session_id,
            role = %request.role,
            provider = provider.name(),
            model = provider.model(),
            correction = request.is_correction(),
            "Dispatching agent turn"
        );
        let raw = provider.complete(&system, &user).await?;
        shape_reply(request.kind, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_classify_status_table() {
        let empty = HeaderMap::new();
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &empty, ""),
            AgentError::RateLimited { retry_after: None, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::REQUEST_TIMEOUT, &empty, ""),
            AgentError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &empty, "upstream"),
            AgentError::Transient(_)
        ));
        for status in [
            StatusCode::BAD_REQUEST,
            StatusCode::UNAUTHORIZED,
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
        ] {
            assert!(matches!(
                classify_status(status, &empty, ""),
                AgentError::Permanent(_)
            ));
        }
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, &headers, "slow down");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn test_error_body_truncated() {
        let body = "x".repeat(1000);
        let err = classify_status(StatusCode::BAD_REQUEST, &HeaderMap::new(), &body);
        assert!(err.to_string().len() < 400);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("hi".into())), Ok("hi".to_string()));
        assert_eq!(non_blank(Some("  \n".into())), Err(AgentError::Empty));
        assert_eq!(non_blank(None), Err(AgentError::Empty));
    }
}
