use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::LlmClient;
use crate::error::{LlmError, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    system: Option<String>,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("system", &self.system.is_some())
            .finish()
    }
}

impl Clone for OpenAiClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            system: self.system.clone(),
        }
    }
}

impl OpenAiClient {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: build_client(DEFAULT_TIMEOUT),
            api_key,
            base_url,
            model,
            system: None,
        }
    }

    /// Prepend a system message to every completion request.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Replace the per-call timeout (default 60s).
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn send_request(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.as_deref() {
            messages.push(ApiMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ApiMessage {
            role: "user",
            content: prompt,
        });

        let body = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: max_output_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited {
                retry_after: retry_after_hint(&response),
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(LlmError::Unauthorized);
        }

        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            tracing::error!(%status, "chat completion request failed");
            return Err(LlmError::Service(format!(
                "chat completion failed (status {status})"
            )));
        }

        let resp: ChatResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".into()));
        }

        Ok(content)
    }
}

impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str, max_output_tokens: u32) -> Result<String> {
        self.send_request(prompt, max_output_tokens).await
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Build the HTTP client: rustls TLS, `gist/{version}` user-agent.
///
/// # Panics
///
/// Panics if the TLS backend cannot be initialized (should never happen with rustls).
fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .user_agent(concat!("gist/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("HTTP client construction must not fail")
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::Service(e.to_string())
    }
}

/// Parse a numeric `Retry-After` header value as seconds.
fn retry_after_hint(response: &reqwest::Response) -> Option<Duration> {
    let secs = response
        .headers()
        .get("retry-after")?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()?;
    Some(Duration::from_secs(secs))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
