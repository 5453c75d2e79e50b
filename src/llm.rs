//! Generation client abstraction and HTTP implementations.
//!
//! This module provides a generic [`GenerationClient`] trait for producing
//! text from a prompt, along with concrete implementations:
//!
//! - [`OpenAiClient`]: Chat Completions API
//! - [`AnthropicClient`]: Anthropic Messages API
//! - [`MockGenerationClient`]: test double for unit tests
//!
//! Used by the digest cache to produce feature digests on a cache miss.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during a generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The provider's API key environment variable is not set.
    #[error("{0} environment variable not set")]
    MissingApiKey(&'static str),

    /// HTTP or network error occurred.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API answered with a non-success status.
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// Failed to parse the API response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Model returned no usable text.
    #[error("Model returned empty response")]
    EmptyResponse,
}

// ============================================================================
// Request Types
// ============================================================================

/// Options passed to every generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Which generation model to invoke.
    pub model: String,
    /// Cap on response length.
    pub max_output_tokens: u32,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_output_tokens,
        }
    }
}

/// A system instruction plus the user message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// The result of a successful generation request.
#[derive(Debug, Clone)]
pub struct Completion {
    /// The generated text from the model.
    pub text: String,
}

/// Which HTTP API backs the generation client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4-turbo",
            Self::Anthropic => "claude-haiku-4-5",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(self) -> &'static str {
        match self {
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Build a client for this provider from its API key variable.
    pub fn client_from_env(self) -> Result<Box<dyn GenerationClient>, GenerationError> {
        Ok(match self {
            Self::OpenAi => Box::new(OpenAiClient::from_env()?),
            Self::Anthropic => Box::new(AnthropicClient::from_env()?),
        })
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(format!(
                "unknown provider '{other}', expected 'openai' or 'anthropic'"
            )),
        }
    }
}

// ============================================================================
// GenerationClient Trait
// ============================================================================

/// Generic interface for text generation.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate text for `prompt` using the model described by `config`.
    async fn generate(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<Completion, GenerationError>;
}

/// Reject blank model output so it never gets cached.
fn non_empty(text: Option<String>) -> Result<Completion, GenerationError> {
    match text {
        Some(text) if !text.trim().is_empty() => Ok(Completion { text }),
        _ => Err(GenerationError::EmptyResponse),
    }
}

async fn send_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
    body: &Req,
) -> Result<Resp, GenerationError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| GenerationError::Http(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(GenerationError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| GenerationError::Parse(e.to_string()))
}

// ============================================================================
// OpenAI Implementation
// ============================================================================

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Client for the OpenAI Chat Completions API.
pub struct OpenAiClient {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

/// A message in the conversation.
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a new client by reading `OPENAI_API_KEY`.
    pub fn from_env() -> Result<Self, GenerationError> {
        let var = Provider::OpenAi.api_key_var();
        let api_key = std::env::var(var).map_err(|_| GenerationError::MissingApiKey(var))?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

fn chat_text(response: ChatResponse) -> Result<Completion, GenerationError> {
    non_empty(
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content),
    )
}

#[async_trait]
impl GenerationClient for OpenAiClient {
    async fn generate(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<Completion, GenerationError> {
        let body = ChatRequest {
            model: &config.model,
            max_tokens: config.max_output_tokens,
            messages: vec![
                Message {
                    role: "system",
                    content: &prompt.system,
                },
                Message {
                    role: "user",
                    content: &prompt.user,
                },
            ],
        };

        let request = self.client.post(OPENAI_URL).bearer_auth(&self.api_key);
        chat_text(send_json(request, &body).await?)
    }
}

// ============================================================================
// Anthropic Implementation
// ============================================================================

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

/// Client for the Anthropic Messages API.
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
}

/// Request body for the Anthropic Messages API.
#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

/// Response from the Anthropic Messages API.
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
}

/// A content block in the API response.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    /// Create a new client by reading `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, GenerationError> {
        let var = Provider::Anthropic.api_key_var();
        let api_key = std::env::var(var).map_err(|_| GenerationError::MissingApiKey(var))?;
        Ok(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

fn anthropic_text(response: AnthropicResponse) -> Result<Completion, GenerationError> {
    non_empty(response.content.into_iter().find_map(|block| block.text))
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    async fn generate(
        &self,
        prompt: &Prompt,
        config: &ModelConfig,
    ) -> Result<Completion, GenerationError> {
        let body = AnthropicRequest {
            model: &config.model,
            max_tokens: config.max_output_tokens,
            system: &prompt.system,
            messages: vec![Message {
                role: "user",
                content: &prompt.user,
            }],
        };

        let request = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01");
        anthropic_text(send_json(request, &body).await?)
    }
}

// ============================================================================
// Unconfigured Client
// ============================================================================

/// Stand-in used when no API key is available. Every call fails with
/// [`GenerationError::MissingApiKey`], so cached digests stay readable while
/// misses surface the missing credential.
pub struct UnconfiguredClient {
    api_key_var: &'static str,
}

impl UnconfiguredClient {
    pub fn new(provider: Provider) -> Self {
        Self {
            api_key_var: provider.api_key_var(),
        }
    }
}

#[async_trait]
impl GenerationClient for UnconfiguredClient {
    async fn generate(
        &self,
        _prompt: &Prompt,
        _config: &ModelConfig,
    ) -> Result<Completion, GenerationError> {
        Err(GenerationError::MissingApiKey(self.api_key_var))
    }
}

// ============================================================================
// Mock Implementation (Test Only)
// ============================================================================

/// Mock generation client. Returns scripted results in FIFO order and counts
/// calls.
#[cfg(test)]
pub struct MockGenerationClient {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<String, GenerationError>>>,
    calls: std::sync::atomic::AtomicUsize,
    prompts: std::sync::Mutex<Vec<Prompt>>,
}

#[cfg(test)]
impl MockGenerationClient {
    /// A client that succeeds with each of `responses` in turn.
    ///
    /// # Panics
    ///
    /// Panics if called more times than there are responses.
    pub fn new(responses: Vec<&str>) -> Self {
        Self::scripted(responses.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn scripted(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.into()),
            calls: std::sync::atomic::AtomicUsize::new(0),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl GenerationClient for MockGenerationClient {
    async fn generate(
        &self,
        prompt: &Prompt,
        _config: &ModelConfig,
    ) -> Result<Completion, GenerationError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("MockGenerationClient: no more responses available");
        non_empty(Some(next?))
    }
}

// ============================================================================
// Tests
// ============================================================================
