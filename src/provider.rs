//! LLM provider abstraction.
//!
//! Three wire formats are implemented, mirroring the three provider classes
//! in the original source:
//!
//! - [`OllamaProvider`] — local Ollama-style `/api/generate` JSON-over-HTTP.
//! - [`HostedChatProvider`] — hosted OpenAI-compatible chat-completions API,
//!   bearer-authenticated.
//! - [`HostedMultimodalProvider`] — hosted Gemini-style `generateContent`
//!   API, authenticated via an `x-goog-api-key` header.
//!
//! Each provider owns one connection-pooled [`reqwest::Client`] for its
//! lifetime (teacher precedent: `src/providers/*.rs` builds one client per
//! provider instance and reuses it) and retries its own request internally
//! up to `max_attempts` times with a fixed delay between attempts — retries
//! are a provider-internal concern, not duplicated in the translation
//! engine above it.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::config::{DoctranConfig, ProviderKind};

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body (sanitized, truncated).
        body: String,
    },
    /// Provider cannot satisfy the request with current configuration.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// Response had no translation markers and echoed the source text, or
    /// otherwise could not be trusted as an actual translation (`spec.md`
    /// §7 "Semantic LLM failure").
    #[error("provider response looks like an echo of the input, not a translation")]
    SemanticFailure,
    /// All retry attempts were exhausted.
    #[error("provider request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },
}

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"ghp_[A-Za-z0-9]{20,}",
        r"glpat-[A-Za-z0-9_\-]{16,}",
        r"xoxb-[A-Za-z0-9\-]{20,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>();
        return format!("{shortened}...[truncated]");
    }
    sanitized
}

/// Core LLM provider interface.
///
/// All provider implementations must be `Send + Sync` to allow use across
/// `.await` boundaries inside the job orchestrator's spawned tasks.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends `prompt` and returns the raw model response text, retrying
    /// internally on transport/HTTP/parse failure.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::RetriesExhausted`] once every attempt fails.
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError>;

    /// The model identifier this provider instance was built for.
    fn model_id(&self) -> &str;
}

/// Runs `generate` and extracts the translated payload from the response,
/// falling back to the whole trimmed response if the model omitted the
/// expected wrapper tags -- unless that fallback response is just an echo
/// of `original_text`, in which case the call fails (`spec.md` §4.1, §7).
/// Pass an empty `original_text` to skip the echo check (the
/// post-processing pass has no source-language input to echo).
///
/// # Errors
///
/// Propagates [`ProviderError`] from `generate`, or returns
/// [`ProviderError::SemanticFailure`] if the response echoed the input.
pub async fn translate(
    provider: &dyn LlmProvider,
    prompt: &str,
    original_text: &str,
) -> Result<String, ProviderError> {
    let raw = provider.generate(prompt).await?;
    crate::prompt::extract_translation(&raw, original_text).ok_or(ProviderError::SemanticFailure)
}

async fn with_retry<F, Fut>(max_attempts: u32, retry_delay: Duration, mut attempt: F) -> Result<String, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, ProviderError>>,
{
    let attempts = max_attempts.max(1);
    let mut last_error = None;
    for attempt_no in 1..=attempts {
        match attempt().await {
            Ok(text) => return Ok(text),
            Err(e) => {
                tracing::warn!(attempt = attempt_no, max_attempts = attempts, error = %e, "provider request failed");
                last_error = Some(e.to_string());
                if attempt_no < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    Err(ProviderError::RetriesExhausted {
        attempts,
        last_error: last_error.unwrap_or_else(|| "unknown error".to_string()),
    })
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(5)
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Local (Ollama-style)
// ---------------------------------------------------------------------------

/// Local Ollama-style `/api/generate` provider.
pub struct OllamaProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    num_ctx: u32,
    max_attempts: u32,
    retry_delay: Duration,
}

#[derive(Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
}

impl OllamaProvider {
    /// Builds a provider against `base_url` (e.g. `http://localhost:11434`).
    pub fn new(config: &DoctranConfig) -> Self {
        let timeout = Duration::from_secs(config.provider.request_timeout_secs);
        Self {
            client: build_client(timeout),
            endpoint: format!("{}/api/generate", config.provider.base_url.trim_end_matches('/')),
            model: config.provider.model.clone(),
            num_ctx: config.provider.ollama_num_ctx,
            max_attempts: config.retry.max_attempts,
            retry_delay: Duration::from_secs(config.retry.retry_delay_secs),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        with_retry(self.max_attempts, self.retry_delay, || async {
            let payload = json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
                "think": false,
                "options": {"num_ctx": self.num_ctx},
            });
            let response = self.client.post(&self.endpoint).json(&payload).send().await?;
            let body = check_http_response(response).await?;
            let parsed: OllamaResponse =
                serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
            Ok(parsed.response)
        })
        .await
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Hosted chat (OpenAI-compatible)
// ---------------------------------------------------------------------------

/// Hosted OpenAI-compatible chat-completions provider.
pub struct HostedChatProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_attempts: u32,
    retry_delay: Duration,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

impl HostedChatProvider {
    /// Builds a provider against `base_url` (a full chat-completions
    /// endpoint URL, e.g. `https://api.openai.com/v1/chat/completions`).
    pub fn new(config: &DoctranConfig) -> Self {
        let timeout = Duration::from_secs(config.provider.request_timeout_secs);
        Self {
            client: build_client(timeout),
            endpoint: config.provider.base_url.clone(),
            model: config.provider.model.clone(),
            api_key: config.provider.api_key.clone(),
            max_attempts: config.retry.max_attempts,
            retry_delay: Duration::from_secs(config.retry.retry_delay_secs),
        }
    }
}

#[async_trait]
impl LlmProvider for HostedChatProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        with_retry(self.max_attempts, self.retry_delay, || async {
            let payload = json!({
                "model": self.model,
                "messages": [{"role": "user", "content": prompt}],
                "stream": false,
            });
            let mut request = self.client.post(&self.endpoint).json(&payload);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            let response = request.send().await?;
            let body = check_http_response(response).await?;
            let parsed: ChatCompletionResponse =
                serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
            Ok(parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .unwrap_or_default())
        })
        .await
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Hosted multimodal (Gemini-style)
// ---------------------------------------------------------------------------

/// Hosted Gemini-style `generateContent` provider.
pub struct HostedMultimodalProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_attempts: u32,
    retry_delay: Duration,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl HostedMultimodalProvider {
    /// Builds a provider for `model` (e.g. `gemini-2.0-flash`), deriving the
    /// endpoint URL the way the source does.
    pub fn new(config: &DoctranConfig, api_key: String) -> Self {
        let timeout = Duration::from_secs(config.provider.request_timeout_secs);
        let model = config.provider.model.clone();
        Self {
            endpoint: format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{model}:generateContent"
            ),
            client: build_client(timeout),
            model,
            api_key,
            max_attempts: config.retry.max_attempts,
            retry_delay: Duration::from_secs(config.retry.retry_delay_secs),
        }
    }
}

#[async_trait]
impl LlmProvider for HostedMultimodalProvider {
    async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
        with_retry(self.max_attempts, self.retry_delay, || async {
            let payload = json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {"temperature": 0.7, "maxOutputTokens": 2048},
            });
            let response = self
                .client
                .post(&self.endpoint)
                .header("x-goog-api-key", &self.api_key)
                .json(&payload)
                .send()
                .await?;
            let body = check_http_response(response).await?;
            let parsed: GenerateContentResponse =
                serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
            Ok(parsed
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content.parts.into_iter().next())
                .map(|p| p.text)
                .unwrap_or_default())
        })
        .await
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Builds the configured provider, auto-switching a `local`-kind config to
/// [`HostedMultimodalProvider`] when the model id starts with `"gemini"` —
/// the same heuristic the source's factory function applies.
///
/// # Errors
///
/// Returns [`ProviderError::Unavailable`] if a hosted provider is selected
/// (explicitly or via auto-switch) but no API key is configured.
pub fn create_provider(config: &DoctranConfig) -> Result<Box<dyn LlmProvider>, ProviderError> {
    let wants_gemini = config.provider.kind == ProviderKind::Local
        && config.provider.model.starts_with("gemini");

    if wants_gemini || config.provider.kind == ProviderKind::HostedMultimodal {
        let api_key = config.provider.api_key.clone().ok_or_else(|| {
            ProviderError::Unavailable(
                "hosted multimodal provider requires an api_key".to_string(),
            )
        })?;
        return Ok(Box::new(HostedMultimodalProvider::new(config, api_key)));
    }

    match config.provider.kind {
        ProviderKind::Local => Ok(Box::new(OllamaProvider::new(config))),
        ProviderKind::HostedChat => Ok(Box::new(HostedChatProvider::new(config))),
        ProviderKind::HostedMultimodal => unreachable!("handled above"),
    }
}
