//! Configuration loading and management.
//!
//! Loads `DoctranConfig` from `./doctran.toml` (or `$DOCTRAN_CONFIG_PATH`).
//! Environment variables override file values; file values override
//! built-in defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level `doctran` configuration loaded from TOML.
///
/// Path: `./doctran.toml` or `$DOCTRAN_CONFIG_PATH`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DoctranConfig {
    /// Provider connection settings (`[provider]`).
    pub provider: ProviderConfig,
    /// Chunking and context-window sizing (`[chunk]`).
    pub chunk: ChunkConfig,
    /// Retry policy applied inside the provider (`[retry]`).
    pub retry: RetryConfig,
    /// SRT block-grouping limits (`[srt]`).
    pub srt: SrtConfig,
}

impl DoctranConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Reads a `.env` file in the current directory first, if one exists,
    /// so `DOCTRAN_PROVIDER_API_KEY` and friends can live outside the shell
    /// environment; a missing `.env` is not an error.
    pub fn load() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
                tracing::warn!(error = %e, "failed to load .env file");
            }
        }
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path()?;
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: DoctranConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(DoctranConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config file path.
    ///
    /// Checks `$DOCTRAN_CONFIG_PATH` first, then `./doctran.toml`.
    fn config_path() -> Result<PathBuf> {
        Self::config_path_with(|key| std::env::var(key).ok())
    }

    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(p) = env("DOCTRAN_CONFIG_PATH") {
            return Ok(PathBuf::from(p));
        }
        Ok(PathBuf::from("doctran.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability (avoids unsafe `set_var` in tests).
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DOCTRAN_PROVIDER_KIND") {
            match v.parse() {
                Ok(kind) => self.provider.kind = kind,
                Err(_) => tracing::warn!(
                    var = "DOCTRAN_PROVIDER_KIND",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCTRAN_PROVIDER_BASE_URL") {
            match url::Url::parse(&v) {
                Ok(_) => self.provider.base_url = v,
                Err(e) => tracing::warn!(
                    var = "DOCTRAN_PROVIDER_BASE_URL",
                    value = %v,
                    error = %e,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCTRAN_PROVIDER_MODEL") {
            self.provider.model = v;
        }
        if let Some(v) = env("DOCTRAN_PROVIDER_API_KEY") {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = env("DOCTRAN_REQUEST_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.provider.request_timeout_secs = n,
                Err(_) => tracing::warn!(
                    var = "DOCTRAN_REQUEST_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCTRAN_MAIN_LINES_PER_CHUNK") {
            match v.parse() {
                Ok(n) => self.chunk.main_lines_per_chunk = n,
                Err(_) => tracing::warn!(
                    var = "DOCTRAN_MAIN_LINES_PER_CHUNK",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCTRAN_MAX_TRANSLATION_ATTEMPTS") {
            match v.parse() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => tracing::warn!(
                    var = "DOCTRAN_MAX_TRANSLATION_ATTEMPTS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("DOCTRAN_RETRY_DELAY_SECS") {
            match v.parse() {
                Ok(n) => self.retry.retry_delay_secs = n,
                Err(_) => tracing::warn!(
                    var = "DOCTRAN_RETRY_DELAY_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string into config (for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: DoctranConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

/// Which wire protocol the configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Local Ollama-style JSON-over-HTTP `/api/generate` endpoint.
    #[default]
    Local,
    /// Hosted OpenAI-compatible chat-completions endpoint.
    HostedChat,
    /// Hosted multimodal (Gemini-style) endpoint, selected by `api-key` header.
    HostedMultimodal,
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "hosted_chat" => Ok(Self::HostedChat),
            "hosted_multimodal" => Ok(Self::HostedMultimodal),
            other => Err(format!("unknown provider kind: {other}")),
        }
    }
}

/// LLM endpoint connection settings (`[provider]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Which wire protocol to speak.
    pub kind: ProviderKind,
    /// Endpoint base URL.
    pub base_url: String,
    /// Model identifier sent with each request.
    pub model: String,
    /// Bearer token / API key, absent for unauthenticated local endpoints.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// `num_ctx` context window passed to Ollama-style requests.
    pub ollama_num_ctx: u32,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "__REDACTED__"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("ollama_num_ctx", &self.ollama_num_ctx)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Local,
            base_url: "http://localhost:11434".to_string(),
            model: "mistral-small:24b".to_string(),
            api_key: None,
            request_timeout_secs: 60,
            ollama_num_ctx: 2048,
        }
    }
}

/// Chunking and context-window sizing (`[chunk]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Target number of source lines per main chunk.
    pub main_lines_per_chunk: usize,
    /// Maximum words carried forward as rolling translation context.
    pub rolling_context_words: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            main_lines_per_chunk: 25,
            rolling_context_words: 25,
        }
    }
}

/// Retry policy applied inside the provider (`[retry]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per translation request (including the first).
    pub max_attempts: u32,
    /// Delay between retry attempts.
    pub retry_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_secs: 2,
        }
    }
}

/// SRT block-grouping limits (`[srt]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SrtConfig {
    /// Maximum subtitles per translation block.
    pub lines_per_block: usize,
    /// Maximum combined character count per translation block.
    pub max_chars_per_block: usize,
}

impl Default for SrtConfig {
    fn default() -> Self {
        Self {
            lines_per_block: 5,
            max_chars_per_block: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_original_constants() {
        let config = DoctranConfig::default();
        assert_eq!(config.provider.base_url, "http://localhost:11434");
        assert_eq!(config.provider.model, "mistral-small:24b");
        assert_eq!(config.provider.request_timeout_secs, 60);
        assert_eq!(config.provider.ollama_num_ctx, 2048);
        assert_eq!(config.chunk.main_lines_per_chunk, 25);
        assert_eq!(config.chunk.rolling_context_words, 25);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.retry_delay_secs, 2);
        assert_eq!(config.srt.lines_per_block, 5);
        assert_eq!(config.srt.max_chars_per_block, 500);
    }

    #[test]
    fn parse_partial_toml_uses_defaults() {
        let toml_str = r#"
[provider]
model = "qwen3-8b"
"#;
        let config = DoctranConfig::from_toml(toml_str).expect("should parse");
        assert_eq!(config.provider.model, "qwen3-8b");
        assert_eq!(config.provider.base_url, "http://localhost:11434");
        assert_eq!(config.chunk.main_lines_per_chunk, 25);
    }

    #[test]
    fn env_overrides_config_values() {
        let toml_str = r#"
[provider]
model = "from-toml"
"#;
        let mut config = DoctranConfig::from_toml(toml_str).expect("should parse");
        let env = |key: &str| -> Option<String> {
            match key {
                "DOCTRAN_PROVIDER_MODEL" => Some("from-env".to_string()),
                "DOCTRAN_MAX_TRANSLATION_ATTEMPTS" => Some("5".to_string()),
                _ => None,
            }
        };
        config.apply_overrides(env);
        assert_eq!(config.provider.model, "from-env");
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn config_path_uses_env_var() {
        let path = DoctranConfig::config_path_with(|key| match key {
            "DOCTRAN_CONFIG_PATH" => Some("/custom/doctran.toml".to_string()),
            _ => None,
        })
        .expect("should resolve");
        assert_eq!(path, PathBuf::from("/custom/doctran.toml"));
    }

    #[test]
    fn config_path_defaults_to_cwd() {
        let path = DoctranConfig::config_path_with(|_| None).expect("should resolve");
        assert_eq!(path, PathBuf::from("doctran.toml"));
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = DoctranConfig::from_toml("this is {{ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn invalid_provider_kind_env_is_ignored() {
        let mut config = DoctranConfig::default();
        let env = |key: &str| -> Option<String> {
            match key {
                "DOCTRAN_PROVIDER_KIND" => Some("carrier-pigeon".to_string()),
                _ => None,
            }
        };
        config.apply_overrides(env);
        assert_eq!(config.provider.kind, ProviderKind::Local);
    }

    #[test]
    fn invalid_base_url_env_is_ignored() {
        let mut config = DoctranConfig::default();
        let env = |key: &str| -> Option<String> {
            match key {
                "DOCTRAN_PROVIDER_BASE_URL" => Some("not a url".to_string()),
                _ => None,
            }
        };
        config.apply_overrides(env);
        assert_eq!(config.provider.base_url, "http://localhost:11434");
    }
}
