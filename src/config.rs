use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::completion::{CompletionClient, MemoryCache, ResponseCache};
use crate::db::{CacheError, Database};
use crate::doc_processor::ChunkingError;
use crate::llm::{claude::ClaudeConfig, openai::OpenAiConfig, Provider, DEFAULT_REQUEST_TIMEOUT};
use crate::summarizer::{SummarizerConfig, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_MODEL: &str = "ollama/llama3.2:3b";
pub const DEFAULT_OVERLAP: usize = 200;
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_CLAUDE_BASE_URL: &str = "https://api.anthropic.com";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} API key not configured")]
    MissingApiKey(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    #[error("Cache unavailable: {0}")]
    Cache(#[from] CacheError),
}

/// Key/value settings taken from the environment (and `.env`, when present).
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            values: std::env::vars().collect(),
        }
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Blank values count as unset.
    pub fn get_setting(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_usize(&self, key: &'static str, default: usize) -> Result<usize, ConfigError> {
        match self.get_setting(key) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
            None => Ok(default),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheMode {
    Off,
    Memory,
    Sqlite(PathBuf),
}

impl CacheMode {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "off" | "none" | "false" => CacheMode::Off,
            "memory" => CacheMode::Memory,
            _ => CacheMode::Sqlite(PathBuf::from(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub model: String,
    pub chunk_size: usize,
    pub overlap: usize,
    pub cache: CacheMode,
}

impl AppConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            model: settings
                .get_setting("CLAUSE_EASE_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            chunk_size: settings.get_usize("CLAUSE_EASE_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            overlap: settings.get_usize("CLAUSE_EASE_CHUNK_OVERLAP", DEFAULT_OVERLAP)?,
            cache: settings
                .get_setting("CLAUSE_EASE_CACHE")
                .map(|v| CacheMode::parse(&v))
                .unwrap_or(CacheMode::Memory),
        })
    }

    pub fn summarizer_config(&self) -> Result<SummarizerConfig, ConfigError> {
        Ok(SummarizerConfig::new(self.chunk_size, self.overlap)?)
    }
}

/// Seconds from `CLAUSE_EASE_REQUEST_TIMEOUT`; zero is rejected.
fn request_timeout(settings: &Settings) -> Result<Duration, ConfigError> {
    const KEY: &str = "CLAUSE_EASE_REQUEST_TIMEOUT";
    let secs = settings.get_usize(KEY, DEFAULT_REQUEST_TIMEOUT.as_secs() as usize)?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key: KEY,
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_secs(secs as u64))
}

/// Resolve an LLM provider from a model string like "openai/gpt-4o", "claude/...", "ollama/..."
pub fn resolve_provider(model: &str, settings: &Settings) -> Result<(Provider, String), ConfigError> {
    let timeout = request_timeout(settings)?;
    if let Some(model_id) = model.strip_prefix("ollama/") {
        let host = settings
            .get_setting("OLLAMA_HOST")
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
        Ok((Provider::ollama(host, timeout), model_id.to_string()))
    } else if let Some(model_id) = model.strip_prefix("claude/") {
        let api_key = settings
            .get_setting("CLAUDE_API_KEY")
            .ok_or(ConfigError::MissingApiKey("Claude"))?;
        let base_url = settings
            .get_setting("CLAUDE_BASE_URL")
            .unwrap_or_else(|| DEFAULT_CLAUDE_BASE_URL.to_string());
        Ok((
            Provider::Claude(ClaudeConfig {
                api_key,
                base_url,
                timeout,
            }),
            model_id.to_string(),
        ))
    } else {
        let model_id = model.strip_prefix("openai/").unwrap_or(model);
        let api_key = settings
            .get_setting("OPENAI_API_KEY")
            .ok_or(ConfigError::MissingApiKey("OpenAI"))?;
        let base_url = settings
            .get_setting("OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
        Ok((
            Provider::OpenAi(OpenAiConfig {
                api_key,
                base_url,
                timeout,
            }),
            model_id.to_string(),
        ))
    }
}

pub fn build_cache(mode: &CacheMode) -> Result<Option<Arc<dyn ResponseCache>>, ConfigError> {
    Ok(match mode {
        CacheMode::Off => None,
        CacheMode::Memory => Some(Arc::new(MemoryCache::new()) as Arc<dyn ResponseCache>),
        CacheMode::Sqlite(path) => Some(Arc::new(Database::new(path)?) as Arc<dyn ResponseCache>),
    })
}

/// Provider, model id and cache wired into one client, shared by summarizer and chat.
pub fn build_client(config: &AppConfig, settings: &Settings) -> Result<CompletionClient, ConfigError> {
    let (provider, model_id) = resolve_provider(&config.model, settings)?;
    tracing::info!(provider = provider.name(), model = %model_id, cache = ?config.cache, "Completion client ready");

    let client = CompletionClient::new(Arc::new(provider), model_id);
    Ok(match build_cache(&config.cache)? {
        Some(cache) => client.with_cache(cache),
        None => client,
    })
}
