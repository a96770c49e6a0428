//! Completion client: one request/response call per message list, with an
//! optional response cache keyed on the request's value.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use seahash::SeaHasher;

use crate::db::{cache_key, CacheError, Database};
use crate::llm::{ChatMessage, ChatRequest, LlmError, Provider};

/// Prefix used when a failed completion is rendered inline as text.
pub const ERROR_MARKER: &str = "Error: ";

pub fn is_error_marker(text: &str) -> bool {
    text.starts_with(ERROR_MARKER)
}

/// Outcome of a completion call. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    Failed(String),
}

impl Completion {
    pub fn is_failed(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }

    /// Model output as-is, or the failure as `Error: <description>`.
    pub fn into_text(self) -> String {
        match self {
            Completion::Text(text) => text,
            Completion::Failed(description) => format!("{}{}", ERROR_MARKER, description),
        }
    }
}

/// Anything that can turn a message list into model output.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError>;
}

#[async_trait]
impl CompletionBackend for Provider {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let request = ChatRequest {
            messages: messages.to_vec(),
            model: model.to_string(),
        };
        Ok(self.chat(&request).await?.content)
    }
}

/// Value-keyed store of prior responses. Entries are never mutated once written.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: u64) -> Result<Option<String>, CacheError>;
    fn put(&self, key: u64, model: &str, content: &str) -> Result<(), CacheError>;
}

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<u64, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: u64) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().get(&key).cloned())
    }

    fn put(&self, key: u64, _model: &str, content: &str) -> Result<(), CacheError> {
        self.entries
            .write()
            .entry(key)
            .or_insert_with(|| content.to_string());
        Ok(())
    }
}

impl ResponseCache for Database {
    fn get(&self, key: u64) -> Result<Option<String>, CacheError> {
        Ok(self.get_response(key)?.map(|row| row.content))
    }

    fn put(&self, key: u64, model: &str, content: &str) -> Result<(), CacheError> {
        self.put_response(key, model, content)
    }
}

/// Hash of the model name and the JSON form of the full message list, in order.
pub fn request_key(model: &str, messages: &[ChatMessage]) -> Result<u64, serde_json::Error> {
    let body = serde_json::to_vec(messages)?;
    let mut hasher = SeaHasher::new();
    hasher.write(model.as_bytes());
    hasher.write_u8(0);
    hasher.write(&body);
    Ok(hasher.finish())
}

#[derive(Clone)]
pub struct CompletionClient {
    backend: Arc<dyn CompletionBackend>,
    model: String,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl CompletionClient {
    pub fn new(backend: Arc<dyn CompletionBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Send one request. Never fails and never retries; failures come back as `Completion::Failed`.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Completion {
        let cache = self.cache.as_ref().and_then(|cache| match request_key(&self.model, messages) {
            Ok(key) => Some((cache, key)),
            Err(e) => {
                tracing::warn!("Completion cache bypassed, request not serializable: {}", e);
                None
            }
        });

        if let Some((cache, key)) = cache {
            match cache.get(key) {
                Ok(Some(hit)) => {
                    tracing::debug!(key = %cache_key(key), "Completion cache hit");
                    return Completion::Text(hit);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Completion cache lookup failed: {}", e),
            }
        }

        match self.backend.complete(&self.model, messages).await {
            Ok(text) => {
                if let Some((cache, key)) = cache {
                    if let Err(e) = cache.put(key, &self.model, &text) {
                        tracing::warn!("Completion cache write failed: {}", e);
                    }
                }
                Completion::Text(text)
            }
            Err(e) => {
                tracing::warn!(model = %self.model, "Completion failed: {}", e);
                Completion::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// Scripted backend that records every request it receives.
    pub struct FakeBackend {
        reply: Box<dyn Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync>,
        pub calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeBackend {
        pub fn new(
            reply: impl Fn(&[ChatMessage]) -> Result<String, LlmError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                reply: Box::new(reply),
                calls: Mutex::new(Vec::new()),
            })
        }

        /// Echoes a short digest of the last message.
        pub fn echo() -> Arc<Self> {
            Self::new(|messages| {
                let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
                Ok(format!("summary of {} chars", last.chars().count()))
            })
        }

        pub fn failing() -> Arc<Self> {
            Self::new(|_| {
                Err(LlmError::Api {
                    status: 503,
                    message: "service unavailable".into(),
                })
            })
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        async fn complete(&self, _model: &str, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().push(messages.to_vec());
            (self.reply)(messages)
        }
    }
}
