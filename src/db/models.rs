use serde::{Deserialize, Serialize};

/// A memoized completion, keyed by the hash of the request that produced it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedResponse {
    pub key: String,
    pub model: String,
    pub content: String,
    pub created_at: String,
}
