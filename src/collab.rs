//! External collaborator seams.
//!
//! The response cache and the usage sink live outside this core (Redis,
//! a persistence service). Both are best-effort from the dispatcher's
//! point of view: cache unavailability only disables the fast path, and a
//! sink failure is logged, never surfaced to the caller.

use async_trait::async_trait;

use crate::logrecord::LogEntry;
use crate::types::ChatRequest;

/// Read-through response cache keyed by request fingerprint.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, fingerprint: &str) -> Option<serde_json::Value>;
    async fn put(&self, fingerprint: &str, response: &serde_json::Value);
}

/// Persistence sink accepting one immutable log entry per call.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record(&self, entry: LogEntry);
}

/// Stable fingerprint over the parts of a request that determine its
/// response. Streaming responses are never cached.
pub fn request_fingerprint(req: &ChatRequest) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    req.model.hash(&mut hasher);
    // Serialized form covers messages, params, tools and response format.
    if let Ok(body) = serde_json::to_string(&req.messages) {
        body.hash(&mut hasher);
    }
    if let Ok(params) = serde_json::to_string(&req.params) {
        params.hash(&mut hasher);
    }
    if let Ok(tools) = serde_json::to_string(&req.tools) {
        tools.hash(&mut hasher);
    }
    if let Ok(format) = serde_json::to_string(&req.response_format) {
        format.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
