//! Provider adapter seam.
//!
//! Each upstream wire dialect implements `ProviderAdapter`: endpoint and
//! header construction, request translation, and usage/image extraction.
//! Concentrating the per-provider knowledge behind one trait keeps the
//! dispatcher free of parallel provider switches; a new provider is one
//! new implementation.

use std::sync::Arc;

use reqwest::header::HeaderMap;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::types::{ChatRequest, Usage};

/// Capability declaration for an adapter (metadata/validation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterCapabilities {
    pub streaming: bool,
    pub vision: bool,
    pub tools: bool,
    pub json_output: bool,
    pub web_search: bool,
}

/// Execution context handed to every adapter call.
#[derive(Clone)]
pub struct ProviderContext {
    /// Concrete provider id from the resolved mapping (e.g. "groq").
    pub provider_id: String,
    /// Provider-native model name from the resolved mapping.
    pub model: String,
    /// Base URL override (custom endpoints, tests). Adapters with a fixed
    /// host use it in preference to their default.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub stream: bool,
    pub web_search_enabled: bool,
    /// OpenAI only: the resolved mapping declared `supports_responses_api`.
    pub responses_api: bool,
    pub config: GatewayConfig,
}

impl ProviderContext {
    pub fn new(provider_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model: model.into(),
            base_url: None,
            api_key: None,
            stream: false,
            web_search_enabled: false,
            responses_api: false,
            config: GatewayConfig::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }
}

/// Injectable lookup for provider continuation state (e.g. a Gemini thought
/// signature) keyed by tool-call id. Cache ownership lives with the caller.
pub type SignatureLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Options threaded through request translation.
#[derive(Clone, Default)]
pub struct TranslateOptions {
    pub thought_signatures: Option<SignatureLookup>,
}

/// Inline image extracted from a provider response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub mime_type: String,
    /// Base64 payload as the provider sent it.
    pub data: String,
}

/// Material for estimating a completion-token count when the provider
/// omitted one but produced output.
#[derive(Debug, Clone, Default)]
pub struct CompletionEstimate {
    pub text: String,
    /// Decoded byte size of each produced image.
    pub image_sizes: Vec<usize>,
}

/// One upstream wire dialect.
pub trait ProviderAdapter: Send + Sync {
    /// Dialect identifier (e.g. "openai", "anthropic").
    fn id(&self) -> &'static str;

    fn capabilities(&self) -> AdapterCapabilities;

    /// Provider-specific URL for the chat call described by `ctx`.
    fn endpoint_url(&self, ctx: &ProviderContext) -> Result<String, GatewayError>;

    /// Auth and protocol-extension headers.
    fn build_headers(&self, ctx: &ProviderContext) -> Result<HeaderMap, GatewayError>;

    /// Unified request → provider-native JSON body. Remote images must
    /// already be inlined as data URLs (see `media::inline_remote_images`).
    fn translate_request(
        &self,
        req: &ChatRequest,
        ctx: &ProviderContext,
        opts: &TranslateOptions,
    ) -> Result<serde_json::Value, GatewayError>;

    /// Extract unified usage from a native response or stream chunk.
    /// `estimate` supplies fallback material for providers that omit
    /// completion counts.
    fn extract_usage(
        &self,
        raw: &serde_json::Value,
        estimate: Option<&CompletionEstimate>,
    ) -> Usage;

    /// Extract inline images from a native response or stream chunk.
    fn extract_images(&self, _raw: &serde_json::Value) -> Vec<ImageRef> {
        Vec::new()
    }

    /// Native finish string from a response or chunk, when present.
    fn extract_finish_reason(&self, _raw: &serde_json::Value) -> Option<String> {
        None
    }

    /// Incremental text carried by a stream chunk, when present.
    fn extract_text_delta(&self, _raw: &serde_json::Value) -> Option<String> {
        None
    }
}

pub(crate) fn bearer_headers(api_key: Option<&str>) -> Result<HeaderMap, GatewayError> {
    use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| GatewayError::ConfigurationError(format!("Invalid API token: {e}")))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}
