//! Azure OpenAI dialect adapter.
//!
//! Two deployment styles exist: classic per-deployment paths on
//! `{resource}.openai.azure.com` with an `api-version` query parameter and
//! `api-key` header auth, and the unified AI-Foundry path on
//! `{resource}.services.ai.azure.com` with bearer auth and the model named
//! in the body. Both speak the Chat Completions body dialect.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde_json::Value;

use crate::config::keys;
use crate::core::{
    bearer_headers, AdapterCapabilities, CompletionEstimate, ProviderAdapter, ProviderContext,
    TranslateOptions,
};
use crate::error::GatewayError;
use crate::types::{ChatRequest, Usage};

const DEFAULT_API_VERSION: &str = "2024-10-21";

pub struct AzureAdapter;

impl ProviderAdapter for AzureAdapter {
    fn id(&self) -> &'static str {
        "azure"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            streaming: true,
            vision: true,
            tools: true,
            json_output: true,
            web_search: false,
        }
    }

    fn endpoint_url(&self, ctx: &ProviderContext) -> Result<String, GatewayError> {
        let resource = ctx.config.require(keys::AZURE_RESOURCE_NAME)?;

        if ctx.config.azure_uses_foundry() {
            let base = match ctx.base_url.as_deref() {
                Some(url) => url.trim_end_matches('/').to_string(),
                None => format!("https://{resource}.services.ai.azure.com/openai/v1"),
            };
            return Ok(format!("{base}/chat/completions"));
        }

        let api_version = ctx
            .config
            .get(keys::AZURE_API_VERSION)
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
        let base = match ctx.base_url.as_deref() {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{resource}.openai.azure.com/openai"),
        };
        let deployment = urlencoding::encode(&ctx.model);
        Ok(format!(
            "{base}/deployments/{deployment}/chat/completions?api-version={api_version}"
        ))
    }

    fn build_headers(&self, ctx: &ProviderContext) -> Result<HeaderMap, GatewayError> {
        if ctx.config.azure_uses_foundry() {
            return bearer_headers(ctx.api_key.as_deref());
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = ctx.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let value = HeaderValue::from_str(key).map_err(|e| {
                GatewayError::ConfigurationError(format!("Invalid Azure API key: {e}"))
            })?;
            headers.insert("api-key", value);
        }
        Ok(headers)
    }

    fn translate_request(
        &self,
        req: &ChatRequest,
        ctx: &ProviderContext,
        _opts: &TranslateOptions,
    ) -> Result<Value, GatewayError> {
        // Same body dialect as OpenAI; classic deployments ignore the model
        // field in favor of the deployment path, which is harmless.
        super::openai::build_chat_completions_body(req, ctx)
    }

    fn extract_usage(&self, raw: &Value, _estimate: Option<&CompletionEstimate>) -> Usage {
        super::openai::extract_openai_usage(raw)
    }

    fn extract_finish_reason(&self, raw: &Value) -> Option<String> {
        raw.pointer("/choices/0/finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_text_delta(&self, raw: &Value) -> Option<String> {
        raw.pointer("/choices/0/delta/content")
            .or_else(|| raw.pointer("/choices/0/message/content"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    fn classic_ctx() -> ProviderContext {
        ProviderContext::new("azure", "gpt-4o-deployment")
            .with_api_key("az-key")
            .with_config(GatewayConfig::new().with_value(keys::AZURE_RESOURCE_NAME, "myres"))
    }

    #[test]
    fn classic_path_uses_deployment_and_api_version() {
        let url = AzureAdapter.endpoint_url(&classic_ctx()).unwrap();
        assert_eq!(
            url,
            "https://myres.openai.azure.com/openai/deployments/gpt-4o-deployment/chat/completions?api-version=2024-10-21"
        );
        let headers = AzureAdapter.build_headers(&classic_ctx()).unwrap();
        assert_eq!(headers.get("api-key").unwrap(), "az-key");
        assert!(headers.get("authorization").is_none());
    }

    #[test]
    fn foundry_path_is_unified() {
        let c = ProviderContext::new("azure", "gpt-4o")
            .with_api_key("az-key")
            .with_config(
                GatewayConfig::new()
                    .with_value(keys::AZURE_RESOURCE_NAME, "myres")
                    .with_value(keys::AZURE_DEPLOYMENT_TYPE, "foundry"),
            );
        let url = AzureAdapter.endpoint_url(&c).unwrap();
        assert_eq!(
            url,
            "https://myres.services.ai.azure.com/openai/v1/chat/completions"
        );
        let headers = AzureAdapter.build_headers(&c).unwrap();
        assert!(headers.get("authorization").is_some());
    }

    #[test]
    fn missing_resource_name_fails_fast() {
        let c = ProviderContext::new("azure", "gpt-4o");
        let err = AzureAdapter.endpoint_url(&c).unwrap_err();
        assert!(err.to_string().contains(keys::AZURE_RESOURCE_NAME));
    }
}
