//! AWS Bedrock Converse dialect adapter.
//!
//! Request signing (SigV4) is owned by the credential collaborator; this
//! adapter accepts a bearer token for Bedrock API keys and leaves signed
//! headers to be injected upstream.

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::keys;
use crate::core::{
    bearer_headers, AdapterCapabilities, CompletionEstimate, ProviderAdapter, ProviderContext,
    TranslateOptions,
};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ContentPart, MessageContent, MessageRole, Usage};

pub struct BedrockAdapter;

impl ProviderAdapter for BedrockAdapter {
    fn id(&self) -> &'static str {
        "aws-bedrock"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            streaming: true,
            vision: true,
            tools: true,
            json_output: false,
            web_search: false,
        }
    }

    fn endpoint_url(&self, ctx: &ProviderContext) -> Result<String, GatewayError> {
        let region = ctx.config.require(keys::BEDROCK_REGION)?;
        let base = match ctx.base_url.as_deref() {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://bedrock-runtime.{region}.amazonaws.com"),
        };
        // Cross-region inference profiles prefix the model id (e.g. "us.").
        let model = match ctx.config.get(keys::BEDROCK_MODEL_REGION_PREFIX) {
            Some(prefix) => format!("{prefix}.{}", ctx.model),
            None => ctx.model.clone(),
        };
        let model = urlencoding::encode(&model).into_owned();
        let verb = if ctx.stream { "converse-stream" } else { "converse" };
        Ok(format!("{base}/model/{model}/{verb}"))
    }

    fn build_headers(&self, ctx: &ProviderContext) -> Result<HeaderMap, GatewayError> {
        bearer_headers(ctx.api_key.as_deref())
    }

    fn translate_request(
        &self,
        req: &ChatRequest,
        _ctx: &ProviderContext,
        _opts: &TranslateOptions,
    ) -> Result<Value, GatewayError> {
        build_converse_body(req)
    }

    fn extract_usage(&self, raw: &Value, _estimate: Option<&CompletionEstimate>) -> Usage {
        let usage: BedrockUsage = raw
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(|u| serde_json::from_value(u.clone()).ok())
            .unwrap_or_default();

        if usage.input_tokens.is_none() && usage.output_tokens.is_none() {
            return Usage::default();
        }

        // Bedrock reports inputTokens exclusive of cache traffic; absent
        // cache fields count as zero, not unknown.
        let cache_read = usage.cache_read_input_tokens.unwrap_or(0);
        let cache_write = usage.cache_write_input_tokens.unwrap_or(0);
        let prompt = usage.input_tokens.unwrap_or(0) + cache_read + cache_write;

        Usage {
            prompt_tokens: Some(prompt),
            completion_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            reasoning_tokens: None,
            cached_tokens: Some(cache_read),
        }
        .with_derived_total()
    }

    fn extract_finish_reason(&self, raw: &Value) -> Option<String> {
        raw.get("stopReason")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_text_delta(&self, raw: &Value) -> Option<String> {
        raw.pointer("/contentBlockDelta/delta/text")
            .or_else(|| raw.pointer("/delta/text"))
            .or_else(|| raw.pointer("/output/message/content/0/text"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BedrockUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    total_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    cache_write_input_tokens: Option<u32>,
}

fn build_converse_body(req: &ChatRequest) -> Result<Value, GatewayError> {
    let mut messages: Vec<Value> = Vec::new();
    let mut system: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            MessageRole::System => {
                let text = msg.content.all_text();
                if !text.is_empty() {
                    system.push(json!({ "text": text }));
                }
            }
            MessageRole::Tool => {
                let call_id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    GatewayError::InvalidInput("Tool message missing tool_call_id".into())
                })?;
                messages.push(json!({
                    "role": "user",
                    "content": [{
                        "toolResult": {
                            "toolUseId": call_id,
                            "content": [{ "text": msg.content.all_text() }],
                        },
                    }],
                }));
            }
            MessageRole::User | MessageRole::Assistant => {
                let role = if msg.role == MessageRole::User {
                    "user"
                } else {
                    "assistant"
                };
                let mut content = content_blocks(&msg.content)?;
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        if let Some(f) = &call.function {
                            let input: Value = serde_json::from_str(&f.arguments)
                                .unwrap_or_else(|_| json!({}));
                            content.push(json!({
                                "toolUse": {
                                    "toolUseId": call.id,
                                    "name": f.name,
                                    "input": input,
                                },
                            }));
                        }
                    }
                }
                if content.is_empty() {
                    continue;
                }
                messages.push(json!({ "role": role, "content": content }));
            }
        }
    }

    let mut body = json!({ "messages": messages });
    if !system.is_empty() {
        body["system"] = Value::Array(system);
    }

    let mut inference = serde_json::Map::new();
    if let Some(t) = req.params.temperature {
        inference.insert("temperature".into(), json!(t));
    }
    if let Some(tp) = req.params.top_p {
        inference.insert("topP".into(), json!(tp));
    }
    if let Some(max) = req.params.max_tokens {
        inference.insert("maxTokens".into(), json!(max));
    }
    if !inference.is_empty() {
        body["inferenceConfig"] = Value::Object(inference);
    }

    if let Some(tools) = req.tools.as_deref().filter(|t| !t.is_empty()) {
        let specs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "toolSpec": {
                        "name": t.function.name,
                        "description": t.function.description,
                        "inputSchema": { "json": t.function.parameters },
                    },
                })
            })
            .collect();
        body["toolConfig"] = json!({ "tools": specs });
    }

    Ok(body)
}

fn content_blocks(content: &MessageContent) -> Result<Vec<Value>, GatewayError> {
    let mut blocks = Vec::new();
    match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                blocks.push(json!({ "text": text }));
            }
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        if !text.is_empty() {
                            blocks.push(json!({ "text": text }));
                        }
                    }
                    ContentPart::Image { image_url, .. } => {
                        let (mime_type, data) =
                            crate::media::parse_data_url(image_url).ok_or_else(|| {
                                GatewayError::ImageProcessingError(
                                    "Image was not inlined before translation".into(),
                                )
                            })?;
                        // Converse wants a bare format name ("png"), not a MIME type.
                        let format = mime_type.rsplit('/').next().unwrap_or("png");
                        blocks.push(json!({
                            "image": {
                                "format": format,
                                "source": { "bytes": data },
                            },
                        }));
                    }
                }
            }
        }
    }
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::types::ChatMessage;

    fn ctx() -> ProviderContext {
        ProviderContext::new("aws-bedrock", "anthropic.claude-sonnet-4-v1:0")
            .with_config(GatewayConfig::new().with_value(keys::BEDROCK_REGION, "us-east-1"))
    }

    #[test]
    fn endpoint_is_region_scoped_converse() {
        let url = BedrockAdapter.endpoint_url(&ctx()).unwrap();
        assert_eq!(
            url,
            "https://bedrock-runtime.us-east-1.amazonaws.com/model/anthropic.claude-sonnet-4-v1%3A0/converse"
        );
        let url = BedrockAdapter.endpoint_url(&ctx().with_stream(true)).unwrap();
        assert!(url.ends_with("/converse-stream"));
    }

    #[test]
    fn region_prefix_is_applied_to_model_id() {
        let c = ProviderContext::new("aws-bedrock", "anthropic.claude-sonnet-4-v1:0").with_config(
            GatewayConfig::new()
                .with_value(keys::BEDROCK_REGION, "us-east-1")
                .with_value(keys::BEDROCK_MODEL_REGION_PREFIX, "us"),
        );
        let url = BedrockAdapter.endpoint_url(&c).unwrap();
        assert!(url.contains("/model/us.anthropic.claude-sonnet-4-v1%3A0/"));
    }

    #[test]
    fn missing_region_is_a_configuration_error() {
        let c = ProviderContext::new("aws-bedrock", "m");
        let err = BedrockAdapter.endpoint_url(&c).unwrap_err();
        assert!(err.to_string().contains(keys::BEDROCK_REGION));
    }

    #[test]
    fn usage_sums_cache_traffic_into_prompt() {
        let raw = json!({
            "usage": {
                "inputTokens": 100,
                "outputTokens": 20,
                "cacheReadInputTokens": 500,
                "cacheWriteInputTokens": 0,
                "totalTokens": 620,
            }
        });
        let usage = BedrockAdapter.extract_usage(&raw, None);
        assert_eq!(usage.prompt_tokens, Some(600));
        assert_eq!(usage.cached_tokens, Some(500));
        assert_eq!(usage.total_tokens, Some(620));
    }

    #[test]
    fn absent_cache_fields_default_to_zero() {
        let raw = json!({ "usage": { "inputTokens": 10, "outputTokens": 5 } });
        let usage = BedrockAdapter.extract_usage(&raw, None);
        assert_eq!(usage.cached_tokens, Some(0));
        assert_eq!(usage.prompt_tokens, Some(10));
    }

    #[test]
    fn converse_body_shapes_tools_and_system() {
        let req = ChatRequest::new(
            "model",
            vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
        );
        let body = build_converse_body(&req).unwrap();
        assert_eq!(body["system"][0]["text"], "sys");
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
