//! Anthropic Messages dialect adapter.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{
    AdapterCapabilities, CompletionEstimate, ProviderAdapter, ProviderContext, TranslateOptions,
};
use crate::error::GatewayError;
use crate::types::{
    ChatRequest, ContentPart, MessageContent, MessageRole, ToolChoice, Usage,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Beta flag enabling the hosted web-search tool.
const WEB_SEARCH_BETA: &str = "web-search-2025-03-05";

pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn id(&self) -> &'static str {
        "anthropic"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            streaming: true,
            vision: true,
            tools: true,
            json_output: false,
            web_search: true,
        }
    }

    fn endpoint_url(&self, ctx: &ProviderContext) -> Result<String, GatewayError> {
        let base = ctx
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com");
        Ok(format!("{}/v1/messages", base.trim_end_matches('/')))
    }

    fn build_headers(&self, ctx: &ProviderContext) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );
        if ctx.web_search_enabled {
            headers.insert("anthropic-beta", HeaderValue::from_static(WEB_SEARCH_BETA));
        }
        if let Some(key) = ctx.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let value = HeaderValue::from_str(key).map_err(|e| {
                GatewayError::ConfigurationError(format!("Invalid Anthropic API key: {e}"))
            })?;
            headers.insert("x-api-key", value);
        }
        Ok(headers)
    }

    fn translate_request(
        &self,
        req: &ChatRequest,
        ctx: &ProviderContext,
        _opts: &TranslateOptions,
    ) -> Result<Value, GatewayError> {
        let (messages, system) = convert_messages(&req.messages)?;
        let mut body = json!({
            "model": ctx.model,
            "messages": messages,
            // max_tokens is required by the Messages API
            "max_tokens": req.params.max_tokens.unwrap_or(4096),
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(t) = req.params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(tp) = req.params.top_p {
            body["top_p"] = json!(tp);
        }
        if let Some(tools) = req.tools.as_deref().filter(|t| !t.is_empty()) {
            let tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.function.name,
                        "description": t.function.description,
                        "input_schema": t.function.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(choice) = &req.tool_choice {
            body["tool_choice"] = match choice {
                ToolChoice::Auto => json!({ "type": "auto" }),
                ToolChoice::None => json!({ "type": "none" }),
                ToolChoice::Required => json!({ "type": "any" }),
                ToolChoice::Function { name } => json!({ "type": "tool", "name": name }),
            };
        }
        if req.stream {
            body["stream"] = Value::Bool(true);
        }
        Ok(body)
    }

    fn extract_usage(&self, raw: &Value, _estimate: Option<&CompletionEstimate>) -> Usage {
        // Stream chunks carry usage either at the top level
        // (message_start/message_delta) or under "message".
        let usage_value = raw
            .get("usage")
            .or_else(|| raw.pointer("/message/usage"))
            .filter(|u| !u.is_null());
        let Some(usage_value) = usage_value else {
            return Usage::default();
        };
        let usage: AnthropicUsage = match serde_json::from_value(usage_value.clone()) {
            Ok(u) => u,
            Err(_) => return Usage::default(),
        };

        // Anthropic reports input_tokens exclusive of cache reads/writes;
        // the unified prompt count is the sum of all three.
        let prompt = usage.input_tokens.unwrap_or(0)
            + usage.cache_creation_input_tokens.unwrap_or(0)
            + usage.cache_read_input_tokens.unwrap_or(0);
        let prompt = (usage.input_tokens.is_some()
            || usage.cache_creation_input_tokens.is_some()
            || usage.cache_read_input_tokens.is_some())
        .then_some(prompt);

        // Thinking output is already inside output_tokens, so the total is
        // prompt + completion with no separate reasoning term. Fragments
        // without input accounting (message_delta) carry no total; the
        // stream accumulator derives one at end of stream.
        let total = prompt.map(|p| p + usage.output_tokens.unwrap_or(0));

        Usage {
            prompt_tokens: prompt,
            completion_tokens: usage.output_tokens,
            total_tokens: total,
            reasoning_tokens: usage.reasoning_output_tokens,
            cached_tokens: usage.cache_read_input_tokens,
        }
    }

    fn extract_finish_reason(&self, raw: &Value) -> Option<String> {
        raw.get("stop_reason")
            .or_else(|| raw.pointer("/delta/stop_reason"))
            .or_else(|| raw.pointer("/message/stop_reason"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_text_delta(&self, raw: &Value) -> Option<String> {
        // content_block_delta events carry text under delta.text
        raw.pointer("/delta/text")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u32>,
    output_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
    cache_read_input_tokens: Option<u32>,
    reasoning_output_tokens: Option<u32>,
}

/// Convert unified messages to Anthropic's shape. System messages are
/// extracted into the top-level `system` field; tool results become
/// `tool_result` blocks inside a user turn.
fn convert_messages(
    messages: &[crate::types::ChatMessage],
) -> Result<(Vec<Value>, Option<String>), GatewayError> {
    let mut out: Vec<Value> = Vec::new();
    let mut system: Option<String> = None;

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                let text = msg.content.all_text();
                system = Some(match system {
                    Some(prev) => format!("{prev}\n{text}"),
                    None => text,
                });
            }
            MessageRole::Tool => {
                let call_id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    GatewayError::InvalidInput("Tool message missing tool_call_id".into())
                })?;
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": call_id,
                        "content": msg.content.all_text(),
                    }],
                }));
            }
            MessageRole::User | MessageRole::Assistant => {
                let role = if msg.role == MessageRole::User {
                    "user"
                } else {
                    "assistant"
                };
                let mut blocks = content_blocks(&msg.content)?;
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        if let Some(f) = &call.function {
                            // Invalid JSON arguments degrade to an empty
                            // input object instead of failing the request.
                            let input: Value = serde_json::from_str(&f.arguments)
                                .unwrap_or_else(|_| json!({}));
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": f.name,
                                "input": input,
                            }));
                        }
                    }
                }
                if blocks.is_empty() {
                    continue;
                }
                out.push(json!({ "role": role, "content": blocks }));
            }
        }
    }
    Ok((out, system))
}

fn content_blocks(content: &MessageContent) -> Result<Vec<Value>, GatewayError> {
    let mut blocks = Vec::new();
    match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                blocks.push(json!({ "type": "text", "text": text }));
            }
        }
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        if !text.is_empty() {
                            blocks.push(json!({ "type": "text", "text": text }));
                        }
                    }
                    ContentPart::Image { image_url, .. } => {
                        let (media_type, data) =
                            crate::media::parse_data_url(image_url).ok_or_else(|| {
                                GatewayError::ImageProcessingError(
                                    "Image was not inlined before translation".into(),
                                )
                            })?;
                        blocks.push(json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type,
                                "data": data,
                            },
                        }));
                    }
                }
            }
        }
    }
    Ok(blocks)
}
