//! OpenAI dialect adapter.
//!
//! Serves api.openai.com, the hosted OpenAI-compatible vendor table, and
//! custom endpoints. Mappings that declare `supports_responses_api` route
//! through the Responses API instead of Chat Completions.

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{
    bearer_headers, AdapterCapabilities, CompletionEstimate, ImageRef, ProviderAdapter,
    ProviderContext, TranslateOptions,
};
use crate::error::GatewayError;
use crate::types::{
    ChatRequest, ContentPart, MessageContent, MessageRole, ResponseFormat, ToolChoice, Usage,
};

pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn id(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            streaming: true,
            vision: true,
            tools: true,
            json_output: true,
            web_search: true,
        }
    }

    fn endpoint_url(&self, ctx: &ProviderContext) -> Result<String, GatewayError> {
        let base = match ctx.base_url.as_deref() {
            Some(url) => url.trim_end_matches('/').to_string(),
            None if ctx.provider_id == "openai" => "https://api.openai.com/v1".to_string(),
            None => {
                return Err(GatewayError::ConfigurationError(format!(
                    "No base URL configured for provider {}",
                    ctx.provider_id
                )));
            }
        };
        if ctx.responses_api {
            Ok(format!("{base}/responses"))
        } else {
            Ok(format!("{base}/chat/completions"))
        }
    }

    fn build_headers(&self, ctx: &ProviderContext) -> Result<HeaderMap, GatewayError> {
        bearer_headers(ctx.api_key.as_deref())
    }

    fn translate_request(
        &self,
        req: &ChatRequest,
        ctx: &ProviderContext,
        _opts: &TranslateOptions,
    ) -> Result<Value, GatewayError> {
        if ctx.responses_api {
            build_responses_body(req, ctx)
        } else {
            build_chat_completions_body(req, ctx)
        }
    }

    fn extract_usage(&self, raw: &Value, _estimate: Option<&CompletionEstimate>) -> Usage {
        extract_openai_usage(raw)
    }

    fn extract_images(&self, raw: &Value) -> Vec<ImageRef> {
        // Chat Completions image output arrives as message.images[] with
        // data-URL payloads.
        let mut out = Vec::new();
        let images = raw
            .pointer("/choices/0/message/images")
            .or_else(|| raw.pointer("/choices/0/delta/images"))
            .and_then(Value::as_array);
        if let Some(images) = images {
            for image in images {
                if let Some(url) = image
                    .pointer("/image_url/url")
                    .and_then(Value::as_str)
                    .filter(|u| u.starts_with("data:"))
                {
                    if let Some((mime_type, data)) = crate::media::parse_data_url(url) {
                        out.push(ImageRef { mime_type, data });
                    }
                }
            }
        }
        out
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

/// Usage shape shared by OpenAI and the compatible vendors.
#[derive(Debug, Default, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    total_tokens: Option<u32>,
    reasoning_tokens: Option<u32>,
    prompt_tokens_details: Option<OpenAiPromptDetails>,
    completion_tokens_details: Option<OpenAiCompletionDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiPromptDetails {
    cached_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiCompletionDetails {
    reasoning_tokens: Option<u32>,
}

/// Extract usage from any OpenAI-style payload (response or stream chunk).
/// Also used by the Azure adapter and as the structurally-validated
/// fallback for unrecognized providers.
pub(crate) fn extract_openai_usage(raw: &Value) -> Usage {
    let Some(usage_value) = raw.get("usage").filter(|u| !u.is_null()) else {
        return Usage::default();
    };
    let usage: OpenAiUsage = match serde_json::from_value(usage_value.clone()) {
        Ok(u) => u,
        Err(_) => return Usage::default(),
    };
    let reasoning = usage
        .reasoning_tokens
        .or(usage
            .completion_tokens_details
            .as_ref()
            .and_then(|d| d.reasoning_tokens));
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
        reasoning_tokens: reasoning,
        cached_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens),
    }
    .with_derived_total()
}

/// Build a Chat Completions request body. Shared with the Azure adapter,
/// whose deployments speak the same dialect.
pub(crate) fn build_chat_completions_body(
    req: &ChatRequest,
    ctx: &ProviderContext,
) -> Result<Value, GatewayError> {
    let mut body = json!({ "model": ctx.model });

    let mut messages = Vec::with_capacity(req.messages.len());
    for msg in &req.messages {
        messages.push(convert_message(msg)?);
    }
    body["messages"] = Value::Array(messages);

    apply_generation_params(&mut body, req);

    if let Some(tools) = req.tools.as_deref().filter(|t| !t.is_empty()) {
        body["tools"] = serde_json::to_value(tools)?;
    }
    if let Some(choice) = &req.tool_choice {
        body["tool_choice"] = convert_tool_choice(choice);
    }
    if let Some(format) = &req.response_format {
        body["response_format"] = match format {
            ResponseFormat::Text => json!({ "type": "text" }),
            ResponseFormat::JsonObject => json!({ "type": "json_object" }),
            ResponseFormat::JsonSchema { schema } => json!({
                "type": "json_schema",
                "json_schema": { "name": "response", "schema": schema, "strict": true },
            }),
        };
    }
    if req.stream {
        body["stream"] = Value::Bool(true);
        body["stream_options"] = json!({ "include_usage": true });
    }
    Ok(body)
}

/// Build a Responses API request body.
fn build_responses_body(req: &ChatRequest, ctx: &ProviderContext) -> Result<Value, GatewayError> {
    let mut body = json!({ "model": ctx.model });

    let mut input = Vec::new();
    for msg in &req.messages {
        match msg.role {
            MessageRole::Tool => {
                let call_id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    GatewayError::InvalidInput("Tool message missing tool_call_id".into())
                })?;
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": msg.content.all_text(),
                }));
            }
            _ => {
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        if let Some(f) = &call.function {
                            input.push(json!({
                                "type": "function_call",
                                "call_id": call.id,
                                "name": f.name,
                                "arguments": f.arguments,
                            }));
                        }
                    }
                }
                if !msg.content.is_empty() {
                    input.push(json!({
                        "role": role_str(msg.role),
                        "content": responses_content(&msg.content),
                    }));
                }
            }
        }
    }
    body["input"] = Value::Array(input);

    if let Some(t) = req.params.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(tp) = req.params.top_p {
        body["top_p"] = json!(tp);
    }
    if let Some(max) = req.params.max_tokens {
        body["max_output_tokens"] = json!(max);
    }
    if let Some(effort) = req.params.reasoning_effort {
        body["reasoning"] = json!({ "effort": effort });
    }
    if let Some(tools) = req.tools.as_deref().filter(|t| !t.is_empty()) {
        // Responses API flattens the function wrapper.
        let tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.function.name,
                    "description": t.function.description,
                    "parameters": t.function.parameters,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    if req.stream {
        body["stream"] = Value::Bool(true);
    }
    Ok(body)
}

fn responses_content(content: &MessageContent) -> Value {
    match content {
        MessageContent::Text(text) => json!(text),
        MessageContent::Parts(parts) => {
            let parts: Vec<Value> = parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => json!({ "type": "input_text", "text": text }),
                    ContentPart::Image { image_url, .. } => {
                        json!({ "type": "input_image", "image_url": image_url })
                    }
                })
                .collect();
            Value::Array(parts)
        }
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    }
}

fn convert_message(msg: &crate::types::ChatMessage) -> Result<Value, GatewayError> {
    let mut api_message = json!({ "role": role_str(msg.role) });

    match &msg.content {
        MessageContent::Text(text) => {
            api_message["content"] = json!(text);
        }
        MessageContent::Parts(parts) => {
            let mut api_parts = Vec::with_capacity(parts.len());
            for part in parts {
                match part {
                    ContentPart::Text { text } => {
                        api_parts.push(json!({ "type": "text", "text": text }));
                    }
                    ContentPart::Image { image_url, detail } => {
                        let mut image_part = json!({
                            "type": "image_url",
                            "image_url": { "url": image_url },
                        });
                        if let Some(detail) = detail {
                            image_part["image_url"]["detail"] = json!(detail);
                        }
                        api_parts.push(image_part);
                    }
                }
            }
            api_message["content"] = Value::Array(api_parts);
        }
    }

    if let Some(calls) = &msg.tool_calls {
        api_message["tool_calls"] = serde_json::to_value(calls)?;
    }
    if let Some(id) = &msg.tool_call_id {
        if msg.role != MessageRole::Tool {
            return Err(GatewayError::InvalidInput(
                "tool_call_id is only valid on tool messages".into(),
            ));
        }
        api_message["tool_call_id"] = json!(id);
    } else if msg.role == MessageRole::Tool {
        return Err(GatewayError::InvalidInput(
            "Tool message missing tool_call_id".into(),
        ));
    }
    Ok(api_message)
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Required => json!("required"),
        ToolChoice::Function { name } => {
            json!({ "type": "function", "function": { "name": name } })
        }
    }
}

fn apply_generation_params(body: &mut Value, req: &ChatRequest) {
    if let Some(t) = req.params.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(tp) = req.params.top_p {
        body["top_p"] = json!(tp);
    }
    if let Some(max) = req.params.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(fp) = req.params.frequency_penalty {
        body["frequency_penalty"] = json!(fp);
    }
    if let Some(pp) = req.params.presence_penalty {
        body["presence_penalty"] = json!(pp);
    }
    if let Some(effort) = req.params.reasoning_effort {
        body["reasoning_effort"] = json!(effort);
    }
}
