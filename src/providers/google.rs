//! Google dialect adapter (Gemini on AI Studio and Vertex).
//!
//! The two deployments share a wire format and differ only in host, path
//! scoping and auth: AI Studio authenticates with a `key` query parameter,
//! Vertex with an OAuth bearer token on a project/region-scoped path.

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::keys;
use crate::core::{
    AdapterCapabilities, CompletionEstimate, ImageRef, ProviderAdapter, ProviderContext,
    TranslateOptions,
};
use crate::error::GatewayError;
use crate::types::{ChatRequest, ContentPart, MessageContent, MessageRole, ResponseFormat, Usage};

/// Empirical per-image token cost: a flat 258 plus one token per 750 bytes.
const IMAGE_TOKEN_BASE: u32 = 258;
const IMAGE_TOKEN_BYTES_PER_TOKEN: usize = 750;

pub struct GoogleAdapter {
    /// Vertex deployment (project/region path, bearer auth) when true;
    /// AI Studio (key query parameter) otherwise.
    pub vertex: bool,
}

impl ProviderAdapter for GoogleAdapter {
    fn id(&self) -> &'static str {
        if self.vertex {
            "google-vertex"
        } else {
            "google-ai-studio"
        }
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
        let verb = if ctx.stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        let model = urlencoding::encode(&ctx.model);

        if self.vertex {
            let project = ctx.config.require(keys::VERTEX_PROJECT_ID)?;
            let region = ctx.config.require(keys::VERTEX_REGION)?;
            let base = match ctx.base_url.as_deref() {
                Some(url) => url.trim_end_matches('/').to_string(),
                None => format!("https://{region}-aiplatform.googleapis.com/v1"),
            };
            return Ok(format!(
                "{base}/projects/{project}/locations/{region}/publishers/google/models/{model}:{verb}"
            ));
        }

        let base = ctx
            .base_url
            .as_deref()
            .unwrap_or("https://generativelanguage.googleapis.com/v1beta")
            .trim_end_matches('/')
            .to_string();
        let mut url = format!("{base}/models/{model}:{verb}");
        if let Some(key) = ctx.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let sep = if url.contains('?') { '&' } else { '?' };
            url.push(sep);
            url.push_str("key=");
            url.push_str(&urlencoding::encode(key));
        }
        Ok(url)
    }

    fn build_headers(&self, ctx: &ProviderContext) -> Result<HeaderMap, GatewayError> {
        if self.vertex {
            // Vertex wants an OAuth access token, not an API key.
            return crate::core::bearer_headers(ctx.api_key.as_deref());
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn translate_request(
        &self,
        req: &ChatRequest,
        _ctx: &ProviderContext,
        opts: &TranslateOptions,
    ) -> Result<Value, GatewayError> {
        build_generate_content_body(req, opts)
    }

    fn extract_usage(&self, raw: &Value, estimate: Option<&CompletionEstimate>) -> Usage {
        extract_google_usage(raw, estimate)
    }

    fn extract_images(&self, raw: &Value) -> Vec<ImageRef> {
        let mut out = Vec::new();
        let parts = raw
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array);
        if let Some(parts) = parts {
            for part in parts {
                let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
                if let Some(inline) = inline {
                    if let (Some(mime_type), Some(data)) = (
                        inline
                            .get("mimeType")
                            .or_else(|| inline.get("mime_type"))
                            .and_then(Value::as_str),
                        inline.get("data").and_then(Value::as_str),
                    ) {
                        out.push(ImageRef {
                            mime_type: mime_type.to_string(),
                            data: data.to_string(),
                        });
                    }
                }
            }
        }
        out
    }

    fn extract_finish_reason(&self, raw: &Value) -> Option<String> {
        raw.pointer("/candidates/0/finishReason")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn extract_text_delta(&self, raw: &Value) -> Option<String> {
        let parts = raw
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)?;
        let mut out = String::new();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
        (!out.is_empty()).then_some(out)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
    cached_content_token_count: Option<u32>,
    thoughts_token_count: Option<u32>,
}

/// Normalize Gemini usage metadata.
///
/// Some deployments fold `thoughtsTokenCount` into `candidatesTokenCount`
/// and some do not; the dual accounting is detected (never assumed) by
/// checking whether prompt + candidates already equals the reported total.
/// Either way the returned completion count includes reasoning exactly
/// once, and the total is prompt + completion.
fn extract_google_usage(raw: &Value, estimate: Option<&CompletionEstimate>) -> Usage {
    let metadata = raw
        .get("usageMetadata")
        .filter(|u| !u.is_null())
        .and_then(|u| serde_json::from_value::<GoogleUsageMetadata>(u.clone()).ok())
        .unwrap_or_default();

    let prompt = metadata.prompt_token_count;
    let thoughts = metadata.thoughts_token_count.unwrap_or(0);

    let completion = match metadata.candidates_token_count {
        Some(candidates) => {
            let folded = match (metadata.prompt_token_count, metadata.total_token_count) {
                (Some(p), Some(total)) => p + candidates == total,
                _ => false,
            };
            if folded {
                // candidates already includes thoughts
                Some(candidates)
            } else {
                Some(candidates + thoughts)
            }
        }
        None => estimate.and_then(estimate_completion_tokens),
    };

    let total = match (prompt, completion) {
        (None, None) => None,
        (p, c) => Some(p.unwrap_or(0) + c.unwrap_or(0)),
    };

    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
        reasoning_tokens: metadata.thoughts_token_count,
        cached_tokens: metadata.cached_content_token_count,
    }
}

/// Estimate a completion count from produced output when the provider
/// omitted one. Text is approximated at four characters per token; each
/// image costs `258 + ceil(bytes / 750)`.
fn estimate_completion_tokens(estimate: &CompletionEstimate) -> Option<u32> {
    if estimate.text.is_empty() && estimate.image_sizes.is_empty() {
        return None;
    }
    let text_tokens = estimate.text.chars().count().div_ceil(4) as u32;
    let image_tokens: u32 = estimate
        .image_sizes
        .iter()
        .map(|bytes| IMAGE_TOKEN_BASE + bytes.div_ceil(IMAGE_TOKEN_BYTES_PER_TOKEN) as u32)
        .sum();
    Some(text_tokens + image_tokens)
}

/// Build a `generateContent` request body from unified messages.
fn build_generate_content_body(
    req: &ChatRequest,
    opts: &TranslateOptions,
) -> Result<Value, GatewayError> {
    let mut contents: Vec<Value> = Vec::new();
    let mut system_parts: Vec<Value> = Vec::new();

    for msg in &req.messages {
        match msg.role {
            MessageRole::System => {
                let text = msg.content.all_text();
                if !text.is_empty() {
                    system_parts.push(json!({ "text": text }));
                }
            }
            MessageRole::Tool => {
                let call_id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    GatewayError::InvalidInput("Tool message missing tool_call_id".into())
                })?;
                let response = match &msg.content {
                    MessageContent::Text(text) => match serde_json::from_str::<Value>(text) {
                        Ok(v @ Value::Object(_)) => v,
                        _ => json!({ "result": text }),
                    },
                    other => json!({ "result": other.all_text() }),
                };
                let part = json!({
                    "functionResponse": { "name": call_id, "response": response },
                });
                // Gemini enforces strict user/model alternation: function
                // responses are user-role parts and must merge into an
                // existing trailing user turn instead of opening a new one.
                push_merged(&mut contents, "user", part);
            }
            MessageRole::User | MessageRole::Assistant => {
                let role = if msg.role == MessageRole::User {
                    "user"
                } else {
                    "model"
                };
                let mut parts = content_parts(&msg.content)?;
                if let Some(calls) = &msg.tool_calls {
                    for call in calls {
                        if let Some(f) = &call.function {
                            let args: Value = serde_json::from_str(&f.arguments)
                                .unwrap_or_else(|_| json!({}));
                            let mut part = json!({
                                "functionCall": { "name": f.name, "args": args },
                            });
                            // Multi-turn reasoning continuity: replay the
                            // thought signature recorded for this call id.
                            if let Some(lookup) = &opts.thought_signatures {
                                if let Some(signature) = lookup(&call.id) {
                                    part["thoughtSignature"] = json!(signature);
                                }
                            }
                            parts.push(part);
                        }
                    }
                }
                if parts.is_empty() {
                    continue;
                }
                for part in parts {
                    push_merged(&mut contents, role, part);
                }
            }
        }
    }

    let mut body = json!({ "contents": contents });
    if !system_parts.is_empty() {
        body["systemInstruction"] = json!({ "parts": system_parts });
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(t) = req.params.temperature {
        generation_config.insert("temperature".into(), json!(t));
    }
    if let Some(tp) = req.params.top_p {
        generation_config.insert("topP".into(), json!(tp));
    }
    if let Some(max) = req.params.max_tokens {
        generation_config.insert("maxOutputTokens".into(), json!(max));
    }
    match &req.response_format {
        Some(ResponseFormat::JsonObject) => {
            generation_config.insert("responseMimeType".into(), json!("application/json"));
        }
        Some(ResponseFormat::JsonSchema { schema }) => {
            generation_config.insert("responseMimeType".into(), json!("application/json"));
            generation_config.insert("responseSchema".into(), schema.clone());
        }
        Some(ResponseFormat::Text) | None => {}
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }

    if let Some(tools) = req.tools.as_deref().filter(|t| !t.is_empty()) {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.function.name,
                    "description": t.function.description,
                    "parameters": t.function.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    Ok(body)
}

/// Append `part` to the trailing turn when it has the same role, otherwise
/// open a new turn.
fn push_merged(contents: &mut Vec<Value>, role: &str, part: Value) {
    if let Some(last) = contents.last_mut() {
        if last.get("role").and_then(Value::as_str) == Some(role) {
            if let Some(parts) = last.get_mut("parts").and_then(Value::as_array_mut) {
                parts.push(part);
                return;
            }
        }
    }
    contents.push(json!({ "role": role, "parts": [part] }));
}

fn content_parts(content: &MessageContent) -> Result<Vec<Value>, GatewayError> {
    let mut parts = Vec::new();
    match content {
        MessageContent::Text(text) => {
            if !text.is_empty() {
                parts.push(json!({ "text": text }));
            }
        }
        MessageContent::Parts(content_parts) => {
            for part in content_parts {
                match part {
                    ContentPart::Text { text } => {
                        if !text.is_empty() {
                            parts.push(json!({ "text": text }));
                        }
                    }
                    ContentPart::Image { image_url, .. } => {
                        let (mime_type, data) =
                            crate::media::parse_data_url(image_url).ok_or_else(|| {
                                GatewayError::ImageProcessingError(
                                    "Image was not inlined before translation".into(),
                                )
                            })?;
                        parts.push(json!({
                            "inlineData": { "mimeType": mime_type, "data": data },
                        }));
                    }
                }
            }
        }
    }
    Ok(parts)
}
