//! Streaming accumulation.
//!
//! SSE chunks are consumed incrementally; the accumulator folds partial
//! usage, text and finish state per chunk without blocking the pipeline,
//! and fills in an estimated completion count at the end for providers
//! that never reported one.

use serde_json::Value;

use crate::core::{CompletionEstimate, ImageRef, ProviderAdapter};
use crate::types::{FinishReason, Usage};

/// Final state of a consumed stream.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    pub usage: Usage,
    pub text: String,
    pub images: Vec<ImageRef>,
    pub finish_reason: FinishReason,
}

/// Folds usage/text/finish fragments across stream chunks.
pub struct StreamAccumulator<'a> {
    adapter: &'a dyn ProviderAdapter,
    usage: Usage,
    text: String,
    images: Vec<ImageRef>,
    finish: Option<String>,
}

impl<'a> StreamAccumulator<'a> {
    pub fn new(adapter: &'a dyn ProviderAdapter) -> Self {
        Self {
            adapter,
            usage: Usage::default(),
            text: String::new(),
            images: Vec::new(),
            finish: None,
        }
    }

    /// Fold one parsed chunk.
    pub fn absorb(&mut self, chunk: &Value) {
        self.usage.absorb(&self.adapter.extract_usage(chunk, None));
        if let Some(delta) = self.adapter.extract_text_delta(chunk) {
            self.text.push_str(&delta);
        }
        self.images.extend(self.adapter.extract_images(chunk));
        if let Some(reason) = self.adapter.extract_finish_reason(chunk) {
            self.finish = Some(reason);
        }
    }

    /// Close the stream. When the provider never reported a completion
    /// count but output was produced, ask the adapter to estimate one from
    /// the accumulated text and image sizes.
    pub fn finish(mut self) -> StreamOutcome {
        if self.usage.completion_tokens.is_none()
            && (!self.text.is_empty() || !self.images.is_empty())
        {
            let estimate = CompletionEstimate {
                text: self.text.clone(),
                image_sizes: self
                    .images
                    .iter()
                    // base64 inflates by 4/3; recover the decoded size
                    .map(|img| img.data.len() * 3 / 4)
                    .collect(),
            };
            let estimated = self
                .adapter
                .extract_usage(&Value::Object(Default::default()), Some(&estimate));
            if let Some(completion) = estimated.completion_tokens {
                self.usage.completion_tokens = Some(completion);
                self.usage.total_tokens = Some(
                    self.usage.prompt_tokens.unwrap_or(0)
                        + completion
                        + self.usage.reasoning_tokens.unwrap_or(0),
                );
            }
        }

        let finish_reason = match &self.finish {
            Some(raw) => FinishReason::from_provider(raw),
            None => FinishReason::Unknown,
        };
        StreamOutcome {
            usage: self.usage.with_derived_total(),
            text: self.text,
            images: self.images,
            finish_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderId;
    use serde_json::json;

    #[test]
    fn accumulates_openai_chunks() {
        let adapter = ProviderId::OpenAi.adapter();
        let mut acc = StreamAccumulator::new(adapter);
        acc.absorb(&json!({ "choices": [{ "delta": { "content": "Hel" } }] }));
        acc.absorb(&json!({ "choices": [{ "delta": { "content": "lo" }, "finish_reason": "stop" }] }));
        acc.absorb(&json!({
            "choices": [],
            "usage": { "prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9 }
        }));
        let outcome = acc.finish();
        assert_eq!(outcome.text, "Hello");
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
        assert_eq!(outcome.usage.prompt_tokens, Some(7));
        assert_eq!(outcome.usage.total_tokens, Some(9));
    }

    #[test]
    fn google_stream_without_usage_gets_estimated() {
        let adapter = ProviderId::GoogleAiStudio.adapter();
        let mut acc = StreamAccumulator::new(adapter);
        acc.absorb(&json!({
            "candidates": [{ "content": { "parts": [{ "text": "abcdefgh" }] } }]
        }));
        acc.absorb(&json!({
            "candidates": [{ "finishReason": "STOP", "content": { "parts": [] } }],
            "usageMetadata": { "promptTokenCount": 5 }
        }));
        let outcome = acc.finish();
        // 8 chars -> 2 estimated completion tokens
        assert_eq!(outcome.usage.completion_tokens, Some(2));
        assert_eq!(outcome.usage.total_tokens, Some(7));
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn anthropic_partial_usage_fragments_produce_a_consistent_total() {
        let adapter = ProviderId::Anthropic.adapter();
        let mut acc = StreamAccumulator::new(adapter);
        // message_start carries input accounting, message_delta only the
        // running output count; neither alone is the final total.
        acc.absorb(&json!({
            "type": "message_start",
            "message": { "usage": { "input_tokens": 12, "output_tokens": 1 } }
        }));
        acc.absorb(&json!({
            "type": "message_delta",
            "delta": { "stop_reason": "end_turn" },
            "usage": { "output_tokens": 25 }
        }));
        let outcome = acc.finish();
        assert_eq!(outcome.usage.prompt_tokens, Some(12));
        assert_eq!(outcome.usage.completion_tokens, Some(25));
        assert_eq!(outcome.usage.total_tokens, Some(37));
        assert_eq!(outcome.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn missing_finish_reason_is_unknown() {
        let adapter = ProviderId::OpenAi.adapter();
        let acc = StreamAccumulator::new(adapter);
        assert_eq!(acc.finish().finish_reason, FinishReason::Unknown);
    }
}
