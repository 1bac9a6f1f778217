//! Unified token usage accounting.
//!
//! Every field is optional because providers disagree about what they
//! report; a derived total always equals prompt + completion + reasoning
//! (reasoning is additive to completion, never double-counted — the
//! Google-specific correction lives in the Gemini adapter).

use serde::{Deserialize, Serialize};

/// Unified usage statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u32>,
}

impl Usage {
    /// Fill in `total_tokens` when the provider did not supply one.
    pub fn with_derived_total(mut self) -> Self {
        if self.total_tokens.is_none() {
            let prompt = self.prompt_tokens.unwrap_or(0);
            let completion = self.completion_tokens.unwrap_or(0);
            let reasoning = self.reasoning_tokens.unwrap_or(0);
            if self.prompt_tokens.is_some() || self.completion_tokens.is_some() {
                self.total_tokens = Some(prompt + completion + reasoning);
            }
        }
        self
    }

    /// Fold a later fragment into this one. Streaming providers either
    /// resend the whole usage object on the last chunk or emit fields
    /// incrementally; last-known-value wins per field. A fragment that
    /// updates components without supplying a total invalidates any
    /// earlier total, since it no longer reflects the components.
    pub fn absorb(&mut self, other: &Usage) {
        let has_components = other.prompt_tokens.is_some()
            || other.completion_tokens.is_some()
            || other.reasoning_tokens.is_some()
            || other.cached_tokens.is_some();

        if other.prompt_tokens.is_some() {
            self.prompt_tokens = other.prompt_tokens;
        }
        if other.completion_tokens.is_some() {
            self.completion_tokens = other.completion_tokens;
        }
        if other.reasoning_tokens.is_some() {
            self.reasoning_tokens = other.reasoning_tokens;
        }
        if other.cached_tokens.is_some() {
            self.cached_tokens = other.cached_tokens;
        }
        if other.total_tokens.is_some() {
            self.total_tokens = other.total_tokens;
        } else if has_components {
            self.total_tokens = None;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.total_tokens.is_none()
            && self.reasoning_tokens.is_none()
            && self.cached_tokens.is_none()
    }
}
