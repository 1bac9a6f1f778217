//! Usage/log entry assembly.
//!
//! One immutable record per completed call, consumed by the persistence
//! collaborator. Raw payloads are only attached when the debug flag is
//! set; empty collections normalize to `None` so the persisted shape stays
//! canonical.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::ProviderModelMapping;
use crate::classify::FailureDetail;
use crate::types::{FinishReason, Usage};

/// Cost components for one call, in USD.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CostBreakdown {
    pub input_cost: f64,
    pub cached_input_cost: f64,
    pub output_cost: f64,
    pub image_input_cost: f64,
    pub request_cost: f64,
    /// Sum of the components with the mapping discount applied.
    pub total_cost: f64,
}

impl CostBreakdown {
    /// Price a call against the mapping it was served by. Pure mechanics:
    /// cached tokens bill at the cached-input price when one exists, the
    /// discount applies multiplicatively to the total.
    pub fn compute(mapping: &ProviderModelMapping, usage: &Usage, input_images: u32) -> Self {
        let prompt = usage.prompt_tokens.unwrap_or(0) as f64;
        let cached = usage.cached_tokens.unwrap_or(0) as f64;
        let completion = usage.completion_tokens.unwrap_or(0) as f64;
        let uncached = (prompt - cached).max(0.0);

        let input_price = mapping.input_price.unwrap_or(0.0);
        let cached_price = mapping.cached_input_price.unwrap_or(input_price);

        let input_cost = uncached * input_price;
        let cached_input_cost = cached * cached_price;
        let output_cost = completion * mapping.output_price.unwrap_or(0.0);
        let image_input_cost =
            input_images as f64 * mapping.image_input_price.unwrap_or(0.0);
        let request_cost = mapping.request_price.unwrap_or(0.0);

        let subtotal =
            input_cost + cached_input_cost + output_cost + image_input_cost + request_cost;
        let total_cost = subtotal * (1.0 - mapping.discount);

        Self {
            input_cost,
            cached_input_cost,
            output_cost,
            image_input_cost,
            request_cost,
            total_cost,
        }
    }
}

/// Routing decisions made for this call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingMetadata {
    /// Providers that were active for the model at resolution time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_providers: Option<Vec<String>>,
    /// Every mapped provider, active or not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_providers: Option<Vec<String>>,
    /// A pinned provider was dropped because its mapping was deactivated.
    pub pin_cleared: bool,
}

/// Denormalized record of one completed call. Immutable after creation;
/// ownership passes to the logging collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    pub requested_model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_provider: Option<String>,
    pub used_model: String,
    pub used_provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    pub finish_reason: FinishReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    #[serde(default)]
    pub routing: RoutingMetadata,
    pub streamed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Raw payloads, only populated when the debug flag was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

/// Builder for `LogEntry`. Payload setters are no-ops unless `debug` is on.
#[derive(Debug, Clone)]
pub struct LogEntryBuilder {
    debug: bool,
    entry: LogEntry,
}

impl LogEntryBuilder {
    pub fn new(
        requested_model: impl Into<String>,
        used_model: impl Into<String>,
        used_provider: impl Into<String>,
    ) -> Self {
        Self {
            debug: false,
            entry: LogEntry {
                id: Uuid::new_v4(),
                created_at: Utc::now(),
                trace_id: None,
                requested_model: requested_model.into(),
                requested_provider: None,
                used_model: used_model.into(),
                used_provider: used_provider.into(),
                usage: None,
                cost: None,
                finish_reason: FinishReason::Unknown,
                failure: None,
                routing: RoutingMetadata::default(),
                streamed: false,
                duration_ms: None,
                raw_request: None,
                raw_response: None,
            },
        }
    }

    /// Allow raw payloads to be attached. Off by default as a guard
    /// against persisting sensitive payloads at scale.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.entry.trace_id = Some(trace_id.into());
        self
    }

    pub fn requested_provider(mut self, provider: Option<String>) -> Self {
        self.entry.requested_provider = provider;
        self
    }

    pub fn usage(mut self, usage: Usage) -> Self {
        self.entry.usage = (!usage.is_empty()).then_some(usage);
        self
    }

    pub fn cost(mut self, cost: CostBreakdown) -> Self {
        self.entry.cost = Some(cost);
        self
    }

    pub fn finish_reason(mut self, reason: FinishReason) -> Self {
        self.entry.finish_reason = reason;
        self
    }

    pub fn failure(mut self, failure: FailureDetail) -> Self {
        self.entry.failure = Some(failure);
        self
    }

    pub fn routing(
        mut self,
        active_providers: Vec<String>,
        all_providers: Vec<String>,
        pin_cleared: bool,
    ) -> Self {
        // Canonical persisted shape: empty lists become null.
        self.entry.routing = RoutingMetadata {
            active_providers: (!active_providers.is_empty()).then_some(active_providers),
            all_providers: (!all_providers.is_empty()).then_some(all_providers),
            pin_cleared,
        };
        self
    }

    pub fn streamed(mut self, streamed: bool) -> Self {
        self.entry.streamed = streamed;
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.entry.duration_ms = Some(ms);
        self
    }

    pub fn raw_request(mut self, payload: serde_json::Value) -> Self {
        if self.debug {
            self.entry.raw_request = Some(payload);
        }
        self
    }

    pub fn raw_response(mut self, payload: serde_json::Value) -> Self {
        if self.debug {
            self.entry.raw_response = Some(payload);
        }
        self
    }

    pub fn build(self) -> LogEntry {
        self.entry
    }
}
