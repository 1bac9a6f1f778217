//! Model catalog: static reference data describing models and their
//! provider mappings.
//!
//! Loaded at process start and shared read-only by all in-flight requests.
//! Hot reload replaces the whole catalog atomically; entries are never
//! mutated in place, so readers cannot observe partial updates.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod resolver;

pub use resolver::{resolve, Resolution};

/// Release maturity of a model or mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    #[default]
    Stable,
    Beta,
    Unstable,
    Experimental,
}

/// Capability flags a mapping declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingCapabilities {
    pub streaming: bool,
    pub vision: bool,
    pub reasoning: bool,
    pub tools: bool,
    pub json_output: bool,
    pub web_search: bool,
}

/// One `(model, provider)` pairing with pricing, capability and lifecycle
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModelMapping {
    pub provider_id: String,
    /// The provider's native model identifier.
    pub model_name: String,
    /// Per-token prices in USD; absent means not billed on that axis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_input_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_input_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_price: Option<f64>,
    pub context_size: u32,
    pub max_output: u32,
    #[serde(default)]
    pub capabilities: MappingCapabilities,
    /// Fraction in [0, 1) applied multiplicatively to cost.
    #[serde(default)]
    pub discount: f64,
    #[serde(default)]
    pub stability: Stability,
    /// Advisory only; a deprecated mapping still serves new requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
    /// Past this instant the mapping is unusable for new requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    /// OpenAI only: route through the Responses API instead of Chat Completions.
    #[serde(default)]
    pub supports_responses_api: bool,
}

impl ProviderModelMapping {
    pub fn new(provider_id: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_name: model_name.into(),
            input_price: None,
            output_price: None,
            cached_input_price: None,
            image_input_price: None,
            request_price: None,
            context_size: 8192,
            max_output: 4096,
            capabilities: MappingCapabilities::default(),
            discount: 0.0,
            stability: Stability::Stable,
            deprecated_at: None,
            deactivated_at: None,
            supports_responses_api: false,
        }
    }

    /// A mapping is active iff `deactivated_at` is null or in the future
    /// relative to `now`. Deprecation does not affect this.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.deactivated_at {
            None => true,
            Some(at) => at > now,
        }
    }
}

/// Catalog entry for one model family member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub id: String,
    pub family: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub stability: Stability,
    pub providers: Vec<ProviderModelMapping>,
}

impl ModelDefinition {
    /// Synthesize a minimal OpenAI-compatible definition for custom or
    /// self-hosted endpoints, which carry no catalog entry.
    pub fn synthetic_custom(model: &str) -> Self {
        let mut mapping = ProviderModelMapping::new("custom", model);
        mapping.input_price = Some(0.0);
        mapping.output_price = Some(0.0);
        mapping.capabilities = MappingCapabilities {
            streaming: true,
            json_output: true,
            ..Default::default()
        };
        Self {
            id: model.to_string(),
            family: "custom".to_string(),
            aliases: Vec::new(),
            stability: Stability::Stable,
            providers: vec![mapping],
        }
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.id == name || self.aliases.iter().any(|a| a == name)
    }
}

/// Process-lifetime model catalog.
///
/// Readers clone an `Arc` snapshot; `replace` swaps the whole snapshot.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: RwLock<Arc<Vec<ModelDefinition>>>,
}

impl ModelCatalog {
    pub fn new(models: Vec<ModelDefinition>) -> Self {
        Self {
            models: RwLock::new(Arc::new(models)),
        }
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<Vec<ModelDefinition>> {
        self.models
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the whole catalog. In-place mutation is deliberately not
    /// offered; readers keep their previous snapshot until they re-read.
    pub fn replace(&self, models: Vec<ModelDefinition>) {
        let mut guard = self
            .models
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(models);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn mapping_active_until_deactivation_time() {
        let now = Utc::now();
        let mut mapping = ProviderModelMapping::new("openai", "gpt-4o");
        assert!(mapping.is_active(now));

        mapping.deactivated_at = Some(now + Duration::hours(1));
        assert!(mapping.is_active(now));

        mapping.deactivated_at = Some(now - Duration::hours(1));
        assert!(!mapping.is_active(now));
    }

    #[test]
    fn deprecation_is_advisory() {
        let now = Utc::now();
        let mut mapping = ProviderModelMapping::new("openai", "gpt-4o");
        mapping.deprecated_at = Some(now - Duration::days(30));
        assert!(mapping.is_active(now));
    }

    #[test]
    fn replace_swaps_whole_snapshot() {
        let catalog = ModelCatalog::new(vec![ModelDefinition::synthetic_custom("a")]);
        let before = catalog.snapshot();
        catalog.replace(vec![
            ModelDefinition::synthetic_custom("b"),
            ModelDefinition::synthetic_custom("c"),
        ]);
        assert_eq!(before.len(), 1);
        assert_eq!(catalog.snapshot().len(), 2);
    }
}
