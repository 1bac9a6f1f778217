//! Model/provider resolution.
//!
//! Given a requested model (and optionally a pinned provider), find the
//! catalog entry and the provider mappings that are currently active.

use chrono::{DateTime, Utc};

use super::{ModelCatalog, ModelDefinition, ProviderModelMapping};
use crate::error::GatewayError;

/// Pseudo-providers that are never catalog-backed and must survive the
/// inactive-pin fallback untouched.
const PSEUDO_PROVIDERS: &[&str] = &["llmgateway", "custom"];

/// Result of resolving a requested model against the catalog.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub model: ModelDefinition,
    /// Mappings usable for new requests at resolution time.
    pub active_providers: Vec<ProviderModelMapping>,
    /// Every mapping, active or not, for display/routing metadata.
    pub all_providers: Vec<ProviderModelMapping>,
    /// The requested provider, when still usable. Cleared when the pin
    /// pointed at a mapping that is no longer active.
    pub resolved_provider: Option<String>,
    /// True when a pinned provider was dropped because its mapping was
    /// deactivated; preserved so routing metadata records the override.
    pub pin_cleared: bool,
}

/// Resolve `requested_model` (and an optional pinned provider) to the
/// currently-active provider mappings.
pub fn resolve(
    catalog: &ModelCatalog,
    requested_model: &str,
    requested_provider: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Resolution, GatewayError> {
    // Custom/self-hosted endpoints carry no catalog entry.
    if requested_provider == Some("custom") {
        let model = ModelDefinition::synthetic_custom(requested_model);
        let providers = model.providers.clone();
        return Ok(Resolution {
            model,
            active_providers: providers.clone(),
            all_providers: providers,
            resolved_provider: Some("custom".to_string()),
            pin_cleared: false,
        });
    }

    let snapshot = catalog.snapshot();

    // Model id (or alias) first, then provider-native model names.
    let model = snapshot
        .iter()
        .find(|m| m.matches_name(requested_model))
        .or_else(|| {
            if let Some(provider) = requested_provider {
                // Prefer an exact (model_name, provider) pair when pinned.
                let exact = snapshot.iter().find(|m| {
                    m.providers
                        .iter()
                        .any(|p| p.model_name == requested_model && p.provider_id == provider)
                });
                if exact.is_some() {
                    return exact;
                }
            }
            snapshot
                .iter()
                .find(|m| m.providers.iter().any(|p| p.model_name == requested_model))
        })
        .ok_or_else(|| GatewayError::UnsupportedModel(requested_model.to_string()))?
        .clone();

    let all_providers = model.providers.clone();
    let active_providers: Vec<ProviderModelMapping> = model
        .providers
        .iter()
        .filter(|p| p.is_active(now))
        .cloned()
        .collect();

    if active_providers.is_empty() {
        return Err(GatewayError::ModelDeactivated(model.id.clone()));
    }

    // A pin to a provider that lost its mapping falls back silently to
    // any remaining active mapping; the flag keeps it auditable.
    let mut pin_cleared = false;
    let resolved_provider = match requested_provider {
        Some(p) if PSEUDO_PROVIDERS.contains(&p) => Some(p.to_string()),
        Some(p) => {
            if active_providers.iter().any(|m| m.provider_id == p) {
                Some(p.to_string())
            } else {
                tracing::debug!(
                    model = %model.id,
                    provider = %p,
                    "pinned provider has no active mapping; clearing pin"
                );
                pin_cleared = true;
                None
            }
        }
        None => None,
    };

    Ok(Resolution {
        model,
        active_providers,
        all_providers,
        resolved_provider,
        pin_cleared,
    })
}

impl Resolution {
    /// The mapping the dispatcher should use: the pinned provider's when
    /// still set, otherwise the first active mapping.
    pub fn selected_mapping(&self) -> &ProviderModelMapping {
        if let Some(provider) = &self.resolved_provider {
            if let Some(mapping) = self
                .active_providers
                .iter()
                .find(|m| &m.provider_id == provider)
            {
                return mapping;
            }
        }
        // Non-empty by construction; resolve() errors on zero active mappings.
        &self.active_providers[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ModelDefinition, ProviderModelMapping};
    use chrono::Duration;

    fn catalog_with(providers: Vec<ProviderModelMapping>) -> ModelCatalog {
        ModelCatalog::new(vec![ModelDefinition {
            id: "test-model".into(),
            family: "test".into(),
            aliases: vec!["test-alias".into()],
            stability: Default::default(),
            providers,
        }])
    }

    #[test]
    fn resolves_by_alias() {
        let catalog = catalog_with(vec![ProviderModelMapping::new("openai", "gpt-test")]);
        let res = resolve(&catalog, "test-alias", None, Utc::now()).unwrap();
        assert_eq!(res.model.id, "test-model");
    }

    #[test]
    fn resolves_by_provider_model_name() {
        let catalog = catalog_with(vec![
            ProviderModelMapping::new("openai", "gpt-test"),
            ProviderModelMapping::new("azure", "gpt-test-deployment"),
        ]);
        let res = resolve(&catalog, "gpt-test-deployment", Some("azure"), Utc::now()).unwrap();
        assert_eq!(res.model.id, "test-model");
        assert_eq!(res.resolved_provider.as_deref(), Some("azure"));
    }

    #[test]
    fn unknown_model_is_unsupported() {
        let catalog = catalog_with(vec![ProviderModelMapping::new("openai", "gpt-test")]);
        let err = resolve(&catalog, "no-such-model", None, Utc::now()).unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedModel(_)));
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn fully_deactivated_model_is_gone() {
        let now = Utc::now();
        let mut mapping = ProviderModelMapping::new("openai", "gpt-test");
        mapping.deactivated_at = Some(now - Duration::hours(1));
        let catalog = catalog_with(vec![mapping]);
        let err = resolve(&catalog, "test-model", None, now).unwrap_err();
        assert!(matches!(err, GatewayError::ModelDeactivated(_)));
        assert_eq!(err.status_code(), 410);
    }

    #[test]
    fn inactive_pin_is_cleared_not_failed() {
        let now = Utc::now();
        let mut gone = ProviderModelMapping::new("openai", "gpt-test");
        gone.deactivated_at = Some(now - Duration::hours(1));
        let alive = ProviderModelMapping::new("anthropic", "claude-test");
        let catalog = catalog_with(vec![gone, alive]);

        let res = resolve(&catalog, "test-model", Some("openai"), now).unwrap();
        assert_eq!(res.resolved_provider, None);
        assert!(res.pin_cleared);
        assert_eq!(res.active_providers.len(), 1);
        assert_eq!(res.all_providers.len(), 2);
        assert_eq!(res.selected_mapping().provider_id, "anthropic");
    }

    #[test]
    fn pseudo_provider_pin_survives() {
        let catalog = catalog_with(vec![ProviderModelMapping::new("openai", "gpt-test")]);
        let res = resolve(&catalog, "test-model", Some("llmgateway"), Utc::now()).unwrap();
        assert_eq!(res.resolved_provider.as_deref(), Some("llmgateway"));
        assert!(!res.pin_cleared);
    }

    #[test]
    fn custom_provider_synthesizes_definition() {
        let catalog = ModelCatalog::default();
        let res = resolve(&catalog, "my-local-model", Some("custom"), Utc::now()).unwrap();
        assert_eq!(res.model.family, "custom");
        let mapping = res.selected_mapping();
        assert_eq!(mapping.context_size, 8192);
        assert_eq!(mapping.max_output, 4096);
        assert!(mapping.capabilities.streaming);
        assert!(mapping.capabilities.json_output);
        assert_eq!(mapping.input_price, Some(0.0));
    }
}
