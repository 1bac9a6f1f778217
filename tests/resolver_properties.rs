//! Resolution properties over a multi-model catalog.

use chrono::{Duration, Utc};
use modelgate::catalog::{resolve, ModelCatalog, ModelDefinition, ProviderModelMapping};
use modelgate::error::GatewayError;

fn mapping(provider: &str, name: &str, deactivated_hours_ago: Option<i64>) -> ProviderModelMapping {
    let mut m = ProviderModelMapping::new(provider, name);
    m.deactivated_at = deactivated_hours_ago.map(|h| Utc::now() - Duration::hours(h));
    m
}

fn catalog() -> ModelCatalog {
    ModelCatalog::new(vec![
        ModelDefinition {
            id: "alive".into(),
            family: "test".into(),
            aliases: vec![],
            stability: Default::default(),
            providers: vec![
                mapping("openai", "alive-openai", None),
                mapping("anthropic", "alive-anthropic", Some(2)),
            ],
        },
        ModelDefinition {
            id: "dead".into(),
            family: "test".into(),
            aliases: vec![],
            stability: Default::default(),
            providers: vec![
                mapping("openai", "dead-openai", Some(1)),
                mapping("groq", "dead-groq", Some(5)),
            ],
        },
    ])
}

#[test]
fn models_with_active_mappings_resolve_to_only_active_ones() {
    let res = resolve(&catalog(), "alive", None, Utc::now()).unwrap();
    assert_eq!(res.active_providers.len(), 1);
    assert_eq!(res.active_providers[0].provider_id, "openai");
    // Pre-filter list keeps the inactive mapping for display purposes.
    assert_eq!(res.all_providers.len(), 2);
}

#[test]
fn models_with_zero_active_mappings_fail_with_deactivated() {
    let err = resolve(&catalog(), "dead", None, Utc::now()).unwrap_err();
    assert!(matches!(err, GatewayError::ModelDeactivated(_)));
    assert_eq!(err.status_code(), 410);
}

#[test]
fn any_inactive_pin_is_cleared_rather_than_failed() {
    for pinned in ["anthropic", "no-such-provider"] {
        let res = resolve(&catalog(), "alive", Some(pinned), Utc::now()).unwrap();
        assert_eq!(res.resolved_provider, None, "pin {pinned} should clear");
        assert!(res.pin_cleared);
        assert_eq!(res.selected_mapping().provider_id, "openai");
    }
}

#[test]
fn active_pin_is_honored() {
    let res = resolve(&catalog(), "alive", Some("openai"), Utc::now()).unwrap();
    assert_eq!(res.resolved_provider.as_deref(), Some("openai"));
    assert!(!res.pin_cleared);
}

#[test]
fn activation_boundary_is_relative_to_evaluation_time() {
    let now = Utc::now();
    let mut m = ProviderModelMapping::new("openai", "m");
    m.deactivated_at = Some(now);
    let catalog = ModelCatalog::new(vec![ModelDefinition {
        id: "edge".into(),
        family: "test".into(),
        aliases: vec![],
        stability: Default::default(),
        providers: vec![m],
    }]);

    // Exactly at the deactivation instant the mapping is no longer active.
    assert!(matches!(
        resolve(&catalog, "edge", None, now),
        Err(GatewayError::ModelDeactivated(_))
    ));
    // A moment earlier it still serves.
    assert!(resolve(&catalog, "edge", None, now - Duration::seconds(1)).is_ok());
}
