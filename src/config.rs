//! Deployment configuration.
//!
//! Every value is read at call time — never cached in module statics — so
//! tests and runtime reconfiguration see current values. Missing required
//! keys fail with a `ConfigurationError` naming the key; endpoint builders
//! never silently default to an unusable URL.

use std::collections::HashMap;

use crate::error::GatewayError;

/// Environment keys consumed by endpoint builders.
pub mod keys {
    pub const AZURE_RESOURCE_NAME: &str = "AZURE_RESOURCE_NAME";
    pub const AZURE_API_VERSION: &str = "AZURE_API_VERSION";
    pub const AZURE_DEPLOYMENT_TYPE: &str = "AZURE_DEPLOYMENT_TYPE";
    pub const VERTEX_PROJECT_ID: &str = "VERTEX_PROJECT_ID";
    pub const VERTEX_REGION: &str = "VERTEX_REGION";
    pub const BEDROCK_REGION: &str = "BEDROCK_REGION";
    pub const BEDROCK_MODEL_REGION_PREFIX: &str = "BEDROCK_MODEL_REGION_PREFIX";
}

/// Config source backed by the process environment, with an override map
/// for tests and embedders.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    overrides: HashMap<String, String>,
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override a key without touching the process environment.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Read a key: overrides first, then the environment, at call time.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.overrides.get(key) {
            return Some(v.clone());
        }
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    /// Read a required key, failing with the key name when absent.
    pub fn require(&self, key: &str) -> Result<String, GatewayError> {
        self.get(key)
            .ok_or_else(|| GatewayError::ConfigurationError(format!("{key} is not set")))
    }

    /// Azure deployment style: `"foundry"` selects the unified AI-Foundry
    /// path, anything else (or unset) the classic per-deployment path.
    pub fn azure_uses_foundry(&self) -> bool {
        self.get(keys::AZURE_DEPLOYMENT_TYPE)
            .map(|v| v.eq_ignore_ascii_case("foundry"))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_names_the_missing_key() {
        let config = GatewayConfig::new();
        let err = config.require("MODELGATE_TEST_NO_SUCH_KEY").unwrap_err();
        assert!(err.to_string().contains("MODELGATE_TEST_NO_SUCH_KEY"));
    }

    #[test]
    fn overrides_win_over_environment() {
        let config = GatewayConfig::new().with_value(keys::VERTEX_PROJECT_ID, "proj-1");
        assert_eq!(config.require(keys::VERTEX_PROJECT_ID).unwrap(), "proj-1");
    }
}
