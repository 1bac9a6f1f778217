//! Provider dialects and the id → adapter dispatch.

pub mod anthropic;
pub mod azure;
pub mod bedrock;
pub mod compat;
pub mod google;
pub mod openai;

pub use compat::{vendor, CompatVendor, COMPAT_VENDORS};

use crate::core::ProviderAdapter;

/// Upstream wire dialect for a provider id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    GoogleAiStudio,
    GoogleVertex,
    Bedrock,
    Azure,
    /// Hosted OpenAI-compatible vendor from the static table.
    OpenAiCompatible(&'static CompatVendor),
    /// Self-hosted or otherwise unrecognized endpoint; spoken to in the
    /// OpenAI dialect with a caller-supplied base URL.
    Custom,
}

impl ProviderId {
    /// Map a catalog provider id to its dialect. Unknown ids fall back to
    /// the generic OpenAI-compatible dialect (the adapter then insists on
    /// an explicit base URL rather than guessing a host).
    pub fn from_provider_id(id: &str) -> Self {
        match id {
            "openai" => Self::OpenAi,
            "anthropic" => Self::Anthropic,
            "google-ai-studio" | "gemini" => Self::GoogleAiStudio,
            "google-vertex" | "vertex" => Self::GoogleVertex,
            "aws-bedrock" | "bedrock" => Self::Bedrock,
            "azure" => Self::Azure,
            "custom" => Self::Custom,
            other => match compat::vendor(other) {
                Some(v) => Self::OpenAiCompatible(v),
                None => Self::Custom,
            },
        }
    }

    /// The adapter implementing this dialect.
    pub fn adapter(&self) -> &'static dyn ProviderAdapter {
        match self {
            Self::OpenAi | Self::OpenAiCompatible(_) | Self::Custom => &openai::OpenAiAdapter,
            Self::Anthropic => &anthropic::AnthropicAdapter,
            Self::GoogleAiStudio => &google::GoogleAdapter { vertex: false },
            Self::GoogleVertex => &google::GoogleAdapter { vertex: true },
            Self::Bedrock => &bedrock::BedrockAdapter,
            Self::Azure => &azure::AzureAdapter,
        }
    }

    /// Default base URL, when the dialect has a fixed host.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Anthropic => Some("https://api.anthropic.com"),
            Self::GoogleAiStudio => Some("https://generativelanguage.googleapis.com/v1beta"),
            Self::OpenAiCompatible(v) => Some(v.base_url),
            // Vertex/Bedrock/Azure hosts depend on deployment config.
            Self::GoogleVertex | Self::Bedrock | Self::Azure | Self::Custom => None,
        }
    }
}
