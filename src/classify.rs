//! Failure classification.
//!
//! Maps an upstream status and error body to one of the unified finish
//! classes. Total and deterministic: the same inputs always classify the
//! same way. Key-health reactions to 401/403 are a separate mechanism and
//! deliberately not represented here.

use serde::{Deserialize, Serialize};

/// Why a call ended, from the gateway's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishClassification {
    Completed,
    /// The provider failed; not the caller's fault.
    UpstreamError,
    /// The gateway produced a request the provider rejected.
    GatewayError,
    /// The caller's request content was rejected (validation/content filter).
    ClientError,
}

/// Classification plus the raw upstream material, attached to the log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    pub classification: FinishClassification,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Provider error substrings at 400 that indicate the caller's content was
/// the problem, not the gateway's translation.
const CLIENT_ERROR_PATTERNS: &[&str] = &[
    // OpenAI response_format/JSON-mode validation
    "Invalid schema for response_format",
    "'messages' must contain the word 'json'",
    // OpenAI/Azure content management
    "content management policy",
    "content_filter",
    // Anthropic input validation
    "prompt is too long",
    // Google safety blocks
    "PROHIBITED_CONTENT",
    "SAFETY",
    // Bedrock guardrails
    "blocked by content filtering policy",
];

/// Classify an upstream result. 5xx, 429 and 404 are provider faults; a
/// recognized validation/content-filter substring at 400 is the caller's;
/// everything else in the 4xx range counts against the gateway.
pub fn classify_failure(status: u16, error_text: Option<&str>) -> FinishClassification {
    match status {
        200..=299 => FinishClassification::Completed,
        429 | 404 => FinishClassification::UpstreamError,
        s if s >= 500 => FinishClassification::UpstreamError,
        400 => {
            let recognized = error_text
                .map(|text| CLIENT_ERROR_PATTERNS.iter().any(|p| text.contains(p)))
                .unwrap_or(false);
            if recognized {
                FinishClassification::ClientError
            } else {
                FinishClassification::GatewayError
            }
        }
        400..=499 => FinishClassification::GatewayError,
        // 1xx/3xx from a chat endpoint mean something went sideways on our end
        _ => FinishClassification::GatewayError,
    }
}

/// Build the loggable detail for a failed call.
pub fn failure_detail(status: u16, error_text: Option<&str>) -> FailureDetail {
    FailureDetail {
        classification: classify_failure(status, error_text),
        status,
        message: error_text.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_faults_are_upstream() {
        assert_eq!(classify_failure(503, None), FinishClassification::UpstreamError);
        assert_eq!(classify_failure(500, None), FinishClassification::UpstreamError);
        assert_eq!(classify_failure(429, None), FinishClassification::UpstreamError);
        assert_eq!(classify_failure(404, None), FinishClassification::UpstreamError);
    }

    #[test]
    fn recognized_validation_substring_is_client_fault() {
        let body = "Invalid schema for response_format 'json_schema': required is not permitted";
        assert_eq!(
            classify_failure(400, Some(body)),
            FinishClassification::ClientError
        );
    }

    #[test]
    fn unrecognized_4xx_counts_against_the_gateway() {
        assert_eq!(
            classify_failure(422, Some("unprocessable")),
            FinishClassification::GatewayError
        );
        assert_eq!(
            classify_failure(400, Some("some new error we have never seen")),
            FinishClassification::GatewayError
        );
        assert_eq!(classify_failure(400, None), FinishClassification::GatewayError);
    }

    #[test]
    fn auth_failures_are_gateway_not_upstream() {
        // 401/403 feed a separate key-health mechanism; here they are 4xx.
        assert_eq!(classify_failure(401, None), FinishClassification::GatewayError);
        assert_eq!(classify_failure(403, None), FinishClassification::GatewayError);
    }

    #[test]
    fn success_is_completed() {
        assert_eq!(classify_failure(200, None), FinishClassification::Completed);
    }
}
