//! Image handling for multimodal requests.
//!
//! Data URLs are decoded in place. Remote URLs are fetched with HTTPS
//! enforcement, content-type validation and a size ceiling checked both
//! against `Content-Length` and the actual downloaded bytes, then inlined
//! as data URLs so translators stay pure. Error messages are sanitized:
//! they name the limit and the fix, never the source URL.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::GatewayError;
use crate::types::{ChatRequest, ContentPart, MessageContent};

/// Fetch/size policy for remote images.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    pub max_bytes: usize,
    /// Reject plain-http URLs (enforced in production deployments).
    pub require_https: bool,
    /// Drives the upgrade hint in size-limit errors.
    pub free_plan: bool,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_bytes: 20 * 1024 * 1024,
            require_https: true,
            free_plan: false,
        }
    }
}

impl ImagePolicy {
    fn size_limit_error(&self) -> GatewayError {
        let limit_mb = self.max_bytes as f64 / (1024.0 * 1024.0);
        let message = if self.free_plan {
            format!(
                "Image input exceeds the {limit_mb:.0} MB limit for your current plan. \
                 Upgrade to a paid plan to send larger images."
            )
        } else {
            format!("Image input exceeds the {limit_mb:.0} MB limit.")
        };
        GatewayError::ImageProcessingError(message)
    }
}

/// Inline image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl InlineImage {
    /// Re-encode as a data URL.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.data))
    }
}

/// Split a data URL into `(mime_type, base64_payload)`.
pub fn parse_data_url(data_url: &str) -> Option<(String, String)> {
    let rest = data_url.strip_prefix("data:")?;
    let comma = rest.find(',')?;
    let header = &rest[..comma];
    let data = &rest[comma + 1..];
    let mime_type = header.split(';').next().unwrap_or("").to_string();
    if mime_type.is_empty() {
        return None;
    }
    Some((mime_type, data.to_string()))
}

/// Decode a data URL into raw bytes, validating the base64 payload.
pub fn decode_data_url(data_url: &str) -> Result<InlineImage, GatewayError> {
    let (mime_type, data) = parse_data_url(data_url)
        .ok_or_else(|| GatewayError::ImageProcessingError("Malformed image data URL".into()))?;
    let bytes = BASE64
        .decode(data.as_bytes())
        .map_err(|_| GatewayError::ImageProcessingError("Invalid base64 image payload".into()))?;
    Ok(InlineImage {
        mime_type,
        data: bytes,
    })
}

/// Fetch a remote image under the policy and return it inlined.
///
/// The URL never appears in returned errors.
pub async fn fetch_remote_image(
    client: &reqwest::Client,
    url: &str,
    policy: &ImagePolicy,
) -> Result<InlineImage, GatewayError> {
    if policy.require_https && !url.starts_with("https://") {
        return Err(GatewayError::ImageProcessingError(
            "Image URLs must use https".into(),
        ));
    }

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|_| GatewayError::ImageProcessingError("Failed to fetch image".into()))?;

    if !response.status().is_success() {
        return Err(GatewayError::ImageProcessingError(format!(
            "Image fetch returned status {}",
            response.status().as_u16()
        )));
    }

    // Reject early on the declared size, then verify the actual bytes;
    // servers lie about Content-Length in both directions.
    if let Some(declared) = response.content_length() {
        if declared as usize > policy.max_bytes {
            return Err(policy.size_limit_error());
        }
    }

    let declared_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|_| GatewayError::ImageProcessingError("Failed to read image body".into()))?;
    if bytes.len() > policy.max_bytes {
        return Err(policy.size_limit_error());
    }

    // Prefer magic-number sniffing over the declared header.
    let mime_type = crate::utils::guess_mime(Some(bytes.as_ref()), Some(url))
        .or(declared_type)
        .unwrap_or_default();
    if !mime_type.starts_with("image/") {
        return Err(GatewayError::ImageProcessingError(
            "URL does not point to a supported image type".into(),
        ));
    }

    Ok(InlineImage {
        mime_type,
        data: bytes.to_vec(),
    })
}

/// Rewrite every remote image part of the request into an inline data URL.
/// Data URLs pass through untouched so translators only ever see inline
/// payloads.
pub async fn inline_remote_images(
    req: &mut ChatRequest,
    client: &reqwest::Client,
    policy: &ImagePolicy,
) -> Result<(), GatewayError> {
    for msg in &mut req.messages {
        let MessageContent::Parts(parts) = &mut msg.content else {
            continue;
        };
        for part in parts {
            let ContentPart::Image { image_url, .. } = part else {
                continue;
            };
            if image_url.starts_with("data:") {
                // Validate inline payloads up front so translators can't
                // ship garbage upstream.
                let image = decode_data_url(image_url)?;
                if image.data.len() > policy.max_bytes {
                    return Err(policy.size_limit_error());
                }
                continue;
            }
            let image = fetch_remote_image(client, image_url, policy).await?;
            *image_url = image.to_data_url();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_round_trip_is_byte_identical() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let image = InlineImage {
            mime_type: "image/png".to_string(),
            data: payload.clone(),
        };
        let url = image.to_data_url();
        let decoded = decode_data_url(&url).unwrap();
        assert_eq!(decoded.mime_type, "image/png");
        assert_eq!(decoded.data, payload);
    }

    #[test]
    fn parse_data_url_handles_charset_params() {
        let (mime, data) = parse_data_url("data:image/jpeg;base64,aGVsbG8=").unwrap();
        assert_eq!(mime, "image/jpeg");
        assert_eq!(data, "aGVsbG8=");
        assert!(parse_data_url("not-a-data-url").is_none());
        assert!(parse_data_url("data:,plain").is_none());
    }

    #[test]
    fn size_limit_message_is_plan_aware_and_url_free() {
        let free = ImagePolicy {
            max_bytes: 1024 * 1024,
            require_https: true,
            free_plan: true,
        };
        let err = free.size_limit_error().to_string();
        assert!(err.contains("Upgrade"));
        assert!(err.contains("1 MB"));

        let paid = ImagePolicy {
            free_plan: false,
            ..free
        };
        let err = paid.size_limit_error().to_string();
        assert!(!err.contains("Upgrade"));
    }

    #[tokio::test]
    async fn plain_http_is_rejected_when_https_required() {
        let client = reqwest::Client::new();
        let policy = ImagePolicy::default();
        let err = fetch_remote_image(&client, "http://example.com/cat.png", &policy)
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("https"));
        assert!(!msg.contains("example.com"));
    }
}
