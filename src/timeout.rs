//! Timeout and cancellation control for upstream calls.
//!
//! Three independent durations bound every call: the overall gateway
//! timeout, the upstream streaming timeout and the upstream non-streaming
//! timeout. All are read from the environment at call time so tests and
//! runtime reconfiguration behave deterministically. The streaming timeout
//! is always kept strictly below the gateway timeout so the gateway can
//! still close the connection gracefully after an upstream stall.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;

pub const GATEWAY_TIMEOUT_MS: &str = "GATEWAY_TIMEOUT_MS";
pub const AI_STREAMING_TIMEOUT_MS: &str = "AI_STREAMING_TIMEOUT_MS";
pub const AI_TIMEOUT_MS: &str = "AI_TIMEOUT_MS";

const DEFAULT_GATEWAY_MS: u64 = 300_000;
const DEFAULT_STREAMING_MS: u64 = 240_000;
const DEFAULT_PLAIN_MS: u64 = 180_000;

/// Why a composed signal fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortKind {
    /// The timer fired; billed/logged as a timeout.
    Timeout,
    /// The caller cancelled; billed/logged as a cancellation.
    Cancelled,
}

impl AbortKind {
    pub fn into_error(self, timeout: Duration) -> GatewayError {
        match self {
            Self::Timeout => GatewayError::Timeout(timeout),
            Self::Cancelled => GatewayError::Cancelled,
        }
    }
}

/// Caller-side cancellation handle.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Signals composed from this handle fire as
    /// `AbortKind::Cancelled`; dropping the aborted call closes the
    /// upstream connection so the provider stops generating tokens.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// One composed abort signal: a timer plus an optional caller cancellation,
/// firing on whichever occurs first.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    timeout: Duration,
    deadline: tokio::time::Instant,
    cancel: Option<CancelHandle>,
}

impl AbortSignal {
    pub fn new(timeout: Duration, cancel: Option<CancelHandle>) -> Self {
        Self {
            timeout,
            deadline: tokio::time::Instant::now() + timeout,
            cancel,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Non-blocking check. Cancellation wins over the timer when both have
    /// occurred, so a pre-fired cancellation is never misreported as a
    /// timeout.
    pub fn aborted(&self) -> Option<AbortKind> {
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return Some(AbortKind::Cancelled);
            }
        }
        if tokio::time::Instant::now() >= self.deadline {
            return Some(AbortKind::Timeout);
        }
        None
    }

    /// Resolve when the signal fires. Every suspension point in an
    /// upstream call races against this future.
    pub async fn fired(&self) -> AbortKind {
        if let Some(kind) = self.aborted() {
            return kind;
        }
        match &self.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => AbortKind::Cancelled,
                    _ = tokio::time::sleep_until(self.deadline) => AbortKind::Timeout,
                }
            }
            None => {
                tokio::time::sleep_until(self.deadline).await;
                AbortKind::Timeout
            }
        }
    }

    /// The error a fired signal maps to.
    pub fn abort_error(&self, kind: AbortKind) -> GatewayError {
        kind.into_error(self.timeout)
    }
}

/// Resolved timeout durations for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub gateway: Duration,
    pub streaming: Duration,
    pub plain: Duration,
}

impl TimeoutConfig {
    /// Read the three durations from the environment. Called per request;
    /// nothing here is cached in statics.
    pub fn from_env() -> Self {
        Self::resolve(
            read_ms(GATEWAY_TIMEOUT_MS),
            read_ms(AI_STREAMING_TIMEOUT_MS),
            read_ms(AI_TIMEOUT_MS),
        )
    }

    /// Apply defaults and the streaming-below-gateway invariant.
    pub fn resolve(
        gateway_ms: Option<u64>,
        streaming_ms: Option<u64>,
        plain_ms: Option<u64>,
    ) -> Self {
        let gateway = gateway_ms.unwrap_or(DEFAULT_GATEWAY_MS).max(1);
        let streaming =
            streaming_ms.unwrap_or_else(|| DEFAULT_STREAMING_MS.min(gateway * 4 / 5));
        // Strictly below the gateway timeout, whatever was configured.
        let streaming = if streaming >= gateway {
            (gateway * 4 / 5).max(1)
        } else {
            streaming.max(1)
        };
        let plain = plain_ms.unwrap_or(DEFAULT_PLAIN_MS).max(1);
        Self {
            gateway: Duration::from_millis(gateway),
            streaming: Duration::from_millis(streaming),
            plain: Duration::from_millis(plain),
        }
    }

    /// Signal bounding an upstream streaming call.
    pub fn streaming_signal(&self, cancel: Option<CancelHandle>) -> AbortSignal {
        AbortSignal::new(self.streaming, cancel)
    }

    /// Signal bounding an upstream non-streaming call.
    pub fn plain_signal(&self, cancel: Option<CancelHandle>) -> AbortSignal {
        AbortSignal::new(self.plain, cancel)
    }

    /// Signal bounding the whole inbound request.
    pub fn gateway_signal(&self, cancel: Option<CancelHandle>) -> AbortSignal {
        AbortSignal::new(self.gateway, cancel)
    }
}

fn read_ms(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Some(ms),
        _ => {
            tracing::warn!(key, value = %raw, "ignoring unparsable timeout override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_streaming_below_gateway() {
        let config = TimeoutConfig::resolve(None, None, None);
        assert_eq!(config.gateway, Duration::from_millis(300_000));
        assert_eq!(config.streaming, Duration::from_millis(240_000));
        assert_eq!(config.plain, Duration::from_millis(180_000));
        assert!(config.streaming < config.gateway);
    }

    #[test]
    fn short_gateway_drags_streaming_down() {
        let config = TimeoutConfig::resolve(Some(100_000), None, None);
        assert_eq!(config.streaming, Duration::from_millis(80_000));
    }

    #[test]
    fn oversized_streaming_override_is_clamped() {
        let config = TimeoutConfig::resolve(Some(100_000), Some(500_000), None);
        assert!(config.streaming < config.gateway);
        assert_eq!(config.streaming, Duration::from_millis(80_000));
    }

    #[tokio::test]
    async fn timer_fires_as_timeout() {
        let signal = AbortSignal::new(Duration::from_millis(5), None);
        assert_eq!(signal.fired().await, AbortKind::Timeout);
        assert_eq!(signal.aborted(), Some(AbortKind::Timeout));
    }

    #[tokio::test]
    async fn cancellation_beats_the_timer() {
        let cancel = CancelHandle::new();
        let signal = AbortSignal::new(Duration::from_secs(60), Some(cancel.clone()));
        cancel.cancel();
        assert_eq!(signal.fired().await, AbortKind::Cancelled);
    }

    #[tokio::test]
    async fn prefired_cancellation_is_already_aborted() {
        let cancel = CancelHandle::new();
        cancel.cancel();
        // Even with a tiny timer, a pre-fired cancellation must classify
        // as cancellation, not timeout.
        let signal = AbortSignal::new(Duration::from_millis(100), Some(cancel));
        assert_eq!(signal.aborted(), Some(AbortKind::Cancelled));
        assert_eq!(signal.fired().await, AbortKind::Cancelled);
        assert!(matches!(
            signal.abort_error(AbortKind::Cancelled),
            GatewayError::Cancelled
        ));
    }
}
