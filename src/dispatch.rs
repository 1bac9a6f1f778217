//! Upstream dispatch pipeline.
//!
//! resolve → endpoint/headers → translate → issue the call under the
//! composed abort signal → normalize → log entry. Retry and failover are
//! deliberately absent: a fired timeout is surfaced, not retried, and
//! provider failover is an outer concern.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use serde_json::Value;

use crate::catalog::{resolver, ModelCatalog};
use crate::classify::{failure_detail, FailureDetail, FinishClassification};
use crate::collab::{request_fingerprint, ResponseCache, UsageSink};
use crate::config::GatewayConfig;
use crate::core::{CompletionEstimate, ImageRef, ProviderAdapter, ProviderContext, TranslateOptions};
use crate::error::GatewayError;
use crate::logrecord::{CostBreakdown, LogEntry, LogEntryBuilder};
use crate::media::{inline_remote_images, ImagePolicy};
use crate::providers::ProviderId;
use crate::stream::StreamAccumulator;
use crate::timeout::{AbortKind, CancelHandle, TimeoutConfig};
use crate::types::{ChatRequest, FinishReason, Usage};

/// Per-call options supplied by the inbound layer.
#[derive(Clone, Default)]
pub struct DispatchOptions {
    pub requested_provider: Option<String>,
    pub api_key: Option<String>,
    /// Base URL override (custom endpoints, tests).
    pub base_url: Option<String>,
    pub config: GatewayConfig,
    pub image_policy: ImagePolicy,
    pub cancel: Option<CancelHandle>,
    pub cache: Option<Arc<dyn ResponseCache>>,
    pub sink: Option<Arc<dyn UsageSink>>,
    pub translate: TranslateOptions,
    /// Attach raw payloads to the log entry.
    pub debug_payloads: bool,
    pub trace_id: Option<String>,
    pub web_search_enabled: bool,
}

/// Final result of one dispatched call.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Raw upstream response (non-streaming calls only).
    pub response: Option<Value>,
    pub text: String,
    pub images: Vec<ImageRef>,
    pub usage: Usage,
    pub finish_reason: FinishReason,
    pub classification: FinishClassification,
    pub served_from_cache: bool,
    pub log_entry: LogEntry,
}

/// Issues upstream calls. One instance shares its connection pool across
/// all in-flight requests.
#[derive(Clone)]
pub struct Dispatcher {
    http: reqwest::Client,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Run the full pipeline for one request.
    pub async fn execute(
        &self,
        mut req: ChatRequest,
        catalog: &ModelCatalog,
        opts: DispatchOptions,
    ) -> Result<DispatchOutcome, GatewayError> {
        let started = Instant::now();
        let timeouts = TimeoutConfig::from_env();

        let resolution = resolver::resolve(
            catalog,
            &req.model,
            opts.requested_provider.as_deref(),
            Utc::now(),
        )?;
        let mapping = resolution.selected_mapping().clone();
        let dialect = ProviderId::from_provider_id(&mapping.provider_id);
        let adapter = dialect.adapter();

        if req.stream && !(mapping.capabilities.streaming && adapter.capabilities().streaming) {
            return Err(GatewayError::UnsupportedOperation(format!(
                "{} does not stream for model {}",
                mapping.provider_id, mapping.model_name
            )));
        }
        if req.tools.as_deref().is_some_and(|t| !t.is_empty()) && !mapping.capabilities.tools {
            return Err(GatewayError::UnsupportedOperation(format!(
                "{} does not support tools for model {}",
                mapping.provider_id, mapping.model_name
            )));
        }

        tracing::debug!(
            model = %mapping.model_name,
            provider = %mapping.provider_id,
            stream = req.stream,
            "dispatching chat request"
        );

        // Read-through cache: best-effort, never caches streams.
        let fingerprint = request_fingerprint(&req);
        if !req.stream {
            if let Some(cache) = &opts.cache {
                if let Some(cached) = cache.get(&fingerprint).await {
                    tracing::debug!(%fingerprint, "cache hit");
                    return self
                        .cached_outcome(cached, &req, &resolution, &mapping, adapter, &opts)
                        .await;
                }
            }
        }

        // Image fetches are upstream I/O and run under the gateway signal.
        let gateway_signal = timeouts.gateway_signal(opts.cancel.clone());
        tokio::select! {
            biased;
            kind = gateway_signal.fired() => {
                return Err(gateway_signal.abort_error(kind));
            }
            result = inline_remote_images(&mut req, &self.http, &opts.image_policy) => result?,
        }

        let ctx = ProviderContext {
            provider_id: mapping.provider_id.clone(),
            model: mapping.model_name.clone(),
            base_url: opts
                .base_url
                .clone()
                .or_else(|| dialect.default_base_url().map(str::to_string)),
            api_key: opts.api_key.clone(),
            stream: req.stream,
            web_search_enabled: opts.web_search_enabled
                && mapping.capabilities.web_search
                && adapter.capabilities().web_search,
            responses_api: mapping.supports_responses_api,
            config: opts.config.clone(),
        };

        let url = adapter.endpoint_url(&ctx)?;
        let headers = adapter.build_headers(&ctx)?;
        let body = adapter.translate_request(&req, &ctx, &opts.translate)?;

        let signal = if req.stream {
            timeouts.streaming_signal(opts.cancel.clone())
        } else {
            timeouts.plain_signal(opts.cancel.clone())
        };

        let entry_base = || {
            LogEntryBuilder::new(&req.model, &mapping.model_name, &mapping.provider_id)
                .debug(opts.debug_payloads)
                .requested_provider(opts.requested_provider.clone())
                .routing(
                    resolution
                        .active_providers
                        .iter()
                        .map(|m| m.provider_id.clone())
                        .collect(),
                    resolution
                        .all_providers
                        .iter()
                        .map(|m| m.provider_id.clone())
                        .collect(),
                    resolution.pin_cleared,
                )
                .streamed(req.stream)
                .raw_request(body.clone())
        };
        let entry_base = with_trace(entry_base, opts.trace_id.clone());

        let send = self
            .http
            .post(&url)
            .headers(headers)
            .json(&body)
            .send();
        let response = tokio::select! {
            biased;
            kind = signal.fired() => {
                let err = signal.abort_error(kind);
                self.record_abort(&opts, entry_base(), kind, started).await;
                return Err(err);
            }
            result = send => result.map_err(GatewayError::from)?,
        };

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = response.text().await.unwrap_or_default();
            let detail = failure_detail(status, Some(&body_text));
            tracing::warn!(status, classification = ?detail.classification, "upstream error");
            self.record(
                &opts,
                entry_base()
                    .finish_reason(FinishReason::Error)
                    .failure(detail)
                    .duration_ms(started.elapsed().as_millis() as u64)
                    .build(),
            )
            .await;
            return Err(GatewayError::ApiError {
                status,
                message: body_text,
                details: None,
            });
        }

        if req.stream {
            self.consume_stream(
                response, adapter, &signal, &mapping, &req, &opts, entry_base, started,
            )
            .await
        } else {
            let raw: Value = tokio::select! {
                biased;
                kind = signal.fired() => {
                    let err = signal.abort_error(kind);
                    self.record_abort(&opts, entry_base(), kind, started).await;
                    return Err(err);
                }
                parsed = response.json::<Value>() => parsed.map_err(GatewayError::from)?,
            };

            let images = adapter.extract_images(&raw);
            let text = adapter.extract_text_delta(&raw).unwrap_or_default();
            let estimate = CompletionEstimate {
                text: text.clone(),
                image_sizes: images.iter().map(|img| img.data.len() * 3 / 4).collect(),
            };
            let usage = adapter.extract_usage(&raw, Some(&estimate));
            let finish_reason = adapter
                .extract_finish_reason(&raw)
                .map(|r| FinishReason::from_provider(&r))
                .unwrap_or(FinishReason::Unknown);
            let cost = CostBreakdown::compute(&mapping, &usage, count_input_images(&req));

            let log_entry = entry_base()
                .usage(usage.clone())
                .cost(cost)
                .finish_reason(finish_reason.clone())
                .duration_ms(started.elapsed().as_millis() as u64)
                .raw_response(raw.clone())
                .build();
            self.record(&opts, log_entry.clone()).await;

            if let Some(cache) = &opts.cache {
                cache.put(&fingerprint, &raw).await;
            }

            Ok(DispatchOutcome {
                response: Some(raw),
                text,
                images,
                usage,
                finish_reason,
                classification: FinishClassification::Completed,
                served_from_cache: false,
                log_entry,
            })
        }
    }

    /// Consume an SSE stream under the abort signal, folding chunks as
    /// they arrive.
    #[allow(clippy::too_many_arguments)]
    async fn consume_stream(
        &self,
        response: reqwest::Response,
        adapter: &'static dyn ProviderAdapter,
        signal: &crate::timeout::AbortSignal,
        mapping: &crate::catalog::ProviderModelMapping,
        req: &ChatRequest,
        opts: &DispatchOptions,
        entry_base: impl Fn() -> LogEntryBuilder,
        started: Instant,
    ) -> Result<DispatchOutcome, GatewayError> {
        let mut events = response.bytes_stream().eventsource();
        let mut acc = StreamAccumulator::new(adapter);

        loop {
            let next = tokio::select! {
                biased;
                kind = signal.fired() => {
                    let err = signal.abort_error(kind);
                    self.record_abort(opts, entry_base(), kind, started).await;
                    return Err(err);
                }
                next = events.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    if event.data.trim() == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<Value>(&event.data) {
                        Ok(chunk) => acc.absorb(&chunk),
                        Err(_) => {
                            tracing::debug!("skipping non-JSON stream chunk");
                        }
                    }
                }
                Some(Err(e)) => {
                    let detail = FailureDetail {
                        classification: FinishClassification::UpstreamError,
                        status: 502,
                        message: Some(e.to_string()),
                    };
                    self.record(
                        opts,
                        entry_base()
                            .finish_reason(FinishReason::Error)
                            .failure(detail)
                            .duration_ms(started.elapsed().as_millis() as u64)
                            .build(),
                    )
                    .await;
                    return Err(GatewayError::HttpError(e.to_string()));
                }
                None => break,
            }
        }

        let outcome = acc.finish();
        let cost = CostBreakdown::compute(mapping, &outcome.usage, count_input_images(req));
        let log_entry = entry_base()
            .usage(outcome.usage.clone())
            .cost(cost)
            .finish_reason(outcome.finish_reason.clone())
            .duration_ms(started.elapsed().as_millis() as u64)
            .build();
        self.record(opts, log_entry.clone()).await;

        Ok(DispatchOutcome {
            response: None,
            text: outcome.text,
            images: outcome.images,
            usage: outcome.usage,
            finish_reason: outcome.finish_reason,
            classification: FinishClassification::Completed,
            served_from_cache: false,
            log_entry,
        })
    }

    /// Build the outcome for a cache hit.
    async fn cached_outcome(
        &self,
        cached: Value,
        req: &ChatRequest,
        resolution: &resolver::Resolution,
        mapping: &crate::catalog::ProviderModelMapping,
        adapter: &'static dyn ProviderAdapter,
        opts: &DispatchOptions,
    ) -> Result<DispatchOutcome, GatewayError> {
        let usage = adapter.extract_usage(&cached, None);
        let finish_reason = adapter
            .extract_finish_reason(&cached)
            .map(|r| FinishReason::from_provider(&r))
            .unwrap_or(FinishReason::Stop);
        let text = adapter.extract_text_delta(&cached).unwrap_or_default();
        let images = adapter.extract_images(&cached);

        let log_entry = LogEntryBuilder::new(&req.model, &mapping.model_name, &mapping.provider_id)
            .debug(opts.debug_payloads)
            .requested_provider(opts.requested_provider.clone())
            .routing(
                resolution
                    .active_providers
                    .iter()
                    .map(|m| m.provider_id.clone())
                    .collect(),
                resolution
                    .all_providers
                    .iter()
                    .map(|m| m.provider_id.clone())
                    .collect(),
                resolution.pin_cleared,
            )
            .usage(usage.clone())
            .finish_reason(finish_reason.clone())
            .raw_response(cached.clone())
            .build();
        self.record(opts, log_entry.clone()).await;

        Ok(DispatchOutcome {
            response: Some(cached),
            text,
            images,
            usage,
            finish_reason,
            classification: FinishClassification::Completed,
            served_from_cache: true,
            log_entry,
        })
    }

    async fn record_abort(
        &self,
        opts: &DispatchOptions,
        entry: LogEntryBuilder,
        kind: AbortKind,
        started: Instant,
    ) {
        // The log entry's finish reason distinguishes a timer abort from a
        // caller cancellation; billing treats them differently.
        let (reason, status, classification) = match kind {
            AbortKind::Timeout => (
                FinishReason::Other("timeout".into()),
                504,
                FinishClassification::UpstreamError,
            ),
            AbortKind::Cancelled => (
                FinishReason::Other("cancelled".into()),
                499,
                FinishClassification::ClientError,
            ),
        };
        let detail = FailureDetail {
            classification,
            status,
            message: None,
        };
        self.record(
            opts,
            entry
                .finish_reason(reason)
                .failure(detail)
                .duration_ms(started.elapsed().as_millis() as u64)
                .build(),
        )
        .await;
    }

    async fn record(&self, opts: &DispatchOptions, entry: LogEntry) {
        if let Some(sink) = &opts.sink {
            sink.record(entry).await;
        }
    }
}

fn count_input_images(req: &ChatRequest) -> u32 {
    use crate::types::{ContentPart, MessageContent};
    req.messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::Parts(parts) => Some(
                parts
                    .iter()
                    .filter(|p| matches!(p, ContentPart::Image { .. }))
                    .count() as u32,
            ),
            _ => None,
        })
        .sum()
}

fn with_trace(
    base: impl Fn() -> LogEntryBuilder,
    trace_id: Option<String>,
) -> impl Fn() -> LogEntryBuilder {
    move || match &trace_id {
        Some(id) => base().trace_id(id.clone()),
        None => base(),
    }
}
