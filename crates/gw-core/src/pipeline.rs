//! Proxy pipeline / session orchestrator (L12) — spec.md §4.12. Wires
//! every other layer into the single sequential chain: authenticate,
//! detect format, filter, rate-limit, select+dispatch, account, and
//! release. Transport-agnostic: callers hand in headers/body/path and
//! get back a [`ProxyResponse`] plus (for streamed bodies) a
//! [`StreamFinalizer`] to invoke once the transport has drained the
//! stream and knows the final usage. Grounded on
//! `gproxy-router/src/proxy.rs`'s `proxy_auth` + dispatch shape,
//! generalized from one axum middleware into a transport-free chain.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use gw_breaker::CircuitBreaker;
use gw_common::cost::{CacheTtl, ModelPriceRates, TokenUsage, calculate_request_cost};
use gw_limits::{RateLimitDenial, RateLimitGuard, RateLimitSession, RedisFacade, SessionTracker};
use gw_protocol::Format;
use gw_provider_core::model::{
    CacheTtlPreference, KeyId, MessageRequest, ModelPrice, ProviderChainEntry, ProviderConfig, ProviderId,
    UserId,
};
use gw_provider_core::provider::{Provider, ProxyResponse};
use gw_provider_core::retry::{self, AttemptInput, ProxyError, RetryOutcome};
use gw_provider_core::selector::{self, SelectionContext};
use gw_rules::request_filter::RequestFilterCache;
use gw_storage::GatewayStorage;
use gw_transform::format;
use http::HeaderMap;
use rust_decimal::Decimal;
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::{AuthError, AuthProvider, AuthenticatedSession};
use crate::response_translate::{self, UsageAccumulator};

pub struct IncomingRequest {
    pub headers: HeaderMap,
    pub url_path: String,
    pub query: Option<String>,
    pub body: Value,
    pub trace_id: String,
    pub user_agent: Option<String>,
}

pub struct PipelineDeps {
    pub storage: Arc<GatewayStorage>,
    pub auth: Arc<dyn AuthProvider>,
    pub rate_limiter: Arc<RateLimitGuard>,
    pub sessions: Arc<SessionTracker>,
    pub breaker: Arc<CircuitBreaker>,
    pub request_filters: Arc<RequestFilterCache>,
    pub redis: Arc<dyn RedisFacade>,
    pub provider_timeout: Duration,
    /// spec.md §6.4: absence of this flag disables L3-L6 rate limiting
    /// and every guard degrades to its fail-open path.
    pub enable_rate_limit: bool,
}

pub struct PipelineSuccess {
    pub response: ProxyResponse,
    /// `Some` only for a streamed body: the transport drains the stream
    /// and reports the final usage once it has seen it, finishing the
    /// accounting row and releasing the session slot.
    pub finalize: Option<StreamFinalizer>,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("rate limit exceeded: {0:?}")]
    RateLimited(RateLimitDenial),
    #[error("no provider candidates available")]
    NoCandidates,
    #[error("upstream dispatch failed with status {}", .0.status)]
    Upstream(ProxyError),
    #[error("upstream dispatch timed out")]
    Timeout,
    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
}

/// Runs the full L12 chain for one request. `resolve` mirrors
/// `gw_provider_core::retry::execute`'s own signature — gw-core never
/// owns an HTTP client, only the orchestration around one.
pub async fn run(
    deps: &PipelineDeps,
    resolve: &(impl Fn(&ProviderConfig) -> Arc<dyn Provider> + Sync),
    req: IncomingRequest,
) -> Result<PipelineSuccess, PipelineError> {
    let started_at = OffsetDateTime::now_utc();
    let session_id = Uuid::now_v7().to_string();

    let session = deps.auth.authenticate(&req.headers, req.query.as_deref()).await?;
    record_client_version(deps, &req, session.user.id).await;

    let mut headers = req.headers;
    let mut body = req.body;
    let client_format = format::detect(&req.url_path, &body);

    deps.request_filters.apply(&mut headers, &mut body);

    let requested_model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let rl_session = RateLimitSession {
        user: &session.user_policy,
        key: &session.key_policy,
        session_id: &session_id,
        now: OffsetDateTime::now_utc(),
    };
    if let Err(denial) = if deps.enable_rate_limit {
        deps.rate_limiter.ensure(&rl_session).await
    } else {
        Ok(())
    } {
        record_without_slot(
            &deps.storage,
            &session,
            &session_id,
            &requested_model,
            started_at,
            429,
            format!("rate limit exceeded: {denial:?}"),
        )
        .await;
        return Err(PipelineError::RateLimited(denial));
    }

    deps.sessions
        .acquire(&session.key.id.to_string(), &session.user.id.to_string(), &session_id)
        .await;

    let finalizer = SessionFinalizer {
        storage: deps.storage.clone(),
        sessions: deps.sessions.clone(),
        user_id: session.user.id,
        key_id: session.key.id,
        session_id: session_id.clone(),
        original_model: requested_model.clone(),
        cache_ttl: cache_ttl_from_preference(session.key.cache_ttl_preference),
        started_at,
    };

    let providers = match deps.storage.list_enabled_providers().await {
        Ok(providers) => providers,
        Err(error) => {
            finalizer
                .finish(FinalizeOutcome::Failure {
                    status: 500,
                    message: error.to_string(),
                    provider_chain: Vec::new(),
                })
                .await;
            return Err(PipelineError::Storage(error));
        }
    };

    let mut open_ids = HashSet::new();
    if deps.enable_rate_limit {
        for provider in &providers {
            if !deps.breaker.is_allowed(provider.id).await {
                open_ids.insert(provider.id);
            }
        }
    }
    let selection_ctx = SelectionContext {
        client_format,
        key_provider_group_allowlist: session.key.provider_group_allowlist.as_deref(),
        requested_model: Some(requested_model.as_str()),
    };
    let candidates = selector::candidate_set(&providers, &selection_ctx, |id| open_ids.contains(&id));
    let ordered = selector::order_candidates(candidates, client_format);
    if ordered.is_empty() {
        finalizer
            .finish(FinalizeOutcome::Failure {
                status: 503,
                message: "no provider candidates available".to_string(),
                provider_chain: Vec::new(),
            })
            .await;
        return Err(PipelineError::NoCandidates);
    }

    let stream_requested = body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false);
    let attempt_input = AttemptInput {
        client_format,
        true_original_model: requested_model,
        body,
        url_path: req.url_path,
        stream: stream_requested,
        headers,
        trace_id: req.trace_id,
        user_agent: req.user_agent,
    };

    let dispatch = tokio::time::timeout(
        deps.provider_timeout,
        retry::execute(&ordered, resolve, &deps.breaker, attempt_input),
    )
    .await;

    let outcome: RetryOutcome = match dispatch {
        Err(_elapsed) => {
            finalizer
                .finish(FinalizeOutcome::Failure {
                    status: 504,
                    message: "provider dispatch timed out".to_string(),
                    provider_chain: Vec::new(),
                })
                .await;
            return Err(PipelineError::Timeout);
        }
        Ok(Err(error)) => {
            let status = error.status.as_u16();
            let message = error
                .upstream_body
                .as_deref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_else(|| "upstream request failed".to_string());
            let provider_chain = error.provider_chain.clone();
            finalizer
                .finish(FinalizeOutcome::Failure {
                    status,
                    message,
                    provider_chain,
                })
                .await;
            return Err(PipelineError::Upstream(error));
        }
        Ok(Ok(outcome)) => outcome,
    };

    let RetryOutcome { response, provider_chain } = outcome;
    let billing_model = provider_chain
        .last()
        .and_then(|entry| entry.billing_model.clone())
        .unwrap_or_else(|| finalizer.original_model.clone());
    let provider_id = provider_chain.last().map(|entry| entry.provider_id);
    let native_format = provider_chain
        .last()
        .map(|entry| entry.provider_type.native_format())
        .unwrap_or(client_format);

    match response {
        ProxyResponse::Json { status, headers, body: response_body } => {
            let usage = serde_json::from_slice::<Value>(&response_body)
                .ok()
                .map(|value| extract_usage(native_format, &value))
                .unwrap_or_default();
            finalizer
                .finish(FinalizeOutcome::Success {
                    status: status.as_u16(),
                    provider_id,
                    provider_chain,
                    billing_model,
                    usage,
                })
                .await;
            let client_body = response_translate::translate_json(client_format, native_format, response_body);
            Ok(PipelineSuccess {
                response: ProxyResponse::Json { status, headers, body: client_body },
                finalize: None,
            })
        }
        ProxyResponse::Stream { status, headers, body } => {
            let usage = UsageAccumulator::new();
            let translated_body = response_translate::wrap_stream(client_format, native_format, body, usage.clone());
            Ok(PipelineSuccess {
                response: ProxyResponse::Stream { status, headers, body: translated_body },
                finalize: Some(StreamFinalizer {
                    finalizer,
                    status: status.as_u16(),
                    provider_id,
                    provider_chain,
                    billing_model,
                    usage,
                }),
            })
        }
    }
}

async fn record_client_version(deps: &PipelineDeps, req: &IncomingRequest, user_id: UserId) {
    let Some(version) = crate::auth::header_value(&req.headers, "x-client-version") else {
        return;
    };
    let client_type = crate::auth::header_value(&req.headers, "x-client-type").unwrap_or_else(|| "unknown".to_string());
    deps.redis
        .hset(
            &format!("client_version:{client_type}:{user_id}"),
            &[("version".to_string(), version)],
            0,
        )
        .await;
}

async fn record_without_slot(
    storage: &GatewayStorage,
    session: &AuthenticatedSession,
    session_id: &str,
    requested_model: &str,
    started_at: OffsetDateTime,
    status: u16,
    message: String,
) {
    let request = MessageRequest {
        user_id: session.user.id,
        key_id: session.key.id,
        provider_id: None,
        model: requested_model.to_string(),
        original_model: requested_model.to_string(),
        http_status: Some(status),
        duration: OffsetDateTime::now_utc() - started_at,
        input_tokens: 0,
        output_tokens: 0,
        cache_creation_5m_tokens: 0,
        cache_creation_1h_tokens: 0,
        cache_read_tokens: 0,
        cost_usd: Decimal::ZERO,
        session_id: session_id.to_string(),
        note: None,
        provider_chain: Vec::new(),
        error_message: Some(message),
        created_at: started_at,
    };
    if let Err(error) = storage.record_message_request(&request).await {
        tracing::warn!(event = "message_request_record_failed", %error);
    }
}

enum FinalizeOutcome {
    Success {
        status: u16,
        provider_id: Option<ProviderId>,
        provider_chain: Vec<ProviderChainEntry>,
        billing_model: String,
        usage: TokenUsage,
    },
    Failure {
        status: u16,
        message: String,
        provider_chain: Vec<ProviderChainEntry>,
    },
}

struct SessionFinalizer {
    storage: Arc<GatewayStorage>,
    sessions: Arc<SessionTracker>,
    user_id: UserId,
    key_id: KeyId,
    session_id: String,
    original_model: String,
    cache_ttl: CacheTtl,
    started_at: OffsetDateTime,
}

impl SessionFinalizer {
    async fn finish(self, outcome: FinalizeOutcome) {
        let (provider_id, provider_chain, status, cost_usd, model, error_message, usage) = match outcome {
            FinalizeOutcome::Success {
                status,
                provider_id,
                provider_chain,
                billing_model,
                usage,
            } => {
                let rates = match self.storage.current_model_price(&billing_model).await {
                    Ok(Some(price)) => rates_from_price(&price),
                    Ok(None) => ModelPriceRates::default(),
                    Err(error) => {
                        tracing::warn!(event = "model_price_lookup_failed", %error);
                        ModelPriceRates::default()
                    }
                };
                let cost = calculate_request_cost(&usage, &rates, Some(self.cache_ttl), None);
                (provider_id, provider_chain, status, cost, billing_model, None, usage)
            }
            FinalizeOutcome::Failure {
                status,
                message,
                provider_chain,
            } => (
                None,
                provider_chain,
                status,
                Decimal::ZERO,
                self.original_model.clone(),
                Some(message),
                TokenUsage::default(),
            ),
        };

        let request = MessageRequest {
            user_id: self.user_id,
            key_id: self.key_id,
            provider_id,
            model,
            original_model: self.original_model.clone(),
            http_status: Some(status),
            duration: OffsetDateTime::now_utc() - self.started_at,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_5m_tokens: usage.cache_creation_5m_tokens,
            cache_creation_1h_tokens: usage.cache_creation_1h_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cost_usd,
            session_id: self.session_id.clone(),
            note: None,
            provider_chain,
            error_message,
            created_at: self.started_at,
        };
        if let Err(error) = self.storage.record_message_request(&request).await {
            tracing::warn!(event = "message_request_record_failed", %error);
        }
        self.sessions
            .release(&self.key_id.to_string(), &self.user_id.to_string(), &self.session_id)
            .await;
    }
}

/// Handed back for a streamed response: the transport (apps/gw-gateway)
/// owns the byte stream and is the only place that can observe the
/// trailing usage delta, so it calls [`Self::finish`] once the stream
/// ends instead of gw-core finalizing synchronously like the JSON path.
pub struct StreamFinalizer {
    finalizer: SessionFinalizer,
    status: u16,
    provider_id: Option<ProviderId>,
    provider_chain: Vec<ProviderChainEntry>,
    billing_model: String,
    usage: UsageAccumulator,
}

impl StreamFinalizer {
    /// Called by the transport once the client's byte stream has fully
    /// drained. Usage comes from whatever `response_translate::wrap_stream`
    /// observed in the trailing SSE events, not a caller-supplied value.
    pub async fn finish(self) {
        let usage = self.usage.snapshot();
        self.finalizer
            .finish(FinalizeOutcome::Success {
                status: self.status,
                provider_id: self.provider_id,
                provider_chain: self.provider_chain,
                billing_model: self.billing_model,
                usage,
            })
            .await;
    }
}

fn cache_ttl_from_preference(preference: CacheTtlPreference) -> CacheTtl {
    match preference {
        CacheTtlPreference::FiveMinutes => CacheTtl::FiveMinutes,
        CacheTtlPreference::OneHour => CacheTtl::OneHour,
        CacheTtlPreference::Inherit => CacheTtl::Mixed,
    }
}

fn rates_from_price(price: &ModelPrice) -> ModelPriceRates {
    ModelPriceRates {
        input: price.input_usd_per_token,
        output: price.output_usd_per_token,
        cache_creation_5m: Some(price.cache_creation_5m_usd_per_token),
        cache_creation_1h: Some(price.cache_creation_1h_usd_per_token),
        cache_read: Some(price.cache_read_usd_per_token),
    }
}

/// Reads the `usage` (or, for Gemini, `usageMetadata`) object out of an
/// upstream's *native*-format response body. Each format's field names
/// come from `gw-protocol`'s typed wire structs; read positionally here
/// rather than via full deserialization so a partial or best-effort
/// upstream body still yields whatever usage it reported.
pub(crate) fn extract_usage(native_format: Format, body: &Value) -> TokenUsage {
    match native_format {
        Format::Claude => {
            let usage = body.get("usage");
            let cache_creation = usage.and_then(|u| u.get("cache_creation"));
            let (cache_5m, cache_1h, unsplit) = match cache_creation {
                Some(split) => (
                    field_u64(Some(split), "ephemeral_5m_input_tokens"),
                    field_u64(Some(split), "ephemeral_1h_input_tokens"),
                    0,
                ),
                None => (0, 0, field_u64(usage, "cache_creation_input_tokens")),
            };
            TokenUsage {
                input_tokens: field_u64(usage, "input_tokens"),
                output_tokens: field_u64(usage, "output_tokens"),
                cache_creation_5m_tokens: cache_5m,
                cache_creation_1h_tokens: cache_1h,
                cache_read_tokens: field_u64(usage, "cache_read_input_tokens"),
                cache_creation_input_tokens_unsplit: unsplit,
            }
        }
        Format::OpenAi => {
            let usage = body.get("usage");
            let cached = usage
                .and_then(|u| u.get("prompt_tokens_details"))
                .map(|details| field_u64(Some(details), "cached_tokens"))
                .unwrap_or(0);
            TokenUsage {
                input_tokens: field_u64(usage, "prompt_tokens"),
                output_tokens: field_u64(usage, "completion_tokens"),
                cache_read_tokens: cached,
                ..Default::default()
            }
        }
        Format::Codex => {
            let usage = body.get("usage");
            let cached = usage
                .and_then(|u| u.get("input_tokens_details"))
                .map(|details| field_u64(Some(details), "cached_tokens"))
                .unwrap_or(0);
            TokenUsage {
                input_tokens: field_u64(usage, "input_tokens"),
                output_tokens: field_u64(usage, "output_tokens"),
                cache_read_tokens: cached,
                ..Default::default()
            }
        }
        Format::Gemini | Format::GeminiCli => {
            let usage = body
                .get("usageMetadata")
                .or_else(|| body.get("response").and_then(|response| response.get("usageMetadata")));
            TokenUsage {
                input_tokens: field_u64(usage, "promptTokenCount"),
                output_tokens: field_u64(usage, "candidatesTokenCount"),
                cache_read_tokens: field_u64(usage, "cachedContentTokenCount"),
                ..Default::default()
            }
        }
    }
}

fn field_u64(object: Option<&Value>, key: &str) -> u64 {
    object.and_then(|value| value.get(key)).and_then(|value| value.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_claude_usage_with_split_cache_creation() {
        let body = serde_json::json!({
            "usage": {
                "input_tokens": 10,
                "output_tokens": 5,
                "cache_read_input_tokens": 2,
                "cache_creation": {
                    "ephemeral_5m_input_tokens": 3,
                    "ephemeral_1h_input_tokens": 1
                }
            }
        });
        let usage = extract_usage(Format::Claude, &body);
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(usage.cache_creation_5m_tokens, 3);
        assert_eq!(usage.cache_creation_1h_tokens, 1);
        assert_eq!(usage.cache_read_tokens, 2);
    }

    #[test]
    fn extracts_openai_usage_with_cached_tokens() {
        let body = serde_json::json!({
            "usage": {
                "prompt_tokens": 20,
                "completion_tokens": 8,
                "total_tokens": 28,
                "prompt_tokens_details": {"cached_tokens": 4}
            }
        });
        let usage = extract_usage(Format::OpenAi, &body);
        assert_eq!(usage.input_tokens, 20);
        assert_eq!(usage.output_tokens, 8);
        assert_eq!(usage.cache_read_tokens, 4);
    }

    #[test]
    fn extracts_gemini_usage_from_usage_metadata() {
        let body = serde_json::json!({
            "usageMetadata": {
                "promptTokenCount": 12,
                "candidatesTokenCount": 6,
                "cachedContentTokenCount": 1
            }
        });
        let usage = extract_usage(Format::Gemini, &body);
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 6);
        assert_eq!(usage.cache_read_tokens, 1);
    }

    #[test]
    fn missing_usage_object_defaults_to_zero() {
        let usage = extract_usage(Format::Codex, &serde_json::json!({}));
        assert_eq!(usage, TokenUsage::default());
    }
}
