//! Provider retry executor (L11, attempt-loop half) — spec.md §4.11.
//! Grounded on `gproxy-provider-impl/src/dispatch/mod.rs`'s
//! `dispatch_request`/`dispatch_native` shape, generalized from a
//! single native-or-transform branch into a full ordered attempt loop
//! across candidates with circuit-breaker feedback.

use std::sync::Arc;

use gw_breaker::CircuitBreaker;
use gw_protocol::Format;
use gw_transform::{model_redirect, registry};
use http::HeaderMap;
use serde_json::Value;

use crate::model::{ProviderChainEntry, ProviderConfig};
use crate::provider::{Provider as UpstreamProvider, ProxyRequest, ProxyResponse, UpstreamContext};

pub struct AttemptInput {
    pub client_format: Format,
    pub true_original_model: String,
    pub body: Value,
    pub url_path: String,
    pub stream: bool,
    pub headers: HeaderMap,
    pub trace_id: String,
    pub user_agent: Option<String>,
}

pub struct RetryOutcome {
    pub response: ProxyResponse,
    pub provider_chain: Vec<ProviderChainEntry>,
}

#[derive(Debug)]
pub struct ProxyError {
    pub status: http::StatusCode,
    pub upstream_body: Option<bytes::Bytes>,
    pub upstream_request_id: Option<String>,
    pub provider_chain: Vec<ProviderChainEntry>,
}

/// Runs candidates in order, applying L9 redirect and L10 translation
/// before each attempt, recording a provider-chain entry regardless of
/// outcome, and updating `breaker` after every call.
pub async fn execute(
    candidates: &[&ProviderConfig],
    resolve: &impl Fn(&ProviderConfig) -> Arc<dyn UpstreamProvider>,
    breaker: &CircuitBreaker,
    input: AttemptInput,
) -> Result<RetryOutcome, ProxyError> {
    let mut provider_chain = Vec::new();
    let mut last_error: Option<(http::StatusCode, Option<bytes::Bytes>, Option<String>)> = None;

    for (attempt_index, provider) in candidates.iter().enumerate() {
        if !breaker.is_allowed(provider.id).await {
            continue;
        }

        let native = provider.provider_type.native_format();
        let mut body = input.body.clone();
        let mut path = input.url_path.clone();
        let redirect = model_redirect::apply_redirect(
            &mut body,
            &mut path,
            native,
            &input.true_original_model,
            Some(&provider.model_redirects),
        );

        let translated = match registry::transform_request(input.client_format, native, body) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(event = "provider_attempt_transform_failed", provider_id = provider.id, %error);
                continue;
            }
        };

        let model = translated
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&redirect.redirected_model)
            .to_string();

        provider_chain.push(ProviderChainEntry {
            provider_id: provider.id,
            provider_name: provider.name.clone(),
            provider_type: provider.provider_type,
            decision_reason: "selected".to_string(),
            attempt_index: attempt_index as u32,
            original_model: Some(redirect.original_model.clone()),
            redirected_model: Some(redirect.redirected_model.clone()),
            billing_model: Some(redirect.billing_model.clone()),
        });

        let upstream = resolve(provider);
        let req = ProxyRequest {
            format: native,
            model,
            body: translated,
            headers: input.headers.clone(),
            url_path: path,
            stream: input.stream,
        };
        let ctx = UpstreamContext {
            trace_id: input.trace_id.clone(),
            provider_id: Some(provider.id),
            user_agent: input.user_agent.clone(),
        };

        match upstream.call(req, ctx).await {
            Ok(response) => {
                breaker.on_success(provider.id).await;
                return Ok(RetryOutcome { response, provider_chain });
            }
            Err(error) => {
                breaker.on_failure(provider.id).await;
                last_error = Some((error.status, Some(error.body.clone()), error.upstream_request_id.clone()));
                if !error.retryable {
                    break;
                }
            }
        }
    }

    let (status, upstream_body, upstream_request_id) = last_error.unwrap_or((
        http::StatusCode::SERVICE_UNAVAILABLE,
        None,
        None,
    ));
    Err(ProxyError {
        status,
        upstream_body,
        upstream_request_id,
        provider_chain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProxyUrlConfig;
    use crate::provider::UpstreamPassthroughError;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl UpstreamProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn call(&self, _req: ProxyRequest, _ctx: UpstreamContext) -> Result<ProxyResponse, UpstreamPassthroughError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                Err(UpstreamPassthroughError::from_status(
                    http::StatusCode::BAD_GATEWAY,
                    "boom",
                    true,
                ))
            } else {
                Ok(ProxyResponse::Json {
                    status: http::StatusCode::OK,
                    headers: HeaderMap::new(),
                    body: bytes::Bytes::from_static(b"{}"),
                })
            }
        }
    }

    fn provider(id: i64, provider_type: crate::model::ProviderType) -> ProviderConfig {
        ProviderConfig {
            id,
            name: format!("p{id}"),
            provider_type,
            url: "https://example.test".to_string(),
            credential: "secret".to_string(),
            is_enabled: true,
            priority: 0,
            weight: 1,
            provider_group: None,
            model_redirects: HashMap::new(),
            proxy: ProxyUrlConfig::default(),
            model_allowlist: None,
        }
    }

    fn input() -> AttemptInput {
        AttemptInput {
            client_format: Format::Claude,
            true_original_model: "claude-3-opus".to_string(),
            body: serde_json::json!({"model": "claude-3-opus", "messages": []}),
            url_path: "/v1/messages".to_string(),
            stream: false,
            headers: HeaderMap::new(),
            trace_id: "trace-1".to_string(),
            user_agent: None,
        }
    }

    #[tokio::test]
    async fn falls_through_to_next_candidate_on_failure() {
        let providers = vec![
            provider(1, crate::model::ProviderType::Claude),
            provider(2, crate::model::ProviderType::Claude),
        ];
        let refs: Vec<&ProviderConfig> = providers.iter().collect();
        let primary = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_times: usize::MAX,
        });
        let secondary = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_times: 0,
        });
        let resolve = move |p: &ProviderConfig| -> Arc<dyn UpstreamProvider> {
            if p.id == 1 {
                primary.clone()
            } else {
                secondary.clone()
            }
        };
        let mut configs = HashMap::new();
        configs.insert(1, gw_breaker::CircuitBreakerConfig::default());
        configs.insert(2, gw_breaker::CircuitBreakerConfig::default());
        let breaker = CircuitBreaker::new(configs, Arc::new(gw_limits::InProcessRedisFacade::default()));

        let outcome = execute(&refs, &resolve, &breaker, input()).await.unwrap();
        assert_eq!(outcome.provider_chain.len(), 2);
        match outcome.response {
            ProxyResponse::Json { status, .. } => assert_eq!(status, http::StatusCode::OK),
            _ => panic!("expected json response"),
        }
    }

    #[tokio::test]
    async fn exhausting_all_candidates_yields_proxy_error() {
        let providers = vec![provider(1, crate::model::ProviderType::Claude)];
        let refs: Vec<&ProviderConfig> = providers.iter().collect();
        let only = Arc::new(FlakyProvider {
            calls: AtomicUsize::new(0),
            fail_times: usize::MAX,
        });
        let resolve = move |_: &ProviderConfig| -> Arc<dyn UpstreamProvider> { only.clone() };
        let mut configs = HashMap::new();
        configs.insert(1, gw_breaker::CircuitBreakerConfig::default());
        let breaker = CircuitBreaker::new(configs, Arc::new(gw_limits::InProcessRedisFacade::default()));

        let error = execute(&refs, &resolve, &breaker, input()).await.unwrap_err();
        assert_eq!(error.status, http::StatusCode::BAD_GATEWAY);
        assert_eq!(error.provider_chain.len(), 1);
    }
}
