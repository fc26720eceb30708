//! HTTP transport (L0). One generic handler backs every endpoint group
//! from spec.md §4.10 — the pipeline itself does format detection,
//! auth, and provider selection, so the router only needs to hand it
//! raw bytes and turn the result back into an axum `Response`.
//! Grounded on `gproxy-router/src/proxy.rs`'s route table shape and its
//! `to_axum_response` Bytes/Stream split.

use std::pin::Pin;
use std::task::{Context, Poll};

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::post;
use futures_util::Stream;
use gw_core::pipeline::{IncomingRequest, PipelineError};
use gw_core::{StreamFinalizer, run_pipeline};
use gw_provider_core::provider::ProxyResponse;
use gw_rules::error_rule::ErrorRuleCache;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(handle))
        .route("/v1/messages/count_tokens", post(handle))
        .route("/v1/responses", post(handle))
        .route("/v1/chat/completions", post(handle))
        .route("/v1beta/models/{model}", post(handle))
        .route("/v1internal/models/{model}", post(handle))
        .with_state(state)
}

async fn handle(State(state): State<AppState>, headers: HeaderMap, uri: axum::http::Uri, raw_body: Bytes) -> Response<Body> {
    let url_path = uri.path().to_string();
    let query = uri.query().map(str::to_string);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&raw_body).unwrap_or(serde_json::Value::Null);
    let client_format = gw_transform::format::detect(&url_path, &body);

    let req = IncomingRequest {
        headers,
        url_path,
        query,
        body,
        trace_id: Uuid::now_v7().to_string(),
        user_agent,
    };

    match run_pipeline(&state.deps, state.resolve.as_ref(), req).await {
        Ok(success) => to_axum_response(success.response, success.finalize),
        Err(error) => error_response(&error, client_format, &state.error_rules),
    }
}

fn error_response(error: &PipelineError, client_format: gw_protocol::Format, error_rules: &ErrorRuleCache) -> Response<Body> {
    let built = gw_core::build_error_response(error, client_format, error_rules, OffsetDateTime::now_utc());
    let status = StatusCode::from_u16(built.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, axum::Json(built.body)).into_response();
    apply_extra_headers(response.headers_mut(), &built.headers);
    response
}

fn to_axum_response(response: ProxyResponse, finalize: Option<StreamFinalizer>) -> Response<Body> {
    match response {
        ProxyResponse::Json { status, headers, body } => {
            let mut builder = Response::builder().status(status);
            copy_headers(&mut builder, &headers);
            builder.body(Body::from(body)).unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        ProxyResponse::Stream { status, headers, body } => {
            let mut builder = Response::builder().status(status);
            copy_headers(&mut builder, &headers);
            builder
                .header(header::CONTENT_TYPE, body.content_type)
                .body(Body::from_stream(FinalizingStream::new(body.stream, finalize)))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
    }
}

fn copy_headers(builder: &mut axum::http::response::Builder, headers: &http::HeaderMap) {
    let Some(out) = builder.headers_mut() else { return };
    for (name, value) in headers.iter() {
        if is_hop_by_hop_or_framing(name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }
}

fn apply_extra_headers(out: &mut HeaderMap, extra: &[(String, String)]) {
    for (name, value) in extra {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            out.insert(name, value);
        }
    }
}

fn is_hop_by_hop_or_framing(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection" | "transfer-encoding" | "content-length" | "keep-alive" | "upgrade"
    )
}

/// Drives the provider's byte stream through to the client and, once it
/// ends (either normally or because the client disconnected and
/// dropped this future), hands the accumulated usage to `finalize` so
/// the accounting row and session slot always get closed exactly once.
struct FinalizingStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>,
    finalize: Option<StreamFinalizer>,
}

impl FinalizingStream {
    fn new(inner: Pin<Box<dyn Stream<Item = Result<axum::body::Bytes, std::io::Error>> + Send>>, finalize: Option<StreamFinalizer>) -> Self {
        FinalizingStream { inner, finalize }
    }

    fn spawn_finalize(&mut self) {
        if let Some(finalize) = self.finalize.take() {
            tokio::spawn(finalize.finish());
        }
    }
}

impl Stream for FinalizingStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(None) = next {
            self.spawn_finalize();
        }
        next
    }
}

impl Drop for FinalizingStream {
    fn drop(&mut self) {
        self.spawn_finalize();
    }
}
