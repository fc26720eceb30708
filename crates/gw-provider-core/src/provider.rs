//! Upstream provider abstraction. Grounded on the teacher's
//! `provider.rs` (`trait Provider { async fn call(...) }`) rather than
//! the sibling `provider/mod.rs`'s `UpstreamProvider` (one builder
//! method per operation): the `(from,to)` transform registry in
//! `gw-transform` already turns every request into a single translated
//! body, so one generic `call` suffices instead of per-operation
//! builders.

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use gw_protocol::Format;
use http::{HeaderMap, StatusCode};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub format: Format,
    pub model: String,
    pub body: Value,
    pub headers: HeaderMap,
    pub url_path: String,
    pub stream: bool,
}

pub struct StreamBody {
    pub content_type: &'static str,
    pub stream: Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>,
}

impl std::fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBody")
            .field("content_type", &self.content_type)
            .field("stream", &"<opaque>")
            .finish()
    }
}

impl StreamBody {
    pub fn new<S>(content_type: &'static str, stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, io::Error>> + Send + 'static,
    {
        StreamBody {
            content_type,
            stream: Box::pin(stream),
        }
    }
}

#[derive(Debug)]
pub enum ProxyResponse {
    Json {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Stream {
        status: StatusCode,
        headers: HeaderMap,
        body: StreamBody,
    },
}

#[derive(Debug, Clone)]
pub struct UpstreamPassthroughError {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// `true` for network/timeout/5xx failures that the retry executor
    /// should try the next candidate for; `false` for non-retryable 4xx.
    pub retryable: bool,
    pub upstream_request_id: Option<String>,
}

impl UpstreamPassthroughError {
    pub fn from_status(status: StatusCode, body: impl Into<Bytes>, retryable: bool) -> Self {
        UpstreamPassthroughError {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            retryable,
            upstream_request_id: None,
        }
    }

    pub fn service_unavailable(message: impl Into<Bytes>) -> Self {
        Self::from_status(StatusCode::SERVICE_UNAVAILABLE, message, true)
    }
}

#[derive(Clone)]
pub struct UpstreamContext {
    pub trace_id: String,
    pub provider_id: Option<i64>,
    pub user_agent: Option<String>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn call(
        &self,
        req: ProxyRequest,
        ctx: UpstreamContext,
    ) -> Result<ProxyResponse, UpstreamPassthroughError>;
}
