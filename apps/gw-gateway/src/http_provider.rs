//! Generic HTTP-forwarding [`Provider`]. Grounded on
//! `gproxy-core/src/upstream_client/mod.rs::WreqUpstreamClient` (client-
//! per-proxy cache, `bytes_stream` → channel conversion for streaming
//! responses) and `gproxy-provider-impl/src/providers/custom/mod.rs`
//! (credential-header-by-provider-type, no vendor OAuth). spec.md's
//! Non-goals exclude implementing the LLMs themselves, so this is the
//! only `Provider` impl the gateway needs — one generic forward per
//! provider type, not one crate per vendor.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use gw_protocol::sse::SseParser;
use gw_provider_core::model::ProviderConfig;
use gw_provider_core::model::ProviderType;
use gw_provider_core::provider::{Provider, ProxyRequest, ProxyResponse, StreamBody, UpstreamContext, UpstreamPassthroughError};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpProvider {
    client: wreq::Client,
    config: ProviderConfig,
}

impl HttpProvider {
    pub fn new(client: wreq::Client, config: ProviderConfig) -> Self {
        HttpProvider { client, config }
    }

    fn target_url(&self, req: &ProxyRequest) -> String {
        let base = self.config.url.trim_end_matches('/');
        match self.config.provider_type {
            ProviderType::Gemini | ProviderType::GeminiCli => format!("{base}{}", req.url_path),
            ProviderType::Claude | ProviderType::ClaudeAuth => format!("{base}/v1/messages"),
            ProviderType::Codex => format!("{base}/v1/responses"),
            ProviderType::OpenAiCompatible => format!("{base}/v1/chat/completions"),
        }
    }

    fn apply_auth(&self, headers: &mut HeaderMap) {
        headers.remove("authorization");
        headers.remove("x-api-key");
        headers.remove("x-goog-api-key");
        headers.remove("host");
        headers.remove("content-length");

        let credential = &self.config.credential;
        match self.config.provider_type {
            ProviderType::Claude | ProviderType::ClaudeAuth => {
                if let Ok(value) = HeaderValue::from_str(credential) {
                    headers.insert(HeaderName::from_static("x-api-key"), value);
                }
            }
            ProviderType::Codex | ProviderType::OpenAiCompatible => {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {credential}")) {
                    headers.insert(http::header::AUTHORIZATION, value);
                }
            }
            ProviderType::Gemini | ProviderType::GeminiCli => {
                if let Ok(value) = HeaderValue::from_str(credential) {
                    headers.insert(HeaderName::from_static("x-goog-api-key"), value);
                }
            }
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn call(&self, req: ProxyRequest, ctx: UpstreamContext) -> Result<ProxyResponse, UpstreamPassthroughError> {
        let url = self.target_url(&req);
        let mut headers = req.headers;
        self.apply_auth(&mut headers);
        if let Some(user_agent) = &ctx.user_agent
            && let Ok(value) = HeaderValue::from_str(user_agent)
        {
            headers.insert(http::header::USER_AGENT, value);
        }

        let body = serde_json::to_vec(&req.body).map_err(|error| {
            UpstreamPassthroughError::from_status(StatusCode::INTERNAL_SERVER_ERROR, error.to_string(), false)
        })?;

        let mut builder = self.client.request(wreq::Method::POST, &url);
        for (name, value) in headers.iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        builder = builder.body(body);
        if let Some(proxy_url) = &self.config.proxy.proxy_url
            && let Ok(proxy) = wreq::Proxy::all(proxy_url)
        {
            builder = builder.proxy(proxy);
        }

        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let response_headers = response.headers().clone();
        let upstream_request_id = response
            .headers()
            .get("x-request-id")
            .or_else(|| response.headers().get("request-id"))
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        // `req.stream` is the client's pre-translation preference; the body
        // actually sent upstream (`req.body`) can diverge from it, as
        // `openai2codex::transform_request` unconditionally forces
        // `"stream": true`. Decide the branch off what was really sent.
        let upstream_will_stream = req
            .body
            .get("stream")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(req.stream);

        let is_success = status.is_success();
        if !is_success {
            let bytes = response.bytes().await.map_err(map_transport_error)?;
            return Err(UpstreamPassthroughError {
                status,
                headers: response_headers,
                body: bytes,
                retryable: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
                upstream_request_id,
            });
        }

        if !upstream_will_stream {
            let bytes = response.bytes().await.map_err(map_transport_error)?;
            return Ok(ProxyResponse::Json { status, headers: response_headers, body: bytes });
        }

        if !req.stream {
            let bytes = response.bytes().await.map_err(map_transport_error)?;
            let aggregated = aggregate_sse_body(&bytes).unwrap_or(bytes);
            return Ok(ProxyResponse::Json { status, headers: response_headers, body: aggregated });
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(STREAM_IDLE_TIMEOUT, stream.next()).await;
                let Ok(item) = next else {
                    break;
                };
                let Some(item) = item else {
                    break;
                };
                let Ok(chunk) = item else {
                    break;
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });
        let stream = tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok::<Bytes, io::Error>);
        Ok(ProxyResponse::Stream {
            status,
            headers: response_headers,
            body: StreamBody::new("text/event-stream", stream),
        })
    }
}

/// Buffers a forced-stream upstream response into the single JSON body
/// a non-streaming client expects. Provider SSE streams terminate with
/// an event carrying the complete native response object (Codex's
/// `response.completed`); the last JSON-parseable, non-`[DONE]` event
/// data is that complete object. Returns `None` (caller falls back to
/// the raw bytes) when no such event is found.
fn aggregate_sse_body(bytes: &Bytes) -> Option<Bytes> {
    let mut parser = SseParser::new();
    let mut events = parser.push_bytes(bytes);
    events.extend(parser.finish());

    events
        .into_iter()
        .rev()
        .find(|event| event.data != "[DONE]" && serde_json::from_str::<serde_json::Value>(&event.data).is_ok())
        .map(|event| Bytes::from(event.data))
}

fn map_transport_error(error: wreq::Error) -> UpstreamPassthroughError {
    let retryable = error.is_timeout() || error.is_connect() || error.is_request();
    UpstreamPassthroughError::from_status(StatusCode::BAD_GATEWAY, error.to_string(), retryable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_sse_body_picks_last_json_event_over_done_sentinel() {
        let body = Bytes::from(
            "event: response.output_text.delta\ndata: {\"delta\":\"hi\"}\n\n\
             event: response.completed\ndata: {\"id\":\"resp_1\",\"status\":\"completed\"}\n\n",
        );
        let aggregated = aggregate_sse_body(&body).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&aggregated).unwrap();
        assert_eq!(value["id"], "resp_1");
    }

    #[test]
    fn aggregate_sse_body_ignores_done_sentinel() {
        let body = Bytes::from("data: {\"id\":\"resp_1\"}\n\ndata: [DONE]\n\n");
        let aggregated = aggregate_sse_body(&body).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&aggregated).unwrap();
        assert_eq!(value["id"], "resp_1");
    }

    #[test]
    fn aggregate_sse_body_returns_none_without_json_event() {
        let body = Bytes::from("data: [DONE]\n\n");
        assert!(aggregate_sse_body(&body).is_none());
    }
}
