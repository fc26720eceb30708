//! Error handler & response builder (L13) — spec.md §4.13. Normalizes
//! any [`PipelineError`] into a client-facing status/headers/body triple,
//! consulting the L7 override table for upstream failures. Grounded on
//! `gproxy-router/src/error.rs`'s status-then-shape branching, widened
//! from one client format to the three validated shapes plus the
//! rate-limit body (§6.2).

use gw_limits::rate_limit::LimitType as RateLimitKind;
use gw_protocol::Format;
use gw_rules::error_rule::ErrorRuleCache;
use gw_rules::override_shape::{self, LimitType as WireLimitType, RateLimitBody};
use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;
use time::OffsetDateTime;

use crate::auth::AuthError;
use crate::pipeline::PipelineError;

pub struct ErrorResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Builds the final response for a failed request. `upstream_request_id`
/// is forwarded transparently when the failure came from an upstream
/// call that returned one.
pub fn build(
    error: &PipelineError,
    client_format: Format,
    error_rules: &ErrorRuleCache,
    now: OffsetDateTime,
) -> ErrorResponse {
    match error {
        PipelineError::RateLimited(denial) => rate_limit_response(denial, now),
        PipelineError::Auth(auth_error) => generic_response(auth_status(auth_error), client_format, auth_error.to_string(), None),
        PipelineError::Upstream(proxy_error) => upstream_response(proxy_error, client_format, error_rules),
        PipelineError::NoCandidates => generic_response(503, client_format, error.to_string(), None),
        PipelineError::Timeout => generic_response(504, client_format, error.to_string(), None),
        PipelineError::Storage(_) => generic_response(500, client_format, "internal error".to_string(), None),
    }
}

fn auth_status(_error: &AuthError) -> u16 {
    // spec.md §7: "Auth failure: 401 immediately" — every AuthError
    // variant collapses to the same status; the message differs.
    401
}

/// §4.13's `ProxyError` branch: upstream status if present, else the
/// last non-200 entry in the provider chain, else 500. An `ErrorRule`
/// match overrides the body and/or status.
fn upstream_response(error: &gw_provider_core::retry::ProxyError, client_format: Format, error_rules: &ErrorRuleCache) -> ErrorResponse {
    let status = if error.status.as_u16() != 0 {
        error.status.as_u16()
    } else {
        500
    };
    let upstream_text = error
        .upstream_body
        .as_deref()
        .map(|body| String::from_utf8_lossy(body).into_owned())
        .unwrap_or_default();

    let classification = error_rules.classify(&upstream_text);
    let response = match classification {
        Some(result) => apply_classification(result, status, client_format, &upstream_text),
        None => generic_response(status, client_format, default_message(status, &upstream_text), None),
    };

    if let Some(request_id) = &error.upstream_request_id {
        let mut response = response;
        response.headers.push(("x-request-id".to_string(), request_id.clone()));
        response
    } else {
        response
    }
}

fn default_message(status: u16, upstream_text: &str) -> String {
    if upstream_text.is_empty() {
        format!("upstream request failed with status {status}")
    } else {
        upstream_text.to_string()
    }
}

fn apply_classification(
    result: gw_rules::error_rule::ClassificationResult,
    fallback_status: u16,
    client_format: Format,
    upstream_text: &str,
) -> ErrorResponse {
    let status = result.override_status_code.unwrap_or(fallback_status);

    match &result.override_response {
        Some(template) => {
            // Re-validated at emission time per spec.md §6.2, even though
            // the rule was already validated on write.
            match override_shape::validate_override_body(template) {
                Ok(_) => {
                    let body = override_shape::apply_message_fallback(template.clone(), upstream_text);
                    ErrorResponse { status, headers: Vec::new(), body }
                }
                Err(_) => generic_response(status, client_format, default_message(status, upstream_text), None),
            }
        }
        None => generic_response(status, client_format, default_message(status, upstream_text), None),
    }
}

/// The default generic envelope for the client's own format, with
/// `error.type` inferred from `status` per spec.md §4.13's table.
fn generic_response(status: u16, client_format: Format, message: String, request_id: Option<String>) -> ErrorResponse {
    let error_type = override_shape::default_error_type(status);
    let body = match client_format {
        Format::Claude => serde_json::json!({
            "type": "error",
            "error": {"type": error_type, "message": message},
            "request_id": request_id,
        }),
        Format::Gemini | Format::GeminiCli => serde_json::json!({
            "error": {
                "code": status,
                "message": message,
                "status": error_type.to_uppercase(),
            }
        }),
        Format::OpenAi | Format::Codex => serde_json::json!({
            "error": {"type": error_type, "message": message, "param": Value::Null, "code": Value::Null}
        }),
    };
    ErrorResponse { status, headers: Vec::new(), body }
}

fn rate_limit_response(denial: &gw_limits::rate_limit::RateLimitDenial, now: OffsetDateTime) -> ErrorResponse {
    let reset_at = denial.reset_time.unwrap_or_else(|| default_reset(denial.limit_type, now));
    let retry_after = (reset_at - now).whole_seconds().max(0);
    let current = denial.current.to_f64().unwrap_or(0.0);
    let limit = denial.limit.to_f64().unwrap_or(0.0);
    let remaining = (limit - current).max(0.0);
    let wire_type = wire_limit_type(denial.limit_type);
    let wire_type_str = limit_type_wire_string(wire_type);

    let body = RateLimitBody::new(
        wire_type,
        current,
        limit,
        reset_at.format(&time::format_description::well_known::Rfc3339).unwrap_or_default(),
        format!("rate limit exceeded: {wire_type_str}"),
    );

    ErrorResponse {
        status: 429,
        headers: vec![
            ("X-RateLimit-Limit".to_string(), limit.to_string()),
            ("X-RateLimit-Remaining".to_string(), remaining.to_string()),
            ("X-RateLimit-Reset".to_string(), reset_at.unix_timestamp().to_string()),
            ("X-RateLimit-Type".to_string(), wire_type_str),
            ("Retry-After".to_string(), retry_after.to_string()),
        ],
        body: serde_json::to_value(&body).unwrap_or(Value::Null),
    }
}

/// `WireLimitType`'s own `#[serde(rename_all = "snake_case")]` is the
/// single source of truth for the wire string; serialize through it
/// rather than hand-rolling a second mapping that could drift.
fn limit_type_wire_string(limit_type: WireLimitType) -> String {
    serde_json::to_value(limit_type)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Only `Rpm` carries a natural fixed window (the current minute) when
/// `reset_time` is absent; total-cost and concurrent-session denials
/// clear as soon as the underlying counter drops, so they report "now".
fn default_reset(limit_type: RateLimitKind, now: OffsetDateTime) -> OffsetDateTime {
    match limit_type {
        RateLimitKind::Rpm => {
            let next_minute = (now.minute() as u16 + 1) % 60;
            let rollover = next_minute == 0;
            let at_minute_boundary = now
                .replace_minute(next_minute as u8)
                .and_then(|dt| dt.replace_second(0))
                .unwrap_or(now);
            if rollover { at_minute_boundary + time::Duration::HOUR } else { at_minute_boundary }
        }
        _ => now,
    }
}

/// Maps `gw-limits`'s nine cost/rate counters onto the seven wire
/// `limit_type` values spec.md §6.2 validates against — the cost
/// counters are more granular internally (per 5h/daily/weekly/monthly/
/// total, per user or key) than the wire contract distinguishes.
fn wire_limit_type(limit_type: RateLimitKind) -> WireLimitType {
    match limit_type {
        RateLimitKind::Rpm => WireLimitType::Rpm,
        RateLimitKind::KeyFiveHourCost => WireLimitType::Usd5h,
        RateLimitKind::KeyWeeklyCost => WireLimitType::UsdWeekly,
        RateLimitKind::KeyMonthlyCost => WireLimitType::UsdMonthly,
        RateLimitKind::UserTotalCost | RateLimitKind::KeyTotalCost => WireLimitType::UsdTotal,
        RateLimitKind::UserDailyCost | RateLimitKind::KeyDailyCost => WireLimitType::DailyQuota,
        RateLimitKind::KeyConcurrentSessions => WireLimitType::ConcurrentSessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_limits::rate_limit::RateLimitDenial;
    use rust_decimal::Decimal;
    use time::macros::datetime;

    #[test]
    fn rpm_denial_yields_429_with_headers() {
        let denial = RateLimitDenial {
            limit_type: RateLimitKind::Rpm,
            current: Decimal::from(4),
            limit: Decimal::from(3),
            reset_time: None,
        };
        let now = datetime!(2026-07-28 10:00:30 UTC);
        let response = rate_limit_response(&denial, now);
        assert_eq!(response.status, 429);
        let retry_after: i64 = response
            .headers
            .iter()
            .find(|(name, _)| name == "Retry-After")
            .unwrap()
            .1
            .parse()
            .unwrap();
        assert!(retry_after <= 60);
        assert!(response.headers.iter().any(|(name, _)| name == "X-RateLimit-Remaining"));
    }

    #[test]
    fn generic_claude_response_infers_error_type_from_status() {
        let response = generic_response(404, Format::Claude, "missing".to_string(), None);
        assert_eq!(response.body["error"]["type"], "not_found_error");
    }

    #[test]
    fn generic_openai_response_shape() {
        let response = generic_response(500, Format::OpenAi, "boom".to_string(), None);
        assert_eq!(response.body["error"]["type"], "internal_server_error");
        assert_eq!(response.body["error"]["message"], "boom");
    }

    #[test]
    fn auth_errors_always_map_to_401() {
        assert_eq!(auth_status(&AuthError::MissingCredential), 401);
        assert_eq!(auth_status(&AuthError::UnknownKey), 401);
    }
}
