//! The three validated error-body shapes and the rate-limit body
//! (spec.md §6.2). `detect_error_response_format` distinguishes them by
//! a precise schema check, not by client format — an admin override can
//! target any of the three regardless of which client is being served.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_OVERRIDE_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorShape {
    Claude,
    Gemini,
    OpenAi,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaudeError {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: ClaudeErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaudeErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiError {
    pub error: GeminiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiErrorBody {
    pub code: i32,
    pub message: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiError {
    pub error: OpenAiErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    Rpm,
    /// `#[serde(rename)]` needed: the derived snake_case rule only
    /// inserts `_` before uppercase letters, so `Usd5h` would otherwise
    /// serialize as `usd5h` instead of spec.md §6.2's `usd_5h`.
    #[serde(rename = "usd_5h")]
    Usd5h,
    UsdWeekly,
    UsdMonthly,
    UsdTotal,
    DailyQuota,
    ConcurrentSessions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitBody {
    pub error: RateLimitErrorBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub code: String,
    pub limit_type: LimitType,
    /// `f64`, not `i64`: several limit types (the cost-based ones) carry
    /// fractional USD amounts, not integer counts.
    pub current: f64,
    pub limit: f64,
    pub reset_time: String,
}

impl RateLimitBody {
    pub fn new(limit_type: LimitType, current: f64, limit: f64, reset_time: String, message: impl Into<String>) -> Self {
        RateLimitBody {
            error: RateLimitErrorBody {
                kind: "rate_limit_error".to_string(),
                message: message.into(),
                code: "rate_limit_exceeded".to_string(),
                limit_type,
                current,
                limit,
                reset_time,
            },
        }
    }
}

/// Schema-based shape detection — not every field needs to be present,
/// only the discriminating ones spec.md names.
pub fn detect_error_response_format(body: &Value) -> Option<ErrorShape> {
    let object = body.as_object()?;

    if object.get("type").and_then(|v| v.as_str()) == Some("error")
        && object
            .get("error")
            .and_then(|e| e.as_object())
            .is_some_and(|e| e.contains_key("type"))
    {
        return Some(ErrorShape::Claude);
    }

    if let Some(error) = object.get("error").and_then(|e| e.as_object())
        && error.get("code").is_some_and(|v| v.is_number())
        && error.get("status").is_some_and(|v| v.is_string())
    {
        return Some(ErrorShape::Gemini);
    }

    if !object.contains_key("type")
        && let Some(error) = object.get("error").and_then(|e| e.as_object())
        && error.get("type").is_some_and(|v| v.is_string())
        && error.get("message").is_some_and(|v| v.is_string())
    {
        return Some(ErrorShape::OpenAi);
    }

    None
}

#[derive(Debug, thiserror::Error)]
pub enum OverrideValidationError {
    #[error("override body exceeds {MAX_OVERRIDE_BYTES} bytes")]
    TooLarge,
    #[error("override body did not match any of the Claude/Gemini/OpenAI error shapes")]
    UnrecognizedShape,
    #[error("override status code {0} is outside [400,599]")]
    StatusOutOfRange(u16),
}

/// Validated both on write (when an admin saves the rule) and again at
/// response time before emission.
pub fn validate_override_body(body: &Value) -> Result<ErrorShape, OverrideValidationError> {
    let serialized = serde_json::to_vec(body).unwrap_or_default();
    if serialized.len() > MAX_OVERRIDE_BYTES {
        return Err(OverrideValidationError::TooLarge);
    }
    detect_error_response_format(body).ok_or(OverrideValidationError::UnrecognizedShape)
}

pub fn validate_override_status(status: u16) -> Result<(), OverrideValidationError> {
    if (400..=599).contains(&status) {
        Ok(())
    } else {
        Err(OverrideValidationError::StatusOutOfRange(status))
    }
}

/// `error.message = ""` in a stored override template substitutes the
/// original upstream/pipeline message at emission time.
pub fn apply_message_fallback(mut body: Value, original_message: &str) -> Value {
    if let Some(error) = body.get_mut("error").and_then(|e| e.as_object_mut())
        && error.get("message").and_then(|v| v.as_str()) == Some("")
    {
        error.insert(
            "message".to_string(),
            Value::String(original_message.to_string()),
        );
    }
    body
}

/// Default `error.type` per shape, inferred from an HTTP status
/// (spec.md §4.13).
pub fn default_error_type(status: u16) -> &'static str {
    match status {
        400 => "invalid_request_error",
        401 => "authentication_error",
        403 => "permission_error",
        404 => "not_found_error",
        429 => "rate_limit_error",
        500 => "internal_server_error",
        502 => "bad_gateway_error",
        503 => "service_unavailable_error",
        504 => "gateway_timeout_error",
        _ => "api_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_5h_serializes_with_underscore_before_digit() {
        let value = serde_json::to_value(LimitType::Usd5h).unwrap();
        assert_eq!(value, "usd_5h");
    }

    #[test]
    fn detects_claude_shape() {
        let body = serde_json::json!({"type": "error", "error": {"type": "not_found_error", "message": "x"}});
        assert_eq!(detect_error_response_format(&body), Some(ErrorShape::Claude));
    }

    #[test]
    fn detects_gemini_shape() {
        let body = serde_json::json!({"error": {"code": 404, "message": "x", "status": "NOT_FOUND"}});
        assert_eq!(detect_error_response_format(&body), Some(ErrorShape::Gemini));
    }

    #[test]
    fn detects_openai_shape() {
        let body = serde_json::json!({"error": {"type": "invalid_request_error", "message": "x"}});
        assert_eq!(detect_error_response_format(&body), Some(ErrorShape::OpenAi));
    }

    #[test]
    fn rejects_oversized_override() {
        let big_message = "a".repeat(MAX_OVERRIDE_BYTES + 1);
        let body = serde_json::json!({"error": {"type": "invalid_request_error", "message": big_message}});
        assert!(matches!(
            validate_override_body(&body),
            Err(OverrideValidationError::TooLarge)
        ));
    }

    #[test]
    fn empty_message_falls_back_to_original() {
        let body = serde_json::json!({"error": {"type": "invalid_request_error", "message": ""}});
        let filled = apply_message_fallback(body, "boom");
        assert_eq!(filled["error"]["message"], "boom");
    }

    #[test]
    fn status_out_of_range_rejected() {
        assert!(validate_override_status(399).is_err());
        assert!(validate_override_status(600).is_err());
        assert!(validate_override_status(500).is_ok());
    }
}
