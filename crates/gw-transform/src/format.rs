//! Client wire-format detection (L10). Path match first, body sniff on
//! fallback. Mirrors the teacher's path-segment classifier but detects
//! the client's *wire format* rather than a provider's vendor type.

use gw_protocol::Format;
use serde_json::Value;

pub fn detect_from_path(path: &str) -> Option<Format> {
    if path.starts_with("/v1/messages") {
        return Some(Format::Claude);
    }
    if path == "/v1/responses" || path.starts_with("/v1/responses") {
        return Some(Format::Codex);
    }
    if path.starts_with("/v1/chat/completions") {
        return Some(Format::OpenAi);
    }
    if path.starts_with("/v1beta/models/") {
        return Some(Format::Gemini);
    }
    if path.starts_with("/v1internal/models/") {
        return Some(Format::GeminiCli);
    }
    None
}

/// Fallback body sniffing when the path gave no match.
pub fn detect_from_body(body: &Value) -> Format {
    let Some(object) = body.as_object() else {
        return Format::Claude;
    };

    if object.contains_key("contents") && !object.contains_key("request") {
        return Format::Gemini;
    }
    if object.contains_key("request") {
        return Format::GeminiCli;
    }
    if object.contains_key("input") {
        return Format::Codex;
    }
    if object.contains_key("messages") {
        if object.get("system").is_some_and(|v| v.is_array()) {
            return Format::Claude;
        }
        return Format::OpenAi;
    }
    Format::Claude
}

pub fn detect(path: &str, body: &Value) -> Format {
    detect_from_path(path).unwrap_or_else(|| detect_from_body(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_takes_precedence_over_body() {
        assert_eq!(
            detect("/v1/chat/completions", &serde_json::json!({"contents": []})),
            Format::OpenAi
        );
    }

    #[test]
    fn sniffs_gemini_cli_envelope() {
        let body = serde_json::json!({"model": "gemini-2.5-pro", "request": {"contents": []}});
        assert_eq!(detect("/unknown", &body), Format::GeminiCli);
    }

    #[test]
    fn sniffs_claude_from_top_level_system_array() {
        let body = serde_json::json!({"messages": [], "system": [{"type": "text", "text": "x"}]});
        assert_eq!(detect("/unknown", &body), Format::Claude);
    }

    #[test]
    fn unknown_shape_defaults_to_claude() {
        assert_eq!(detect("/unknown", &serde_json::json!({})), Format::Claude);
    }
}
