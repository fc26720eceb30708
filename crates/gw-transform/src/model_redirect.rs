//! Model redirector (L9): rewrite the client's requested model to the
//! provider's mapped upstream model before dispatch, and restore it on
//! providers without a mapping so the next upstream sees what the
//! client originally sent. Grounded on the provider-config
//! `modelRedirects` shape implied by the teacher's per-provider model
//! handling (`gproxy-provider-impl/src/provider/*`).

use std::collections::HashMap;
use std::sync::LazyLock;

use gw_protocol::Format;
use regex::Regex;
use serde_json::Value;

/// `{originalModel, redirectedModel, billingModel}` recorded into the
/// provider chain entry for this attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOutcome {
    pub original_model: String,
    pub redirected_model: String,
    pub billing_model: String,
}

static URL_MODEL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/models/([^:/]+)(:[A-Za-z]+)?").unwrap());

/// Apply a provider's model mapping to a request body and, for
/// gemini/gemini-cli providers, to the URL path too.
///
/// `true_original_model` is the first model the client ever asked for,
/// tracked across providers in the attempt loop so a later redirect
/// never bills against an earlier provider's rewrite.
pub fn apply_redirect(
    body: &mut Value,
    path: &mut String,
    format: Format,
    true_original_model: &str,
    mapping: Option<&HashMap<String, String>>,
) -> RedirectOutcome {
    let redirected = mapping.and_then(|m| m.get(true_original_model)).cloned();

    match redirected {
        Some(target) => {
            set_model_fields(body, &target);
            if matches!(format, Format::Gemini | Format::GeminiCli) {
                rewrite_url_model(path, &target);
            }
            RedirectOutcome {
                original_model: true_original_model.to_string(),
                redirected_model: target,
                billing_model: true_original_model.to_string(),
            }
        }
        None => {
            set_model_fields(body, true_original_model);
            if matches!(format, Format::Gemini | Format::GeminiCli) {
                rewrite_url_model(path, true_original_model);
            }
            RedirectOutcome {
                original_model: true_original_model.to_string(),
                redirected_model: true_original_model.to_string(),
                billing_model: true_original_model.to_string(),
            }
        }
    }
}

fn set_model_fields(body: &mut Value, model: &str) {
    if let Some(object) = body.as_object_mut() {
        object.insert("model".to_string(), Value::String(model.to_string()));
        if let Some(inner) = object.get_mut("request").and_then(|v| v.as_object_mut()) {
            inner.insert("model".to_string(), Value::String(model.to_string()));
        }
    }
}

fn rewrite_url_model(path: &mut String, model: &str) {
    if URL_MODEL_PATTERN.is_match(path) {
        *path = URL_MODEL_PATTERN
            .replace(path, |caps: &regex::Captures| {
                let action = caps.get(2).map(|m| m.as_str()).unwrap_or("");
                format!("/models/{model}{action}")
            })
            .into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_body_model_when_mapping_present() {
        let mut mapping = HashMap::new();
        mapping.insert("gpt-4o".to_string(), "gpt-4o-mini".to_string());
        let mut body = serde_json::json!({"model": "gpt-4o"});
        let mut path = "/v1/chat/completions".to_string();
        let outcome = apply_redirect(&mut body, &mut path, Format::OpenAi, "gpt-4o", Some(&mapping));
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(outcome.billing_model, "gpt-4o");
    }

    #[test]
    fn restores_original_model_without_mapping() {
        let mut body = serde_json::json!({"model": "whatever-previous-provider-set"});
        let mut path = "/v1beta/models/whatever:streamGenerateContent".to_string();
        apply_redirect(&mut body, &mut path, Format::Gemini, "gemini-2.5-pro", None);
        assert_eq!(body["model"], "gemini-2.5-pro");
        assert_eq!(path, "/v1beta/models/gemini-2.5-pro:streamGenerateContent");
    }

    #[test]
    fn rewrites_gemini_url_path_model_segment() {
        let mut body = serde_json::json!({});
        let mut path = "/v1internal/models/gemini-1.5-flash:generateContent".to_string();
        let mut mapping = HashMap::new();
        mapping.insert("gemini-1.5-flash".to_string(), "gemini-2.5-flash".to_string());
        apply_redirect(&mut body, &mut path, Format::GeminiCli, "gemini-1.5-flash", Some(&mapping));
        assert_eq!(path, "/v1internal/models/gemini-2.5-flash:generateContent");
    }
}
