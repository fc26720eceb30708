//! Request filter engine (L8): ordered header/body mutations applied
//! after authentication, before dispatch. A rule that fails is logged
//! and skipped — it never aborts the pipeline (spec.md §4.8).

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error_rule::MatchType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFilter {
    pub id: i64,
    pub priority: i32,
    pub action: FilterAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "target")]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    HeaderRemove { name: String },
    HeaderSet { name: String, value: String },
    BodyJsonPath { path: String, value: Value },
    BodyTextReplace {
        target: String,
        replacement: String,
        #[serde(default = "default_match_type")]
        match_type: MatchType,
    },
}

fn default_match_type() -> MatchType {
    MatchType::Contains
}

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("json_path `{0}` could not be navigated")]
    BadPath(String),
    #[error("regex `{0}` failed to compile: {1}")]
    BadRegex(String, regex::Error),
}

/// Applies every filter in `(priority, id)` order; mutations accumulate
/// onto `headers` and `body` in place. Returns the filters that
/// failed, purely for logging — failures never abort the caller.
pub fn apply_filters(
    filters: &[RequestFilter],
    headers: &mut http::HeaderMap,
    body: &mut Value,
) -> Vec<(i64, FilterError)> {
    let mut ordered: Vec<&RequestFilter> = filters.iter().collect();
    ordered.sort_by_key(|filter| (filter.priority, filter.id));

    let mut errors = Vec::new();
    for filter in ordered {
        if let Err(error) = apply_one(filter, headers, body) {
            tracing::warn!(event = "request_filter_failed", filter_id = filter.id, %error);
            errors.push((filter.id, error));
        }
    }
    errors
}

fn apply_one(
    filter: &RequestFilter,
    headers: &mut http::HeaderMap,
    body: &mut Value,
) -> Result<(), FilterError> {
    match &filter.action {
        FilterAction::HeaderRemove { name } => {
            if let Ok(name) = http::HeaderName::try_from(name.as_str()) {
                headers.remove(name);
            }
            Ok(())
        }
        FilterAction::HeaderSet { name, value } => {
            let name = http::HeaderName::try_from(name.as_str())
                .map_err(|_| FilterError::BadPath(name.clone()))?;
            let value = http::HeaderValue::from_str(value)
                .map_err(|_| FilterError::BadPath(value.clone()))?;
            headers.insert(name, value);
            Ok(())
        }
        FilterAction::BodyJsonPath { path, value } => set_json_path(body, path, value.clone()),
        FilterAction::BodyTextReplace {
            target,
            replacement,
            match_type,
        } => {
            replace_strings(body, target, replacement, *match_type)?;
            Ok(())
        }
    }
}

/// Navigates a dotted/indexed path (`a.b[2].c`), creating objects and
/// arrays as needed, and sets the terminal key.
fn set_json_path(root: &mut Value, path: &str, value: Value) -> Result<(), FilterError> {
    let segments = parse_path(path).ok_or_else(|| FilterError::BadPath(path.to_string()))?;
    if segments.is_empty() {
        return Err(FilterError::BadPath(path.to_string()));
    }

    let mut cursor = root;
    for (i, segment) in segments.iter().enumerate() {
        let last = i == segments.len() - 1;
        cursor = match segment {
            PathSegment::Key(key) => {
                if !cursor.is_object() {
                    *cursor = Value::Object(Default::default());
                }
                let object = cursor.as_object_mut().unwrap();
                if last {
                    object.insert(key.clone(), value);
                    return Ok(());
                }
                object.entry(key.clone()).or_insert(Value::Null)
            }
            PathSegment::Index(index) => {
                if !cursor.is_array() {
                    *cursor = Value::Array(Vec::new());
                }
                let array = cursor.as_array_mut().unwrap();
                while array.len() <= *index {
                    array.push(Value::Null);
                }
                if last {
                    array[*index] = value;
                    return Ok(());
                }
                &mut array[*index]
            }
        };
    }
    Ok(())
}

enum PathSegment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Option<Vec<PathSegment>> {
    let mut segments = Vec::new();
    for raw in path.split('.') {
        if raw.is_empty() {
            return None;
        }
        let mut rest = raw;
        if let Some(bracket) = rest.find('[') {
            let key = &rest[..bracket];
            if !key.is_empty() {
                segments.push(PathSegment::Key(key.to_string()));
            }
            rest = &rest[bracket..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']')?;
                let index: usize = stripped[..close].parse().ok()?;
                segments.push(PathSegment::Index(index));
                rest = &stripped[close + 1..];
            }
        } else {
            segments.push(PathSegment::Key(rest.to_string()));
        }
    }
    Some(segments)
}

/// Recursively walks every string in `body`, replacing `target`
/// per `match_type`; the caller is responsible for re-serializing the
/// wire buffer from the mutated `Value`.
fn replace_strings(
    value: &mut Value,
    target: &str,
    replacement: &str,
    match_type: MatchType,
) -> Result<(), FilterError> {
    match value {
        Value::String(text) => {
            *text = replace_in_string(text, target, replacement, match_type)?;
        }
        Value::Array(items) => {
            for item in items {
                replace_strings(item, target, replacement, match_type)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                replace_strings(item, target, replacement, match_type)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn replace_in_string(
    text: &str,
    target: &str,
    replacement: &str,
    match_type: MatchType,
) -> Result<String, FilterError> {
    Ok(match match_type {
        MatchType::Exact => {
            if text == target {
                replacement.to_string()
            } else {
                text.to_string()
            }
        }
        MatchType::Contains => text.replace(target, replacement),
        MatchType::Regex => {
            let regex = regex::Regex::new(target)
                .map_err(|error| FilterError::BadRegex(target.to_string(), error))?;
            regex.replace_all(text, replacement).into_owned()
        }
    })
}

/// Reloadable filter cache, same snapshot-swap shape as
/// [`crate::error_rule::ErrorRuleCache`]; fails open on an empty
/// snapshot (no filters applied, not a pipeline abort).
#[derive(Debug, Default)]
pub struct RequestFilterCache {
    snapshot: ArcSwap<Vec<RequestFilter>>,
}

impl RequestFilterCache {
    pub fn new(filters: Vec<RequestFilter>) -> Self {
        RequestFilterCache {
            snapshot: ArcSwap::from_pointee(filters),
        }
    }

    pub fn reload(&self, filters: Vec<RequestFilter>) {
        self.snapshot.store(Arc::new(filters));
    }

    pub fn apply(&self, headers: &mut http::HeaderMap, body: &mut Value) -> Vec<(i64, FilterError)> {
        apply_filters(&self.snapshot.load(), headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_path_creates_nested_structure() {
        let mut body = serde_json::json!({});
        set_json_path(&mut body, "a.b[2].c", Value::String("x".to_string())).unwrap();
        assert_eq!(body["a"]["b"][2]["c"], "x");
    }

    #[test]
    fn text_replace_walks_nested_strings() {
        let mut body = serde_json::json!({"messages": [{"content": "hello world"}]});
        replace_strings(&mut body, "world", "there", MatchType::Contains).unwrap();
        assert_eq!(body["messages"][0]["content"], "hello there");
    }

    #[test]
    fn ordered_by_priority_then_id() {
        let filters = vec![
            RequestFilter {
                id: 2,
                priority: 0,
                action: FilterAction::HeaderSet {
                    name: "x-trace".to_string(),
                    value: "second".to_string(),
                },
            },
            RequestFilter {
                id: 1,
                priority: 0,
                action: FilterAction::HeaderSet {
                    name: "x-trace".to_string(),
                    value: "first".to_string(),
                },
            },
        ];
        let mut headers = http::HeaderMap::new();
        let mut body = Value::Null;
        apply_filters(&filters, &mut headers, &mut body);
        assert_eq!(headers.get("x-trace").unwrap(), "second");
    }

    #[test]
    fn bad_json_path_is_reported_not_fatal() {
        let filters = vec![RequestFilter {
            id: 1,
            priority: 0,
            action: FilterAction::BodyJsonPath {
                path: "".to_string(),
                value: Value::Null,
            },
        }];
        let mut headers = http::HeaderMap::new();
        let mut body = Value::Null;
        let errors = apply_filters(&filters, &mut headers, &mut body);
        assert_eq!(errors.len(), 1);
    }
}
