//! Error classifier & override table (L7). Rules are tried in their
//! ordered sequence, first match wins; the active rule set is an
//! atomically-swapped snapshot refreshed on an external reload event.
//! Grounded on `gproxy-core/src/auth.rs`'s `ArcSwap<AuthSnapshot>` +
//! replace-on-event shape.

use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::override_shape::{ErrorShape, validate_override_body, validate_override_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Contains,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRule {
    pub id: i64,
    pub priority: i32,
    pub match_type: MatchType,
    pub pattern: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_response: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleValidationError {
    #[error("regex pattern failed the ReDoS safety check: {0}")]
    UnsafeRegex(String),
    #[error(transparent)]
    Override(#[from] crate::override_shape::OverrideValidationError),
}

/// Validated, ready-to-evaluate form of an [`ErrorRule`] — the regex is
/// pre-compiled once instead of per request.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub id: i64,
    pub priority: i32,
    pub category: String,
    pub override_status_code: Option<u16>,
    pub override_response: Option<Value>,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Contains(String),
    Regex(Regex),
}

impl CompiledRule {
    pub fn compile(rule: &ErrorRule) -> Result<Self, RuleValidationError> {
        if let Some(status) = rule.override_status_code {
            validate_override_status(status)?;
        }
        if let Some(response) = &rule.override_response {
            validate_override_body(response)?;
        }

        let matcher = match rule.match_type {
            MatchType::Exact => Matcher::Exact(rule.pattern.clone()),
            MatchType::Contains => Matcher::Contains(rule.pattern.clone()),
            MatchType::Regex => {
                check_redos_safety(&rule.pattern)?;
                let regex = Regex::new(&rule.pattern)
                    .map_err(|error| RuleValidationError::UnsafeRegex(error.to_string()))?;
                Matcher::Regex(regex)
            }
        };

        Ok(CompiledRule {
            id: rule.id,
            priority: rule.priority,
            category: rule.category.clone(),
            override_status_code: rule.override_status_code,
            override_response: rule.override_response.clone(),
            matcher,
        })
    }

    fn is_match(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(pattern) => text == pattern,
            Matcher::Contains(pattern) => text.contains(pattern.as_str()),
            Matcher::Regex(regex) => regex.is_match(text),
        }
    }
}

/// `regex`'s RE2-style engine never backtracks, so there is no
/// exponential-time construction to guard against; the write-time
/// check only rejects patterns that would blow up in *size* (the one
/// way this engine can still be made to do excess work).
fn check_redos_safety(pattern: &str) -> Result<(), RuleValidationError> {
    const MAX_PATTERN_LEN: usize = 512;
    if pattern.len() > MAX_PATTERN_LEN {
        return Err(RuleValidationError::UnsafeRegex(format!(
            "pattern exceeds {MAX_PATTERN_LEN} bytes"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    rules: Vec<CompiledRule>,
}

impl RuleSnapshot {
    pub fn compile(rules: &[ErrorRule]) -> Self {
        let mut ordered = rules.to_vec();
        ordered.sort_by_key(|rule| (rule.priority, rule.id));

        let mut compiled = Vec::with_capacity(ordered.len());
        for rule in &ordered {
            match CompiledRule::compile(rule) {
                Ok(rule) => compiled.push(rule),
                Err(error) => {
                    tracing::warn!(event = "error_rule_rejected", rule_id = rule.id, %error);
                }
            }
        }
        RuleSnapshot { rules: compiled }
    }

    pub fn classify(&self, upstream_text: &str) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.is_match(upstream_text))
    }
}

/// Reloadable error-rule cache; fails open (empty snapshot ⇒ no
/// classification, never a pipeline abort) per spec.md §7.
#[derive(Debug)]
pub struct ErrorRuleCache {
    snapshot: ArcSwap<RuleSnapshot>,
}

impl Default for ErrorRuleCache {
    fn default() -> Self {
        ErrorRuleCache {
            snapshot: ArcSwap::from_pointee(RuleSnapshot::default()),
        }
    }
}

impl ErrorRuleCache {
    pub fn new(rules: &[ErrorRule]) -> Self {
        ErrorRuleCache {
            snapshot: ArcSwap::from_pointee(RuleSnapshot::compile(rules)),
        }
    }

    pub fn reload(&self, rules: &[ErrorRule]) {
        self.snapshot.store(Arc::new(RuleSnapshot::compile(rules)));
    }

    pub fn classify(&self, upstream_text: &str) -> Option<ClassificationResult> {
        let snapshot = self.snapshot.load();
        snapshot.classify(upstream_text).map(|rule| ClassificationResult {
            category: rule.category.clone(),
            override_status_code: rule.override_status_code,
            override_response: rule.override_response.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub category: String,
    pub override_status_code: Option<u16>,
    pub override_response: Option<Value>,
}

impl ClassificationResult {
    pub fn response_shape(&self) -> Option<ErrorShape> {
        self.override_response
            .as_ref()
            .and_then(crate::override_shape::detect_error_response_format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: i64, priority: i32, match_type: MatchType, pattern: &str) -> ErrorRule {
        ErrorRule {
            id,
            priority,
            match_type,
            pattern: pattern.to_string(),
            category: "overloaded".to_string(),
            override_status_code: None,
            override_response: None,
        }
    }

    #[test]
    fn first_match_wins_by_priority_then_id() {
        let rules = vec![
            rule(2, 1, MatchType::Contains, "overloaded"),
            rule(1, 1, MatchType::Contains, "overloaded"),
        ];
        let cache = ErrorRuleCache::new(&rules);
        let result = cache.classify("upstream overloaded, retry later").unwrap();
        assert_eq!(result.category, "overloaded");
    }

    #[test]
    fn unmatched_text_fails_open() {
        let cache = ErrorRuleCache::new(&[rule(1, 1, MatchType::Exact, "boom")]);
        assert!(cache.classify("something else").is_none());
    }

    #[test]
    fn regex_rule_matches() {
        let cache = ErrorRuleCache::new(&[rule(1, 1, MatchType::Regex, r"rate[_ ]limit")]);
        assert!(cache.classify("hit a rate_limit wall").is_some());
    }

    #[test]
    fn oversized_regex_pattern_is_rejected_at_compile() {
        let huge = "a".repeat(600);
        let rules = vec![rule(1, 1, MatchType::Regex, &huge)];
        let snapshot = RuleSnapshot::compile(&rules);
        assert!(snapshot.classify(&huge).is_none());
    }
}
