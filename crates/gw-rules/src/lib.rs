pub mod error_rule;
pub mod override_shape;
pub mod request_filter;

pub use error_rule::{ClassificationResult, CompiledRule, ErrorRule, ErrorRuleCache, MatchType, RuleSnapshot, RuleValidationError};
pub use override_shape::{
    ClaudeError, ErrorShape, GeminiError, LimitType, OpenAiError, OverrideValidationError,
    RateLimitBody, apply_message_fallback, default_error_type, detect_error_response_format,
    validate_override_body, validate_override_status,
};
pub use request_filter::{FilterAction, FilterError, RequestFilter, RequestFilterCache, apply_filters};
