use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_filters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub priority: i32,
    pub scope: String,
    pub action: String,
    pub target: String,
    pub match_type: Option<String>,
    pub replacement_text: Option<String>,
    pub replacement_json: Option<Json>,
    pub is_enabled: bool,
}

impl ActiveModelBehavior for ActiveModel {}

/// Raised when a persisted row's `(scope, action)` combination doesn't
/// match any [`gw_rules::FilterAction`] variant, or a required column
/// for that variant is missing.
#[derive(Debug, thiserror::Error)]
pub enum RequestFilterDecodeError {
    #[error("unknown scope/action combination: {0}/{1}")]
    UnknownAction(String, String),
    #[error("row is missing a required column for this action")]
    MissingColumn,
}

impl TryFrom<Model> for gw_rules::RequestFilter {
    type Error = RequestFilterDecodeError;

    fn try_from(row: Model) -> Result<Self, Self::Error> {
        let match_type = |raw: &Option<String>| match raw.as_deref() {
            Some("exact") => gw_rules::MatchType::Exact,
            Some("regex") => gw_rules::MatchType::Regex,
            _ => gw_rules::MatchType::Contains,
        };

        let action = match (row.scope.as_str(), row.action.as_str()) {
            ("header", "remove") => gw_rules::FilterAction::HeaderRemove { name: row.target },
            ("header", "set") => gw_rules::FilterAction::HeaderSet {
                name: row.target,
                value: row.replacement_text.ok_or(RequestFilterDecodeError::MissingColumn)?,
            },
            ("body", "json_path") => gw_rules::FilterAction::BodyJsonPath {
                path: row.target,
                value: row.replacement_json.ok_or(RequestFilterDecodeError::MissingColumn)?,
            },
            ("body", "text_replace") => gw_rules::FilterAction::BodyTextReplace {
                target: row.target,
                replacement: row.replacement_text.ok_or(RequestFilterDecodeError::MissingColumn)?,
                match_type: match_type(&row.match_type),
            },
            (scope, action) => {
                return Err(RequestFilterDecodeError::UnknownAction(scope.to_string(), action.to_string()));
            }
        };

        Ok(gw_rules::RequestFilter {
            id: row.id,
            priority: row.priority,
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(scope: &str, action: &str, target: &str) -> Model {
        Model {
            id: 1,
            priority: 0,
            scope: scope.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            match_type: None,
            replacement_text: Some("value".to_string()),
            replacement_json: Some(serde_json::json!("value")),
            is_enabled: true,
        }
    }

    #[test]
    fn header_set_decodes() {
        let filter: gw_rules::RequestFilter = row("header", "set", "x-trace").try_into().unwrap();
        assert!(matches!(filter.action, gw_rules::FilterAction::HeaderSet { .. }));
    }

    #[test]
    fn unknown_combination_is_rejected() {
        let result: Result<gw_rules::RequestFilter, _> = row("header", "json_path", "x").try_into();
        assert!(result.is_err());
    }
}
