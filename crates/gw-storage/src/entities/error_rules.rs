use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "error_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub priority: i32,
    pub match_type: String,
    pub pattern: String,
    pub category: String,
    pub override_status_code: Option<i32>,
    pub override_response_json: Option<Json>,
    pub is_enabled: bool,
    pub is_default: bool,
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for gw_rules::ErrorRule {
    fn from(row: Model) -> Self {
        gw_rules::ErrorRule {
            id: row.id,
            priority: row.priority,
            match_type: match row.match_type.as_str() {
                "exact" => gw_rules::MatchType::Exact,
                "regex" => gw_rules::MatchType::Regex,
                _ => gw_rules::MatchType::Contains,
            },
            pattern: row.pattern,
            category: row.category,
            override_status_code: row.override_status_code.map(|code| code as u16),
            override_response: row.override_response_json,
        }
    }
}
