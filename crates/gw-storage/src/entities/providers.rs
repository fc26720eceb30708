use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    pub provider_type: String,
    pub url: String,
    pub credential: String,
    pub is_enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub provider_group: Option<String>,
    pub model_redirects_json: Json,
    pub model_allowlist_json: Option<Json>,
    pub proxy_url: Option<String>,
    pub proxy_fallback_to_direct: bool,
    pub failure_threshold: Option<i32>,
    pub open_duration_ms: Option<i64>,
    pub half_open_success_threshold: Option<i32>,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl ActiveModelBehavior for ActiveModel {}
