use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique_key = "api_key_token")]
    pub token: String,
    pub provider_group_allowlist_json: Option<Json>,
    pub cache_ttl_preference: String,
    pub can_login_web_ui: bool,
    pub is_enabled: bool,
    pub five_hour_cost_limit: Option<Decimal>,
    pub daily_cost_limit: Option<Decimal>,
    pub daily_reset_mode: Option<String>,
    pub daily_reset_time: Option<String>,
    pub weekly_cost_limit: Option<Decimal>,
    pub monthly_cost_limit: Option<Decimal>,
    pub total_cost_limit: Option<Decimal>,
    pub concurrent_session_limit: Option<i32>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
    #[sea_orm(belongs_to, from = "user_id", to = "id", on_delete = "Cascade")]
    pub user: HasOne<super::users::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
