use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "user_display_name")]
    pub display_name: String,
    pub role: String,
    pub is_enabled: bool,
    pub expires_at: Option<OffsetDateTime>,
    pub rpm_limit: Option<i32>,
    pub daily_cost_limit: Option<Decimal>,
    pub daily_reset_mode: Option<String>,
    pub daily_reset_time: Option<String>,
    pub total_cost_limit: Option<Decimal>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
    #[sea_orm(has_many)]
    pub keys: HasMany<super::api_keys::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
