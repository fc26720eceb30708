use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "message_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub key_id: i64,
    pub provider_id: Option<i64>,
    pub model: String,
    pub original_model: String,
    pub http_status: Option<i32>,
    pub duration_ms: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_creation_5m_tokens: i64,
    pub cache_creation_1h_tokens: i64,
    pub cache_read_tokens: i64,
    pub cost_usd: Decimal,
    pub session_id: String,
    pub note: Option<String>,
    /// Ordered per-attempt decisions, `Vec<ProviderChainEntry>` via serde —
    /// a JSON column rather than a join table, the same shape the teacher
    /// uses for `providers.config_json`.
    pub provider_chain_json: Json,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
