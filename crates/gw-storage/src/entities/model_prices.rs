use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_prices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "model_price_version")]
    pub model_name: String,
    #[sea_orm(unique_key = "model_price_version")]
    pub recorded_at: OffsetDateTime,
    pub mode: String,
    pub input_usd_per_token: Decimal,
    pub output_usd_per_token: Decimal,
    pub cache_creation_5m_usd_per_token: Decimal,
    pub cache_creation_1h_usd_per_token: Decimal,
    pub cache_read_usd_per_token: Decimal,
    /// Hash of the imported payload; import is idempotent on
    /// `(model_name, payload_hash)` so an unchanged re-import adds no row.
    pub payload_hash: String,
}

impl ActiveModelBehavior for ActiveModel {}
