use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

/// Best-effort durable mirror of the Redis `circuit_breaker:state:{id}`
/// hash (spec.md §6.5), scoped with an `until_at` expiry column the same
/// way the teacher scopes `credential_disallow` rows — read at
/// `gw-breaker` preload so a restart without Redis still has a picture
/// of recently open breakers; never blocks startup if empty or stale.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "circuit_breaker_states")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub provider_id: i64,
    pub failure_count: i32,
    pub last_failure_time: Option<OffsetDateTime>,
    pub circuit_state: String,
    pub circuit_open_until: Option<OffsetDateTime>,
    pub half_open_success_count: i32,
    pub until_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
