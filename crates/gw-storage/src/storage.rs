//! Repository layer over the §3 entities. Grounded on
//! `gproxy-storage/src/traffic.rs`'s `TrafficStorage` (connect/
//! from_connection/sync shape, `on_conflict` upserts); trimmed to the
//! runtime read/write paths the gateway pipeline needs rather than the
//! teacher's full admin CRUD surface (out of scope, spec.md Non-goals).

use gw_common::window::DailyResetMode;
use gw_limits::{KeyPolicy, UserPolicy};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Schema,
};
use time::OffsetDateTime;

use gw_provider_core::model::{
    CacheTtlPreference, Key, MessageRequest, ModelPrice, ModelPriceMode, ProviderConfig, ProviderType,
    User, UserRole,
};

use crate::db::connect_shared;
use crate::entities;

/// The full auth-path lookup (`gw-core::auth`): domain objects plus the
/// policy values `gw-limits::RateLimitGuard` needs, in one round trip.
pub struct KeyLookup {
    pub key: Key,
    pub key_policy: KeyPolicy,
    pub user: User,
    pub user_policy: UserPolicy,
}

#[derive(Clone)]
pub struct GatewayStorage {
    db: DatabaseConnection,
}

impl GatewayStorage {
    pub async fn connect(database_url: &str) -> Result<Self, DbErr> {
        let db = connect_shared(database_url).await?;
        Ok(GatewayStorage { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        GatewayStorage { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> Result<(), DbErr> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Users)
            .register(entities::ApiKeys)
            .register(entities::Providers)
            .register(entities::ModelPrices)
            .register(entities::MessageRequests)
            .register(entities::ErrorRules)
            .register(entities::RequestFilters)
            .register(entities::CircuitBreakerStates)
            .sync(&self.db)
            .await
    }

    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<User>, DbErr> {
        let row = entities::Users::find_by_id(id).one(&self.db).await?;
        Ok(row.map(user_from_row))
    }

    /// Looks up the owning user alongside the key in one round trip —
    /// the authentication path (`gw-core::auth`) always needs both.
    pub async fn find_key_by_token(&self, token: &str) -> Result<Option<(Key, User)>, DbErr> {
        use entities::api_keys::Column;

        let Some(key_row) = entities::ApiKeys::find()
            .filter(Column::Token.eq(token))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let Some(user_row) = entities::Users::find_by_id(key_row.user_id).one(&self.db).await? else {
            return Ok(None);
        };
        Ok(Some((key_from_row(key_row), user_from_row(user_row))))
    }

    /// Same lookup as [`Self::find_key_by_token`], additionally decoding
    /// the policy columns `gw-limits::RateLimitGuard` consumes — the
    /// auth path (`gw-core::auth`) always needs both in one call.
    pub async fn find_key_with_policy_by_token(&self, token: &str) -> Result<Option<KeyLookup>, DbErr> {
        use entities::api_keys::Column;

        let Some(key_row) = entities::ApiKeys::find()
            .filter(Column::Token.eq(token))
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };
        let Some(user_row) = entities::Users::find_by_id(key_row.user_id).one(&self.db).await? else {
            return Ok(None);
        };

        let key_policy = KeyPolicy {
            key_id: key_row.id.to_string(),
            five_hour_cost_limit: key_row.five_hour_cost_limit,
            daily_cost_limit: key_row.daily_cost_limit,
            daily_reset_time: key_row.daily_reset_time.clone(),
            daily_reset_mode: key_row.daily_reset_mode.as_deref().map(parse_daily_reset_mode),
            weekly_cost_limit: key_row.weekly_cost_limit,
            monthly_cost_limit: key_row.monthly_cost_limit,
            total_cost_limit: key_row.total_cost_limit,
            concurrent_session_limit: key_row.concurrent_session_limit.map(|v| v as u64),
        };
        let user_policy = UserPolicy {
            user_id: user_row.id.to_string(),
            rpm_limit: user_row.rpm_limit.map(|v| v as u64),
            daily_cost_limit: user_row.daily_cost_limit,
            daily_reset_time: user_row.daily_reset_time.clone(),
            daily_reset_mode: user_row.daily_reset_mode.as_deref().map(parse_daily_reset_mode),
            total_cost_limit: user_row.total_cost_limit,
        };

        Ok(Some(KeyLookup {
            key: key_from_row(key_row),
            key_policy,
            user: user_from_row(user_row),
            user_policy,
        }))
    }

    pub async fn list_enabled_providers(&self) -> Result<Vec<ProviderConfig>, DbErr> {
        use entities::providers::Column;

        let rows = entities::Providers::find()
            .filter(Column::IsEnabled.eq(true))
            .filter(Column::DeletedAt.is_null())
            .order_by_asc(Column::Priority)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(provider_from_row).collect())
    }

    /// Latest price row for `model_name` by `recorded_at`.
    pub async fn current_model_price(&self, model_name: &str) -> Result<Option<ModelPrice>, DbErr> {
        use entities::model_prices::Column;

        let row = entities::ModelPrices::find()
            .filter(Column::ModelName.eq(model_name))
            .order_by_desc(Column::RecordedAt)
            .one(&self.db)
            .await?;
        Ok(row.map(model_price_from_row))
    }

    /// Imports a price row only if `payload_hash` differs from the most
    /// recent one on file for this model — spec.md §3's "equal JSON
    /// payload → no new row" idempotency rule. Returns whether a row
    /// was inserted.
    pub async fn import_model_price(&self, price: ModelPrice, payload_hash: &str) -> Result<bool, DbErr> {
        use entities::model_prices::Column;

        let latest = entities::ModelPrices::find()
            .filter(Column::ModelName.eq(&price.model_name))
            .order_by_desc(Column::RecordedAt)
            .one(&self.db)
            .await?;
        if let Some(latest) = &latest
            && latest.payload_hash == payload_hash
        {
            return Ok(false);
        }

        let active = entities::model_prices::ActiveModel {
            id: ActiveValue::NotSet,
            model_name: ActiveValue::Set(price.model_name),
            recorded_at: ActiveValue::Set(price.recorded_at),
            mode: ActiveValue::Set(model_price_mode_label(price.mode).to_string()),
            input_usd_per_token: ActiveValue::Set(price.input_usd_per_token),
            output_usd_per_token: ActiveValue::Set(price.output_usd_per_token),
            cache_creation_5m_usd_per_token: ActiveValue::Set(price.cache_creation_5m_usd_per_token),
            cache_creation_1h_usd_per_token: ActiveValue::Set(price.cache_creation_1h_usd_per_token),
            cache_read_usd_per_token: ActiveValue::Set(price.cache_read_usd_per_token),
            payload_hash: ActiveValue::Set(payload_hash.to_string()),
        };
        entities::ModelPrices::insert(active).exec(&self.db).await?;
        Ok(true)
    }

    /// Inserts the accounting row for one client request, returning its
    /// assigned id. Called pre-dispatch with the fields known at that
    /// point; the caller re-saves the same id once the response or
    /// error is known (spec.md §3: "created pre-dispatch, finalized
    /// after response or error").
    pub async fn record_message_request(&self, request: &MessageRequest) -> Result<i64, DbErr> {
        let chain_json = serde_json::to_value(&request.provider_chain)
            .unwrap_or_else(|_| serde_json::Value::Array(Vec::new()));
        let active = entities::message_requests::ActiveModel {
            id: ActiveValue::NotSet,
            user_id: ActiveValue::Set(request.user_id),
            key_id: ActiveValue::Set(request.key_id),
            provider_id: ActiveValue::Set(request.provider_id),
            model: ActiveValue::Set(request.model.clone()),
            original_model: ActiveValue::Set(request.original_model.clone()),
            http_status: ActiveValue::Set(request.http_status.map(i32::from)),
            duration_ms: ActiveValue::Set(request.duration.whole_milliseconds() as i64),
            input_tokens: ActiveValue::Set(request.input_tokens as i64),
            output_tokens: ActiveValue::Set(request.output_tokens as i64),
            cache_creation_5m_tokens: ActiveValue::Set(request.cache_creation_5m_tokens as i64),
            cache_creation_1h_tokens: ActiveValue::Set(request.cache_creation_1h_tokens as i64),
            cache_read_tokens: ActiveValue::Set(request.cache_read_tokens as i64),
            cost_usd: ActiveValue::Set(request.cost_usd),
            session_id: ActiveValue::Set(request.session_id.clone()),
            note: ActiveValue::Set(request.note.clone()),
            provider_chain_json: ActiveValue::Set(chain_json),
            error_message: ActiveValue::Set(request.error_message.clone()),
            created_at: ActiveValue::Set(request.created_at),
        };
        let result = entities::MessageRequests::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn list_error_rules(&self) -> Result<Vec<gw_rules::ErrorRule>, DbErr> {
        use entities::error_rules::Column;

        let rows = entities::ErrorRules::find()
            .filter(Column::IsEnabled.eq(true))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn list_request_filters(&self) -> Result<Vec<gw_rules::RequestFilter>, DbErr> {
        use entities::request_filters::Column;

        let rows = entities::RequestFilters::find()
            .filter(Column::IsEnabled.eq(true))
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row.try_into() {
                Ok(filter) => Some(filter),
                Err(error) => {
                    tracing::warn!(event = "request_filter_row_rejected", %error);
                    None
                }
            })
            .collect())
    }

    /// Best-effort read of every non-expired circuit-breaker row, used
    /// only to seed `gw-breaker`'s in-process state at startup; a
    /// missing or empty table never blocks startup.
    pub async fn preload_circuit_breaker_states(
        &self,
    ) -> Result<Vec<entities::circuit_breaker_states::Model>, DbErr> {
        use entities::circuit_breaker_states::Column;

        entities::CircuitBreakerStates::find()
            .filter(Column::UntilAt.gt(OffsetDateTime::now_utc()))
            .all(&self.db)
            .await
    }

    pub async fn persist_circuit_breaker_state(
        &self,
        row: entities::circuit_breaker_states::Model,
    ) -> Result<(), DbErr> {
        use entities::circuit_breaker_states::Column;

        let active = entities::circuit_breaker_states::ActiveModel {
            provider_id: ActiveValue::Set(row.provider_id),
            failure_count: ActiveValue::Set(row.failure_count),
            last_failure_time: ActiveValue::Set(row.last_failure_time),
            circuit_state: ActiveValue::Set(row.circuit_state),
            circuit_open_until: ActiveValue::Set(row.circuit_open_until),
            half_open_success_count: ActiveValue::Set(row.half_open_success_count),
            until_at: ActiveValue::Set(row.until_at),
        };
        entities::CircuitBreakerStates::insert(active)
            .on_conflict(
                OnConflict::column(Column::ProviderId)
                    .update_columns([
                        Column::FailureCount,
                        Column::LastFailureTime,
                        Column::CircuitState,
                        Column::CircuitOpenUntil,
                        Column::HalfOpenSuccessCount,
                        Column::UntilAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

fn user_from_row(row: entities::users::Model) -> User {
    User {
        id: row.id,
        display_name: row.display_name,
        role: if row.role == "admin" { UserRole::Admin } else { UserRole::User },
        is_enabled: row.is_enabled,
        expires_at: row.expires_at,
    }
}

fn key_from_row(row: entities::api_keys::Model) -> Key {
    let allowlist = row
        .provider_group_allowlist_json
        .and_then(|json| serde_json::from_value::<Vec<String>>(json).ok());
    let cache_ttl_preference = match row.cache_ttl_preference.as_str() {
        "5m" => CacheTtlPreference::FiveMinutes,
        "1h" => CacheTtlPreference::OneHour,
        _ => CacheTtlPreference::Inherit,
    };
    Key {
        id: row.id,
        user_id: row.user_id,
        token: row.token,
        provider_group_allowlist: allowlist,
        cache_ttl_preference,
        can_login_web_ui: row.can_login_web_ui,
        is_enabled: row.is_enabled,
    }
}

fn provider_from_row(row: entities::providers::Model) -> ProviderConfig {
    let provider_type = match row.provider_type.as_str() {
        "claude-auth" => ProviderType::ClaudeAuth,
        "codex" => ProviderType::Codex,
        "openai-compatible" => ProviderType::OpenAiCompatible,
        "gemini" => ProviderType::Gemini,
        "gemini-cli" => ProviderType::GeminiCli,
        _ => ProviderType::Claude,
    };
    let model_redirects = serde_json::from_value(row.model_redirects_json).unwrap_or_default();
    let model_allowlist = row
        .model_allowlist_json
        .and_then(|json| serde_json::from_value::<Vec<String>>(json).ok());
    ProviderConfig {
        id: row.id,
        name: row.name,
        provider_type,
        url: row.url,
        credential: row.credential,
        is_enabled: row.is_enabled,
        priority: row.priority,
        weight: row.weight,
        provider_group: row.provider_group,
        model_redirects,
        proxy: gw_provider_core::model::ProxyUrlConfig {
            proxy_url: row.proxy_url,
            proxy_fallback_to_direct: row.proxy_fallback_to_direct,
        },
        model_allowlist,
    }
}

fn model_price_from_row(row: entities::model_prices::Model) -> ModelPrice {
    ModelPrice {
        model_name: row.model_name,
        recorded_at: row.recorded_at,
        mode: ModelPriceMode::Chat,
        input_usd_per_token: row.input_usd_per_token,
        output_usd_per_token: row.output_usd_per_token,
        cache_creation_5m_usd_per_token: row.cache_creation_5m_usd_per_token,
        cache_creation_1h_usd_per_token: row.cache_creation_1h_usd_per_token,
        cache_read_usd_per_token: row.cache_read_usd_per_token,
    }
}

fn model_price_mode_label(mode: ModelPriceMode) -> &'static str {
    match mode {
        ModelPriceMode::Chat => "chat",
    }
}

fn parse_daily_reset_mode(raw: &str) -> DailyResetMode {
    match raw {
        "rolling" => DailyResetMode::Rolling,
        _ => DailyResetMode::Fixed,
    }
}
