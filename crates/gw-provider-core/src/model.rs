//! Domain entities (§3). Plain structs owned by this crate; `gw-storage`
//! holds the SeaORM mirror and maps between the two at the repository
//! boundary. Grounded on `gproxy-storage/src/entities/*` field naming,
//! translated out of the ORM macros into ordinary domain types.

use gw_protocol::Format;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub type UserId = i64;
pub type KeyId = i64;
pub type ProviderId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    User,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub role: UserRole,
    pub is_enabled: bool,
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTtlPreference {
    Inherit,
    FiveMinutes,
    OneHour,
}

#[derive(Debug, Clone)]
pub struct Key {
    pub id: KeyId,
    pub user_id: UserId,
    pub token: String,
    pub provider_group_allowlist: Option<Vec<String>>,
    pub cache_ttl_preference: CacheTtlPreference,
    pub can_login_web_ui: bool,
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Claude,
    ClaudeAuth,
    Codex,
    OpenAiCompatible,
    Gemini,
    GeminiCli,
}

impl ProviderType {
    /// The client `Format` this provider type speaks without translation.
    pub fn native_format(&self) -> Format {
        match self {
            ProviderType::Claude | ProviderType::ClaudeAuth => Format::Claude,
            ProviderType::Codex => Format::Codex,
            ProviderType::OpenAiCompatible => Format::OpenAi,
            ProviderType::Gemini => Format::Gemini,
            ProviderType::GeminiCli => Format::GeminiCli,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProxyUrlConfig {
    pub proxy_url: Option<String>,
    pub proxy_fallback_to_direct: bool,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub name: String,
    pub provider_type: ProviderType,
    pub url: String,
    pub credential: String,
    pub is_enabled: bool,
    pub priority: i32,
    pub weight: i32,
    pub provider_group: Option<String>,
    pub model_redirects: std::collections::HashMap<String, String>,
    pub proxy: ProxyUrlConfig,
    pub model_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPriceMode {
    Chat,
}

#[derive(Debug, Clone)]
pub struct ModelPrice {
    pub model_name: String,
    pub recorded_at: OffsetDateTime,
    pub mode: ModelPriceMode,
    pub input_usd_per_token: Decimal,
    pub output_usd_per_token: Decimal,
    pub cache_creation_5m_usd_per_token: Decimal,
    pub cache_creation_1h_usd_per_token: Decimal,
    pub cache_read_usd_per_token: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderChainEntry {
    pub provider_id: ProviderId,
    pub provider_name: String,
    pub provider_type: ProviderType,
    pub decision_reason: String,
    pub attempt_index: u32,
    pub original_model: Option<String>,
    pub redirected_model: Option<String>,
    pub billing_model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRequest {
    pub user_id: UserId,
    pub key_id: KeyId,
    pub provider_id: Option<ProviderId>,
    pub model: String,
    pub original_model: String,
    pub http_status: Option<u16>,
    pub duration: time::Duration,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: Decimal,
    pub session_id: String,
    pub note: Option<String>,
    pub provider_chain: Vec<ProviderChainEntry>,
    pub error_message: Option<String>,
    pub created_at: OffsetDateTime,
}
