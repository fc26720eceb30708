//! Authentication (component of L12). Generalizes the teacher's
//! `gproxy-core/src/auth.rs::MemoryAuth` from a pure in-memory
//! snapshot to a lookup backed by `gw-storage`: spec.md §5's
//! shared-resource policy names only the Redis-backed counters and the
//! in-memory rule/filter caches (L7/L8) as process-wide state, not an
//! auth snapshot, so a key/policy change takes effect on the very next
//! request rather than waiting for a reload event. `extract_api_key`
//! and the `AuthProvider` seam are kept as the teacher shaped them.

use std::sync::Arc;

use gw_limits::{KeyPolicy, UserPolicy};
use gw_provider_core::model::{Key, User};
use gw_storage::GatewayStorage;
use http::HeaderMap;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AuthenticatedSession {
    pub user: User,
    pub user_policy: UserPolicy,
    pub key: Key,
    pub key_policy: KeyPolicy,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing api key")]
    MissingCredential,
    #[error("unknown api key")]
    UnknownKey,
    #[error("api key disabled")]
    KeyDisabled,
    #[error("user disabled")]
    UserDisabled,
    #[error("user expired")]
    UserExpired,
    #[error("storage error: {0}")]
    Storage(#[from] sea_orm::DbErr),
}

#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap, query: Option<&str>) -> Result<AuthenticatedSession, AuthError>;
}

pub struct StorageAuth {
    storage: Arc<GatewayStorage>,
}

impl StorageAuth {
    pub fn new(storage: Arc<GatewayStorage>) -> Self {
        StorageAuth { storage }
    }
}

#[async_trait::async_trait]
impl AuthProvider for StorageAuth {
    async fn authenticate(&self, headers: &HeaderMap, query: Option<&str>) -> Result<AuthenticatedSession, AuthError> {
        let token = extract_api_key(headers)
            .or_else(|| query.and_then(extract_query_api_key))
            .ok_or(AuthError::MissingCredential)?;
        let lookup = self
            .storage
            .find_key_with_policy_by_token(&token)
            .await?
            .ok_or(AuthError::UnknownKey)?;

        if !lookup.key.is_enabled {
            return Err(AuthError::KeyDisabled);
        }
        if !lookup.user.is_enabled {
            return Err(AuthError::UserDisabled);
        }
        if let Some(expires_at) = lookup.user.expires_at
            && time::OffsetDateTime::now_utc() >= expires_at
        {
            return Err(AuthError::UserExpired);
        }

        Ok(AuthenticatedSession {
            user: lookup.user,
            user_policy: lookup.user_policy,
            key: lookup.key,
            key_policy: lookup.key_policy,
        })
    }
}

/// `x-api-key` first, then `Authorization: Bearer <token>` — matches
/// spec.md §6.1's relay-endpoint auth and the teacher's own precedence.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(token) = auth.strip_prefix("bearer ") {
        return Some(token.trim().to_string());
    }
    None
}

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[derive(Debug, Deserialize)]
struct GeminiApiKeyQuery {
    key: Option<String>,
}

/// Gemini's REST API takes the key as `?key=API_KEY` instead of a header;
/// tried only after every header-based form has failed.
fn extract_query_api_key(query: &str) -> Option<String> {
    let parsed: GeminiApiKeyQuery = serde_qs::from_str(query).ok()?;
    parsed.key.filter(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_x_api_key_over_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-direct".parse().unwrap());
        headers.insert("authorization", "Bearer sk-bearer".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-direct"));
    }

    #[test]
    fn strips_bearer_prefix_case_insensitively() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "bearer sk-lower".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-lower"));
    }

    #[test]
    fn missing_credential_returns_none() {
        let headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);
    }

    #[test]
    fn extracts_key_from_query_string() {
        assert_eq!(extract_query_api_key("key=sk-query").as_deref(), Some("sk-query"));
    }

    #[test]
    fn ignores_empty_query_key() {
        assert_eq!(extract_query_api_key("key="), None);
    }

    #[test]
    fn ignores_unrelated_query_params() {
        assert_eq!(extract_query_api_key("alt=sse"), None);
    }
}
