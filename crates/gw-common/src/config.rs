use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GlobalConfigError {
    #[error("missing required global config field: {0}")]
    MissingField(&'static str),
    #[error("client_version_ga_threshold must be within 1..=10, got {0}")]
    InvalidGaThreshold(i32),
}

/// Final, merged configuration used by the running process.
///
/// Merge order: CLI > ENV > DB-persisted defaults, then the result is
/// persisted back so the next boot without CLI/ENV overrides reuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub host: String,
    pub port: u16,
    /// Database DSN for the accounting/entity store.
    pub dsn: String,
    /// IANA zone name, informational only — `tz_offset_hours` is what
    /// L1 actually computes against (see DESIGN.md Open Question 5).
    pub tz: String,
    pub tz_offset_hours: i8,
    /// `None` disables L3-L6 rate limiting / circuit breaking entirely
    /// and every guard degrades to its fail-open path.
    pub redis_url: Option<String>,
    pub enable_rate_limit: bool,
    pub client_version_ga_threshold: u8,
    /// Stored as a hash, never plaintext.
    pub admin_token_hash: Option<String>,
    pub event_redact_sensitive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GlobalConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dsn: Option<String>,
    pub tz: Option<String>,
    pub tz_offset_hours: Option<i8>,
    pub redis_url: Option<String>,
    pub enable_rate_limit: Option<bool>,
    pub client_version_ga_threshold: Option<u8>,
    pub admin_token_hash: Option<String>,
    pub event_redact_sensitive: Option<bool>,
}

impl GlobalConfigPatch {
    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn overlay(&mut self, other: GlobalConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.tz.is_some() {
            self.tz = other.tz;
        }
        if other.tz_offset_hours.is_some() {
            self.tz_offset_hours = other.tz_offset_hours;
        }
        if other.redis_url.is_some() {
            self.redis_url = other.redis_url;
        }
        if other.enable_rate_limit.is_some() {
            self.enable_rate_limit = other.enable_rate_limit;
        }
        if other.client_version_ga_threshold.is_some() {
            self.client_version_ga_threshold = other.client_version_ga_threshold;
        }
        if other.admin_token_hash.is_some() {
            self.admin_token_hash = other.admin_token_hash;
        }
        if other.event_redact_sensitive.is_some() {
            self.event_redact_sensitive = other.event_redact_sensitive;
        }
    }

    pub fn into_config(self) -> Result<GlobalConfig, GlobalConfigError> {
        let threshold = self.client_version_ga_threshold.unwrap_or(2);
        if !(1..=10).contains(&threshold) {
            return Err(GlobalConfigError::InvalidGaThreshold(threshold as i32));
        }
        Ok(GlobalConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8787),
            dsn: self.dsn.ok_or(GlobalConfigError::MissingField("dsn"))?,
            tz: self.tz.unwrap_or_else(|| "Asia/Shanghai".to_string()),
            tz_offset_hours: self.tz_offset_hours.unwrap_or(8),
            redis_url: self.redis_url,
            enable_rate_limit: self.enable_rate_limit.unwrap_or(false),
            client_version_ga_threshold: threshold,
            admin_token_hash: self.admin_token_hash,
            event_redact_sensitive: self.event_redact_sensitive.unwrap_or(true),
        })
    }
}

impl From<GlobalConfig> for GlobalConfigPatch {
    fn from(value: GlobalConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            dsn: Some(value.dsn),
            tz: Some(value.tz),
            tz_offset_hours: Some(value.tz_offset_hours),
            redis_url: value.redis_url,
            enable_rate_limit: Some(value.enable_rate_limit),
            client_version_ga_threshold: Some(value.client_version_ga_threshold),
            admin_token_hash: value.admin_token_hash,
            event_redact_sensitive: Some(value.event_redact_sensitive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_later_non_null_fields() {
        let mut base = GlobalConfigPatch {
            port: Some(1111),
            dsn: Some("base".to_string()),
            ..Default::default()
        };
        base.overlay(GlobalConfigPatch {
            port: Some(2222),
            ..Default::default()
        });
        assert_eq!(base.port, Some(2222));
        assert_eq!(base.dsn, Some("base".to_string()));
    }

    #[test]
    fn into_config_requires_dsn() {
        let patch = GlobalConfigPatch::default();
        assert!(matches!(
            patch.into_config(),
            Err(GlobalConfigError::MissingField("dsn"))
        ));
    }

    #[test]
    fn into_config_rejects_out_of_range_ga_threshold() {
        let patch = GlobalConfigPatch {
            dsn: Some("sqlite://x".to_string()),
            client_version_ga_threshold: Some(11),
            ..Default::default()
        };
        assert!(matches!(
            patch.into_config(),
            Err(GlobalConfigError::InvalidGaThreshold(11))
        ));
    }
}
