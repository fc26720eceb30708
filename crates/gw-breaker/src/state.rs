//! Per-provider circuit state (L6) — spec.md §4.6, §6.5.

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "closed" => Some(CircuitState::Closed),
            "open" => Some(CircuitState::Open),
            "half_open" => Some(CircuitState::HalfOpen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: time::Duration,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            open_duration: time::Duration::minutes(30),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderState {
    pub failure_count: u32,
    pub last_failure_time: Option<OffsetDateTime>,
    pub circuit_state: CircuitState,
    pub circuit_open_until: Option<OffsetDateTime>,
    pub half_open_success_count: u32,
}

impl Default for ProviderState {
    fn default() -> Self {
        ProviderState {
            failure_count: 0,
            last_failure_time: None,
            circuit_state: CircuitState::Closed,
            circuit_open_until: None,
            half_open_success_count: 0,
        }
    }
}

impl ProviderState {
    pub fn to_hash_fields(&self) -> Vec<(String, String)> {
        vec![
            ("failureCount".to_string(), self.failure_count.to_string()),
            (
                "lastFailureTime".to_string(),
                self.last_failure_time.map(|t| t.unix_timestamp().to_string()).unwrap_or_default(),
            ),
            ("circuitState".to_string(), self.circuit_state.as_str().to_string()),
            (
                "circuitOpenUntil".to_string(),
                self.circuit_open_until.map(|t| t.unix_timestamp().to_string()).unwrap_or_default(),
            ),
            ("halfOpenSuccessCount".to_string(), self.half_open_success_count.to_string()),
        ]
    }

    pub fn from_hash_fields(fields: &std::collections::HashMap<String, String>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }
        let failure_count = fields.get("failureCount")?.parse().ok()?;
        let circuit_state = fields
            .get("circuitState")
            .and_then(|s| CircuitState::parse(s))
            .unwrap_or(CircuitState::Closed);
        let last_failure_time = fields
            .get("lastFailureTime")
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
        let circuit_open_until = fields
            .get("circuitOpenUntil")
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<i64>().ok())
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());
        let half_open_success_count = fields
            .get("halfOpenSuccessCount")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Some(ProviderState {
            failure_count,
            last_failure_time,
            circuit_state,
            circuit_open_until,
            half_open_success_count,
        })
    }
}
