//! Circuit breaker (L6): classical closed/open/half-open per provider.
//! State is read/written through L3; on a write failure the in-process
//! map stays authoritative (spec.md §4.6).

use std::collections::HashMap;
use std::sync::Arc;

use gw_limits::RedisFacade;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::state::{CircuitBreakerConfig, CircuitState, ProviderState};

pub type ProviderId = i64;

fn state_key(provider_id: ProviderId) -> String {
    format!("circuit_breaker:state:{provider_id}")
}

const STATE_TTL_SECONDS: u64 = 86_400;

pub struct CircuitBreaker {
    configs: HashMap<ProviderId, CircuitBreakerConfig>,
    states: RwLock<HashMap<ProviderId, ProviderState>>,
    redis: Arc<dyn RedisFacade>,
}

impl CircuitBreaker {
    pub fn new(configs: HashMap<ProviderId, CircuitBreakerConfig>, redis: Arc<dyn RedisFacade>) -> Self {
        CircuitBreaker {
            configs,
            states: RwLock::new(HashMap::new()),
            redis,
        }
    }

    fn config_for(&self, provider_id: ProviderId) -> CircuitBreakerConfig {
        self.configs.get(&provider_id).copied().unwrap_or_default()
    }

    /// Best-effort bulk preload at startup: reads every known provider's
    /// persisted state, defaulting silently to `closed` on a miss or a
    /// Redis failure.
    pub async fn preload(&self) {
        let provider_ids: Vec<ProviderId> = self.configs.keys().copied().collect();
        let mut states = self.states.write().await;
        for provider_id in provider_ids {
            let fields = self.redis.hgetall(&state_key(provider_id)).await;
            let state = ProviderState::from_hash_fields(&fields).unwrap_or_default();
            states.insert(provider_id, state);
        }
    }

    async fn persist(&self, provider_id: ProviderId, state: &ProviderState) {
        self.redis
            .hset(&state_key(provider_id), &state.to_hash_fields(), STATE_TTL_SECONDS)
            .await;
    }

    /// `true` when `provider_id` may be selected. A provider whose open
    /// window has elapsed is allowed through as a probe and transitions
    /// to `half_open` as a side effect.
    pub async fn is_allowed(&self, provider_id: ProviderId) -> bool {
        let now = OffsetDateTime::now_utc();
        let mut states = self.states.write().await;
        let state = states.entry(provider_id).or_default();
        match state.circuit_state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let open_until = state.circuit_open_until.unwrap_or(now);
                if now >= open_until {
                    state.circuit_state = CircuitState::HalfOpen;
                    state.half_open_success_count = 0;
                    self.persist(provider_id, state).await;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn on_success(&self, provider_id: ProviderId) {
        let config = self.config_for(provider_id);
        let mut states = self.states.write().await;
        let state = states.entry(provider_id).or_default();
        match state.circuit_state {
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                state.half_open_success_count += 1;
                if state.half_open_success_count >= config.half_open_success_threshold {
                    state.circuit_state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.half_open_success_count = 0;
                    state.circuit_open_until = None;
                }
            }
            CircuitState::Open => {}
        }
        self.persist(provider_id, state).await;
    }

    pub async fn on_failure(&self, provider_id: ProviderId) {
        let config = self.config_for(provider_id);
        let now = OffsetDateTime::now_utc();
        let mut states = self.states.write().await;
        let state = states.entry(provider_id).or_default();
        state.failure_count += 1;
        state.last_failure_time = Some(now);
        match state.circuit_state {
            CircuitState::Closed => {
                if state.failure_count >= config.failure_threshold {
                    state.circuit_state = CircuitState::Open;
                    state.circuit_open_until = Some(now + config.open_duration);
                    state.half_open_success_count = 0;
                }
            }
            CircuitState::HalfOpen => {
                state.circuit_state = CircuitState::Open;
                state.circuit_open_until = Some(now + config.open_duration);
                state.half_open_success_count = 0;
            }
            CircuitState::Open => {
                state.circuit_open_until = Some(now + config.open_duration);
            }
        }
        self.persist(provider_id, state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_limits::InProcessRedisFacade;

    fn breaker(threshold: u32) -> CircuitBreaker {
        let mut configs = HashMap::new();
        configs.insert(
            1,
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: time::Duration::minutes(30),
                half_open_success_threshold: 2,
            },
        );
        CircuitBreaker::new(configs, Arc::new(InProcessRedisFacade::default()))
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = breaker(3);
        assert!(breaker.is_allowed(1).await);
        breaker.on_failure(1).await;
        breaker.on_failure(1).await;
        assert!(breaker.is_allowed(1).await);
        breaker.on_failure(1).await;
        assert!(!breaker.is_allowed(1).await);
    }

    #[tokio::test]
    async fn success_resets_failure_count_while_closed() {
        let breaker = breaker(3);
        breaker.on_failure(1).await;
        breaker.on_failure(1).await;
        breaker.on_success(1).await;
        breaker.on_failure(1).await;
        breaker.on_failure(1).await;
        assert!(breaker.is_allowed(1).await);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_the_circuit() {
        let breaker = breaker(1);
        breaker.on_failure(1).await;
        assert!(!breaker.is_allowed(1).await);

        {
            let mut states = breaker.states.write().await;
            let state = states.get_mut(&1).unwrap();
            state.circuit_open_until = Some(OffsetDateTime::now_utc() - time::Duration::seconds(1));
        }
        assert!(breaker.is_allowed(1).await);

        breaker.on_failure(1).await;
        assert!(!breaker.is_allowed(1).await);
    }

    #[tokio::test]
    async fn half_open_success_threshold_closes_the_circuit() {
        let breaker = breaker(1);
        breaker.on_failure(1).await;
        {
            let mut states = breaker.states.write().await;
            let state = states.get_mut(&1).unwrap();
            state.circuit_open_until = Some(OffsetDateTime::now_utc() - time::Duration::seconds(1));
        }
        assert!(breaker.is_allowed(1).await);
        breaker.on_success(1).await;
        breaker.on_success(1).await;
        let states = breaker.states.read().await;
        assert_eq!(states.get(&1).unwrap().circuit_state, CircuitState::Closed);
    }
}
