//! Redis façade (L3). Every method is fail-open: on a Redis error the
//! call logs a warning and returns a sentinel that lets the request
//! proceed (for checks) or buffers into an in-process map (for
//! counters) — spec.md §4.3, §7. Grounded on
//! `gproxy-provider-core/src/credential/pool.rs`'s
//! `RwLock<HashMap<...>>` shape for the in-process fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

#[async_trait]
pub trait RedisFacade: Send + Sync {
    async fn get_current_cost(&self, key: &str) -> Decimal;
    async fn increment_cost(&self, key: &str, delta: Decimal, ttl_seconds: u64) -> Decimal;
    async fn check_and_increment_rpm(&self, key: &str, ttl_seconds: u64) -> u64;
    async fn hset(&self, key: &str, fields: &[(String, String)], ttl_seconds: u64);
    async fn hgetall(&self, key: &str) -> HashMap<String, String>;
    async fn del(&self, key: &str);
    async fn sadd(&self, key: &str, member: &str);
    async fn srem(&self, key: &str, member: &str);
    async fn scard(&self, key: &str) -> u64;
    async fn smembers(&self, key: &str) -> Vec<String>;
}

/// Live façade over a `redis::aio::ConnectionManager`. Every method
/// swallows transport errors into the fail-open sentinel after logging
/// at `warn`.
pub struct LiveRedisFacade {
    conn: redis::aio::ConnectionManager,
}

impl LiveRedisFacade {
    pub async fn connect(url: &str) -> redis::RedisResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(LiveRedisFacade { conn })
    }
}

#[async_trait]
impl RedisFacade for LiveRedisFacade {
    async fn get_current_cost(&self, key: &str) -> Decimal {
        let mut conn = self.conn.clone();
        match redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
        {
            Ok(Some(value)) => value.parse().unwrap_or(Decimal::ZERO),
            Ok(None) => Decimal::ZERO,
            Err(error) => {
                tracing::warn!(event = "redis_fail_open", op = "get_current_cost", %error);
                Decimal::ZERO
            }
        }
    }

    async fn increment_cost(&self, key: &str, delta: Decimal, ttl_seconds: u64) -> Decimal {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<String> = redis::pipe()
            .atomic()
            .cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta.to_string())
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await;
        match result {
            Ok(value) => value.parse().unwrap_or(delta),
            Err(error) => {
                tracing::warn!(event = "redis_fail_open", op = "increment_cost", %error);
                delta
            }
        }
    }

    async fn check_and_increment_rpm(&self, key: &str, ttl_seconds: u64) -> u64 {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<u64> = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_seconds)
            .ignore()
            .query_async(&mut conn)
            .await;
        match result {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(event = "redis_fail_open", op = "check_and_increment_rpm", %error);
                0
            }
        }
    }

    async fn hset(&self, key: &str, fields: &[(String, String)], ttl_seconds: u64) {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("HSET").arg(key).arg(fields);
        pipe.cmd("EXPIRE").arg(key).arg(ttl_seconds).ignore();
        if let Err(error) = pipe.query_async::<()>(&mut conn).await {
            tracing::warn!(event = "redis_fail_open", op = "hset", %error);
        }
    }

    async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        let mut conn = self.conn.clone();
        match redis::cmd("HGETALL")
            .arg(key)
            .query_async::<HashMap<String, String>>(&mut conn)
            .await
        {
            Ok(map) => map,
            Err(error) => {
                tracing::warn!(event = "redis_fail_open", op = "hgetall", %error);
                HashMap::new()
            }
        }
    }

    async fn del(&self, key: &str) {
        let mut conn = self.conn.clone();
        if let Err(error) = redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await {
            tracing::warn!(event = "redis_fail_open", op = "del", %error);
        }
    }

    async fn sadd(&self, key: &str, member: &str) {
        let mut conn = self.conn.clone();
        if let Err(error) = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(event = "redis_fail_open", op = "sadd", %error);
        }
    }

    async fn srem(&self, key: &str, member: &str) {
        let mut conn = self.conn.clone();
        if let Err(error) = redis::cmd("SREM")
            .arg(key)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::warn!(event = "redis_fail_open", op = "srem", %error);
        }
    }

    async fn scard(&self, key: &str) -> u64 {
        let mut conn = self.conn.clone();
        match redis::cmd("SCARD").arg(key).query_async::<u64>(&mut conn).await {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(event = "redis_fail_open", op = "scard", %error);
                0
            }
        }
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        let mut conn = self.conn.clone();
        match redis::cmd("SMEMBERS").arg(key).query_async::<Vec<String>>(&mut conn).await {
            Ok(members) => members,
            Err(error) => {
                tracing::warn!(event = "redis_fail_open", op = "smembers", %error);
                Vec::new()
            }
        }
    }
}

/// In-process fallback used when `REDIS_URL` is unset or Redis is
/// unreachable at startup — absence of Redis disables L3's persistence,
/// not its interface (spec.md §6.4: "absence disables L3, fail-open
/// everywhere").
#[derive(Default)]
pub struct InProcessRedisFacade {
    costs: Arc<RwLock<HashMap<String, Decimal>>>,
    counters: Arc<RwLock<HashMap<String, u64>>>,
    hashes: Arc<RwLock<HashMap<String, HashMap<String, String>>>>,
    sets: Arc<RwLock<HashMap<String, std::collections::HashSet<String>>>>,
}

#[async_trait]
impl RedisFacade for InProcessRedisFacade {
    async fn get_current_cost(&self, key: &str) -> Decimal {
        self.costs.read().await.get(key).copied().unwrap_or(Decimal::ZERO)
    }

    async fn increment_cost(&self, key: &str, delta: Decimal, _ttl_seconds: u64) -> Decimal {
        let mut costs = self.costs.write().await;
        let entry = costs.entry(key.to_string()).or_insert(Decimal::ZERO);
        *entry += delta;
        *entry
    }

    async fn check_and_increment_rpm(&self, key: &str, _ttl_seconds: u64) -> u64 {
        let mut counters = self.counters.write().await;
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    async fn hset(&self, key: &str, fields: &[(String, String)], _ttl_seconds: u64) {
        let mut hashes = self.hashes.write().await;
        let entry = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.clone(), value.clone());
        }
    }

    async fn hgetall(&self, key: &str) -> HashMap<String, String> {
        self.hashes.read().await.get(key).cloned().unwrap_or_default()
    }

    async fn del(&self, key: &str) {
        self.costs.write().await.remove(key);
        self.counters.write().await.remove(key);
        self.hashes.write().await.remove(key);
        self.sets.write().await.remove(key);
    }

    async fn sadd(&self, key: &str, member: &str) {
        self.sets
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    async fn srem(&self, key: &str, member: &str) {
        if let Some(set) = self.sets.write().await.get_mut(key) {
            set.remove(member);
        }
    }

    async fn scard(&self, key: &str) -> u64 {
        self.sets.read().await.get(key).map(|set| set.len() as u64).unwrap_or(0)
    }

    async fn smembers(&self, key: &str) -> Vec<String> {
        self.sets.read().await.get(key).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_cost_accumulates() {
        let facade = InProcessRedisFacade::default();
        facade.increment_cost("rate:cost:user:1:daily", Decimal::new(150, 2), 86_400).await;
        facade.increment_cost("rate:cost:user:1:daily", Decimal::new(50, 2), 86_400).await;
        assert_eq!(facade.get_current_cost("rate:cost:user:1:daily").await, Decimal::new(200, 2));
    }

    #[tokio::test]
    async fn in_process_session_set_tracks_membership() {
        let facade = InProcessRedisFacade::default();
        facade.sadd("session:active:key1", "sess-a").await;
        facade.sadd("session:active:key1", "sess-b").await;
        assert_eq!(facade.scard("session:active:key1").await, 2);
        facade.srem("session:active:key1", "sess-a").await;
        assert_eq!(facade.scard("session:active:key1").await, 1);
    }
}
