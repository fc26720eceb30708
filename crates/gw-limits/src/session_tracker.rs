//! Session tracker (L4): the single source of truth for concurrent
//! session enforcement. Slot acquisition happens during L12
//! pre-dispatch; release runs unconditionally on pipeline exit,
//! including client cancellation — spec.md §4.4, §4.12.

use std::sync::Arc;

use crate::redis_facade::RedisFacade;

const ALL_SESSIONS_KEY: &str = "session:active:all";

fn key_session_key(key_id: &str) -> String {
    format!("session:active:{key_id}")
}

fn user_session_key(user_id: &str) -> String {
    format!("session:user:{user_id}")
}

pub struct SessionTracker {
    redis: Arc<dyn RedisFacade>,
}

impl SessionTracker {
    pub fn new(redis: Arc<dyn RedisFacade>) -> Self {
        SessionTracker { redis }
    }

    /// Registers `session_id` under both the key's and the user's
    /// active-session sets. Idempotent: re-acquiring the same id is a
    /// no-op at the set level.
    pub async fn acquire(&self, key_id: &str, user_id: &str, session_id: &str) {
        self.redis.sadd(&key_session_key(key_id), session_id).await;
        self.redis.sadd(&user_session_key(user_id), session_id).await;
        self.redis.sadd(ALL_SESSIONS_KEY, session_id).await;
    }

    /// Unconditional release — called on every pipeline exit path
    /// (success, error, client abort).
    pub async fn release(&self, key_id: &str, user_id: &str, session_id: &str) {
        self.redis.srem(&key_session_key(key_id), session_id).await;
        self.redis.srem(&user_session_key(user_id), session_id).await;
        self.redis.srem(ALL_SESSIONS_KEY, session_id).await;
    }

    pub async fn get_key_session_count(&self, key_id: &str) -> u64 {
        self.redis.scard(&key_session_key(key_id)).await
    }

    pub async fn get_user_session_count(&self, user_id: &str) -> u64 {
        self.redis.scard(&user_session_key(user_id)).await
    }

    /// spec.md §4.4: the tracker's global view, independent of any
    /// single key or user — every session id currently holding a slot.
    pub async fn get_active_sessions(&self) -> Vec<String> {
        self.redis.smembers(ALL_SESSIONS_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_facade::InProcessRedisFacade;

    #[tokio::test]
    async fn acquire_then_release_tracks_count() {
        let tracker = SessionTracker::new(Arc::new(InProcessRedisFacade::default()));
        tracker.acquire("key-1", "user-1", "sess-a").await;
        tracker.acquire("key-1", "user-1", "sess-b").await;
        assert_eq!(tracker.get_key_session_count("key-1").await, 2);
        assert_eq!(tracker.get_user_session_count("user-1").await, 2);

        tracker.release("key-1", "user-1", "sess-a").await;
        assert_eq!(tracker.get_key_session_count("key-1").await, 1);
    }

    #[tokio::test]
    async fn distinct_keys_share_a_user_but_not_a_key_set() {
        let tracker = SessionTracker::new(Arc::new(InProcessRedisFacade::default()));
        tracker.acquire("key-1", "user-1", "sess-a").await;
        tracker.acquire("key-2", "user-1", "sess-b").await;
        assert_eq!(tracker.get_key_session_count("key-1").await, 1);
        assert_eq!(tracker.get_user_session_count("user-1").await, 2);
    }

    #[tokio::test]
    async fn active_sessions_spans_every_key_and_user() {
        let tracker = SessionTracker::new(Arc::new(InProcessRedisFacade::default()));
        tracker.acquire("key-1", "user-1", "sess-a").await;
        tracker.acquire("key-2", "user-2", "sess-b").await;
        let mut active = tracker.get_active_sessions().await;
        active.sort();
        assert_eq!(active, vec!["sess-a".to_string(), "sess-b".to_string()]);

        tracker.release("key-1", "user-1", "sess-a").await;
        assert_eq!(tracker.get_active_sessions().await, vec!["sess-b".to_string()]);
    }
}
