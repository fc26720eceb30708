//! Rate-limit guard (L5). `ensure` runs the six checks from spec.md
//! §4.5 in their mandated order and returns the first denial. Tie
//! breaks at exactly the limit are denials — `current >= limit`, not
//! `>`.

use std::sync::Arc;

use gw_common::window::{self, DailyResetMode, Period};
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::redis_facade::RedisFacade;
use crate::session_tracker::SessionTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Rpm,
    UserDailyCost,
    UserTotalCost,
    KeyFiveHourCost,
    KeyDailyCost,
    KeyWeeklyCost,
    KeyMonthlyCost,
    KeyTotalCost,
    KeyConcurrentSessions,
}

#[derive(Debug, Clone)]
pub struct RateLimitDenial {
    pub limit_type: LimitType,
    pub current: Decimal,
    pub limit: Decimal,
    pub reset_time: Option<OffsetDateTime>,
}

/// Policy fields a key doesn't set are inherited from the owning
/// user's policy — spec.md §4.5: "Keys inherit the user's configured
/// policy where their own is null."
#[derive(Debug, Clone, Default)]
pub struct UserPolicy {
    pub user_id: String,
    pub rpm_limit: Option<u64>,
    pub daily_cost_limit: Option<Decimal>,
    pub daily_reset_time: Option<String>,
    pub daily_reset_mode: Option<DailyResetMode>,
    pub total_cost_limit: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct KeyPolicy {
    pub key_id: String,
    pub five_hour_cost_limit: Option<Decimal>,
    pub daily_cost_limit: Option<Decimal>,
    pub daily_reset_time: Option<String>,
    pub daily_reset_mode: Option<DailyResetMode>,
    pub weekly_cost_limit: Option<Decimal>,
    pub monthly_cost_limit: Option<Decimal>,
    pub total_cost_limit: Option<Decimal>,
    pub concurrent_session_limit: Option<u64>,
}

impl KeyPolicy {
    fn effective_daily_cost_limit(&self, user: &UserPolicy) -> Option<Decimal> {
        self.daily_cost_limit.or(user.daily_cost_limit)
    }

    fn effective_daily_reset_time<'a>(&'a self, user: &'a UserPolicy) -> Option<&'a str> {
        self.daily_reset_time
            .as_deref()
            .or(user.daily_reset_time.as_deref())
    }

    fn effective_daily_reset_mode(&self, user: &UserPolicy) -> Option<DailyResetMode> {
        self.daily_reset_mode.or(user.daily_reset_mode)
    }
}

pub struct RateLimitSession<'a> {
    pub user: &'a UserPolicy,
    pub key: &'a KeyPolicy,
    pub session_id: &'a str,
    pub now: OffsetDateTime,
}

pub struct RateLimitGuard {
    redis: Arc<dyn RedisFacade>,
    sessions: Arc<SessionTracker>,
}

impl RateLimitGuard {
    pub fn new(redis: Arc<dyn RedisFacade>, sessions: Arc<SessionTracker>) -> Self {
        RateLimitGuard { redis, sessions }
    }

    pub async fn ensure(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        self.check_user_rpm(session).await?;
        self.check_user_daily_cost(session).await?;
        self.check_user_total_cost(session).await?;
        self.check_key_cost_bundle(session).await?;
        self.check_key_total_cost(session).await?;
        self.check_key_concurrent_sessions(session).await?;
        Ok(())
    }

    async fn check_user_rpm(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        let Some(limit) = session.user.rpm_limit else {
            return Ok(());
        };
        let now = session.now;
        let bucket = format!(
            "{:04}{:02}{:02}{:02}{:02}",
            now.year(),
            now.month() as u8,
            now.day(),
            now.hour(),
            now.minute()
        );
        let key = format!("rate:rpm:{}:{}", session.user.user_id, bucket);
        let current = self.redis.check_and_increment_rpm(&key, 120).await;
        if current >= limit {
            return Err(RateLimitDenial {
                limit_type: LimitType::Rpm,
                current: Decimal::from(current),
                limit: Decimal::from(limit),
                reset_time: None,
            });
        }
        Ok(())
    }

    async fn cost_check(
        &self,
        limit_type: LimitType,
        scope: &str,
        id: &str,
        period: Period,
        reset_time: Option<&str>,
        mode: Option<DailyResetMode>,
        limit: Option<Decimal>,
        now: OffsetDateTime,
    ) -> Result<(), RateLimitDenial> {
        let Some(limit) = limit else {
            return Ok(());
        };
        let range = window::get_time_range(period, now, reset_time, mode);
        let period_label = period_label(period, &range);
        let key = format!("rate:cost:{scope}:{id}:{period_label}");
        let current = self.redis.get_current_cost(&key).await;
        if current >= limit {
            return Err(RateLimitDenial {
                limit_type,
                current,
                limit,
                reset_time: range.reset_at,
            });
        }
        Ok(())
    }

    async fn check_user_daily_cost(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        self.cost_check(
            LimitType::UserDailyCost,
            "user",
            &session.user.user_id,
            Period::Daily,
            session.user.daily_reset_time.as_deref(),
            session.user.daily_reset_mode,
            session.user.daily_cost_limit,
            session.now,
        )
        .await
    }

    async fn check_user_total_cost(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        if let Some(limit) = session.user.total_cost_limit {
            let key = format!("rate:cost:user:{}:total", session.user.user_id);
            let current = self.redis.get_current_cost(&key).await;
            if current >= limit {
                return Err(RateLimitDenial {
                    limit_type: LimitType::UserTotalCost,
                    current,
                    limit,
                    reset_time: None,
                });
            }
        }
        Ok(())
    }

    async fn check_key_cost_bundle(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        self.cost_check(
            LimitType::KeyFiveHourCost,
            "key",
            &session.key.key_id,
            Period::FiveHour,
            None,
            None,
            session.key.five_hour_cost_limit,
            session.now,
        )
        .await?;
        self.cost_check(
            LimitType::KeyDailyCost,
            "key",
            &session.key.key_id,
            Period::Daily,
            session.key.effective_daily_reset_time(session.user),
            session.key.effective_daily_reset_mode(session.user),
            session.key.effective_daily_cost_limit(session.user),
            session.now,
        )
        .await?;
        self.cost_check(
            LimitType::KeyWeeklyCost,
            "key",
            &session.key.key_id,
            Period::Weekly,
            None,
            None,
            session.key.weekly_cost_limit,
            session.now,
        )
        .await?;
        self.cost_check(
            LimitType::KeyMonthlyCost,
            "key",
            &session.key.key_id,
            Period::Monthly,
            None,
            None,
            session.key.monthly_cost_limit,
            session.now,
        )
        .await
    }

    async fn check_key_total_cost(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        if let Some(limit) = session.key.total_cost_limit {
            let key = format!("rate:cost:key:{}:total", session.key.key_id);
            let current = self.redis.get_current_cost(&key).await;
            if current >= limit {
                return Err(RateLimitDenial {
                    limit_type: LimitType::KeyTotalCost,
                    current,
                    limit,
                    reset_time: None,
                });
            }
        }
        Ok(())
    }

    async fn check_key_concurrent_sessions(&self, session: &RateLimitSession<'_>) -> Result<(), RateLimitDenial> {
        let Some(limit) = session.key.concurrent_session_limit else {
            return Ok(());
        };
        let current = self.sessions.get_key_session_count(&session.key.key_id).await;
        if current >= limit {
            return Err(RateLimitDenial {
                limit_type: LimitType::KeyConcurrentSessions,
                current: Decimal::from(current),
                limit: Decimal::from(limit),
                reset_time: None,
            });
        }
        Ok(())
    }
}

fn period_label(period: Period, range: &window::TimeRange) -> String {
    match period {
        Period::FiveHour => "5h".to_string(),
        Period::Daily => format!("daily:{}", range.start.date()),
        Period::Weekly => format!("weekly:{}", range.start.date()),
        Period::Monthly => format!("monthly:{}-{:02}", range.start.year(), range.start.month() as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_facade::InProcessRedisFacade;
    use time::macros::datetime;

    fn guard() -> RateLimitGuard {
        let redis: Arc<dyn RedisFacade> = Arc::new(InProcessRedisFacade::default());
        let sessions = Arc::new(SessionTracker::new(redis.clone()));
        RateLimitGuard::new(redis, sessions)
    }

    #[tokio::test]
    async fn rpm_denies_at_the_limit_inclusive() {
        let guard = guard();
        let user = UserPolicy {
            user_id: "u1".to_string(),
            rpm_limit: Some(3),
            ..Default::default()
        };
        let key = KeyPolicy {
            key_id: "k1".to_string(),
            ..Default::default()
        };
        let now = datetime!(2026-07-28 10:00:00 UTC);
        let session = RateLimitSession {
            user: &user,
            key: &key,
            session_id: "sess-1",
            now,
        };
        assert!(guard.ensure(&session).await.is_ok());
        assert!(guard.ensure(&session).await.is_ok());
        assert!(guard.ensure(&session).await.is_ok());
        let denial = guard.ensure(&session).await.unwrap_err();
        assert_eq!(denial.limit_type, LimitType::Rpm);
        assert_eq!(denial.current, Decimal::from(4));
    }

    #[tokio::test]
    async fn key_inherits_user_daily_cost_limit_when_unset() {
        let guard = guard();
        let user = UserPolicy {
            user_id: "u1".to_string(),
            daily_cost_limit: Some(Decimal::new(500, 2)),
            ..Default::default()
        };
        let key = KeyPolicy {
            key_id: "k1".to_string(),
            ..Default::default()
        };
        let now = datetime!(2026-07-28 10:00:00 UTC);
        guard
            .redis
            .increment_cost(&format!("rate:cost:key:k1:daily:{}", now.date()), Decimal::new(600, 2), 86_400)
            .await;
        let session = RateLimitSession {
            user: &user,
            key: &key,
            session_id: "sess-1",
            now,
        };
        let denial = guard.ensure(&session).await.unwrap_err();
        assert_eq!(denial.limit_type, LimitType::KeyDailyCost);
    }

    #[tokio::test]
    async fn concurrent_session_cap_is_inclusive() {
        let guard = guard();
        let user = UserPolicy {
            user_id: "u1".to_string(),
            ..Default::default()
        };
        let key = KeyPolicy {
            key_id: "k1".to_string(),
            concurrent_session_limit: Some(1),
            ..Default::default()
        };
        guard.sessions.acquire("k1", "u1", "sess-existing").await;
        let now = datetime!(2026-07-28 10:00:00 UTC);
        let session = RateLimitSession {
            user: &user,
            key: &key,
            session_id: "sess-new",
            now,
        };
        let denial = guard.ensure(&session).await.unwrap_err();
        assert_eq!(denial.limit_type, LimitType::KeyConcurrentSessions);
    }
}
