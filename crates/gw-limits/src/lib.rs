pub mod rate_limit;
pub mod redis_facade;
pub mod session_tracker;

pub use rate_limit::{KeyPolicy, LimitType, RateLimitDenial, RateLimitGuard, RateLimitSession, UserPolicy};
pub use redis_facade::{InProcessRedisFacade, LiveRedisFacade, RedisFacade};
pub use session_tracker::SessionTracker;
