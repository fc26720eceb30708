pub mod config;
pub mod cost;
pub mod window;

pub use config::{GlobalConfig, GlobalConfigError, GlobalConfigPatch};
pub use cost::{CacheTtl, ModelPriceRates, TokenUsage, calculate_request_cost};
pub use window::{DailyResetMode, Period, ResetInfo, TimeRange, get_seconds_until_midnight};
