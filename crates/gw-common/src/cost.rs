//! Cost engine (component L2): pure function from usage + price to a
//! fixed-precision USD cost.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

const OUTPUT_FRACTIONAL_DIGITS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    FiveMinutes,
    OneHour,
    Mixed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_5m_tokens: u64,
    pub cache_creation_1h_tokens: u64,
    pub cache_read_tokens: u64,
    /// Unsplit cache-creation tokens reported by an upstream that
    /// doesn't distinguish 5m/1h; attributed via `cache_ttl`.
    pub cache_creation_input_tokens_unsplit: u64,
}

/// Per-token USD rates for one `ModelPrice` row. `None` cache rates
/// fall back to the defaults in spec.md §4.2.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPriceRates {
    pub input: Decimal,
    pub output: Decimal,
    pub cache_creation_5m: Option<Decimal>,
    pub cache_creation_1h: Option<Decimal>,
    pub cache_read: Option<Decimal>,
}

impl ModelPriceRates {
    fn cache_5m_rate(&self) -> Decimal {
        self.cache_creation_5m.unwrap_or(self.input * Decimal::new(125, 2))
    }

    fn cache_1h_rate(&self) -> Decimal {
        self.cache_creation_1h.unwrap_or(self.input * Decimal::new(2, 0))
    }

    fn cache_read_rate(&self) -> Decimal {
        if let Some(rate) = self.cache_read {
            return rate;
        }
        if self.input != Decimal::ZERO {
            self.input * Decimal::new(1, 1)
        } else {
            self.output * Decimal::new(1, 1)
        }
    }
}

/// `cost = Σ qty_i × rate_i`, rounded to 15 fractional digits, then
/// scaled by `multiplier` (default `1.0`). Pure, no I/O.
pub fn calculate_request_cost(
    usage: &TokenUsage,
    rates: &ModelPriceRates,
    cache_ttl: Option<CacheTtl>,
    multiplier: Option<Decimal>,
) -> Decimal {
    let (unsplit_5m, unsplit_1h) = match cache_ttl.unwrap_or(CacheTtl::Mixed) {
        CacheTtl::FiveMinutes => (usage.cache_creation_input_tokens_unsplit, 0),
        CacheTtl::OneHour => (0, usage.cache_creation_input_tokens_unsplit),
        CacheTtl::Mixed => (usage.cache_creation_input_tokens_unsplit, 0),
    };

    let input_cost = Decimal::from(usage.input_tokens) * rates.input;
    let output_cost = Decimal::from(usage.output_tokens) * rates.output;
    let cache_5m_tokens = usage.cache_creation_5m_tokens + unsplit_5m;
    let cache_1h_tokens = usage.cache_creation_1h_tokens + unsplit_1h;
    let cache_5m_cost = Decimal::from(cache_5m_tokens) * rates.cache_5m_rate();
    let cache_1h_cost = Decimal::from(cache_1h_tokens) * rates.cache_1h_rate();
    let cache_read_cost = Decimal::from(usage.cache_read_tokens) * rates.cache_read_rate();

    let total = input_cost + output_cost + cache_5m_cost + cache_1h_cost + cache_read_cost;
    let total = total * multiplier.unwrap_or(Decimal::ONE);
    total.round_dp(OUTPUT_FRACTIONAL_DIGITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> ModelPriceRates {
        ModelPriceRates {
            input: Decimal::new(3, 6),   // $0.000003 / token
            output: Decimal::new(15, 6), // $0.000015 / token
            cache_creation_5m: None,
            cache_creation_1h: None,
            cache_read: None,
        }
    }

    #[test]
    fn pure_and_idempotent() {
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 200,
            ..Default::default()
        };
        let a = calculate_request_cost(&usage, &rates(), None, None);
        let b = calculate_request_cost(&usage, &rates(), None, None);
        assert_eq!(a, b);
        assert_eq!(a.scale(), OUTPUT_FRACTIONAL_DIGITS.min(a.scale().max(OUTPUT_FRACTIONAL_DIGITS)));
    }

    #[test]
    fn defaults_apply_when_cache_rates_absent() {
        let usage = TokenUsage {
            cache_creation_5m_tokens: 100,
            ..Default::default()
        };
        let cost = calculate_request_cost(&usage, &rates(), None, None);
        let expected = (Decimal::from(100u64) * rates().input * Decimal::new(125, 2))
            .round_dp(OUTPUT_FRACTIONAL_DIGITS);
        assert_eq!(cost, expected);
    }

    #[test]
    fn unsplit_cache_creation_defaults_to_5m_bucket() {
        let usage = TokenUsage {
            cache_creation_input_tokens_unsplit: 40,
            ..Default::default()
        };
        let via_mixed = calculate_request_cost(&usage, &rates(), Some(CacheTtl::Mixed), None);
        let via_explicit_5m = calculate_request_cost(
            &TokenUsage {
                cache_creation_5m_tokens: 40,
                ..Default::default()
            },
            &rates(),
            None,
            None,
        );
        assert_eq!(via_mixed, via_explicit_5m);
    }

    #[test]
    fn multiplier_scales_total() {
        let usage = TokenUsage {
            input_tokens: 1000,
            ..Default::default()
        };
        let base = calculate_request_cost(&usage, &rates(), None, None);
        let doubled = calculate_request_cost(&usage, &rates(), None, Some(Decimal::new(2, 0)));
        assert_eq!(doubled, base * Decimal::new(2, 0));
    }

    #[test]
    fn cache_read_falls_back_to_output_rate_when_input_missing() {
        let rates = ModelPriceRates {
            input: Decimal::ZERO,
            output: Decimal::new(15, 6),
            ..Default::default()
        };
        let usage = TokenUsage {
            cache_read_tokens: 10,
            ..Default::default()
        };
        let cost = calculate_request_cost(&usage, &rates, None, None);
        let expected = (Decimal::from(10u64) * rates.output * Decimal::new(1, 1))
            .round_dp(OUTPUT_FRACTIONAL_DIGITS);
        assert_eq!(cost, expected);
    }
}
