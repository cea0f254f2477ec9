//! API tier table: how many requests per minute the remote provider allows,
//! and how that turns into a number of concurrent page requests.
//!
//! ## Why a table instead of a global
//!
//! The tier→budget mapping is policy. It lives in an explicit [`TierTable`]
//! carried by the config, so tests and callers with different provider
//! contracts can swap it without touching process-wide state.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One provider tier: a name as the user writes it and its request rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTier {
    pub name: String,
    pub requests_per_minute: u32,
}

impl ApiTier {
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            name: name.into(),
            requests_per_minute,
        }
    }
}

/// Ordered tier scale plus the parameters of the RPM → worker formula.
///
/// `W = floor(rpm × assumed_request / 60s × safety_factor)`, clamped to
/// `[1, ceiling]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    tiers: Vec<ApiTier>,
    /// Typical wall-clock time of one vision request.
    pub assumed_request: Duration,
    /// Fraction of the rate limit we allow ourselves to use.
    pub safety_factor: f64,
    /// Hard cap on concurrent requests regardless of tier.
    pub ceiling: usize,
}

impl Default for TierTable {
    /// Anthropic's published tiers.
    fn default() -> Self {
        Self::new(vec![
            ApiTier::new("1", 50),
            ApiTier::new("2", 1000),
            ApiTier::new("3", 2000),
            ApiTier::new("4", 4000),
        ])
    }
}

impl TierTable {
    /// Build a table; tiers are kept sorted by ascending rate.
    pub fn new(mut tiers: Vec<ApiTier>) -> Self {
        tiers.sort_by_key(|t| t.requests_per_minute);
        Self {
            tiers,
            assumed_request: Duration::from_secs(20),
            safety_factor: 0.8,
            ceiling: 64,
        }
    }

    pub fn tiers(&self) -> &[ApiTier] {
        &self.tiers
    }

    /// The most conservative tier, if the table is not empty.
    pub fn lowest(&self) -> Option<&ApiTier> {
        self.tiers.first()
    }

    /// Look a tier up by name (case-insensitive, surrounding whitespace ignored).
    ///
    /// Unknown names fall back to the lowest tier.
    pub fn lookup(&self, name: &str) -> Option<&ApiTier> {
        let name = name.trim();
        self.tiers
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .or_else(|| self.lowest())
    }

    /// Concurrent-request budget for `tier`, before clipping to the task count.
    ///
    /// An empty table yields 1.
    pub fn remote_budget(&self, tier: &str) -> usize {
        let Some(tier) = self.lookup(tier) else {
            return 1;
        };
        let per_second = tier.requests_per_minute as f64 / 60.0;
        let in_flight = per_second * self.assumed_request.as_secs_f64() * self.safety_factor;
        (in_flight.floor() as usize).clamp(1, self.ceiling.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budgets() {
        let table = TierTable::default();
        // 50 rpm × 20 s / 60 × 0.8 = 13.3
        assert_eq!(table.remote_budget("1"), 13);
        // 1000 rpm → 266, capped
        assert_eq!(table.remote_budget("2"), 64);
        assert_eq!(table.remote_budget("4"), 64);
    }

    #[test]
    fn unknown_tier_uses_lowest() {
        let table = TierTable::default();
        assert_eq!(table.remote_budget("enterprise"), table.remote_budget("1"));
        assert_eq!(table.lookup(" 3 ").map(|t| t.requests_per_minute), Some(2000));
    }

    #[test]
    fn budget_is_monotonic_in_rate() {
        let mut table = TierTable::new(vec![
            ApiTier::new("tiny", 1),
            ApiTier::new("small", 30),
            ApiTier::new("big", 600),
        ]);
        table.ceiling = 1000;
        let budgets: Vec<usize> = ["tiny", "small", "big"]
            .iter()
            .map(|t| table.remote_budget(t))
            .collect();
        assert_eq!(budgets[0], 1, "never below one worker");
        assert!(budgets.windows(2).all(|w| w[0] <= w[1]), "{budgets:?}");
    }

    #[test]
    fn tiers_sorted_and_empty_table_is_safe() {
        let table = TierTable::new(vec![ApiTier::new("b", 500), ApiTier::new("a", 10)]);
        assert_eq!(table.lowest().map(|t| t.name.as_str()), Some("a"));
        assert_eq!(TierTable::new(Vec::new()).remote_budget("1"), 1);
    }
}
