//! Buy-and-hold benchmark.
//!
//! The first successful cycle captures a snapshot of holdings and prices.
//! Every later cycle replays that frozen portfolio at current prices to
//! answer one question: did rebalancing beat doing nothing?

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::portfolio::{self, serde_map, total_value, BalanceMap, PriceMap};

/// Frozen copy of the portfolio taken before the first rebalance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(with = "serde_map")]
    pub balances: BalanceMap,
    #[serde(with = "serde_map")]
    pub prices: PriceMap,
    pub captured_at: DateTime<Utc>,
}

impl Baseline {
    pub fn capture(balances: &BalanceMap, prices: &PriceMap, at: DateTime<Utc>) -> Self {
        Self {
            balances: balances.clone(),
            prices: prices.clone(),
            captured_at: at,
        }
    }

    /// Value the frozen holdings at current prices and compare against the
    /// live portfolio. Tokens missing a capture price fall back to their
    /// current price, so late additions contribute no phantom gain.
    pub fn compare(
        &self,
        balances: &BalanceMap,
        prices: &PriceMap,
        now: DateTime<Utc>,
    ) -> HodlComparison {
        let current_value = total_value(balances, prices);
        let hodl_value = total_value(&self.balances, prices);

        let mut initial_value = 0.0;
        for (token, balance) in &self.balances {
            let price = self
                .prices
                .get(token)
                .copied()
                .unwrap_or_else(|| prices.get(token).copied().unwrap_or(0.0));
            initial_value += portfolio::position_value(*balance, price);
        }

        let rebalance_gain = current_value - initial_value;
        let hodl_gain = hodl_value - initial_value;
        let vs_hodl = current_value - hodl_value;

        HodlComparison {
            current_value,
            hodl_value,
            initial_value,
            rebalance_gain,
            hodl_gain,
            vs_hodl,
            rebalance_pct: pct(rebalance_gain, initial_value),
            hodl_pct: pct(hodl_gain, initial_value),
            vs_hodl_pct: pct(vs_hodl, hodl_value),
            days_since_start: (now - self.captured_at).num_seconds() as f64 / 86_400.0,
        }
    }
}

fn pct(gain: f64, base: f64) -> f64 {
    if base == 0.0 {
        0.0
    } else {
        gain / base * 100.0
    }
}

/// Rebalanced portfolio versus the frozen buy-and-hold snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HodlComparison {
    pub current_value: f64,
    pub hodl_value: f64,
    pub initial_value: f64,
    pub rebalance_gain: f64,
    pub hodl_gain: f64,
    /// Positive means rebalancing is ahead of holding.
    pub vs_hodl: f64,
    pub rebalance_pct: f64,
    pub hodl_pct: f64,
    pub vs_hodl_pct: f64,
    pub days_since_start: f64,
}

impl std::fmt::Display for HodlComparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "PERFORMANCE ({:.1} days):", self.days_since_start)?;
        writeln!(
            f,
            "  initial    ${:>12.2}",
            self.initial_value
        )?;
        writeln!(
            f,
            "  rebalanced ${:>12.2}  {:>+8.2}%",
            self.current_value, self.rebalance_pct
        )?;
        writeln!(
            f,
            "  buy-hold   ${:>12.2}  {:>+8.2}%",
            self.hodl_value, self.hodl_pct
        )?;
        write!(
            f,
            "  vs hodl    ${:>12.2}  {:>+8.2}%",
            self.vs_hodl, self.vs_hodl_pct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use crate::token::Symbol;

    fn weth() -> Symbol {
        Symbol::new("WETH")
    }
    fn wbtc() -> Symbol {
        Symbol::new("WBTC")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn identical_portfolio_shows_zero_edge() {
        let balances: BalanceMap = [(weth(), 2.0), (wbtc(), 0.1)].into_iter().collect();
        let prices: PriceMap = [(weth(), 2000.0), (wbtc(), 60_000.0)].into_iter().collect();
        let baseline = Baseline::capture(&balances, &prices, t0());

        let cmp = baseline.compare(&balances, &prices, t0());
        assert_eq!(cmp.vs_hodl, 0.0);
        assert_eq!(cmp.vs_hodl_pct, 0.0);
        assert_eq!(cmp.rebalance_gain, 0.0);
        assert_eq!(cmp.current_value, 10_000.0);
    }

    #[test]
    fn rebalanced_portfolio_measured_against_frozen_holdings() {
        let initial: BalanceMap = [(weth(), 2.0), (wbtc(), 0.1)].into_iter().collect();
        let initial_prices: PriceMap =
            [(weth(), 2000.0), (wbtc(), 60_000.0)].into_iter().collect();
        let baseline = Baseline::capture(&initial, &initial_prices, t0());

        // WETH doubled; the rebalanced book shifted toward WBTC.
        let now_prices: PriceMap = [(weth(), 4000.0), (wbtc(), 60_000.0)].into_iter().collect();
        let current: BalanceMap = [(weth(), 1.0), (wbtc(), 0.15)].into_iter().collect();

        let later = t0() + chrono::Duration::hours(36);
        let cmp = baseline.compare(&current, &now_prices, later);

        assert!((cmp.initial_value - 10_000.0).abs() < 1e-9);
        assert!((cmp.hodl_value - 14_000.0).abs() < 1e-9);
        assert!((cmp.current_value - 13_000.0).abs() < 1e-9);
        assert!((cmp.vs_hodl - -1000.0).abs() < 1e-9);
        assert!((cmp.rebalance_pct - 30.0).abs() < 1e-9);
        assert!((cmp.hodl_pct - 40.0).abs() < 1e-9);
        assert!((cmp.vs_hodl_pct - (-1000.0 / 14_000.0 * 100.0)).abs() < 1e-9);
        assert!((cmp.days_since_start - 1.5).abs() < 1e-9);
    }

    #[test]
    fn missing_capture_price_falls_back_to_current() {
        let balances: BalanceMap = [(weth(), 2.0), (wbtc(), 0.1)].into_iter().collect();
        let capture_prices: PriceMap = [(weth(), 2000.0)].into_iter().collect();
        let baseline = Baseline::capture(&balances, &capture_prices, t0());

        let now_prices: PriceMap = [(weth(), 2000.0), (wbtc(), 50_000.0)].into_iter().collect();
        let cmp = baseline.compare(&balances, &now_prices, t0());

        // WBTC is valued at its current price on both sides, so the
        // missing capture price adds no fictitious gain.
        assert!((cmp.initial_value - 9000.0).abs() < 1e-9);
        assert!((cmp.hodl_gain - 0.0).abs() < 1e-9);
    }

    #[test]
    fn empty_baseline_reports_zero_percentages() {
        let empty = BalanceMap::default();
        let prices: PriceMap = [(weth(), 2000.0)].into_iter().collect();
        let baseline = Baseline::capture(&empty, &prices, t0());

        let current: BalanceMap = [(weth(), 1.0)].into_iter().collect();
        let cmp = baseline.compare(&current, &prices, t0());

        assert_eq!(cmp.initial_value, 0.0);
        assert_eq!(cmp.rebalance_pct, 0.0);
        assert_eq!(cmp.hodl_pct, 0.0);
        assert_eq!(cmp.hodl_value, 0.0);
        assert_eq!(cmp.vs_hodl_pct, 0.0);
    }

    #[test]
    fn snapshot_survives_a_json_round_trip() {
        let balances: BalanceMap = [(weth(), 2.0), (wbtc(), 0.1)].into_iter().collect();
        let prices: PriceMap = [(weth(), 2000.0), (wbtc(), 60_000.0)].into_iter().collect();
        let baseline = Baseline::capture(&balances, &prices, t0());

        let json = serde_json::to_string(&baseline).unwrap();
        let back: Baseline = serde_json::from_str(&json).unwrap();
        assert_eq!(back.captured_at, baseline.captured_at);
        assert_eq!(back.balances.get(&weth()), Some(&2.0));
        assert_eq!(back.prices.get(&wbtc()), Some(&60_000.0));
    }
}
