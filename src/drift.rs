//! Allocation drift detection.
//!
//! Compares current weights against targets and flags tokens whose deviation
//! clears BOTH the fractional threshold and the minimum trade value. The dual
//! gate keeps noise-level imbalances and uneconomical micro-trades out of the
//! planner.

use serde::Serialize;

use crate::portfolio::{PortfolioState, WeightMap};
use crate::token::Symbol;

/// One token's qualifying deviation from its target weight.
///
/// Positive deviation means overweight (sell), negative means underweight
/// (buy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeIntent {
    pub token: Symbol,
    pub deviation: f64,
}

impl TradeIntent {
    pub fn is_sell(&self) -> bool {
        self.deviation > 0.0
    }

    pub fn is_buy(&self) -> bool {
        self.deviation < 0.0
    }

    /// USD value implied by this deviation at the given portfolio value.
    pub fn value_usd(&self, total_value: f64) -> f64 {
        self.deviation.abs() * total_value
    }
}

/// Flag every token whose drift clears both gates.
///
/// A token qualifies only if |deviation| > threshold AND
/// |deviation| × total value > min_trade_usd; both comparisons are strict,
/// so a deviation sitting exactly at a gate is left untouched. The result is
/// ordered by descending |deviation| (symbol as tiebreak) so the largest
/// imbalances are corrected first.
pub fn detect(
    state: &PortfolioState,
    targets: &WeightMap,
    threshold: f64,
    min_trade_usd: f64,
) -> Vec<TradeIntent> {
    let mut intents: Vec<TradeIntent> = targets
        .iter()
        .filter_map(|(token, target)| {
            let deviation = state.weight_of(*token) - target;
            let qualifies = deviation.abs() > threshold
                && deviation.abs() * state.total_value > min_trade_usd;
            qualifies.then_some(TradeIntent {
                token: *token,
                deviation,
            })
        })
        .collect();

    intents.sort_by(|a, b| {
        b.deviation
            .abs()
            .partial_cmp(&a.deviation.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.token.cmp(&b.token))
    });
    intents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{BalanceMap, PriceMap};

    fn weth() -> Symbol {
        Symbol::new("WETH")
    }
    fn wbtc() -> Symbol {
        Symbol::new("WBTC")
    }
    fn link() -> Symbol {
        Symbol::new("LINK")
    }

    fn state_from_values(values: &[(Symbol, f64)]) -> PortfolioState {
        // Price everything at $1 so balances read directly as USD values.
        let balances: BalanceMap = values.iter().copied().collect();
        let prices: PriceMap = values.iter().map(|(s, _)| (*s, 1.0)).collect();
        PortfolioState::new(balances, prices)
    }

    fn targets(entries: &[(Symbol, f64)]) -> WeightMap {
        entries.iter().copied().collect()
    }

    #[test]
    fn flags_token_over_both_gates() {
        // WETH at 60% vs 40% target on a $1000 book: deviation 0.20, $200.
        let state = state_from_values(&[(weth(), 600.0), (wbtc(), 400.0)]);
        let targets = targets(&[(weth(), 0.4), (wbtc(), 0.6)]);

        let intents = detect(&state, &targets, 0.05, 50.0);
        assert_eq!(intents.len(), 2);
        let weth_intent = intents.iter().find(|i| i.token == weth()).unwrap();
        assert!(weth_intent.is_sell());
        let wbtc_intent = intents.iter().find(|i| i.token == wbtc()).unwrap();
        assert!(wbtc_intent.is_buy());
    }

    #[test]
    fn exactly_at_threshold_is_not_flagged() {
        // 9/16 vs 1/2 gives a deviation of exactly 0.0625 in binary floats.
        let state = state_from_values(&[(weth(), 562.5), (wbtc(), 437.5)]);
        let targets = targets(&[(weth(), 0.5), (wbtc(), 0.5)]);

        assert!(detect(&state, &targets, 0.0625, 1.0).is_empty());
        // A hair under the deviation and both tokens qualify.
        assert_eq!(detect(&state, &targets, 0.0624, 1.0).len(), 2);
    }

    #[test]
    fn exactly_at_min_trade_value_is_not_flagged() {
        let state = state_from_values(&[(weth(), 56.25), (wbtc(), 43.75)]);
        let targets = targets(&[(weth(), 0.5), (wbtc(), 0.5)]);

        // Deviation 0.0625 on a $100 book implies a $6.25 trade.
        assert!(detect(&state, &targets, 0.01, 6.25).is_empty());
        assert_eq!(detect(&state, &targets, 0.01, 6.0).len(), 2);
    }

    #[test]
    fn ordered_by_descending_magnitude() {
        let state = state_from_values(&[(weth(), 100.0), (wbtc(), 500.0), (link(), 400.0)]);
        let targets = targets(&[(weth(), 0.4), (wbtc(), 0.3), (link(), 0.3)]);

        let intents = detect(&state, &targets, 0.01, 1.0);
        // Deviations: WETH -0.30, WBTC +0.20, LINK +0.10.
        assert_eq!(intents.len(), 3);
        assert_eq!(intents[0].token, weth());
        assert_eq!(intents[1].token, wbtc());
        assert_eq!(intents[2].token, link());
    }

    #[test]
    fn equal_magnitudes_break_ties_by_symbol() {
        let state = state_from_values(&[(wbtc(), 600.0), (link(), 400.0)]);
        let targets = targets(&[(wbtc(), 0.5), (link(), 0.5)]);

        let intents = detect(&state, &targets, 0.01, 1.0);
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].token, link());
        assert_eq!(intents[1].token, wbtc());
    }

    #[test]
    fn balanced_portfolio_yields_no_intents() {
        let state = state_from_values(&[(weth(), 500.0), (wbtc(), 500.0)]);
        let targets = targets(&[(weth(), 0.5), (wbtc(), 0.5)]);
        assert!(detect(&state, &targets, 0.05, 50.0).is_empty());
    }

    #[test]
    fn zero_value_portfolio_yields_no_intents() {
        // All weights read as zero; deviations equal the raw targets but the
        // value gate (deviation × $0) can never clear min_trade_usd.
        let state = state_from_values(&[(weth(), 0.0), (wbtc(), 0.0)]);
        let targets = targets(&[(weth(), 0.5), (wbtc(), 0.5)]);
        assert!(detect(&state, &targets, 0.05, 50.0).is_empty());
    }

    #[test]
    fn intent_value_usd() {
        let intent = TradeIntent {
            token: weth(),
            deviation: -0.25,
        };
        assert_eq!(intent.value_usd(1000.0), 250.0);
    }
}
