//! Portfolio maps, weight computation, and per-cycle state.
//!
//! Weights are derived values (balance × price / total value) and are never
//! stored; each polling cycle rebuilds a fresh [`PortfolioState`] from the
//! authoritative balance and price maps.

use rustc_hash::FxHashMap;

use crate::token::Symbol;

pub type BalanceMap = FxHashMap<Symbol, f64>;
pub type PriceMap = FxHashMap<Symbol, f64>;
pub type WeightMap = FxHashMap<Symbol, f64>;

/// USD value of one holding. Non-finite products count as zero so a bad
/// input can never poison a sum with NaN.
pub fn position_value(balance: f64, price: f64) -> f64 {
    let value = balance * price;
    if value.is_finite() { value } else { 0.0 }
}

/// Total portfolio value in USD.
pub fn total_value(balances: &BalanceMap, prices: &PriceMap) -> f64 {
    balances
        .iter()
        .map(|(token, balance)| {
            position_value(*balance, prices.get(token).copied().unwrap_or(0.0))
        })
        .sum()
}

/// Current allocation weights. If total value is zero every weight is zero
/// rather than a division by zero.
pub fn compute_weights(balances: &BalanceMap, prices: &PriceMap) -> WeightMap {
    let total = total_value(balances, prices);
    balances
        .iter()
        .map(|(token, balance)| {
            let weight = if total > 0.0 {
                position_value(*balance, prices.get(token).copied().unwrap_or(0.0)) / total
            } else {
                0.0
            };
            (*token, weight)
        })
        .collect()
}

/// Immutable snapshot of one polling cycle's inputs and derived weights.
#[derive(Debug, Clone)]
pub struct PortfolioState {
    pub balances: BalanceMap,
    pub prices: PriceMap,
    pub weights: WeightMap,
    pub total_value: f64,
}

impl PortfolioState {
    pub fn new(balances: BalanceMap, prices: PriceMap) -> Self {
        let total_value = total_value(&balances, &prices);
        let weights = compute_weights(&balances, &prices);
        Self {
            balances,
            prices,
            weights,
            total_value,
        }
    }

    pub fn balance_of(&self, token: Symbol) -> f64 {
        self.balances.get(&token).copied().unwrap_or(0.0)
    }

    pub fn price_of(&self, token: Symbol) -> f64 {
        self.prices.get(&token).copied().unwrap_or(0.0)
    }

    pub fn weight_of(&self, token: Symbol) -> f64 {
        self.weights.get(&token).copied().unwrap_or(0.0)
    }

    /// USD value of one holding at this cycle's prices.
    pub fn value_of(&self, token: Symbol) -> f64 {
        position_value(self.balance_of(token), self.price_of(token))
    }
}

/// Serialize token→f64 maps as JSON objects with sorted keys.
pub mod serde_map {
    use std::collections::BTreeMap;

    use rustc_hash::FxHashMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::token::Symbol;

    pub fn serialize<S: Serializer>(
        map: &FxHashMap<Symbol, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let sorted: BTreeMap<&str, f64> = map.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        sorted.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<FxHashMap<Symbol, f64>, D::Error> {
        let raw = BTreeMap::<String, f64>::deserialize(deserializer)?;
        Ok(raw.iter().map(|(k, v)| (Symbol::new(k), *v)).collect())
    }
}
