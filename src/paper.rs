//! Paper-trading gateway backed by a JSON wallet file.
//!
//! Holdings live in a single file that survives restarts. Swaps settle
//! instantly at the most recent quotes seen through this gateway, minus
//! the configured slippage haircut, so a long-running dry deployment
//! behaves like a real venue without touching a chain.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gateway::{BalanceSource, PriceSource, SwapExecutor};
use crate::portfolio::{serde_map, BalanceMap, PriceMap};
use crate::store::write_atomic;
use crate::token::Symbol;

/// Wallet file layout. Quotes are persisted alongside balances so swaps
/// still price correctly after a restart while the feed is down.
#[derive(Debug, Serialize, Deserialize)]
struct WalletFile {
    #[serde(with = "serde_map")]
    balances: BalanceMap,
    #[serde(with = "serde_map", default)]
    quotes: PriceMap,
    updated_at: DateTime<Utc>,
}

struct PaperInner {
    path: PathBuf,
    slippage: f64,
    feed: Box<dyn PriceSource>,
    balances: Mutex<BalanceMap>,
    quotes: Mutex<PriceMap>,
}

/// Clones share one wallet; the engine gets boxed trait views of the
/// same instance.
#[derive(Clone)]
pub struct PaperGateway {
    inner: Arc<PaperInner>,
}

impl PaperGateway {
    /// Load the wallet file, or seed a fresh one from the configured
    /// initial balances.
    pub fn open(config: &Config, feed: Box<dyn PriceSource>) -> Result<Self> {
        let path = config.wallet_path();
        let (balances, quotes) = if path.exists() {
            let text = std::fs::read_to_string(&path).map_err(|e| Error::StoreRead {
                path: path.clone(),
                source: e,
            })?;
            let file: WalletFile = serde_json::from_str(&text)?;
            info!("loaded paper wallet with {} tokens from {}", file.balances.len(), path.display());
            (file.balances, file.quotes)
        } else {
            let mut balances: BalanceMap =
                config.tracked().into_iter().map(|s| (s, 0.0)).collect();
            for b in &config.wallet.initial {
                balances.insert(Symbol::new(&b.symbol), b.amount);
            }
            info!("seeding new paper wallet at {}", path.display());
            (balances, PriceMap::default())
        };

        let gateway = Self {
            inner: Arc::new(PaperInner {
                path,
                slippage: config.rebalance.slippage,
                feed,
                balances: Mutex::new(balances),
                quotes: Mutex::new(quotes),
            }),
        };
        gateway.persist()?;
        Ok(gateway)
    }

    fn persist(&self) -> Result<()> {
        let file = WalletFile {
            balances: self.lock_balances().clone(),
            quotes: self.lock_quotes().clone(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.inner.path, &json)
    }

    fn persist_best_effort(&self) {
        if let Err(e) = self.persist() {
            warn!("paper wallet persist failed: {e}");
        }
    }

    fn lock_balances(&self) -> std::sync::MutexGuard<'_, BalanceMap> {
        self.inner.balances.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_quotes(&self) -> std::sync::MutexGuard<'_, PriceMap> {
        self.inner.quotes.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl BalanceSource for PaperGateway {
    fn balances(&self) -> Result<BalanceMap> {
        Ok(self.lock_balances().clone())
    }
}

impl PriceSource for PaperGateway {
    /// Delegates to the real feed and remembers the quotes for swap
    /// settlement.
    fn fetch(&self) -> Result<PriceMap> {
        let prices = self.inner.feed.fetch()?;
        *self.lock_quotes() = prices.clone();
        self.persist_best_effort();
        Ok(prices)
    }
}

impl SwapExecutor for PaperGateway {
    fn swap(&self, from: Symbol, to: Symbol, amount: f64) -> Result<()> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::Swap(format!("non-positive amount {amount} for {from}")));
        }

        let (price_from, price_to) = {
            let quotes = self.lock_quotes();
            let price_from = *quotes
                .get(&from)
                .ok_or_else(|| Error::Swap(format!("no quote for {from}")))?;
            let price_to = *quotes
                .get(&to)
                .ok_or_else(|| Error::Swap(format!("no quote for {to}")))?;
            (price_from, price_to)
        };
        if price_from <= 0.0 || price_to <= 0.0 {
            return Err(Error::Swap(format!("unusable quotes for {from} -> {to}")));
        }

        {
            let mut balances = self.lock_balances();
            let held = balances.get(&from).copied().unwrap_or(0.0);
            if held < amount {
                return Err(Error::Swap(format!(
                    "insufficient {from}: have {held}, need {amount}"
                )));
            }
            let out = amount * price_from / price_to * (1.0 - self.inner.slippage);
            *balances.entry(from).or_insert(0.0) -= amount;
            *balances.entry(to).or_insert(0.0) += out;
        }

        self.persist_best_effort();
        Ok(())
    }
}
