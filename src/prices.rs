//! Short-TTL price cache with a last-known fallback.
//!
//! Sits between the engine and the HTTP feed. Quotes younger than the TTL
//! are served from memory; a failed or incomplete fetch falls back to the
//! most recent complete set so a flaky feed degrades to slightly stale
//! prices instead of a dead cycle.

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::gateway::PriceSource;
use crate::portfolio::PriceMap;
use crate::token::Symbol;

/// Where a set of quotes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceProvenance {
    /// Fresh from the feed this call.
    Live,
    /// Served from memory, younger than the TTL.
    Cached,
    /// The feed failed; these are the last complete quotes seen.
    Fallback,
}

impl std::fmt::Display for PriceProvenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceProvenance::Live => write!(f, "live"),
            PriceProvenance::Cached => write!(f, "cached"),
            PriceProvenance::Fallback => write!(f, "fallback"),
        }
    }
}

pub struct PriceCache {
    source: Box<dyn PriceSource>,
    tracked: Vec<Symbol>,
    ttl: Duration,
    cached: Option<(PriceMap, Instant)>,
    last_known: PriceMap,
}

impl PriceCache {
    pub fn new(source: Box<dyn PriceSource>, tracked: Vec<Symbol>, ttl: Duration) -> Self {
        Self {
            source,
            tracked,
            ttl,
            cached: None,
            last_known: PriceMap::default(),
        }
    }

    /// Seed the fallback set, typically from quotes persisted by an
    /// earlier run.
    pub fn with_last_known(mut self, prices: PriceMap) -> Self {
        self.last_known = prices;
        self
    }

    /// Quotes for every tracked token, or `None` when neither the feed nor
    /// the fallback can cover the full basket.
    ///
    /// Only complete, positive quote sets are ever returned or remembered.
    /// A partial fetch is discarded whole rather than merged, so the
    /// fallback always holds quotes that were coherent at one instant.
    pub fn get(&mut self) -> Option<(PriceMap, PriceProvenance)> {
        if let Some((prices, at)) = &self.cached {
            if at.elapsed() < self.ttl {
                debug!("serving {} cached quotes", prices.len());
                return Some((prices.clone(), PriceProvenance::Cached));
            }
        }

        match self.source.fetch() {
            Ok(raw) => {
                if let Some(prices) = normalize(&raw, &self.tracked) {
                    self.last_known = prices.clone();
                    self.cached = Some((prices.clone(), Instant::now()));
                    return Some((prices, PriceProvenance::Live));
                }
                warn!("price feed returned an incomplete or invalid quote set");
            }
            Err(e) => warn!("price fetch failed: {e}"),
        }

        // Stale quotes do not refresh the cache clock; the next call
        // retries the feed.
        match normalize(&self.last_known, &self.tracked) {
            Some(prices) => {
                warn!("using last known quotes for {} tokens", prices.len());
                Some((prices, PriceProvenance::Fallback))
            }
            None => None,
        }
    }

    /// One direct fetch, bypassing cache and fallback. Used by the status
    /// command to report feed health.
    pub fn probe(&self) -> Result<PriceMap> {
        let raw = self.source.fetch()?;
        normalize(&raw, &self.tracked)
            .ok_or_else(|| Error::Feed("incomplete or non-positive quote set".into()))
    }

    pub fn last_known(&self) -> &PriceMap {
        &self.last_known
    }
}

/// Filter to tracked tokens, requiring full coverage with finite positive
/// quotes.
fn normalize(raw: &PriceMap, tracked: &[Symbol]) -> Option<PriceMap> {
    let mut out = PriceMap::default();
    for token in tracked {
        let price = raw.get(token)?;
        if !price.is_finite() || *price <= 0.0 {
            return None;
        }
        out.insert(*token, *price);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    fn weth() -> Symbol {
        Symbol::new("WETH")
    }
    fn wbtc() -> Symbol {
        Symbol::new("WBTC")
    }

    fn quotes(entries: &[(Symbol, f64)]) -> PriceMap {
        entries.iter().copied().collect()
    }

    /// Feed stub that replays a scripted sequence of responses.
    struct ScriptedSource {
        responses: RefCell<VecDeque<Result<PriceMap>>>,
        calls: std::cell::Cell<usize>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<PriceMap>>) -> Self {
            Self {
                responses: RefCell::new(responses.into()),
                calls: std::cell::Cell::new(0),
            }
        }
    }

    impl PriceSource for ScriptedSource {
        fn fetch(&self) -> Result<PriceMap> {
            self.calls.set(self.calls.get() + 1);
            self.responses
                .borrow_mut()
                .pop_front()
                .expect("scripted source ran out of responses")
        }
    }

    fn tracked() -> Vec<Symbol> {
        vec![weth(), wbtc()]
    }

    #[test]
    fn serves_cached_quotes_within_ttl() {
        let full = quotes(&[(weth(), 2000.0), (wbtc(), 60_000.0)]);
        let source = ScriptedSource::new(vec![Ok(full.clone())]);
        let mut cache = PriceCache::new(Box::new(source), tracked(), Duration::from_secs(60));

        let (first, prov) = cache.get().unwrap();
        assert_eq!(prov, PriceProvenance::Live);
        assert_eq!(first.get(&weth()), Some(&2000.0));

        let (second, prov) = cache.get().unwrap();
        assert_eq!(prov, PriceProvenance::Cached);
        assert_eq!(second.get(&wbtc()), Some(&60_000.0));
    }

    #[test]
    fn zero_ttl_refetches_every_call() {
        let source = ScriptedSource::new(vec![
            Ok(quotes(&[(weth(), 2000.0), (wbtc(), 60_000.0)])),
            Ok(quotes(&[(weth(), 2100.0), (wbtc(), 61_000.0)])),
        ]);
        let mut cache = PriceCache::new(Box::new(source), tracked(), Duration::ZERO);

        let (_, prov) = cache.get().unwrap();
        assert_eq!(prov, PriceProvenance::Live);
        let (second, prov) = cache.get().unwrap();
        assert_eq!(prov, PriceProvenance::Live);
        assert_eq!(second.get(&weth()), Some(&2100.0));
    }

    #[test]
    fn feed_error_falls_back_to_last_known() {
        let source = ScriptedSource::new(vec![
            Ok(quotes(&[(weth(), 2000.0), (wbtc(), 60_000.0)])),
            Err(Error::Feed("connection refused".into())),
        ]);
        let mut cache = PriceCache::new(Box::new(source), tracked(), Duration::ZERO);

        cache.get().unwrap();
        let (prices, prov) = cache.get().unwrap();
        assert_eq!(prov, PriceProvenance::Fallback);
        assert_eq!(prices.get(&weth()), Some(&2000.0));
    }

    #[test]
    fn no_quotes_anywhere_returns_none() {
        let source = ScriptedSource::new(vec![Err(Error::Feed("down".into()))]);
        let mut cache = PriceCache::new(Box::new(source), tracked(), Duration::ZERO);
        assert!(cache.get().is_none());
    }

    #[test]
    fn partial_fetch_is_discarded_whole() {
        let seeded = quotes(&[(weth(), 2000.0), (wbtc(), 60_000.0)]);
        let source = ScriptedSource::new(vec![Ok(quotes(&[(weth(), 9999.0)]))]);
        let mut cache = PriceCache::new(Box::new(source), tracked(), Duration::ZERO)
            .with_last_known(seeded);

        let (prices, prov) = cache.get().unwrap();
        assert_eq!(prov, PriceProvenance::Fallback);
        // The partial quote never leaks into the result or the fallback.
        assert_eq!(prices.get(&weth()), Some(&2000.0));
        assert_eq!(cache.last_known().get(&weth()), Some(&2000.0));
    }

    #[test]
    fn non_positive_quotes_invalidate_the_fetch() {
        let source = ScriptedSource::new(vec![Ok(quotes(&[
            (weth(), 0.0),
            (wbtc(), 60_000.0),
        ]))]);
        let mut cache = PriceCache::new(Box::new(source), tracked(), Duration::ZERO);
        assert!(cache.get().is_none());
    }

    #[test]
    fn probe_reports_feed_errors_directly() {
        let source = ScriptedSource::new(vec![Ok(quotes(&[(weth(), 2000.0)]))]);
        let cache = PriceCache::new(Box::new(source), tracked(), Duration::from_secs(60));
        // Incomplete coverage surfaces as an error instead of a fallback.
        assert!(cache.probe().is_err());
    }
}
