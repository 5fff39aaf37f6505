//! In-memory gateway for tests.
//!
//! Serves canned balances and prices, records every swap submission and
//! notification, and can be scripted to fail on demand. Cloning is cheap
//! and every clone shares the same recorded state, so a test can hand the
//! engine its boxed trait objects and keep a handle for assertions.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::gateway::{BalanceSource, Notifier, PriceSource, SwapExecutor};
use crate::portfolio::{BalanceMap, PriceMap};
use crate::token::Symbol;

/// How the mock answers swap submissions.
#[derive(Debug, Clone, Default)]
pub enum SwapMode {
    #[default]
    Accept,
    Reject,
    /// Reject only swaps selling one of these tokens.
    RejectFrom(Vec<Symbol>),
}

/// One swap submission as the executor saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSwap {
    pub from: Symbol,
    pub to: Symbol,
    pub amount: f64,
}

struct MockInner {
    balances: BalanceMap,
    prices: PriceMap,
    swap_mode: SwapMode,
    fail_balances: bool,
    fail_prices: bool,
    swaps: Mutex<Vec<RecordedSwap>>,
    notices: Mutex<Vec<String>>,
}

#[derive(Clone)]
pub struct MockGateway {
    inner: Arc<MockInner>,
}

#[derive(Default)]
pub struct MockGatewayBuilder {
    balances: BalanceMap,
    prices: PriceMap,
    swap_mode: SwapMode,
    fail_balances: bool,
    fail_prices: bool,
}

impl MockGatewayBuilder {
    pub fn with_balance(mut self, token: Symbol, amount: f64) -> Self {
        self.balances.insert(token, amount);
        self
    }

    pub fn with_price(mut self, token: Symbol, price: f64) -> Self {
        self.prices.insert(token, price);
        self
    }

    pub fn swap_mode(mut self, mode: SwapMode) -> Self {
        self.swap_mode = mode;
        self
    }

    pub fn fail_balances(mut self) -> Self {
        self.fail_balances = true;
        self
    }

    pub fn fail_prices(mut self) -> Self {
        self.fail_prices = true;
        self
    }

    pub fn build(self) -> MockGateway {
        MockGateway {
            inner: Arc::new(MockInner {
                balances: self.balances,
                prices: self.prices,
                swap_mode: self.swap_mode,
                fail_balances: self.fail_balances,
                fail_prices: self.fail_prices,
                swaps: Mutex::new(Vec::new()),
                notices: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl MockGateway {
    pub fn builder() -> MockGatewayBuilder {
        MockGatewayBuilder::default()
    }

    /// Every swap submitted so far, accepted or rejected, in order.
    pub fn swaps(&self) -> Vec<RecordedSwap> {
        self.inner.swaps.lock().unwrap().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.inner.notices.lock().unwrap().clone()
    }
}

impl BalanceSource for MockGateway {
    fn balances(&self) -> Result<BalanceMap> {
        if self.inner.fail_balances {
            return Err(Error::Balance("mock balance source failure".into()));
        }
        Ok(self.inner.balances.clone())
    }
}

impl PriceSource for MockGateway {
    fn fetch(&self) -> Result<PriceMap> {
        if self.inner.fail_prices {
            return Err(Error::Feed("mock price source failure".into()));
        }
        Ok(self.inner.prices.clone())
    }
}

impl SwapExecutor for MockGateway {
    fn swap(&self, from: Symbol, to: Symbol, amount: f64) -> Result<()> {
        self.inner
            .swaps
            .lock()
            .unwrap()
            .push(RecordedSwap { from, to, amount });
        match &self.inner.swap_mode {
            SwapMode::Accept => Ok(()),
            SwapMode::Reject => Err(Error::Swap(format!("mock rejected {from} -> {to}"))),
            SwapMode::RejectFrom(tokens) if tokens.contains(&from) => {
                Err(Error::Swap(format!("mock rejected sale of {from}")))
            }
            SwapMode::RejectFrom(_) => Ok(()),
        }
    }
}

impl Notifier for MockGateway {
    fn notify(&self, message: &str) {
        self.inner.notices.lock().unwrap().push(message.to_string());
    }
}
