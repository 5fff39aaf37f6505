//! Seams between the rebalancing engine and the outside world.
//!
//! The engine only ever talks to these traits. Production wires them to the
//! paper wallet and the HTTP price feed; tests wire them to the recording
//! mock. All implementations are blocking.

use std::time::Duration;

use log::{info, warn};
use serde_json::json;

use crate::error::{Error, Result};
use crate::portfolio::{BalanceMap, PriceMap};
use crate::token::Symbol;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of on-chain token holdings.
pub trait BalanceSource {
    /// Current balance per token, in token units.
    ///
    /// Must return an error when holdings cannot be read. Returning a map
    /// of zeros would look like an empty wallet and trigger a sell-off.
    fn balances(&self) -> Result<BalanceMap>;
}

/// Source of USD spot prices.
pub trait PriceSource {
    /// One fresh quote per token the source knows about.
    fn fetch(&self) -> Result<PriceMap>;
}

/// Executes a single token-for-token swap.
pub trait SwapExecutor {
    /// Swap `amount` units of `from` into `to`. An `Err` means the swap
    /// did not move any funds.
    fn swap(&self, from: Symbol, to: Symbol, amount: f64) -> Result<()>;
}

/// Pushes a human-readable note after a completed rebalance.
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// Swap executor that accepts everything and moves nothing. Used for
/// dry runs.
pub struct NoopSwapper;

impl SwapExecutor for NoopSwapper {
    fn swap(&self, _from: Symbol, _to: Symbol, _amount: f64) -> Result<()> {
        Ok(())
    }
}

/// Notifier that just writes to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!("notify: {message}");
    }
}

/// Posts notifications as JSON to a webhook (Slack-compatible payload).
///
/// Delivery is best effort: failures are logged and never interrupt the
/// rebalancing loop.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) {
        let payload = json!({ "text": message });
        match self.client.post(&self.url).json(&payload).send() {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("webhook returned {}", resp.status()),
            Err(e) => warn!("webhook delivery failed: {e}"),
        }
    }
}
