//! TOML configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::portfolio::WeightMap;
use crate::token::{Address, MAX_SYMBOL_LEN, Symbol, Token};

/// Allowed deviation of the target-weight sum from 1.0.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub tokens: Vec<TokenConfig>,
    pub rebalance: RebalanceConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// One tracked basket token with its target weight.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    /// Price feed identifier for this token (e.g. "wrapped-bitcoin").
    pub feed_id: String,
    /// Target allocation weight in [0, 1].
    pub target: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RebalanceConfig {
    /// Settlement token symbol; every swap has this as one leg.
    pub base: String,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_min_trade")]
    pub min_trade_usd: f64,
    #[serde(default = "default_slippage")]
    pub slippage: f64,
    #[serde(default = "default_sell_dust")]
    pub sell_dust: f64,
    #[serde(default = "default_buy_dust")]
    pub buy_dust: f64,
}

fn default_threshold() -> f64 {
    0.05
}
fn default_min_trade() -> f64 {
    50.0
}
fn default_slippage() -> f64 {
    0.02
}
fn default_sell_dust() -> f64 {
    0.00001
}
fn default_buy_dust() -> f64 {
    0.0001
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Quote currency requested from the feed.
    #[serde(default = "default_quote")]
    pub quote: String,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.coingecko.com/api/v3".into()
}
fn default_quote() -> String {
    "usd".into()
}
fn default_ttl() -> u64 {
    60
}
fn default_feed_timeout() -> u64 {
    10
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            quote: default_quote(),
            ttl_secs: default_ttl(),
            timeout_secs: default_feed_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Pause between consecutive swap submissions.
    #[serde(default = "default_swap_delay")]
    pub swap_delay_ms: u64,
}

fn default_interval() -> u64 {
    3600
}
fn default_swap_delay() -> u64 {
    2000
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            swap_delay_ms: default_swap_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: String,
    #[serde(default = "default_baseline_file")]
    pub baseline_file: String,
    #[serde(default = "default_prices_file")]
    pub prices_file: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_store_dir() -> String {
    "./state".into()
}
fn default_baseline_file() -> String {
    "baseline.json".into()
}
fn default_prices_file() -> String {
    "last_prices.json".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: default_store_dir(),
            baseline_file: default_baseline_file(),
            prices_file: default_prices_file(),
            audit_file: default_audit_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_wallet_file")]
    pub file: String,
    /// Seed balances used when the wallet file does not exist yet.
    #[serde(default)]
    pub initial: Vec<InitialBalance>,
}

fn default_wallet_file() -> String {
    "wallet.json".into()
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            file: default_wallet_file(),
            initial: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitialBalance {
    pub symbol: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    /// Optional webhook for trade summaries; absent means log-only.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse from a TOML string (useful for testing).
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.tokens.is_empty() {
            return Err(Error::Config("tokens list is empty".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for t in &self.tokens {
            if t.symbol.is_empty() {
                return Err(Error::Config("empty token symbol".into()));
            }
            if t.symbol.len() > MAX_SYMBOL_LEN {
                return Err(Error::Config(format!(
                    "symbol '{}' exceeds {MAX_SYMBOL_LEN} bytes",
                    t.symbol
                )));
            }
            if !seen.insert(&t.symbol) {
                return Err(Error::Config(format!("duplicate symbol: {}", t.symbol)));
            }
            if t.feed_id.is_empty() {
                return Err(Error::Config(format!("missing feed_id for {}", t.symbol)));
            }
            if !t.target.is_finite() || !(0.0..=1.0).contains(&t.target) {
                return Err(Error::Config(format!(
                    "target weight for {} ({}) must be in [0.0, 1.0]",
                    t.symbol, t.target
                )));
            }
        }

        // An off-sum weight set is rejected, not renormalized.
        let sum: f64 = self.tokens.iter().map(|t| t.target).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::Config(format!(
                "target weights sum to {sum:.8}, expected 1.0"
            )));
        }

        if !self.tokens.iter().any(|t| t.symbol == self.rebalance.base) {
            return Err(Error::Config(format!(
                "base token '{}' is not in the tokens list",
                self.rebalance.base
            )));
        }

        let r = &self.rebalance;
        if !r.threshold.is_finite() || r.threshold <= 0.0 || r.threshold >= 1.0 {
            return Err(Error::Config("threshold must be in (0.0, 1.0)".into()));
        }
        if !r.min_trade_usd.is_finite() || r.min_trade_usd < 0.0 {
            return Err(Error::Config("min_trade_usd must be >= 0".into()));
        }
        if !r.slippage.is_finite() || !(0.0..1.0).contains(&r.slippage) {
            return Err(Error::Config("slippage must be in [0.0, 1.0)".into()));
        }
        if !r.sell_dust.is_finite() || r.sell_dust < 0.0 {
            return Err(Error::Config("sell_dust must be >= 0".into()));
        }
        if !r.buy_dust.is_finite() || r.buy_dust < 0.0 {
            return Err(Error::Config("buy_dust must be >= 0".into()));
        }

        if self.feed.endpoint.is_empty() {
            return Err(Error::Config("feed endpoint must not be empty".into()));
        }
        if self.feed.ttl_secs == 0 {
            return Err(Error::Config("feed ttl_secs must be > 0".into()));
        }
        if self.schedule.interval_secs == 0 {
            return Err(Error::Config("interval_secs must be > 0".into()));
        }

        for b in &self.wallet.initial {
            if !self.tokens.iter().any(|t| t.symbol == b.symbol) {
                return Err(Error::Config(format!(
                    "initial wallet balance for unknown token '{}'",
                    b.symbol
                )));
            }
            if !b.amount.is_finite() || b.amount < 0.0 {
                return Err(Error::Config(format!(
                    "initial balance for {} must be >= 0",
                    b.symbol
                )));
            }
        }

        Ok(())
    }

    /// The tracked basket as runtime tokens.
    pub fn basket(&self) -> Vec<Token> {
        self.tokens
            .iter()
            .map(|t| Token {
                symbol: Symbol::new(&t.symbol),
                address: t.address.clone(),
                decimals: t.decimals,
                feed_id: t.feed_id.clone(),
            })
            .collect()
    }

    /// Tracked symbols in config order.
    pub fn tracked(&self) -> Vec<Symbol> {
        self.tokens.iter().map(|t| Symbol::new(&t.symbol)).collect()
    }

    /// Target weight map.
    pub fn targets(&self) -> WeightMap {
        self.tokens
            .iter()
            .map(|t| (Symbol::new(&t.symbol), t.target))
            .collect()
    }

    /// The settlement token symbol.
    pub fn base(&self) -> Symbol {
        Symbol::new(&self.rebalance.base)
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.store.dir).join(&self.store.audit_file)
    }

    /// Full path to the paper wallet file.
    pub fn wallet_path(&self) -> PathBuf {
        Path::new(&self.store.dir).join(&self.wallet.file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[[tokens]]
symbol = "WETH"
address = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2"
decimals = 18
feed_id = "weth"
target = 0.40

[[tokens]]
symbol = "WBTC"
address = "0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599"
decimals = 8
feed_id = "wrapped-bitcoin"
target = 0.35

[[tokens]]
symbol = "LINK"
address = "0x514910771AF9Ca656af840dff83E8264EcF986CA"
decimals = 18
feed_id = "chainlink"
target = 0.25

[rebalance]
base = "WETH"
threshold = 0.05
min_trade_usd = 50.0
slippage = 0.02

[feed]
endpoint = "https://api.coingecko.com/api/v3"
quote = "usd"
ttl_secs = 60

[schedule]
interval_secs = 3600
swap_delay_ms = 2000

[store]
dir = "./state"
audit_file = "audit.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.tokens.len(), 3);
        assert_eq!(config.rebalance.base, "WETH");
        assert_eq!(config.rebalance.threshold, 0.05);
        assert_eq!(config.feed.ttl_secs, 60);
        assert_eq!(config.schedule.swap_delay_ms, 2000);
    }

    #[test]
    fn defaults_applied() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.rebalance.sell_dust, 0.00001);
        assert_eq!(config.rebalance.buy_dust, 0.0001);
        assert_eq!(config.store.baseline_file, "baseline.json");
        assert_eq!(config.wallet.file, "wallet.json");
        assert!(config.notify.webhook_url.is_none());
    }

    #[test]
    fn reject_weight_sum_off_by_more_than_tolerance() {
        let toml = example_toml().replace("target = 0.25", "target = 0.26");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_duplicate_symbols() {
        let toml = example_toml().replace("symbol = \"LINK\"", "symbol = \"WBTC\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_unknown_base() {
        let toml = example_toml().replace("base = \"WETH\"", "base = \"USDC\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_bad_threshold() {
        let toml = example_toml().replace("threshold = 0.05", "threshold = 1.5");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_bad_address() {
        let toml = example_toml().replace(
            "0x514910771AF9Ca656af840dff83E8264EcF986CA",
            "0x514910771AF9Ca656af840",
        );
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_oversized_symbol() {
        let toml = example_toml().replace("symbol = \"LINK\"", "symbol = \"THIRTEENCHARS\"");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn reject_negative_slippage() {
        let toml = example_toml().replace("slippage = 0.02", "slippage = -0.1");
        assert!(Config::from_toml(&toml).is_err());
    }

    #[test]
    fn base_and_targets_accessors() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.base(), Symbol::new("WETH"));
        let targets = config.targets();
        assert_eq!(targets.len(), 3);
        assert_eq!(targets[&Symbol::new("WBTC")], 0.35);
    }

    #[test]
    fn audit_path_joins_store_dir() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.audit_path(), PathBuf::from("./state/audit.jsonl"));
    }

    #[test]
    fn reject_initial_balance_for_unknown_token() {
        let toml = format!(
            "{}\n[[wallet.initial]]\nsymbol = \"DOGE\"\namount = 5.0\n",
            example_toml()
        );
        assert!(Config::from_toml(&toml).is_err());
    }
}
