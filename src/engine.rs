//! Cycle orchestration.
//!
//! One cycle: read balances, get prices, value the portfolio, capture the
//! baseline if missing, detect drift, and hand qualifying intents to the
//! planner. The agent owns the seams (balance source, price feed, swap
//! executor, notifier) as trait objects, so the same engine drives paper
//! trading in production and mocks in tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use dialoguer::Confirm;
use log::{info, warn};
use serde::Serialize;

use crate::audit::AuditLog;
use crate::baseline::Baseline;
use crate::config::Config;
use crate::drift::{self, TradeIntent};
use crate::error::{Error, Result};
use crate::gateway::{BalanceSource, Notifier, NoopSwapper, PriceSource, SwapExecutor};
use crate::planner::{self, PassConfig, PassOutcome};
use crate::portfolio::{BalanceMap, PortfolioState, WeightMap};
use crate::prices::{PriceCache, PriceProvenance};
use crate::store::Store;

pub struct Agent {
    config: Config,
    balances: Box<dyn BalanceSource>,
    swapper: Box<dyn SwapExecutor>,
    notifier: Box<dyn Notifier>,
    prices: PriceCache,
    store: Store,
    audit: AuditLog,
}

/// Per-invocation switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOptions {
    /// Plan and report, but route swaps to a no-op executor.
    pub dry_run: bool,
    /// Skip the interactive confirmation (watch mode, --force).
    pub assume_yes: bool,
}

/// Why a cycle ended without looking at drift.
#[derive(Debug, Clone)]
pub enum SkipReason {
    Balances(String),
    Prices,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Balances(e) => write!(f, "balance source unavailable: {e}"),
            SkipReason::Prices => write!(f, "no usable prices"),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    NoRebalance,
    Declined,
    Completed {
        executed: usize,
        failed: usize,
        skipped: usize,
    },
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            CycleOutcome::NoRebalance => write!(f, "no rebalance needed"),
            CycleOutcome::Declined => write!(f, "declined by operator"),
            CycleOutcome::Completed {
                executed,
                failed,
                skipped,
            } => write!(f, "{executed} executed, {failed} failed, {skipped} skipped"),
        }
    }
}

#[derive(Serialize)]
struct SkipData {
    reason: String,
}

impl Agent {
    pub fn new(
        config: Config,
        balances: Box<dyn BalanceSource>,
        feed: Box<dyn PriceSource>,
        swapper: Box<dyn SwapExecutor>,
        notifier: Box<dyn Notifier>,
    ) -> Result<Self> {
        let store = Store::new(&config.store);
        let audit = AuditLog::open(&config.audit_path())?;

        let mut prices = PriceCache::new(
            feed,
            config.tracked(),
            Duration::from_secs(config.feed.ttl_secs),
        );
        match store.load_last_prices() {
            Ok(Some(known)) => prices = prices.with_last_known(known),
            Ok(None) => {}
            Err(e) => warn!("ignoring unreadable price fallback: {e}"),
        }

        Ok(Self {
            config,
            balances,
            swapper,
            notifier,
            prices,
            store,
            audit,
        })
    }

    /// Run one full observe-detect-execute cycle.
    pub fn run_cycle(&mut self, opts: CycleOptions) -> Result<CycleOutcome> {
        self.audit.log_simple("cycle_started");

        let raw_balances = match self.balances.balances() {
            Ok(b) => b,
            Err(e) => {
                warn!("skipping cycle: {e}");
                let reason = SkipReason::Balances(e.to_string());
                self.audit.log(
                    "cycle_skipped",
                    SkipData {
                        reason: reason.to_string(),
                    },
                );
                return Ok(CycleOutcome::Skipped(reason));
            }
        };

        let Some((prices, provenance)) = self.prices.get() else {
            warn!("skipping cycle: no usable prices");
            self.audit.log(
                "cycle_skipped",
                SkipData {
                    reason: SkipReason::Prices.to_string(),
                },
            );
            return Ok(CycleOutcome::Skipped(SkipReason::Prices));
        };
        self.audit.log_prices(&prices, provenance);
        if provenance == PriceProvenance::Live {
            if let Err(e) = self.store.save_last_prices(&prices) {
                warn!("could not persist price fallback: {e}");
            }
        }

        let state = self.portfolio_state(&raw_balances, prices);
        info!(
            "portfolio value ${:.2} across {} tokens ({} prices)",
            state.total_value,
            self.config.tokens.len(),
            provenance
        );

        self.ensure_baseline(&state);

        let targets = self.config.targets();
        let intents = drift::detect(
            &state,
            &targets,
            self.config.rebalance.threshold,
            self.config.rebalance.min_trade_usd,
        );
        if intents.is_empty() {
            info!("all weights within threshold");
            self.audit.log_simple("no_rebalance");
            return Ok(CycleOutcome::NoRebalance);
        }
        self.audit.log_drift(&intents, state.total_value);
        println!("{}", render_plan(&state, &targets, &intents));

        if !opts.dry_run && !opts.assume_yes && !self.confirm_execution()? {
            info!("rebalance declined");
            self.audit.log_simple("rebalance_declined");
            return Ok(CycleOutcome::Declined);
        }

        let pass_cfg = self.pass_config(opts.dry_run);
        let outcome = if opts.dry_run {
            planner::execute_pass(&state, &targets, &intents, &pass_cfg, &NoopSwapper)
        } else {
            planner::execute_pass(&state, &targets, &intents, &pass_cfg, self.swapper.as_ref())
        };

        for record in &outcome.records {
            self.audit.log_swap(record);
        }
        self.audit.log_cycle(&outcome);
        println!("{}", render_outcome(&outcome, opts.dry_run));

        if !opts.dry_run && outcome.executed() > 0 {
            self.notifier
                .notify(&summary_message(&outcome, state.total_value));
        }

        Ok(CycleOutcome::Completed {
            executed: outcome.executed(),
            failed: outcome.failed(),
            skipped: outcome.skipped(),
        })
    }

    /// Re-run cycles forever, sleeping the configured interval between
    /// them. SIGINT or SIGTERM finishes the current cycle and exits.
    pub fn watch(&mut self, opts: CycleOptions) -> Result<()> {
        install_stop_handler();
        let interval = self.config.schedule.interval_secs;
        info!("watching portfolio every {interval}s");

        while !stop_requested() {
            match self.run_cycle(opts) {
                Ok(outcome) => info!("cycle finished: {outcome}"),
                Err(e) => warn!("cycle failed: {e}"),
            }
            if !wait_for_next_cycle(interval) {
                break;
            }
        }

        self.audit.log_simple("agent_stopped");
        info!("stopped");
        Ok(())
    }

    /// Print performance against the buy-and-hold baseline.
    pub fn report(&mut self) -> Result<()> {
        let state = self.observe()?;
        match self.store.load_baseline()? {
            Some(baseline) => {
                let cmp = baseline.compare(&state.balances, &state.prices, Utc::now());
                println!("{cmp}");
            }
            None => println!("no baseline captured yet; run a cycle first"),
        }
        println!();
        println!("{}", render_holdings(&state, &self.config.targets()));
        Ok(())
    }

    /// Print current holdings, weights and targets.
    pub fn holdings(&mut self) -> Result<()> {
        let state = self.observe()?;
        println!("{}", render_holdings(&state, &self.config.targets()));
        Ok(())
    }

    /// Replace the baseline with a snapshot of the current portfolio.
    pub fn reset_baseline(&mut self, force: bool) -> Result<()> {
        if !force {
            let confirmed = Confirm::new()
                .with_prompt("Replace the baseline with the current portfolio?")
                .default(false)
                .interact()
                .map_err(|e| Error::Aborted(format!("confirmation unavailable: {e}")))?;
            if !confirmed {
                info!("baseline left in place");
                return Ok(());
            }
        }
        let state = self.observe()?;
        let baseline = Baseline::capture(&state.balances, &state.prices, Utc::now());
        self.store.save_baseline(&baseline)?;
        self.audit.log_simple("baseline_reset");
        self.audit.log_baseline(&baseline, state.total_value);
        println!("baseline re-anchored at ${:.2}", state.total_value);
        Ok(())
    }

    /// One-shot health summary: config, feed, baseline, wallet.
    pub fn status(&mut self) -> Result<()> {
        let tracked: Vec<String> = self
            .config
            .tracked()
            .iter()
            .map(|s| s.to_string())
            .collect();
        println!("tokens:    {}", tracked.join(", "));
        println!("base:      {}", self.config.base());
        println!(
            "threshold: {:.2}% drift, ${:.2} min trade",
            self.config.rebalance.threshold * 100.0,
            self.config.rebalance.min_trade_usd
        );
        println!("interval:  {}s", self.config.schedule.interval_secs);
        match self.prices.probe() {
            Ok(quotes) => println!("feed:      ok ({} quotes)", quotes.len()),
            Err(e) => println!("feed:      unavailable ({e})"),
        }
        match self.store.load_baseline() {
            Ok(Some(b)) => println!("baseline:  captured {}", b.captured_at),
            Ok(None) => println!("baseline:  none"),
            Err(e) => println!("baseline:  unreadable ({e})"),
        }
        println!("wallet:    {}", self.config.wallet_path().display());
        Ok(())
    }

    /// Balances and prices as one consistent snapshot, for read-only
    /// commands.
    fn observe(&mut self) -> Result<PortfolioState> {
        let raw = self.balances.balances()?;
        let Some((prices, _)) = self.prices.get() else {
            return Err(Error::Feed("no usable prices".into()));
        };
        Ok(self.portfolio_state(&raw, prices))
    }

    /// Restrict balances to the tracked basket; untracked holdings are
    /// invisible to the weight math.
    fn portfolio_state(
        &self,
        raw: &BalanceMap,
        prices: crate::portfolio::PriceMap,
    ) -> PortfolioState {
        let balances: BalanceMap = self
            .config
            .tracked()
            .into_iter()
            .map(|s| (s, raw.get(&s).copied().unwrap_or(0.0)))
            .collect();
        PortfolioState::new(balances, prices)
    }

    /// Capture the buy-and-hold snapshot exactly once. An unreadable
    /// existing file is left alone rather than overwritten.
    fn ensure_baseline(&mut self, state: &PortfolioState) {
        match self.store.load_baseline() {
            Ok(Some(_)) => {}
            Ok(None) => {
                let baseline = Baseline::capture(&state.balances, &state.prices, Utc::now());
                match self.store.save_baseline(&baseline) {
                    Ok(()) => {
                        info!("captured buy-and-hold baseline (${:.2})", state.total_value);
                        self.audit.log_baseline(&baseline, state.total_value);
                    }
                    Err(e) => warn!("could not save baseline: {e}"),
                }
            }
            Err(e) => warn!("baseline unreadable, leaving it untouched: {e}"),
        }
    }

    fn confirm_execution(&self) -> Result<bool> {
        Confirm::new()
            .with_prompt("Execute this rebalance?")
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation unavailable: {e}")))
    }

    fn pass_config(&self, dry_run: bool) -> PassConfig {
        let r = &self.config.rebalance;
        PassConfig {
            base: self.config.base(),
            slippage: r.slippage,
            min_trade_usd: r.min_trade_usd,
            sell_dust: r.sell_dust,
            buy_dust: r.buy_dust,
            swap_delay_ms: if dry_run {
                0
            } else {
                self.config.schedule.swap_delay_ms
            },
        }
    }
}

// === Stop flag ===

static STOP: AtomicBool = AtomicBool::new(false);

pub fn stop_requested() -> bool {
    STOP.load(Ordering::SeqCst)
}

#[cfg(unix)]
fn install_stop_handler() {
    use nix::sys::signal::{self, SigHandler, Signal};

    extern "C" fn handle(_sig: i32) {
        STOP.store(true, Ordering::SeqCst);
    }

    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // Safety: the handler only touches an atomic flag.
        if let Err(e) = unsafe { signal::signal(sig, SigHandler::Handler(handle)) } {
            warn!("could not install {sig} handler: {e}");
        }
    }
}

#[cfg(not(unix))]
fn install_stop_handler() {}

/// Sleep in one-second slices so a stop request is honored promptly.
/// Returns `false` when a stop was requested mid-sleep.
fn wait_for_next_cycle(interval_secs: u64) -> bool {
    let mut remaining = interval_secs;
    while remaining > 0 {
        if stop_requested() {
            return false;
        }
        thread::sleep(Duration::from_secs(1));
        remaining -= 1;
    }
    !stop_requested()
}

// === Reports ===

fn render_plan(state: &PortfolioState, targets: &WeightMap, intents: &[TradeIntent]) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(
        out,
        "REBALANCE PLAN (portfolio value ${:.2}):",
        state.total_value
    );
    for intent in intents {
        let action = if intent.is_sell() { "SELL" } else { "BUY " };
        let current = state.weight_of(intent.token) * 100.0;
        let target = targets.get(&intent.token).copied().unwrap_or(0.0) * 100.0;
        let _ = writeln!(
            out,
            "  {action} {:<8} {current:6.2}% -> {target:6.2}%  (drift {:+.2}%, ${:.2})",
            intent.token,
            intent.deviation * 100.0,
            intent.value_usd(state.total_value)
        );
    }
    out.pop();
    out
}

fn render_outcome(outcome: &PassOutcome, dry_run: bool) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let header = if dry_run { "EXECUTION (dry run):" } else { "EXECUTION:" };
    let _ = writeln!(out, "{header}");
    for r in &outcome.records {
        let _ = writeln!(
            out,
            "  {:<16} {} {:.8} {} -> {} (${:.2})",
            r.status.to_string(),
            r.phase,
            r.amount,
            r.from,
            r.to,
            r.value_usd
        );
    }
    let _ = write!(
        out,
        "  {} executed, {} failed, {} skipped",
        outcome.executed(),
        outcome.failed(),
        outcome.skipped()
    );
    out
}

fn render_holdings(state: &PortfolioState, targets: &WeightMap) -> String {
    use std::fmt::Write;

    let mut tokens: Vec<_> = state.balances.keys().copied().collect();
    tokens.sort();

    let mut out = String::new();
    let _ = writeln!(out, "HOLDINGS (total ${:.2}):", state.total_value);
    for token in tokens {
        let target = targets.get(&token).copied().unwrap_or(0.0);
        let _ = writeln!(
            out,
            "  {:<8} {:>16.6} @ ${:>12.2}  ${:>12.2}  {:6.2}% (target {:5.2}%)",
            token,
            state.balance_of(token),
            state.price_of(token),
            state.value_of(token),
            state.weight_of(token) * 100.0,
            target * 100.0
        );
    }
    out.pop();
    out
}

fn summary_message(outcome: &PassOutcome, total_value: f64) -> String {
    format!(
        "rebalance complete: {} swaps executed, {} failed, {} skipped (portfolio ${:.2})",
        outcome.executed(),
        outcome.failed(),
        outcome.skipped(),
        total_value
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{Phase, SwapRecord, SwapStatus};
    use crate::token::Symbol;

    #[test]
    fn cycle_outcome_displays_counts() {
        let outcome = CycleOutcome::Completed {
            executed: 2,
            failed: 1,
            skipped: 0,
        };
        assert_eq!(outcome.to_string(), "2 executed, 1 failed, 0 skipped");
        assert_eq!(
            CycleOutcome::NoRebalance.to_string(),
            "no rebalance needed"
        );
    }

    #[test]
    fn summary_message_names_executed_swaps() {
        let outcome = PassOutcome {
            records: vec![SwapRecord {
                from: Symbol::new("WBTC"),
                to: Symbol::new("WETH"),
                amount: 0.5,
                value_usd: 30_000.0,
                phase: Phase::Sell,
                status: SwapStatus::Executed,
            }],
        };
        let message = summary_message(&outcome, 100_000.0);
        assert!(message.contains("1 swaps executed"));
        assert!(message.contains("$100000.00"));
    }
}
