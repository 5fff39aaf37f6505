//! Rebalance pass construction and execution.
//!
//! Converts qualifying trade intents into an ordered sequence of two-leg
//! swaps routed through one settlement token (the base): sell X → base,
//! then base → buy Y. The pass runs in three phases in a fixed order:
//! sells, base-deficit top-up, buys. Each phase works against an optimistic
//! in-memory balance copy so buy sizing stays consistent with earlier sells
//! in the same pass without a second balance fetch; the copy is discarded at
//! the end of the pass and authoritative balances are re-read next cycle.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::drift::TradeIntent;
use crate::gateway::SwapExecutor;
use crate::portfolio::{BalanceMap, PortfolioState, WeightMap};
use crate::token::Symbol;

/// Remaining base shortfall below which the deficit phase stops topping up.
const DEFICIT_STOP_USD: f64 = 1.0;

/// Which leg of the pass produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Sell,
    BaseDeficit,
    Buy,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Sell => write!(f, "sell"),
            Phase::BaseDeficit => write!(f, "base deficit"),
            Phase::Buy => write!(f, "buy"),
        }
    }
}

/// What happened to one planned swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Executed,
    Failed,
    /// Amount fell below the dust floor; no submission.
    SkippedDust,
    /// Working base balance could not fund the buy; deferred to next cycle.
    SkippedFunds,
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwapStatus::Executed => write!(f, "EXECUTED"),
            SwapStatus::Failed => write!(f, "FAILED"),
            SwapStatus::SkippedDust => write!(f, "SKIPPED (dust)"),
            SwapStatus::SkippedFunds => write!(f, "SKIPPED (funds)"),
        }
    }
}

/// One attempted or skipped swap in a rebalance pass.
///
/// `amount` is in units of `from`; `value_usd` is the USD value the swap
/// moves at this cycle's prices.
#[derive(Debug, Clone, Serialize)]
pub struct SwapRecord {
    pub from: Symbol,
    pub to: Symbol,
    pub amount: f64,
    pub value_usd: f64,
    pub phase: Phase,
    pub status: SwapStatus,
}

/// Planner knobs lifted from configuration.
#[derive(Debug, Clone, Copy)]
pub struct PassConfig {
    pub base: Symbol,
    pub slippage: f64,
    pub min_trade_usd: f64,
    pub sell_dust: f64,
    pub buy_dust: f64,
    /// Pause between consecutive swap submissions (rate-limit throttle).
    pub swap_delay_ms: u64,
}

/// Result of a full rebalance pass.
#[derive(Debug, Clone, Default)]
pub struct PassOutcome {
    pub records: Vec<SwapRecord>,
}

impl PassOutcome {
    pub fn executed(&self) -> usize {
        self.count(SwapStatus::Executed)
    }

    pub fn failed(&self) -> usize {
        self.count(SwapStatus::Failed)
    }

    pub fn skipped(&self) -> usize {
        self.records
            .iter()
            .filter(|r| {
                matches!(r.status, SwapStatus::SkippedDust | SwapStatus::SkippedFunds)
            })
            .count()
    }

    fn count(&self, status: SwapStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

/// Optimistic in-pass balance copy.
///
/// Debits clamp at zero so bookkeeping can never go negative. Never
/// persisted; the authoritative map is re-read next cycle.
#[derive(Debug, Clone)]
pub struct WorkingBalances {
    inner: BalanceMap,
}

impl WorkingBalances {
    pub fn new(balances: &BalanceMap) -> Self {
        Self {
            inner: balances.clone(),
        }
    }

    pub fn get(&self, token: Symbol) -> f64 {
        self.inner.get(&token).copied().unwrap_or(0.0)
    }

    pub fn debit(&mut self, token: Symbol, amount: f64) {
        let entry = self.inner.entry(token).or_insert(0.0);
        *entry = (*entry - amount).max(0.0);
    }

    pub fn credit(&mut self, token: Symbol, amount: f64) {
        *self.inner.entry(token).or_insert(0.0) += amount;
    }

    /// USD value of one holding at the given prices.
    pub fn value_of(&self, token: Symbol, state: &PortfolioState) -> f64 {
        crate::portfolio::position_value(self.get(token), state.price_of(token))
    }
}

/// Execute one rebalance pass: sells, base-deficit top-up, then buys.
///
/// Target values are fixed against the cycle-start portfolio value; the
/// working balance copy absorbs each executed swap so later sizing stays
/// consistent. A failed swap leaves the copy untouched and the pass moves
/// on, since an incomplete rebalance is re-detected and retried next cycle.
pub fn execute_pass(
    state: &PortfolioState,
    targets: &WeightMap,
    intents: &[TradeIntent],
    cfg: &PassConfig,
    swapper: &dyn SwapExecutor,
) -> PassOutcome {
    let mut outcome = PassOutcome::default();

    let base_price = state.price_of(cfg.base);
    if base_price <= 0.0 {
        warn!("no usable price for base token {}, skipping pass", cfg.base);
        return outcome;
    }

    let mut sells: Vec<&TradeIntent> = intents.iter().filter(|i| i.is_sell()).collect();
    let mut buys: Vec<&TradeIntent> = intents.iter().filter(|i| i.is_buy()).collect();
    sells.sort_by(|a, b| cmp_f64(b.deviation, a.deviation).then_with(|| a.token.cmp(&b.token)));
    buys.sort_by(|a, b| cmp_f64(a.deviation, b.deviation).then_with(|| a.token.cmp(&b.token)));

    let mut working = WorkingBalances::new(&state.balances);
    let mut submitted = false;

    // === Sell phase ===

    for intent in &sells {
        if intent.token == cfg.base {
            continue;
        }
        let price = state.price_of(intent.token);
        if price <= 0.0 {
            continue;
        }

        let target_value = target_value(targets, intent.token, state.total_value);
        let excess_usd = working.value_of(intent.token, state) - target_value;
        if excess_usd <= 0.0 {
            continue;
        }

        let amount = (excess_usd / price).min(working.get(intent.token));
        if amount <= cfg.sell_dust {
            debug!("sell of {:.8} {} below dust floor, skipping", amount, intent.token);
            outcome.records.push(SwapRecord {
                from: intent.token,
                to: cfg.base,
                amount,
                value_usd: amount * price,
                phase: Phase::Sell,
                status: SwapStatus::SkippedDust,
            });
            continue;
        }

        let value_usd = amount * price;
        let status = submit_sell(
            swapper,
            &mut working,
            intent.token,
            amount,
            value_usd,
            base_price,
            cfg,
            &mut submitted,
        );
        outcome.records.push(SwapRecord {
            from: intent.token,
            to: cfg.base,
            amount,
            value_usd,
            phase: Phase::Sell,
            status,
        });
    }

    // === Base-deficit phase ===
    //
    // The base token cannot be bought with itself; an underweight base is
    // corrected by selling from whichever tokens hold a positive excess,
    // largest first, whether or not they cleared the detection gates.

    if buys.iter().any(|i| i.token == cfg.base) {
        let target_base_value = target_value(targets, cfg.base, state.total_value);

        let mut candidates: Vec<(Symbol, f64)> = targets
            .keys()
            .filter(|token| **token != cfg.base)
            .map(|token| {
                let excess =
                    working.value_of(*token, state) - target_value(targets, *token, state.total_value);
                (*token, excess)
            })
            .filter(|(_, excess)| *excess > 0.0)
            .collect();
        candidates.sort_by(|a, b| cmp_f64(b.1, a.1).then_with(|| a.0.cmp(&b.0)));

        for (token, excess) in candidates {
            let remaining = target_base_value - working.value_of(cfg.base, state);
            if remaining <= DEFICIT_STOP_USD {
                break;
            }
            let contribution = excess.min(remaining);
            if contribution < cfg.min_trade_usd {
                break;
            }

            let price = state.price_of(token);
            if price <= 0.0 {
                continue;
            }
            let amount = (contribution / price).min(working.get(token));
            if amount <= cfg.sell_dust {
                debug!("deficit sell of {:.8} {} below dust floor, skipping", amount, token);
                outcome.records.push(SwapRecord {
                    from: token,
                    to: cfg.base,
                    amount,
                    value_usd: amount * price,
                    phase: Phase::BaseDeficit,
                    status: SwapStatus::SkippedDust,
                });
                continue;
            }

            let value_usd = amount * price;
            let status = submit_sell(
                swapper,
                &mut working,
                token,
                amount,
                value_usd,
                base_price,
                cfg,
                &mut submitted,
            );
            outcome.records.push(SwapRecord {
                from: token,
                to: cfg.base,
                amount,
                value_usd,
                phase: Phase::BaseDeficit,
                status,
            });
        }
    }

    // === Buy phase ===

    for intent in &buys {
        if intent.token == cfg.base {
            continue;
        }

        let target_value = target_value(targets, intent.token, state.total_value);
        let needed_usd = target_value - working.value_of(intent.token, state);
        if needed_usd <= 0.0 {
            continue;
        }

        let base_amount = needed_usd / base_price;
        if base_amount <= cfg.buy_dust {
            debug!("buy of {:.8} base for {} below dust floor, skipping", base_amount, intent.token);
            outcome.records.push(SwapRecord {
                from: cfg.base,
                to: intent.token,
                amount: base_amount,
                value_usd: needed_usd,
                phase: Phase::Buy,
                status: SwapStatus::SkippedDust,
            });
            continue;
        }
        if working.get(cfg.base) < base_amount {
            warn!(
                "insufficient {} to buy {} (need {:.8}, have {:.8}), deferring to next cycle",
                cfg.base,
                intent.token,
                base_amount,
                working.get(cfg.base)
            );
            outcome.records.push(SwapRecord {
                from: cfg.base,
                to: intent.token,
                amount: base_amount,
                value_usd: needed_usd,
                phase: Phase::Buy,
                status: SwapStatus::SkippedFunds,
            });
            continue;
        }

        throttle(cfg, &mut submitted);
        let status = match swapper.swap(cfg.base, intent.token, base_amount) {
            Ok(()) => {
                info!(
                    "bought {} with {:.8} {} (${:.2})",
                    intent.token, base_amount, cfg.base, needed_usd
                );
                // Debit the base only; the bought balance is re-read
                // fresh on the next polling cycle.
                working.debit(cfg.base, base_amount);
                SwapStatus::Executed
            }
            Err(e) => {
                warn!("buy of {} failed: {e}", intent.token);
                SwapStatus::Failed
            }
        };
        outcome.records.push(SwapRecord {
            from: cfg.base,
            to: intent.token,
            amount: base_amount,
            value_usd: needed_usd,
            phase: Phase::Buy,
            status,
        });
    }

    outcome
}

/// Submit one sell into the base token, updating the working copy on success.
#[allow(clippy::too_many_arguments)]
fn submit_sell(
    swapper: &dyn SwapExecutor,
    working: &mut WorkingBalances,
    token: Symbol,
    amount: f64,
    value_usd: f64,
    base_price: f64,
    cfg: &PassConfig,
    submitted: &mut bool,
) -> SwapStatus {
    throttle(cfg, submitted);
    match swapper.swap(token, cfg.base, amount) {
        Ok(()) => {
            let proceeds = value_usd / base_price * (1.0 - cfg.slippage);
            working.debit(token, amount);
            working.credit(cfg.base, proceeds);
            info!("sold {:.8} {} for ~{:.8} {} (${:.2})", amount, token, proceeds, cfg.base, value_usd);
            SwapStatus::Executed
        }
        Err(e) => {
            warn!("sell of {token} failed: {e}");
            SwapStatus::Failed
        }
    }
}

fn target_value(targets: &WeightMap, token: Symbol, total_value: f64) -> f64 {
    targets.get(&token).copied().unwrap_or(0.0) * total_value
}

fn cmp_f64(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}

/// Pause before every submission after the first.
fn throttle(cfg: &PassConfig, submitted: &mut bool) {
    if *submitted && cfg.swap_delay_ms > 0 {
        thread::sleep(Duration::from_millis(cfg.swap_delay_ms));
    }
    *submitted = true;
}
