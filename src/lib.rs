//! Threshold-driven portfolio rebalancer for ERC-20 token baskets.
//!
//! The agent tracks a fixed basket with target weights and periodically
//! runs one cycle: read holdings, fetch USD quotes, compute weights,
//! flag tokens whose drift clears both the threshold and the minimum
//! trade value, then correct them with two-leg swaps settled through a
//! base token (sells first, then a base top-up, then buys). A frozen
//! buy-and-hold snapshot from the first cycle anchors the performance
//! comparison, and every decision lands in an append-only JSONL audit
//! trail.
//!
//! Execution is paper-traded against a persistent wallet file; the
//! exchange surface is four small traits in [`gateway`], so a real
//! venue can be wired in without touching the engine.

pub mod audit;
pub mod baseline;
pub mod config;
pub mod drift;
pub mod engine;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod mock;
pub mod paper;
pub mod planner;
pub mod portfolio;
pub mod prices;
pub mod store;
pub mod token;

pub use error::{Error, Result};
pub use token::Symbol;
