//! Append-only JSONL audit trail.
//!
//! Every cycle writes one line per event: what was quoted, what drifted,
//! what was swapped, how the cycle ended. Lines are self-describing JSON
//! objects with an `event` tag and a UTC timestamp, so the trail can be
//! replayed or grepped without this crate.
//!
//! Audit writes never abort a cycle; a failed append is logged and the
//! engine keeps going.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;

use crate::baseline::Baseline;
use crate::drift::TradeIntent;
use crate::error::Result;
use crate::planner::{PassOutcome, SwapRecord, SwapStatus};
use crate::portfolio::{serde_map, PriceMap};
use crate::prices::PriceProvenance;

#[derive(Serialize)]
struct AuditEvent<T: Serialize> {
    event: &'static str,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    data: T,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct PricesData {
    provenance: String,
    #[serde(with = "serde_map")]
    prices: PriceMap,
}

#[derive(Serialize)]
struct DriftData {
    total_value_usd: f64,
    intents: Vec<TradeIntent>,
}

#[derive(Serialize)]
struct BaselineData {
    captured_at: DateTime<Utc>,
    total_value_usd: f64,
}

#[derive(Serialize)]
struct CycleData {
    executed: usize,
    failed: usize,
    skipped: usize,
}

pub struct AuditLog {
    writer: BufWriter<File>,
}

impl AuditLog {
    /// Open (or create) the audit file in append mode.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Append one event. Failures are logged, never propagated.
    pub fn log<T: Serialize>(&mut self, event: &'static str, data: T) {
        if let Err(e) = self.append(event, data) {
            warn!("audit write failed: {e}");
        }
    }

    pub fn log_simple(&mut self, event: &'static str) {
        self.log(event, Empty {});
    }

    pub fn log_prices(&mut self, prices: &PriceMap, provenance: PriceProvenance) {
        self.log(
            "prices_fetched",
            PricesData {
                provenance: provenance.to_string(),
                prices: prices.clone(),
            },
        );
    }

    pub fn log_drift(&mut self, intents: &[TradeIntent], total_value_usd: f64) {
        self.log(
            "drift_detected",
            DriftData {
                total_value_usd,
                intents: intents.to_vec(),
            },
        );
    }

    pub fn log_baseline(&mut self, baseline: &Baseline, total_value_usd: f64) {
        self.log(
            "baseline_captured",
            BaselineData {
                captured_at: baseline.captured_at,
                total_value_usd,
            },
        );
    }

    pub fn log_swap(&mut self, record: &SwapRecord) {
        let event = match record.status {
            SwapStatus::Executed => "swap_executed",
            SwapStatus::Failed => "swap_failed",
            SwapStatus::SkippedDust | SwapStatus::SkippedFunds => "swap_skipped",
        };
        self.log(event, record.clone());
    }

    pub fn log_cycle(&mut self, outcome: &PassOutcome) {
        self.log(
            "cycle_completed",
            CycleData {
                executed: outcome.executed(),
                failed: outcome.failed(),
                skipped: outcome.skipped(),
            },
        );
    }

    fn append<T: Serialize>(&mut self, event: &'static str, data: T) -> std::io::Result<()> {
        let line = serde_json::to_string(&AuditEvent {
            event,
            ts: Utc::now(),
            data,
        })
        .map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Phase;
    use crate::token::Symbol;

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn events_append_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut audit = AuditLog::open(&path).unwrap();

        audit.log_simple("cycle_started");
        let prices: PriceMap = [(Symbol::new("WETH"), 2000.0)].into_iter().collect();
        audit.log_prices(&prices, PriceProvenance::Live);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "cycle_started");
        assert!(lines[0]["ts"].is_string());
        assert_eq!(lines[1]["event"], "prices_fetched");
        assert_eq!(lines[1]["provenance"], "live");
        assert_eq!(lines[1]["prices"]["WETH"], 2000.0);
    }

    #[test]
    fn swap_event_name_tracks_status() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut audit = AuditLog::open(&path).unwrap();

        let mut record = SwapRecord {
            from: Symbol::new("WBTC"),
            to: Symbol::new("WETH"),
            amount: 0.5,
            value_usd: 30_000.0,
            phase: Phase::Sell,
            status: SwapStatus::Executed,
        };
        audit.log_swap(&record);
        record.status = SwapStatus::SkippedDust;
        audit.log_swap(&record);

        let lines = read_lines(&path);
        assert_eq!(lines[0]["event"], "swap_executed");
        assert_eq!(lines[0]["phase"], "sell");
        assert_eq!(lines[0]["amount"], 0.5);
        assert_eq!(lines[1]["event"], "swap_skipped");
        assert_eq!(lines[1]["status"], "skipped_dust");
    }

    #[test]
    fn reopening_appends_rather_than_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let mut audit = AuditLog::open(&path).unwrap();
        audit.log_simple("cycle_started");
        drop(audit);

        let mut audit = AuditLog::open(&path).unwrap();
        audit.log_simple("agent_stopped");

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["event"], "agent_stopped");
    }
}
