//! Command-line entry point.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use log::error;

use driftbot::config::Config;
use driftbot::engine::{Agent, CycleOptions, CycleOutcome};
use driftbot::error::Error;
use driftbot::feed::HttpPriceFeed;
use driftbot::gateway::{LogNotifier, Notifier, WebhookNotifier};
use driftbot::paper::PaperGateway;
use driftbot::Result;

#[derive(Parser)]
#[command(name = "driftbot", version, about = "Threshold-driven portfolio rebalancer")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one rebalance cycle and exit.
    Run {
        /// Plan and report without executing swaps.
        #[arg(long)]
        dry_run: bool,
        /// Execute without asking for confirmation.
        #[arg(long)]
        force: bool,
    },
    /// Rebalance on the configured interval until stopped.
    Watch {
        /// Plan every cycle without executing swaps.
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare performance against the buy-and-hold baseline.
    Report,
    /// Show current holdings, weights and targets.
    Holdings,
    /// Re-anchor the baseline to the current portfolio.
    ResetBaseline {
        /// Skip the confirmation prompt.
        #[arg(long)]
        force: bool,
    },
    /// Show configuration, feed health and state files.
    Status,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let code = match execute(cli) {
        Ok(code) => code,
        Err(Error::Aborted(msg)) => {
            error!("aborted: {msg}");
            eprintln!("hint: pass --force when no terminal is attached");
            1
        }
        Err(e) => {
            error!("{e}");
            1
        }
    };
    process::exit(code);
}

fn execute(cli: Cli) -> Result<i32> {
    let config = Config::load(&cli.config)?;
    let mut agent = build_agent(config)?;

    match cli.command {
        Command::Run { dry_run, force } => {
            let opts = CycleOptions {
                dry_run,
                assume_yes: force,
            };
            match agent.run_cycle(opts)? {
                CycleOutcome::Skipped(reason) => {
                    eprintln!("cycle skipped: {reason}");
                    Ok(2)
                }
                CycleOutcome::NoRebalance => {
                    println!("portfolio within threshold; nothing to do");
                    Ok(0)
                }
                CycleOutcome::Declined => {
                    println!("rebalance declined");
                    Ok(0)
                }
                CycleOutcome::Completed { .. } => Ok(0),
            }
        }
        Command::Watch { dry_run } => {
            agent.watch(CycleOptions {
                dry_run,
                assume_yes: true,
            })?;
            Ok(0)
        }
        Command::Report => {
            agent.report()?;
            Ok(0)
        }
        Command::Holdings => {
            agent.holdings()?;
            Ok(0)
        }
        Command::ResetBaseline { force } => {
            agent.reset_baseline(force)?;
            Ok(0)
        }
        Command::Status => {
            agent.status()?;
            Ok(0)
        }
    }
}

/// Wire the paper gateway into every seam: it reads balances, proxies
/// the HTTP feed (remembering quotes for settlement), and executes
/// swaps against the wallet file.
fn build_agent(config: Config) -> Result<Agent> {
    let feed = HttpPriceFeed::new(&config.feed, &config.basket())?;
    let paper = PaperGateway::open(&config, Box::new(feed))?;
    let notifier: Box<dyn Notifier> = match &config.notify.webhook_url {
        Some(url) => Box::new(WebhookNotifier::new(url)?),
        None => Box::new(LogNotifier),
    };
    Agent::new(
        config,
        Box::new(paper.clone()),
        Box::new(paper.clone()),
        Box::new(paper),
        notifier,
    )
}
