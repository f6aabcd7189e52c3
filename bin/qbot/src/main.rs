use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent::{PolicyAgent, TableLock, TableStore};
use common::{Config, RunMode, SystemClock};
use engine::{Backtester, DecisionLoop, TuningFile};
use paper::{load_bars_csv, PaperClient, ReplayFeed};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(symbol = %cfg.symbol, mode = %cfg.run_mode, "qbot starting");

    let tuning = TuningFile::load(&cfg.tuning_config_path)
        .with_context(|| format!("loading tuning file {}", cfg.tuning_config_path))?;

    // ── Value table ───────────────────────────────────────────────────────────
    let model_path = Path::new(&cfg.model_path);
    let _lock = TableLock::acquire(model_path)
        .context("value table is in use by another process")?;

    let mut agent = PolicyAgent::new(tuning.agent.clone())
        .context("invalid [agent] hyperparameters")?
        .with_store(TableStore::new(model_path, Arc::new(SystemClock)));
    if let Some(seed) = cfg.rng_seed {
        agent = agent.with_seed(seed);
    }
    if agent.load(cfg.versioned_snapshots) {
        info!(states = agent.table().len(), "Value table restored");
    }

    // ── Market data and paper execution ───────────────────────────────────────
    let bars = load_bars_csv(&cfg.bars_csv_path)
        .with_context(|| format!("reading bars from {}", cfg.bars_csv_path))?;
    let paper = Arc::new(PaperClient::new(cfg.paper_starting_cash, cfg.paper_slippage_bps));

    match cfg.run_mode {
        RunMode::Backtest => {
            // Backtests walk the bars directly; the feed is never polled.
            let feed = Arc::new(ReplayFeed::new(&cfg.symbol, Vec::new(), 0));
            let (decision, _handle) =
                DecisionLoop::new(&cfg.symbol, &tuning, agent, feed, paper.clone())?;
            let decision = decision.with_versioned_snapshots(cfg.versioned_snapshots);

            let mut backtester = Backtester::new(decision, paper.clone());
            let report = backtester.run(&bars).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        RunMode::Live => {
            let warmup = tuning.features.long_window.saturating_sub(1);
            let feed = Arc::new(
                ReplayFeed::new(&cfg.symbol, bars, warmup).with_price_sink(paper.clone()),
            );
            let (decision, handle) =
                DecisionLoop::new(&cfg.symbol, &tuning, agent, feed.clone(), paper.clone())?;
            let mut decision = decision.with_versioned_snapshots(cfg.versioned_snapshots);

            let stopper = handle.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Shutdown signal received. Stopping after current tick.");
                    stopper.stop();
                }
            });

            // Recorded data runs out eventually; stop instead of idling on errors.
            let watcher = handle.clone();
            tokio::spawn(async move {
                while !feed.is_exhausted() {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                info!("Recorded bars exhausted. Stopping.");
                watcher.stop();
            });

            decision.run().await;
        }
    }

    info!(equity = paper.equity().await, "qbot exiting");
    Ok(())
}
