use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::domain::{OrderRequest, OrderSide, SettlementEvent};
use crate::engine::{BatchEngine, EngineStats};
use crate::error::{EngineError, Result};
use crate::settlement::{DryRunPayout, DryRunSettlementBackend};

#[derive(Parser)]
#[command(name = "mevguard")]
#[command(version = "0.1.0")]
#[command(about = "MEV-protected order batching and fee settlement engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus $MEVGUARD_ENV.toml)
    #[arg(short, long, default_value = "config", env = "MEVGUARD_CONFIG_DIR")]
    pub config_dir: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine against dry-run collaborators and print final stats
    Simulate(SimulateArgs),
    /// Show the effective configuration
    Config {
        /// Only validate; exit non-zero on invalid values
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of orders to submit
    #[arg(short, long, default_value = "10")]
    pub orders: usize,
    /// Input amount of every order
    #[arg(short, long, default_value = "1000000")]
    pub amount: Decimal,
    /// Concurrent submitting tasks
    #[arg(long, default_value = "4")]
    pub submitters: usize,
    /// Override engine.batch_size
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Override engine.batch_timeout_ms
    #[arg(long)]
    pub batch_timeout_ms: Option<u64>,
    /// Make the dry-run backend reject every batch
    #[arg(long)]
    pub fail_backend: bool,
    /// Simulated settlement latency per batch (ms)
    #[arg(long, default_value = "0")]
    pub latency_ms: u64,
    /// Skip fee collection at the end
    #[arg(long)]
    pub no_collect: bool,
    /// Maximum seconds to wait for settlement before shutting down
    #[arg(long, default_value = "30")]
    pub wait_secs: u64,
}

/// Drive a full engine lifecycle with dry-run collaborators
///
/// Orders are submitted from `submitters` concurrent tasks; the run ends when
/// every accepted order reached a terminal status, `wait_secs` elapsed or
/// `interrupt` resolved. The engine is then shut down and fees collected.
pub async fn run_simulation<F>(
    config: &AppConfig,
    args: SimulateArgs,
    interrupt: F,
) -> Result<EngineStats>
where
    F: Future<Output = ()>,
{
    let mut engine_config = config.engine.clone();
    if let Some(batch_size) = args.batch_size {
        engine_config.batch_size = batch_size;
    }
    if let Some(timeout_ms) = args.batch_timeout_ms {
        engine_config.batch_timeout_ms = timeout_ms;
    }

    let backend = Arc::new(
        DryRunSettlementBackend::new().with_latency(Duration::from_millis(args.latency_ms)),
    );
    backend.set_failing(args.fail_backend);
    let payout = Arc::new(DryRunPayout::new());

    let engine = BatchEngine::new(engine_config, backend.clone(), payout)?;
    let mut events = engine.subscribe();
    engine.start_batch_processor().await?;

    let submitters = args.submitters.max(1);
    let results = join_all((0..submitters).map(|worker| {
        let engine = engine.clone();
        let count = args.orders / submitters + usize::from(worker < args.orders % submitters);
        let amount = args.amount;
        async move {
            let mut accepted = 0usize;
            for n in 0..count {
                let (input, output, side) = if n % 2 == 0 {
                    ("WETH", "USDC", OrderSide::Sell)
                } else {
                    ("USDC", "WETH", OrderSide::Buy)
                };
                let request =
                    OrderRequest::new(format!("0xsim{:02}", worker), input, output, amount, side);
                match engine.add_order(request).await {
                    Ok(_) => accepted += 1,
                    Err(e) => warn!(worker, error = %e, "simulated order rejected"),
                }
            }
            accepted
        }
    }))
    .await;
    let accepted: usize = results.into_iter().sum();
    info!(accepted, "simulated orders submitted");

    let wait = async {
        let mut finished = 0usize;
        while finished < accepted {
            match events.recv().await {
                Ok(event) => {
                    finished += event.order_ids().len();
                    if let SettlementEvent::BatchFailed { batch_id, error, .. } = &event {
                        error!(batch_id, %error, "simulated batch failed");
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "settlement events lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    tokio::select! {
        _ = wait => {}
        _ = tokio::time::sleep(Duration::from_secs(args.wait_secs)) => {
            warn!(wait_secs = args.wait_secs, "settlement wait elapsed; shutting down");
        }
        _ = interrupt => {
            warn!("interrupted; shutting down");
        }
    }

    engine.shutdown().await?;

    if !args.no_collect {
        match engine.collect_fees().await {
            Ok(receipt) => info!(
                amount = %receipt.amount,
                recipient = %receipt.recipient,
                confirmation = %receipt.confirmation,
                "simulation fees collected"
            ),
            Err(EngineError::NothingToCollect) => info!("no fees to collect"),
            Err(e) => return Err(e),
        }
    }

    info!(submissions = backend.submissions(), "simulation finished");
    Ok(engine.stats().await)
}
