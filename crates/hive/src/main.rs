use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hive::agents::EventSink;
use hive::models::{Candle, HiveConfig, StreamEvent};
use hive::{BacktestRequest, Daemon, OnDemand};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hive", about = "Autonomous paper-trading assistant driven by specialist agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/hive.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Pretty-print output JSON
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scanner, live prices and scheduled cycles until Ctrl-C
    Run,
    /// Analyze one symbol now and act on the decision
    Analyze {
        #[arg(short, long)]
        user: String,
        symbol: String,
    },
    /// Run one trading cycle for a user now
    Cycle {
        #[arg(short, long)]
        user: String,
    },
    /// Replay recorded candles, streaming events to stdout as JSON lines
    Backtest {
        #[arg(short, long)]
        user: String,
        /// JSON file mapping symbol to candles
        candles: String,
        #[arg(long, default_value_t = 30)]
        warmup: usize,
        #[arg(long)]
        max_steps: Option<usize>,
    },
    /// Analyze trade history and store proposed changes as the shadow strategy
    Optimize {
        #[arg(short, long)]
        user: String,
        /// Report only; do not store a proposal
        #[arg(long)]
        dry_run: bool,
    },
    /// Compare MAIN and SHADOW portfolio equity
    Shadow {
        #[arg(short, long)]
        user: String,
    },
    /// Sell every open MAIN position at current prices
    SellAll {
        #[arg(short, long)]
        user: String,
    },
    /// Close one open MAIN position by hand, overriding the agents
    Close {
        #[arg(short, long)]
        user: String,
        symbol: String,
        /// Why the position is being closed; kept in trade memory
        #[arg(short, long, default_value = "Manual close")]
        reason: String,
    },
    /// Show or change whether scheduled cycles run for a user
    Bot {
        #[arg(short, long)]
        user: String,
        #[arg(value_enum, default_value_t = BotAction::Status)]
        action: BotAction,
    },
    /// Create a user with the configured strategy template
    InitUser {
        #[arg(short, long)]
        user: String,
    },
    /// Watch the ticker stream and list tracked opportunities
    Opportunities {
        #[arg(long, default_value_t = 30)]
        watch_seconds: u64,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BotAction {
    Start,
    Stop,
    Status,
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &str) -> Result<HiveConfig> {
    if !std::path::Path::new(path).exists() {
        warn!(path, "Config file not found; using defaults");
        return Ok(HiveConfig::default());
    }
    let config_str =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&config_str).with_context(|| "Failed to parse config")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli.config)?;
    let runtime = hive::build_runtime(&config).context("Failed to build runtime")?;
    let engine = runtime.engine.clone();

    match cli.command {
        Command::Run => {
            let daemon = Daemon::new(runtime);
            let cancel = daemon.cancel_token();

            // Handle shutdown signals
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                info!("Received shutdown signal");
                cancel.cancel();
            });

            daemon
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("Daemon error: {e}"))?;
        }
        Command::Analyze { user, symbol } => {
            match engine.analyze_on_demand(&user, &symbol).await? {
                OnDemand::Decided { decision, outcome } => {
                    info!(?outcome, "Decision executed");
                    print_json(&decision, cli.pretty)?;
                }
                OnDemand::AlreadyAnalyzing => {
                    anyhow::bail!("{symbol} is already being analyzed")
                }
                OnDemand::AlreadyResolved(status) => {
                    anyhow::bail!("{symbol} was already analyzed and is {status}")
                }
            }
        }
        Command::Cycle { user } => {
            let report = engine.run_cycle(&user).await?;
            print_json(&report, cli.pretty)?;
        }
        Command::Backtest {
            user,
            candles,
            warmup,
            max_steps,
        } => {
            let candles_json = std::fs::read_to_string(&candles)
                .with_context(|| format!("Failed to read candles: {candles}"))?;
            let candles: BTreeMap<String, Vec<Candle>> =
                serde_json::from_str(&candles_json).context("Failed to parse candles JSON")?;

            let (tx, mut rx) = mpsc::channel::<StreamEvent>(256);
            let cancel = CancellationToken::new();
            let sink = EventSink::streaming(tx, cancel.clone());
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
            });
            let printer = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => error!(error = %e, "Failed to encode event"),
                    }
                }
            });

            let request = BacktestRequest {
                user_id: user,
                candles,
                warmup,
                max_steps,
                ..Default::default()
            };
            let report = engine.backtest(request, sink).await;
            printer.await.context("Event printer failed")?;
            print_json(&report?, cli.pretty)?;
        }
        Command::Optimize { user, dry_run } => {
            let report = if dry_run {
                engine.performance_report(&user).await?
            } else {
                engine.optimize(&user).await?
            };
            print_json(&report, cli.pretty)?;
        }
        Command::Shadow { user } => {
            print_json(&engine.compare_shadow(&user).await?, cli.pretty)?;
        }
        Command::SellAll { user } => {
            print_json(&engine.sell_all(&user).await?, cli.pretty)?;
        }
        Command::Close {
            user,
            symbol,
            reason,
        } => {
            print_json(&engine.close_position(&user, &symbol, &reason).await?, cli.pretty)?;
        }
        Command::Bot { user, action } => {
            match action {
                BotAction::Start => engine.set_bot_active(&user, true)?,
                BotAction::Stop => engine.set_bot_active(&user, false)?,
                BotAction::Status => {}
            }
            print_json(
                &serde_json::json!({ "user_id": user, "active": engine.bot_active(&user)? }),
                cli.pretty,
            )?;
        }
        Command::InitUser { user } => {
            let created = engine.init_user(&user)?;
            print_json(
                &serde_json::json!({ "user_id": user, "created": created }),
                cli.pretty,
            )?;
        }
        Command::Opportunities { watch_seconds } => {
            match &runtime.hub {
                Some(hub) => {
                    let cancel = CancellationToken::new();
                    let scanner = engine.scanner().clone();
                    let task = tokio::spawn(scanner.run(hub.clone(), cancel.clone()));
                    tokio::time::sleep(Duration::from_secs(watch_seconds)).await;
                    cancel.cancel();
                    task.await.context("Scanner task failed")??;
                }
                None => warn!("No ticker stream configured; nothing to watch"),
            }
            print_json(&engine.opportunities(), cli.pretty)?;
        }
    }

    Ok(())
}
