// In app/src/main.rs

use anyhow::{Context, Result};
use app_config::Settings;
use clap::{Parser, Subcommand};
use database::{account_history, orders, positions, Db};
use engine::{Engine, HoldProvider};
use execution::{ExchangeGateway, LiveExchange, SimulatedExchange};
use std::sync::Arc;
use tracing_subscriber::prelude::*;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A scheduled Binance Futures trading engine.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Starts the scheduled trading loop and the position poller. Stops on Ctrl-C.
    Run,
    /// Runs a single trading cycle and exits.
    Cycle,
    /// Reconciles local positions and orders with the exchange once.
    Sync,
    /// Prints the persisted positions, active orders and the last account snapshot.
    Status,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = app_config::load_settings().context("failed to load configuration")?;
    init_tracing(&settings);
    tracing::info!(environment = %settings.app.environment, "Starting trading engine");

    let db = database::connect(&settings.database).await?;

    match cli.command {
        Commands::Run => run(&settings, db).await?,
        Commands::Cycle => {
            let engine = build_engine(&settings, db)?;
            let summary = engine.run_cycle_once().await?;
            println!("{:#?}", summary);
        }
        Commands::Sync => {
            let engine = build_engine(&settings, db.clone())?;
            let report = engine.reconciler().sync().await?;
            println!("{:#?}", report);
            print_positions(&db).await?;
        }
        Commands::Status => print_status(&db).await?,
    }

    tracing::info!("Trading engine has finished.");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let level = settings
        .app
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::filter::Targets::new()
            .with_target("sqlx::query", tracing::Level::WARN) // Disable sqlx query debug logs
            .with_default(level),
    );
    tracing_subscriber::registry().with(fmt_layer).init();
}

fn build_exchange(settings: &Settings) -> Result<Arc<dyn ExchangeGateway>> {
    if settings.app.paper_trading {
        tracing::info!("Paper trading: orders go to the simulated exchange.");
        return Ok(Arc::new(SimulatedExchange::new(&settings.simulation)));
    }
    tracing::warn!("LIVE TRADING IS ENABLED. REAL ORDERS WILL BE PLACED.");
    let api_client = api_client::new(&settings.binance)?;
    Ok(Arc::new(LiveExchange::new(api_client)))
}

fn build_engine(settings: &Settings, db: Db) -> Result<Engine> {
    let exchange = build_exchange(settings)?;
    Ok(Engine::new(settings, db, exchange, Arc::new(HoldProvider)))
}

// --- "Run" Subcommand Logic ---

async fn run(settings: &Settings, db: Db) -> Result<()> {
    let engine = build_engine(settings, db)?;
    engine.start().await?;

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested; waiting for the current cycle.");

    match engine.stop().await {
        // A fatal account breach has already stopped the scheduler.
        Err(engine::Error::NotRunning) => {
            let status = engine.status().await;
            tracing::warn!(last_error = ?status.last_error, "Scheduler had already stopped.");
        }
        other => other?,
    }
    Ok(())
}

// --- "Status" Subcommand Logic ---

async fn print_positions(db: &Db) -> Result<()> {
    let mut conn = db.acquire().await?;
    let open = positions::list(&mut conn).await?;
    println!("Open positions: {}", open.len());
    for p in open {
        println!(
            "  {} {} qty={} entry={} mark={} lev={}x pnl={} ({:.2}%, peak {:.2}%)",
            p.symbol,
            p.side,
            p.quantity,
            p.entry_price,
            p.current_price,
            p.leverage,
            p.unrealized_pnl,
            p.pnl_percent(),
            p.peak_pnl_percent
        );
    }
    Ok(())
}

async fn print_status(db: &Db) -> Result<()> {
    print_positions(db).await?;

    let mut conn = db.acquire().await?;
    let active = orders::list_active(&mut conn).await?;
    println!("Active orders: {}", active.len());
    for o in active {
        println!(
            "  #{} {} {} {} trigger={} qty={} exchange_id={}",
            o.id, o.symbol, o.side, o.order_type, o.trigger_price, o.quantity, o.exchange_id
        );
    }

    match account_history::latest(&mut conn).await? {
        Some(s) => println!(
            "Last snapshot (iteration {} at {}): total={} available={} unrealized={}",
            s.iteration, s.recorded_at, s.total_balance, s.available_balance, s.unrealized_pnl
        ),
        None => println!("No account snapshot recorded yet."),
    }
    Ok(())
}
