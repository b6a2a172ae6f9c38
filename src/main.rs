use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use krakenbot::api::{KrakenClient, KrakenCredentials};
use krakenbot::backtest::{MarketScenario, SyntheticFeed};
use krakenbot::execution::{ExecutionGateway, PositionLedger, PriceFeed};
use krakenbot::models::TradingMode;
use krakenbot::persistence::{StateFile, StateLock};
use krakenbot::settings::{BotConfig, DEFAULT_CONFIG_PATH};
use krakenbot::strategy::RuleEngine;
use krakenbot::{status, Clock, Scheduler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// Kraken spot trading bot: dip entry, take-profit and stop-loss exits
#[derive(Parser, Debug)]
#[command(name = "krakenbot")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading loop until Ctrl+C (default)
    Run,

    /// Dry run against a seeded synthetic feed with a simulated clock
    Simulate {
        /// Number of cycles to run
        #[arg(long, default_value_t = 1000)]
        cycles: u64,

        /// Random seed for the price path
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Starting price
        #[arg(long, default_value_t = 50_000.0)]
        start_price: f64,

        /// uptrend, downtrend, sideways or volatile
        #[arg(long, default_value = "volatile")]
        scenario: MarketScenario,

        /// Simulated minutes between cycles
        #[arg(long, default_value_t = 5)]
        tick_minutes: i64,

        /// Fraction of price fetches that fail
        #[arg(long, default_value_t = 0.0)]
        failure_rate: f64,

        /// Where to write the simulated ledger (default: a temp directory)
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Print the persisted ledger
    Status {
        /// State file to read (default: the configured one)
        #[arg(long)]
        state: Option<PathBuf>,
    },

    /// Book a manual close of the open paper position at a given price
    ///
    /// Refused while `run` holds the state file, and for live positions.
    Close {
        /// State file to update (default: the configured one)
        #[arg(long)]
        state: Option<PathBuf>,

        /// Price to book the close at
        #[arg(long)]
        price: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Simulate {
            cycles,
            seed,
            start_price,
            scenario,
            tick_minutes,
            failure_rate,
            state,
        } => {
            let feed = SyntheticFeed::new(seed, start_price)
                .with_scenario(scenario)
                .with_failure_rate(failure_rate);
            simulate(config, feed, cycles, tick_minutes, state).await
        }
        Command::Status { state } => {
            let path = state.unwrap_or(config.state_file);
            print_status(&path, config.direction_aware_pnl)
        }
        Command::Close { state, price } => {
            let path = state.unwrap_or_else(|| config.state_file.clone());
            close_position(&config, &path, price)
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: BotConfig) -> anyhow::Result<()> {
    tracing::info!("🚀 KrakenBot starting");

    let mode = config.mode();
    let credentials = match mode {
        TradingMode::Paper => None,
        TradingMode::Live => Some(
            KrakenCredentials::from_env().context("Live trading needs Kraken API credentials")?,
        ),
    };

    // Held until the loop exits so no other process writes the same ledger
    let mut state_lock = StateLock::open(&config.state_file)?;
    let _state_guard = state_lock
        .try_acquire()
        .context("Another krakenbot is already running on this state file")?;

    let client = Arc::new(KrakenClient::new(&config.api_url, credentials)?);
    let gateway = match mode {
        TradingMode::Paper => ExecutionGateway::paper(),
        TradingMode::Live => {
            tracing::warn!("⚠️  LIVE TRADING ENABLED: orders will be sent to Kraken");
            ExecutionGateway::live(client.clone())
        }
    }
    .with_order_timeout(Duration::from_secs(config.order_timeout_secs));

    let today = config.day_boundary.trading_day(Utc::now());
    let ledger = PositionLedger::load_or_default(StateFile::new(&config.state_file), today)?
        .with_direction_aware_pnl(config.direction_aware_pnl);
    let engine = RuleEngine::from_config(&config);
    let feed: Arc<dyn PriceFeed> = client;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut scheduler = Scheduler::new(config, ledger, engine, feed, gateway, shutdown_rx);
    let stats = scheduler.run().await.context("Trading loop aborted")?;

    tracing::info!(cycles = stats.cycles, "👋 KrakenBot stopped");
    Ok(())
}

async fn simulate(
    mut config: BotConfig,
    feed: SyntheticFeed,
    cycles: u64,
    tick_minutes: i64,
    state: Option<PathBuf>,
) -> anyhow::Result<()> {
    if tick_minutes <= 0 {
        bail!("--tick-minutes must be positive");
    }
    let step = chrono::Duration::try_minutes(tick_minutes).context("--tick-minutes is out of range")?;

    // Simulations never reach the exchange
    config.paper_trading = true;

    let state_path = match state {
        Some(path) => path,
        None => scratch_dir()?.join("state.json"),
    };
    if state_path.exists() {
        bail!(
            "{} already exists; simulations start from an empty ledger",
            state_path.display()
        );
    }

    let start = Utc::now();
    let direction_aware_pnl = config.direction_aware_pnl;
    let ledger = PositionLedger::with_state(
        StateFile::new(&state_path),
        krakenbot::execution::LedgerState::new(config.day_boundary.trading_day(start)),
    )
    .with_direction_aware_pnl(config.direction_aware_pnl);
    let engine = RuleEngine::from_config(&config);

    tracing::info!(
        cycles,
        scenario = ?feed.scenario(),
        state = %state_path.display(),
        "🧪 Starting simulation"
    );

    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler = Scheduler::new(
        config,
        ledger,
        engine,
        Arc::new(feed),
        ExecutionGateway::paper(),
        shutdown_rx,
    )
    .with_clock(Clock::Simulated {
        now: start,
        step,
    })
    .with_poll_interval(Duration::ZERO)
    .with_max_cycles(cycles);

    let stats = scheduler.run().await?;

    println!(
        "{}",
        status::render(scheduler.ledger().state(), direction_aware_pnl)
    );
    println!(
        "Cycles: {}  opened: {}  closed: {}  skipped: {}",
        stats.cycles, stats.opened, stats.closed, stats.skipped
    );
    Ok(())
}

fn print_status(path: &Path, direction_aware_pnl: bool) -> anyhow::Result<()> {
    match status::read_state(path)? {
        Some(state) => print!("{}", status::render(&state, direction_aware_pnl)),
        None => println!("No state at {} yet; the bot has not run.", path.display()),
    }
    Ok(())
}

fn close_position(config: &BotConfig, path: &Path, price: f64) -> anyhow::Result<()> {
    let mut state_lock = StateLock::open(path)?;
    let _state_guard = state_lock
        .try_acquire()
        .context("Stop the running bot before closing positions by hand")?;

    let today = config.day_boundary.trading_day(Utc::now());
    let mut ledger = PositionLedger::load_or_default(StateFile::new(path), today)?
        .with_direction_aware_pnl(config.direction_aware_pnl);

    let closed = ledger.close_manual(&config.symbol, price)?;
    println!(
        "Closed #{} {} {} at {:.2} ({:+.2}%)",
        closed.id,
        closed.side,
        closed.symbol,
        price,
        closed.pnl_percent.unwrap_or_default()
    );
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("krakenbot=info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Per-run scratch directory for simulated ledgers
fn scratch_dir() -> anyhow::Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("krakenbot-sim-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}
