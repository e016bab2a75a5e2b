//! Uber MM - Main Entry Point
//!
//! Runs quoting sessions against the paper venue and paper oracle.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use uber_mm::accounting::AccountingTracker;
use uber_mm::config::Config;
use uber_mm::exchange::{AccountId, LocalSigner, MarketId, MarketState, PaperVenue, TraderId};
use uber_mm::oracle::{FeedRegistry, PaperOracle};
use uber_mm::persistence::SessionJournal;
use uber_mm::session::{SessionParams, SessionResult, SessionRunner};
use uber_mm::strategy::{SessionInitializer, SessionTeardown, StepOutcome, StopSignal};

/// Uber MM CLI
#[derive(Parser)]
#[command(name = "uber-mm")]
#[command(version, about = "BBO-aware two-sided quoting bot")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full quoting session (default)
    Run {
        /// Override the number of ticks
        #[arg(short, long)]
        ticks: Option<u32>,

        /// Override the tick interval in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,
    },

    /// Create strategy state and claim a seat, then exit
    Init,

    /// Cancel all orders, withdraw funds and report balances
    Teardown,

    /// Show recent sessions from the journal
    Status {
        /// Path to SQLite database (default: journal path from config)
        #[arg(short, long)]
        db: Option<String>,

        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

/// Paper collaborators wired from config.
struct PaperEnvironment {
    venue: PaperVenue,
    oracle: PaperOracle,
    registry: FeedRegistry,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let mut config = Config::load()?;

    match cli.command {
        Some(Commands::Status { db, limit }) => {
            let db = db.unwrap_or_else(|| config.journal.path.clone());
            return show_status(&db, limit);
        }
        Some(Commands::Init) => {
            config.validate()?;
            return run_init(&config).await;
        }
        Some(Commands::Teardown) => {
            config.validate()?;
            return run_teardown(&config).await;
        }
        Some(Commands::Run { ticks, interval_ms }) => {
            if let Some(ticks) = ticks {
                config.session.tick_count = ticks;
            }
            if let Some(interval_ms) = interval_ms {
                config.session.tick_interval_ms = interval_ms;
            }
        }
        None => {
            // Default: run a session with configured values
        }
    }

    config.validate()?;

    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Uber MM v{} - Paper Quoting Session             ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(&config);

    run_session(&config).await
}

async fn run_session(config: &Config) -> Result<()> {
    let env = paper_environment(config).await?;

    // Shutdown signal
    let stop = StopSignal::new();
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received, finishing current tick");
        stop_on_signal.trigger();
    });

    let runner = SessionRunner::new(
        &env.venue,
        &env.oracle,
        &env.registry,
        config.session.clone(),
    );
    let result = runner.run(session_params(config), &stop).await?;

    log_session_summary(&result);

    if config.journal.enabled {
        if let Some(parent) = Path::new(&config.journal.path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let journal = SessionJournal::new(&config.journal.path)?;
        let session_id = journal.record_session(&result)?;
        info!(session_id, path = %config.journal.path, "📂 [JOURNAL] Session recorded");
    }

    Ok(())
}

async fn run_init(config: &Config) -> Result<()> {
    let env = paper_environment(config).await?;
    let params = session_params(config);

    let report = SessionInitializer::new(config.session.request_timeout())
        .ensure_initialized(&env.venue, &params.trader, &params.market, &params.strategy)
        .await?;

    info!("🔧 Initialization");
    info!("   ├─ Strategy:     {}", describe_step(&report.strategy));
    info!("   ├─ Seat request: {}", describe_step(&report.seat_request));
    info!("   └─ Seat claim:   {}", describe_step(&report.seat_claim));

    if !report.is_ready() {
        warn!("⚠️  Pair is not ready for quoting");
    }
    Ok(())
}

async fn run_teardown(config: &Config) -> Result<()> {
    let env = paper_environment(config).await?;
    let params = session_params(config);
    let timeout = config.session.request_timeout();
    let tracker = AccountingTracker::new(
        config.paper.base_decimals,
        config.paper.quote_decimals,
        timeout,
    );

    let result = SessionTeardown::new(config.session.settle_delay(), timeout)
        .teardown(
            &env.venue,
            &tracker,
            &params.trader,
            &params.market,
            &params.base_account,
            &params.quote_account,
        )
        .await;

    info!("🧹 Teardown");
    info!("   ├─ Cancel:   {}", describe_step(&result.cancel));
    info!("   ├─ Withdraw: {}", describe_step(&result.withdraw));
    match result.final_checkpoint.balances {
        Some(balances) => info!(
            "   └─ Balances: base {} / quote {}",
            balances.base, balances.quote
        ),
        None => warn!("   └─ Balances unavailable"),
    }
    Ok(())
}

/// Build the paper venue and oracle from the `paper` config section.
async fn paper_environment(config: &Config) -> Result<PaperEnvironment> {
    let trader = TraderId::new(config.venue.trader.as_str());
    let market = MarketId::new(config.venue.market.as_str());
    let paper = &config.paper;

    if config.venue.signer_secret.is_empty() {
        warn!("⚠️  No signer secret configured, paper requests are signed with an empty key");
    }
    let signer = Arc::new(LocalSigner::new(
        trader.clone(),
        config.venue.signer_secret.as_bytes(),
    ));

    let venue = PaperVenue::new(signer).with_latency(Duration::from_millis(paper.latency_ms));
    venue
        .add_market(MarketState {
            market: market.clone(),
            best_bid: Some(paper.best_bid),
            best_ask: Some(paper.best_ask),
            tick_size: paper.tick_size,
            base_decimals: paper.base_decimals,
            quote_decimals: paper.quote_decimals,
            base_vault: AccountId::new(format!("{}-base-vault", market)),
            quote_vault: AccountId::new(format!("{}-quote-vault", market)),
        })
        .await;
    venue
        .fund_trader(
            &trader,
            &market,
            AccountId::new(config.venue.base_account.as_str()),
            AccountId::new(config.venue.quote_account.as_str()),
            paper.initial_base_atoms,
            paper.initial_quote_atoms,
        )
        .await;

    let registry = FeedRegistry::from_config(&config.feeds);
    let feeds = registry
        .resolve(&market)
        .context("market has no registered price feeds")?;

    let oracle = PaperOracle::new(config.oracle.limits());
    oracle
        .set_price(feeds.base.clone(), paper.base_price_usd)
        .await;
    oracle
        .set_price(feeds.quote.clone(), paper.quote_price_usd)
        .await;

    info!(
        %market,
        bid = %paper.best_bid,
        ask = %paper.best_ask,
        base_feed = %feeds.base,
        quote_feed = %feeds.quote,
        "✅ [INIT] Paper venue and oracle ready"
    );

    Ok(PaperEnvironment {
        venue,
        oracle,
        registry,
    })
}

fn session_params(config: &Config) -> SessionParams {
    SessionParams {
        trader: TraderId::new(config.venue.trader.as_str()),
        market: MarketId::new(config.venue.market.as_str()),
        strategy: config.strategy.clone(),
        base_account: AccountId::new(config.venue.base_account.as_str()),
        quote_account: AccountId::new(config.venue.quote_account.as_str()),
    }
}

fn describe_step(outcome: &StepOutcome) -> String {
    match outcome {
        StepOutcome::Completed(tx) => format!("completed ({})", tx),
        StepOutcome::AlreadyDone => "already done".to_string(),
        StepOutcome::Failed(e) => format!("failed [{}] {}", e.kind(), e),
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "uber-mm.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer guard alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("uber_mm=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Trader: {}", config.venue.trader);
    info!("   Market: {}", config.venue.market);
    info!("   Mode: {}", config.strategy.price_improvement_mode);
    info!("   Edge: {} bps", config.strategy.quote_edge_bps);
    info!("   Margin: {} bps", config.strategy.margin_bps);
    info!(
        "   Size: {} quote atoms per side",
        config.strategy.quote_size_quote_atoms
    );
    info!("   Post Only: {}", config.strategy.post_only);
    info!(
        "   Ticks: {} every {}ms",
        config.session.tick_count, config.session.tick_interval_ms
    );
    info!(
        "   Balance Report: every {} ticks",
        config.session.balance_report_every
    );
}

fn log_session_summary(result: &SessionResult) {
    let session = &result.session;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📊 Session Summary: {} on {}", session.trader, session.market);
    info!(
        "   ├─ Ticks:     {} run, {} failed{}",
        result.summary.ticks_run,
        result.summary.ticks_failed,
        if result.summary.stopped_early {
            " (stopped early)"
        } else {
            ""
        }
    );
    info!(
        "   ├─ Init:      {}",
        if result.init.is_ready() { "ready" } else { "incomplete" }
    );
    info!(
        "   ├─ Teardown:  {}",
        if result.teardown.is_clean() {
            "clean"
        } else {
            "with failures"
        }
    );
    match (session.start_balances, session.end_balances) {
        (Some(start), Some(end)) => {
            info!("   ├─ Start:     base {} / quote {}", start.base, start.quote);
            info!("   ├─ End:       base {} / quote {}", end.base, end.quote);
        }
        _ => warn!("   ├─ Balances:  unavailable"),
    }
    match &result.pnl {
        Some(pnl) => info!("   └─ Realized:  ${:.6}", pnl.realized_pnl),
        None => warn!("   └─ Realized:  unavailable"),
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Print recent sessions from the journal.
fn show_status(db_path: &str, limit: usize) -> Result<()> {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              UBER MM SESSION HISTORY                       ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   No session has been journaled yet, or the database path is incorrect.");
        return Ok(());
    }

    let journal = SessionJournal::new(db_path)?;
    let sessions = journal.recent_sessions(limit)?;

    if sessions.is_empty() {
        println!("\n❌ No sessions recorded.");
        return Ok(());
    }

    for session in &sessions {
        let pnl = session
            .realized_pnl
            .map(|p| format!("${:.6}", p))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "\n📈 #{} {} ({}) by {}",
            session.id, session.market, session.mode, session.trader
        );
        println!(
            "   ├─ Started:   {}",
            session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!(
            "   ├─ Duration:  {}s",
            (session.finished_at - session.started_at).num_seconds()
        );
        println!(
            "   ├─ Ticks:     {} run, {} failed{}",
            session.ticks_run,
            session.ticks_failed,
            if session.stopped_early {
                " (stopped early)"
            } else {
                ""
            }
        );
        println!(
            "   ├─ Teardown:  {}",
            if session.teardown_clean {
                "clean"
            } else {
                "with failures"
            }
        );
        println!("   └─ Realized:  {}", pnl);
    }

    if let Some(latest) = sessions.first() {
        let failures = journal.tick_failures(latest.id)?;
        if !failures.is_empty() {
            println!("\n⚠️  Failed ticks in session #{}", latest.id);
            for failure in &failures {
                println!(
                    "   ├─ tick {:>4} {} [{}] {}",
                    failure.tick_index, failure.operation, failure.kind, failure.message
                );
            }
        }
    }

    Ok(())
}
