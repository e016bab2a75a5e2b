//! SQLite journal of finished sessions.
//!
//! Records, per session:
//! - Market, trader, timing and loop summary
//! - Start/end balances and realized PnL
//! - Every tick outcome
//! - Balance checkpoints

use crate::session::SessionResult;
use crate::strategy::TickOutcome;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// One row of the `sessions` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: i64,
    pub trader: String,
    pub market: String,
    pub mode: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ticks_run: u32,
    pub ticks_failed: u32,
    pub stopped_early: bool,
    pub teardown_clean: bool,
    pub realized_pnl: Option<Decimal>,
}

/// A failed tick as stored in `session_ticks`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedTickFailure {
    pub tick_index: u32,
    pub operation: String,
    pub kind: String,
    pub message: String,
}

/// SQLite-backed session journal.
pub struct SessionJournal {
    conn: Connection,
}

impl SessionJournal {
    /// Open the journal, creating the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let journal = Self { conn };
        journal.init_schema()?;

        info!("Session journal opened at {:?}", db_path.as_ref());
        Ok(journal)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trader TEXT NOT NULL,
                market TEXT NOT NULL,
                mode TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                ticks_run INTEGER NOT NULL,
                ticks_failed INTEGER NOT NULL,
                stopped_early INTEGER NOT NULL,
                init_ready INTEGER NOT NULL,
                teardown_clean INTEGER NOT NULL,
                start_base TEXT,
                start_quote TEXT,
                end_base TEXT,
                end_quote TEXT,
                realized_pnl TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_started ON sessions(started_at);

            CREATE TABLE IF NOT EXISTS session_ticks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id),
                tick_index INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                elapsed_ms INTEGER NOT NULL,
                fair_price TEXT,
                bid_price TEXT,
                ask_price TEXT,
                tx_ref TEXT,
                failure_operation TEXT,
                failure_kind TEXT,
                failure_message TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_ticks_session ON session_ticks(session_id);

            CREATE TABLE IF NOT EXISTS balance_checkpoints (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES sessions(id),
                label TEXT NOT NULL,
                taken_at TEXT NOT NULL,
                base TEXT,
                quote TEXT,
                error TEXT
            );
            "#,
        )?;

        debug!("Journal schema initialized");
        Ok(())
    }

    /// Store a finished session with its ticks and checkpoints. Returns the session id.
    pub fn record_session(&self, result: &SessionResult) -> Result<i64> {
        let session = &result.session;
        let tx = self.conn.unchecked_transaction()?;

        tx.execute(
            r#"
            INSERT INTO sessions (trader, market, mode, started_at, finished_at, ticks_run,
                                  ticks_failed, stopped_early, init_ready, teardown_clean,
                                  start_base, start_quote, end_base, end_quote, realized_pnl)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
            params![
                session.trader.as_str(),
                session.market.as_str(),
                session.strategy.price_improvement_mode.as_str(),
                session.started_at.to_rfc3339(),
                result.finished_at.to_rfc3339(),
                result.summary.ticks_run,
                result.summary.ticks_failed,
                result.summary.stopped_early as i32,
                result.init.is_ready() as i32,
                result.teardown.is_clean() as i32,
                session.start_balances.map(|b| b.base.to_string()),
                session.start_balances.map(|b| b.quote.to_string()),
                session.end_balances.map(|b| b.base.to_string()),
                session.end_balances.map(|b| b.quote.to_string()),
                result.pnl.map(|p| p.realized_pnl.to_string()),
            ],
        )?;
        let session_id = tx.last_insert_rowid();

        for tick in &session.ticks {
            let (fair, bid, ask, tx_ref, op, kind, message) = match &tick.outcome {
                TickOutcome::Quoted {
                    fair_price,
                    quotes,
                    tx,
                } => (
                    Some(fair_price.to_string()),
                    Some(quotes.bid_price.to_string()),
                    Some(quotes.ask_price.to_string()),
                    Some(tx.to_string()),
                    None,
                    None,
                    None,
                ),
                TickOutcome::Failed(failure) => (
                    None,
                    None,
                    None,
                    None,
                    Some(failure.operation.as_str()),
                    Some(failure.error.kind()),
                    Some(failure.error.to_string()),
                ),
            };
            tx.execute(
                r#"
                INSERT INTO session_ticks (session_id, tick_index, started_at, elapsed_ms,
                                           fair_price, bid_price, ask_price, tx_ref,
                                           failure_operation, failure_kind, failure_message)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    session_id,
                    tick.index,
                    tick.started_at.to_rfc3339(),
                    tick.elapsed.as_millis() as i64,
                    fair,
                    bid,
                    ask,
                    tx_ref,
                    op,
                    kind,
                    message,
                ],
            )?;
        }

        for checkpoint in &session.checkpoints {
            tx.execute(
                r#"
                INSERT INTO balance_checkpoints (session_id, label, taken_at, base, quote, error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    session_id,
                    checkpoint.label.to_string(),
                    checkpoint.taken_at.to_rfc3339(),
                    checkpoint.balances.map(|b| b.base.to_string()),
                    checkpoint.balances.map(|b| b.quote.to_string()),
                    checkpoint.error.as_ref().map(|e| e.to_string()),
                ],
            )?;
        }

        tx.commit()?;

        debug!(
            session_id,
            ticks = session.ticks.len(),
            checkpoints = session.checkpoints.len(),
            "Session recorded"
        );
        Ok(session_id)
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, trader, market, mode, started_at, finished_at, ticks_run, ticks_failed,
                   stopped_early, teardown_clean, realized_pnl
            FROM sessions
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let sessions = stmt
            .query_map([limit as i64], |row| {
                Ok(SessionSummary {
                    id: row.get(0)?,
                    trader: row.get(1)?,
                    market: row.get(2)?,
                    mode: row.get(3)?,
                    started_at: parse_timestamp(&row.get::<_, String>(4)?),
                    finished_at: parse_timestamp(&row.get::<_, String>(5)?),
                    ticks_run: row.get(6)?,
                    ticks_failed: row.get(7)?,
                    stopped_early: row.get::<_, i32>(8)? != 0,
                    teardown_clean: row.get::<_, i32>(9)? != 0,
                    realized_pnl: row
                        .get::<_, Option<String>>(10)?
                        .and_then(|v| Decimal::from_str(&v).ok()),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(sessions)
    }

    /// Failed ticks of one session in tick order.
    pub fn tick_failures(&self, session_id: i64) -> Result<Vec<RecordedTickFailure>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT tick_index, failure_operation, failure_kind, failure_message
            FROM session_ticks
            WHERE session_id = ?1 AND failure_operation IS NOT NULL
            ORDER BY tick_index
            "#,
        )?;

        let failures = stmt
            .query_map([session_id], |row| {
                Ok(RecordedTickFailure {
                    tick_index: row.get(0)?,
                    operation: row.get(1)?,
                    kind: row.get(2)?,
                    message: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(failures)
    }

    /// Number of quoted ticks of one session.
    pub fn quoted_ticks(&self, session_id: i64) -> Result<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM session_ticks WHERE session_id = ?1 AND tx_ref IS NOT NULL",
            [session_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounting::{BalanceCheckpoint, Balances, CheckpointLabel, PnlReport};
    use crate::config::StrategyConfig;
    use crate::exchange::{AccountId, BalanceError, MarketId, TraderId, TxRef, VenueError};
    use crate::oracle::{ComponentPrices, FeedId, FeedPair, OracleError};
    use crate::session::Session;
    use crate::strategy::{
        InitReport, LoopSummary, QuoteParams, StepOutcome, TeardownResult, TickFailure,
        TickOperation, TickRecord,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn tick(index: u32, outcome: TickOutcome) -> TickRecord {
        TickRecord {
            index,
            started_at: Utc::now(),
            offset: Duration::from_secs(index as u64),
            elapsed: Duration::from_millis(120),
            sleep: Duration::from_millis(880),
            outcome,
        }
    }

    fn checkpoint(label: CheckpointLabel, balances: Option<Balances>) -> BalanceCheckpoint {
        BalanceCheckpoint {
            label,
            taken_at: Utc::now(),
            error: balances
                .is_none()
                .then(|| BalanceError::Io("rpc down".into())),
            balances,
        }
    }

    fn sample_result(market: &str) -> SessionResult {
        let start = Balances {
            base: dec!(10),
            quote: dec!(1000),
        };
        let end = Balances {
            base: dec!(8),
            quote: dec!(1200),
        };

        let mut session = Session::new(
            TraderId::new("trader-1"),
            MarketId::new(market),
            StrategyConfig::default(),
            FeedPair {
                base: FeedId::new("SOL/USD"),
                quote: FeedId::new("USDC/USD"),
            },
            AccountId::new("trader-base"),
            AccountId::new("trader-quote"),
        );
        session.ticks = vec![
            tick(
                0,
                TickOutcome::Quoted {
                    fair_price: dec!(20),
                    quotes: QuoteParams {
                        bid_price: dec!(19.991),
                        ask_price: dec!(20.009),
                        bid_size_base: dec!(5.002251),
                        ask_size_base: dec!(4.997751),
                        size_quote: dec!(100),
                    },
                    tx: TxRef::new("tx-0"),
                },
            ),
            tick(
                1,
                TickOutcome::Failed(TickFailure {
                    operation: TickOperation::FairPrice,
                    error: OracleError::UnknownFeed(FeedId::new("SOL/USD")).into(),
                }),
            ),
            tick(
                2,
                TickOutcome::Failed(TickFailure {
                    operation: TickOperation::QuoteSubmit,
                    error: VenueError::Network("reset".into()).into(),
                }),
            ),
        ];
        let final_checkpoint = checkpoint(CheckpointLabel::End, Some(end));
        session.checkpoints = vec![
            checkpoint(CheckpointLabel::Start, Some(start)),
            checkpoint(CheckpointLabel::Tick(1), None),
            final_checkpoint.clone(),
        ];
        session.start_balances = Some(start);
        session.end_balances = Some(end);

        SessionResult {
            session,
            init: InitReport {
                strategy: StepOutcome::Completed(TxRef::new("init")),
                seat_request: StepOutcome::AlreadyDone,
                seat_claim: StepOutcome::AlreadyDone,
            },
            summary: LoopSummary {
                ticks_run: 3,
                ticks_failed: 2,
                stopped_early: false,
            },
            teardown: TeardownResult {
                cancel: StepOutcome::Completed(TxRef::new("cancel")),
                withdraw: StepOutcome::Completed(TxRef::new("withdraw")),
                final_checkpoint,
            },
            pnl: Some(PnlReport::new(
                &start,
                &end,
                ComponentPrices {
                    base_usd: dec!(20),
                    quote_usd: dec!(1),
                },
            )),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_and_list_sessions() {
        let journal = SessionJournal::new(":memory:").unwrap();

        let first = journal.record_session(&sample_result("SOL-USDC")).unwrap();
        let second = journal.record_session(&sample_result("JUP-USDC")).unwrap();
        assert!(second > first);

        let sessions = journal.recent_sessions(10).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].market, "JUP-USDC");
        assert_eq!(sessions[0].mode, "ubermensch");
        assert_eq!(sessions[0].ticks_run, 3);
        assert_eq!(sessions[0].ticks_failed, 2);
        assert!(sessions[0].teardown_clean);
        assert_eq!(sessions[0].realized_pnl, Some(dec!(160)));

        assert_eq!(journal.recent_sessions(1).unwrap().len(), 1);
    }

    #[test]
    fn test_tick_failures_in_order() {
        let journal = SessionJournal::new(":memory:").unwrap();
        let id = journal.record_session(&sample_result("SOL-USDC")).unwrap();

        let failures = journal.tick_failures(id).unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].tick_index, 1);
        assert_eq!(failures[0].operation, "fair_price");
        assert_eq!(failures[0].kind, "unknown_feed");
        assert_eq!(failures[1].operation, "refresh_quotes");
        assert_eq!(failures[1].kind, "transient");

        assert_eq!(journal.quoted_ticks(id).unwrap(), 1);
    }

    #[test]
    fn test_missing_pnl_is_stored_as_null() {
        let journal = SessionJournal::new(":memory:").unwrap();
        let mut result = sample_result("SOL-USDC");
        result.pnl = None;
        result.session.end_balances = None;

        journal.record_session(&result).unwrap();

        let sessions = journal.recent_sessions(5).unwrap();
        assert_eq!(sessions[0].realized_pnl, None);
    }
}
