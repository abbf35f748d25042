//! Relational run store (SQLite): backtest runs, their signals and the
//! prepared price series a run was driven with.
//!
//! Tables:
//! - `backtest_run`: one row per run; `status` moves `running → completed`
//!   or `running → failed` exactly once
//! - `signal`: append-only, `run_id` is a required foreign key
//! - `price_bar`: the first DataGroup's bars plus factor fields, per run
//!
//! All methods are synchronous. The connection sits behind a `Mutex` so the
//! store can be shared through an `Arc` between the async orchestrator and the
//! blocking engine worker.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveDateTime, Utc};
use factorlab_core::domain::{Signal, SignalAction, SignalDraft, TIME_FORMAT};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::normalizer::PerformanceReport;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Fewest and most runs a comparison accepts.
pub const COMPARE_MIN: usize = 2;
pub const COMPARE_MAX: usize = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("run not found: {0}")]
    NotFound(String),

    #[error("run {id} is {status}, expected running")]
    InvalidTransition { id: String, status: RunStatus },

    #[error("run {0} is not running; signals are only accepted during an active run")]
    RunNotActive(String),

    #[error("invalid comparison: {0}")]
    InvalidComparison(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    Poisoned,
}

// ─── Rows ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Parameters of a run about to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub strategy_name: String,
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: String,
    pub strategy_name: String,
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub initial_capital: f64,
    pub status: RunStatus,
    pub performance: Option<PerformanceReport>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
}

/// One row of a run's price series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub time: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Dynamic fields (base extras and factor outputs); `None` during warm-up
    /// or where a value is not finite.
    pub fields: BTreeMap<String, Option<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub strategy: Option<String>,
    pub symbol: Option<String>,
    pub status: Option<RunStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub best: f64,
    pub worst: f64,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunComparison {
    pub runs: Vec<BacktestRun>,
    pub metrics: BTreeMap<String, MetricSummary>,
    pub best_run: Option<String>,
    pub worst_run: Option<String>,
}

// ─── Schema ──────────────────────────────────────────────────────────

pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS backtest_run (
            id TEXT PRIMARY KEY,
            strategy_name TEXT NOT NULL,
            symbol TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            initial_capital REAL NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('running', 'completed', 'failed')),
            performance_json TEXT,
            error TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_run_strategy ON backtest_run(strategy_name, symbol)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS signal (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES backtest_run(id),
            symbol TEXT NOT NULL,
            action TEXT NOT NULL CHECK (action IN ('buy', 'sell')),
            price REAL NOT NULL,
            strength REAL NOT NULL,
            message TEXT NOT NULL,
            time TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_signal_run ON signal(run_id)", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS price_bar (
            run_id TEXT NOT NULL REFERENCES backtest_run(id),
            seq INTEGER NOT NULL,
            time TEXT NOT NULL,
            open REAL,
            high REAL,
            low REAL,
            close REAL,
            volume REAL,
            fields_json TEXT NOT NULL,
            PRIMARY KEY (run_id, seq)
        )",
        [],
    )?;

    Ok(())
}

// ─── Store ───────────────────────────────────────────────────────────

pub struct RunStore {
    conn: Mutex<Connection>,
}

impl fmt::Debug for RunStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStore").finish_non_exhaustive()
    }
}

/// Raw `backtest_run` columns before parsing.
struct RunRow {
    id: String,
    strategy_name: String,
    symbol: String,
    start: String,
    end: String,
    initial_capital: f64,
    status: String,
    performance_json: Option<String>,
    error: Option<String>,
    created_at: String,
}

const RUN_COLUMNS: &str = "id, strategy_name, symbol, start_date, end_date, initial_capital, \
                           status, performance_json, error, created_at";

impl RunRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            strategy_name: row.get(1)?,
            symbol: row.get(2)?,
            start: row.get(3)?,
            end: row.get(4)?,
            initial_capital: row.get(5)?,
            status: row.get(6)?,
            performance_json: row.get(7)?,
            error: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn parse(self) -> Result<BacktestRun, StoreError> {
        let performance = self
            .performance_json
            .as_deref()
            .map(serde_json::from_str::<PerformanceReport>)
            .transpose()?;
        Ok(BacktestRun {
            start: parse_date(&self.start)?,
            end: parse_date(&self.end)?,
            status: self.status.parse().map_err(StoreError::Corrupt)?,
            created_at: parse_time(&self.created_at)?,
            id: self.id,
            strategy_name: self.strategy_name,
            symbol: self.symbol,
            initial_capital: self.initial_capital,
            performance,
            error: self.error,
        })
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| StoreError::Corrupt(format!("date '{s}': {e}")))
}

fn parse_time(s: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(s, TIME_FORMAT).map_err(|e| StoreError::Corrupt(format!("time '{s}': {e}")))
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

impl RunStore {
    /// Open (or create) a database file; `":memory:"` opens an in-memory one.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ── Lifecycle ──

    /// Insert a run in `running` state and return it.
    pub fn create_run(&self, new: &NewRun) -> Result<BacktestRun, StoreError> {
        let run = BacktestRun {
            id: Uuid::new_v4().to_string(),
            strategy_name: new.strategy_name.clone(),
            symbol: new.symbol.clone(),
            start: new.start,
            end: new.end,
            initial_capital: new.initial_capital,
            status: RunStatus::Running,
            performance: None,
            error: None,
            created_at: now(),
        };
        self.conn()?.execute(
            "INSERT INTO backtest_run (id, strategy_name, symbol, start_date, end_date,
                initial_capital, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id,
                run.strategy_name,
                run.symbol,
                run.start.format(DATE_FORMAT).to_string(),
                run.end.format(DATE_FORMAT).to_string(),
                run.initial_capital,
                run.status.as_str(),
                run.created_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        debug!(run_id = %run.id, strategy = %run.strategy_name, symbol = %run.symbol, "run created");
        Ok(run)
    }

    pub fn mark_completed(&self, id: &str, report: &PerformanceReport) -> Result<(), StoreError> {
        let json = serde_json::to_string(report)?;
        self.transition(id, RunStatus::Completed, Some(json), None)
    }

    pub fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        self.transition(id, RunStatus::Failed, None, Some(reason))
    }

    fn transition(
        &self,
        id: &str,
        to: RunStatus,
        performance_json: Option<String>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE backtest_run SET status = ?2, performance_json = ?3, error = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id, to.as_str(), performance_json, error],
        )?;
        if changed == 1 {
            debug!(run_id = id, status = %to, "run transitioned");
            return Ok(());
        }
        let current: Option<String> = conn
            .query_row("SELECT status FROM backtest_run WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        match current {
            None => Err(StoreError::NotFound(id.to_string())),
            Some(s) => Err(StoreError::InvalidTransition {
                id: id.to_string(),
                status: s.parse().map_err(StoreError::Corrupt)?,
            }),
        }
    }

    // ── Signals ──

    /// Persist one signal; only accepted while its run is `running`.
    pub fn insert_signal(&self, run_id: &str, draft: &SignalDraft) -> Result<Signal, StoreError> {
        let signal = Signal {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            symbol: draft.symbol.clone(),
            action: draft.action,
            price: draft.price,
            strength: draft.strength,
            message: draft.message.clone(),
            time: draft.time,
            created_at: now(),
        };
        let changed = self.conn()?.execute(
            "INSERT INTO signal (id, run_id, symbol, action, price, strength, message, time, created_at)
             SELECT ?1, id, ?3, ?4, ?5, ?6, ?7, ?8, ?9
             FROM backtest_run WHERE id = ?2 AND status = 'running'",
            params![
                signal.id,
                signal.run_id,
                signal.symbol,
                signal.action.as_str(),
                signal.price,
                signal.strength,
                signal.message,
                signal.time.format(TIME_FORMAT).to_string(),
                signal.created_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::RunNotActive(run_id.to_string()));
        }
        Ok(signal)
    }

    pub fn list_signals(&self, run_id: &str) -> Result<Vec<Signal>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, symbol, action, price, strength, message, time, created_at
             FROM signal WHERE run_id = ?1 ORDER BY time, rowid",
        )?;
        let rows = stmt.query_map([run_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, f64>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, String>(7)?,
                r.get::<_, String>(8)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, run_id, symbol, action, price, strength, message, time, created_at) = row?;
            out.push(Signal {
                id,
                run_id,
                symbol,
                action: action.parse::<SignalAction>().map_err(StoreError::Corrupt)?,
                price,
                strength,
                message,
                time: parse_time(&time)?,
                created_at: parse_time(&created_at)?,
            });
        }
        Ok(out)
    }

    pub fn signal_count(&self, run_id: &str) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM signal WHERE run_id = ?1", [run_id], |r| r.get(0))?;
        Ok(n as usize)
    }

    // ── Price series ──

    /// Replace the stored price series of a run.
    pub fn record_price_series(&self, run_id: &str, points: &[PricePoint]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM price_bar WHERE run_id = ?1", [run_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO price_bar (run_id, seq, time, open, high, low, close, volume, fields_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for (seq, p) in points.iter().enumerate() {
                stmt.execute(params![
                    run_id,
                    seq as i64,
                    p.time.format(TIME_FORMAT).to_string(),
                    finite(p.open),
                    finite(p.high),
                    finite(p.low),
                    finite(p.close),
                    finite(p.volume),
                    serde_json::to_string(&p.fields)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(run_id, rows = points.len(), "price series recorded");
        Ok(())
    }

    pub fn price_series(&self, run_id: &str) -> Result<Vec<PricePoint>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT time, open, high, low, close, volume, fields_json
             FROM price_bar WHERE run_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map([run_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, Option<f64>>(1)?,
                r.get::<_, Option<f64>>(2)?,
                r.get::<_, Option<f64>>(3)?,
                r.get::<_, Option<f64>>(4)?,
                r.get::<_, Option<f64>>(5)?,
                r.get::<_, String>(6)?,
            ))
        })?;

        let nan = |v: Option<f64>| v.unwrap_or(f64::NAN);
        let mut out = Vec::new();
        for row in rows {
            let (time, open, high, low, close, volume, fields) = row?;
            out.push(PricePoint {
                time: parse_time(&time)?,
                open: nan(open),
                high: nan(high),
                low: nan(low),
                close: nan(close),
                volume: nan(volume),
                fields: serde_json::from_str(&fields)?,
            });
        }
        Ok(out)
    }

    // ── Queries ──

    pub fn get_run(&self, id: &str) -> Result<Option<BacktestRun>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {RUN_COLUMNS} FROM backtest_run WHERE id = ?1"),
                [id],
                RunRow::read,
            )
            .optional()?;
        row.map(RunRow::parse).transpose()
    }

    /// Runs matching `filter`, newest first.
    pub fn list_runs(&self, filter: &RunFilter, limit: usize, offset: usize) -> Result<Vec<BacktestRun>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RUN_COLUMNS} FROM backtest_run
             WHERE (?1 IS NULL OR strategy_name = ?1)
               AND (?2 IS NULL OR symbol = ?2)
               AND (?3 IS NULL OR status = ?3)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?4 OFFSET ?5"
        ))?;
        let rows = stmt.query_map(
            params![
                filter.strategy,
                filter.symbol,
                filter.status.map(|s| s.as_str()),
                limit as i64,
                offset as i64,
            ],
            RunRow::read,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?.parse()?);
        }
        Ok(out)
    }

    /// Side-by-side summary of 2 to 10 runs.
    pub fn compare_runs(&self, ids: &[String]) -> Result<RunComparison, StoreError> {
        if ids.len() < COMPARE_MIN || ids.len() > COMPARE_MAX {
            return Err(StoreError::InvalidComparison(format!(
                "expected {COMPARE_MIN} to {COMPARE_MAX} run ids, got {}",
                ids.len()
            )));
        }
        let mut runs = Vec::with_capacity(ids.len());
        for id in ids {
            let run = self.get_run(id)?.ok_or_else(|| StoreError::NotFound(id.clone()))?;
            runs.push(run);
        }
        Ok(compare(runs))
    }
}

fn metric_of(run: &BacktestRun, name: &str) -> Option<f64> {
    run.performance.as_ref().and_then(|p| p.metric(name))
}

fn compare(runs: Vec<BacktestRun>) -> RunComparison {
    let mut metrics = BTreeMap::new();
    // (name, higher is better)
    for (name, higher) in [("total_return", true), ("sharpe_ratio", true), ("max_drawdown", false)] {
        let values: Vec<f64> = runs.iter().filter_map(|r| metric_of(r, name)).collect();
        if values.is_empty() {
            continue;
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let (best, worst) = if higher { (max, min) } else { (min, max) };
        metrics.insert(
            name.to_string(),
            MetricSummary {
                best,
                worst,
                average: values.iter().sum::<f64>() / values.len() as f64,
            },
        );
    }

    let ranked: Vec<(&BacktestRun, f64)> = runs
        .iter()
        .filter_map(|r| metric_of(r, "total_return").map(|v| (r, v)))
        .collect();
    let best_run = ranked
        .iter()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(r, _)| r.id.clone());
    let worst_run = ranked
        .iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(r, _)| r.id.clone());

    RunComparison {
        runs,
        metrics,
        best_run,
        worst_run,
    }
}
