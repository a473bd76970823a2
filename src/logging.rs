//! Structured JSON-lines logging.
//!
//! Every record is one JSON object on stdout:
//! `{"ts", "seq", "lvl", "component", "event", "msg", "ticker"?, "player"?, "data"}`.
//! When `LOG_DIR` is set the same lines are appended to `$LOG_DIR/events.jsonl`.
//!
//! Filtering:
//! - `LOG_LEVEL` = trace | debug | info | warn | error (default info)
//! - `LOG_DOMAINS` = comma-separated domain names, or `all` (default)

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Market,    // Price series, simulation output
    Bootstrap, // Registry reconciliation at startup
    Scheduler, // Periodic refresh ticks
    Trade,     // Buy/sell execution
    Ledger,    // Balance credits/debits outside trading
    Provider,  // Historical data fetches, retries
    System,    // Startup, shutdown
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Market => "market",
            Domain::Bootstrap => "bootstrap",
            Domain::Scheduler => "scheduler",
            Domain::Trade => "trade",
            Domain::Ledger => "ledger",
            Domain::Provider => "provider",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Sinks
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static FILE_SINK: OnceLock<Option<Mutex<BufWriter<File>>>> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

fn file_sink() -> Option<&'static Mutex<BufWriter<File>>> {
    FILE_SINK
        .get_or_init(|| {
            let dir = PathBuf::from(std::env::var("LOG_DIR").ok()?);
            if let Err(err) = create_dir_all(&dir) {
                eprintln!("[log] failed to create log dir: {}", err);
                return None;
            }
            match OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("events.jsonl"))
            {
                Ok(file) => Some(Mutex::new(BufWriter::new(file))),
                Err(err) => {
                    eprintln!("[log] failed to open events log: {}", err);
                    None
                }
            }
        })
        .as_ref()
}

/// Pulls well-known correlation keys out of `data` onto the top level.
fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["ticker", "player", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    let line = render(level, domain, event, fields);
    if let Some(sink) = file_sink() {
        if let Ok(mut w) = sink.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
    println!("{}", line);
}

fn render(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) -> String {
    let (mut top, data) = split_fields(fields);
    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));

    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));
    Value::Object(entry).to_string()
}

pub fn info(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Info, domain, event, fields);
}

pub fn warn(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Warn, domain, event, fields);
}

pub fn error(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Error, domain, event, fields);
}

pub fn debug(domain: Domain, event: &str, fields: Map<String, Value>) {
    log(Level::Debug, domain, event, fields);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

pub fn log_retry(operation: &str, attempt: u32, max_attempts: u32, err: &str, delay: Duration) {
    warn(
        Domain::Provider,
        "retry",
        obj(&[
            ("operation", v_str(operation)),
            ("attempt", json!(attempt)),
            ("max_attempts", json!(max_attempts)),
            ("error", v_str(err)),
            ("delay_ms", json!(delay.as_millis() as u64)),
        ]),
    );
}

pub fn log_series_extended(ticker: &str, appended: usize, last_price: Option<f64>) {
    debug(
        Domain::Market,
        "series_extended",
        obj(&[
            ("ticker", v_str(ticker)),
            ("appended", json!(appended)),
            ("last_price", last_price.map(v_num).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_trade(
    player: u64,
    ticker: &str,
    side: &str,
    quantity: i64,
    price: f64,
    balance_after: f64,
) {
    info(
        Domain::Trade,
        "filled",
        obj(&[
            ("player", json!(player)),
            ("ticker", v_str(ticker)),
            ("side", v_str(side)),
            ("quantity", json!(quantity)),
            ("price", v_num(price)),
            ("total", v_num(price * quantity as f64)),
            ("balance_after", v_num(balance_after)),
        ]),
    );
}

pub fn log_trade_rejected(player: u64, ticker: &str, side: &str, quantity: i64, reason: &str) {
    info(
        Domain::Trade,
        "rejected",
        obj(&[
            ("player", json!(player)),
            ("ticker", v_str(ticker)),
            ("side", v_str(side)),
            ("quantity", json!(quantity)),
            ("reason", v_str(reason)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
