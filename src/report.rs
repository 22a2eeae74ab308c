use std::env;
use std::fs;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::portfolio::LedgerSnapshot;
use crate::signal::SignalRecord;

const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

/// Writes the ledger snapshot to a JSON file at most once per interval.
/// Enabled by STATUS_FILE; entirely best-effort.
#[derive(Debug)]
pub struct StatusReporter {
    path: PathBuf,
    snapshot_every: Duration,
    last_snapshot: Option<Instant>,
}

impl StatusReporter {
    pub fn from_env() -> Option<Self> {
        let path = env::var("STATUS_FILE")
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        let interval_secs = env::var("STATUS_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_STATUS_INTERVAL_SECS);
        Some(Self::new(PathBuf::from(path), interval_secs))
    }

    pub fn new(path: PathBuf, interval_secs: u64) -> Self {
        Self {
            path,
            snapshot_every: Duration::from_secs(interval_secs),
            last_snapshot: None,
        }
    }

    pub fn write_snapshot_if_due(&mut self, snapshot: &LedgerSnapshot) {
        if let Some(last) = self.last_snapshot {
            if last.elapsed() < self.snapshot_every {
                return;
            }
        }
        match self.write_snapshot(snapshot) {
            Ok(()) => self.last_snapshot = Some(Instant::now()),
            Err(err) => log::warn!("[STATUS] failed to write {}: {}", self.path.display(), err),
        }
    }

    fn write_snapshot(&self, snapshot: &LedgerSnapshot) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(snapshot)?;
        fs::write(&self.path, json)
    }
}

/// Appends one JSON line per processed order. Enabled by TRADE_LOG_FILE.
pub struct TradeLogger {
    writer: BufWriter<File>,
}

impl TradeLogger {
    pub fn from_env() -> Option<Self> {
        let path = env::var("TRADE_LOG_FILE")
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        match Self::open(&path) {
            Ok(logger) => Some(logger),
            Err(err) => {
                log::warn!("[TRADE] cannot open trade log {}: {}", path, err);
                None
            }
        }
    }

    pub fn open(path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn log(&mut self, record: &SignalRecord) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}
