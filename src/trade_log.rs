//! Append-only trade audit log
//!
//! Rows are `timestamp,symbol,contract,action,status` with a local
//! `%Y-%m-%d %H:%M:%S` timestamp and no header, so the file can be tailed or
//! concatenated across restarts.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use crate::types::TradeLogEntry;

pub trait TradeLog: Send + Sync {
    fn append(&self, entry: &TradeLogEntry) -> Result<()>;
}

pub struct CsvTradeLog {
    path: PathBuf,
}

impl CsvTradeLog {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log dir: {}", parent.display()))?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TradeLog for CsvTradeLog {
    fn append(&self, entry: &TradeLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open trade log: {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let timestamp = entry
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        writer.write_record([
            timestamp.as_str(),
            entry.underlying.as_str(),
            entry.contract_symbol.as_str(),
            entry.action.as_str(),
            entry.status.as_str(),
        ])?;
        writer.flush()?;

        info!(
            "Trade logged: {} {} {} [{}]",
            entry.underlying,
            entry.contract_symbol,
            entry.action,
            entry.status.as_str()
        );
        Ok(())
    }
}

/// Collects entries in memory
#[derive(Default)]
pub struct MemoryTradeLog {
    entries: Mutex<Vec<TradeLogEntry>>,
}

impl MemoryTradeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<TradeLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl TradeLog for MemoryTradeLog {
    fn append(&self, entry: &TradeLogEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("trade log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }
}

impl<T: TradeLog + ?Sized> TradeLog for std::sync::Arc<T> {
    fn append(&self, entry: &TradeLogEntry) -> Result<()> {
        (**self).append(entry)
    }
}
