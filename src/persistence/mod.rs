//! CSV trade journal
//!
//! Append-only audit trail of placed orders and observed closures.
//! Nothing is read back from it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::types::Direction;

const MISSING: &str = "N/A";

/// One journal row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub timestamp_utc: String,
    pub strategy: String,
    pub symbol: String,
    pub direction: String,
    pub entry_price: String,
    pub size_usdt: String,
    pub pnl_usdt: String,
    /// OPEN, WIN or LOSS
    pub result: String,
    pub exit_price: String,
    /// TAKE_PROFIT, STOP_LOSS, DYNAMIC_TP or N/A while open
    pub close_reason: String,
}

fn fmt_opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", decimals, v),
        _ => MISSING.to_string(),
    }
}

impl JournalRecord {
    /// Row for a freshly placed order
    pub fn opened(
        at: DateTime<Utc>,
        strategy: &str,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        size_usdt: f64,
    ) -> Self {
        Self {
            timestamp_utc: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            strategy: strategy.to_string(),
            symbol: symbol.to_string(),
            direction: direction.to_string(),
            entry_price: fmt_opt(Some(entry_price), 8),
            size_usdt: fmt_opt(Some(size_usdt), 2),
            pnl_usdt: MISSING.to_string(),
            result: "OPEN".to_string(),
            exit_price: MISSING.to_string(),
            close_reason: MISSING.to_string(),
        }
    }

    /// Row for an observed closure; WIN when `pnl` is positive
    #[allow(clippy::too_many_arguments)]
    pub fn closed(
        at: DateTime<Utc>,
        strategy: &str,
        symbol: &str,
        direction: Direction,
        entry_price: f64,
        size_usdt: f64,
        pnl: Option<f64>,
        exit_price: Option<f64>,
        close_reason: &str,
    ) -> Self {
        let result = match pnl {
            Some(p) if p > 0.0 => "WIN",
            _ => "LOSS",
        };
        Self {
            timestamp_utc: at.format("%Y-%m-%d %H:%M:%S").to_string(),
            strategy: strategy.to_string(),
            symbol: symbol.to_string(),
            direction: direction.to_string(),
            entry_price: fmt_opt(Some(entry_price), 8),
            size_usdt: fmt_opt(Some(size_usdt), 2),
            pnl_usdt: fmt_opt(pnl, 4),
            result: result.to_string(),
            exit_price: fmt_opt(exit_price, 8),
            close_reason: close_reason.to_string(),
        }
    }
}

pub struct TradeJournal {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl TradeJournal {
    /// Open (or create) the journal; the header is written only to an empty file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create journal directory {}", dir.display()))?;
        }

        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open trade journal")?;

        let writer = WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file);

        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: &JournalRecord) -> Result<()> {
        self.writer
            .serialize(record)
            .context("Failed to write journal record")?;
        self.writer.flush().context("Failed to flush trade journal")?;
        Ok(())
    }

    /// Append a row; failures are logged and swallowed
    pub fn record(&mut self, record: &JournalRecord) {
        match self.append(record) {
            Ok(()) => tracing::debug!(
                symbol = %record.symbol,
                result = %record.result,
                "Journal: row appended"
            ),
            Err(e) => tracing::warn!(
                symbol = %record.symbol,
                path = %self.path.display(),
                error = %e,
                "Journal: write failed"
            ),
        }
    }
}
