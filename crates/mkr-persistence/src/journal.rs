//! JSON Lines fill journal.
//!
//! One JSON object per line, files opened in append mode and rotated by UTC
//! date. A torn write only damages its own line.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use mkr_core::{InstrumentId, OrderSide, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PersistenceResult;

/// Journal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    /// Output directory. Default: "data/fills".
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Records buffered before a flush. Default: 1 (write-through).
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_dir() -> PathBuf {
    PathBuf::from("data/fills")
}

fn default_buffer_size() -> usize {
    1
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// One inferred fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRecord {
    pub timestamp_ms: i64,
    pub agent: String,
    pub instrument: InstrumentId,
    pub side: OrderSide,
    pub price: Price,
    pub size: Size,
    /// Realized on this fill; zero for buys.
    pub realized_pnl: Decimal,
}

impl FillRecord {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }
}

struct OpenFile {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Buffered daily-rotating writer of [`FillRecord`]s.
pub struct FillJournal {
    dir: PathBuf,
    buffer: Vec<FillRecord>,
    buffer_size: usize,
    current: Option<OpenFile>,
}

impl FillJournal {
    /// Create the output directory if needed.
    pub fn open(config: &JournalConfig) -> PersistenceResult<Self> {
        std::fs::create_dir_all(&config.dir)?;
        let buffer_size = config.buffer_size.max(1);

        Ok(Self {
            dir: config.dir.clone(),
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            current: None,
        })
    }

    pub fn record(&mut self, record: FillRecord) -> PersistenceResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Path of the journal file for `date` (`YYYY-MM-DD`).
    pub fn path_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("fills_{date}.jsonl"))
    }

    fn close_file(mut file: OpenFile) {
        if let Err(e) = file.writer.flush() {
            warn!(?e, "Failed to flush fill journal on close");
        }
        info!(
            date = %file.date,
            records = file.records_written,
            "Closed fill journal"
        );
    }

    fn close_current(&mut self) {
        if let Some(file) = self.current.take() {
            Self::close_file(file);
        }
    }

    /// Open file for `date`, rotating away from any other day.
    fn writer_for(&mut self, date: &str) -> PersistenceResult<&mut OpenFile> {
        let file = match self.current.take() {
            Some(file) if file.date == date => file,
            previous => {
                if let Some(previous) = previous {
                    Self::close_file(previous);
                }
                let path = self.path_for(date);
                info!(path = %path.display(), "Opening fill journal (append mode)");
                let handle = OpenOptions::new().create(true).append(true).open(&path)?;
                OpenFile {
                    writer: BufWriter::new(handle),
                    date: date.to_string(),
                    records_written: 0,
                }
            }
        };
        Ok(self.current.insert(file))
    }

    /// Write buffered records to today's file.
    pub fn flush(&mut self) -> PersistenceResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let records = std::mem::take(&mut self.buffer);
        let file = self.writer_for(&today)?;

        for record in &records {
            let line = serde_json::to_string(record)?;
            writeln!(file.writer, "{line}")?;
        }
        file.writer.flush()?;
        file.records_written += records.len();

        debug!(date = %today, records = records.len(), "Flushed fills");
        Ok(())
    }

    pub fn close(&mut self) -> PersistenceResult<()> {
        self.flush()?;
        self.close_current();
        Ok(())
    }
}

impl Drop for FillJournal {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(?e, "Failed to flush fill journal on drop");
        }
        self.close_current();
    }
}
