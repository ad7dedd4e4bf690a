//! Append-only CSV storage for matched orders.
//!
//! One file per run, named `<run start %Y%m%d_%H%M>_<label>.csv` and created
//! lazily on the first order so idle runs leave nothing behind. Files start
//! with a UTF-8 byte-order mark so spreadsheet tools pick the right encoding.

use chrono::{DateTime, Local};
use csv::{Writer, WriterBuilder};
use orders_core::{Comment, CoreError, GrammarKind, OrderMatch, OrderRecord, OrderSink, StoreError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct CsvOrderSink {
    dir: PathBuf,
    label: String,
    grammar: GrammarKind,
    run_started: DateTime<Local>,
    path: Option<PathBuf>,
    writer: Option<Writer<File>>,
    records_written: u64,
}

impl CsvOrderSink {
    pub fn new(dir: impl Into<PathBuf>, label: &str, grammar: GrammarKind) -> Self {
        Self::with_run_started(dir, label, grammar, Local::now())
    }

    pub fn with_run_started(
        dir: impl Into<PathBuf>,
        label: &str,
        grammar: GrammarKind,
        run_started: DateTime<Local>,
    ) -> Self {
        Self {
            dir: dir.into(),
            label: sanitize_label(label),
            grammar,
            run_started,
            path: None,
            writer: None,
            records_written: 0,
        }
    }

    /// Path the sink writes to once the first order arrives.
    pub fn target_path(&self) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.csv",
            self.run_started.format("%Y%m%d_%H%M"),
            self.label
        ))
    }

    /// Path of the opened file, `None` until an order was recorded.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    fn open(&mut self) -> Result<&mut Writer<File>, StoreError> {
        if self.writer.is_none() {
            let path = self.target_path();
            let create_failed = |e: std::io::Error| StoreError::CreateFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            };

            std::fs::create_dir_all(&self.dir).map_err(create_failed)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(create_failed)?;

            let preamble = preamble(self.grammar).map_err(create_failed)?;
            if holds_partial_preamble(&file, &path, &preamble).map_err(create_failed)? {
                file.set_len(0).map_err(create_failed)?;
                file.write_all(&preamble)
                    .and_then(|_| file.flush())
                    .map_err(create_failed)?;
            }
            let writer = WriterBuilder::new().has_headers(false).from_writer(file);

            info!("Recording orders to {}", path.display());
            self.path = Some(path);
            self.writer = Some(writer);
        }

        self.writer.as_mut().ok_or_else(|| StoreError::CreateFailed {
            path: self.dir.display().to_string(),
            reason: "writer unavailable".to_string(),
        })
    }
}

impl OrderSink for CsvOrderSink {
    fn record(&mut self, order: &OrderMatch, comment: &Comment) -> Result<OrderRecord, CoreError> {
        let record = OrderRecord::new(order.clone(), comment);
        let row = record.to_row();

        let writer = self.open()?;
        let written = writer
            .write_record(&row)
            .and_then(|_| writer.flush().map_err(csv::Error::from));

        if let Err(e) = written {
            return Err(StoreError::WriteFailed {
                path: self
                    .path
                    .as_ref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default(),
                reason: e.to_string(),
            }
            .into());
        }

        self.records_written += 1;
        debug!("Stored order {} from {}", order, comment.username);
        Ok(record)
    }
}

/// Keeps the label usable as a single file name component.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "orders".to_string()
    } else {
        cleaned
    }
}

/// Byte-order mark followed by the header row.
fn preamble(grammar: GrammarKind) -> std::io::Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_writer(UTF8_BOM.to_vec());
    writer
        .write_record(grammar.columns())
        .map_err(std::io::Error::other)?;
    writer.into_inner().map_err(|e| e.into_error())
}

/// True for an empty file or one cut short while its preamble was written;
/// such a file has no rows yet and gets the preamble written in full.
fn holds_partial_preamble(file: &File, path: &Path, preamble: &[u8]) -> std::io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    if len > preamble.len() as u64 {
        return Ok(false);
    }
    let existing = std::fs::read(path)?;
    Ok(preamble.starts_with(&existing))
}
