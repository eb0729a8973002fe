//! Log file sinks (CSV, JSON)
//!
//! A sink is the owned output of a logged capture session. Both sinks resume
//! an existing file instead of overwriting it, and both leave a syntactically
//! valid file behind once `finalize` has run.

use crate::types::{CaptureError, LogRecord, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub mod csv;
pub mod json;

pub use self::csv::CsvSink;
pub use self::json::JsonSink;

/// Column names shared by the CSV header and the JSON object keys
pub const COLUMNS: [&str; 8] = ["No.", "Time", "Snd/Rc", "Dest", "Src", "Priority", "PGN", "Data"];

/// Common trait for all record sinks
pub trait Sink {
    /// Append one record
    fn append(&mut self, record: &LogRecord) -> Result<()>;

    /// Write any trailer, flush and release the file; later calls are no-ops
    fn finalize(&mut self) -> Result<()>;

    /// Path of the file being written
    fn path(&self) -> &Path;

    /// Records appended through this handle
    fn records_written(&self) -> u64;
}

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Csv,
    Json,
}

impl OutputFormat {
    /// File extension (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(CaptureError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Where and how a logged session persists its records
///
/// The path must be fully resolved by the caller; no working-directory
/// defaults are applied here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Output file path
    pub path: PathBuf,
    /// Output file format
    pub format: OutputFormat,
}

impl SinkConfig {
    /// Create a sink configuration
    pub fn new(path: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Infer the format from the file extension (`.csv` or `.json`)
    pub fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();
        let format = extension.parse()?;
        Ok(Self { path, format })
    }
}

/// Open (or resume) the sink described by `config`
///
/// `signal_columns` names the decoded signal values each record carries, in
/// order; pass an empty slice for raw logs.
pub fn open_sink(config: &SinkConfig, signal_columns: &[String]) -> Result<Box<dyn Sink>> {
    check_signal_columns(signal_columns)?;

    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            log::warn!("Output location {:?} does not exist, creating it", parent);
            fs::create_dir_all(parent).map_err(|e| CaptureError::sink_io(parent, e))?;
        }
    }

    match config.format {
        OutputFormat::Csv => Ok(Box::new(CsvSink::open(&config.path, signal_columns)?)),
        OutputFormat::Json => Ok(Box::new(JsonSink::open(&config.path)?)),
    }
}

/// Signal names become CSV columns and JSON keys next to the fixed columns
fn check_signal_columns(signal_columns: &[String]) -> Result<()> {
    for name in signal_columns {
        let invalid = name.is_empty()
            || COLUMNS.contains(&name.as_str())
            || name.contains([',', '"', '\r', '\n']);
        if invalid {
            return Err(CaptureError::InvalidSignalName(name.clone()));
        }
    }
    Ok(())
}
