//! CSV log sink
//!
//! One header row, then one self-delimiting row per record. Because rows need
//! no trailer, a file is valid CSV after every flushed row; `finalize` only
//! flushes and releases the handle.
//!
//! Sessions that decode signals add one column per signal after `Data`. A
//! resumed file must carry the same header, so every row has the same shape.

use super::{Sink, COLUMNS};
use crate::types::{CaptureError, DecodedIdentifier, Direction, LogRecord, Result, SignalReading};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Append-aware CSV writer
pub struct CsvSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records_written: u64,
}

impl CsvSink {
    /// Open a CSV log for appending
    ///
    /// Writes the header row when the file is empty. A non-empty file is
    /// resumed as-is; if its last row was cut short by an unclean shutdown,
    /// a line break is inserted so new rows start on their own line. Resuming
    /// a file whose header differs (other signal columns) is refused.
    pub fn open(path: &Path, signal_columns: &[String]) -> Result<Self> {
        let io_err = |e: std::io::Error| CaptureError::sink_io(path, e);

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();

        let expected = header(signal_columns);
        let mut writer = BufWriter::new(file.try_clone().map_err(io_err)?);
        if len == 0 {
            log::info!("Creating CSV log: {:?}", path);
            writeln!(writer, "{}", expected).map_err(io_err)?;
        } else {
            log::info!("Resuming CSV log: {:?} ({} bytes)", path, len);
            let found = first_line(&mut file).map_err(io_err)?;
            if found != expected {
                return Err(CaptureError::CorruptLog {
                    path: path.to_path_buf(),
                    reason: format!("header '{}' does not match '{}'", found, expected),
                });
            }
            file.seek(SeekFrom::End(-1)).map_err(io_err)?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).map_err(io_err)?;
            if last[0] != b'\n' {
                log::warn!("CSV log {:?} ends mid-row, starting a new line", path);
                writeln!(writer).map_err(io_err)?;
            }
        }
        writer.flush().map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            records_written: 0,
        })
    }
}

impl Sink for CsvSink {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(CaptureError::SessionClosed)?;
        writeln!(writer, "{}", format_row(record))
            .map_err(|e| CaptureError::sink_io(&self.path, e))?;
        self.records_written += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .flush()
                .and_then(|_| writer.get_ref().sync_all())
                .map_err(|e| CaptureError::sink_io(&self.path, e))?;
            log::info!(
                "Closed CSV log: {:?} ({} records appended)",
                self.path,
                self.records_written
            );
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl Drop for CsvSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::error!("Failed to finalize CSV log {:?}: {}", self.path, e);
        }
    }
}

/// First line of the file, without its terminator
fn first_line(file: &mut File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut line = String::new();
    BufReader::new(Read::take(&*file, 64 * 1024)).read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Header row for a log with the given signal columns (without line terminator)
pub fn header(signal_columns: &[String]) -> String {
    COLUMNS
        .iter()
        .copied()
        .chain(signal_columns.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

/// Signal column names of a header row, or `None` if it is not a log header
pub fn signal_columns(header: &str) -> Option<Vec<String>> {
    let fields: Vec<&str> = header.trim_end_matches(['\r', '\n']).split(',').collect();
    if fields.len() < COLUMNS.len() || fields[..COLUMNS.len()] != COLUMNS {
        return None;
    }
    Some(fields[COLUMNS.len()..].iter().map(|s| s.to_string()).collect())
}

/// Render a record as a CSV row (without line terminator)
pub fn format_row(record: &LogRecord) -> String {
    let id = &record.identifier;
    let mut row = format!(
        "{},{},{},{},{},{},{},{}",
        record.sequence,
        record.time_field(),
        record.direction,
        optional(id.destination),
        optional(id.source),
        optional(id.priority),
        optional(id.pgn),
        record.data_hex
    );
    for reading in &record.signals {
        row.push(',');
        row.push_str(&optional(reading.value));
    }
    row
}

/// Parse a data row written by [`CsvSink`] without signal columns
///
/// Returns `None` for the header row or malformed input. The relative time is
/// recovered at the millisecond precision it was written with.
pub fn parse_row(line: &str) -> Option<LogRecord> {
    parse_row_with_signals(line, &[])
}

/// Parse a data row whose trailing cells hold the given signal columns
pub fn parse_row_with_signals(line: &str, signal_columns: &[String]) -> Option<LogRecord> {
    let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(',').collect();
    if fields.len() != COLUMNS.len() + signal_columns.len() {
        return None;
    }

    fn field<T: std::str::FromStr>(text: &str) -> Option<Option<T>> {
        if text.is_empty() {
            Some(None)
        } else {
            text.parse().ok().map(Some)
        }
    }

    let direction = match fields[2] {
        "Receive" => Direction::Receive,
        _ => return None,
    };
    let data_hex = fields[7].to_string();
    crate::types::parse_hex(&data_hex)?;

    let signals = signal_columns
        .iter()
        .zip(&fields[COLUMNS.len()..])
        .map(|(name, text)| {
            Some(SignalReading {
                name: name.clone(),
                value: field(text)?,
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(LogRecord {
        sequence: fields[0].parse().ok()?,
        relative_time: fields[1].parse().ok()?,
        direction,
        identifier: DecodedIdentifier {
            destination: field(fields[3])?,
            source: field(fields[4])?,
            priority: field(fields[5])?,
            pgn: field(fields[6])?,
        },
        data_hex,
        signals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::j1939;
    use std::fs;

    fn record(sequence: u64, id: u32, extended: bool, data: &[u8]) -> LogRecord {
        LogRecord {
            sequence,
            relative_time: sequence as f64 * 0.25,
            direction: Direction::Receive,
            identifier: j1939::decode(id, extended),
            data_hex: crate::types::format_hex(data),
            signals: Vec::new(),
        }
    }

    #[test]
    fn test_empty_log_is_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");

        let mut sink = CsvSink::open(&path, &[]).unwrap();
        sink.finalize().unwrap();
        sink.finalize().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "No.,Time,Snd/Rc,Dest,Src,Priority,PGN,Data\n"
        );
    }

    #[test]
    fn test_row_round_trip() {
        let extended = record(7, 0x0CEF1122, true, &[0x0A, 0x1F, 0xFF]);
        let row = format_row(&extended);
        assert_eq!(row, "7,1.750,Receive,17,34,3,61201,0A 1F FF");
        assert_eq!(parse_row(&row), Some(extended));

        let standard = record(8, 0x123, false, &[]);
        let row = format_row(&standard);
        assert_eq!(row, "8,2.000,Receive,,,,,");
        assert_eq!(parse_row(&row), Some(standard));
    }

    #[test]
    fn test_parse_row_rejects_header_and_garbage() {
        assert!(parse_row(&COLUMNS.join(",")).is_none());
        assert!(parse_row("1,0.000,Send,,,,,").is_none());
        assert!(parse_row("1,0.000,Receive").is_none());
    }

    #[test]
    fn test_resume_does_not_duplicate_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.csv");

        let mut sink = CsvSink::open(&path, &[]).unwrap();
        sink.append(&record(1, 0x18FECA00, true, &[1])).unwrap();
        sink.finalize().unwrap();

        let mut sink = CsvSink::open(&path, &[]).unwrap();
        sink.append(&record(2, 0x18FECA00, true, &[2])).unwrap();
        assert_eq!(sink.records_written(), 1);
        sink.finalize().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(content.matches("No.,").count(), 1);
        assert_eq!(parse_row(lines[2]).unwrap().sequence, 2);
    }

    #[test]
    fn test_resume_after_truncated_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.csv");
        fs::write(&path, "No.,Time,Snd/Rc,Dest,Src,Priority,PGN,Data\n1,0.000,Rec").unwrap();

        let mut sink = CsvSink::open(&path, &[]).unwrap();
        sink.append(&record(2, 0x18FECA00, true, &[2])).unwrap();
        sink.finalize().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let last = content.lines().last().unwrap();
        assert_eq!(parse_row(last).unwrap().sequence, 2);
    }

    #[test]
    fn test_header_has_no_spaces_after_commas() {
        // Columns are "No., Time, Snd/Rc, ..." in prose; the file carries them
        // comma-separated without padding, like any CSV writer.
        assert_eq!(
            header(&[]).as_bytes(),
            b"No.,Time,Snd/Rc,Dest,Src,Priority,PGN,Data"
        );
        assert!(!header(&[]).contains(", "));
        assert_eq!(
            header(&["nox".to_string(), "o2".to_string()]),
            "No.,Time,Snd/Rc,Dest,Src,Priority,PGN,Data,nox,o2"
        );
    }

    #[test]
    fn test_signal_columns_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decoded.csv");
        let columns = vec!["nox".to_string(), "o2".to_string()];

        let mut decoded = record(1, 0x18F00E3D, true, &[0x20]);
        decoded.signals = vec![
            SignalReading { name: "nox".to_string(), value: Some(-198.4) },
            SignalReading { name: "o2".to_string(), value: None },
        ];
        let mut sink = CsvSink::open(&path, &columns).unwrap();
        sink.append(&decoded).unwrap();
        sink.finalize().unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        let names = signal_columns(lines.next().unwrap()).unwrap();
        assert_eq!(names, columns);

        let row = lines.next().unwrap();
        assert!(row.ends_with(",20,-198.4,"), "{row}");
        assert_eq!(parse_row_with_signals(row, &names), Some(decoded));
        assert!(parse_row(row).is_none());
    }

    #[test]
    fn test_resume_with_other_signal_columns_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.csv");
        CsvSink::open(&path, &[]).unwrap().finalize().unwrap();

        let result = CsvSink::open(&path, &["nox".to_string()]);
        assert!(matches!(result, Err(CaptureError::CorruptLog { .. })));
        assert!(CsvSink::open(&path, &[]).is_ok());
    }

    #[test]
    fn test_signal_columns_rejects_foreign_header() {
        assert_eq!(signal_columns("No.,Time,Snd/Rc,Dest,Src,Priority,PGN,Data"), Some(vec![]));
        assert_eq!(signal_columns("a,b,c"), None);
        assert_eq!(signal_columns("1,0.000,Receive,,,,,"), None);
    }

    #[test]
    fn test_append_after_finalize_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvSink::open(&dir.path().join("closed.csv"), &[]).unwrap();
        sink.finalize().unwrap();
        assert!(sink.append(&record(1, 0, false, &[])).is_err());
    }
}
