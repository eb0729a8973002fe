//! JSON log sink
//!
//! The log is a single top-level array. Between operations the file holds an
//! array whose closing bracket is still missing; `finalize` is the only point
//! where it becomes complete JSON. A process killed between appends leaves the
//! bracket (or, at worst, a trailing comma) missing, and the next `open`
//! repairs that tail before appending.
//!
//! Resuming never re-serializes the existing content: the tail is scanned
//! backwards, the closing bracket is cut off with `File::set_len`, and new
//! objects are written after a separating comma.

use super::Sink;
use crate::types::{CaptureError, LogRecord, RecordRow, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Bytes read per step while scanning for the array tail
const SCAN_CHUNK: u64 = 4096;

/// Append-aware JSON array writer
pub struct JsonSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    needs_separator: bool,
    records_written: u64,
}

impl JsonSink {
    /// Open a JSON log for appending
    ///
    /// An empty file gets the opening `[`. A non-empty file must start with
    /// `[`; its closing `]` and any dangling comma are stripped so appended
    /// objects extend the existing array.
    pub fn open(path: &Path) -> Result<Self> {
        let io_err = |e: io::Error| CaptureError::sink_io(path, e);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(io_err)?;
        let len = file.metadata().map_err(io_err)?.len();

        let needs_separator = match first_significant_byte(&mut file, len).map_err(io_err)? {
            None => {
                log::info!("Creating JSON log: {:?}", path);
                file.set_len(0).map_err(io_err)?;
                file.seek(SeekFrom::Start(0)).map_err(io_err)?;
                file.write_all(b"[").map_err(io_err)?;
                false
            }
            Some(b'[') => {
                log::info!("Resuming JSON log: {:?} ({} bytes)", path, len);
                reopen_array(&mut file, path, len)?
            }
            Some(other) => {
                return Err(CaptureError::CorruptLog {
                    path: path.to_path_buf(),
                    reason: format!("expected a JSON array, found '{}'", other as char),
                });
            }
        };
        file.flush().map_err(io_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            needs_separator,
            records_written: 0,
        })
    }
}

/// Strip the array tail and position the cursor for appending
///
/// Returns true when the array already holds at least one element.
fn reopen_array(file: &mut File, path: &Path, len: u64) -> Result<bool> {
    let io_err = |e: io::Error| CaptureError::sink_io(path, e);
    let corrupt = |reason: &str| CaptureError::CorruptLog {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut end = len;
    let mut tail = last_significant_byte(file, end)
        .map_err(io_err)?
        .ok_or_else(|| corrupt("file is empty"))?;

    if tail.1 == b']' {
        end = tail.0;
        tail = last_significant_byte(file, end)
            .map_err(io_err)?
            .ok_or_else(|| corrupt("unbalanced closing bracket"))?;
    } else {
        log::warn!(
            "JSON log {:?} has no closing bracket, assuming an interrupted session",
            path
        );
    }

    if tail.1 == b',' {
        log::warn!("JSON log {:?} ends with a dangling comma, removing it", path);
        end = tail.0;
        tail = last_significant_byte(file, end)
            .map_err(io_err)?
            .ok_or_else(|| corrupt("dangling comma without elements"))?;
    }

    let has_elements = match tail.1 {
        b'[' => false,
        b'}' => true,
        _ => return Err(corrupt("last array element is incomplete")),
    };

    let keep = tail.0 + 1;
    log::debug!("Truncating {:?} from {} to {} bytes", path, len, keep);
    debug_assert!(keep <= end);
    file.set_len(keep).map_err(io_err)?;
    file.seek(SeekFrom::End(0)).map_err(io_err)?;

    Ok(has_elements)
}

/// First non-whitespace byte of the file, if any
fn first_significant_byte(file: &mut File, len: u64) -> io::Result<Option<u8>> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = [0u8; SCAN_CHUNK as usize];
    let mut read = 0u64;
    while read < len {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if let Some(byte) = buf[..n].iter().find(|b| !b.is_ascii_whitespace()) {
            return Ok(Some(*byte));
        }
        read += n as u64;
    }
    Ok(None)
}

/// Position and value of the last non-whitespace byte before `end`
fn last_significant_byte(file: &mut File, end: u64) -> io::Result<Option<(u64, u8)>> {
    let mut buf = [0u8; SCAN_CHUNK as usize];
    let mut chunk_end = end;
    while chunk_end > 0 {
        let chunk_start = chunk_end.saturating_sub(SCAN_CHUNK);
        let size = (chunk_end - chunk_start) as usize;
        file.seek(SeekFrom::Start(chunk_start))?;
        file.read_exact(&mut buf[..size])?;
        if let Some(i) = buf[..size].iter().rposition(|b| !b.is_ascii_whitespace()) {
            return Ok(Some((chunk_start + i as u64, buf[i])));
        }
        chunk_end = chunk_start;
    }
    Ok(None)
}

impl Sink for JsonSink {
    fn append(&mut self, record: &LogRecord) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(CaptureError::SessionClosed)?;
        let object = serde_json::to_vec(&RecordRow::from(record))?;

        let separator: &[u8] = if self.needs_separator { b",\n" } else { b"" };
        writer
            .write_all(separator)
            .and_then(|_| writer.write_all(&object))
            .and_then(|_| writer.flush())
            .map_err(|e| CaptureError::sink_io(&self.path, e))?;

        self.needs_separator = true;
        self.records_written += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer
                .write_all(b"]")
                .and_then(|_| writer.flush())
                .and_then(|_| writer.get_ref().sync_all())
                .map_err(|e| CaptureError::sink_io(&self.path, e))?;
            log::info!(
                "Closed JSON log: {:?} ({} records appended)",
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

impl Drop for JsonSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::error!("Failed to finalize JSON log {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::j1939;
    use crate::types::{format_hex, Direction};
    use serde_json::Value;
    use std::fs;

    fn record(sequence: u64) -> LogRecord {
        LogRecord {
            sequence,
            relative_time: sequence as f64 / 8.0,
            direction: Direction::Receive,
            identifier: j1939::decode(0x18FECA00 | sequence as u32, true),
            data_hex: format_hex(&[sequence as u8, 0xFF]),
            signals: Vec::new(),
        }
    }

    fn read_array(path: &Path) -> Vec<Value> {
        let text = fs::read_to_string(path).unwrap();
        match serde_json::from_str::<Value>(&text).unwrap() {
            Value::Array(items) => items,
            other => panic!("expected array, got {other}"),
        }
    }

    fn write_records(path: &Path, range: std::ops::RangeInclusive<u64>) {
        let mut sink = JsonSink::open(path).unwrap();
        for n in range {
            sink.append(&record(n)).unwrap();
        }
        sink.finalize().unwrap();
    }

    #[test]
    fn test_empty_log_is_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");

        let mut sink = JsonSink::open(&path).unwrap();
        sink.finalize().unwrap();
        sink.finalize().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
        assert!(read_array(&path).is_empty());
    }

    #[test]
    fn test_object_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.json");
        write_records(&path, 1..=1);

        let items = read_array(&path);
        let obj = items[0].as_object().unwrap();
        let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        assert_eq!(keys.len(), 8);
        assert_eq!(obj["No."], 1);
        assert_eq!(obj["Time"], "0.125");
        assert_eq!(obj["Snd/Rc"], "Receive");
        assert_eq!(obj["Dest"], 255);
        assert_eq!(obj["Src"], 1);
        assert_eq!(obj["Priority"], 6);
        assert_eq!(obj["PGN"], 0xFECA);
        assert_eq!(obj["Data"], "01 FF");
    }

    #[test]
    fn test_resume_appends_to_existing_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resume.json");

        write_records(&path, 1..=3);
        write_records(&path, 4..=5);

        let items = read_array(&path);
        assert_eq!(items.len(), 5);
        let numbers: Vec<u64> = items.iter().map(|v| v["No."].as_u64().unwrap()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_resume_without_new_records_stays_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noop.json");

        write_records(&path, 1..=2);
        write_records(&path, 1..=0);
        assert_eq!(read_array(&path).len(), 2);

        let empty = dir.path().join("empty_twice.json");
        write_records(&empty, 1..=0);
        write_records(&empty, 1..=0);
        assert!(read_array(&empty).is_empty());
    }

    #[test]
    fn test_resume_repairs_interrupted_tail() {
        let dir = tempfile::tempdir().unwrap();

        // Killed after an append: no closing bracket
        let path = dir.path().join("no_bracket.json");
        fs::write(&path, r#"[{"No.":1},
{"No.":2}"#).unwrap();
        write_records(&path, 3..=3);
        assert_eq!(read_array(&path).len(), 3);

        // Dangling comma and trailing whitespace
        let path = dir.path().join("dangling.json");
        fs::write(&path, "[{\"No.\":1},\n  \n").unwrap();
        write_records(&path, 2..=2);
        assert_eq!(read_array(&path).len(), 2);

        // Opening bracket only
        let path = dir.path().join("open_only.json");
        fs::write(&path, "[").unwrap();
        write_records(&path, 1..=1);
        assert_eq!(read_array(&path).len(), 1);
    }

    #[test]
    fn test_resume_rejects_non_array() {
        let dir = tempfile::tempdir().unwrap();

        let path = dir.path().join("object.json");
        fs::write(&path, r#"{"No.":1}"#).unwrap();
        assert!(matches!(
            JsonSink::open(&path),
            Err(CaptureError::CorruptLog { .. })
        ));

        let path = dir.path().join("cut.json");
        fs::write(&path, r#"[{"No.":1},{"No."#).unwrap();
        assert!(matches!(
            JsonSink::open(&path),
            Err(CaptureError::CorruptLog { .. })
        ));
        // Refused files are left untouched
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"[{"No.":1},{"No."#);
    }

    #[test]
    fn test_whitespace_only_file_is_treated_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blank.json");
        fs::write(&path, "  \n").unwrap();
        write_records(&path, 1..=1);
        assert_eq!(read_array(&path).len(), 1);
    }

    #[test]
    fn test_scan_handles_long_whitespace_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("padded.json");
        let mut content = String::from("[{\"No.\":1}]");
        content.push_str(&" ".repeat(3 * SCAN_CHUNK as usize));
        fs::write(&path, content).unwrap();

        write_records(&path, 2..=2);
        assert_eq!(read_array(&path).len(), 2);
    }
}
