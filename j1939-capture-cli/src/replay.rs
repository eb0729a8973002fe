//! candump log replay
//!
//! Reads the SocketCAN `candump -L` text format, one frame per line:
//!
//! ```text
//! (1697040000.123456) can0 18FECA00#C8FF00
//! ```
//!
//! Identifiers written with more than three hex digits are extended (29-bit),
//! matching candump's own formatting. Remote, error and CAN FD frames are
//! skipped.
//! Reading from stdin (`candump -L can0 | j1939-capture capture -`) gives a
//! live capture without linking any bus driver.

use j1939_capture::source::wall_clock;
use j1939_capture::{CaptureError, ControlHandle, Frame, FrameSource};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Errors produced while parsing a candump line
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CandumpParseError {
    #[error("missing '(timestamp)' prefix")]
    MissingTimestamp,
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("missing 'id#data' field")]
    MissingFrame,
    #[error("invalid identifier '{0}'")]
    InvalidId(String),
    #[error("invalid payload '{0}'")]
    InvalidPayload(String),
    #[error("unsupported frame type '{0}'")]
    Unsupported(String),
}

/// Set in the identifier of SocketCAN error frames
const CAN_ERR_FLAG: u32 = 0x2000_0000;

/// Parse one `candump -L` line
pub fn parse_candump_line(line: &str) -> Result<Frame, CandumpParseError> {
    let mut parts = line.split_whitespace();

    let stamp = parts.next().ok_or(CandumpParseError::MissingTimestamp)?;
    let stamp = stamp
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or(CandumpParseError::MissingTimestamp)?;
    let timestamp: f64 = stamp
        .parse()
        .map_err(|_| CandumpParseError::InvalidTimestamp(stamp.to_string()))?;

    let _interface = parts.next().ok_or(CandumpParseError::MissingFrame)?;
    let body = parts.next().ok_or(CandumpParseError::MissingFrame)?;
    let (id_text, data_text) = body
        .split_once('#')
        .ok_or(CandumpParseError::MissingFrame)?;

    if data_text.starts_with('#') || data_text.starts_with('R') {
        return Err(CandumpParseError::Unsupported(body.to_string()));
    }

    let id = u32::from_str_radix(id_text, 16)
        .map_err(|_| CandumpParseError::InvalidId(id_text.to_string()))?;
    if id & CAN_ERR_FLAG != 0 {
        return Err(CandumpParseError::Unsupported(body.to_string()));
    }

    if !data_text.is_ascii() || data_text.len() % 2 != 0 || data_text.len() > 16 {
        return Err(CandumpParseError::InvalidPayload(data_text.to_string()));
    }
    let data = (0..data_text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&data_text[i..i + 2], 16))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| CandumpParseError::InvalidPayload(data_text.to_string()))?;

    if id_text.len() > 3 {
        Ok(Frame::extended(id, &data, timestamp))
    } else {
        Ok(Frame::standard(id, &data, timestamp))
    }
}

/// Upper bound on the read-ahead that fixes the clock origin
const READ_AHEAD_TIMEOUT: Duration = Duration::from_secs(1);

type LineResult = Result<Frame, String>;

/// Frame source replaying a candump log
///
/// Lines are read and parsed on a dedicated thread, so `poll` never waits
/// longer than its timeout even when the input stalls (a quiet bus on stdin,
/// a FIFO). The end of input is seen as the channel closing.
pub struct CandumpSource {
    receiver: Option<Receiver<LineResult>>,
    pending: Option<Frame>,
    origin: f64,
    skipped: Arc<AtomicUsize>,
    eof_control: Option<ControlHandle>,
}

impl CandumpSource {
    /// Open a candump log file, or stdin when `path` is `-`
    pub fn open(path: &Path) -> io::Result<Self> {
        if path == Path::new("-") {
            log::info!("Reading candump frames from stdin");
            Ok(Self::new(BufReader::new(io::stdin())))
        } else {
            log::info!("Replaying candump log: {:?}", path);
            Ok(Self::new(BufReader::new(File::open(path)?)))
        }
    }

    /// Wrap a reader; the first frame is awaited for up to one second to fix
    /// the clock origin
    pub fn new<R: BufRead + Send + 'static>(reader: R) -> Self {
        Self::with_read_ahead(reader, READ_AHEAD_TIMEOUT)
    }

    /// Like [`new`](Self::new) with an explicit read-ahead bound
    ///
    /// If no frame arrives in time the origin falls back to the wall clock,
    /// which is the time base of live `candump -L` output.
    pub fn with_read_ahead<R: BufRead + Send + 'static>(reader: R, read_ahead: Duration) -> Self {
        let skipped = Arc::new(AtomicUsize::new(0));
        let receiver = spawn_reader(reader, skipped.clone());
        let mut source = Self {
            receiver: Some(receiver),
            pending: None,
            origin: wall_clock(),
            skipped,
            eof_control: None,
        };

        match source.receive(read_ahead) {
            Ok(Some(frame)) => {
                source.origin = frame.timestamp;
                source.pending = Some(frame);
            }
            Ok(None) => {
                if !source.is_exhausted() {
                    log::debug!("No frame within {:?}, using wall clock origin", read_ahead);
                }
            }
            Err(e) => log::error!("Failed to read candump input: {}", e),
        }
        source
    }

    /// Builder method: request a stop on `control` when the log runs out
    pub fn stop_at_eof(mut self, control: ControlHandle) -> Self {
        if self.receiver.is_none() {
            control.request_stop();
        }
        self.eof_control = Some(control);
        self
    }

    /// True once the end of the input has been reached
    pub fn is_exhausted(&self) -> bool {
        self.receiver.is_none() && self.pending.is_none()
    }

    /// Lines that could not be parsed so far
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    fn receive(&mut self, timeout: Duration) -> j1939_capture::Result<Option<Frame>> {
        let receiver = match &self.receiver {
            Some(receiver) => receiver,
            None => return Ok(None),
        };
        match receiver.recv_timeout(timeout) {
            Ok(Ok(frame)) => Ok(Some(frame)),
            Ok(Err(message)) => Err(CaptureError::Source(message)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                self.receiver = None;
                if let Some(control) = &self.eof_control {
                    control.request_stop();
                }
                Ok(None)
            }
        }
    }
}

/// Read and parse lines until EOF, a read error, or the receiver going away
fn spawn_reader<R: BufRead + Send + 'static>(
    mut reader: R,
    skipped: Arc<AtomicUsize>,
) -> Receiver<LineResult> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => line_no += 1,
                Err(e) => {
                    let _ = sender.send(Err(format!("candump input: {}", e)));
                    return;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_candump_line(trimmed) {
                Ok(frame) => {
                    if sender.send(Ok(frame)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("Skipping line {}: {}", line_no, e);
                }
            }
        }
        log::info!(
            "End of candump input after {} lines ({} skipped)",
            line_no,
            skipped.load(Ordering::Relaxed)
        );
    });
    receiver
}

impl FrameSource for CandumpSource {
    fn poll(&mut self, timeout: Duration) -> j1939_capture::Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        self.receive(timeout)
    }

    /// Drops the channel; the reader thread exits at its next frame
    fn shutdown(&mut self) {
        self.receiver = None;
    }

    fn clock(&self) -> f64 {
        self.origin
    }
}
