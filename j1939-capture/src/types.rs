//! Core types for the J1939 capture library
//!
//! This module defines the frames consumed from a [`FrameSource`](crate::FrameSource),
//! the decoded identifier fields, the records a capture session produces, and the
//! error type shared by every component.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Largest identifier representable by an extended (29-bit) CAN frame
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// Largest identifier representable by a standard (11-bit) CAN frame
pub const STANDARD_ID_MASK: u32 = 0x7FF;

/// Maximum payload length of a classic CAN frame
pub const MAX_PAYLOAD_LEN: usize = 8;

/// Raw CAN frame as yielded by a frame source
///
/// Frames are immutable once read. The timestamp is expressed in seconds on the
/// same time base as [`FrameSource::clock`](crate::FrameSource::clock).
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// CAN arbitration ID (11-bit or 29-bit)
    pub arbitration_id: u32,
    /// Payload bytes (0-8 bytes)
    pub data: Vec<u8>,
    /// Reception time in seconds
    pub timestamp: f64,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl Frame {
    /// Create an extended (29-bit) frame; the ID is masked and the payload truncated to 8 bytes
    pub fn extended(arbitration_id: u32, data: &[u8], timestamp: f64) -> Self {
        Self::new(arbitration_id & EXTENDED_ID_MASK, data, timestamp, true)
    }

    /// Create a standard (11-bit) frame; the ID is masked and the payload truncated to 8 bytes
    pub fn standard(arbitration_id: u32, data: &[u8], timestamp: f64) -> Self {
        Self::new(arbitration_id & STANDARD_ID_MASK, data, timestamp, false)
    }

    fn new(arbitration_id: u32, data: &[u8], timestamp: f64, is_extended: bool) -> Self {
        let len = data.len().min(MAX_PAYLOAD_LEN);
        Self {
            arbitration_id,
            data: data[..len].to_vec(),
            timestamp,
            is_extended,
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }

    /// Payload as canonical uppercase, space-separated hex (e.g. `0A 1F FF`)
    pub fn data_hex(&self) -> String {
        format_hex(&self.data)
    }
}

/// Render bytes as uppercase hex pairs separated by single spaces
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", byte));
    }
    out
}

/// Parse the output of [`format_hex`] back into bytes
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    text.split_whitespace()
        .map(|pair| u8::from_str_radix(pair, 16).ok())
        .collect()
}

/// J1939 fields carried by a 29-bit identifier
///
/// Every field is `None` for standard (11-bit) frames: the protocol's fields are
/// undefined there, and they are reported as absent rather than zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecodedIdentifier {
    /// Message priority (0-7, lower is more urgent)
    pub priority: Option<u8>,
    /// Parameter Group Number (18 bits)
    pub pgn: Option<u32>,
    /// Source address
    pub source: Option<u8>,
    /// Destination address (255 for broadcast/PDU2 messages)
    pub destination: Option<u8>,
}

impl DecodedIdentifier {
    /// Identifier with every field absent
    pub const ABSENT: DecodedIdentifier = DecodedIdentifier {
        priority: None,
        pgn: None,
        source: None,
        destination: None,
    };

    /// True if no field is present (standard frame)
    pub fn is_absent(&self) -> bool {
        *self == Self::ABSENT
    }

    /// True if the message is addressed to the global (broadcast) address
    pub fn is_broadcast(&self) -> bool {
        self.destination == Some(crate::j1939::BROADCAST_ADDRESS)
    }
}

/// Direction of a logged frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Frame received from the bus
    Receive,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Receive => write!(f, "Receive"),
        }
    }
}

/// One captured frame, as handed to a stream consumer or written to a sink
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Sequence number, starting at 1 for the first frame of a session
    pub sequence: u64,
    /// Seconds since the session started
    pub relative_time: f64,
    /// Frame direction
    pub direction: Direction,
    /// Decoded J1939 identifier fields (all absent for standard frames)
    pub identifier: DecodedIdentifier,
    /// Payload as uppercase, space-separated hex
    pub data_hex: String,
    /// Decoded signal values, one per catalog signal the session decodes
    pub signals: Vec<SignalReading>,
}

/// Physical value of one catalog signal in a record
///
/// `value` is `None` when the payload is too short to carry the signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReading {
    pub name: String,
    pub value: Option<f64>,
}

impl LogRecord {
    /// Relative time rendered with millisecond precision, as written to sinks
    pub fn time_field(&self) -> String {
        format!("{:.3}", self.relative_time)
    }
}

/// Serialized form of a [`LogRecord`], keyed by the column names of the log formats
///
/// Absent identifier fields are written as empty strings so that CSV and JSON
/// logs agree on how a standard frame looks.
#[derive(Debug, Serialize)]
pub(crate) struct RecordRow<'a> {
    #[serde(rename = "No.")]
    pub sequence: u64,
    #[serde(rename = "Time")]
    pub time: String,
    #[serde(rename = "Snd/Rc")]
    pub direction: Direction,
    #[serde(rename = "Dest", serialize_with = "serialize_optional")]
    pub destination: Option<u8>,
    #[serde(rename = "Src", serialize_with = "serialize_optional")]
    pub source: Option<u8>,
    #[serde(rename = "Priority", serialize_with = "serialize_optional")]
    pub priority: Option<u8>,
    #[serde(rename = "PGN", serialize_with = "serialize_optional")]
    pub pgn: Option<u32>,
    #[serde(rename = "Data")]
    pub data: &'a str,
    #[serde(flatten)]
    pub signals: SignalColumns<'a>,
}

/// Signal readings serialized as trailing `name: value` entries
#[derive(Debug)]
pub(crate) struct SignalColumns<'a>(&'a [SignalReading]);

impl Serialize for SignalColumns<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for reading in self.0 {
            match reading.value {
                Some(value) => map.serialize_entry(&reading.name, &value)?,
                None => map.serialize_entry(&reading.name, "")?,
            }
        }
        map.end()
    }
}

impl<'a> From<&'a LogRecord> for RecordRow<'a> {
    fn from(record: &'a LogRecord) -> Self {
        Self {
            sequence: record.sequence,
            time: record.time_field(),
            direction: record.direction,
            destination: record.identifier.destination,
            source: record.identifier.source,
            priority: record.identifier.priority,
            pgn: record.identifier.pgn,
            data: &record.data_hex,
            signals: SignalColumns(&record.signals),
        }
    }
}

fn serialize_optional<T, S>(value: &Option<T>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    T: Serialize,
    S: Serializer,
{
    match value {
        Some(v) => v.serialize(serializer),
        None => serializer.serialize_str(""),
    }
}

/// Capture session mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Frames are handed to the caller as they arrive
    Stream,
    /// Frames are persisted to a sink
    Logged,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Stream => write!(f, "stream"),
            Mode::Logged => write!(f, "logged"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = CaptureError;

    /// Accepts only the canonical names `stream` and `logged` (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" => Ok(Mode::Stream),
            "logged" => Ok(Mode::Logged),
            _ => Err(CaptureError::InvalidMode(s.to_string())),
        }
    }
}

/// Errors that can occur during capture
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Invalid mode '{0}': expected 'stream' or 'logged'")]
    InvalidMode(String),

    #[error("Logged mode requires an output sink configuration")]
    MissingSink,

    #[error("{operation}() is not available in {mode} mode")]
    WrongMode {
        operation: &'static str,
        mode: Mode,
    },

    #[error("Logging is not active")]
    NotActive,

    #[error("Capture session is closed")]
    SessionClosed,

    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    #[error("Signal name '{0}' cannot be used as a log column")]
    InvalidSignalName(String),

    #[error("Signal '{signal}' requires {required} payload bytes but frame only has {actual}")]
    PayloadTooShort {
        signal: String,
        required: usize,
        actual: usize,
    },

    #[error("Unknown identifier field: {0}")]
    UnknownField(String),

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Sink I/O error on {path:?}: {source}")]
    SinkIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Refusing to resume {path:?}: {reason}")]
    CorruptLog { path: PathBuf, reason: String },

    #[error("Frame source error: {0}")]
    Source(String),
}

impl CaptureError {
    /// Wrap an I/O error raised while operating on a sink file
    pub(crate) fn sink_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CaptureError::SinkIo {
            path: path.into(),
            source,
        }
    }

    /// True if the error leaves the session unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::SinkIo { .. }
                | CaptureError::Serialization(_)
                | CaptureError::Source(_)
        )
    }
}
