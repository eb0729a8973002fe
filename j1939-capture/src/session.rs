//! Capture session
//!
//! A [`CaptureSession`] owns a frame source and, in Logged mode, the sink it
//! writes to. It moves through `Constructed → Active ⇄ Paused → Closed`:
//!
//! - Stream mode hands each received frame to the caller as a [`LogRecord`]
//!   (via [`CaptureSession::poll_once`] / [`CaptureSession::run`]) or exposes
//!   raw frames through [`CaptureSession::read`].
//! - Logged mode appends each record to the sink while Active.
//!
//! Everything runs on the calling thread. The only blocking point is the
//! bounded poll of the frame source, so pause and stop requests made through a
//! [`ControlHandle`] are honoured within one poll interval.

use crate::config::SessionConfig;
use crate::j1939;
use crate::signals::SignalCatalog;
use crate::sink::{open_sink, Sink};
use crate::source::FrameSource;
use crate::types::{CaptureError, Direction, Frame, LogRecord, Mode, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created; logging not yet started
    Constructed,
    /// Logging frames
    Active,
    /// Logging suspended; the sink stays open
    Paused,
    /// Sink finalized and source shut down
    Closed,
}

/// Outcome of a state change request
///
/// Requests that find the session already in the target state are advisory
/// no-ops, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state changed
    Applied,
    /// `begin_logging` while already Active
    AlreadyActive,
    /// `pause_logging` while not Active
    AlreadyPaused,
}

/// Why [`CaptureSession::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A pause was requested (Logged sessions are now Paused)
    Paused,
    /// A stop was requested or the session was closed
    Stopped,
}

#[derive(Debug, Default)]
struct ControlFlags {
    pause: AtomicBool,
    stop: AtomicBool,
}

/// Cloneable handle for requesting pause/stop from outside the receive loop
///
/// Safe to use from a signal handler or another thread; the session observes
/// requests between polls.
#[derive(Debug, Clone, Default)]
pub struct ControlHandle {
    flags: Arc<ControlFlags>,
}

impl ControlHandle {
    /// Ask the receive loop to pause
    pub fn request_pause(&self) {
        self.flags.pause.store(true, Ordering::SeqCst);
    }

    /// Ask the receive loop to stop
    pub fn request_stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.flags.stop.load(Ordering::SeqCst)
    }

    /// Consume a pending pause request
    fn take_pause(&self) -> bool {
        self.flags.pause.swap(false, Ordering::SeqCst)
    }
}

/// Stateful capture engine over a frame source
pub struct CaptureSession<S: FrameSource> {
    source: S,
    mode: Mode,
    state: SessionState,
    sequence: u64,
    start_time: f64,
    poll_timeout: Duration,
    sink: Option<Box<dyn Sink>>,
    signals: SignalCatalog,
    control: ControlHandle,
}

impl<S: FrameSource> CaptureSession<S> {
    /// Create a session
    ///
    /// In Logged mode the sink is opened (or resumed) immediately, so an empty
    /// file receives its CSV header or opening bracket here. Stream mode never
    /// creates a sink.
    ///
    /// # Example
    /// ```
    /// use j1939_capture::{CaptureSession, Frame, ReplaySource, SessionConfig};
    ///
    /// let source = ReplaySource::new(vec![Frame::extended(0x18FECA00, &[200, 0], 0.5)]);
    /// let mut session = CaptureSession::new(source, SessionConfig::stream()).unwrap();
    ///
    /// let record = session.poll_once().unwrap().unwrap();
    /// assert_eq!(record.sequence, 1);
    /// assert_eq!(record.identifier.pgn, Some(0xFECA));
    /// session.close().unwrap();
    /// ```
    pub fn new(source: S, config: SessionConfig) -> Result<Self> {
        let sink = match config.mode {
            Mode::Logged => {
                let output = config.output.as_ref().ok_or(CaptureError::MissingSink)?;
                Some(open_sink(output, &config.signals.names())?)
            }
            Mode::Stream => {
                if let Some(output) = &config.output {
                    log::warn!("Output {:?} is ignored in stream mode", output.path);
                }
                None
            }
        };

        Ok(Self::assemble(source, &config, sink))
    }

    /// Create a Logged session writing to a caller-supplied sink
    ///
    /// `config.output` is ignored; the sink is used as-is.
    pub fn with_sink(source: S, config: SessionConfig, sink: Box<dyn Sink>) -> Result<Self> {
        if config.mode != Mode::Logged {
            return Err(CaptureError::WrongMode {
                operation: "with_sink",
                mode: config.mode,
            });
        }
        Ok(Self::assemble(source, &config, Some(sink)))
    }

    fn assemble(source: S, config: &SessionConfig, sink: Option<Box<dyn Sink>>) -> Self {
        let start_time = config.start_time.unwrap_or_else(|| source.clock());
        log::info!("Capture session created in {} mode", config.mode);

        Self {
            source,
            mode: config.mode,
            state: SessionState::Constructed,
            sequence: 0,
            start_time,
            poll_timeout: config.poll_timeout(),
            sink,
            signals: config.signals.clone(),
            control: ControlHandle::default(),
        }
    }

    /// Builder method: share an existing control handle
    ///
    /// Lets a caller install one Ctrl-C handler (or hand the same handle to a
    /// frame source) before the session exists.
    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = control;
        self
    }

    /// Start or resume logging (Logged mode only)
    pub fn begin_logging(&mut self) -> Result<Transition> {
        self.ensure_mode(Mode::Logged, "begin_logging")?;
        match self.state {
            SessionState::Closed => Err(CaptureError::SessionClosed),
            SessionState::Active => {
                log::warn!("Logging is already active");
                Ok(Transition::AlreadyActive)
            }
            SessionState::Constructed | SessionState::Paused => {
                self.control.take_pause();
                self.state = SessionState::Active;
                log::debug!("Logging active (next record #{})", self.sequence + 1);
                Ok(Transition::Applied)
            }
        }
    }

    /// Pause logging (Logged mode only); resume with `begin_logging`
    pub fn pause_logging(&mut self) -> Result<Transition> {
        self.ensure_mode(Mode::Logged, "pause_logging")?;
        match self.state {
            SessionState::Closed => Err(CaptureError::SessionClosed),
            SessionState::Active => {
                self.state = SessionState::Paused;
                log::debug!("Logging paused after record #{}", self.sequence);
                Ok(Transition::Applied)
            }
            SessionState::Constructed | SessionState::Paused => {
                log::warn!("Logging is already paused");
                Ok(Transition::AlreadyPaused)
            }
        }
    }

    /// Poll the source once and process the frame, if any
    ///
    /// Returns `Ok(None)` on poll timeout. In Logged mode the record has
    /// already been appended to the sink when it is returned. A sink failure
    /// closes the session before the error is returned.
    pub fn poll_once(&mut self) -> Result<Option<LogRecord>> {
        Ok(self.poll_frame()?.map(|(_, record)| record))
    }

    /// Run the receive loop until a pause or stop is requested
    ///
    /// `on_record` sees every frame together with its record. Poll timeouts
    /// never end the loop; only a [`ControlHandle`] request, closing the
    /// session, or a fatal error does.
    pub fn run<F>(&mut self, mut on_record: F) -> Result<RunExit>
    where
        F: FnMut(&Frame, &LogRecord),
    {
        log::debug!("Receive loop started in {} mode", self.mode);
        loop {
            if self.state == SessionState::Closed || self.control.is_stop_requested() {
                log::debug!("Receive loop stopped");
                return Ok(RunExit::Stopped);
            }
            if self.control.take_pause() {
                if self.mode == Mode::Logged && self.state == SessionState::Active {
                    self.pause_logging()?;
                }
                return Ok(RunExit::Paused);
            }
            if self.mode == Mode::Logged && self.state != SessionState::Active {
                return Ok(RunExit::Paused);
            }

            if let Some((frame, record)) = self.poll_frame()? {
                on_record(&frame, &record);
            }
        }
    }

    /// Read the next raw frame (Stream mode only)
    ///
    /// Returns `Ok(None)` if no frame arrives within `timeout`. Frames read
    /// this way do not consume sequence numbers.
    pub fn read(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        self.ensure_mode(Mode::Stream, "read")?;
        if self.state == SessionState::Closed {
            return Err(CaptureError::SessionClosed);
        }
        self.source.poll(timeout)
    }

    /// Finalize the sink, shut down the source and enter Closed
    ///
    /// Idempotent: later calls return `Ok(())` without doing anything.
    pub fn close(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        let result = match self.sink.take() {
            Some(mut sink) => sink.finalize(),
            None => Ok(()),
        };
        self.source.shutdown();

        log::info!("Capture session closed after {} records", self.sequence);
        result
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while frames are being processed (Logged: Active; Stream: not closed)
    pub fn is_active(&self) -> bool {
        match self.mode {
            Mode::Logged => self.state == SessionState::Active,
            Mode::Stream => self.state != SessionState::Closed,
        }
    }

    /// Records produced so far (equals the last sequence number)
    pub fn records_emitted(&self) -> u64 {
        self.sequence
    }

    /// Session start on the source's time base
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Path of the sink file while it is open
    pub fn output_path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|sink| sink.path())
    }

    /// Handle for requesting pause/stop from a signal handler or another thread
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Access the underlying frame source
    pub fn source(&self) -> &S {
        &self.source
    }

    fn ensure_mode(&self, required: Mode, operation: &'static str) -> Result<()> {
        if self.mode != required {
            log::warn!("{}() can only be called in {} mode", operation, required);
            return Err(CaptureError::WrongMode {
                operation,
                mode: self.mode,
            });
        }
        Ok(())
    }

    fn poll_frame(&mut self) -> Result<Option<(Frame, LogRecord)>> {
        match (self.mode, self.state) {
            (_, SessionState::Closed) => return Err(CaptureError::SessionClosed),
            (Mode::Logged, SessionState::Constructed | SessionState::Paused) => {
                return Err(CaptureError::NotActive)
            }
            _ => {}
        }

        let frame = match self.source.poll(self.poll_timeout)? {
            Some(frame) => frame,
            None => return Ok(None),
        };
        let record = self.record_for(&frame);

        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.append(&record) {
                log::error!("Failed to append record #{}: {}", record.sequence, e);
                if let Err(close_err) = self.close() {
                    log::error!("Failed to finalize after append error: {}", close_err);
                }
                return Err(e);
            }
        }

        log::trace!(
            "#{} t={} id=0x{:X} data={}",
            record.sequence,
            record.time_field(),
            frame.arbitration_id,
            record.data_hex
        );
        Ok(Some((frame, record)))
    }

    fn record_for(&mut self, frame: &Frame) -> LogRecord {
        self.sequence += 1;
        LogRecord {
            sequence: self.sequence,
            relative_time: frame.timestamp - self.start_time,
            direction: Direction::Receive,
            identifier: j1939::decode(frame.arbitration_id, frame.is_extended),
            data_hex: frame.data_hex(),
            signals: self.signals.readings(&frame.data),
        }
    }
}

impl<S: FrameSource> Drop for CaptureSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("Failed to close capture session: {}", e);
        }
    }
}
