//! Frame source contract
//!
//! A frame source wraps whatever actually talks to the bus (SocketCAN, a USB
//! adapter, a replayed log). The capture engine only needs bounded-wait polling
//! and an orderly shutdown, so drivers live outside this crate.

use crate::types::{Frame, Result};
use std::collections::VecDeque;
use std::time::Duration;

/// Common trait for all frame providers
pub trait FrameSource {
    /// Wait up to `timeout` for the next frame
    ///
    /// Returns `Ok(None)` when the timeout elapses without a frame. A timeout is
    /// a normal outcome, not an error.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    /// Release the underlying interface
    fn shutdown(&mut self) {}

    /// Current time on the time base used for frame timestamps, in seconds
    ///
    /// Defaults to the wall clock (seconds since the UNIX epoch), which is what
    /// kernel-stamped SocketCAN frames use.
    fn clock(&self) -> f64 {
        wall_clock()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        (**self).poll(timeout)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn clock(&self) -> f64 {
        (**self).clock()
    }
}

/// Seconds since the UNIX epoch, with microsecond resolution
pub fn wall_clock() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// In-memory frame source that replays a fixed sequence of frames
///
/// Useful for loopback simulation and tests. Each call to `poll` yields the
/// next frame immediately; once exhausted it reports a timeout without
/// sleeping. `clock` reports the configured origin, so relative times equal
/// `frame.timestamp - origin`.
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    frames: VecDeque<Frame>,
    origin: f64,
    polls: usize,
    shut_down: bool,
}

impl ReplaySource {
    /// Create a replay source with a clock origin of 0.0
    pub fn new(frames: impl IntoIterator<Item = Frame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Builder method: set the value reported by `clock`
    pub fn with_origin(mut self, origin: f64) -> Self {
        self.origin = origin;
        self
    }

    /// Queue another frame
    pub fn push(&mut self, frame: Frame) {
        self.frames.push_back(frame);
    }

    /// Frames not yet polled
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    /// Number of `poll` calls made so far (including timeouts)
    pub fn polls(&self) -> usize {
        self.polls
    }

    /// True once `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl FrameSource for ReplaySource {
    fn poll(&mut self, _timeout: Duration) -> Result<Option<Frame>> {
        self.polls += 1;
        Ok(self.frames.pop_front())
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }

    fn clock(&self) -> f64 {
        self.origin
    }
}
