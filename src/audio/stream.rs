//! Persistent output stream with health checks and bounded recovery.
//!
//! The stream moves through `Unopened -> Open -> {healthy, Unhealthy} ->
//! Closed`. An unhealthy stream is reopened automatically while the
//! consecutive failure budget lasts; once it is spent every write becomes a
//! silent no-op until [`StreamEngine::reset_errors`] is called or the stream
//! is closed.
//!
//! Cancellation is cooperative. A write checks its [`PlaybackTicket`] before
//! every chunk, so `stop()` takes effect at the next chunk boundary and at
//! most one chunk of audio may still be heard afterwards.

use super::output::{AudioOutput, OutputError};
use crate::config::StreamConfig;
use crate::error::{EngineError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle state of the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Never opened, or the last open failed.
    Unopened,
    /// Open; healthy while the backend reports it active.
    Open,
    /// A write failed or the backend stopped; awaiting reinit.
    Unhealthy,
    /// Closed for good.
    Closed,
}

/// Identifies one playback. Only the current ticket may write or clear the
/// playing flag, so an abandoned task cannot cancel a newer sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackTicket(u64);

/// How a [`StreamEngine::write`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Every sample was written.
    Completed { samples: usize },
    /// Stopped early by `stop()` or a newer playback.
    Cancelled { samples: usize },
    /// A chunk write failed or the stream went unhealthy mid-write.
    Failed { samples: usize },
    /// Nothing was written: the stream is closed, unreachable or degraded.
    Skipped,
}

struct StreamInner {
    output: Box<dyn AudioOutput>,
    state: StreamState,
    buffer_frames: Option<u32>,
    error_count: u32,
}

/// Owns the output stream.
pub struct StreamEngine {
    inner: Mutex<StreamInner>,
    /// Generation counter shifted left by one; the low bit is the playing flag.
    playback: AtomicU64,
    sample_rate: u32,
    config: StreamConfig,
}

const PLAYING: u64 = 1;

impl StreamEngine {
    /// Wraps a backend. The stream is not opened until [`open`](Self::open)
    /// or the first write.
    pub fn new(output: Box<dyn AudioOutput>, sample_rate: u32, config: StreamConfig) -> Self {
        Self {
            inner: Mutex::new(StreamInner {
                output,
                state: StreamState::Unopened,
                buffer_frames: None,
                error_count: 0,
            }),
            playback: AtomicU64::new(0),
            sample_rate,
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens the stream, trying each candidate buffer size in order.
    ///
    /// # Returns
    ///
    /// The buffer size (frames) the device accepted.
    ///
    /// # Errors
    ///
    /// `DeviceUnavailable` if no device can be reached, every buffer size
    /// is rejected, or the stream was already closed.
    pub fn open(&self) -> Result<u32> {
        let mut inner = self.lock();
        self.open_locked(&mut inner)
    }

    fn open_locked(&self, inner: &mut StreamInner) -> Result<u32> {
        if inner.state == StreamState::Closed {
            return Err(EngineError::DeviceUnavailable("stream has been closed".into()));
        }
        if inner.state == StreamState::Open {
            if let Some(frames) = inner.buffer_frames {
                return Ok(frames);
            }
        }

        let mut last_error = String::from("no buffer sizes configured");
        for &frames in &self.config.buffer_sizes {
            match inner.output.open(self.sample_rate, frames) {
                Ok(()) => {
                    inner.state = StreamState::Open;
                    inner.buffer_frames = Some(frames);
                    tracing::info!("Initialized persistent audio stream (buffer: {} frames)", frames);
                    return Ok(frames);
                }
                Err(OutputError::DeviceNotFound(msg)) => {
                    inner.state = StreamState::Unopened;
                    inner.buffer_frames = None;
                    return Err(EngineError::DeviceUnavailable(msg));
                }
                Err(e) => {
                    tracing::debug!("Buffer size {} rejected: {}", frames, e);
                    last_error = e.to_string();
                }
            }
        }

        inner.state = StreamState::Unopened;
        inner.buffer_frames = None;
        tracing::warn!("Stream initialization failed with all buffer sizes: {}", last_error);
        Err(EngineError::DeviceUnavailable(last_error))
    }

    /// True if the stream is open and the backend reports it active.
    pub fn is_healthy(&self) -> bool {
        let inner = self.lock();
        inner.state == StreamState::Open && inner.output.is_active()
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Reports why the stream cannot take writes right now, if it cannot.
    ///
    /// # Errors
    ///
    /// `StreamExhausted` once the failure budget is spent,
    /// `DeviceUnavailable` when unopened or closed, `StreamUnhealthy` when
    /// open but not running.
    pub fn check(&self) -> Result<()> {
        let inner = self.lock();
        if inner.error_count >= self.config.max_errors {
            return Err(EngineError::StreamExhausted(self.config.max_errors));
        }
        match inner.state {
            StreamState::Open if inner.output.is_active() => Ok(()),
            StreamState::Open => Err(EngineError::StreamUnhealthy("stream stopped".into())),
            StreamState::Unhealthy => Err(EngineError::StreamUnhealthy(
                "awaiting reinitialization".into(),
            )),
            StreamState::Unopened => Err(EngineError::DeviceUnavailable("stream not open".into())),
            StreamState::Closed => Err(EngineError::DeviceUnavailable("stream has been closed".into())),
        }
    }

    /// Buffer size negotiated by the last successful open.
    pub fn buffer_frames(&self) -> Option<u32> {
        self.lock().buffer_frames
    }

    /// Consecutive failures since the last successful write or reset.
    pub fn error_count(&self) -> u32 {
        self.lock().error_count
    }

    /// True once the failure budget is spent.
    pub fn is_degraded(&self) -> bool {
        self.lock().error_count >= self.config.max_errors
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Starts a new playback and raises the playing flag. Any older ticket
    /// stops being current.
    pub fn begin(&self) -> PlaybackTicket {
        let previous = self
            .playback
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some((((v >> 1) + 1) << 1) | PLAYING)
            })
            .unwrap_or_else(|v| v);
        PlaybackTicket((previous >> 1) + 1)
    }

    /// Lowers the playing flag. Advisory: an in-flight write notices at its
    /// next chunk boundary.
    pub fn stop(&self) {
        self.playback.fetch_and(!PLAYING, Ordering::AcqRel);
    }

    /// Lowers the playing flag if `ticket` is still the current playback.
    pub fn finish(&self, ticket: PlaybackTicket) {
        let current = (ticket.0 << 1) | PLAYING;
        let _ = self.playback.compare_exchange(
            current,
            ticket.0 << 1,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn is_playing(&self) -> bool {
        self.playback.load(Ordering::Acquire) & PLAYING != 0
    }

    fn is_current(&self, ticket: PlaybackTicket) -> bool {
        self.playback.load(Ordering::Acquire) == (ticket.0 << 1) | PLAYING
    }

    /// Writes `samples` in chunks on behalf of `ticket`.
    ///
    /// Makes sure the stream is usable first (opening or reinitializing as
    /// needed). A failing chunk counts against the error budget, aborts this
    /// write and triggers a reinit while budget remains.
    ///
    /// The stream lock is held across each backend chunk write, so
    /// `close()` and health queries wait for at most one chunk. Backends
    /// must bound their own writes; `RodioOutput` fails a write whose queue
    /// stops draining.
    pub fn write(&self, ticket: PlaybackTicket, samples: &[f32]) -> WriteOutcome {
        {
            let mut inner = self.lock();
            if !self.ensure_ready(&mut inner) {
                return WriteOutcome::Skipped;
            }
        }

        let mut written = 0;
        for chunk in samples.chunks(self.config.chunk_frames.max(1)) {
            if !self.is_current(ticket) {
                tracing::debug!("Playback cancelled after {} samples", written);
                return self.succeeded(WriteOutcome::Cancelled { samples: written });
            }

            let mut inner = self.lock();
            if inner.state != StreamState::Open || !inner.output.is_active() {
                self.fail_locked(&mut inner, "stream became inactive during playback");
                return WriteOutcome::Failed { samples: written };
            }
            match inner.output.write(chunk) {
                Ok(()) => written += chunk.len(),
                Err(e) => {
                    self.fail_locked(&mut inner, &format!("chunk write error: {}", e));
                    return WriteOutcome::Failed { samples: written };
                }
            }
        }
        self.succeeded(WriteOutcome::Completed { samples: written })
    }

    fn succeeded(&self, outcome: WriteOutcome) -> WriteOutcome {
        self.lock().error_count = 0;
        outcome
    }

    /// Returns true if the stream can take writes, repairing it if allowed.
    fn ensure_ready(&self, inner: &mut StreamInner) -> bool {
        if inner.state == StreamState::Closed {
            tracing::debug!("Stream closed, skipping playback");
            return false;
        }
        if inner.error_count >= self.config.max_errors {
            tracing::warn!(
                "Audio stream degraded after {} consecutive errors, playback muted",
                inner.error_count
            );
            return false;
        }
        let state = inner.state;
        match state {
            StreamState::Unopened => match self.open_locked(inner) {
                Ok(_) => true,
                Err(e) => {
                    inner.error_count += 1;
                    tracing::warn!("Audio stream not available: {}", e);
                    false
                }
            },
            StreamState::Open if inner.output.is_active() => true,
            _ => {
                tracing::warn!("Stream unhealthy, reinitializing");
                inner.state = StreamState::Unhealthy;
                inner.error_count += 1;
                self.recover_locked(inner)
            }
        }
    }

    fn fail_locked(&self, inner: &mut StreamInner, reason: &str) {
        tracing::warn!("Stream playback error: {}", reason);
        inner.state = StreamState::Unhealthy;
        inner.error_count += 1;
        self.recover_locked(inner);
    }

    fn recover_locked(&self, inner: &mut StreamInner) -> bool {
        match self.reinit_locked(inner) {
            Ok(_) => true,
            Err(EngineError::StreamExhausted(max)) => {
                tracing::warn!("Max stream errors ({}) reached, giving up", max);
                false
            }
            Err(e) => {
                tracing::warn!("Stream reinitialization failed: {}", e);
                false
            }
        }
    }

    /// Closes the current stream (ignoring close errors) and opens it again.
    ///
    /// # Errors
    ///
    /// `StreamExhausted` once the consecutive failure budget is spent,
    /// otherwise whatever [`open`](Self::open) reports.
    pub fn reinit(&self) -> Result<u32> {
        let mut inner = self.lock();
        self.reinit_locked(&mut inner)
    }

    fn reinit_locked(&self, inner: &mut StreamInner) -> Result<u32> {
        if inner.state == StreamState::Closed {
            return Err(EngineError::DeviceUnavailable("stream has been closed".into()));
        }
        if inner.error_count >= self.config.max_errors {
            return Err(EngineError::StreamExhausted(self.config.max_errors));
        }
        if let Err(e) = inner.output.close() {
            tracing::debug!("Ignoring error while closing stream: {}", e);
        }
        inner.state = StreamState::Unopened;
        inner.buffer_frames = None;
        self.open_locked(inner)
    }

    /// Clears the consecutive failure counter, lifting the degraded state.
    pub fn reset_errors(&self) {
        self.lock().error_count = 0;
        tracing::info!("Stream error count reset");
    }

    /// Stops playback and releases the device. Idempotent.
    pub fn close(&self) {
        self.stop();
        let mut inner = self.lock();
        if inner.state == StreamState::Closed {
            return;
        }
        if let Err(e) = inner.output.close() {
            tracing::warn!("Stream cleanup error: {}", e);
        }
        inner.state = StreamState::Closed;
        inner.buffer_frames = None;
        tracing::debug!("Audio stream closed");
    }
}
