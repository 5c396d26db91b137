//! Output backends.
//!
//! [`AudioOutput`] is the device seam used by the stream engine.
//! [`RodioOutput`] drives a real sound card through rodio.

use rodio::buffer::SamplesBuffer;
use rodio::cpal::traits::{DeviceTrait, HostTrait};
use rodio::cpal::SupportedBufferSize;
use rodio::{OutputStream, Sink};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures reported by an output backend.
#[derive(Debug, Error)]
pub enum OutputError {
    /// No output device could be reached at all.
    #[error("no output device: {0}")]
    DeviceNotFound(String),

    /// The device rejected the requested stream configuration.
    #[error("unsupported stream configuration: {0}")]
    UnsupportedConfig(String),

    /// The stream failed while open.
    #[error("stream error: {0}")]
    Stream(String),

    /// An operation that needs an open stream was called without one.
    #[error("stream is not open")]
    NotOpen,
}

/// A mono f32 output stream.
///
/// `write` blocks until the chunk has been handed to the device, roughly in
/// real time, so callers can interleave cancellation checks between chunks.
pub trait AudioOutput: Send {
    /// Opens the stream with the requested buffer size in frames.
    fn open(&mut self, sample_rate: u32, buffer_frames: u32) -> Result<(), OutputError>;

    /// True while the stream is running and accepting samples.
    fn is_active(&self) -> bool;

    /// Writes one chunk of samples.
    fn write(&mut self, chunk: &[f32]) -> Result<(), OutputError>;

    /// Stops and releases the stream. Safe to call when not open.
    fn close(&mut self) -> Result<(), OutputError>;
}

/// Description of an output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub max_channels: u16,
}

/// Lists the host's output devices with their maximum channel counts.
pub fn list_output_devices() -> Result<Vec<DeviceInfo>, OutputError> {
    let host = rodio::cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| OutputError::DeviceNotFound(e.to_string()))?;

    let mut infos = Vec::new();
    for device in devices {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let max_channels = device
            .supported_output_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);
        if max_channels > 0 {
            infos.push(DeviceInfo { name, max_channels });
        }
    }
    Ok(infos)
}

/// A live rodio stream.
///
/// `rodio::OutputStream` cannot leave the thread that created it, so each
/// open spawns a device thread that owns the stream and hands back the
/// `Sink`. Dropping the shutdown sender lets the thread finish and release
/// the device.
struct LiveStream {
    sink: Arc<Sink>,
    shutdown: mpsc::Sender<()>,
    worker: JoinHandle<()>,
}

/// Output through the default (or a named) device via rodio.
pub struct RodioOutput {
    device_name: Option<String>,
    sample_rate: u32,
    live: Option<LiveStream>,
}

impl RodioOutput {
    /// Uses the host's default output device.
    pub fn new() -> Self {
        Self {
            device_name: None,
            sample_rate: 0,
            live: None,
        }
    }

    /// Uses the output device with the given name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            sample_rate: 0,
            live: None,
        }
    }

    fn find_device(name: Option<&str>) -> Result<rodio::cpal::Device, OutputError> {
        let host = rodio::cpal::default_host();
        match name {
            None => host
                .default_output_device()
                .ok_or_else(|| OutputError::DeviceNotFound("no default output device".into())),
            Some(name) => host
                .output_devices()
                .map_err(|e| OutputError::DeviceNotFound(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| OutputError::DeviceNotFound(name.to_string())),
        }
    }

    /// Opens a stream on the device. Must run on the thread that will own
    /// the returned `OutputStream`.
    ///
    /// `buffer_frames` is only checked against the device's supported range.
    /// rodio opens the stream with the device's default buffer size, so the
    /// accepted candidate is the size the device allows, not the size the
    /// hardware ends up using. Write pacing is per chunk either way.
    fn open_on_device(
        name: Option<&str>,
        buffer_frames: u32,
    ) -> Result<(OutputStream, Arc<Sink>), OutputError> {
        let device = Self::find_device(name)?;
        let config = device
            .default_output_config()
            .map_err(|e| OutputError::DeviceNotFound(e.to_string()))?;
        if let SupportedBufferSize::Range { min, max } = config.buffer_size() {
            if buffer_frames < *min || buffer_frames > *max {
                return Err(OutputError::UnsupportedConfig(format!(
                    "buffer of {} frames outside {}..={}",
                    buffer_frames, min, max
                )));
            }
        }
        let (stream, handle) = OutputStream::try_from_device(&device)
            .map_err(|e| OutputError::UnsupportedConfig(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| OutputError::Stream(e.to_string()))?;
        Ok((stream, Arc::new(sink)))
    }

    /// Runs on the device thread: opens the stream, reports the sink, then
    /// keeps the stream alive until shutdown.
    fn run_device(
        name: Option<String>,
        buffer_frames: u32,
        ready: mpsc::Sender<Result<Arc<Sink>, OutputError>>,
        shutdown: mpsc::Receiver<()>,
    ) {
        match Self::open_on_device(name.as_deref(), buffer_frames) {
            Ok((stream, sink)) => {
                if ready.send(Ok(Arc::clone(&sink))).is_err() {
                    return;
                }
                // Blocks until shutdown is signalled or the sender is dropped.
                let _ = shutdown.recv();
                sink.stop();
                drop(stream);
            }
            Err(e) => {
                let _ = ready.send(Err(e));
            }
        }
    }

    fn chunk_period(&self, frames: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::from_millis(1);
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// Extra time queued audio may take to start draining before the device
/// counts as stalled.
const STALL_GRACE: Duration = Duration::from_millis(250);

/// Polls until at most one chunk is queued.
///
/// Fails if the device thread dies or the queue has not drained by
/// `deadline`, so a stalled device cannot hold a writer (and the stream lock
/// it holds) indefinitely.
fn wait_for_drain(
    queued: impl Fn() -> usize,
    alive: impl Fn() -> bool,
    poll: Duration,
    deadline: Instant,
) -> Result<(), OutputError> {
    while queued() > 1 {
        if !alive() {
            return Err(OutputError::Stream("device thread stopped".into()));
        }
        if Instant::now() >= deadline {
            return Err(OutputError::Stream("device stalled, queued audio is not draining".into()));
        }
        thread::sleep(poll);
    }
    Ok(())
}

impl Default for RodioOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for RodioOutput {
    fn open(&mut self, sample_rate: u32, buffer_frames: u32) -> Result<(), OutputError> {
        self.close()?;

        let (ready_tx, ready_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let name = self.device_name.clone();
        let worker = thread::Builder::new()
            .name("audio-device".into())
            .spawn(move || Self::run_device(name, buffer_frames, ready_tx, shutdown_rx))
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        let sink = match ready_rx.recv() {
            Ok(result) => result?,
            Err(_) => return Err(OutputError::Stream("device thread exited".into())),
        };

        self.sample_rate = sample_rate;
        self.live = Some(LiveStream {
            sink,
            shutdown: shutdown_tx,
            worker,
        });
        tracing::debug!("Opened rodio output ({} frame buffer)", buffer_frames);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.live
            .as_ref()
            .map(|live| !live.sink.is_paused() && !live.worker.is_finished())
            .unwrap_or(false)
    }

    fn write(&mut self, chunk: &[f32]) -> Result<(), OutputError> {
        let period = self.chunk_period(chunk.len());
        let sample_rate = self.sample_rate;
        let live = self.live.as_ref().ok_or(OutputError::NotOpen)?;
        if live.worker.is_finished() {
            return Err(OutputError::Stream("device thread stopped".into()));
        }

        live.sink
            .append(SamplesBuffer::new(1, sample_rate, chunk.to_vec()));

        // Keep at most one chunk queued ahead of the one playing.
        let poll = (period / 4).max(Duration::from_millis(1));
        let deadline = Instant::now() + period * 2 + STALL_GRACE;
        wait_for_drain(
            || live.sink.len(),
            || !live.worker.is_finished(),
            poll,
            deadline,
        )
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if let Some(live) = self.live.take() {
            live.sink.stop();
            let _ = live.shutdown.send(());
            live.worker
                .join()
                .map_err(|_| OutputError::Stream("device thread panicked".into()))?;
            tracing::debug!("Closed rodio output");
        }
        Ok(())
    }
}

impl Drop for RodioOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unopened_output_is_inactive() {
        let mut output = RodioOutput::new();
        assert!(!output.is_active());
        assert!(matches!(output.write(&[0.0; 4]), Err(OutputError::NotOpen)));
        // Closing twice is fine.
        output.close().unwrap();
        output.close().unwrap();
    }

    #[test]
    fn test_drain_wait_returns_once_queue_drains() {
        let queued = std::cell::Cell::new(4usize);
        let result = wait_for_drain(
            || {
                queued.set(queued.get().saturating_sub(1));
                queued.get()
            },
            || true,
            Duration::from_millis(1),
            Instant::now() + Duration::from_secs(5),
        );
        assert!(result.is_ok());
        assert!(queued.get() <= 1);
    }

    #[test]
    fn test_drain_wait_gives_up_on_stalled_device() {
        let started = Instant::now();
        let result = wait_for_drain(
            || 3,
            || true,
            Duration::from_millis(1),
            started + Duration::from_millis(20),
        );
        assert!(matches!(result, Err(OutputError::Stream(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_drain_wait_detects_dead_device_thread() {
        let result = wait_for_drain(
            || 2,
            || false,
            Duration::from_millis(1),
            Instant::now() + Duration::from_secs(5),
        );
        assert!(matches!(result, Err(OutputError::Stream(msg)) if msg.contains("stopped")));
    }

    #[test]
    #[ignore] // Requires an audio device
    fn test_open_default_device() {
        let mut output = RodioOutput::new();
        output.open(44100, 1024).unwrap();
        assert!(output.is_active());
        output.write(&vec![0.0; 512]).unwrap();
        output.close().unwrap();
        assert!(!output.is_active());
    }
}
