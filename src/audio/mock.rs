//! In-memory output backend for tests and device-less runs.
//!
//! A [`MockOutput`] records everything written to it. Its paired
//! [`MockHandle`] inspects the recording and scripts failures: unreachable
//! devices, rejected buffer sizes, failing writes, streams going inactive
//! and slow writes that imitate a real-time device.

use super::output::{AudioOutput, OutputError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    open: bool,
    active: bool,
    unreachable: bool,
    min_buffer: u32,
    failing_opens: u32,
    fail_writes_after: Option<usize>,
    write_delay: Duration,
    open_attempts: Vec<u32>,
    opened_with: Option<(u32, u32)>,
    opens: usize,
    closes: usize,
    chunks: usize,
    samples: Vec<f32>,
}

/// Recording output backend.
#[derive(Debug, Clone, Default)]
pub struct MockOutput {
    state: Arc<Mutex<MockState>>,
}

/// Inspection and scripting handle for a [`MockOutput`].
#[derive(Debug, Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockOutput {
    /// Creates a backend that accepts any buffer size and never fails.
    pub fn new() -> (Self, MockHandle) {
        let output = Self::default();
        let handle = MockHandle {
            state: Arc::clone(&output.state),
        };
        (output, handle)
    }
}

impl AudioOutput for MockOutput {
    fn open(&mut self, sample_rate: u32, buffer_frames: u32) -> Result<(), OutputError> {
        let mut state = lock(&self.state);
        state.open_attempts.push(buffer_frames);
        if state.unreachable {
            return Err(OutputError::DeviceNotFound("mock device unplugged".into()));
        }
        if buffer_frames < state.min_buffer {
            return Err(OutputError::UnsupportedConfig(format!(
                "buffer {} below {}",
                buffer_frames, state.min_buffer
            )));
        }
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(OutputError::Stream("mock open failure".into()));
        }
        state.open = true;
        state.active = true;
        state.opens += 1;
        state.opened_with = Some((sample_rate, buffer_frames));
        Ok(())
    }

    fn is_active(&self) -> bool {
        let state = lock(&self.state);
        state.open && state.active
    }

    fn write(&mut self, chunk: &[f32]) -> Result<(), OutputError> {
        let delay = {
            let mut state = lock(&self.state);
            if !state.open {
                return Err(OutputError::NotOpen);
            }
            if let Some(limit) = state.fail_writes_after {
                if state.chunks >= limit {
                    return Err(OutputError::Stream("mock write failure".into()));
                }
            }
            state.chunks += 1;
            state.samples.extend_from_slice(chunk);
            state.write_delay
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        let mut state = lock(&self.state);
        if state.open {
            state.open = false;
            state.active = false;
            state.closes += 1;
        }
        Ok(())
    }
}

impl MockHandle {
    /// Makes every open fail as if no device exists.
    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    /// Rejects buffer sizes below `frames`.
    pub fn set_min_buffer(&self, frames: u32) {
        lock(&self.state).min_buffer = frames;
    }

    /// Fails the next `count` otherwise-acceptable opens.
    pub fn fail_next_opens(&self, count: u32) {
        lock(&self.state).failing_opens = count;
    }

    /// Fails every write once `chunks` chunks have been written in total.
    pub fn fail_writes_after(&self, chunks: Option<usize>) {
        lock(&self.state).fail_writes_after = chunks;
    }

    /// Sleeps this long inside each chunk write.
    pub fn set_write_delay(&self, delay: Duration) {
        lock(&self.state).write_delay = delay;
    }

    /// Simulates the device stopping underneath an open stream.
    pub fn set_active(&self, active: bool) {
        lock(&self.state).active = active;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Buffer sizes passed to every open attempt, in order.
    pub fn open_attempts(&self) -> Vec<u32> {
        lock(&self.state).open_attempts.clone()
    }

    /// `(sample_rate, buffer_frames)` of the last successful open.
    pub fn opened_with(&self) -> Option<(u32, u32)> {
        lock(&self.state).opened_with
    }

    pub fn opens(&self) -> usize {
        lock(&self.state).opens
    }

    pub fn closes(&self) -> usize {
        lock(&self.state).closes
    }

    /// Number of chunks written.
    pub fn chunks(&self) -> usize {
        lock(&self.state).chunks
    }

    /// Copy of every sample written.
    pub fn samples(&self) -> Vec<f32> {
        lock(&self.state).samples.clone()
    }

    pub fn sample_count(&self) -> usize {
        lock(&self.state).samples.len()
    }

    /// Forgets recorded samples and chunk counts.
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.samples.clear();
        state.chunks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_writes() {
        let (mut output, handle) = MockOutput::new();
        output.open(8000, 512).unwrap();
        output.write(&[0.1, 0.2]).unwrap();
        output.write(&[0.3]).unwrap();
        assert_eq!(handle.samples(), vec![0.1, 0.2, 0.3]);
        assert_eq!(handle.chunks(), 2);
        assert_eq!(handle.opened_with(), Some((8000, 512)));
    }

    #[test]
    fn test_scripted_failures() {
        let (mut output, handle) = MockOutput::new();
        handle.set_min_buffer(1024);
        assert!(matches!(
            output.open(8000, 512),
            Err(OutputError::UnsupportedConfig(_))
        ));
        output.open(8000, 1024).unwrap();

        handle.fail_writes_after(Some(1));
        output.write(&[0.0]).unwrap();
        assert!(output.write(&[0.0]).is_err());

        handle.set_active(false);
        assert!(!output.is_active());

        output.close().unwrap();
        output.close().unwrap();
        assert_eq!(handle.closes(), 1);
        assert!(matches!(output.write(&[0.0]), Err(OutputError::NotOpen)));
    }
}
