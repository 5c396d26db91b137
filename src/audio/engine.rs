//! Playback controller.
//!
//! The public face of the engine. It owns the tone cache and the output
//! stream, validates and persists settings, and serializes playback: every
//! `play_*` call first cancels whatever is sounding, so at most one sound is
//! logically active at a time.
//!
//! `stop()` is advisory. It lowers the playing flag and waits a short,
//! bounded time for the background task; a task that is mid-chunk finishes
//! that chunk quietly, so a few milliseconds of overlap after `stop()` are
//! expected.

use crate::audio::cache::ToneCache;
use crate::audio::export::{export_song_to_wav, ExportSummary};
use crate::audio::output::{AudioOutput, RodioOutput};
use crate::audio::stream::{PlaybackTicket, StreamEngine, StreamState, WriteOutcome};
use crate::audio::synth::{NoiseSource, Synthesizer};
use crate::config::{EngineSettings, StreamConfig, MAX_DURATION, MAX_VOLUME, MIN_VOLUME, VOLUME_STEP};
use crate::error::{EngineError, Result};
use crate::music::{Basetone, Instrument, Note};
use crate::preferences::{NoPreferences, PreferenceStore, Preferences};
use crate::song::{Song, SongSummary};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Snapshot of the engine's settings and state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsSnapshot {
    pub sample_rate: u32,
    pub duration: f64,
    pub blocking: bool,
    pub instrument: Instrument,
    pub basetone: Basetone,
    pub volume: f32,
    pub is_playing: bool,
}

/// How [`PlaybackController::play_song`] ran the song.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SongPlayback {
    /// Played to completion (or until stopped) on the caller's thread.
    Finished(SongSummary),
    /// Running on a background task.
    Started,
}

/// Mutable settings, changed only through the controller's setters.
#[derive(Debug, Clone, Copy)]
struct Current {
    basetone: Basetone,
    instrument: Instrument,
    volume: f32,
    blocking: bool,
}

/// State shared with background playback and song tasks.
struct Shared {
    sample_rate: u32,
    duration: f64,
    stream_config: StreamConfig,
    cache: ToneCache,
    stream: StreamEngine,
    current: Mutex<Current>,
    playback_task: Mutex<Option<JoinHandle<()>>>,
    song_task: Mutex<Option<JoinHandle<SongSummary>>>,
    /// Bumped to cancel the running song.
    song_epoch: AtomicU64,
    preferences: Box<dyn PreferenceStore>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits up to `timeout` for a thread to finish. Returns its result if it
/// did; otherwise the thread is left to finish on its own.
fn join_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::debug!("Background task still running after {:?}, abandoning", timeout);
            return None;
        }
        thread::sleep(Duration::from_millis(1));
    }
    handle.join().ok()
}

fn validate_duration(duration: f64) -> Result<f64> {
    if duration > 0.0 && duration <= MAX_DURATION {
        Ok(duration)
    } else {
        Err(EngineError::InvalidDuration(duration))
    }
}

fn validate_volume(volume: f32) -> Result<f32> {
    if (MIN_VOLUME..=MAX_VOLUME).contains(&volume) {
        Ok(volume)
    } else {
        Err(EngineError::InvalidVolume(volume))
    }
}

impl Shared {
    fn current(&self) -> Current {
        *lock(&self.current)
    }

    /// Cancels the current sound and waits briefly for its task.
    fn stop_sound(&self, timeout: Duration) {
        self.stream.stop();
        let task = lock(&self.playback_task).take();
        if let Some(handle) = task {
            join_with_timeout(handle, timeout);
        }
    }

    /// Stop-then-play. Blocking plays on this thread; otherwise a playback
    /// task is started and this returns immediately.
    fn play_buffer(self: &Arc<Self>, buffer: Vec<f32>, blocking: bool) {
        self.stop_sound(self.stream_config.stop_timeout);
        let ticket = self.stream.begin();

        if blocking {
            self.write_blocking(ticket, &buffer);
            return;
        }

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let outcome = shared.stream.write(ticket, &buffer);
                shared.stream.finish(ticket);
                log_outcome(outcome);
            });
        match spawned {
            Ok(handle) => *lock(&self.playback_task) = Some(handle),
            Err(e) => {
                tracing::warn!("Failed to start playback task: {}", e);
                self.stream.finish(ticket);
            }
        }
    }

    fn write_blocking(&self, ticket: PlaybackTicket, buffer: &[f32]) -> WriteOutcome {
        let outcome = self.stream.write(ticket, buffer);
        self.stream.finish(ticket);
        log_outcome(outcome);
        outcome
    }

    /// Plays one song event on the calling thread unless the song was
    /// cancelled. Returns `None` if it was.
    ///
    /// The epoch is read after the ticket is taken, so a concurrent `stop()`
    /// is either seen here or lowers this ticket's playing flag.
    fn play_song_event(&self, buffer: &[f32], epoch: u64) -> Option<WriteOutcome> {
        self.stop_sound(self.stream_config.stop_timeout);
        let ticket = self.stream.begin();
        if self.song_epoch.load(Ordering::Acquire) != epoch {
            self.stream.finish(ticket);
            return None;
        }
        Some(self.write_blocking(ticket, buffer))
    }

    /// Plays every event of `song` in order until the end or until
    /// `song_epoch` moves past `epoch`.
    fn run_song(&self, song: &Song, epoch: u64) -> SongSummary {
        let mut summary = SongSummary {
            title: song.title.clone(),
            ..SongSummary::default()
        };

        for (i, event) in song.notes.iter().enumerate() {
            if self.song_epoch.load(Ordering::Acquire) != epoch {
                summary.cancelled = true;
                break;
            }
            let resolved = match event.resolve() {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!("Skipping invalid note at position {}: {}", i, e);
                    summary.skipped += 1;
                    continue;
                }
            };

            // Events sound in the song's key; the engine's own basetone is untouched.
            let current = self.current();
            match resolved.render(&self.cache, song.basetone, current.instrument, current.volume) {
                Ok(buffer) => match self.play_song_event(&buffer, epoch) {
                    None => {
                        summary.cancelled = true;
                        break;
                    }
                    // Cut off by stop() or by a note played over the song.
                    Some(WriteOutcome::Cancelled { .. }) => {}
                    Some(_) => summary.played += 1,
                },
                Err(e) => {
                    tracing::warn!("Error playing note/chord at position {}: {}", i, e);
                    summary.skipped += 1;
                }
            }
        }
        if self.song_epoch.load(Ordering::Acquire) != epoch {
            summary.cancelled = true;
        }

        if summary.cancelled {
            tracing::info!("Song stopped: {}", summary.title);
        } else {
            tracing::info!("Song finished: {}", summary.title);
        }
        summary
    }

    fn persist(&self) {
        let current = self.current();
        let preferences = Preferences {
            instrument: current.instrument,
            basetone: current.basetone,
            volume: current.volume,
        };
        if let Err(e) = self.preferences.save(&preferences) {
            tracing::warn!("Failed to save preferences: {}", e);
        }
    }
}

fn log_outcome(outcome: WriteOutcome) {
    match outcome {
        WriteOutcome::Completed { .. } | WriteOutcome::Cancelled { .. } => {}
        WriteOutcome::Failed { samples } => {
            tracing::warn!("Playback aborted after {} samples", samples)
        }
        WriteOutcome::Skipped => tracing::warn!("Audio stream not available, playback skipped"),
    }
}

/// Plays notes, chords and songs through a persistent output stream.
pub struct PlaybackController {
    shared: Arc<Shared>,
}

impl PlaybackController {
    /// Creates an engine on the default audio device.
    pub fn with_default_output(settings: EngineSettings) -> Result<Self> {
        Self::new(settings, Box::new(RodioOutput::new()))
    }

    /// Creates an engine on the given output backend without persisting
    /// preferences.
    pub fn new(settings: EngineSettings, output: Box<dyn AudioOutput>) -> Result<Self> {
        Self::with_preferences(settings, output, Box::new(NoPreferences))
    }

    /// Creates an engine.
    ///
    /// Validates the settings, builds the tone cache (blocking until it is
    /// complete) and opens the output stream. A missing audio device is not
    /// an error: the engine is still returned and playback stays silent
    /// until a device becomes reachable.
    ///
    /// # Errors
    ///
    /// `InvalidInstrument`, `InvalidBasetone`, `InvalidVolume` or
    /// `InvalidDuration` for bad settings; no engine is produced.
    pub fn with_preferences(
        settings: EngineSettings,
        output: Box<dyn AudioOutput>,
        preferences: Box<dyn PreferenceStore>,
    ) -> Result<Self> {
        let instrument: Instrument = settings.instrument.parse()?;
        let basetone: Basetone = settings.basetone.parse()?;
        let volume = validate_volume(settings.volume)?;
        let duration = validate_duration(settings.duration)?;

        let noise = match settings.breath_seed {
            Some(seed) => NoiseSource::Seeded(seed),
            None => NoiseSource::Entropy,
        };
        let synth = Synthesizer::new(settings.sample_rate, noise);
        let cache = ToneCache::build(synth, duration, settings.cache_policy, basetone);

        let stream = StreamEngine::new(output, settings.sample_rate, settings.stream.clone());
        if let Err(e) = stream.open() {
            tracing::warn!("Audio system not available: {}", e);
        }

        let shared = Arc::new(Shared {
            sample_rate: settings.sample_rate,
            duration,
            stream_config: settings.stream,
            cache,
            stream,
            current: Mutex::new(Current {
                basetone,
                instrument,
                volume,
                blocking: settings.blocking,
            }),
            playback_task: Mutex::new(None),
            song_task: Mutex::new(None),
            song_epoch: AtomicU64::new(0),
            preferences,
        });
        Ok(Self { shared })
    }

    /// Sets the basetone for subsequent notes.
    pub fn set_basetone(&self, basetone: &str) -> Result<()> {
        let basetone: Basetone = basetone.parse()?;
        let old = {
            let mut current = lock(&self.shared.current);
            std::mem::replace(&mut current.basetone, basetone)
        };
        self.shared.persist();
        tracing::info!("Basetone changed from {} to {}", old, basetone);
        Ok(())
    }

    /// Sets the instrument for subsequent notes.
    pub fn set_instrument(&self, instrument: &str) -> Result<()> {
        let instrument: Instrument = instrument.parse()?;
        let old = {
            let mut current = lock(&self.shared.current);
            std::mem::replace(&mut current.instrument, instrument)
        };
        self.shared.persist();
        tracing::info!("Instrument changed from {} to {}", old, instrument);
        Ok(())
    }

    /// Sets the master volume (0.0 to 1.0).
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let volume = validate_volume(volume)?;
        let old = {
            let mut current = lock(&self.shared.current);
            std::mem::replace(&mut current.volume, volume)
        };
        self.shared.persist();
        tracing::info!("Volume changed from {:.2} to {:.2}", old, volume);
        Ok(())
    }

    /// Switches between synchronous and background playback.
    pub fn set_blocking(&self, blocking: bool) {
        lock(&self.shared.current).blocking = blocking;
    }

    /// Raises the volume by one step, clamped to 1.0. Returns the new volume.
    pub fn volume_up(&self) -> Result<f32> {
        self.adjust_volume(VOLUME_STEP)
    }

    /// Lowers the volume by one step, clamped to 0.0. Returns the new volume.
    pub fn volume_down(&self) -> Result<f32> {
        self.adjust_volume(-VOLUME_STEP)
    }

    fn adjust_volume(&self, delta: f32) -> Result<f32> {
        let volume = (self.shared.current().volume + delta).clamp(MIN_VOLUME, MAX_VOLUME);
        self.set_volume(volume)?;
        Ok(volume)
    }

    /// Current settings and playing state.
    pub fn settings(&self) -> SettingsSnapshot {
        let current = self.shared.current();
        SettingsSnapshot {
            sample_rate: self.shared.sample_rate,
            duration: self.shared.duration,
            blocking: current.blocking,
            instrument: current.instrument,
            basetone: current.basetone,
            volume: current.volume,
            is_playing: self.is_playing(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.shared.stream.is_playing()
    }

    /// Waits up to `timeout` for background playback to end. Returns false
    /// if something is still sounding.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let task_done = lock(&self.shared.playback_task)
                .as_ref()
                .map_or(true, JoinHandle::is_finished);
            if task_done && !self.is_playing() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn stream_state(&self) -> StreamState {
        self.shared.stream.state()
    }

    /// Whether the output stream can play right now, and why not.
    pub fn stream_health(&self) -> Result<()> {
        self.shared.stream.check()
    }

    /// True once the stream's failure budget is spent.
    pub fn is_degraded(&self) -> bool {
        self.shared.stream.is_degraded()
    }

    /// Clears the stream's failure counter so playback is attempted again.
    pub fn reset_stream_errors(&self) {
        self.shared.stream.reset_errors();
    }

    /// The tone cache backing this engine.
    pub fn cache(&self) -> &ToneCache {
        &self.shared.cache
    }

    fn resolve_duration(&self, duration: Option<f64>) -> Result<f64> {
        validate_duration(duration.unwrap_or(self.shared.duration))
    }

    /// Renders a note with the current settings without playing it.
    pub fn note_buffer(&self, note: &str, duration: Option<f64>) -> Result<Vec<f32>> {
        let note: Note = note.parse()?;
        let duration = self.resolve_duration(duration)?;
        let current = self.shared.current();
        Ok(self.shared.cache.lookup(
            current.basetone,
            note,
            current.instrument,
            duration,
            current.volume,
        ))
    }

    /// Renders a chord with the current settings without playing it.
    pub fn chord_buffer<S: AsRef<str>>(&self, notes: &[S], duration: Option<f64>) -> Result<Vec<f32>> {
        let notes = notes
            .iter()
            .map(|n| n.as_ref().parse::<Note>())
            .collect::<Result<Vec<_>>>()?;
        let duration = self.resolve_duration(duration)?;
        let current = self.shared.current();
        self.shared.cache.chord(
            current.basetone,
            &notes,
            current.instrument,
            duration,
            current.volume,
        )
    }

    /// Plays a note in the current basetone and instrument.
    ///
    /// Stops any sound in flight first. Uses the tone cache when `duration`
    /// is the engine default.
    ///
    /// # Errors
    ///
    /// `InvalidNote` or `InvalidDuration`. Device problems are logged, not
    /// returned.
    pub fn play_note(&self, note: &str, duration: Option<f64>) -> Result<()> {
        let buffer = self.note_buffer(note, duration)?;
        tracing::debug!(
            "Playing note: {} (duration: {}s, instrument: {})",
            note,
            duration.unwrap_or(self.shared.duration),
            self.shared.current().instrument
        );
        self.play(buffer);
        Ok(())
    }

    /// Plays several notes at once. The mix is averaged and scaled by 0.8 so
    /// it never peaks above a single note.
    ///
    /// # Errors
    ///
    /// `EmptyChord`, `InvalidNote` or `InvalidDuration`.
    pub fn play_chord<S: AsRef<str>>(&self, notes: &[S], duration: Option<f64>) -> Result<()> {
        let buffer = self.chord_buffer(notes, duration)?;
        tracing::debug!(
            "Playing chord: {:?} (instrument: {})",
            notes.iter().map(|n| n.as_ref()).collect::<Vec<_>>(),
            self.shared.current().instrument
        );
        self.play(buffer);
        Ok(())
    }

    /// Plays an arbitrary frequency with the current instrument.
    ///
    /// # Errors
    ///
    /// `InvalidFrequency` unless `hz` is finite and positive,
    /// `InvalidDuration` for a bad duration.
    pub fn play_frequency(&self, hz: f64, duration: Option<f64>) -> Result<()> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(EngineError::InvalidFrequency(hz));
        }
        let duration = self.resolve_duration(duration)?;
        let current = self.shared.current();
        let buffer = self.shared.cache.lookup_frequency(
            current.basetone,
            hz,
            current.instrument,
            duration,
            current.volume,
        );
        self.play(buffer);
        Ok(())
    }

    fn play(&self, buffer: Vec<f32>) {
        let blocking = self.shared.current().blocking;
        self.shared.play_buffer(buffer, blocking);
    }

    /// Stops the current sound and any running song.
    ///
    /// Lowers the playing flag and waits up to the configured stop timeout
    /// for the playback task. Returns without guaranteeing the task exited.
    pub fn stop(&self) {
        self.shared.song_epoch.fetch_add(1, Ordering::AcqRel);
        self.shared.stop_sound(self.shared.stream_config.stop_timeout);
    }

    /// Loads and plays a song file.
    ///
    /// # Errors
    ///
    /// `SongNotFound` or `SongParse`. Bad individual events are skipped.
    pub fn play_song<P: AsRef<Path>>(&self, path: P, blocking: bool) -> Result<SongPlayback> {
        let song = Song::load(path)?;
        Ok(self.play_loaded_song(song, blocking))
    }

    /// Plays an already-loaded song, replacing any song in progress.
    pub fn play_loaded_song(&self, song: Song, blocking: bool) -> SongPlayback {
        let epoch = self.shared.song_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.stop_sound(self.shared.stream_config.stop_timeout);
        let previous = lock(&self.shared.song_task).take();
        if let Some(handle) = previous {
            join_with_timeout(handle, self.shared.stream_config.stop_timeout);
        }

        tracing::info!(
            "Playing: {} (key: {} major, {} notes/chords)",
            song.title,
            song.basetone,
            song.notes.len()
        );

        if blocking {
            return SongPlayback::Finished(self.shared.run_song(&song, epoch));
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("song".into())
            .spawn(move || shared.run_song(&song, epoch));
        match spawned {
            Ok(handle) => {
                *lock(&self.shared.song_task) = Some(handle);
                SongPlayback::Started
            }
            Err(e) => {
                tracing::warn!("Failed to start song task: {}", e);
                SongPlayback::Finished(SongSummary::default())
            }
        }
    }

    /// Waits up to `timeout` for a background song to finish.
    pub fn wait_for_song(&self, timeout: Duration) -> Option<SongSummary> {
        let handle = lock(&self.shared.song_task).take()?;
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                *lock(&self.shared.song_task) = Some(handle);
                return None;
            }
            thread::sleep(Duration::from_millis(1));
        }
        handle.join().ok()
    }

    /// Renders a song to a WAV file with the current instrument and volume.
    pub fn export_song<P: AsRef<Path>>(&self, song: &Song, path: P) -> Result<ExportSummary> {
        let current = self.shared.current();
        export_song_to_wav(
            song,
            &self.shared.cache,
            current.instrument,
            current.volume,
            path,
            None::<fn(f32)>,
        )
    }

    /// Regenerates cached tones for one instrument (or all of them).
    /// Returns the number of tones regenerated.
    pub fn regenerate_cache(&self, instrument: Option<&str>) -> Result<usize> {
        let instrument = instrument.map(str::parse::<Instrument>).transpose()?;
        Ok(self.shared.cache.invalidate(instrument))
    }

    /// Stops playback, waits briefly for background tasks and releases the
    /// audio device. Idempotent.
    pub fn close(&self) {
        self.stop();
        let timeout = self.shared.stream_config.close_timeout;
        let playback = lock(&self.shared.playback_task).take();
        if let Some(handle) = playback {
            join_with_timeout(handle, timeout);
        }
        let song = lock(&self.shared.song_task).take();
        if let Some(handle) = song {
            join_with_timeout(handle, timeout);
        }
        self.shared.stream.close();
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.close();
    }
}
