//! Song export functionality.
//!
//! Renders a song offline through the tone cache and writes it to a WAV
//! file, without touching an audio device.

use crate::audio::cache::ToneCache;
use crate::error::{EngineError, Result};
use crate::music::Instrument;
use crate::song::{Song, SongSummary};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;

/// Samples converted and written per progress step.
const WRITE_BLOCK: usize = 4096;

/// What an export produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub song: SongSummary,
    pub samples: usize,
    pub seconds: f64,
}

/// Renders every playable event of `song` back to back.
///
/// Events are rendered in the song's own basetone with the given instrument
/// and volume. Malformed events are skipped with a warning, as in live
/// playback.
pub fn render_song(
    song: &Song,
    cache: &ToneCache,
    instrument: Instrument,
    volume: f32,
) -> (Vec<f32>, SongSummary) {
    let mut samples = Vec::new();
    let mut summary = SongSummary {
        title: song.title.clone(),
        ..SongSummary::default()
    };

    for (i, event) in song.notes.iter().enumerate() {
        let rendered = event
            .resolve()
            .map_err(|e| e.to_string())
            .and_then(|resolved| {
                resolved
                    .render(cache, song.basetone, instrument, volume)
                    .map_err(|e| e.to_string())
            });
        match rendered {
            Ok(buffer) => {
                samples.extend_from_slice(&buffer);
                summary.played += 1;
            }
            Err(e) => {
                tracing::warn!("Skipping note/chord at position {}: {}", i, e);
                summary.skipped += 1;
            }
        }
    }
    (samples, summary)
}

/// Exports a song to a 16-bit mono WAV file.
///
/// # Arguments
///
/// * `song` - The song to render
/// * `cache` - Tone source (its sample rate is the file's sample rate)
/// * `instrument` - Instrument to render with
/// * `volume` - Master volume in [0, 1]
/// * `output_path` - Path for the output WAV file
/// * `progress_callback` - Optional callback for progress updates (0.0 to 1.0)
///
/// # Errors
///
/// `Export` if the file cannot be created or written.
pub fn export_song_to_wav<P, F>(
    song: &Song,
    cache: &ToneCache,
    instrument: Instrument,
    volume: f32,
    output_path: P,
    mut progress_callback: Option<F>,
) -> Result<ExportSummary>
where
    P: AsRef<Path>,
    F: FnMut(f32),
{
    let sample_rate = cache.synth().sample_rate();
    let (samples, summary) = render_song(song, cache, instrument, volume);

    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(output_path.as_ref(), spec).map_err(|e| {
        EngineError::Export(format!(
            "failed to create {}: {}",
            output_path.as_ref().display(),
            e
        ))
    })?;

    let total = samples.len().max(1);
    let mut written = 0usize;
    for block in samples.chunks(WRITE_BLOCK) {
        for sample in block {
            // f32 (-1.0 to 1.0) to i16
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(value)
                .map_err(|e| EngineError::Export(e.to_string()))?;
        }
        written += block.len();
        if let Some(ref mut callback) = progress_callback {
            callback(written as f32 / total as f32);
        }
    }

    writer
        .finalize()
        .map_err(|e| EngineError::Export(format!("failed to finalize WAV file: {}", e)))?;

    tracing::info!(
        "Exported {} ({} events, {} skipped) to {}",
        summary.title,
        summary.played,
        summary.skipped,
        output_path.as_ref().display()
    );
    Ok(ExportSummary {
        samples: samples.len(),
        seconds: samples.len() as f64 / sample_rate as f64,
        song: summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synth::{NoiseSource, Synthesizer};
    use crate::config::CachePolicy;
    use crate::music::Basetone;
    use crate::song::SongEvent;

    fn cache() -> ToneCache {
        ToneCache::build(
            Synthesizer::new(8000, NoiseSource::Seeded(7)),
            0.25,
            CachePolicy::Lazy,
            Basetone::C,
        )
    }

    fn song() -> Song {
        let mut song = Song::new("Test", Basetone::D);
        song.notes.push(SongEvent::note("1", 0.25));
        song.notes.push(SongEvent::from(serde_json::json!({ "duration": 0.25 })));
        song.notes.push(SongEvent::chord(&["1", "3", "5"], 0.5));
        song
    }

    #[test]
    fn test_render_skips_bad_events() {
        let (samples, summary) = render_song(&song(), &cache(), Instrument::Piano, 0.7);
        assert_eq!(samples.len(), 2000 + 4000);
        assert_eq!(summary.played, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_export_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        let mut progress = Vec::new();

        let summary = export_song_to_wav(
            &song(),
            &cache(),
            Instrument::Violin,
            0.7,
            &path,
            Some(|p: f32| progress.push(p)),
        )
        .unwrap();
        assert_eq!(summary.samples, 6000);
        assert!((summary.seconds - 0.75).abs() < 1e-9);
        assert_eq!(progress.last().copied(), Some(1.0));

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.len(), 6000);
    }

    #[test]
    fn test_export_to_bad_path() {
        let result = export_song_to_wav(
            &song(),
            &cache(),
            Instrument::Piano,
            0.7,
            "/nonexistent-dir/out.wav",
            None::<fn(f32)>,
        );
        assert!(matches!(result, Err(EngineError::Export(_))));
    }
}
