//! Precomputed tone cache.
//!
//! Tones are generated once for the engine's default duration and served by
//! copy, so callers can never alias or corrupt cached memory. Entries are
//! stored at unit volume and scaled on the way out, which keeps them valid
//! across volume changes.
//!
//! Enharmonic spellings (`#4` / `b5`) share an entry since they resolve to
//! the same frequency.

use super::synth::Synthesizer;
use crate::config::CachePolicy;
use crate::error::{EngineError, Result};
use crate::music::{frequency, note_for_frequency, Basetone, Instrument, Note};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use std::time::Instant;

/// Gain applied after averaging the notes of a chord.
pub const CHORD_GAIN: f32 = 0.8;

/// Lowest and highest semitone offsets in the note vocabulary.
const OFFSETS: std::ops::RangeInclusive<i32> = -12..=23;

type CacheKey = (Basetone, i32, Instrument);

/// Tone cache keyed by (basetone, note, instrument).
pub struct ToneCache {
    synth: Synthesizer,
    duration: f64,
    policy: CachePolicy,
    entries: RwLock<HashMap<CacheKey, Vec<f32>>>,
    populated: RwLock<HashSet<Basetone>>,
}

impl ToneCache {
    /// Builds the cache. Blocks until generation is complete.
    ///
    /// # Arguments
    ///
    /// * `synth` - Synthesizer used for entries and cache misses
    /// * `duration` - The only duration that is cached
    /// * `policy` - `Eager` fills every basetone now, `Lazy` only `initial`
    /// * `initial` - The basetone the engine starts in
    pub fn build(synth: Synthesizer, duration: f64, policy: CachePolicy, initial: Basetone) -> Self {
        let cache = Self {
            synth,
            duration,
            policy,
            entries: RwLock::new(HashMap::new()),
            populated: RwLock::new(HashSet::new()),
        };
        let basetones: Vec<Basetone> = match policy {
            CachePolicy::Eager => Basetone::ALL.to_vec(),
            CachePolicy::Lazy => vec![initial],
        };

        tracing::info!("Starting waveform pre-generation for instant playback");
        let started = Instant::now();
        cache.populate(&basetones, &Instrument::ALL);
        tracing::info!(
            "Cached {} instrument sounds ({} basetones x {} notes x {} instruments) in {:?}",
            cache.len(),
            basetones.len(),
            OFFSETS.count(),
            Instrument::ALL.len(),
            started.elapsed()
        );
        cache
    }

    /// Duration (seconds) of cached tones.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn synth(&self) -> &Synthesizer {
        &self.synth
    }

    /// Number of stored tones.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a tone for this combination is stored.
    pub fn contains(&self, basetone: Basetone, note: Note, instrument: Instrument) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(basetone, note.semitone_offset(), instrument))
    }

    /// Whether `basetone` has been generated.
    pub fn is_populated(&self, basetone: Basetone) -> bool {
        self.populated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&basetone)
    }

    /// Generates every note of `basetones` for `instruments` in parallel and
    /// stores the results.
    fn populate(&self, basetones: &[Basetone], instruments: &[Instrument]) {
        let keys: Vec<CacheKey> = basetones
            .iter()
            .flat_map(|&b| {
                OFFSETS.flat_map(move |offset| instruments.iter().map(move |&i| (b, offset, i)))
            })
            .collect();

        let generated: Vec<(CacheKey, Vec<f32>)> = keys
            .into_par_iter()
            .map(|key| {
                let (basetone, offset, instrument) = key;
                let hz = basetone.reference_frequency() * 2f64.powf(offset as f64 / 12.0);
                (key, self.synth.synthesize(hz, self.duration, instrument, 1.0))
            })
            .collect();

        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(generated);
        self.populated
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(basetones.iter().copied());
    }

    fn cached(&self, key: &CacheKey, volume: f32) -> Option<Vec<f32>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|tone| tone.iter().map(|s| s * volume).collect())
    }

    /// Returns a tone, from the cache when possible.
    ///
    /// Durations other than the cached one are synthesized on demand and not
    /// stored. Under the lazy policy an unseen basetone is generated in full
    /// on its first lookup.
    pub fn lookup(
        &self,
        basetone: Basetone,
        note: Note,
        instrument: Instrument,
        duration: f64,
        volume: f32,
    ) -> Vec<f32> {
        if duration == self.duration {
            let key = (basetone, note.semitone_offset(), instrument);
            if let Some(tone) = self.cached(&key, volume) {
                return tone;
            }
            if self.policy == CachePolicy::Lazy && !self.is_populated(basetone) {
                tracing::debug!("Generating tones for basetone {}", basetone);
                self.populate(&[basetone], &Instrument::ALL);
                if let Some(tone) = self.cached(&key, volume) {
                    return tone;
                }
            }
            tracing::debug!("Cache miss for {} in {} ({})", note, basetone, instrument);
        }
        self.synth
            .synthesize(frequency(note, basetone), duration, instrument, volume)
    }

    /// Returns a tone for an arbitrary frequency. Frequencies within 0.01 Hz
    /// of a note of `basetone` are served from the cache.
    pub fn lookup_frequency(
        &self,
        basetone: Basetone,
        hz: f64,
        instrument: Instrument,
        duration: f64,
        volume: f32,
    ) -> Vec<f32> {
        if duration == self.duration {
            if let Some(note) = note_for_frequency(hz, basetone) {
                return self.lookup(basetone, note, instrument, duration, volume);
            }
        }
        self.synth.synthesize(hz, duration, instrument, volume)
    }

    /// Mixes the notes of a chord: tones are summed, averaged and scaled by
    /// [`CHORD_GAIN`], so the mix never peaks above a single note.
    ///
    /// # Errors
    ///
    /// `EmptyChord` if `notes` is empty.
    pub fn chord(
        &self,
        basetone: Basetone,
        notes: &[Note],
        instrument: Instrument,
        duration: f64,
        volume: f32,
    ) -> Result<Vec<f32>> {
        if notes.is_empty() {
            return Err(EngineError::EmptyChord);
        }
        let mut mixed = vec![0.0f32; self.synth.sample_count(duration)];
        for &note in notes {
            let tone = self.lookup(basetone, note, instrument, duration, volume);
            for (out, sample) in mixed.iter_mut().zip(tone) {
                *out += sample;
            }
        }
        let scale = CHORD_GAIN / notes.len() as f32;
        mixed.iter_mut().for_each(|s| *s *= scale);
        Ok(mixed)
    }

    /// Drops cached tones for `instrument` (or every instrument) and
    /// regenerates them for the basetones generated so far. Meant for
    /// explicit recipe updates, not normal playback.
    ///
    /// # Returns
    ///
    /// The number of tones regenerated.
    pub fn invalidate(&self, instrument: Option<Instrument>) -> usize {
        let instruments: Vec<Instrument> = match instrument {
            Some(i) => vec![i],
            None => Instrument::ALL.to_vec(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(_, _, i), _| !instruments.contains(i));

        let basetones: Vec<Basetone> = self
            .populated
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        self.populate(&basetones, &instruments);

        let regenerated = basetones.len() * OFFSETS.count() * instruments.len();
        tracing::info!("Regenerated {} cached tones", regenerated);
        regenerated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::synth::{peak, NoiseSource};

    const RATE: u32 = 4000;
    const DURATION: f64 = 0.05;

    fn synth() -> Synthesizer {
        Synthesizer::new(RATE, NoiseSource::Entropy)
    }

    fn note(symbol: &str) -> Note {
        symbol.parse().unwrap()
    }

    #[test]
    fn test_eager_build_covers_everything() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Eager, Basetone::C);
        assert_eq!(cache.len(), 12 * 36 * 4);
        for basetone in Basetone::ALL {
            for n in Note::all() {
                for instrument in Instrument::ALL {
                    assert!(cache.contains(basetone, n, instrument));
                }
            }
        }
    }

    #[test]
    fn test_lookup_matches_direct_synthesis() {
        let synth = synth();
        let cache = ToneCache::build(synth.clone(), DURATION, CachePolicy::Eager, Basetone::C);
        for instrument in Instrument::ALL {
            let cached = cache.lookup(Basetone::D, note("^3"), instrument, DURATION, 0.7);
            let direct = synth.synthesize(
                frequency(note("^3"), Basetone::D),
                DURATION,
                instrument,
                0.7,
            );
            assert_eq!(cached.len(), direct.len());
            assert!((peak(&cached) - peak(&direct)).abs() < 1e-4, "{instrument}");
        }
    }

    #[test]
    fn test_lookup_returns_independent_copies() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let mut first = cache.lookup(Basetone::C, note("1"), Instrument::Piano, DURATION, 1.0);
        let original = first.clone();
        first.iter_mut().for_each(|s| *s = 0.0);
        let second = cache.lookup(Basetone::C, note("1"), Instrument::Piano, DURATION, 1.0);
        assert_eq!(second, original);
    }

    #[test]
    fn test_lookup_scales_with_volume() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let full = peak(&cache.lookup(Basetone::C, note("5"), Instrument::Guitar, DURATION, 0.7));
        let half = peak(&cache.lookup(Basetone::C, note("5"), Instrument::Guitar, DURATION, 0.35));
        assert!((full - 2.0 * half).abs() < 1e-5);
    }

    #[test]
    fn test_other_durations_are_not_cached() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let before = cache.len();
        let tone = cache.lookup(Basetone::C, note("1"), Instrument::Violin, 0.1, 1.0);
        assert_eq!(tone.len(), 400);
        assert_eq!(cache.len(), before);
    }

    #[test]
    fn test_lazy_populates_basetone_on_first_use() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::G);
        assert_eq!(cache.len(), 36 * 4);
        assert!(cache.is_populated(Basetone::G));
        assert!(!cache.is_populated(Basetone::A));

        cache.lookup(Basetone::A, note("1"), Instrument::Piano, DURATION, 1.0);
        assert!(cache.is_populated(Basetone::A));
        assert_eq!(cache.len(), 2 * 36 * 4);
    }

    #[test]
    fn test_enharmonic_spellings_share_tones() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let sharp = cache.lookup(Basetone::C, note("#4"), Instrument::Piano, DURATION, 1.0);
        let flat = cache.lookup(Basetone::C, note("b5"), Instrument::Piano, DURATION, 1.0);
        assert_eq!(sharp, flat);
    }

    #[test]
    fn test_chord_mix() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let notes = [note("1"), note("3"), note("5")];
        let chord = cache
            .chord(Basetone::C, &notes, Instrument::Piano, DURATION, 0.7)
            .unwrap();
        let single = cache.lookup(Basetone::C, note("1"), Instrument::Piano, DURATION, 0.7);
        assert_eq!(chord.len(), (RATE as f64 * DURATION) as usize);
        assert!(peak(&chord) <= peak(&single));

        assert!(matches!(
            cache.chord(Basetone::C, &[], Instrument::Piano, DURATION, 0.7),
            Err(EngineError::EmptyChord)
        ));
    }

    #[test]
    fn test_lookup_frequency_uses_cache_for_known_notes() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let hz = frequency(note("6"), Basetone::C);
        let by_freq = cache.lookup_frequency(Basetone::C, hz, Instrument::Piano, DURATION, 1.0);
        let by_note = cache.lookup(Basetone::C, note("6"), Instrument::Piano, DURATION, 1.0);
        assert_eq!(by_freq, by_note);

        let odd = cache.lookup_frequency(Basetone::C, 123.4, Instrument::Piano, DURATION, 1.0);
        assert_eq!(odd.len(), by_note.len());
    }

    #[test]
    fn test_invalidate_regenerates_matching_entries() {
        let cache = ToneCache::build(synth(), DURATION, CachePolicy::Lazy, Basetone::C);
        let before = cache.len();
        assert_eq!(cache.invalidate(Some(Instrument::Violin)), 36);
        assert_eq!(cache.len(), before);
        assert!(cache.contains(Basetone::C, note("1"), Instrument::Violin));

        assert_eq!(cache.invalidate(None), 36 * 4);
        assert_eq!(cache.len(), before);
    }
}
