//! pianocode - Play notes, chords and songs from the command line.
//!
//! # Usage
//!
//! ```bash
//! pianocode note 1 2 3 ^1                # a short scale fragment
//! pianocode -i violin -b G chord 1 3 5   # G major triad on violin
//! pianocode song songs/ode_to_joy.json    # play a song description
//! pianocode export songs/ode_to_joy.json ode.wav
//! pianocode devices                      # list output devices
//! ```
//!
//! Set `RUST_LOG=debug` for engine diagnostics.

use anyhow::{bail, Context, Result};
use pianocode::audio::cache::ToneCache;
use pianocode::audio::{export_song_to_wav, list_output_devices, NoiseSource, StreamState, Synthesizer};
use pianocode::config::CachePolicy;
use pianocode::{
    EngineSettings, Instrument, JsonPreferences, PlaybackController, PreferenceStore, Song,
    SongPlayback,
};
use std::path::{Path, PathBuf};

/// What to do once settings are in place.
enum Command {
    Note(Vec<String>),
    Chord(Vec<String>),
    Song(PathBuf),
    Export { song: PathBuf, output: PathBuf },
    Devices,
}

/// Command-line options for the application.
struct CliOptions {
    instrument: Option<String>,
    basetone: Option<String>,
    volume: Option<f32>,
    duration: Option<f64>,
    /// Preferences file to seed settings from and persist changes to.
    prefs: Option<PathBuf>,
    command: Command,
}

fn print_help(program: &str) {
    eprintln!("pianocode - Note synthesis and playback");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS] <COMMAND>", program);
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  note <SYMBOL>...          Play notes one after another");
    eprintln!("  chord <SYMBOL>...         Play notes together");
    eprintln!("  song <FILE>               Play a JSON song description");
    eprintln!("  export <FILE> <OUT.wav>   Render a song to a WAV file");
    eprintln!("  devices                   List audio output devices");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -i, --instrument NAME     piano, guitar, saxophone or violin");
    eprintln!("  -b, --basetone NAME       Key of degree 1 (C, C#, D, ... B)");
    eprintln!("  -v, --volume LEVEL        Master volume from 0.0 to 1.0");
    eprintln!("  -d, --duration SECONDS    Default note duration");
    eprintln!("      --prefs PATH          Load and save preferences in PATH");
    eprintln!("  -h, --help                Print this help message");
    eprintln!();
    eprintln!("Note symbols: 1-7 scale degrees, # or b for accidentals,");
    eprintln!(". prefix for the low octave, ^ prefix for the high octave.");
}

impl CliOptions {
    /// Parses command-line arguments. Options may appear before or after
    /// the command.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let program = args.first().map(String::as_str).unwrap_or("pianocode");
        let mut instrument = None;
        let mut basetone = None;
        let mut volume = None;
        let mut duration = None;
        let mut prefs = None;
        let mut positional: Vec<String> = Vec::new();
        let mut i = 1;

        let value = |i: usize, flag: &str| -> Result<String> {
            match args.get(i) {
                Some(v) => Ok(v.clone()),
                None => bail!("{} requires a value", flag),
            }
        };

        while i < args.len() {
            match args[i].as_str() {
                flag @ ("--instrument" | "-i") => {
                    i += 1;
                    instrument = Some(value(i, flag)?);
                }
                flag @ ("--basetone" | "-b") => {
                    i += 1;
                    basetone = Some(value(i, flag)?);
                }
                flag @ ("--volume" | "-v") => {
                    i += 1;
                    let raw = value(i, flag)?;
                    volume = Some(
                        raw.parse::<f32>()
                            .with_context(|| format!("invalid volume: {}", raw))?,
                    );
                }
                flag @ ("--duration" | "-d") => {
                    i += 1;
                    let raw = value(i, flag)?;
                    duration = Some(
                        raw.parse::<f64>()
                            .with_context(|| format!("invalid duration: {}", raw))?,
                    );
                }
                "--prefs" => {
                    i += 1;
                    prefs = Some(PathBuf::from(value(i, "--prefs")?));
                }
                "--help" | "-h" => {
                    print_help(program);
                    std::process::exit(0);
                }
                other if other.starts_with("--") => {
                    bail!("unknown option: {} (use --help for usage information)", other)
                }
                other => positional.push(other.to_string()),
            }
            i += 1;
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            Some("note") => Command::Note(positional.collect()),
            Some("chord") => Command::Chord(positional.collect()),
            Some("song") => match positional.next() {
                Some(path) => Command::Song(PathBuf::from(path)),
                None => bail!("song requires a file"),
            },
            Some("export") => match (positional.next(), positional.next()) {
                (Some(song), Some(output)) => Command::Export {
                    song: PathBuf::from(song),
                    output: PathBuf::from(output),
                },
                _ => bail!("export requires a song file and an output path"),
            },
            Some("devices") => Command::Devices,
            Some(other) => bail!("unknown command: {} (use --help for usage information)", other),
            None => {
                print_help(program);
                std::process::exit(1);
            }
        };

        if let Command::Note(symbols) | Command::Chord(symbols) = &command {
            if symbols.is_empty() {
                bail!("no note symbols given");
            }
        }

        Ok(Self {
            instrument,
            basetone,
            volume,
            duration,
            prefs,
            command,
        })
    }
}

/// Main entry point.
fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut settings = EngineSettings::default();
    let store = cli.prefs.as_ref().map(JsonPreferences::new);
    if let Some(store) = &store {
        if let Some(saved) = store.load().context("Failed to load preferences")? {
            saved.apply_to(&mut settings);
        }
    }
    if let Some(duration) = cli.duration {
        settings.duration = duration;
    }

    match cli.command {
        Command::Devices => list_devices(),
        Command::Export { ref song, ref output } => export(&cli, settings, song, output),
        _ => play(cli, settings, store),
    }
}

fn list_devices() -> Result<()> {
    let devices = list_output_devices().context("Failed to enumerate output devices")?;
    if devices.is_empty() {
        println!("No output devices found");
    }
    for device in devices {
        println!("{} ({} channels)", device.name, device.max_channels);
    }
    Ok(())
}

/// Renders a song offline; no audio device is opened.
fn export(cli: &CliOptions, settings: EngineSettings, song_path: &Path, output: &Path) -> Result<()> {
    let instrument: Instrument = cli
        .instrument
        .as_deref()
        .unwrap_or(&settings.instrument)
        .parse()?;
    let volume = cli.volume.unwrap_or(settings.volume);
    if !(0.0..=1.0).contains(&volume) {
        bail!(pianocode::EngineError::InvalidVolume(volume));
    }

    let song = Song::load(song_path)?;
    let noise = settings
        .breath_seed
        .map_or(NoiseSource::Entropy, NoiseSource::Seeded);
    let cache = ToneCache::build(
        Synthesizer::new(settings.sample_rate, noise),
        settings.duration,
        CachePolicy::Lazy,
        song.basetone,
    );

    let mut last_decile = 0;
    let summary = export_song_to_wav(
        &song,
        &cache,
        instrument,
        volume,
        output,
        Some(|progress: f32| {
            let decile = (progress * 10.0) as u32;
            if decile > last_decile {
                last_decile = decile;
                eprint!("\rExporting... {:3}%", decile * 10);
            }
        }),
    )
    .with_context(|| format!("Failed to export {}", song_path.display()))?;
    eprintln!();

    println!(
        "Exported \"{}\" to {} ({:.1}s, {} events, {} skipped)",
        summary.song.title,
        output.display(),
        summary.seconds,
        summary.song.played,
        summary.song.skipped
    );
    Ok(())
}

fn play(cli: CliOptions, settings: EngineSettings, store: Option<JsonPreferences>) -> Result<()> {
    let engine = match store {
        Some(store) => PlaybackController::with_preferences(
            settings,
            Box::new(pianocode::audio::RodioOutput::new()),
            Box::new(store) as Box<dyn PreferenceStore>,
        ),
        None => PlaybackController::with_default_output(settings),
    }
    .context("Failed to start audio engine")?;

    if engine.stream_state() != StreamState::Open {
        eprintln!("Warning: no audio device available, playback will be silent");
    }

    // Command-line settings go through the setters so they are validated
    // and, with --prefs, persisted.
    if let Some(instrument) = &cli.instrument {
        engine.set_instrument(instrument)?;
    }
    if let Some(basetone) = &cli.basetone {
        engine.set_basetone(basetone)?;
    }
    if let Some(volume) = cli.volume {
        engine.set_volume(volume)?;
    }
    engine.set_blocking(true);

    match cli.command {
        Command::Note(symbols) => {
            for symbol in &symbols {
                engine.play_note(symbol, None)?;
            }
        }
        Command::Chord(symbols) => engine.play_chord(&symbols, None)?,
        Command::Song(path) => {
            if let SongPlayback::Finished(summary) = engine.play_song(&path, true)? {
                println!(
                    "Played \"{}\": {} events, {} skipped",
                    summary.title, summary.played, summary.skipped
                );
            }
        }
        Command::Export { .. } | Command::Devices => {}
    }

    engine.close();
    Ok(())
}
