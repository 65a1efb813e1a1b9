//! sfsession - Play SoundFont instruments and MIDI files from the terminal.
//!
//! Loads one SoundFont, then either plays a MIDI file through it and waits
//! for the file to finish, or plays a short scale to check the instrument.
//!
//! # Usage
//!
//! ```bash
//! sfsession piano.sf2                      # Play a C major scale
//! sfsession piano.sf2 --midi song.mid      # Play a file once
//! sfsession piano.sf2 --midi song.mid --loop
//! ```
//!
//! Set `RUST_LOG=info` to see session logging.

use anyhow::{bail, Context, Result};
use sfsession::{SessionConfig, SessionEvent, SessionManager, SoundFontEngine};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Keys of a C major scale starting at middle C.
const SCALE: [u8; 8] = [60, 62, 64, 65, 67, 69, 71, 72];

/// Command-line options for the application.
struct CliOptions {
    /// SoundFont to load.
    soundfont: PathBuf,
    /// MIDI file to play instead of the scale.
    midi: Option<PathBuf>,
    /// Loop the MIDI file until interrupted.
    looping: bool,
    /// JSON session configuration.
    config: Option<PathBuf>,
    bank: u32,
    program: u8,
}

impl CliOptions {
    /// Parses command-line arguments.
    ///
    /// Supports:
    /// - `<path>.sf2`: The SoundFont to load (required)
    /// - `--midi <path>` or `-m <path>`: Play a MIDI file
    /// - `--loop` or `-l`: Loop the MIDI file
    /// - `--config <path>` or `-c <path>`: Load settings from a JSON file
    /// - `--bank <n>` / `--program <n>`: Preset for every channel
    /// - `--help` or `-h`: Print help and exit
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut soundfont: Option<PathBuf> = None;
        let mut midi: Option<PathBuf> = None;
        let mut looping = false;
        let mut config: Option<PathBuf> = None;
        let mut bank = 0;
        let mut program = 0;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--midi" | "-m" => {
                    i += 1;
                    midi = Some(PathBuf::from(option_value(&args, i, "--midi")?));
                }
                "--loop" | "-l" => looping = true,
                "--config" | "-c" => {
                    i += 1;
                    config = Some(PathBuf::from(option_value(&args, i, "--config")?));
                }
                "--bank" => {
                    i += 1;
                    bank = option_value(&args, i, "--bank")?
                        .parse()
                        .context("--bank must be a number")?;
                }
                "--program" => {
                    i += 1;
                    program = option_value(&args, i, "--program")?
                        .parse()
                        .context("--program must be a number between 0 and 127")?;
                }
                "--help" | "-h" => {
                    eprintln!("sfsession - SoundFont session player");
                    eprintln!();
                    eprintln!(
                        "Usage: {} <SOUNDFONT> [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("sfsession")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -m, --midi PATH    Play a MIDI file");
                    eprintln!("  -l, --loop         Loop the MIDI file until interrupted");
                    eprintln!("  -c, --config PATH  Load session settings from a JSON file");
                    eprintln!("      --bank N       Bank for every channel (default 0)");
                    eprintln!("      --program N    Program for every channel (default 0)");
                    eprintln!("  -h, --help         Print this help message");
                    std::process::exit(0);
                }
                other => {
                    if other.ends_with(".sf2") && soundfont.is_none() {
                        soundfont = Some(PathBuf::from(other));
                    } else {
                        bail!("Unknown option: {} (use --help for usage information)", other);
                    }
                }
            }
            i += 1;
        }

        let Some(soundfont) = soundfont else {
            bail!("No SoundFont given (use --help for usage information)");
        };

        Ok(Self {
            soundfont,
            midi,
            looping,
            config,
            bank,
            program,
        })
    }
}

/// Returns the value following an option flag.
fn option_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a String> {
    args.get(i)
        .with_context(|| format!("{} requires an argument", flag))
}

/// Main entry point.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SessionConfig::default(),
    };

    let engine = SoundFontEngine::new(config.clone()).context("Failed to open audio output")?;
    let session = SessionManager::new(Arc::new(engine), config);

    let id = session
        .load_soundfont(cli.soundfont.clone(), cli.bank, cli.program)
        .await
        .with_context(|| format!("Failed to load SoundFont {:?}", cli.soundfont))?;

    match &cli.midi {
        Some(midi) => {
            session
                .play_midi_file(id, midi, cli.looping)
                .with_context(|| format!("Failed to play {:?}", midi))?;
            eprintln!("Playing {} (Ctrl+C to quit)", midi.display());

            let events = session.events();
            tokio::task::spawn_blocking(move || {
                while let Ok(event) = events.recv() {
                    let SessionEvent::PlaybackCompleted { instance } = event;
                    if instance == id {
                        break;
                    }
                }
            })
            .await
            .context("Event listener failed")?;
        }
        None => {
            for key in SCALE {
                session.play_note(id, 0, key, 100)?;
                thread::sleep(Duration::from_millis(300));
                session.stop_note(id, 0, key)?;
            }
            // Let the last note ring out.
            thread::sleep(Duration::from_millis(800));
        }
    }

    session.dispose()?;
    Ok(())
}
