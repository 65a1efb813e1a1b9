//! SoundFont synthesis engine.
//!
//! Each opened bank gets its own rustysynth synthesizer; all of them are
//! mixed into the single output stream owned by the engine.

use super::output::{AudioOutput, SynthSource};
use super::{LoadError, Renderer, SynthEngine};
use crate::config::SessionConfig;
use crate::midi::{ChannelMessage, CC_BANK_SELECT, PERCUSSION_BANK};
use parking_lot::Mutex;
use rustysynth::{SoundFont, Synthesizer};
use std::collections::HashSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// rustysynth treats this channel as percussion and offsets its bank by 128.
const RUSTYSYNTH_DRUM_CHANNEL: u8 = 9;

/// The production synthesis engine.
///
/// Channel 9 is drum-only: rustysynth adds 128 to every bank selected on it,
/// so only percussion banks (128 and up) can be bound there. Selecting a
/// melodic bank on channel 9 fails with [`LoadError::PercussionOnly`].
pub struct SoundFontEngine {
    config: SessionConfig,
    output: AudioOutput,
}

impl SoundFontEngine {
    /// Creates the engine and opens the default audio output.
    ///
    /// # Errors
    ///
    /// Returns error if audio output cannot be initialized.
    pub fn new(config: SessionConfig) -> Result<Self, LoadError> {
        let output = AudioOutput::open()?;
        Ok(Self { config, output })
    }

    /// Reads and parses a SoundFont file.
    fn read_soundfont(path: &Path) -> Result<Arc<SoundFont>, LoadError> {
        let file = File::open(path).map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);
        let soundfont = SoundFont::new(&mut reader).map_err(|e| LoadError::InvalidBank {
            path: path.to_path_buf(),
            reason: format!("{:?}", e),
        })?;
        Ok(Arc::new(soundfont))
    }
}

impl SynthEngine for SoundFontEngine {
    fn open(&self, bank_path: &Path) -> Result<Box<dyn Renderer>, LoadError> {
        let soundfont = Self::read_soundfont(bank_path)?;

        let presets: HashSet<(i32, i32)> = soundfont
            .get_presets()
            .iter()
            .map(|preset| (preset.get_bank_number(), preset.get_patch_number()))
            .collect();

        let settings = self.config.synthesizer_settings();
        let mut synth = Synthesizer::new(&soundfont, &settings)
            .map_err(|e| LoadError::Synthesizer(format!("{:?}", e)))?;
        synth.set_master_volume(self.config.gain);
        let synth = Arc::new(Mutex::new(synth));

        let closed = Arc::new(AtomicBool::new(false));
        self.output.attach(SynthSource::new(
            Arc::clone(&synth),
            Arc::clone(&closed),
            self.config.sample_rate,
            self.config.buffer_size,
        ))?;

        tracing::info!(
            "Opened SoundFont {:?} with {} presets",
            bank_path,
            presets.len()
        );

        Ok(Box::new(SoundFontRenderer {
            synth,
            presets,
            closed,
        }))
    }

    fn shutdown(&self) {
        self.output.close();
    }
}

/// One SoundFont bank bound to a synthesizer in the output mix.
struct SoundFontRenderer {
    synth: Arc<Mutex<Synthesizer>>,
    /// (bank, patch) pairs present in the SoundFont.
    presets: HashSet<(i32, i32)>,
    closed: Arc<AtomicBool>,
}

impl Renderer for SoundFontRenderer {
    fn select_program(&mut self, channel: u8, bank: u32, program: u8) -> Result<(), LoadError> {
        let bank_value = bank_select_value(channel, bank)
            .ok_or(LoadError::PercussionOnly { channel, bank })?;
        if !self.presets.contains(&(bank as i32, program as i32)) {
            return Err(LoadError::MissingPreset { bank, program });
        }

        let mut synth = self.synth.lock();
        // Bank select is CC 0, program change is MIDI command 0xC0
        synth.process_midi_message(channel as i32, 0xB0, CC_BANK_SELECT as i32, bank_value as i32);
        synth.process_midi_message(channel as i32, 0xC0, program as i32, 0);
        Ok(())
    }

    fn process(&mut self, channel: u8, message: ChannelMessage) {
        let (data1, data2) = message.data();
        let mut synth = self.synth.lock();
        match message {
            ChannelMessage::NoteOn { .. } => synth.note_on(channel as i32, data1 as i32, data2 as i32),
            ChannelMessage::NoteOff { .. } => synth.note_off(channel as i32, data1 as i32),
            _ => synth.process_midi_message(
                channel as i32,
                message.command() as i32,
                data1 as i32,
                data2 as i32,
            ),
        }
    }

    fn drum_channel(&self) -> Option<u8> {
        Some(RUSTYSYNTH_DRUM_CHANNEL)
    }
}

/// The bank select value that makes rustysynth bind `channel` to `bank`.
///
/// Returns `None` for a melodic bank on the drum channel, which rustysynth
/// would silently move up into the percussion range.
fn bank_select_value(channel: u8, bank: u32) -> Option<u32> {
    if channel != RUSTYSYNTH_DRUM_CHANNEL {
        Some(bank)
    } else {
        bank.checked_sub(PERCUSSION_BANK)
    }
}

impl Drop for SoundFontRenderer {
    fn drop(&mut self) {
        self.synth.lock().note_off_all(true);
        self.closed.store(true, Ordering::Release);
        tracing::debug!("Released SoundFont renderer");
    }
}
