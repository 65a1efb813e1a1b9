//! Synthesis engine boundary.
//!
//! The session talks to sample playback through two traits:
//! - [`SynthEngine`]: the process-wide engine handle that opens banks
//! - [`Renderer`]: one opened bank bound to sixteen channels
//!
//! [`SoundFontEngine`] implements them with rustysynth for synthesis and
//! rodio for audio output.

pub mod engine;
#[cfg(test)]
pub(crate) mod mock;
mod output;

pub use engine::SoundFontEngine;

use crate::midi::ChannelMessage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading a bank or one of its presets.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {}: {}", .path.display(), .source)]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid soundfont {}: {}", .path.display(), .reason)]
    InvalidBank { path: PathBuf, reason: String },

    #[error("failed to create synthesizer: {0}")]
    Synthesizer(String),

    #[error("bank {bank} program {program} is not present in the soundfont")]
    MissingPreset { bank: u32, program: u8 },

    #[error("channel {channel} only plays percussion banks, not bank {bank}")]
    PercussionOnly { channel: u8, bank: u32 },

    #[error("audio output unavailable: {0}")]
    Output(String),
}

/// The process-wide synthesis engine.
///
/// Opening a bank is expensive (sample decode) and may be called from
/// several threads at once.
pub trait SynthEngine: Send + Sync {
    /// Loads the bank at `bank_path` and returns a renderer bound to it.
    fn open(&self, bank_path: &Path) -> Result<Box<dyn Renderer>, LoadError>;

    /// Releases the engine. Renderers opened earlier go silent.
    fn shutdown(&self);
}

/// One loaded bank driving sixteen MIDI channels.
///
/// Dropping the renderer releases the bank.
pub trait Renderer: Send {
    /// Binds `channel` to the preset at (`bank`, `program`).
    ///
    /// Fails without changing the channel if the bank has no such preset,
    /// or if the channel cannot be bound to that bank at all.
    fn select_program(&mut self, channel: u8, bank: u32, program: u8) -> Result<(), LoadError>;

    /// Sends a channel voice message.
    fn process(&mut self, channel: u8, message: ChannelMessage);

    /// A channel that only plays percussion banks, if the renderer has one.
    ///
    /// Bank select on this channel addresses bank `value + 128`.
    fn drum_channel(&self) -> Option<u8> {
        None
    }
}
