//! MIDI types shared by the session and the renderer.
//!
//! This module provides channel-addressed messages, validated channel
//! indices and the timeline that resolves a Standard MIDI File into
//! wall-clock timed events.

mod message;
mod timeline;

pub use message::{ChannelIndex, ChannelMessage};
pub use timeline::{TimedEvent, Timeline, TimelineError};

/// Number of channels addressable on one instance.
pub const CHANNEL_COUNT: usize = 16;

/// Bank number that selects percussion (drum kit) presets.
pub const PERCUSSION_BANK: u32 = 128;

/// Controller number for bank select (MSB).
pub const CC_BANK_SELECT: u8 = 0;

/// Controller number for the sustain pedal.
pub const CC_SUSTAIN: u8 = 64;

/// Controller number for "all sound off".
pub const CC_ALL_SOUND_OFF: u8 = 120;

/// Default tempo in microseconds per quarter note (120 BPM).
pub const DEFAULT_TEMPO_USEC: u32 = 500_000;
