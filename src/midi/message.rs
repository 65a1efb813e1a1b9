//! Channel-addressed MIDI messages and channel indices.

use super::CHANNEL_COUNT;
use std::fmt;

/// A validated MIDI channel number (0-15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelIndex(u8);

impl ChannelIndex {
    /// Returns the channel index if `channel` is in 0-15.
    pub fn new(channel: u8) -> Option<Self> {
        if (channel as usize) < CHANNEL_COUNT {
            Some(Self(channel))
        } else {
            None
        }
    }

    /// Returns the raw channel number.
    pub fn as_u8(&self) -> u8 {
        self.0
    }

    /// Iterates over all sixteen channels in order.
    pub fn all() -> impl Iterator<Item = ChannelIndex> {
        (0..CHANNEL_COUNT as u8).map(ChannelIndex)
    }
}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A MIDI channel voice message without its channel.
///
/// Data bytes are passed through as given; renderers mask them to the
/// 7-bit (or 14-bit for pitch bend) MIDI domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { program: u8 },
    /// 14-bit bend value, 8192 is centered.
    PitchBend { value: u16 },
    ChannelPressure { pressure: u8 },
    KeyPressure { key: u8, pressure: u8 },
}

impl ChannelMessage {
    /// Returns the status nibble (command without channel) for this message.
    pub fn command(&self) -> u8 {
        match self {
            ChannelMessage::NoteOff { .. } => 0x80,
            ChannelMessage::NoteOn { .. } => 0x90,
            ChannelMessage::KeyPressure { .. } => 0xA0,
            ChannelMessage::ControlChange { .. } => 0xB0,
            ChannelMessage::ProgramChange { .. } => 0xC0,
            ChannelMessage::ChannelPressure { .. } => 0xD0,
            ChannelMessage::PitchBend { .. } => 0xE0,
        }
    }

    /// Returns the two data bytes, masked to 7 bits. Unused bytes are 0.
    pub fn data(&self) -> (u8, u8) {
        let (d1, d2) = match *self {
            ChannelMessage::NoteOn { key, velocity } => (key, velocity),
            ChannelMessage::NoteOff { key } => (key, 0),
            ChannelMessage::KeyPressure { key, pressure } => (key, pressure),
            ChannelMessage::ControlChange { controller, value } => (controller, value),
            ChannelMessage::ProgramChange { program } => (program, 0),
            ChannelMessage::ChannelPressure { pressure } => (pressure, 0),
            // LSB first, then MSB
            ChannelMessage::PitchBend { value } => ((value & 0x7F) as u8, (value >> 7) as u8),
        };
        (d1 & 0x7F, d2 & 0x7F)
    }
}
