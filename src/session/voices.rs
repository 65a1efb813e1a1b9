//! The sixteen channels of one instance.

use crate::audio::{LoadError, Renderer};
use crate::error::{Result, SessionError};
use crate::midi::{
    ChannelIndex, ChannelMessage, CC_ALL_SOUND_OFF, CC_BANK_SELECT, CC_SUSTAIN, CHANNEL_COUNT,
    PERCUSSION_BANK,
};

/// The instrument a channel is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Channel {
    pub bank: u32,
    pub program: u8,
}

impl Channel {
    /// Percussion presets live in bank 128.
    pub fn is_percussion(&self) -> bool {
        self.bank == PERCUSSION_BANK
    }
}

/// Sixteen independently addressable channels driving one renderer.
///
/// Once released, every operation fails with `NotFound`.
pub struct ChannelVoiceSet {
    renderer: Option<Box<dyn Renderer>>,
    channels: [Channel; CHANNEL_COUNT],
    drum_channel: Option<u8>,
}

impl ChannelVoiceSet {
    /// Binds every channel of `renderer` to (`bank`, `program`).
    ///
    /// A renderer's drum-only channel cannot take a melodic bank; it is bound
    /// to the standard kit (bank 128, program 0) instead.
    ///
    /// # Errors
    ///
    /// Returns error if the preset does not exist. The renderer is dropped,
    /// releasing its bank.
    pub fn new(
        mut renderer: Box<dyn Renderer>,
        bank: u32,
        program: u8,
    ) -> std::result::Result<Self, LoadError> {
        let drum_channel = renderer.drum_channel();
        let mut channels = [Channel { bank, program }; CHANNEL_COUNT];

        for channel in ChannelIndex::all() {
            let index = channel.as_u8();
            if Some(index) == drum_channel && bank < PERCUSSION_BANK {
                // The channel addresses the percussion range whether or not
                // the kit exists.
                if let Err(e) = renderer.select_program(index, PERCUSSION_BANK, 0) {
                    tracing::warn!("No drum kit for channel {}: {}", channel, e);
                }
                channels[index as usize] = Channel {
                    bank: PERCUSSION_BANK,
                    program: 0,
                };
                continue;
            }
            renderer.select_program(index, bank, program)?;
        }

        Ok(Self {
            renderer: Some(renderer),
            channels,
            drum_channel,
        })
    }

    fn renderer(&mut self) -> Result<&mut Box<dyn Renderer>> {
        self.renderer
            .as_mut()
            .ok_or_else(|| SessionError::not_found("soundfont instance has been unloaded"))
    }

    /// Rebinds a channel. On failure the previous instrument stays selected.
    pub fn select_instrument(&mut self, channel: ChannelIndex, bank: u32, program: u8) -> Result<()> {
        self.renderer()?
            .select_program(channel.as_u8(), bank, program)?;
        self.channels[channel.as_u8() as usize] = Channel { bank, program };
        Ok(())
    }

    pub fn play_note(&mut self, channel: ChannelIndex, key: u8, velocity: u8) -> Result<()> {
        self.send(channel, ChannelMessage::NoteOn { key, velocity })
    }

    pub fn stop_note(&mut self, channel: ChannelIndex, key: u8) -> Result<()> {
        self.send(channel, ChannelMessage::NoteOff { key })
    }

    pub fn control_change(&mut self, channel: ChannelIndex, controller: u8, value: u8) -> Result<()> {
        self.send(channel, ChannelMessage::ControlChange { controller, value })
    }

    /// Releases the sustain pedal and cuts all sound on every channel.
    /// Instrument bindings are kept.
    pub fn stop_all_notes(&mut self) -> Result<()> {
        let renderer = self.renderer()?;
        for channel in ChannelIndex::all() {
            renderer.process(
                channel.as_u8(),
                ChannelMessage::ControlChange {
                    controller: CC_SUSTAIN,
                    value: 0,
                },
            );
            renderer.process(
                channel.as_u8(),
                ChannelMessage::ControlChange {
                    controller: CC_ALL_SOUND_OFF,
                    value: 0,
                },
            );
        }
        Ok(())
    }

    /// Forwards any channel message, keeping the channel's instrument
    /// binding in step with bank select and program change.
    pub fn send(&mut self, channel: ChannelIndex, message: ChannelMessage) -> Result<()> {
        self.renderer()?.process(channel.as_u8(), message);

        let drum = self.drum_channel == Some(channel.as_u8());
        let slot = &mut self.channels[channel.as_u8() as usize];
        match message {
            ChannelMessage::ControlChange {
                controller: CC_BANK_SELECT,
                value,
            } if drum => slot.bank = value as u32 + PERCUSSION_BANK,
            ChannelMessage::ControlChange {
                controller: CC_BANK_SELECT,
                value,
            } => slot.bank = value as u32,
            ChannelMessage::ProgramChange { program } => slot.program = program,
            _ => {}
        }
        Ok(())
    }

    /// Returns the instrument a channel is bound to.
    pub fn channel(&self, channel: ChannelIndex) -> Channel {
        self.channels[channel.as_u8() as usize]
    }

    /// Drops the renderer, releasing the bank.
    pub fn release(&mut self) {
        if self.renderer.take().is_some() {
            tracing::debug!("Released channel voice set");
        }
    }

    pub fn is_released(&self) -> bool {
        self.renderer.is_none()
    }
}
