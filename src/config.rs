//! Session configuration.
//!
//! Controls how each instance's synthesizer is built and how file playback
//! prepares an instance. Every field has a default, so a configuration file
//! only needs to name the values it changes.

use crate::midi::CHANNEL_COUNT;
use rustysynth::SynthesizerSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by every instance in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,

    /// Maximum number of simultaneous voices per instance.
    pub maximum_polyphony: usize,

    /// Synthesizer internal block size in samples.
    pub block_size: usize,

    /// Master volume applied to every instance's synthesizer.
    pub gain: f32,

    /// Whether the reverb and chorus effects are rendered.
    pub enable_reverb_and_chorus: bool,

    /// Number of frames rendered per chunk for the audio output.
    pub buffer_size: usize,

    /// Channel switched to the percussion bank before a MIDI file plays.
    /// `None` leaves every channel as the host configured it.
    pub percussion_channel: Option<u8>,

    /// Milliseconds to wait after a load completes before the post-load hook runs.
    pub load_settle_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            maximum_polyphony: 32,
            block_size: 64,
            gain: 1.0,
            enable_reverb_and_chorus: true,
            buffer_size: 256,
            percussion_channel: Some(9),
            load_settle_ms: 250,
        }
    }
}

impl SessionConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid JSON, or
    /// contains out-of-range values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path.as_ref())?;
        let config: SessionConfig = serde_json::from_str(&data)?;
        config.validate()?;
        tracing::debug!("Loaded session config from {:?}", path.as_ref());
        Ok(config)
    }

    /// Checks that every value is usable by the synthesizer.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // rustysynth accepts 16 kHz to 192 kHz.
        if !(16_000..=192_000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample_rate {} is outside 16000-192000",
                self.sample_rate
            )));
        }
        if self.maximum_polyphony == 0 || self.block_size == 0 || self.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "maximum_polyphony, block_size and buffer_size must be positive".to_string(),
            ));
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(ConfigError::Invalid(format!("gain {} is invalid", self.gain)));
        }
        if let Some(channel) = self.percussion_channel {
            if channel as usize >= CHANNEL_COUNT {
                return Err(ConfigError::Invalid(format!(
                    "percussion_channel {} is outside 0-15",
                    channel
                )));
            }
        }
        Ok(())
    }

    /// Builds the rustysynth settings for one instance.
    pub fn synthesizer_settings(&self) -> SynthesizerSettings {
        let mut settings = SynthesizerSettings::new(self.sample_rate as i32);
        settings.block_size = self.block_size;
        settings.maximum_polyphony = self.maximum_polyphony;
        settings.enable_reverb_and_chorus = self.enable_reverb_and_chorus;
        settings
    }

    /// The delay between a completed load and the post-load hook.
    pub fn load_settle(&self) -> Duration {
        Duration::from_millis(self.load_settle_ms)
    }
}
