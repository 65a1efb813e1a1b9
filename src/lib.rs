//! sfsession - Multi-instance SoundFont synthesis sessions.
//!
//! This library loads any number of SoundFont instances, each with sixteen
//! MIDI channels, plays live notes and controller events on them, and plays
//! Standard MIDI Files with pause, resume, looping and completion events.

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod session;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use audio::{LoadError, Renderer, SoundFontEngine, SynthEngine};
pub use config::{ConfigError, SessionConfig};
pub use error::{ErrorKind, Result, SessionError};
pub use midi::{ChannelIndex, ChannelMessage, Timeline, TimelineError};
pub use session::{InstanceId, LoadHooks, MethodCall, SessionEvent, SessionManager, TransportState};
