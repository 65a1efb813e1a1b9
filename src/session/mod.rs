//! Session management.
//!
//! This module provides the [`SessionManager`], the entry point for loading
//! soundfont instances, sending them live events and playing MIDI files on
//! them. Completion of non-looping file playback is reported through
//! [`SessionManager::events`].

mod completion;
mod dispatch;
mod instance;
mod playback;
mod registry;
mod voices;

pub use completion::{CompletionNotifier, SessionEvent};
pub use dispatch::MethodCall;
pub use instance::InstrumentInstance;
pub use playback::{FilePlaybackController, TransportState};
pub use registry::{InstanceId, InstanceRegistry};
pub use voices::{Channel, ChannelVoiceSet};

use crate::audio::SynthEngine;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::midi::ChannelIndex;
use crossbeam_channel::{unbounded, Receiver};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Platform policy run around every soundfont load.
///
/// A host that needs to silence the output device while a bank is decoded
/// mutes in `before_load` and unmutes in `after_load`.
pub trait LoadHooks: Send + Sync {
    fn before_load(&self);

    /// Runs after the load finished, successfully or not, and the configured
    /// settle delay elapsed.
    fn after_load(&self);
}

struct Inner {
    /// `None` once disposed.
    engine: RwLock<Option<Arc<dyn SynthEngine>>>,
    registry: InstanceRegistry,
    config: SessionConfig,
    events: Receiver<SessionEvent>,
    hooks: RwLock<Option<Arc<dyn LoadHooks>>>,
}

/// The façade every host operation goes through.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a session over `engine`.
    pub fn new(engine: Arc<dyn SynthEngine>, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = unbounded();
        let percussion_channel = config.percussion_channel.and_then(ChannelIndex::new);

        Self {
            inner: Arc::new(Inner {
                engine: RwLock::new(Some(engine)),
                registry: InstanceRegistry::new(percussion_channel, events_tx),
                config,
                events: events_rx,
                hooks: RwLock::new(None),
            }),
        }
    }

    /// Installs hooks that wrap every load.
    pub fn with_load_hooks(self, hooks: Arc<dyn LoadHooks>) -> Self {
        *self.inner.hooks.write() = Some(hooks);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Receiver for asynchronous session events.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.inner.events.clone()
    }

    fn engine(&self) -> Result<Arc<dyn SynthEngine>> {
        self.inner
            .engine
            .read()
            .clone()
            .ok_or(SessionError::EngineNotAvailable)
    }

    fn instance(&self, id: InstanceId) -> Result<Arc<InstrumentInstance>> {
        self.engine()?;
        self.inner.registry.resolve(id)
    }

    /// Loads a soundfont on a blocking worker and returns the new instance id.
    ///
    /// # Errors
    ///
    /// Returns `LoadFailed` if the bank or the preset cannot be loaded.
    pub async fn load_soundfont<P: Into<PathBuf>>(
        &self,
        path: P,
        bank: u32,
        program: u8,
    ) -> Result<InstanceId> {
        let manager = self.clone();
        let path = path.into();
        tokio::task::spawn_blocking(move || manager.load_soundfont_blocking(&path, bank, program))
            .await
            .map_err(|e| SessionError::LoadFailed(format!("load task failed: {}", e)))?
    }

    /// Loads a soundfont on the calling thread.
    pub fn load_soundfont_blocking(&self, path: &Path, bank: u32, program: u8) -> Result<InstanceId> {
        let engine = self.engine()?;
        let hooks = self.inner.hooks.read().clone();

        if let Some(hooks) = &hooks {
            hooks.before_load();
        }
        let result = self
            .inner
            .registry
            .create(engine.as_ref(), path, bank, program);
        if let Some(hooks) = &hooks {
            thread::sleep(self.inner.config.load_settle());
            hooks.after_load();
        }

        match &result {
            Ok(id) => tracing::info!(
                "Loaded {:?} as instance {} (bank {}, program {})",
                path,
                id,
                bank,
                program
            ),
            Err(e) => tracing::warn!("Failed to load {:?}: {}", path, e),
        }
        result
    }

    /// Binds one channel of an instance to a new preset.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown instance or channel, and
    /// `LoadFailed` if the preset does not exist. The channel keeps its
    /// previous preset on failure.
    pub fn select_instrument(&self, id: InstanceId, channel: u8, bank: u32, program: u8) -> Result<()> {
        let instance = self.instance(id)?;
        let channel = ChannelIndex::new(channel)
            .ok_or_else(|| SessionError::not_found(format!("channel {} does not exist", channel)))?;
        instance.with_voices(|voices| voices.select_instrument(channel, bank, program))?;
        tracing::debug!(
            "Instance {} channel {} now bank {} program {}",
            id,
            channel,
            bank,
            program
        );
        Ok(())
    }

    pub fn play_note(&self, id: InstanceId, channel: u8, key: u8, velocity: u8) -> Result<()> {
        let channel = channel_argument(channel)?;
        self.instance(id)?
            .with_voices(|voices| voices.play_note(channel, key, velocity))
    }

    pub fn stop_note(&self, id: InstanceId, channel: u8, key: u8) -> Result<()> {
        let channel = channel_argument(channel)?;
        self.instance(id)?
            .with_voices(|voices| voices.stop_note(channel, key))
    }

    /// Cuts every sounding note on every channel of an instance.
    pub fn stop_all_notes(&self, id: InstanceId) -> Result<()> {
        self.instance(id)?
            .with_voices(|voices| voices.stop_all_notes())
    }

    pub fn control_change(&self, id: InstanceId, channel: u8, controller: u8, value: u8) -> Result<()> {
        let instance = self.instance(id)?;
        let channel = ChannelIndex::new(channel)
            .ok_or_else(|| SessionError::not_found(format!("channel {} does not exist", channel)))?;
        instance.with_voices(|voices| voices.control_change(channel, controller, value))
    }

    /// Stops the instance's playback, releases its bank and forgets its id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the instance does not exist or was already
    /// unloaded.
    pub fn unload_soundfont(&self, id: InstanceId) -> Result<()> {
        self.engine()?;
        self.inner.registry.destroy(id)
    }

    /// Tears the whole session down.
    ///
    /// Every playback thread has exited before the engine is shut down.
    /// Afterwards every operation fails with `EngineNotAvailable`; disposing
    /// again does nothing.
    pub fn dispose(&self) -> Result<()> {
        let engine = self.inner.engine.write().take();
        if let Some(engine) = engine {
            let released = self.inner.registry.shutdown_all();
            engine.shutdown();
            tracing::info!("Session disposed, released {} instances", released);
        }
        Ok(())
    }

    /// Plays the MIDI file at `path` on an instance, replacing any file
    /// already playing there.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown instance and `FileLoadFailed` if
    /// the file cannot be read or parsed.
    pub fn play_midi_file<P: AsRef<Path>>(&self, id: InstanceId, path: P, looping: bool) -> Result<()> {
        self.instance(id)?.play_file(path.as_ref(), looping)
    }

    pub fn pause_midi_file(&self, id: InstanceId) -> Result<()> {
        self.instance(id)?.pause();
        Ok(())
    }

    pub fn resume_midi_file(&self, id: InstanceId) -> Result<()> {
        self.instance(id)?.resume();
        Ok(())
    }

    /// Stops file playback. When this returns no more events from the file
    /// reach the instance and no completion event will be delivered for it.
    pub fn stop_midi_file(&self, id: InstanceId) -> Result<()> {
        self.instance(id)?.stop();
        Ok(())
    }

    /// True while a file is playing (not paused) on the instance. Unknown
    /// instances are simply not playing.
    pub fn is_midi_playing(&self, id: InstanceId) -> Result<bool> {
        self.engine()?;
        Ok(self
            .inner
            .registry
            .resolve(id)
            .map(|instance| instance.is_playing())
            .unwrap_or(false))
    }

    pub fn playback_state(&self, id: InstanceId) -> Result<TransportState> {
        Ok(self.instance(id)?.playback_state())
    }

    /// Cursor of the instance's file playback, `None` when idle.
    pub fn playback_position(&self, id: InstanceId) -> Result<Option<Duration>> {
        Ok(self.instance(id)?.playback_position())
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.inner.registry.ids()
    }
}

fn channel_argument(channel: u8) -> Result<ChannelIndex> {
    ChannelIndex::new(channel).ok_or_else(|| {
        SessionError::invalid_argument(format!("channel {} is out of range 0-15", channel))
    })
}
