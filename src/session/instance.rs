//! One loaded soundfont with its channels and optional file playback.

use super::completion::{CompletionNotifier, SessionEvent};
use super::playback::{FilePlaybackController, TransportState};
use super::registry::InstanceId;
use super::voices::ChannelVoiceSet;
use crate::error::{Result, SessionError};
use crate::midi::{ChannelIndex, Timeline, PERCUSSION_BANK};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The playback half of an instance, guarded by the instance's transition
/// lock.
#[derive(Default)]
struct PlaybackSlot {
    controller: Option<FilePlaybackController>,
    /// Incremented for every started playback.
    generation: u64,
    /// Set once the instance is unloaded; no playback may start afterwards.
    retired: bool,
}

impl PlaybackSlot {
    /// Discards a controller whose playback has already completed.
    fn reap_finished(&mut self) {
        if self
            .controller
            .as_ref()
            .is_some_and(FilePlaybackController::is_finished)
        {
            if let Some(controller) = self.controller.take() {
                controller.stop();
            }
        }
    }
}

/// A loaded soundfont instance.
///
/// Channel events lock only the voice set, so notes keep flowing while a
/// playback transition is in progress. Transport transitions (play, pause,
/// resume, stop, unload) are serialized by the playback slot lock.
pub struct InstrumentInstance {
    id: InstanceId,
    bank_path: PathBuf,
    voices: Arc<Mutex<ChannelVoiceSet>>,
    playback: Arc<Mutex<PlaybackSlot>>,
    percussion_channel: Option<ChannelIndex>,
    events: Sender<SessionEvent>,
}

impl InstrumentInstance {
    pub fn new(
        id: InstanceId,
        bank_path: PathBuf,
        voices: ChannelVoiceSet,
        percussion_channel: Option<ChannelIndex>,
        events: Sender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            bank_path,
            voices: Arc::new(Mutex::new(voices)),
            playback: Arc::new(Mutex::new(PlaybackSlot::default())),
            percussion_channel,
            events,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn bank_path(&self) -> &Path {
        &self.bank_path
    }

    /// Runs `f` with the channel voice set locked.
    pub fn with_voices<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut ChannelVoiceSet) -> Result<R>,
    {
        f(&mut self.voices.lock())
    }

    /// Starts playing the MIDI file at `path`, replacing any current playback.
    ///
    /// The file is parsed before the current playback is touched, so a file
    /// that fails to load leaves it running.
    ///
    /// # Errors
    ///
    /// Returns `FileLoadFailed` if the file cannot be read or parsed, and
    /// `NotFound` if the instance has been unloaded.
    pub fn play_file(&self, path: &Path, looping: bool) -> Result<()> {
        let timeline = Timeline::load(path)?;

        let mut slot = self.playback.lock();
        if slot.retired {
            return Err(self.unloaded());
        }
        if let Some(previous) = slot.controller.take() {
            previous.stop();
        }

        self.prepare_percussion()?;

        slot.generation += 1;
        let generation = slot.generation;
        let notifier = CompletionNotifier::arm(self.id, generation, self.events.clone());

        let weak_slot = Arc::downgrade(&self.playback);
        let controller = FilePlaybackController::start(
            path.to_path_buf(),
            timeline,
            looping,
            Arc::clone(&self.voices),
            notifier,
            move || {
                // A transition in progress reaps us lazily instead.
                let Some(slot) = weak_slot.upgrade() else {
                    return;
                };
                if let Some(mut slot) = slot.try_lock() {
                    if slot.generation == generation {
                        slot.controller = None;
                    }
                };
            },
        )?;
        slot.controller = Some(controller);
        Ok(())
    }

    /// Switches the percussion channel to the drum kit. A soundfont without
    /// one plays the file with whatever that channel had.
    fn prepare_percussion(&self) -> Result<()> {
        let Some(channel) = self.percussion_channel else {
            return Ok(());
        };
        let mut voices = self.voices.lock();
        if voices.is_released() {
            return Err(self.unloaded());
        }
        if let Err(e) = voices.select_instrument(channel, PERCUSSION_BANK, 0) {
            tracing::warn!(
                "Instance {} has no percussion preset for channel {}: {}",
                self.id,
                channel,
                e
            );
        }
        Ok(())
    }

    /// Pauses file playback. Does nothing unless a file is playing.
    pub fn pause(&self) {
        let mut slot = self.playback.lock();
        slot.reap_finished();
        if let Some(controller) = &slot.controller {
            if controller.pause() {
                tracing::info!("Paused playback on instance {}", self.id);
            }
        }
    }

    /// Resumes paused file playback from where it was paused.
    pub fn resume(&self) {
        let mut slot = self.playback.lock();
        slot.reap_finished();
        if let Some(controller) = &slot.controller {
            if controller.resume() {
                tracing::info!("Resumed playback on instance {}", self.id);
            }
        }
    }

    /// Stops file playback and waits until no more of its events can arrive.
    ///
    /// The transition lock is held until the worker has exited, so a
    /// concurrent stop or play cannot return or start while the old file is
    /// still delivering.
    pub fn stop(&self) {
        let mut slot = self.playback.lock();
        if let Some(controller) = slot.controller.take() {
            controller.stop();
            tracing::info!("Stopped playback on instance {}", self.id);
        }
    }

    pub fn playback_state(&self) -> TransportState {
        let mut slot = self.playback.lock();
        slot.reap_finished();
        slot.controller
            .as_ref()
            .map_or(TransportState::Idle, FilePlaybackController::state)
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state() == TransportState::Playing
    }

    /// Cursor of the current playback, if any.
    pub fn playback_position(&self) -> Option<Duration> {
        let mut slot = self.playback.lock();
        slot.reap_finished();
        slot.controller
            .as_ref()
            .map(FilePlaybackController::position)
    }

    /// Stops playback for good and releases the bank.
    pub fn shutdown(&self) {
        {
            let mut slot = self.playback.lock();
            slot.retired = true;
            if let Some(controller) = slot.controller.take() {
                controller.stop();
            }
        }
        self.voices.lock().release();
        tracing::info!("Unloaded instance {} ({:?})", self.id, self.bank_path);
    }

    fn unloaded(&self) -> SessionError {
        SessionError::not_found(format!("soundfont instance {} has been unloaded", self.id))
    }
}
