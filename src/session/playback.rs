//! File playback: a transport clock and the controller that drives a
//! [`Timeline`] into an instance's channels from a background thread.
//!
//! The worker sleeps on a condition variable until the next event is due.
//! Pause, resume and stop notify the same condition variable, so the worker
//! reacts immediately instead of after its current sleep.

use super::completion::CompletionNotifier;
use super::voices::ChannelVoiceSet;
use crate::error::{Result, SessionError};
use crate::midi::{ChannelIndex, ChannelMessage, Timeline};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Transport state of an instance's file playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    /// No playback exists.
    Idle,
    Playing,
    Paused,
    /// Terminal. The controller is about to be discarded.
    Stopped,
}

/// Why [`Transport::wait_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// The cursor reached the target.
    Reached,
    /// The transport was paused since the last wait.
    Paused,
    Stopped,
}

struct Clock {
    state: TransportState,
    /// Position at the moment `started_at` was taken.
    cursor: Duration,
    /// Set while playing.
    started_at: Option<Instant>,
    /// Number of pauses so far. Lets the worker notice a pause even when a
    /// resume follows before it wakes.
    pauses: u64,
}

impl Clock {
    fn position(&self) -> Duration {
        match self.started_at {
            Some(started_at) => self.cursor + started_at.elapsed(),
            None => self.cursor,
        }
    }
}

/// A pausable wall clock shared by a controller and its worker.
pub(crate) struct Transport {
    clock: Mutex<Clock>,
    changed: Condvar,
}

impl Transport {
    /// Creates a transport that is already playing from zero.
    fn playing() -> Self {
        Self {
            clock: Mutex::new(Clock {
                state: TransportState::Playing,
                cursor: Duration::ZERO,
                started_at: Some(Instant::now()),
                pauses: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> TransportState {
        self.clock.lock().state
    }

    fn position(&self) -> Duration {
        self.clock.lock().position()
    }

    /// Freezes the cursor. Returns false unless the transport was playing.
    fn pause(&self) -> bool {
        let mut clock = self.clock.lock();
        if clock.state != TransportState::Playing {
            return false;
        }
        clock.cursor = clock.position();
        clock.started_at = None;
        clock.state = TransportState::Paused;
        clock.pauses += 1;
        self.changed.notify_all();
        true
    }

    /// Continues from the frozen cursor. Returns false unless paused.
    fn resume(&self) -> bool {
        let mut clock = self.clock.lock();
        if clock.state != TransportState::Paused {
            return false;
        }
        clock.started_at = Some(Instant::now());
        clock.state = TransportState::Playing;
        self.changed.notify_all();
        true
    }

    /// Moves to `Stopped` from any state. Returns false if already stopped.
    fn stop(&self) -> bool {
        let mut clock = self.clock.lock();
        if clock.state == TransportState::Stopped {
            return false;
        }
        clock.cursor = clock.position();
        clock.started_at = None;
        clock.state = TransportState::Stopped;
        self.changed.notify_all();
        true
    }

    /// Moves to `Stopped` and runs `on_finish` in the same critical section,
    /// unless something else stopped the transport first.
    fn finish<F: FnOnce()>(&self, on_finish: F) -> bool {
        let mut clock = self.clock.lock();
        if clock.state == TransportState::Stopped {
            return false;
        }
        clock.cursor = clock.position();
        clock.started_at = None;
        clock.state = TransportState::Stopped;
        on_finish();
        self.changed.notify_all();
        true
    }

    /// Resets the cursor to zero, keeping the play/pause state.
    fn rewind(&self) -> bool {
        let mut clock = self.clock.lock();
        match clock.state {
            TransportState::Playing => {
                clock.cursor = Duration::ZERO;
                clock.started_at = Some(Instant::now());
                true
            }
            TransportState::Paused => {
                clock.cursor = Duration::ZERO;
                true
            }
            TransportState::Idle | TransportState::Stopped => false,
        }
    }

    /// Blocks until the cursor reaches `target`, the transport pauses or it
    /// stops.
    fn wait_until(&self, target: Duration, seen_pauses: &mut u64) -> Wake {
        let mut clock = self.clock.lock();
        loop {
            if clock.pauses != *seen_pauses {
                *seen_pauses = clock.pauses;
                return Wake::Paused;
            }
            match clock.state {
                TransportState::Idle | TransportState::Stopped => return Wake::Stopped,
                TransportState::Paused => self.changed.wait(&mut clock),
                TransportState::Playing => {
                    let now = clock.position();
                    if now >= target {
                        return Wake::Reached;
                    }
                    let _ = self.changed.wait_for(&mut clock, target - now);
                }
            }
        }
    }

    /// Blocks until the transport stops.
    fn wait_stopped(&self) {
        let mut clock = self.clock.lock();
        while clock.state != TransportState::Stopped {
            self.changed.wait(&mut clock);
        }
    }
}

/// Drives one MIDI file into an instance's channels.
///
/// At most one controller exists per instance. Dropping a controller cancels
/// it without waiting for the worker; [`stop`](Self::stop) also waits.
pub struct FilePlaybackController {
    source: PathBuf,
    looping: bool,
    duration: Duration,
    transport: Arc<Transport>,
    notifier: Arc<CompletionNotifier>,
    worker: Option<JoinHandle<()>>,
}

impl FilePlaybackController {
    /// Starts playing `timeline` immediately.
    ///
    /// # Arguments
    ///
    /// * `source` - Path the timeline was loaded from, kept for reporting
    /// * `timeline` - Resolved events to deliver
    /// * `looping` - Restart from zero at the end instead of completing
    /// * `voices` - Channels the events are delivered to
    /// * `notifier` - Fired once on natural completion of a non-looping file
    /// * `on_finish` - Runs on the worker thread after natural completion
    ///
    /// # Errors
    ///
    /// Returns error if the worker thread cannot be spawned.
    pub fn start<F>(
        source: PathBuf,
        timeline: Timeline,
        looping: bool,
        voices: Arc<Mutex<ChannelVoiceSet>>,
        notifier: Arc<CompletionNotifier>,
        on_finish: F,
    ) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let duration = timeline.duration();
        let transport = Arc::new(Transport::playing());

        let worker = Worker {
            timeline,
            looping,
            voices,
            transport: Arc::clone(&transport),
            notifier: Arc::clone(&notifier),
            held: BTreeSet::new(),
        };

        let handle = thread::Builder::new()
            .name(format!("playback-{}", notifier.generation()))
            .spawn(move || worker.run(on_finish))
            .map_err(|e| {
                SessionError::FileLoadFailed(format!("failed to start playback thread: {}", e))
            })?;

        tracing::info!(
            "Playing {:?} ({:.2}s, loop: {})",
            source,
            duration.as_secs_f64(),
            looping
        );

        Ok(Self {
            source,
            looping,
            duration,
            transport,
            notifier,
            worker: Some(handle),
        })
    }

    /// Returns true if playback was playing and is now paused.
    pub fn pause(&self) -> bool {
        self.transport.pause()
    }

    /// Returns true if playback was paused and is now playing.
    pub fn resume(&self) -> bool {
        self.transport.resume()
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Position within the current pass over the file.
    pub fn position(&self) -> Duration {
        self.transport.position().min(self.duration)
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// True once the transport reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.state() == TransportState::Stopped
    }

    /// Cancels playback and waits for the worker to exit.
    ///
    /// After this returns no further events from this controller reach the
    /// channels, and its completion event can no longer be delivered.
    pub fn stop(mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Playback thread for {:?} panicked", self.source);
            }
        }
    }

    fn cancel(&self) {
        // Invalidate first so a concurrent natural completion cannot fire.
        self.notifier.invalidate();
        if self.transport.stop() {
            tracing::debug!("Stopped playback of {:?}", self.source);
        }
    }
}

impl Drop for FilePlaybackController {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// State owned by the playback thread.
struct Worker {
    timeline: Timeline,
    looping: bool,
    voices: Arc<Mutex<ChannelVoiceSet>>,
    transport: Arc<Transport>,
    notifier: Arc<CompletionNotifier>,
    /// Notes turned on by this playback and not yet released.
    held: BTreeSet<(u8, u8)>,
}

impl Worker {
    fn run<F: FnOnce()>(mut self, on_finish: F) {
        let mut seen_pauses = 0;

        loop {
            let mut next = 0;
            while next < self.timeline.events().len() {
                let event = self.timeline.events()[next];
                match self.transport.wait_until(event.at, &mut seen_pauses) {
                    Wake::Reached => {
                        if !self.deliver(event.channel, event.message) {
                            return;
                        }
                        next += 1;
                    }
                    Wake::Paused => self.release_held(),
                    Wake::Stopped => {
                        self.release_held();
                        return;
                    }
                }
            }

            // Trailing silence up to the end of the file.
            loop {
                match self.transport.wait_until(self.timeline.duration(), &mut seen_pauses) {
                    Wake::Reached => break,
                    Wake::Paused => self.release_held(),
                    Wake::Stopped => {
                        self.release_held();
                        return;
                    }
                }
            }

            self.release_held();

            if !self.looping {
                let notifier = &self.notifier;
                if self.transport.finish(|| {
                    notifier.fire();
                }) {
                    on_finish();
                }
                return;
            }

            if self.timeline.duration().is_zero() {
                // Nothing to repeat; hold the loop open until stopped.
                self.transport.wait_stopped();
                return;
            }

            if !self.transport.rewind() {
                return;
            }
            tracing::debug!("Looping playback {}", self.notifier.generation());
        }
    }

    /// Sends one event. Returns false if the channels have been released.
    fn deliver(&mut self, channel: u8, message: ChannelMessage) -> bool {
        let Some(index) = ChannelIndex::new(channel) else {
            return true;
        };

        match message {
            ChannelMessage::NoteOn { key, velocity } if velocity > 0 => {
                self.held.insert((channel, key));
            }
            ChannelMessage::NoteOn { key, .. } | ChannelMessage::NoteOff { key } => {
                self.held.remove(&(channel, key));
            }
            _ => {}
        }

        self.voices.lock().send(index, message).is_ok()
    }

    fn release_held(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let mut voices = self.voices.lock();
        for (channel, key) in std::mem::take(&mut self.held) {
            if let Some(index) = ChannelIndex::new(channel) {
                let _ = voices.stop_note(index, key);
            }
        }
    }
}
