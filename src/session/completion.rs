//! Single-use completion signal for one file playback.

use super::dispatch::MethodCall;
use super::registry::InstanceId;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

/// Asynchronous events delivered to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A non-looping file reached its end without being stopped.
    PlaybackCompleted { instance: InstanceId },
}

impl SessionEvent {
    /// Renders the event as the callback the host expects.
    pub fn to_method_call(&self) -> MethodCall {
        match self {
            SessionEvent::PlaybackCompleted { instance } => {
                MethodCall::new("onMidiPlayerCompleted", json!({ "sfId": instance.get() }))
            }
        }
    }
}

/// Represents the current notifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifierState {
    Armed,
    Invalidated,
    Fired,
}

/// A notification slot bound to one playback controller.
///
/// Firing and invalidation take the same lock, so exactly one of them wins.
/// Once invalidated the event can no longer be delivered.
pub struct CompletionNotifier {
    instance: InstanceId,
    generation: u64,
    state: Mutex<NotifierState>,
    events: Sender<SessionEvent>,
}

impl CompletionNotifier {
    /// Arms a notifier for the `generation`th playback on `instance`.
    pub fn arm(instance: InstanceId, generation: u64, events: Sender<SessionEvent>) -> Arc<Self> {
        Arc::new(Self {
            instance,
            generation,
            state: Mutex::new(NotifierState::Armed),
            events,
        })
    }

    /// Delivers the completion event if the slot is still armed.
    ///
    /// Returns true if the event was delivered.
    pub fn fire(&self) -> bool {
        let mut state = self.state.lock();
        if *state != NotifierState::Armed {
            return false;
        }
        *state = NotifierState::Fired;

        // The receiver lives as long as the session; a send error means the
        // session is already gone and there is nobody to tell.
        if self
            .events
            .send(SessionEvent::PlaybackCompleted {
                instance: self.instance,
            })
            .is_err()
        {
            tracing::debug!("No listener for completion of instance {}", self.instance);
        } else {
            tracing::info!(
                "Playback {} on instance {} completed",
                self.generation,
                self.instance
            );
        }
        true
    }

    /// Prevents any later [`fire`](Self::fire) from delivering.
    ///
    /// Returns true if the slot was still armed.
    pub fn invalidate(&self) -> bool {
        let mut state = self.state.lock();
        if *state == NotifierState::Armed {
            *state = NotifierState::Invalidated;
            true
        } else {
            false
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}
