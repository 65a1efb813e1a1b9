//! Instance registry: owns every loaded instance, keyed by id.

use super::completion::SessionEvent;
use super::instance::InstrumentInstance;
use super::voices::ChannelVoiceSet;
use crate::audio::SynthEngine;
use crate::error::{Result, SessionError};
use crate::midi::ChannelIndex;
use crossbeam_channel::Sender;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Identifies a loaded instance. Ids start at 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Returns `None` for 0, which is never assigned.
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entries {
    next_id: u64,
    instances: HashMap<InstanceId, Arc<InstrumentInstance>>,
    /// Set by `shutdown_all`; nothing can be registered afterwards.
    closed: bool,
}

/// Owns every live instance.
///
/// The map lock is only held to look up, insert or remove entries. Loading a
/// bank and tearing an instance down both happen outside it, so operations
/// on other instances are never blocked by them.
pub struct InstanceRegistry {
    entries: RwLock<Entries>,
    percussion_channel: Option<ChannelIndex>,
    events: Sender<SessionEvent>,
}

impl InstanceRegistry {
    pub fn new(percussion_channel: Option<ChannelIndex>, events: Sender<SessionEvent>) -> Self {
        Self {
            entries: RwLock::new(Entries {
                next_id: 1,
                instances: HashMap::new(),
                closed: false,
            }),
            percussion_channel,
            events,
        }
    }

    /// Loads `bank_path` with every channel on (`bank`, `program`) and
    /// registers the result.
    ///
    /// The id is assigned when the instance is inserted, so a failed load
    /// consumes no id.
    ///
    /// # Errors
    ///
    /// Returns `LoadFailed` if the bank or preset cannot be loaded, and
    /// `EngineNotAvailable` if the registry has been shut down.
    pub fn create(
        &self,
        engine: &dyn SynthEngine,
        bank_path: &Path,
        bank: u32,
        program: u8,
    ) -> Result<InstanceId> {
        let renderer = engine.open(bank_path)?;
        let voices = ChannelVoiceSet::new(renderer, bank, program)?;

        let mut entries = self.entries.write();
        if entries.closed {
            return Err(SessionError::EngineNotAvailable);
        }
        let id = InstanceId(entries.next_id);
        entries.next_id += 1;

        let instance = InstrumentInstance::new(
            id,
            bank_path.to_path_buf(),
            voices,
            self.percussion_channel,
            self.events.clone(),
        );
        entries.instances.insert(id, Arc::new(instance));
        Ok(id)
    }

    /// Looks up a live instance.
    pub fn resolve(&self, id: InstanceId) -> Result<Arc<InstrumentInstance>> {
        self.entries
            .read()
            .instances
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::not_found(format!("soundfont instance {} not found", id)))
    }

    /// Removes an instance, stopping its playback and releasing its bank.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `id` is not registered, including when it was
    /// already destroyed.
    pub fn destroy(&self, id: InstanceId) -> Result<()> {
        let instance = self
            .entries
            .write()
            .instances
            .remove(&id)
            .ok_or_else(|| SessionError::not_found(format!("soundfont instance {} not found", id)))?;
        instance.shutdown();
        Ok(())
    }

    /// Destroys every instance and refuses new ones. Returns how many were
    /// destroyed.
    ///
    /// Returns only after every playback thread has exited.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut entries = self.entries.write();
            entries.closed = true;
            entries.instances.drain().map(|(_, instance)| instance).collect()
        };
        for instance in &drained {
            instance.shutdown();
        }
        drained.len()
    }

    /// Ids of every live instance in ascending order.
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.entries.read().instances.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
