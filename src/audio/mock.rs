//! A mock engine. Doesn't render anything, records what it receives.

use super::{LoadError, Renderer, SynthEngine};
use crate::midi::{ChannelMessage, PERCUSSION_BANK};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Path of the bank every default mock engine knows about.
pub const PIANO_BANK: &str = "mock/piano.sf2";

/// Everything one mock renderer received.
#[derive(Default)]
pub struct MockLog {
    messages: Mutex<Vec<(u8, ChannelMessage)>>,
    programs: Mutex<Vec<(u8, u32, u8)>>,
    released: AtomicBool,
}

impl MockLog {
    /// All channel messages, in order.
    pub fn messages(&self) -> Vec<(u8, ChannelMessage)> {
        self.messages.lock().clone()
    }

    /// Keys of every note on, in order.
    pub fn note_ons(&self) -> Vec<u8> {
        self.messages
            .lock()
            .iter()
            .filter_map(|(_, message)| match message {
                ChannelMessage::NoteOn { key, .. } => Some(*key),
                _ => None,
            })
            .collect()
    }

    /// Successful program selections as (channel, bank, program).
    pub fn programs(&self) -> Vec<(u8, u32, u8)> {
        self.programs.lock().clone()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.messages.lock().clear();
        self.programs.lock().clear();
    }
}

/// A mock engine with a fixed set of banks.
pub struct MockEngine {
    banks: HashMap<PathBuf, HashSet<(u32, u8)>>,
    renderers: Mutex<Vec<Arc<MockLog>>>,
    open_delay: Duration,
    note_delay: Duration,
    drum_channel: Option<u8>,
    shut_down: AtomicBool,
}

impl MockEngine {
    /// An engine that knows [`PIANO_BANK`] with programs 0 and 1 in bank 0
    /// and a drum kit at bank 128.
    pub fn new() -> MockEngine {
        MockEngine {
            banks: HashMap::new(),
            renderers: Mutex::new(Vec::new()),
            open_delay: Duration::ZERO,
            note_delay: Duration::ZERO,
            drum_channel: None,
            shut_down: AtomicBool::new(false),
        }
        .with_bank(PIANO_BANK, &[(0, 0), (0, 1), (128, 0)])
    }

    pub fn with_bank(mut self, path: &str, presets: &[(u32, u8)]) -> MockEngine {
        self.banks
            .insert(PathBuf::from(path), presets.iter().copied().collect());
        self
    }

    /// Makes every open take at least `delay`.
    pub fn with_open_delay(mut self, delay: Duration) -> MockEngine {
        self.open_delay = delay;
        self
    }

    /// Makes every note on block the caller for `delay` after it is logged.
    pub fn with_note_delay(mut self, delay: Duration) -> MockEngine {
        self.note_delay = delay;
        self
    }

    /// Restricts `channel` to percussion banks, the way rustysynth treats
    /// channel 9.
    pub fn with_drum_channel(mut self, channel: u8) -> MockEngine {
        self.drum_channel = Some(channel);
        self
    }

    /// The log of the `index`th renderer opened.
    pub fn renderer(&self, index: usize) -> Arc<MockLog> {
        Arc::clone(&self.renderers.lock()[index])
    }

    pub fn opened(&self) -> usize {
        self.renderers.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl SynthEngine for MockEngine {
    fn open(&self, bank_path: &Path) -> Result<Box<dyn Renderer>, LoadError> {
        thread::sleep(self.open_delay);

        let presets = match self.banks.get(bank_path) {
            Some(presets) => presets.clone(),
            None => {
                return Err(LoadError::Open {
                    path: bank_path.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such mock bank"),
                })
            }
        };

        let log = Arc::new(MockLog::default());
        self.renderers.lock().push(Arc::clone(&log));
        Ok(Box::new(MockRenderer {
            presets,
            log,
            note_delay: self.note_delay,
            drum_channel: self.drum_channel,
        }))
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

struct MockRenderer {
    presets: HashSet<(u32, u8)>,
    log: Arc<MockLog>,
    note_delay: Duration,
    drum_channel: Option<u8>,
}

impl Renderer for MockRenderer {
    fn select_program(&mut self, channel: u8, bank: u32, program: u8) -> Result<(), LoadError> {
        if self.drum_channel == Some(channel) && bank < PERCUSSION_BANK {
            return Err(LoadError::PercussionOnly { channel, bank });
        }
        if !self.presets.contains(&(bank, program)) {
            return Err(LoadError::MissingPreset { bank, program });
        }
        self.log.programs.lock().push((channel, bank, program));
        Ok(())
    }

    fn process(&mut self, channel: u8, message: ChannelMessage) {
        self.log.messages.lock().push((channel, message));
        if matches!(message, ChannelMessage::NoteOn { .. }) && !self.note_delay.is_zero() {
            thread::sleep(self.note_delay);
        }
    }

    fn drum_channel(&self) -> Option<u8> {
        self.drum_channel
    }
}

impl Drop for MockRenderer {
    fn drop(&mut self) {
        self.log.released.store(true, Ordering::SeqCst);
    }
}
