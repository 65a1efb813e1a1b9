//! Audio output shared by every instance.
//!
//! rodio's `OutputStream` cannot move between threads, so it lives on a
//! dedicated thread for the lifetime of the engine. Instances attach a
//! [`SynthSource`] to the stream's mixer through the sendable handle.

use super::LoadError;
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use rodio::{OutputStream, OutputStreamHandle, Source};
use rustysynth::Synthesizer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Audio source that generates samples from one instance's synthesizer.
/// Implements rodio's Source trait for playback.
pub(crate) struct SynthSource {
    /// The synthesizer instance.
    synth: Arc<Mutex<Synthesizer>>,
    /// Set when the owning instance is released; ends the source.
    closed: Arc<AtomicBool>,
    sample_rate: u32,
    /// Left channel buffer.
    left_buf: Vec<f32>,
    /// Right channel buffer.
    right_buf: Vec<f32>,
    /// Current position in the buffer.
    buf_pos: usize,
    /// Current channel (0 = left, 1 = right).
    channel: usize,
}

impl SynthSource {
    pub fn new(
        synth: Arc<Mutex<Synthesizer>>,
        closed: Arc<AtomicBool>,
        sample_rate: u32,
        buffer_size: usize,
    ) -> Self {
        Self {
            synth,
            closed,
            sample_rate,
            left_buf: vec![0.0; buffer_size],
            right_buf: vec![0.0; buffer_size],
            buf_pos: buffer_size, // Start at end to trigger first render
            channel: 0,
        }
    }
}

impl Iterator for SynthSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.buf_pos >= self.left_buf.len() {
            // Returning None detaches the source from the mixer.
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            // Never block the audio thread on a control operation.
            match self.synth.try_lock() {
                Some(mut synth) => synth.render(&mut self.left_buf, &mut self.right_buf),
                None => {
                    self.left_buf.fill(0.0);
                    self.right_buf.fill(0.0);
                }
            }
            self.buf_pos = 0;
        }

        // Interleave stereo samples: L, R, L, R, ...
        let sample = if self.channel == 0 {
            self.left_buf[self.buf_pos]
        } else {
            self.right_buf[self.buf_pos]
        };

        self.channel = 1 - self.channel;
        if self.channel == 0 {
            self.buf_pos += 1;
        }

        Some(sample)
    }
}

impl Source for SynthSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2 // Stereo
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None // Runs until the instance is released
    }
}

/// The running output device.
struct Running {
    /// Dropping this sender tells the output thread to close the stream.
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

/// Process-wide audio output.
pub(crate) struct AudioOutput {
    handle: OutputStreamHandle,
    running: Mutex<Option<Running>>,
}

impl AudioOutput {
    /// Opens the default output device on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened.
    pub fn open() -> Result<Self, LoadError> {
        let (ready_tx, ready_rx) = bounded::<Result<OutputStreamHandle, String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let thread = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    if ready_tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // Blocks until the sender is dropped.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    tracing::debug!("Audio output closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| LoadError::Output(e.to_string()))?;

        let handle = ready_rx
            .recv()
            .map_err(|_| LoadError::Output("output thread exited".to_string()))?
            .map_err(LoadError::Output)?;

        tracing::info!("Audio output opened");

        Ok(Self {
            handle,
            running: Mutex::new(Some(Running {
                shutdown: shutdown_tx,
                thread,
            })),
        })
    }

    /// Adds a source to the output mix.
    pub fn attach(&self, source: SynthSource) -> Result<(), LoadError> {
        if self.running.lock().is_none() {
            return Err(LoadError::Output("audio output is closed".to_string()));
        }
        self.handle
            .play_raw(source)
            .map_err(|e| LoadError::Output(e.to_string()))
    }

    /// Closes the device and waits for the output thread to exit.
    pub fn close(&self) {
        let running = self.running.lock().take();
        if let Some(Running { shutdown, thread }) = running {
            drop(shutdown);
            if thread.join().is_err() {
                tracing::error!("Audio output thread panicked");
            }
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}
