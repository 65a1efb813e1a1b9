//! Helpers shared by the unit tests.

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

/// A compact description of one track event for building fixtures.
#[derive(Debug, Clone, Copy)]
pub enum Ev {
    /// (channel, key, velocity)
    On(u8, u8, u8),
    /// (channel, key)
    Off(u8, u8),
    /// (channel, program)
    Program(u8, u8),
    /// Microseconds per quarter note.
    Tempo(u32),
    End,
}

/// Encodes tracks of `(delta ticks, event)` pairs as SMF bytes.
pub fn smf_bytes(format: Format, ticks_per_beat: u16, tracks: Vec<Vec<(u32, Ev)>>) -> Vec<u8> {
    smf_bytes_with_timing(format, Timing::Metrical(u15::new(ticks_per_beat)), tracks)
}

/// Like [`smf_bytes`], with any header timing.
pub fn smf_bytes_with_timing(
    format: Format,
    timing: Timing,
    tracks: Vec<Vec<(u32, Ev)>>,
) -> Vec<u8> {
    let mut smf = Smf::new(Header::new(format, timing));

    for events in tracks {
        let track: Vec<TrackEvent<'static>> = events
            .into_iter()
            .map(|(delta, ev)| TrackEvent {
                delta: u28::new(delta),
                kind: match ev {
                    Ev::On(channel, key, vel) => TrackEventKind::Midi {
                        channel: u4::new(channel),
                        message: MidiMessage::NoteOn {
                            key: u7::new(key),
                            vel: u7::new(vel),
                        },
                    },
                    Ev::Off(channel, key) => TrackEventKind::Midi {
                        channel: u4::new(channel),
                        message: MidiMessage::NoteOff {
                            key: u7::new(key),
                            vel: u7::new(0),
                        },
                    },
                    Ev::Program(channel, program) => TrackEventKind::Midi {
                        channel: u4::new(channel),
                        message: MidiMessage::ProgramChange {
                            program: u7::new(program),
                        },
                    },
                    Ev::Tempo(usec) => TrackEventKind::Meta(MetaMessage::Tempo(u24::new(usec))),
                    Ev::End => TrackEventKind::Meta(MetaMessage::EndOfTrack),
                },
            })
            .collect();
        smf.tracks.push(track);
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("failed to encode SMF");
    bytes
}

/// Writes a single-track file where each tick lasts 1 ms.
///
/// `notes` are `(start ms, channel, key)`, each held for `hold_ms`. The
/// track ends at `length_ms`.
pub fn write_note_file(
    dir: &Path,
    name: &str,
    notes: &[(u32, u8, u8)],
    hold_ms: u32,
    length_ms: u32,
) -> PathBuf {
    let mut absolute: Vec<(u32, Ev)> = Vec::new();
    for &(start, channel, key) in notes {
        absolute.push((start, Ev::On(channel, key, 100)));
        absolute.push((start + hold_ms, Ev::Off(channel, key)));
    }
    absolute.sort_by_key(|(tick, _)| *tick);

    let mut track = Vec::new();
    let mut last = 0;
    for (tick, ev) in absolute {
        track.push((tick - last, ev));
        last = tick;
    }
    track.push((length_ms.saturating_sub(last), Ev::End));

    let path = dir.join(name);
    std::fs::write(&path, smf_bytes(Format::SingleTrack, 500, vec![track]))
        .expect("failed to write MIDI fixture");
    path
}

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    let mut tick = Duration::from_millis(2);
    let timeout = Duration::from_secs(5);
    let max_tick = Duration::from_millis(50);

    loop {
        if predicate() {
            return;
        }
        if start.elapsed() > timeout {
            panic!("{}", error_msg);
        }
        thread::sleep(tick);
        tick = std::cmp::min(tick * 2, max_tick);
    }
}
