//! Standard MIDI File (SMF) timeline resolution.
//!
//! Resolves a .mid file into a single list of channel events stamped with
//! their wall-clock offset from the start of playback. Tempo changes from any
//! track apply to the whole file.
//!
//! # Supported input
//!
//! - Format 0 (single track) and Format 1 (parallel tracks, merged)
//! - Format 2 (sequential tracks, played back to back)
//! - Metrical timing with tempo map, and SMPTE timecode timing
//! - System exclusive and meta events other than tempo are not forwarded

use super::{ChannelMessage, DEFAULT_TEMPO_USEC};
use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while resolving a MIDI file.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MIDI parse error: {0}")]
    Parse(String),

    #[error("unsupported format: {0}")]
    Unsupported(String),
}

/// A channel message scheduled at an offset from the start of playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEvent {
    /// Offset from the start of the timeline.
    pub at: Duration,
    /// Destination channel (0-15).
    pub channel: u8,
    pub message: ChannelMessage,
}

/// Every channel event of a MIDI file in playback order.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    events: Vec<TimedEvent>,
    duration: Duration,
}

/// An event before tick-to-time conversion.
enum RawKind {
    Tempo(u32),
    Message(u8, ChannelMessage),
}

struct RawEvent {
    tick: u64,
    kind: RawKind,
}

impl Timeline {
    /// Reads and resolves a MIDI file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a valid SMF.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TimelineError> {
        let data = fs::read(path.as_ref())?;
        Self::parse(&data)
    }

    /// Resolves SMF bytes into a timeline.
    pub fn parse(data: &[u8]) -> Result<Self, TimelineError> {
        let smf = Smf::parse(data).map_err(|e| TimelineError::Parse(e.to_string()))?;

        let mut raw = Vec::new();
        let mut end_tick: u64 = 0;
        let mut track_offset: u64 = 0;

        for track in &smf.tracks {
            // Format 2 tracks are independent patterns played one after another.
            let start = match smf.header.format {
                Format::Sequential => track_offset,
                Format::SingleTrack | Format::Parallel => 0,
            };
            let mut tick = start;

            for event in track {
                tick += event.delta.as_int() as u64;
                match event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(usec)) => {
                        let usec = usec.as_int();
                        if usec > 0 {
                            raw.push(RawEvent {
                                tick,
                                kind: RawKind::Tempo(usec),
                            });
                        }
                    }
                    TrackEventKind::Midi { channel, message } => {
                        raw.push(RawEvent {
                            tick,
                            kind: RawKind::Message(channel.as_int(), convert_message(message)),
                        });
                    }
                    _ => {} // Ignore SysEx and other meta events
                }
            }

            end_tick = end_tick.max(tick);
            track_offset = tick;
        }

        // Stable sort keeps per-track order for events on the same tick.
        raw.sort_by_key(|event| event.tick);

        let clock = TickClock::new(smf.header.timing)?;
        let (events, duration) = clock.resolve(&raw, end_tick);

        Ok(Self { events, duration })
    }

    /// Builds a timeline from already-timed events.
    ///
    /// Events are sorted by time; the duration is extended to cover the
    /// last event.
    pub fn from_events(mut events: Vec<TimedEvent>, duration: Duration) -> Self {
        events.sort_by_key(|event| event.at);
        let last = events.last().map(|event| event.at).unwrap_or_default();
        Self {
            events,
            duration: duration.max(last),
        }
    }

    /// Returns the events in playback order.
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    /// Total length, up to the latest end-of-track.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Converts a midly message into a channel message.
/// Note on with velocity 0 is a note off.
fn convert_message(message: MidiMessage) -> ChannelMessage {
    match message {
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => ChannelMessage::NoteOff {
            key: key.as_int(),
        },
        MidiMessage::NoteOn { key, vel } => ChannelMessage::NoteOn {
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOff { key, .. } => ChannelMessage::NoteOff { key: key.as_int() },
        MidiMessage::Aftertouch { key, vel } => ChannelMessage::KeyPressure {
            key: key.as_int(),
            pressure: vel.as_int(),
        },
        MidiMessage::Controller { controller, value } => ChannelMessage::ControlChange {
            controller: controller.as_int(),
            value: value.as_int(),
        },
        MidiMessage::ProgramChange { program } => ChannelMessage::ProgramChange {
            program: program.as_int(),
        },
        MidiMessage::ChannelAftertouch { vel } => ChannelMessage::ChannelPressure {
            pressure: vel.as_int(),
        },
        MidiMessage::PitchBend { bend } => ChannelMessage::PitchBend {
            value: bend.0.as_int(),
        },
    }
}

/// Converts ticks to wall-clock time for one file's timing mode.
enum TickClock {
    /// Ticks per quarter note; tempo comes from the file.
    Metrical(u64),
    /// Fixed ticks per second.
    Timecode(f64),
}

impl TickClock {
    fn new(timing: Timing) -> Result<Self, TimelineError> {
        match timing {
            Timing::Metrical(tpb) => {
                let tpb = tpb.as_int() as u64;
                if tpb == 0 {
                    return Err(TimelineError::Unsupported(
                        "zero ticks per beat".to_string(),
                    ));
                }
                Ok(TickClock::Metrical(tpb))
            }
            Timing::Timecode(fps, subframe) => {
                let per_second = fps.as_f32() as f64 * subframe as f64;
                if per_second <= 0.0 {
                    return Err(TimelineError::Unsupported(
                        "zero ticks per second in SMPTE timing".to_string(),
                    ));
                }
                Ok(TickClock::Timecode(per_second))
            }
        }
    }

    /// Walks the sorted raw events, applying tempo changes as they occur.
    fn resolve(&self, raw: &[RawEvent], end_tick: u64) -> (Vec<TimedEvent>, Duration) {
        let mut events = Vec::with_capacity(raw.len());
        let mut tempo = DEFAULT_TEMPO_USEC as u64;
        let mut last_tick: u64 = 0;
        let mut elapsed_ns: u128 = 0;

        for event in raw {
            elapsed_ns += self.span_ns(event.tick - last_tick, tempo);
            last_tick = event.tick;

            match event.kind {
                RawKind::Tempo(usec) => {
                    if let TickClock::Metrical(_) = self {
                        tempo = usec as u64;
                    }
                }
                RawKind::Message(channel, message) => events.push(TimedEvent {
                    at: nanos_to_duration(elapsed_ns),
                    channel,
                    message,
                }),
            }
        }

        elapsed_ns += self.span_ns(end_tick.saturating_sub(last_tick), tempo);
        (events, nanos_to_duration(elapsed_ns))
    }

    fn span_ns(&self, ticks: u64, tempo_usec: u64) -> u128 {
        match self {
            TickClock::Metrical(tpb) => {
                // Use u128 to avoid overflow on long files
                (ticks as u128 * tempo_usec as u128 * 1_000) / *tpb as u128
            }
            TickClock::Timecode(per_second) => {
                (ticks as f64 / per_second * 1_000_000_000.0) as u128
            }
        }
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{smf_bytes, smf_bytes_with_timing, Ev};
    use midly::{Format, Fps};

    #[test]
    fn test_tempo_map() {
        // 500 ticks per beat at 120 BPM is 1 ms per tick.
        let bytes = smf_bytes(
            Format::SingleTrack,
            500,
            vec![vec![
                (0, Ev::On(0, 60, 100)),
                (500, Ev::Off(0, 60)),
                // Double the tempo: 0.5 ms per tick from here.
                (0, Ev::Tempo(250_000)),
                (500, Ev::On(1, 62, 90)),
                (100, Ev::End),
            ]],
        );

        let timeline = Timeline::parse(&bytes).unwrap();
        let times: Vec<Duration> = timeline.events().iter().map(|e| e.at).collect();
        assert_eq!(
            times,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(500),
                Duration::from_millis(750),
            ]
        );
        assert_eq!(timeline.events()[2].channel, 1);
        assert_eq!(timeline.duration(), Duration::from_millis(800));
    }

    #[test]
    fn test_smpte_timing() {
        // 25 frames of 40 subframes is 1000 ticks per second.
        let bytes = smf_bytes_with_timing(
            Format::SingleTrack,
            Timing::Timecode(Fps::Fps25, 40),
            vec![vec![
                (0, Ev::On(0, 60, 100)),
                (500, Ev::Off(0, 60)),
                // Tempo has no effect on timecode files.
                (0, Ev::Tempo(250_000)),
                (250, Ev::On(0, 62, 100)),
                (250, Ev::End),
            ]],
        );

        let timeline = Timeline::parse(&bytes).unwrap();
        let times: Vec<Duration> = timeline.events().iter().map(|e| e.at).collect();
        assert_eq!(
            times,
            vec![
                Duration::from_millis(0),
                Duration::from_millis(500),
                Duration::from_millis(750),
            ]
        );
        assert_eq!(timeline.duration(), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_velocity_is_note_off() {
        let bytes = smf_bytes(
            Format::SingleTrack,
            500,
            vec![vec![(0, Ev::On(2, 64, 80)), (10, Ev::On(2, 64, 0)), (0, Ev::End)]],
        );

        let timeline = Timeline::parse(&bytes).unwrap();
        assert_eq!(
            timeline.events()[1].message,
            ChannelMessage::NoteOff { key: 64 }
        );
    }

    #[test]
    fn test_parallel_tracks_are_merged() {
        let bytes = smf_bytes(
            Format::Parallel,
            500,
            vec![
                vec![(0, Ev::Tempo(500_000)), (0, Ev::End)],
                vec![(100, Ev::On(0, 60, 100)), (300, Ev::End)],
                vec![(50, Ev::On(9, 36, 100)), (50, Ev::Program(9, 0)), (0, Ev::End)],
            ],
        );

        let timeline = Timeline::parse(&bytes).unwrap();
        let order: Vec<(u64, u8)> = timeline
            .events()
            .iter()
            .map(|e| (e.at.as_millis() as u64, e.channel))
            .collect();
        assert_eq!(order, vec![(50, 9), (100, 0), (100, 9)]);
        assert_eq!(timeline.duration(), Duration::from_millis(400));
    }

    #[test]
    fn test_sequential_tracks_follow_each_other() {
        let bytes = smf_bytes(
            Format::Sequential,
            500,
            vec![
                vec![(0, Ev::On(0, 60, 100)), (200, Ev::End)],
                vec![(0, Ev::On(0, 62, 100)), (200, Ev::End)],
            ],
        );

        let timeline = Timeline::parse(&bytes).unwrap();
        assert_eq!(timeline.events()[1].at, Duration::from_millis(200));
        assert_eq!(timeline.duration(), Duration::from_millis(400));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let result = Timeline::parse(b"definitely not a midi file");
        assert!(matches!(result, Err(TimelineError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = Timeline::load("/nonexistent/file.mid");
        assert!(matches!(result, Err(TimelineError::Io(_))));
    }

    #[test]
    fn test_from_events_sorts_and_covers_last_event() {
        let timeline = Timeline::from_events(
            vec![
                TimedEvent {
                    at: Duration::from_millis(30),
                    channel: 0,
                    message: ChannelMessage::NoteOff { key: 60 },
                },
                TimedEvent {
                    at: Duration::from_millis(10),
                    channel: 0,
                    message: ChannelMessage::NoteOn {
                        key: 60,
                        velocity: 100,
                    },
                },
            ],
            Duration::ZERO,
        );
        assert_eq!(timeline.events()[0].at, Duration::from_millis(10));
        assert_eq!(timeline.duration(), Duration::from_millis(30));
    }
}
