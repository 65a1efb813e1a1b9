//! Method-name dispatch for host calls.
//!
//! A host bridge forwards each call as a method name plus a JSON object of
//! named arguments, and gets back a JSON value or a [`SessionError`].

use super::{InstanceId, SessionManager};
use crate::error::{Result, SessionError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named call with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl MethodCall {
    /// Builds a call. Anything but a JSON object yields no arguments.
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            method: method.into(),
            arguments,
        }
    }

    fn optional<T: TryFrom<u64>>(&self, name: &str) -> Result<Option<T>> {
        let Some(value) = self.arguments.get(name).filter(|v| !v.is_null()) else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|raw| T::try_from(raw).ok())
            .map(Some)
            .ok_or_else(|| SessionError::invalid_argument(format!("{} is out of range: {}", name, value)))
    }

    fn required<T: TryFrom<u64>>(&self, name: &str) -> Result<T> {
        self.optional(name)?
            .ok_or_else(|| SessionError::invalid_argument(format!("{} is required", name)))
    }

    fn or_default<T: TryFrom<u64> + Default>(&self, name: &str) -> Result<T> {
        Ok(self.optional(name)?.unwrap_or_default())
    }

    fn string(&self, name: &str) -> Result<&str> {
        self.arguments
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::invalid_argument(format!("{} is required", name)))
    }

    fn flag(&self, name: &str, default: bool) -> Result<bool> {
        match self.arguments.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(other) => Err(SessionError::invalid_argument(format!(
                "{} must be a boolean: {}",
                name, other
            ))),
        }
    }

    /// The `channel` argument of calls that report an unknown channel as
    /// `NotFound`, whatever its magnitude.
    fn addressed_channel(&self) -> Result<u8> {
        let raw: u64 = self.or_default("channel")?;
        u8::try_from(raw)
            .map_err(|_| SessionError::not_found(format!("channel {} does not exist", raw)))
    }

    fn instance(&self) -> Result<InstanceId> {
        let raw: u64 = self.required("sfId")?;
        InstanceId::new(raw)
            .ok_or_else(|| SessionError::not_found(format!("soundfont instance {} not found", raw)))
    }
}

impl SessionManager {
    /// Runs a host call and returns its JSON result.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for missing or out-of-range arguments,
    /// `NotImplemented` for unknown methods, and whatever the operation
    /// itself reports.
    pub async fn handle(&self, call: &MethodCall) -> Result<Value> {
        tracing::trace!("Handling {}", call.method);

        match call.method.as_str() {
            "loadSoundfont" => {
                let path = call.string("path")?.to_string();
                let bank = call.or_default("bank")?;
                let program = call.or_default("program")?;
                let id = self.load_soundfont(path, bank, program).await?;
                Ok(Value::from(id.get()))
            }
            "selectInstrument" => {
                self.select_instrument(
                    call.instance()?,
                    call.addressed_channel()?,
                    call.or_default("bank")?,
                    call.or_default("program")?,
                )?;
                Ok(Value::Null)
            }
            "playNote" => {
                self.play_note(
                    call.instance()?,
                    call.required("channel")?,
                    call.required("key")?,
                    call.required("velocity")?,
                )?;
                Ok(Value::Null)
            }
            "stopNote" => {
                self.stop_note(
                    call.instance()?,
                    call.required("channel")?,
                    call.required("key")?,
                )?;
                Ok(Value::Null)
            }
            "stopAllNotes" => {
                self.stop_all_notes(call.instance()?)?;
                Ok(Value::Null)
            }
            "controlChange" => {
                self.control_change(
                    call.instance()?,
                    call.addressed_channel()?,
                    call.or_default("controller")?,
                    call.or_default("value")?,
                )?;
                Ok(Value::Null)
            }
            "unloadSoundfont" => {
                self.unload_soundfont(call.instance()?)?;
                Ok(Value::Null)
            }
            "dispose" => {
                self.dispose()?;
                Ok(Value::Null)
            }
            "playMidiFile" => {
                let id = call.instance()?;
                let path = call.string("path")?;
                let looping = call.flag("loop", true)?;
                self.play_midi_file(id, path, looping)?;
                Ok(Value::Null)
            }
            "pauseMidiFile" => {
                self.pause_midi_file(call.instance()?)?;
                Ok(Value::Null)
            }
            "resumeMidiFile" => {
                self.resume_midi_file(call.instance()?)?;
                Ok(Value::Null)
            }
            "stopMidiFile" => {
                self.stop_midi_file(call.instance()?)?;
                Ok(Value::Null)
            }
            "isMidiPlayerPlaying" => Ok(Value::Bool(self.is_midi_playing(call.instance()?)?)),
            other => Err(SessionError::NotImplemented(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::{MockEngine, PIANO_BANK};
    use crate::config::SessionConfig;
    use crate::error::ErrorKind;
    use crate::midi::ChannelMessage;
    use crate::testutil::write_note_file;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn session() -> (Arc<MockEngine>, SessionManager) {
        let engine = Arc::new(MockEngine::new());
        let manager = SessionManager::new(engine.clone(), SessionConfig::default());
        (engine, manager)
    }

    async fn call(manager: &SessionManager, method: &str, arguments: Value) -> Result<Value> {
        manager.handle(&MethodCall::new(method, arguments)).await
    }

    #[tokio::test]
    async fn test_load_uses_default_bank_and_program() {
        let (engine, manager) = session();

        let id = call(&manager, "loadSoundfont", json!({ "path": PIANO_BANK }))
            .await
            .unwrap();
        assert_eq!(id, json!(1));
        assert!(engine.renderer(0).programs().iter().all(|&(_, bank, program)| bank == 0 && program == 0));

        let id = call(
            &manager,
            "loadSoundfont",
            json!({ "path": PIANO_BANK, "bank": 0, "program": 1 }),
        )
        .await
        .unwrap();
        assert_eq!(id, json!(2));
    }

    #[tokio::test]
    async fn test_missing_or_bad_arguments_are_invalid() {
        let (_engine, manager) = session();
        call(&manager, "loadSoundfont", json!({ "path": PIANO_BANK }))
            .await
            .unwrap();

        let cases = [
            ("loadSoundfont", json!({})),
            ("playNote", json!({ "sfId": 1, "channel": 0, "key": 60 })),
            ("playNote", json!({ "sfId": 1, "channel": 0, "key": 60, "velocity": 300 })),
            ("playNote", json!({ "sfId": 1, "channel": -1, "key": 60, "velocity": 1 })),
            ("stopNote", json!({ "channel": 0, "key": 60 })),
            ("playMidiFile", json!({ "sfId": 1 })),
            ("playMidiFile", json!({ "sfId": 1, "path": "a.mid", "loop": "yes" })),
            ("pauseMidiFile", json!({})),
        ];
        for (method, arguments) in cases {
            let err = call(&manager, method, arguments.clone()).await.unwrap_err();
            assert_eq!(
                err.kind(),
                ErrorKind::InvalidArgument,
                "{} {}",
                method,
                arguments
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_channel_is_not_found_at_any_size() {
        let (_engine, manager) = session();
        call(&manager, "loadSoundfont", json!({ "path": PIANO_BANK }))
            .await
            .unwrap();

        for channel in [16, 255, 256, 100_000] {
            let cases = [
                ("controlChange", json!({ "sfId": 1, "channel": channel, "controller": 7, "value": 1 })),
                ("selectInstrument", json!({ "sfId": 1, "channel": channel, "bank": 0, "program": 1 })),
            ];
            for (method, arguments) in cases {
                let err = call(&manager, method, arguments).await.unwrap_err();
                assert_eq!(err.kind(), ErrorKind::NotFound, "{} channel {}", method, channel);
            }
        }
    }

    #[tokio::test]
    async fn test_note_and_controller_calls() {
        let (engine, manager) = session();
        call(&manager, "loadSoundfont", json!({ "path": PIANO_BANK }))
            .await
            .unwrap();
        let log = engine.renderer(0);
        log.clear();

        call(
            &manager,
            "playNote",
            json!({ "sfId": 1, "channel": 1, "key": 60, "velocity": 127 }),
        )
        .await
        .unwrap();
        call(&manager, "stopNote", json!({ "sfId": 1, "channel": 1, "key": 60 }))
            .await
            .unwrap();
        call(&manager, "controlChange", json!({ "sfId": 1, "controller": 7, "value": 90 }))
            .await
            .unwrap();

        assert_eq!(
            log.messages(),
            vec![
                (1, ChannelMessage::NoteOn { key: 60, velocity: 127 }),
                (1, ChannelMessage::NoteOff { key: 60 }),
                (0, ChannelMessage::ControlChange { controller: 7, value: 90 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_implemented() {
        let (_engine, manager) = session();
        let err = call(&manager, "setReverb", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotImplemented);
        assert!(err.to_string().contains("setReverb"));
    }

    #[tokio::test]
    async fn test_unknown_instance_is_not_found() {
        let (_engine, manager) = session();
        for sf_id in [0, 7] {
            let err = call(&manager, "stopAllNotes", json!({ "sfId": sf_id }))
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }
        let playing = call(&manager, "isMidiPlayerPlaying", json!({ "sfId": 7 }))
            .await
            .unwrap();
        assert_eq!(playing, json!(false));
    }

    #[tokio::test]
    async fn test_midi_file_calls() {
        let (_engine, manager) = session();
        let dir = TempDir::new().unwrap();
        let path = write_note_file(dir.path(), "song.mid", &[(0, 0, 60)], 50, 1000);
        call(&manager, "loadSoundfont", json!({ "path": PIANO_BANK }))
            .await
            .unwrap();

        // Loops unless told otherwise.
        call(
            &manager,
            "playMidiFile",
            json!({ "sfId": 1, "path": path.to_str().unwrap() }),
        )
        .await
        .unwrap();
        assert_eq!(
            call(&manager, "isMidiPlayerPlaying", json!({ "sfId": 1 })).await.unwrap(),
            json!(true)
        );

        call(&manager, "pauseMidiFile", json!({ "sfId": 1 })).await.unwrap();
        assert_eq!(
            call(&manager, "isMidiPlayerPlaying", json!({ "sfId": 1 })).await.unwrap(),
            json!(false)
        );
        call(&manager, "resumeMidiFile", json!({ "sfId": 1 })).await.unwrap();
        call(&manager, "stopMidiFile", json!({ "sfId": 1 })).await.unwrap();

        let err = call(
            &manager,
            "playMidiFile",
            json!({ "sfId": 1, "path": dir.path().join("missing.mid").to_str().unwrap() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileLoadFailed);

        call(&manager, "dispose", json!({})).await.unwrap();
        let err = call(&manager, "stopMidiFile", json!({ "sfId": 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineNotAvailable);
        assert!(manager.events().recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_method_call_deserializes_without_arguments() {
        let call: MethodCall = serde_json::from_str(r#"{"method":"dispose"}"#).unwrap();
        assert_eq!(call.method, "dispose");
        assert!(call.arguments.is_empty());
    }
}
