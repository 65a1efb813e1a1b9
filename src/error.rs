//! Error taxonomy reported to the host.
//!
//! Internal subsystems have their own error types ([`LoadError`],
//! [`TimelineError`]); the session layer converts them into a
//! [`SessionError`] so every failure the host sees carries one of a small set
//! of kinds plus a readable message.

use crate::audio::LoadError;
use crate::midi::TimelineError;
use thiserror::Error;

/// Result type used by every public session operation.
pub type Result<T> = std::result::Result<T, SessionError>;

/// The kind of a [`SessionError`], independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required argument is missing or outside its range.
    InvalidArgument,
    /// Unknown instance id or channel.
    NotFound,
    /// A soundfont bank or one of its presets could not be loaded.
    LoadFailed,
    /// A MIDI file could not be read or parsed.
    FileLoadFailed,
    /// The session has been disposed.
    EngineNotAvailable,
    /// The requested method does not exist.
    NotImplemented,
}

impl ErrorKind {
    /// Stable code string sent to the host alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::LoadFailed => "LOAD_FAILED",
            ErrorKind::FileLoadFailed => "FILE_LOAD_FAILED",
            ErrorKind::EngineNotAvailable => "ENGINE_NOT_AVAILABLE",
            ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
        }
    }
}

/// An error returned by a session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to load soundfont: {0}")]
    LoadFailed(String),

    #[error("failed to load MIDI file: {0}")]
    FileLoadFailed(String),

    #[error("synthesis engine is not available")]
    EngineNotAvailable,

    #[error("method not implemented: {0}")]
    NotImplemented(String),
}

impl SessionError {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::LoadFailed(_) => ErrorKind::LoadFailed,
            SessionError::FileLoadFailed(_) => ErrorKind::FileLoadFailed,
            SessionError::EngineNotAvailable => ErrorKind::EngineNotAvailable,
            SessionError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }

    /// Shorthand for `self.kind().code()`.
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        SessionError::InvalidArgument(message.into())
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        SessionError::NotFound(message.into())
    }
}

impl From<LoadError> for SessionError {
    fn from(e: LoadError) -> Self {
        SessionError::LoadFailed(e.to_string())
    }
}

impl From<TimelineError> for SessionError {
    fn from(e: TimelineError) -> Self {
        SessionError::FileLoadFailed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_code() {
        let err = SessionError::invalid_argument("sfId is required");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert_eq!(err.to_string(), "invalid argument: sfId is required");

        assert_eq!(SessionError::EngineNotAvailable.code(), "ENGINE_NOT_AVAILABLE");
        assert_eq!(
            SessionError::NotImplemented("fooBar".into()).kind(),
            ErrorKind::NotImplemented
        );
    }

    #[test]
    fn test_internal_errors_convert() {
        let load = LoadError::MissingPreset {
            bank: 3,
            program: 17,
        };
        let err: SessionError = load.into();
        assert_eq!(err.kind(), ErrorKind::LoadFailed);
        assert!(err.to_string().contains("bank 3 program 17"));

        let timeline = TimelineError::Parse("bad header".into());
        let err: SessionError = timeline.into();
        assert_eq!(err.kind(), ErrorKind::FileLoadFailed);
        assert!(err.to_string().contains("bad header"));
    }
}
