//! Error handling for the playback engine
//!
//! Every failure is caught where it happens and turned into an outbound
//! `error` event; the variants here are what those events carry.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    // Session Errors
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    #[error("Prompt delivery failed: {reason}")]
    Delivery { reason: String },

    #[error("There needs to be one active prompt to play")]
    NoActivePrompts,

    #[error("Generation backend error: {message}")]
    Backend { message: String },

    // Stream Errors
    #[error("Decode error: {reason}")]
    Decode { reason: String },

    // Recording Errors
    #[error("Nothing was recorded")]
    EmptyRecording,

    #[error(
        "Recorded buffers disagree: expected {expected_channels}ch @ {expected_rate}Hz, \
         found {found_channels}ch @ {found_rate}Hz"
    )]
    RecordingFormatMismatch {
        expected_channels: usize,
        expected_rate: u32,
        found_channels: usize,
        found_rate: u32,
    },

    #[error("Recording not allowed: {reason}")]
    RecordingNotAllowed { reason: String },

    // Asset / Configuration Errors
    #[error("Invalid audio file: {reason}")]
    InvalidAudio {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl EngineError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Connection { .. } => "CONNECTION_ERROR",
            EngineError::Delivery { .. } => "DELIVERY_ERROR",
            EngineError::NoActivePrompts => "NO_ACTIVE_PROMPTS",
            EngineError::Backend { .. } => "BACKEND_ERROR",
            EngineError::Decode { .. } => "DECODE_ERROR",
            EngineError::EmptyRecording => "EMPTY_RECORDING",
            EngineError::RecordingFormatMismatch { .. } => "RECORDING_FORMAT_MISMATCH",
            EngineError::RecordingNotAllowed { .. } => "RECORDING_NOT_ALLOWED",
            EngineError::InvalidAudio { .. } => "INVALID_AUDIO",
            EngineError::Config { .. } => "CONFIG_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serialization(_) => "SERIALIZATION_ERROR",
            EngineError::Wav(_) => "WAV_ERROR",
        }
    }

    /// Check if the engine keeps running after this error
    ///
    /// Every session-level failure is absorbed; only setup errors
    /// (bad config, unreadable assets, I/O) stop the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Connection { .. }
                | EngineError::Delivery { .. }
                | EngineError::NoActivePrompts
                | EngineError::Backend { .. }
                | EngineError::Decode { .. }
                | EngineError::EmptyRecording
                | EngineError::RecordingFormatMismatch { .. }
                | EngineError::RecordingNotAllowed { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            EngineError::Connection { .. } => vec![
                "Playing local loops until the session is stopped",
                "Stop and press play again to retry the live connection",
            ],
            EngineError::NoActivePrompts | EngineError::Delivery { .. } => vec![
                "Raise the weight of at least one prompt above zero",
                "Replace prompts the backend has filtered",
            ],
            EngineError::EmptyRecording => {
                vec!["Wait for audio to start playing before stopping the recording"]
            }
            EngineError::RecordingNotAllowed { .. } => vec![
                "Recording is only available while a live session is loading or playing",
            ],
            EngineError::Config { .. } => vec!["Check the PROMPTDJ_* environment variables"],
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::NoActivePrompts.error_code(), "NO_ACTIVE_PROMPTS");
        let err = EngineError::Decode {
            reason: "odd length".to_string(),
        };
        assert_eq!(err.error_code(), "DECODE_ERROR");
    }

    #[test]
    fn test_session_errors_are_recoverable() {
        let err = EngineError::Connection {
            reason: "timeout".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!err.recovery_suggestions().is_empty());

        let err = EngineError::Config {
            reason: "sample rate is zero".to_string(),
        };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_mismatch_message_names_both_formats() {
        let err = EngineError::RecordingFormatMismatch {
            expected_channels: 2,
            expected_rate: 48000,
            found_channels: 1,
            found_rate: 44100,
        };
        let msg = err.to_string();
        assert!(msg.contains("2ch @ 48000Hz"));
        assert!(msg.contains("1ch @ 44100Hz"));
    }
}
