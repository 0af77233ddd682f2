//! Error types for the coaching core.

/// Top-level error type for the coaching session.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    /// Audio device or stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// No input device accepted the session's capture format.
    #[error("no compatible microphone")]
    NoMicrophone,

    /// Connection to the perception service failed or dropped.
    #[error("perception link error: {0}")]
    Transport(String),

    /// The service rejected the stored session resumption handle.
    #[error("session resumption handle is stale")]
    StaleResumption,

    /// A message from the service could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A requested action was refused by local policy.
    #[error("policy refused action: {0}")]
    Policy(String),

    /// Window manager or screen capture failure.
    #[error("platform error: {0}")]
    Platform(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoachError {
    /// Whether the reconnect path should drop the resumption handle and retry fast.
    pub fn is_stale_resumption(&self) -> bool {
        matches!(self, Self::StaleResumption)
    }

    /// Whether this error ends the audio pipeline for the current connection.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, Self::Audio(_) | Self::NoMicrophone)
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoachError>;
