/// Errors raised by the recording session manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordingError {
    /// A named session (or a fork) is already recording.
    #[error("A recording is already in progress. Stop it first.")]
    AlreadyRecording,
    #[error("No active recording. Start a recording first.")]
    NoActiveSession,
    #[error("Unknown step type: {0}")]
    UnknownStepKind(String),
}

impl RecordingError {
    /// Machine-readable code for tool envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            RecordingError::AlreadyRecording => codes::ALREADY_RECORDING,
            RecordingError::NoActiveSession => codes::NO_ACTIVE_SESSION,
            RecordingError::UnknownStepKind(_) => codes::UNKNOWN_STEP_KIND,
        }
    }
}

/// Error codes used across the buildlog crates
pub mod codes {
    pub const ALREADY_RECORDING: &str = "already_recording";
    pub const NO_ACTIVE_SESSION: &str = "no_active_session";
    pub const UNKNOWN_STEP_KIND: &str = "unknown_step_kind";
    pub const REMOTE_NOT_FOUND: &str = "remote_not_found";
    pub const REMOTE_AUTH_REQUIRED: &str = "remote_auth_required";
    pub const REMOTE_TRANSPORT_ERROR: &str = "remote_transport_error";
    pub const INVALID_DOCUMENT_SHAPE: &str = "invalid_document_shape";
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
