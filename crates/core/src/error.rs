use std::time::Duration;

/// Failure kinds surfaced by the voice session controller and its sessions.
///
/// Errors travel inside events across task boundaries, so the type is `Clone`
/// and carries plain strings rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("speech credentials unavailable or invalid: {0}")]
    Credential(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("speech recognition failed: {0}")]
    Recognition(String),
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("voice session controller is no longer running")]
    ControllerClosed,
}

impl VoiceError {
    /// Device and permission failures end the whole cycle.
    pub fn is_device_failure(&self) -> bool {
        matches!(self, VoiceError::PermissionDenied(_) | VoiceError::Device(_))
    }
}
