use thiserror::Error;

/// Errors surfaced by the capture coordinator.
///
/// Permission and state-conflict variants are returned to the caller as typed
/// failures. Hardware callback failures are logged by the pipeline and only reach
/// the caller while an `open` is still pending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),
    #[error("Already streaming: {0}")]
    AlreadyStreaming(String),
    #[error("Already recording: {0}")]
    AlreadyRecording(String),
    #[error("Not recording: {0}")]
    NotRecording(String),
    #[error("Device error: {0}")]
    DeviceError(String),
    #[error("Session configuration error: {0}")]
    SessionConfigurationError(String),
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Frame conversion error: {0}")]
    ConversionError(String),
    #[error("Recording error: {0}")]
    RecordingError(String),
    #[error("Audio error: {0}")]
    AudioError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl CaptureError {
    /// State conflicts are reported to the caller but leave the pipeline untouched.
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            CaptureError::AlreadyStreaming(_)
                | CaptureError::AlreadyRecording(_)
                | CaptureError::NotRecording(_)
                | CaptureError::InvalidState(_)
        )
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(error: std::io::Error) -> Self {
        CaptureError::IoError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = CaptureError::PermissionDenied("camera".to_string());
        assert_eq!(err.to_string(), "Permission denied: camera");

        let err = CaptureError::SessionConfigurationError("configure failed".to_string());
        assert!(err.to_string().contains("configure failed"));
    }

    #[test]
    fn test_state_conflicts() {
        assert!(CaptureError::AlreadyStreaming("image".into()).is_state_conflict());
        assert!(CaptureError::NotRecording("idle".into()).is_state_conflict());
        assert!(!CaptureError::DeviceError("gone".into()).is_state_conflict());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing dir");
        let err: CaptureError = io.into();
        assert!(matches!(err, CaptureError::IoError(ref msg) if msg.contains("missing dir")));
    }
}
