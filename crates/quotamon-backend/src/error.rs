use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable for device {device}: {reason}")]
    Unavailable { device: String, reason: String },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("No {kind} quota listed for device {device}")]
    MissingQuota { device: String, kind: String },
}
