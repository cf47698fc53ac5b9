use crate::types::FramePair;

/// Status codes returned by the vendor tracking service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkStatus {
    /// Generic failure reported by the service.
    Error,
    /// The arguments were rejected (unsupported frame pair, unknown UUID, ...).
    InvalidArgument,
    /// The service is not bound or has not produced data yet.
    NotReady,
}

impl std::fmt::Display for SdkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SdkStatus::Error => write!(f, "error"),
            SdkStatus::InvalidArgument => write!(f, "invalid argument"),
            SdkStatus::NotReady => write!(f, "not ready"),
        }
    }
}

/// Result of a single vendor service call.
pub type SdkResult<T> = std::result::Result<T, SdkStatus>;

/// Errors that can occur when driving the tracking session.
#[derive(Debug, thiserror::Error)]
pub enum TangoError {
    #[error("Configuration rejected: {0}")]
    Configuration(String),

    #[error("Query failed: {0}")]
    QueryFailure(SdkStatus),

    #[error("Frame pair {0} cannot be resolved")]
    InvalidFramePair(FramePair),

    #[error("A save is already in progress for '{0}'")]
    ConcurrentSaveRejected(String),

    #[error("Tracking service is not running")]
    ServiceNotRunning,

    #[error("Service call {call} failed: {status}")]
    Sdk { call: &'static str, status: SdkStatus },

    #[error("Area description save failed: {0}")]
    SaveFailed(String),

    #[error("Timeout waiting for operation")]
    Timeout,

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TangoError {
    /// Wrap a failed vendor call, keeping the call name for the log line.
    pub(crate) fn sdk(call: &'static str) -> impl FnOnce(SdkStatus) -> TangoError {
        move |status| TangoError::Sdk { call, status }
    }
}
