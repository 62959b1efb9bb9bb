use thiserror::Error;

/// Bus tracker error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote rejected fix with HTTP {status}: {body}")]
    RemoteRejected { status: u16, body: String },

    #[error("Teardown step '{step}' failed: {reason}")]
    ResourceTeardown { step: &'static str, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrackerError {
    /// Short classification used in log lines and counters
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::PermissionDenied => "PermissionDenied",
            TrackerError::SourceUnavailable(_) => "SourceUnavailable",
            TrackerError::Transport(_) => "TransportError",
            TrackerError::RemoteRejected { .. } => "RemoteRejected",
            TrackerError::ResourceTeardown { .. } => "ResourceTeardownError",
            TrackerError::InvalidConfig(_) => "InvalidConfig",
            TrackerError::Platform(_) => "Platform",
            TrackerError::Internal(_) => "Internal",
        }
    }
}

/// Result type for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            TrackerError::PermissionDenied,
            TrackerError::SourceUnavailable("no provider".to_string()),
            TrackerError::Transport("connection refused".to_string()),
            TrackerError::RemoteRejected {
                status: 500,
                body: "boom".to_string(),
            },
            TrackerError::ResourceTeardown {
                step: "wake_hold",
                reason: "not held".to_string(),
            },
            TrackerError::InvalidConfig("missing token".to_string()),
            TrackerError::Platform("jni".to_string()),
            TrackerError::Internal("lock".to_string()),
        ];

        for err in errors {
            assert!(!format!("{}", err).is_empty());
            assert!(!err.kind().is_empty());
        }
    }

    #[test]
    fn test_remote_rejected_mentions_status() {
        let err = TrackerError::RemoteRejected {
            status: 403,
            body: "forbidden".to_string(),
        };
        assert!(err.to_string().contains("403"));
        assert_eq!(err.kind(), "RemoteRejected");
    }
}
