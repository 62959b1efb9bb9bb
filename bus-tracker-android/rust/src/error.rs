use bus_tracker_rs::TrackerError;
use jni::JNIEnv;
use thiserror::Error;

/// JNI bridge error types
#[derive(Error, Debug)]
pub enum JniBridgeError {
    #[error("Bridge not initialized; call nativeInit first")]
    NotInitialized,

    #[error("Invalid location batch: {0}")]
    InvalidBatch(String),

    #[error("JNI error: {0}")]
    Jni(#[from] jni::errors::Error),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<JniBridgeError> for TrackerError {
    fn from(error: JniBridgeError) -> Self {
        match error {
            JniBridgeError::Tracker(inner) => inner,
            other => TrackerError::Platform(other.to_string()),
        }
    }
}

/// Result type for JNI operations
pub type BridgeResult<T> = Result<T, JniBridgeError>;

/// Throw Java exception from Rust error
pub fn throw_java_exception(env: &mut JNIEnv, error: &JniBridgeError) -> BridgeResult<()> {
    let exception_class = match error {
        JniBridgeError::NotInitialized => "java/lang/IllegalStateException",
        JniBridgeError::InvalidBatch(_) => "java/lang/IllegalArgumentException",
        JniBridgeError::Jni(_)
        | JniBridgeError::Tracker(_)
        | JniBridgeError::Runtime(_)
        | JniBridgeError::Internal(_) => "java/lang/RuntimeException",
    };

    env.throw_new(exception_class, error.to_string())
        .map_err(|_| JniBridgeError::Internal("Failed to throw exception".to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_errors_pass_through() {
        let err: TrackerError = JniBridgeError::Tracker(TrackerError::PermissionDenied).into();
        assert_eq!(err, TrackerError::PermissionDenied);
    }

    #[test]
    fn test_bridge_errors_become_platform_errors() {
        let err: TrackerError = JniBridgeError::NotInitialized.into();
        assert!(matches!(err, TrackerError::Platform(msg) if msg.contains("nativeInit")));
    }
}
