// Bus Tracker Android JNI Library
// Drives the Rust tracking session from the Kotlin foreground service

pub mod android_jni;
pub mod batch;
pub mod error;
pub mod platform;

pub use error::{BridgeResult, JniBridgeError};
pub use platform::{JniContext, JniLocationSource, JniPlatform};
