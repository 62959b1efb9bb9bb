// Bus Tracker core
// Background location telemetry: session state machine, lifecycle guard and uplink

pub mod config;
pub mod control;
pub mod error;
pub mod fix;
pub mod guard;
pub mod health;
pub mod location;
pub mod session;
pub mod sources;
pub mod uplink;

pub use config::{Settings, TrackingConfig};
pub use control::{spawn_session, ControlHandle, SessionWorker};
pub use error::{Result, TrackerError};
pub use fix::{LocationFix, TelemetryRecord};
pub use guard::{HeadlessPlatform, HostPlatform, LifecycleGuard};
pub use location::{FixSink, LocationSource, SubscriptionHandle, SubscriptionId};
pub use session::{SessionSnapshot, SessionState, StartRequest, TrackingSession};
pub use sources::{SimulatedSource, TermuxSource};
pub use uplink::{Uplink, UplinkClient, UplinkRequest};
