//! Platform seams implemented over JNI.
//!
//! Every call lands on a static method of the Kotlin `TrackingBridge` class:
//!
//! | Rust                       | Kotlin                                                           |
//! |----------------------------|------------------------------------------------------------------|
//! | `ensure_channel`           | `createNotificationChannel(id, name, lowImportance, badge, public)` |
//! | `show_presence`            | `showNotification(id, channelId, title, text, ongoing)`          |
//! | `dismiss_presence`         | `cancelNotification(id)`                                         |
//! | `acquire_wake_hold`        | `acquireWakeLock(tag, timeoutMs)`                                |
//! | `wake_hold_held`           | `isWakeLockHeld(): Boolean`                                      |
//! | `release_wake_hold`        | `releaseWakeLock()`                                              |
//! | `subscribe`                | `requestLocationUpdates(subId, intervalMs, minIntervalMs, maxDelayMs, minDistance, waitAccurate): Int` |
//! | `unsubscribe`              | `removeLocationUpdates(subId)`                                   |

use crate::error::{BridgeResult, JniBridgeError};
use bus_tracker_rs::config::{LocationRequest, Priority};
use bus_tracker_rs::guard::{NotificationChannel, Presence};
use bus_tracker_rs::{
    FixSink, HostPlatform, LocationFix, LocationSource, Result, SubscriptionHandle,
    SubscriptionId, TrackerError,
};
use jni::objects::{GlobalRef, JClass, JValue};
use jni::{JNIEnv, JavaVM};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SUBSCRIBE_OK: i32 = 0;
const SUBSCRIBE_PERMISSION_DENIED: i32 = 1;

/// Map `requestLocationUpdates` return codes onto the tracker taxonomy
pub fn subscribe_result(code: i32) -> Result<()> {
    match code {
        SUBSCRIBE_OK => Ok(()),
        SUBSCRIBE_PERMISSION_DENIED => Err(TrackerError::PermissionDenied),
        other => Err(TrackerError::SourceUnavailable(format!(
            "requestLocationUpdates returned {}",
            other
        ))),
    }
}

fn millis(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}

/// VM plus the `TrackingBridge` class, cached at init so worker threads can
/// reach it without a class loader
pub struct JniContext {
    vm: JavaVM,
    class: GlobalRef,
}

impl JniContext {
    pub fn new(env: &mut JNIEnv, class: &JClass) -> BridgeResult<Self> {
        Ok(JniContext {
            vm: env.get_java_vm()?,
            class: env.new_global_ref(class)?,
        })
    }

    /// Run `f` on an attached env inside a local frame; pending Java exceptions are cleared
    fn with_env<T, F>(&self, f: F) -> BridgeResult<T>
    where
        F: FnOnce(&mut JNIEnv, &JClass) -> jni::errors::Result<T>,
    {
        let mut env = self.vm.attach_current_thread_permanently()?;
        let class = <&JClass>::from(self.class.as_obj());

        let result = env.with_local_frame(8, |env| f(env, class));

        if env.exception_check().unwrap_or(false) {
            let _ = env.exception_describe();
            let _ = env.exception_clear();
        }
        result.map_err(JniBridgeError::from)
    }
}

pub struct JniPlatform {
    ctx: Arc<JniContext>,
}

impl JniPlatform {
    pub fn new(ctx: Arc<JniContext>) -> Self {
        Self { ctx }
    }
}

impl HostPlatform for JniPlatform {
    fn ensure_channel(&self, channel: &NotificationChannel) -> Result<()> {
        self.ctx
            .with_env(|env, class| {
                let id = env.new_string(&channel.id)?;
                let name = env.new_string(&channel.name)?;
                env.call_static_method(
                    class,
                    "createNotificationChannel",
                    "(Ljava/lang/String;Ljava/lang/String;ZZZ)V",
                    &[
                        JValue::Object(&id),
                        JValue::Object(&name),
                        JValue::Bool(channel.low_importance as u8),
                        JValue::Bool(channel.show_badge as u8),
                        JValue::Bool(channel.public_on_lock_screen as u8),
                    ],
                )?
                .v()
            })
            .map_err(Into::into)
    }

    fn show_presence(&self, presence: &Presence) -> Result<()> {
        self.ctx
            .with_env(|env, class| {
                let channel_id = env.new_string(&presence.channel_id)?;
                let title = env.new_string(&presence.title)?;
                let text = env.new_string(&presence.text)?;
                env.call_static_method(
                    class,
                    "showNotification",
                    "(ILjava/lang/String;Ljava/lang/String;Ljava/lang/String;Z)V",
                    &[
                        JValue::Int(presence.id),
                        JValue::Object(&channel_id),
                        JValue::Object(&title),
                        JValue::Object(&text),
                        JValue::Bool(presence.ongoing as u8),
                    ],
                )?
                .v()
            })
            .map_err(Into::into)
    }

    fn dismiss_presence(&self, id: i32) -> Result<()> {
        self.ctx
            .with_env(|env, class| {
                env.call_static_method(class, "cancelNotification", "(I)V", &[JValue::Int(id)])?
                    .v()
            })
            .map_err(Into::into)
    }

    fn acquire_wake_hold(&self, tag: &str, ceiling: Duration) -> Result<()> {
        self.ctx
            .with_env(|env, class| {
                let tag = env.new_string(tag)?;
                env.call_static_method(
                    class,
                    "acquireWakeLock",
                    "(Ljava/lang/String;J)V",
                    &[JValue::Object(&tag), JValue::Long(millis(ceiling))],
                )?
                .v()
            })
            .map_err(Into::into)
    }

    fn wake_hold_held(&self) -> bool {
        self.ctx
            .with_env(|env, class| env.call_static_method(class, "isWakeLockHeld", "()Z", &[])?.z())
            .unwrap_or(false)
    }

    fn release_wake_hold(&self) -> Result<()> {
        self.ctx
            .with_env(|env, class| env.call_static_method(class, "releaseWakeLock", "()V", &[])?.v())
            .map_err(Into::into)
    }
}

/// Fused location provider on the Kotlin side.
///
/// Batches come back through `onLocationResult` and are routed to the sink
/// registered for that subscription id.
pub struct JniLocationSource {
    ctx: Arc<JniContext>,
    sinks: Mutex<HashMap<SubscriptionId, FixSink>>,
}

impl JniLocationSource {
    pub fn new(ctx: Arc<JniContext>) -> Self {
        Self {
            ctx,
            sinks: Mutex::new(HashMap::new()),
        }
    }

    fn sinks(&self) -> Result<std::sync::MutexGuard<'_, HashMap<SubscriptionId, FixSink>>> {
        self.sinks
            .lock()
            .map_err(|_| TrackerError::Internal("Failed to acquire sinks lock".to_string()))
    }

    /// Route a provider batch; the most recent fix wins
    pub fn on_batch(&self, subscription: SubscriptionId, batch: &[LocationFix]) {
        let sink = match self.sinks() {
            Ok(sinks) => sinks.get(&subscription).cloned(),
            Err(e) => {
                log::error!("{}", e);
                return;
            }
        };

        match sink {
            Some(sink) => {
                sink.deliver_batch(batch);
            }
            None => log::debug!("batch for unknown {}, dropped", subscription),
        }
    }
}

impl LocationSource for JniLocationSource {
    fn subscribe(&self, request: &LocationRequest, sink: FixSink) -> Result<SubscriptionHandle> {
        if request.priority != Priority::HighAccuracy {
            log::debug!("priority {:?} requested, provider uses high accuracy", request.priority);
        }

        let id = sink.subscription();
        // Registered first so a batch racing the return value is not lost
        self.sinks()?.insert(id, sink);

        let code = self.ctx.with_env(|env, class| {
            env.call_static_method(
                class,
                "requestLocationUpdates",
                "(JJJJFZ)I",
                &[
                    JValue::Long(id.0 as i64),
                    JValue::Long(millis(request.interval)),
                    JValue::Long(millis(request.min_update_interval)),
                    JValue::Long(millis(request.max_update_delay)),
                    JValue::Float(request.min_update_distance_m),
                    JValue::Bool(request.wait_for_accurate_location as u8),
                ],
            )?
            .i()
        });

        let outcome = code.map_err(TrackerError::from).and_then(subscribe_result);
        if let Err(e) = outcome {
            self.sinks()?.remove(&id);
            return Err(e);
        }
        Ok(SubscriptionHandle::new(id))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<()> {
        let id = handle.id();
        self.sinks()?.remove(&id);

        self.ctx
            .with_env(|env, class| {
                env.call_static_method(
                    class,
                    "removeLocationUpdates",
                    "(J)V",
                    &[JValue::Long(id.0 as i64)],
                )?
                .v()
            })
            .map_err(Into::into)
    }
}
