use crate::batch::{uplink_counts, zip_batch};
use crate::error::{throw_java_exception, BridgeResult, JniBridgeError};
use crate::platform::{JniContext, JniLocationSource, JniPlatform};
use bus_tracker_rs::config::NO_VEHICLE;
use bus_tracker_rs::{
    spawn_session, ControlHandle, Settings, StartRequest, SubscriptionId, TrackingConfig,
    UplinkClient,
};
use jni::objects::{JClass, JDoubleArray, JFloatArray, JLongArray, JString};
use jni::sys::{jboolean, jint, jlong, jlongArray, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

const LOG_TAG: &str = "BusTracker";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Everything `nativeInit` builds; lives until `nativeShutdown`
struct Bridge {
    runtime: Runtime,
    control: ControlHandle,
    source: Arc<JniLocationSource>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

// Global bridge state - stored as static to persist across JNI calls
lazy_static::lazy_static! {
    static ref GLOBAL_BRIDGE: Mutex<Option<Arc<Bridge>>> = Mutex::new(None);
}

fn get_bridge() -> BridgeResult<Arc<Bridge>> {
    let guard = GLOBAL_BRIDGE.lock().map_err(|_| {
        JniBridgeError::Internal("Failed to acquire global bridge lock".to_string())
    })?;
    guard.as_ref().map(Arc::clone).ok_or(JniBridgeError::NotInitialized)
}

fn optional_string(env: &mut JNIEnv, value: &JString) -> BridgeResult<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    Ok(Some(env.get_string(value)?.into()))
}

/// JNI: Build the runtime, platform seams and session worker.
/// Idempotent; a second call keeps the existing bridge.
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_nativeInit(
    mut env: JNIEnv,
    class: JClass,
) {
    if let Err(e) = native_init_impl(&mut env, &class) {
        let _ = throw_java_exception(&mut env, &e);
    }
}

fn native_init_impl(env: &mut JNIEnv, class: &JClass) -> BridgeResult<()> {
    #[cfg(target_os = "android")]
    let _ = android_log::init(LOG_TAG);

    let mut guard = GLOBAL_BRIDGE.lock().map_err(|_| {
        JniBridgeError::Internal("Failed to acquire global bridge lock".to_string())
    })?;
    if guard.is_some() {
        log::debug!("nativeInit: bridge already initialized");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("bus-tracker")
        .enable_all()
        .build()
        .map_err(|e| JniBridgeError::Runtime(e.to_string()))?;

    let ctx = Arc::new(JniContext::new(env, class)?);
    let settings = Settings::default();
    let source = Arc::new(JniLocationSource::new(Arc::clone(&ctx)));
    let platform = Arc::new(JniPlatform::new(ctx));
    let uplink = Arc::new(UplinkClient::new(&settings.uplink)?);

    let (control, worker) = {
        let _entered = runtime.enter();
        spawn_session(source.clone(), platform, uplink, &settings)
    };

    *guard = Some(Arc::new(Bridge {
        runtime,
        control,
        source,
        worker: Mutex::new(Some(worker)),
    }));

    log::info!("Bridge initialized");
    Ok(())
}

/// JNI: Service start command. `stopService` set means "stop".
/// Returns: always true; the outcome is reported through logs and counters
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_startNativeService(
    mut env: JNIEnv,
    _class: JClass,
    api_base_url: JString,
    auth_token: JString,
    bus_id: jint,
    stop_service: jboolean,
) -> jboolean {
    if let Err(e) = start_service_impl(&mut env, &api_base_url, &auth_token, bus_id, stop_service)
    {
        log::error!("startNativeService: {}", e);
    }
    JNI_TRUE
}

fn start_service_impl(
    env: &mut JNIEnv,
    api_base_url: &JString,
    auth_token: &JString,
    bus_id: jint,
    stop_service: jboolean,
) -> BridgeResult<()> {
    let bridge = get_bridge()?;

    if stop_service != JNI_FALSE {
        bridge.control.start_with(StartRequest::stop_flag());
        return Ok(());
    }

    let config = TrackingConfig::from_parts(
        optional_string(env, api_base_url)?,
        optional_string(env, auth_token)?,
        if bus_id < 0 { NO_VEHICLE } else { bus_id as i64 },
    );
    bridge.control.start(config);
    Ok(())
}

/// JNI: Stop tracking.
/// Returns: always true
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_stopNativeService(
    _env: JNIEnv,
    _class: JClass,
) -> jboolean {
    match get_bridge() {
        Ok(bridge) => {
            bridge.control.stop();
        }
        Err(e) => log::warn!("stopNativeService: {}", e),
    }
    JNI_TRUE
}

/// JNI: Fused provider batch for one subscription, as parallel columns
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_onLocationResult(
    mut env: JNIEnv,
    _class: JClass,
    subscription: jlong,
    latitudes: JDoubleArray,
    longitudes: JDoubleArray,
    speeds: JFloatArray,
    times_ms: JLongArray,
) {
    if let Err(e) = on_location_result_impl(
        &mut env,
        subscription,
        &latitudes,
        &longitudes,
        &speeds,
        &times_ms,
    ) {
        let _ = throw_java_exception(&mut env, &e);
    }
}

fn on_location_result_impl(
    env: &mut JNIEnv,
    subscription: jlong,
    latitudes: &JDoubleArray,
    longitudes: &JDoubleArray,
    speeds: &JFloatArray,
    times_ms: &JLongArray,
) -> BridgeResult<()> {
    let bridge = get_bridge()?;

    let mut lat = vec![0.0; env.get_array_length(latitudes)? as usize];
    env.get_double_array_region(latitudes, 0, &mut lat)?;
    let mut lon = vec![0.0; env.get_array_length(longitudes)? as usize];
    env.get_double_array_region(longitudes, 0, &mut lon)?;
    let mut speed = vec![0.0f32; env.get_array_length(speeds)? as usize];
    env.get_float_array_region(speeds, 0, &mut speed)?;
    let mut time = vec![0i64; env.get_array_length(times_ms)? as usize];
    env.get_long_array_region(times_ms, 0, &mut time)?;

    let fixes = zip_batch(&lat, &lon, &speed, &time)?;
    bridge
        .source
        .on_batch(SubscriptionId(subscription as u64), &fixes);
    Ok(())
}

/// JNI: Current session state
/// Returns: "IDLE", "STARTING", "TRACKING" or "STOPPING" as jstring
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_getSessionState(
    mut env: JNIEnv,
    _class: JClass,
) -> jstring {
    let result = get_session_state_impl()
        .and_then(|state| env.new_string(state).map_err(JniBridgeError::from));
    match result {
        Ok(jstr) => jstr.into_raw(),
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            std::ptr::null_mut()
        }
    }
}

fn get_session_state_impl() -> BridgeResult<&'static str> {
    let bridge = get_bridge()?;
    let snapshot = bridge
        .runtime
        .block_on(bridge.control.snapshot())
        .ok_or_else(|| JniBridgeError::Runtime("session worker has exited".to_string()))?;
    Ok(snapshot.state.as_str())
}

/// JNI: Uplink counters
/// Returns: jlongArray `[dispatched, delivered, rejected, transportErrors, skipped]`
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_getUplinkCounts(
    mut env: JNIEnv,
    _class: JClass,
) -> jlongArray {
    let counts = match get_uplink_counts_impl() {
        Ok(counts) => counts,
        Err(e) => {
            let _ = throw_java_exception(&mut env, &e);
            return std::ptr::null_mut();
        }
    };

    match env.new_long_array(counts.len() as i32) {
        Ok(arr) => {
            let _ = env.set_long_array_region(&arr, 0, &counts);
            arr.into_raw()
        }
        Err(_) => std::ptr::null_mut(),
    }
}

fn get_uplink_counts_impl() -> BridgeResult<[i64; 5]> {
    let bridge = get_bridge()?;
    let snapshot = bridge
        .runtime
        .block_on(bridge.control.snapshot())
        .ok_or_else(|| JniBridgeError::Runtime("session worker has exited".to_string()))?;
    Ok(uplink_counts(&snapshot.stats))
}

/// JNI: Process teardown. Stops tracking, ends the worker and drops the runtime.
#[no_mangle]
pub extern "C" fn Java_com_example_driver_1app_TrackingBridge_nativeShutdown(
    _env: JNIEnv,
    _class: JClass,
) {
    if let Err(e) = native_shutdown_impl() {
        log::error!("nativeShutdown: {}", e);
    }
}

fn native_shutdown_impl() -> BridgeResult<()> {
    let bridge = {
        let mut guard = GLOBAL_BRIDGE.lock().map_err(|_| {
            JniBridgeError::Internal("Failed to acquire global bridge lock".to_string())
        })?;
        match guard.take() {
            Some(bridge) => bridge,
            None => return Ok(()),
        }
    };

    bridge.control.shutdown();
    let worker = bridge
        .worker
        .lock()
        .map_err(|_| JniBridgeError::Internal("Failed to acquire worker lock".to_string()))?
        .take();

    if let Some(worker) = worker {
        let joined = bridge
            .runtime
            .block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, worker).await });
        match joined {
            Ok(Ok(())) => log::info!("Session worker stopped"),
            Ok(Err(e)) => log::error!("Session worker failed: {}", e),
            Err(_) => log::warn!("Session worker did not stop within {:?}", SHUTDOWN_GRACE),
        }
    }
    Ok(())
}
