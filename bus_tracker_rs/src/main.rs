use anyhow::{bail, Result};
use bus_tracker_rs::config::{Settings, NO_VEHICLE};
use bus_tracker_rs::{
    spawn_session, HeadlessPlatform, LocationSource, SimulatedSource, TermuxSource,
    TrackingConfig, UplinkClient,
};
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SourceKind {
    /// Synthetic fixes walking away from the origin
    Simulated,
    /// Termux:API `termux-location`
    Termux,
}

#[derive(Parser, Debug)]
#[command(name = "bus_tracker")]
#[command(about = "Report this vehicle's position to the bus tracking server", long_about = None)]
struct Args {
    /// Server base URL, e.g. https://example.ngrok-free.app
    #[arg(long, env = "BUS_TRACKER_API_BASE_URL")]
    api_base_url: Option<String>,

    /// API token sent as `Authorization: Token <token>`
    #[arg(long, env = "BUS_TRACKER_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Bus id to report for
    #[arg(long, env = "BUS_TRACKER_BUS_ID", default_value_t = NO_VEHICLE, allow_negative_numbers = true)]
    bus_id: i64,

    /// Location source
    #[arg(long, value_enum, default_value = "simulated")]
    source: SourceKind,

    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Location update interval in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Limit concurrent POSTs (unbounded if omitted)
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Simulated source behaves as if location permission was denied
    #[arg(long)]
    deny_permission: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.interval_ms == 0 {
        bail!("--interval-ms must be positive");
    }

    let mut settings = Settings::default();
    settings.location.interval = Duration::from_millis(args.interval_ms);
    settings.location.min_update_interval = Duration::from_millis(args.interval_ms);
    settings.uplink.max_in_flight = args.max_in_flight;

    log::info!("Bus Tracker starting");
    log::info!("  Source: {:?}", args.source);
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Bus: {}", args.bus_id);

    let source: Arc<dyn LocationSource> = match args.source {
        SourceKind::Simulated if args.deny_permission => {
            Arc::new(SimulatedSource::default().without_permission())
        }
        SourceKind::Simulated => Arc::new(SimulatedSource::default()),
        SourceKind::Termux => Arc::new(TermuxSource::new()),
    };
    let uplink = Arc::new(UplinkClient::new(&settings.uplink)?);
    let platform = Arc::new(HeadlessPlatform::new());

    let (control, worker) = spawn_session(source, platform, uplink, &settings);
    control.start(TrackingConfig::from_parts(
        args.api_base_url,
        args.auth_token,
        args.bus_id,
    ));

    if args.duration > 0 {
        tokio::select! {
            _ = sleep(Duration::from_secs(args.duration)) => {
                log::info!("Duration reached, stopping...");
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping...");
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
        log::info!("Interrupted, stopping...");
    }

    control.stop();
    if let Some(snapshot) = control.snapshot().await {
        println!("\n=== Final Stats ===");
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    control.shutdown();
    worker.await?;
    Ok(())
}
