use anyhow::Result;
use clap::Parser;
use taubenschiesser::{FleetOrchestrator, TaubenConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "taubenschiesser")]
#[command(about = "Fleet core for networked pan/tilt deterrent devices")]
#[command(version)]
#[command(long_about = "Keeps device health in sync with the network, moves actuators \
over MQTT and waits for their telemetry, shares one live decode pipeline per camera and \
captures images at stored route coordinates.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "taubenschiesser.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Override the fleet file named in the configuration
    #[arg(long, value_name = "PATH", help = "Path to TOML fleet file with devices and owners")]
    fleet: Option<String>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the system")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Dry run mode - load fleet and wire components but don't start them
    #[arg(long, help = "Perform dry run - initialize components but don't start them")]
    dry_run: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting taubenschiesser v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match TaubenConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(fleet) = &args.fleet {
        config.fleet.path = fleet.clone();
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let mut orchestrator = FleetOrchestrator::new(config).map_err(|e| {
        error!("Failed to create orchestrator: {}", e);
        e
    })?;

    orchestrator.initialize().map_err(|e| {
        error!("Failed to initialize system: {}", e);
        e
    })?;

    if args.dry_run {
        info!("Dry run mode - components initialized but not started");
        println!(
            "✓ Dry run completed successfully - {} device(s) loaded",
            orchestrator.store().device_count()
        );
        return Ok(());
    }

    orchestrator.start().await.map_err(|e| {
        error!("Failed to start system: {}", e);
        e
    })?;

    let exit_code = orchestrator.run().await.map_err(|e| {
        error!("System error during execution: {}", e);
        e
    })?;

    info!("taubenschiesser exited with code: {}", exit_code);

    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("taubenschiesser={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("pretty") => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some("compact") | None => fmt::layer()
            .compact()
            .with_target(args.debug)
            .with_thread_ids(false)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using compact", format);
            fmt::layer().compact().boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() {
    println!("# Taubenschiesser configuration");
    println!("# Every key is optional; values shown are the defaults.");
    println!("# Environment overrides use TAUBEN_<SECTION>__<KEY>, e.g. TAUBEN_HTTP__PORT=9090");
    println!();

    let default_config = r#"[monitor]
# Run the periodic health scan
enabled = true
# Seconds between fleet scans
interval_seconds = 60
# Ping timeout per address
probe_timeout_seconds = 5

[movement]
# Longest wait for movement telemetry
timeout_ms = 30000
# Extra wait after completion so the camera settles
stabilization_ms = 2000
# Fixed wait on the cloud transport, which has no telemetry (max 5000)
cloud_settle_ms = 5000
speed = 1
# Ignore "stopped" reports until the device has reported moving
require_motion_observed = false

[frames]
# Serve the cached frame if it is younger than this
freshness_ms = 1000
# Stop a device's decoder after this long without requests
inactivity_seconds = 300
request_timeout_ms = 4000
ffmpeg_path = "ffmpeg"
rtsp_transport = "tcp"
max_buffer_bytes = 8388608

[telemetry]
topic_prefix = "device"
keep_alive_seconds = 5
connect_timeout_seconds = 10
client_id_prefix = "taubenschiesser-server"
# Broker for owners without their own settings
default_broker_host = "localhost"
default_broker_port = 1883

[cloud]
enabled = false
endpoint = ""
port = 8883
client_id = "taubenschiesser-backend"
ca_path = ""
cert_path = ""
key_path = ""

[cv_service]
url = "http://localhost:8000"
capture_timeout_seconds = 15
zoom_timeout_seconds = 10
detect_timeout_seconds = 30

[capture]
# "cv_service" or "local"
rescaler = "cv_service"

[patrol]
# Move running devices, look for birds and fire
enabled = true
interval_seconds = 10
startup_delay_seconds = 5
# Minimum rest between two moves of one device
dwell_seconds = 20
# Telemetry wait for the aiming move and the way back
aim_timeout_ms = 10000
aim_settle_ms = 500
shot_duration_ms = 300
# Used when there is no waypoint or box to aim at
unaimed_shot_duration_ms = 1000
shot_recovery_ms = 1500
# Camera field of view at zoom 1
fov_horizontal_degrees = 60.0
fov_vertical_degrees = 34.0

[http]
enabled = true
ip = "0.0.0.0"
port = 8080

[fleet]
# Devices and owner broker settings
path = "fleet.toml"

[system]
event_bus_capacity = 100
"#;

    println!("{}", default_config);
}
