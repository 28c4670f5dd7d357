use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaubenConfig {
    pub monitor: MonitorConfig,
    pub movement: MovementConfig,
    pub frames: FrameConfig,
    pub telemetry: TelemetryConfig,
    pub cloud: CloudConfig,
    pub cv_service: CvServiceConfig,
    pub capture: CaptureConfig,
    pub patrol: PatrolConfig,
    pub http: HttpConfig,
    pub fleet: FleetConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorConfig {
    /// Run the periodic health reconciliation loop
    #[serde(default = "default_monitor_enabled")]
    pub enabled: bool,

    /// Seconds between fleet scans
    #[serde(default = "default_monitor_interval")]
    pub interval_seconds: u64,

    /// ICMP echo timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MovementConfig {
    /// Upper bound on waiting for movement telemetry
    #[serde(default = "default_movement_timeout")]
    pub timeout_ms: u64,

    /// Delay after completion to let the camera settle
    #[serde(default = "default_stabilization")]
    pub stabilization_ms: u64,

    /// Fixed delay substituted for telemetry on the cloud transport
    #[serde(default = "default_cloud_settle")]
    pub cloud_settle_ms: u64,

    /// Speed value sent with positioning commands
    #[serde(default = "default_move_speed")]
    pub speed: i32,

    /// Ignore `moving=false` samples until motion has been reported once
    #[serde(default = "default_require_motion")]
    pub require_motion_observed: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FrameConfig {
    /// A cached frame younger than this is served without waiting
    #[serde(default = "default_freshness")]
    pub freshness_ms: u64,

    /// Sessions without requests for this long are retired
    #[serde(default = "default_inactivity")]
    pub inactivity_seconds: u64,

    /// Default wait for the next frame
    #[serde(default = "default_frame_timeout")]
    pub request_timeout_ms: u64,

    /// Decoder executable
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// RTSP transport passed to the decoder
    #[serde(default = "default_rtsp_transport")]
    pub rtsp_transport: String,

    /// Upper bound on buffered decoder output without a complete frame
    #[serde(default = "default_max_buffer")]
    pub max_buffer_bytes: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TelemetryConfig {
    /// Leading topic segment for commands and telemetry
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// MQTT keep alive in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_seconds: u64,

    /// How long to wait for the broker to acknowledge a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Prefix for generated MQTT client ids
    #[serde(default = "default_client_prefix")]
    pub client_id_prefix: String,

    /// Broker used when an owner has no broker settings of their own
    #[serde(default = "default_broker_host")]
    pub default_broker_host: String,

    #[serde(default = "default_broker_port")]
    pub default_broker_port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CloudConfig {
    /// Publish through the cloud broker when a device has a cloud identity
    #[serde(default)]
    pub enabled: bool,

    /// Cloud broker endpoint host
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_cloud_port")]
    pub port: u16,

    #[serde(default = "default_cloud_client_id")]
    pub client_id: String,

    /// PEM files for the TLS client identity
    #[serde(default)]
    pub ca_path: String,
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CvServiceConfig {
    /// Base URL of the computer-vision service
    #[serde(default = "default_cv_url")]
    pub url: String,

    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_seconds: u64,

    #[serde(default = "default_zoom_timeout")]
    pub zoom_timeout_seconds: u64,

    #[serde(default = "default_detect_timeout")]
    pub detect_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RescalerKind {
    /// Delegate to the computer-vision service
    CvService,
    /// Center crop in-process
    Local,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Which collaborator performs zoom rescaling
    #[serde(default = "default_rescaler")]
    pub rescaler: RescalerKind,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PatrolConfig {
    /// Sweep running devices and shoot at detected birds
    #[serde(default = "default_patrol_enabled")]
    pub enabled: bool,

    /// Seconds between patrol rounds over the fleet
    #[serde(default = "default_patrol_interval")]
    pub interval_seconds: u64,

    /// Delay before the first round after startup
    #[serde(default = "default_patrol_startup_delay")]
    pub startup_delay_seconds: u64,

    /// Minimum time a device rests between two moves
    #[serde(default = "default_patrol_dwell")]
    pub dwell_seconds: u64,

    /// Telemetry wait for aiming and returning moves
    #[serde(default = "default_aim_timeout")]
    pub aim_timeout_ms: u64,

    /// Settle time after aiming, before the shot
    #[serde(default = "default_aim_settle")]
    pub aim_settle_ms: u64,

    /// Trigger duration for an aimed shot
    #[serde(default = "default_shot_duration")]
    pub shot_duration_ms: u32,

    /// Trigger duration when no target could be aimed at
    #[serde(default = "default_unaimed_shot_duration")]
    pub unaimed_shot_duration_ms: u32,

    /// Wait after a shot before returning to the waypoint
    #[serde(default = "default_shot_recovery")]
    pub shot_recovery_ms: u64,

    /// Camera field of view at zoom 1.0, in degrees
    #[serde(default = "default_fov_horizontal")]
    pub fov_horizontal_degrees: f64,

    #[serde(default = "default_fov_vertical")]
    pub fov_vertical_degrees: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_http_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FleetConfig {
    /// TOML file with devices and owner broker settings
    #[serde(default = "default_fleet_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

impl MovementConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn stabilization(&self) -> Duration {
        Duration::from_millis(self.stabilization_ms)
    }

    pub fn cloud_settle(&self) -> Duration {
        Duration::from_millis(self.cloud_settle_ms)
    }
}

impl FrameConfig {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }

    pub fn inactivity(&self) -> Duration {
        Duration::from_secs(self.inactivity_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PatrolConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_seconds)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.dwell_seconds)
    }

    pub fn aim_timeout(&self) -> Duration {
        Duration::from_millis(self.aim_timeout_ms)
    }

    pub fn aim_settle(&self) -> Duration {
        Duration::from_millis(self.aim_settle_ms)
    }

    pub fn shot_recovery(&self) -> Duration {
        Duration::from_millis(self.shot_recovery_ms)
    }
}

impl TaubenConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("taubenschiesser.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("monitor.enabled", default_monitor_enabled())?
            .set_default("monitor.interval_seconds", default_monitor_interval())?
            .set_default("monitor.probe_timeout_seconds", default_probe_timeout())?
            .set_default("movement.timeout_ms", default_movement_timeout())?
            .set_default("movement.stabilization_ms", default_stabilization())?
            .set_default("movement.cloud_settle_ms", default_cloud_settle())?
            .set_default("movement.speed", default_move_speed())?
            .set_default(
                "movement.require_motion_observed",
                default_require_motion(),
            )?
            .set_default("frames.freshness_ms", default_freshness())?
            .set_default("frames.inactivity_seconds", default_inactivity())?
            .set_default("frames.request_timeout_ms", default_frame_timeout())?
            .set_default("frames.ffmpeg_path", default_ffmpeg_path())?
            .set_default("frames.rtsp_transport", default_rtsp_transport())?
            .set_default("frames.max_buffer_bytes", default_max_buffer() as i64)?
            .set_default("telemetry.topic_prefix", default_topic_prefix())?
            .set_default("telemetry.keep_alive_seconds", default_keep_alive())?
            .set_default(
                "telemetry.connect_timeout_seconds",
                default_connect_timeout(),
            )?
            .set_default("telemetry.client_id_prefix", default_client_prefix())?
            .set_default("telemetry.default_broker_host", default_broker_host())?
            .set_default("telemetry.default_broker_port", default_broker_port())?
            .set_default("cloud.enabled", false)?
            .set_default("cloud.endpoint", "")?
            .set_default("cloud.port", default_cloud_port())?
            .set_default("cloud.client_id", default_cloud_client_id())?
            .set_default("cloud.ca_path", "")?
            .set_default("cloud.cert_path", "")?
            .set_default("cloud.key_path", "")?
            .set_default("cv_service.url", default_cv_url())?
            .set_default(
                "cv_service.capture_timeout_seconds",
                default_capture_timeout(),
            )?
            .set_default("cv_service.zoom_timeout_seconds", default_zoom_timeout())?
            .set_default(
                "cv_service.detect_timeout_seconds",
                default_detect_timeout(),
            )?
            .set_default("capture.rescaler", "cv_service")?
            .set_default("patrol.enabled", default_patrol_enabled())?
            .set_default("patrol.interval_seconds", default_patrol_interval())?
            .set_default(
                "patrol.startup_delay_seconds",
                default_patrol_startup_delay(),
            )?
            .set_default("patrol.dwell_seconds", default_patrol_dwell())?
            .set_default("patrol.aim_timeout_ms", default_aim_timeout())?
            .set_default("patrol.aim_settle_ms", default_aim_settle())?
            .set_default("patrol.shot_duration_ms", default_shot_duration())?
            .set_default(
                "patrol.unaimed_shot_duration_ms",
                default_unaimed_shot_duration(),
            )?
            .set_default("patrol.shot_recovery_ms", default_shot_recovery())?
            .set_default("patrol.fov_horizontal_degrees", default_fov_horizontal())?
            .set_default("patrol.fov_vertical_degrees", default_fov_vertical())?
            .set_default("http.enabled", default_http_enabled())?
            .set_default("http.ip", default_http_ip())?
            .set_default("http.port", default_http_port())?
            .set_default("fleet.path", default_fleet_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with TAUBEN_ prefix
            .add_source(
                Environment::with_prefix("TAUBEN")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: TaubenConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Monitor interval must be greater than 0".to_string(),
            ));
        }

        if self.monitor.probe_timeout_seconds == 0
            || self.monitor.probe_timeout_seconds > MAX_PROBE_TIMEOUT_SECONDS
        {
            return Err(ConfigError::Message(format!(
                "Probe timeout must be between 1 and {} seconds",
                MAX_PROBE_TIMEOUT_SECONDS
            )));
        }

        if self.movement.timeout_ms == 0 || self.movement.timeout_ms > MAX_MOVEMENT_TIMEOUT_MS {
            return Err(ConfigError::Message(format!(
                "Movement timeout must be between 1 and {}ms",
                MAX_MOVEMENT_TIMEOUT_MS
            )));
        }

        if self.movement.stabilization_ms > MAX_STABILIZATION_MS {
            return Err(ConfigError::Message(format!(
                "Stabilization delay must not exceed {}ms",
                MAX_STABILIZATION_MS
            )));
        }

        if self.movement.cloud_settle_ms > MAX_CLOUD_SETTLE_MS {
            return Err(ConfigError::Message(format!(
                "Cloud settle delay must not exceed {}ms",
                MAX_CLOUD_SETTLE_MS
            )));
        }

        if self.frames.inactivity_seconds == 0 {
            return Err(ConfigError::Message(
                "Frame session inactivity window must be greater than 0".to_string(),
            ));
        }

        if self.frames.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Frame request timeout must be greater than 0".to_string(),
            ));
        }

        if self.frames.max_buffer_bytes < 1024 {
            return Err(ConfigError::Message(
                "Frame buffer limit must be at least 1024 bytes".to_string(),
            ));
        }

        if self.telemetry.topic_prefix.is_empty()
            || self.telemetry.topic_prefix.contains(['+', '#'])
        {
            return Err(ConfigError::Message(
                "Telemetry topic prefix must be a non-empty topic without wildcards".to_string(),
            ));
        }

        if self.cloud.enabled
            && (self.cloud.endpoint.is_empty()
                || self.cloud.ca_path.is_empty()
                || self.cloud.cert_path.is_empty()
                || self.cloud.key_path.is_empty())
        {
            return Err(ConfigError::Message(
                "Cloud transport requires endpoint, ca_path, cert_path and key_path".to_string(),
            ));
        }

        if self.patrol.interval_seconds == 0 {
            return Err(ConfigError::Message(
                "Patrol interval must be greater than 0".to_string(),
            ));
        }

        if self.patrol.aim_timeout_ms > MAX_MOVEMENT_TIMEOUT_MS {
            return Err(ConfigError::Message(format!(
                "Aim timeout must not exceed {}ms",
                MAX_MOVEMENT_TIMEOUT_MS
            )));
        }

        if self.patrol.aim_settle_ms > MAX_STABILIZATION_MS
            || self.patrol.shot_recovery_ms > MAX_STABILIZATION_MS
        {
            return Err(ConfigError::Message(format!(
                "Aim settle and shot recovery must not exceed {}ms",
                MAX_STABILIZATION_MS
            )));
        }

        if !(self.patrol.fov_horizontal_degrees > 0.0 && self.patrol.fov_vertical_degrees > 0.0) {
            return Err(ConfigError::Message(
                "Camera field of view must be positive".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for TaubenConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig {
                enabled: default_monitor_enabled(),
                interval_seconds: default_monitor_interval(),
                probe_timeout_seconds: default_probe_timeout(),
            },
            movement: MovementConfig {
                timeout_ms: default_movement_timeout(),
                stabilization_ms: default_stabilization(),
                cloud_settle_ms: default_cloud_settle(),
                speed: default_move_speed(),
                require_motion_observed: default_require_motion(),
            },
            frames: FrameConfig {
                freshness_ms: default_freshness(),
                inactivity_seconds: default_inactivity(),
                request_timeout_ms: default_frame_timeout(),
                ffmpeg_path: default_ffmpeg_path(),
                rtsp_transport: default_rtsp_transport(),
                max_buffer_bytes: default_max_buffer(),
            },
            telemetry: TelemetryConfig {
                topic_prefix: default_topic_prefix(),
                keep_alive_seconds: default_keep_alive(),
                connect_timeout_seconds: default_connect_timeout(),
                client_id_prefix: default_client_prefix(),
                default_broker_host: default_broker_host(),
                default_broker_port: default_broker_port(),
            },
            cloud: CloudConfig {
                enabled: false,
                endpoint: String::new(),
                port: default_cloud_port(),
                client_id: default_cloud_client_id(),
                ca_path: String::new(),
                cert_path: String::new(),
                key_path: String::new(),
            },
            cv_service: CvServiceConfig {
                url: default_cv_url(),
                capture_timeout_seconds: default_capture_timeout(),
                zoom_timeout_seconds: default_zoom_timeout(),
                detect_timeout_seconds: default_detect_timeout(),
            },
            capture: CaptureConfig {
                rescaler: default_rescaler(),
            },
            patrol: PatrolConfig {
                enabled: default_patrol_enabled(),
                interval_seconds: default_patrol_interval(),
                startup_delay_seconds: default_patrol_startup_delay(),
                dwell_seconds: default_patrol_dwell(),
                aim_timeout_ms: default_aim_timeout(),
                aim_settle_ms: default_aim_settle(),
                shot_duration_ms: default_shot_duration(),
                unaimed_shot_duration_ms: default_unaimed_shot_duration(),
                shot_recovery_ms: default_shot_recovery(),
                fov_horizontal_degrees: default_fov_horizontal(),
                fov_vertical_degrees: default_fov_vertical(),
            },
            http: HttpConfig {
                enabled: default_http_enabled(),
                ip: default_http_ip(),
                port: default_http_port(),
            },
            fleet: FleetConfig {
                path: default_fleet_path(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

/// Hard cap for the cloud settle delay
pub const MAX_CLOUD_SETTLE_MS: u64 = 5_000;
pub const MAX_MOVEMENT_TIMEOUT_MS: u64 = 600_000;
pub const MAX_STABILIZATION_MS: u64 = 60_000;
pub const MAX_PROBE_TIMEOUT_SECONDS: u64 = 60;

// Default value functions
fn default_monitor_enabled() -> bool {
    true
}
fn default_monitor_interval() -> u64 {
    60
} // Keeps ICMP traffic under typical rate limits
fn default_probe_timeout() -> u64 {
    5
}

fn default_movement_timeout() -> u64 {
    30_000
}
fn default_stabilization() -> u64 {
    2_000
}
fn default_cloud_settle() -> u64 {
    5_000
}
fn default_move_speed() -> i32 {
    1
}
fn default_require_motion() -> bool {
    false
}

fn default_freshness() -> u64 {
    1_000
}
fn default_inactivity() -> u64 {
    300
}
fn default_frame_timeout() -> u64 {
    4_000
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_rtsp_transport() -> String {
    "tcp".to_string()
}
fn default_max_buffer() -> usize {
    8 * 1024 * 1024
}

fn default_topic_prefix() -> String {
    "device".to_string()
}
fn default_keep_alive() -> u64 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_client_prefix() -> String {
    "taubenschiesser-server".to_string()
}
fn default_broker_host() -> String {
    "localhost".to_string()
}
fn default_broker_port() -> u16 {
    1883
}

fn default_cloud_port() -> u16 {
    8883
}
fn default_cloud_client_id() -> String {
    "taubenschiesser-backend".to_string()
}

fn default_cv_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_capture_timeout() -> u64 {
    15
}
fn default_zoom_timeout() -> u64 {
    10
}
fn default_detect_timeout() -> u64 {
    30
}

fn default_patrol_enabled() -> bool {
    true
}
fn default_patrol_interval() -> u64 {
    10
}
fn default_patrol_startup_delay() -> u64 {
    5
}
fn default_patrol_dwell() -> u64 {
    20
}
fn default_aim_timeout() -> u64 {
    10_000
}
fn default_aim_settle() -> u64 {
    500
}
fn default_shot_duration() -> u32 {
    300
}
fn default_unaimed_shot_duration() -> u32 {
    1_000
}
fn default_shot_recovery() -> u64 {
    1_500
}
// Typical Tapo lens at 1280x720
fn default_fov_horizontal() -> f64 {
    60.0
}
fn default_fov_vertical() -> f64 {
    34.0
}

fn default_rescaler() -> RescalerKind {
    RescalerKind::CvService
}

fn default_http_enabled() -> bool {
    true
}
fn default_http_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}

fn default_fleet_path() -> String {
    "fleet.toml".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}
