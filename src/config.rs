//! Device configuration from environment variables.
//!
//! Every knob has a default so the binary runs with no environment at all;
//! `HOTARU_*` variables override individual values.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address
    pub bind: SocketAddr,
    /// Directory for captured media
    pub storage_root: PathBuf,
    /// Optional static UI directory served at /
    pub ui_path: Option<PathBuf>,

    /// Target frame rate for pacing and recorded-duration math.
    /// The single source of truth; nothing else hardcodes a rate.
    pub target_fps: u32,
    /// Sensor frame width
    pub width: u32,
    /// Sensor frame height
    pub height: u32,

    /// Camera mutex acquisition timeout
    pub lock_timeout: Duration,
    /// Hard ceiling on one streaming session
    pub max_stream_duration: Duration,
    /// Consecutive slow frames before the counter resets
    pub slow_frame_limit: u32,
    /// Minimum sleep when an iteration overruns the frame interval
    pub min_yield: Duration,

    /// Pacing between background recorder pulls
    pub record_interval: Duration,
    /// Recorder flush cadence, in frames
    pub flush_every: u32,

    /// Raw touch level source (sysfs-style file); None disables gestures
    pub touch_device: Option<PathBuf>,
    /// Raw level above which the input counts as pressed
    pub touch_threshold: u16,
    /// Continuous press length that fires the long-hold action
    pub long_hold: Duration,
    /// Quiet window after release before taps resolve
    pub quiet_window: Duration,

    /// Connection supervisor check period
    pub link_check_interval: Duration,
    /// Soft-reconnect attempts before a hard radio reset
    pub link_retry_ceiling: u32,
    /// Interface handed to the soft reconnect
    pub wifi_interface: String,
    /// mDNS service name announced while the link is up
    pub service_name: String,

    /// Use the synthetic frame source instead of real hardware
    pub test_source: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: ([0, 0, 0, 0], 8080).into(),
            storage_root: PathBuf::from("/var/lib/hotaru/media"),
            ui_path: None,
            target_fps: 15,
            width: 640,
            height: 480,
            lock_timeout: Duration::from_millis(50),
            max_stream_duration: Duration::from_secs(120),
            slow_frame_limit: 3,
            min_yield: Duration::from_millis(2),
            record_interval: Duration::from_millis(40),
            flush_every: 20,
            touch_device: None,
            touch_threshold: 40,
            long_hold: Duration::from_millis(1000),
            quiet_window: Duration::from_millis(400),
            link_check_interval: Duration::from_secs(15),
            link_retry_ceiling: 5,
            wifi_interface: "wlan0".to_string(),
            service_name: "hotaru".to_string(),
            test_source: false,
        }
    }
}

impl Config {
    /// Build configuration from `HOTARU_*` environment variables and the
    /// `--test-source` CLI flag, falling back to defaults per value.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let bind: SocketAddr = match std::env::var("HOTARU_BIND") {
            Ok(s) => s.parse().context("Invalid HOTARU_BIND address")?,
            Err(_) => defaults.bind,
        };

        let storage_root = std::env::var("HOTARU_STORAGE")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_root);

        let ui_path = std::env::var("HOTARU_UI_PATH").ok().map(PathBuf::from);
        let touch_device = std::env::var("HOTARU_TOUCH_DEVICE").ok().map(PathBuf::from);

        let args: Vec<String> = std::env::args().collect();
        let test_source =
            args.iter().any(|a| a == "--test-source") || env_flag("HOTARU_TEST_SOURCE");

        Ok(Self {
            bind,
            storage_root,
            ui_path,
            target_fps: env_parse("HOTARU_FPS", defaults.target_fps),
            width: env_parse("HOTARU_WIDTH", defaults.width),
            height: env_parse("HOTARU_HEIGHT", defaults.height),
            lock_timeout: env_millis("HOTARU_LOCK_TIMEOUT_MS", defaults.lock_timeout),
            max_stream_duration: env_secs("HOTARU_MAX_STREAM_SECS", defaults.max_stream_duration),
            slow_frame_limit: defaults.slow_frame_limit,
            min_yield: defaults.min_yield,
            record_interval: env_millis("HOTARU_RECORD_INTERVAL_MS", defaults.record_interval),
            flush_every: env_parse("HOTARU_FLUSH_EVERY", defaults.flush_every),
            touch_device,
            touch_threshold: env_parse("HOTARU_TOUCH_THRESHOLD", defaults.touch_threshold),
            long_hold: env_millis("HOTARU_LONG_HOLD_MS", defaults.long_hold),
            quiet_window: env_millis("HOTARU_QUIET_WINDOW_MS", defaults.quiet_window),
            link_check_interval: env_secs("HOTARU_LINK_CHECK_SECS", defaults.link_check_interval),
            link_retry_ceiling: env_parse("HOTARU_LINK_RETRY_CEILING", defaults.link_retry_ceiling),
            wifi_interface: std::env::var("HOTARU_WIFI_IFACE").unwrap_or(defaults.wifi_interface),
            service_name: std::env::var("HOTARU_SERVICE_NAME").unwrap_or(defaults.service_name),
            test_source,
        })
    }

    /// Target interval between streamed frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.target_fps.max(1) as f64)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(false)
}
