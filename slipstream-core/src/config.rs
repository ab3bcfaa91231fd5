//! Centralized configuration for Slipstream.
//!
//! All tunable parameters are defined here to avoid hard-coded values
//! scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Slipstream components.
///
/// Groups related settings into logical sections. Supports environment
/// variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct SlipstreamConfig {
    pub origin: OriginConfig,
    pub registry: RegistryConfig,
    pub transcode: TranscodeConfig,
    pub playback: PlaybackConfig,
}

/// Origin control-API configuration.
///
/// Controls endpoint location, credentials and per-call timeouts for the
/// remote bulk-download backend that owns the actual media bytes.
#[derive(Debug, Clone)]
pub struct OriginConfig {
    /// Base URL of the origin control API
    pub base_url: String,
    /// HTTP Basic username, if the origin is credentialed
    pub username: Option<String>,
    /// HTTP Basic password
    pub password: Option<String>,
    /// Timeout for session creation (origin may need to reach the network)
    pub create_timeout: Duration,
    /// Timeout for list/remove control calls
    pub control_timeout: Duration,
    /// Timeout for the detailed per-session stat call
    pub stat_timeout: Duration,
    /// Timeout for the health check
    pub health_timeout: Duration,
    /// Interval between readiness polls
    pub ready_poll_interval: Duration,
    /// Maximum time to wait for a session to become ready
    pub ready_max_wait: Duration,
}

impl Default for OriginConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".to_string(),
            username: None,
            password: None,
            create_timeout: Duration::from_secs(30),
            control_timeout: Duration::from_secs(10),
            stat_timeout: Duration::from_secs(15),
            health_timeout: Duration::from_secs(5),
            ready_poll_interval: Duration::from_secs(2),
            ready_max_wait: Duration::from_secs(30),
        }
    }
}

impl OriginConfig {
    /// Returns the configured credentials as a pair, if both are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }
}

/// Session registry and idle-sweep configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often the idle sweep runs
    pub sweep_interval: Duration,
    /// Inactivity threshold after which a session is evicted
    pub idle_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(180), // 3 minutes
        }
    }
}

/// External transcoder and prober configuration.
///
/// The transcode profile is fixed: video copied unmodified, audio re-encoded
/// to AAC for universal playback compatibility.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Transcoder binary
    pub ffmpeg_bin: String,
    /// Metadata probe binary
    pub ffprobe_bin: String,
    /// Target audio bitrate
    pub audio_bitrate: String,
    /// Target audio channel count
    pub audio_channels: u32,
    /// Probe analysis window in microseconds (also used as probesize bytes)
    pub probe_window: u64,
    /// Hard cap on a single probe invocation
    pub probe_timeout: Duration,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_channels: 2, // stereo
            probe_window: 5_000_000, // 5 second analysis window
            probe_timeout: Duration::from_secs(15),
        }
    }
}

/// Playback position and watched-state configuration.
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Directory holding the persisted position/watched documents
    pub data_dir: PathBuf,
    /// Positions at or below this many seconds are not persisted
    pub min_save_secs: u64,
    /// Records unread for longer than this many days expire
    pub expiry_days: i64,
    /// Progress ratio at which an item counts as watched
    pub watched_ratio: f64,
    /// Remaining seconds under which playback counts as finished
    pub finished_margin_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            min_save_secs: 5,
            expiry_days: 30,
            watched_ratio: 0.90,
            finished_margin_secs: 30,
        }
    }
}

impl SlipstreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SLIPSTREAM_ORIGIN_URL") {
            config.origin.base_url = url;
        }
        if let Ok(user) = std::env::var("SLIPSTREAM_ORIGIN_USER") {
            config.origin.username = Some(user);
        }
        if let Ok(pass) = std::env::var("SLIPSTREAM_ORIGIN_PASSWORD") {
            config.origin.password = Some(pass);
        }

        if let Ok(secs) = std::env::var("SLIPSTREAM_SWEEP_INTERVAL") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.registry.sweep_interval = Duration::from_secs(parsed);
            }
        }
        if let Ok(secs) = std::env::var("SLIPSTREAM_IDLE_TIMEOUT") {
            if let Ok(parsed) = secs.parse::<u64>() {
                config.registry.idle_timeout = Duration::from_secs(parsed);
            }
        }

        if let Ok(bin) = std::env::var("SLIPSTREAM_FFMPEG") {
            config.transcode.ffmpeg_bin = bin;
        }
        if let Ok(bin) = std::env::var("SLIPSTREAM_FFPROBE") {
            config.transcode.ffprobe_bin = bin;
        }

        if let Ok(dir) = std::env::var("SLIPSTREAM_DATA_DIR") {
            config.playback.data_dir = PathBuf::from(dir);
        }

        config
    }
}
