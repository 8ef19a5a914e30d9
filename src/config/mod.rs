//! Configuration module for the pickup backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Shortest allowed dashboard poll interval.
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;
/// Longest allowed dashboard poll interval.
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deployment key for API access (optional)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// How often an open dashboard re-reads its requests
    pub poll_interval: Duration,
    /// How often the sound cue repeats while requests are pending
    pub sound_repeat: Duration,
    /// Insert the default schools when none are stored
    pub seed_schools: bool,
    /// A dashboard nobody reads for this long is closed
    pub dashboard_idle: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("PICKUP_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("PICKUP_DB_PATH")
            .unwrap_or_else(|_| "./data/pickup.sqlite".to_string())
            .into();

        let bind_addr = env::var("PICKUP_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid PICKUP_BIND_ADDR format");

        let log_level = env::var("PICKUP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let poll_ms = env::var("PICKUP_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(MIN_POLL_INTERVAL_MS);

        let sound_secs = env::var("PICKUP_SOUND_REPEAT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(10);

        let idle_secs = env::var("PICKUP_DASHBOARD_IDLE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(60);

        let seed_schools = env::var("PICKUP_SEED_SCHOOLS")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            poll_interval: clamp_poll_interval(poll_ms),
            sound_repeat: Duration::from_secs(sound_secs),
            seed_schools,
            dashboard_idle: Duration::from_secs(idle_secs),
        }
    }
}

/// Keep the poll interval inside the 1–10 second window.
pub fn clamp_poll_interval(ms: u64) -> Duration {
    Duration::from_millis(ms.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        // Clear any existing env vars
        for key in [
            "PICKUP_API_PSK",
            "PICKUP_DB_PATH",
            "PICKUP_BIND_ADDR",
            "PICKUP_LOG_LEVEL",
            "PICKUP_POLL_INTERVAL_MS",
            "PICKUP_SOUND_REPEAT_SECS",
            "PICKUP_SEED_SCHOOLS",
            "PICKUP_DASHBOARD_IDLE_SECS",
        ] {
            env::remove_var(key);
        }

        let config = Config::from_env();

        assert!(config.api_psk.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/pickup.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.sound_repeat, Duration::from_secs(10));
        assert!(config.seed_schools);
        assert_eq!(config.dashboard_idle, Duration::from_secs(60));
    }

    #[test]
    fn test_poll_interval_is_clamped() {
        assert_eq!(clamp_poll_interval(50), Duration::from_secs(1));
        assert_eq!(clamp_poll_interval(2_500), Duration::from_millis(2_500));
        assert_eq!(clamp_poll_interval(60_000), Duration::from_secs(10));
    }
}
