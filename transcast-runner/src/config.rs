//! Runner configuration
//!
//! Defines the external binaries the runner drives and where their
//! artifacts and completion records live.

use std::path::PathBuf;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory of every encoder process; holds artifacts and records
    pub work_dir: PathBuf,

    /// Encoder binary (e.g., "ffmpeg")
    pub encoder: String,

    /// Input probing binary (e.g., "ffprobe")
    pub prober: String,

    /// Cloud storage upload binary (e.g., "rclone")
    pub uploader: String,

    /// How long a stopped encoder may take to quit before it is killed
    pub kill_timeout: Duration,

    /// Number of trailing stderr lines reported as command output
    pub output_lines: usize,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            encoder: "ffmpeg".to_string(),
            prober: "ffprobe".to_string(),
            uploader: "rclone".to_string(),
            kill_timeout: Duration::from_secs(5),
            output_lines: 20,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - TRANSCAST_WORK_DIR (optional, default: ./transcast-work)
    /// - TRANSCAST_ENCODER (optional, default: ffmpeg)
    /// - TRANSCAST_PROBER (optional, default: ffprobe)
    /// - TRANSCAST_UPLOADER (optional, default: rclone)
    /// - TRANSCAST_KILL_TIMEOUT_SECS (optional, seconds, default: 5)
    /// - TRANSCAST_OUTPUT_LINES (optional, default: 20)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let work_dir = std::env::var("TRANSCAST_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);

        let encoder = std::env::var("TRANSCAST_ENCODER").unwrap_or(defaults.encoder);
        let prober = std::env::var("TRANSCAST_PROBER").unwrap_or(defaults.prober);
        let uploader = std::env::var("TRANSCAST_UPLOADER").unwrap_or(defaults.uploader);

        let kill_timeout = match std::env::var("TRANSCAST_KILL_TIMEOUT_SECS") {
            Ok(s) => Duration::from_secs(s.parse::<u64>().map_err(|_| {
                anyhow::anyhow!("TRANSCAST_KILL_TIMEOUT_SECS must be a number of seconds")
            })?),
            Err(_) => defaults.kill_timeout,
        };

        let output_lines = std::env::var("TRANSCAST_OUTPUT_LINES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.output_lines);

        Ok(Self {
            work_dir,
            encoder,
            prober,
            uploader,
            kill_timeout,
            output_lines,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            anyhow::bail!("work_dir cannot be empty");
        }

        if self.encoder.is_empty() {
            anyhow::bail!("encoder cannot be empty");
        }

        if self.prober.is_empty() {
            anyhow::bail!("prober cannot be empty");
        }

        if self.kill_timeout.is_zero() {
            anyhow::bail!("kill_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("./transcast-work")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.encoder, "ffmpeg");
        assert_eq!(config.prober, "ffprobe");
        assert_eq!(config.kill_timeout, Duration::from_secs(5));
        assert_eq!(config.output_lines, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.encoder = String::new();
        assert!(config.validate().is_err());

        config.encoder = "ffmpeg".to_string();
        config.kill_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config.kill_timeout = Duration::from_millis(500);
        config.work_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
