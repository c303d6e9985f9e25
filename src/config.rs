use std::{path::PathBuf, time::Duration};

use crate::trace::env_u64;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_DATA_DIR: &str = "videoasr-data";

/// Connection and storage settings for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Holds the task snapshot and the trace log.
    pub data_dir: PathBuf,
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let base_url = std::env::var("VIDEOASR_BASE_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let data_dir = std::env::var("VIDEOASR_DATA_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Self {
            base_url,
            data_dir,
            poll_interval_ms: env_u64("VIDEOASR_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_usable() {
        let cfg = ClientConfig::default();
        assert!(!cfg.base_url.is_empty());
        assert!(!cfg.data_dir.as_os_str().is_empty());
        assert!(cfg.poll_interval() >= Duration::from_millis(1));
    }

    #[test]
    fn poll_interval_converts_millis() {
        let cfg = ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            data_dir: PathBuf::from("x"),
            poll_interval_ms: 250,
        };
        assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
    }
}
