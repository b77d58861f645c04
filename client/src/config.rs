//! Link configuration and build modes

use crate::upload::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "86.26.185.112";
pub const DEFAULT_UPLOAD_URL: &str = "https://modkitv2.nohumanman.com/api/upload-replay";
pub const DEFAULT_OUTPUT_LOG_URL: &str = "https://modkit.nohumanman.com/upload-outputlog";
pub const DEFAULT_TRAIL_BASE_URL: &str = "https://modkit.nohumanman.com/static/trails/";

/// Build flavour. Developer builds talk to a local server; developer and
/// debug builds time every dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BuildMode {
    Developer,
    Debug,
    #[default]
    Release,
}

impl BuildMode {
    pub fn profiling_enabled(self) -> bool {
        !matches!(self, BuildMode::Release)
    }

    pub fn version_suffix(self) -> &'static str {
        match self {
            BuildMode::Developer => "-dev",
            BuildMode::Debug => "-debug",
            BuildMode::Release => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub mode: BuildMode,

    pub upload_url: String,
    pub output_log_url: String,
    pub trail_base_url: String,
    pub data_dir: PathBuf,

    pub heartbeat_interval: Duration,
    pub reconnect_grace: Duration,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub upload_retry: RetryPolicy,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: shared::DEFAULT_PORT,
            mode: BuildMode::default(),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            output_log_url: DEFAULT_OUTPUT_LOG_URL.to_string(),
            trail_base_url: DEFAULT_TRAIL_BASE_URL.to_string(),
            data_dir: default_data_dir(),
            heartbeat_interval: Duration::from_secs(5),
            reconnect_grace: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            upload_retry: RetryPolicy::default(),
        }
    }
}

impl LinkConfig {
    /// Host actually dialled. Developer builds always use `localhost`.
    pub fn effective_host(&self) -> &str {
        match self.mode {
            BuildMode::Developer => "localhost",
            _ => &self.host,
        }
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.effective_host(), self.port)
    }

    pub fn replay_dir(&self) -> PathBuf {
        self.data_dir.join("Replays")
    }

    pub fn output_log_path(&self) -> PathBuf {
        self.data_dir.join("output_log.txt")
    }

    pub fn version_string(&self) -> String {
        format!("{}{}", env!("CARGO_PKG_VERSION"), self.mode.version_suffix())
    }
}

/// Per-user local data directory of the game.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("RageSquid")
        .join("Descenders")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, 65433);
        assert_eq!(config.mode, BuildMode::Release);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.reconnect_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_developer_mode_uses_localhost() {
        let config = LinkConfig {
            mode: BuildMode::Developer,
            port: 4000,
            ..LinkConfig::default()
        };
        assert_eq!(config.effective_host(), "localhost");
        assert_eq!(config.server_addr(), "localhost:4000");

        let config = LinkConfig {
            mode: BuildMode::Debug,
            ..LinkConfig::default()
        };
        assert_eq!(config.effective_host(), DEFAULT_HOST);
    }

    #[test]
    fn test_version_string_suffix() {
        let mut config = LinkConfig::default();
        assert_eq!(config.version_string(), env!("CARGO_PKG_VERSION"));

        config.mode = BuildMode::Developer;
        assert!(config.version_string().ends_with("-dev"));

        config.mode = BuildMode::Debug;
        assert!(config.version_string().ends_with("-debug"));
    }

    #[test]
    fn test_profiling_only_outside_release() {
        assert!(BuildMode::Developer.profiling_enabled());
        assert!(BuildMode::Debug.profiling_enabled());
        assert!(!BuildMode::Release.profiling_enabled());
    }

    #[test]
    fn test_data_paths() {
        let config = LinkConfig {
            data_dir: PathBuf::from("/tmp/game"),
            ..LinkConfig::default()
        };
        assert_eq!(config.replay_dir(), PathBuf::from("/tmp/game/Replays"));
        assert_eq!(
            config.output_log_path(),
            PathBuf::from("/tmp/game/output_log.txt")
        );
    }
}
