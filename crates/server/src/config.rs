use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Deadline for one pipeline run in seconds; the run is cancelled when it elapses
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum request body size in MB (inline images arrive as data URLs)
    #[serde(default = "default_max_body_size_mb")]
    pub max_body_size_mb: usize,

    /// Path to the pipeline YAML file; built-in defaults when unset
    #[serde(default)]
    pub pipeline_config: Option<String>,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Metrics endpoint enabled
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            max_body_size_mb: default_max_body_size_mb(),
            pipeline_config: None,
            enable_cors: default_true(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from an optional `server.*` file and `RETOUCH_SERVER__*` variables
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("server").required(false))
            .add_source(config::Environment::with_prefix("RETOUCH_SERVER").separator("__"));

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        if config.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be > 0");
        }
        Ok(config)
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    /// Deadline handed to each pipeline run
    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Hard ceiling for the HTTP layer. Slightly above the run deadline so a cancelled
    /// run can still answer with its execution log.
    pub fn http_timeout(&self) -> Duration {
        self.run_deadline() + Duration::from_secs(5)
    }

    /// Get max body size in bytes
    pub fn max_body_size(&self) -> usize {
        self.max_body_size_mb * 1024 * 1024
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_body_size_mb() -> usize {
    25
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.timeout_secs, 300);
        assert_eq!(cfg.max_body_size(), 25 * 1024 * 1024);
        assert!(cfg.pipeline_config.is_none());
        assert!(cfg.enable_cors);
        assert!(cfg.metrics_enabled);
    }

    #[test]
    fn test_http_timeout_outlasts_run_deadline() {
        let cfg = ServerConfig {
            timeout_secs: 10,
            ..ServerConfig::default()
        };
        assert!(cfg.http_timeout() > cfg.run_deadline());
    }

    #[test]
    fn test_socket_addr() {
        let cfg = ServerConfig::default();
        let addr = cfg.socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }
}
