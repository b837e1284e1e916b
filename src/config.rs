use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{RelayError, Result};

#[derive(Parser, Debug, Clone)]
#[command(name = "screenrelay")]
#[command(version)]
#[command(about = "Classroom screen-sharing signaling relay", long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// WebSocket endpoint path
    #[arg(long, env = "RELAY_WS_PATH", default_value = "/ws/screenshare")]
    pub ws_path: String,

    /// Directory of static client assets served on every other path
    #[arg(long, env = "RELAY_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Seconds between WebSocket pings
    #[arg(long, env = "RELAY_HEARTBEAT_INTERVAL", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Seconds of silence after which a connection is dropped
    #[arg(long, env = "RELAY_CLIENT_TIMEOUT", default_value_t = 90)]
    pub client_timeout_secs: u64,

    /// Seconds a screen link may stay unanswered before it is torn down
    #[arg(long, env = "RELAY_LINK_TIMEOUT", default_value_t = 60)]
    pub link_timeout_secs: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    pub ws_path: String,
    pub static_dir: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub client_timeout: Duration,
    pub link_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            ws_path: "/ws/screenshare".to_string(),
            static_dir: None,
            heartbeat_interval: Duration::from_secs(30),
            client_timeout: Duration::from_secs(90),
            link_timeout: Duration::from_secs(60),
        }
    }
}

impl Args {
    pub fn into_config(self) -> Result<RelayConfig> {
        let config = RelayConfig {
            bind: self.bind,
            ws_path: self.ws_path,
            static_dir: self.static_dir,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            link_timeout: Duration::from_secs(self.link_timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.ws_path.starts_with('/') {
            return Err(RelayError::Config(format!(
                "ws path must start with '/', got {:?}",
                self.ws_path
            )));
        }
        if self.heartbeat_interval.is_zero() || self.client_timeout.is_zero() || self.link_timeout.is_zero() {
            return Err(RelayError::Config("timeouts and intervals must be non-zero".into()));
        }
        if self.client_timeout <= self.heartbeat_interval {
            return Err(RelayError::Config(format!(
                "client timeout ({:?}) must exceed heartbeat interval ({:?})",
                self.client_timeout, self.heartbeat_interval
            )));
        }
        Ok(())
    }
}
