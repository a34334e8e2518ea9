//! Station configuration
//!
//! Loaded from a TOML file; every section falls back to defaults. The
//! authentication secret may come from the environment instead of the file.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use solarstation_shared::codec::MAX_MESSAGE_SIZE;
use solarstation_shared::{timing, AuthError, Authenticator, DEFAULT_SERVER_PORT};
use thiserror::Error;
use tracing::warn;

use crate::connection::ConnectionConfig;
use crate::delivery::DeliveryConfig;
use crate::sampler::SamplerConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("authentication secret is not provisioned")]
    MissingSecret,

    #[error("server address must be an IPv4 literal, got {0:?}")]
    InvalidServerAddress(String),

    #[error("invalid timing: {0}")]
    InvalidTiming(&'static str),

    #[error("authentication setup failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub address: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address: "192.168.1.100".into(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct WifiSection {
    pub ssid: String,
    pub password: String,
    pub connect_timeout_secs: u64,
}

impl Default for WifiSection {
    fn default() -> Self {
        Self {
            ssid: "solarstation".into(),
            password: String::new(),
            connect_timeout_secs: timing::WIFI_CONNECT_TIMEOUT_MS / 1000,
        }
    }
}

impl fmt::Debug for WifiSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiSection")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub secret: String,
}

impl fmt::Debug for AuthSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSection")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// All durations in milliseconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub sample_interval_ms: u64,
    pub consume_timeout_ms: u64,
    pub cycle_yield_ms: u64,
    pub link_retry_idle_ms: u64,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub bus_lock_timeout_ms: u64,
    pub reconnect_backoff_initial_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    pub send_buffer_bytes: usize,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            sample_interval_ms: timing::SAMPLE_INTERVAL_MS,
            consume_timeout_ms: timing::CONSUME_TIMEOUT_MS,
            cycle_yield_ms: timing::CYCLE_YIELD_MS,
            link_retry_idle_ms: timing::LINK_RETRY_IDLE_MS,
            poll_interval_ms: timing::POLL_INTERVAL_MS,
            connect_timeout_ms: timing::CONNECT_TIMEOUT_MS,
            bus_lock_timeout_ms: timing::BUS_LOCK_TIMEOUT_MS,
            reconnect_backoff_initial_ms: timing::RECONNECT_BACKOFF_INITIAL_MS,
            reconnect_backoff_max_ms: timing::RECONNECT_BACKOFF_MAX_MS,
            send_buffer_bytes: timing::SEND_BUFFER_BYTES,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub server: ServerSection,
    pub wifi: WifiSection,
    pub auth: AuthSection,
    pub timing: TimingSection,
}

impl StationConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Prefer a secret from the environment over the file
    pub fn apply_secret_override(&mut self, secret: Option<String>) {
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.auth.secret = secret;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        self.server_addr()?;

        let t = &self.timing;
        if self.server.port == 0 {
            return Err(ConfigError::InvalidTiming("server port must be non-zero"));
        }
        let intervals = [
            (t.sample_interval_ms, "sample_interval_ms"),
            (t.consume_timeout_ms, "consume_timeout_ms"),
            (t.cycle_yield_ms, "cycle_yield_ms"),
            (t.link_retry_idle_ms, "link_retry_idle_ms"),
            (t.poll_interval_ms, "poll_interval_ms"),
            (t.connect_timeout_ms, "connect_timeout_ms"),
            (t.bus_lock_timeout_ms, "bus_lock_timeout_ms"),
            (t.reconnect_backoff_initial_ms, "reconnect_backoff_initial_ms"),
        ];
        if let Some((_, name)) = intervals.iter().find(|(ms, _)| *ms == 0) {
            return Err(ConfigError::InvalidTiming(*name));
        }
        if t.reconnect_backoff_max_ms < t.reconnect_backoff_initial_ms {
            return Err(ConfigError::InvalidTiming("reconnect_backoff_max_ms"));
        }
        if self.wifi.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidTiming("connect_timeout_secs"));
        }
        // A full-size envelope must always fit
        if t.send_buffer_bytes < MAX_MESSAGE_SIZE {
            return Err(ConfigError::InvalidTiming("send_buffer_bytes"));
        }
        Ok(())
    }

    pub fn server_addr(&self) -> Result<SocketAddrV4, ConfigError> {
        let ip: Ipv4Addr = self
            .server
            .address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidServerAddress(self.server.address.clone()))?;
        Ok(SocketAddrV4::new(ip, self.server.port))
    }

    pub fn authenticator(&self) -> Result<Authenticator, ConfigError> {
        Ok(Authenticator::new(&self.auth.secret)?)
    }

    pub fn wifi_timeout(&self) -> Duration {
        Duration::from_secs(self.wifi.connect_timeout_secs)
    }

    pub fn connection(&self) -> ConnectionConfig {
        let t = &self.timing;
        ConnectionConfig {
            connect_timeout: Duration::from_millis(t.connect_timeout_ms),
            send_buffer_bytes: t.send_buffer_bytes,
            reconnect_delay: Duration::from_millis(t.reconnect_backoff_initial_ms),
            max_reconnect_delay: Duration::from_millis(t.reconnect_backoff_max_ms),
        }
    }

    pub fn sampler(&self) -> SamplerConfig {
        SamplerConfig {
            interval: Duration::from_millis(self.timing.sample_interval_ms),
            bus_timeout: Duration::from_millis(self.timing.bus_lock_timeout_ms),
        }
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            ssid: self.wifi.ssid.clone(),
            password: self.wifi.password.clone(),
            link_timeout: self.wifi_timeout(),
            consume_timeout: Duration::from_millis(self.timing.consume_timeout_ms),
            cycle_yield: Duration::from_millis(self.timing.cycle_yield_ms),
            link_retry_idle: Duration::from_millis(self.timing.link_retry_idle_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.poll_interval_ms)
    }
}
