//! Solar Station Shared Protocol Types
//!
//! This crate provides the snapshot record, the line codec and the payload
//! authenticator shared between the telemetry station and the collector.

pub mod auth;
pub mod codec;
pub mod snapshot;
pub mod state_machine;

// Re-export commonly used types at crate root
pub use auth::{AuthError, Authenticator};
pub use codec::{CodecError, LineDecoder, ReceivedEnvelope};
pub use snapshot::{DataBody, Snapshot};

/// Number of illumination channels sampled per snapshot
pub const LUX_CHANNELS: usize = 3;

/// Value reported for a reading whose sensor failed
pub const SENSOR_FAULT: f32 = -1.0;

/// Collector port used when none is configured
pub const DEFAULT_SERVER_PORT: u16 = 9999;

/// Environment variable holding the pre-shared authentication secret
pub const SECRET_ENV_VAR: &str = "STATION_HMAC_SECRET";

/// Default cadences and bounded waits for the station pipeline
pub mod timing {
    /// Sampler period
    pub const SAMPLE_INTERVAL_MS: u64 = 2000;

    /// Longest the delivery loop waits for a fresh snapshot
    pub const CONSUME_TIMEOUT_MS: u64 = 500;

    /// Pause at the end of every delivery cycle
    pub const CYCLE_YIELD_MS: u64 = 1000;

    /// Pause after a failed wireless link recovery before retrying
    pub const LINK_RETRY_IDLE_MS: u64 = 1000;

    /// Liveness poll period driving reconnects
    pub const POLL_INTERVAL_MS: u64 = 2000;

    /// TCP connect timeout
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// Wireless association timeout
    pub const WIFI_CONNECT_TIMEOUT_MS: u64 = 30000;

    /// Sensor bus acquisition window
    pub const BUS_LOCK_TIMEOUT_MS: u64 = 50;

    /// First delay after a failed connect attempt
    pub const RECONNECT_BACKOFF_INITIAL_MS: u64 = 1000;

    /// Upper bound of the reconnect backoff
    pub const RECONNECT_BACKOFF_MAX_MS: u64 = 30000;

    /// Outbound byte budget of one TCP endpoint
    pub const SEND_BUFFER_BYTES: usize = 2048;
}
