//! Per-station connection handling
//!
//! A session reads newline-delimited envelopes from one station and yields
//! them decoded. Verification and storage happen in the caller.

mod connection;

pub use connection::StationSession;
