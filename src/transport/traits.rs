//! Transport trait abstraction for pluggable network backends

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A transport stream that can read and write bytes
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> TransportStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed stream handed to the connection manager
pub type BoxedStream = Box<dyn TransportStream>;

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// Attempt to connect, returning a stream on success
    async fn connect(&self) -> Result<BoxedStream>;

    /// Human-readable description of the remote end
    fn peer(&self) -> String;
}
