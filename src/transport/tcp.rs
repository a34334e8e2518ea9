//! TCP transport to the collector

use crate::transport::traits::{BoxedStream, TransportConnector};
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddrV4;
use tokio::net::TcpStream;

/// TCP connector for an already-resolved IPv4 collector address
pub struct TcpConnector {
    address: SocketAddrV4,
}

impl TcpConnector {
    pub fn new(address: SocketAddrV4) -> Self {
        Self { address }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        let stream = TcpStream::connect(self.address).await?;
        // Envelopes are small and latency matters more than coalescing
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn peer(&self) -> String {
        format!("tcp://{}", self.address)
    }
}
