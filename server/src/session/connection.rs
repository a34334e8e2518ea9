use std::net::SocketAddr;

use solarstation_shared::{LineDecoder, ReceivedEnvelope};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::warn;

/// One station's inbound stream
pub struct StationSession<R> {
    addr: SocketAddr,
    reader: R,
    decoder: LineDecoder,
    read_buf: Vec<u8>,
    rejected: u64,
}

impl<R: AsyncRead + Unpin> StationSession<R> {
    pub fn new(reader: R, addr: SocketAddr) -> Self {
        Self {
            addr,
            reader,
            decoder: LineDecoder::new(),
            read_buf: vec![0u8; 4096],
            rejected: 0,
        }
    }

    /// Read the next well-formed envelope.
    /// Returns None once the station disconnects.
    pub async fn recv(&mut self) -> Option<ReceivedEnvelope> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(envelope)) => return Some(envelope),
                Ok(None) => {}
                Err(e) => {
                    // The bad line is already consumed; keep going
                    self.rejected += 1;
                    warn!(addr = %self.addr, "malformed line: {}", e);
                    continue;
                }
            }

            match self.reader.read(&mut self.read_buf).await {
                Ok(0) => return None,
                Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                Err(e) => {
                    warn!(addr = %self.addr, "read error: {}", e);
                    return None;
                }
            }
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Lines dropped as malformed so far
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
