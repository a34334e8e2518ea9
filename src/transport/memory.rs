//! In-memory transport for exercising the connection manager in tests

use crate::transport::traits::{BoxedStream, TransportConnector};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
use tokio::sync::mpsc;

/// Connector producing duplex pipes whose far ends go to a [`MemoryCollector`]
pub struct MemoryConnector {
    buffer: usize,
    refusing: AtomicBool,
    accepted: mpsc::UnboundedSender<DuplexStream>,
}

/// Test-side end receiving every connection the station opens
pub struct MemoryCollector {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryConnector {
    /// `buffer` bounds how many unread bytes a pipe holds before writes stall
    pub fn new(buffer: usize) -> (Self, MemoryCollector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                buffer,
                refusing: AtomicBool::new(false),
                accepted: tx,
            },
            MemoryCollector { incoming: rx },
        )
    }

    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    async fn connect(&self) -> Result<BoxedStream> {
        if self.refusing.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        let (client, server) = tokio::io::duplex(self.buffer);
        self.accepted
            .send(server)
            .map_err(|_| anyhow!("collector gone"))?;
        Ok(Box::new(client))
    }

    fn peer(&self) -> String {
        "memory".into()
    }
}

impl MemoryCollector {
    /// Next accepted connection, if one arrives within a second
    pub async fn accept(&mut self) -> Option<BufReader<DuplexStream>> {
        tokio::time::timeout(Duration::from_secs(1), self.incoming.recv())
            .await
            .ok()
            .flatten()
            .map(BufReader::new)
    }
}

/// Read one line, or `None` if nothing arrives within a second
pub async fn read_line(conn: &mut BufReader<DuplexStream>) -> Option<String> {
    let mut line = String::new();
    match tokio::time::timeout(Duration::from_secs(1), conn.read_line(&mut line)).await {
        Ok(Ok(n)) if n > 0 => Some(line),
        _ => None,
    }
}

/// Poll `condition` until it holds or a second elapses
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
