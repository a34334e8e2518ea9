//! Wireless link driver collaborator
//!
//! The station only observes whether the link is up and can ask for it to be
//! (re)established or torn down.

use std::net::{SocketAddrV4, UdpSocket};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[async_trait]
pub trait LinkDriver: Send {
    /// Associate with the access point; `true` once the link is up
    async fn connect(&mut self, ssid: &str, password: &str, timeout: Duration) -> bool;

    fn link_up(&self) -> bool;

    fn teardown(&mut self);
}

/// Link driver for hosts where the OS owns the network interface.
///
/// The link counts as up while associated and the OS has a route to the
/// collector.
pub struct HostLink {
    collector: SocketAddrV4,
    associated: bool,
}

impl HostLink {
    const PROBE_INTERVAL: Duration = Duration::from_millis(500);

    pub fn new(collector: SocketAddrV4) -> Self {
        Self {
            collector,
            associated: false,
        }
    }

    /// Routing check only: connecting a UDP socket sends no packets
    fn has_route(&self) -> bool {
        UdpSocket::bind("0.0.0.0:0")
            .and_then(|socket| socket.connect(self.collector))
            .is_ok()
    }
}

#[async_trait]
impl LinkDriver for HostLink {
    async fn connect(&mut self, ssid: &str, _password: &str, timeout: Duration) -> bool {
        info!(ssid, "bringing up wireless link");
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_route() {
                self.associated = true;
                info!(ssid, "wireless link up");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(ssid, "wireless link did not come up within {:?}", timeout);
                return false;
            }
            debug!(collector = %self.collector, "no route yet");
            sleep(Self::PROBE_INTERVAL).await;
        }
    }

    fn link_up(&self) -> bool {
        self.associated && self.has_route()
    }

    fn teardown(&mut self) {
        if self.associated {
            info!("wireless link torn down");
        }
        self.associated = false;
    }
}
