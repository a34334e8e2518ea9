use std::time::Duration;

use solarstation_shared::{codec, timing, Authenticator, Snapshot};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::channel::SnapshotConsumer;
use crate::connection::{ConnectionManager, PendingBuffer, SendOutcome};
use crate::display::{Display, StationStatus};
use crate::link::LinkDriver;

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub ssid: String,
    pub password: String,
    /// Bound on a single link bring-up
    pub link_timeout: Duration,
    /// Bounded wait for a fresh snapshot
    pub consume_timeout: Duration,
    /// Pause between cycles
    pub cycle_yield: Duration,
    /// Pause after a cycle that found the link down
    pub link_retry_idle: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            link_timeout: Duration::from_millis(timing::WIFI_CONNECT_TIMEOUT_MS),
            consume_timeout: Duration::from_millis(timing::CONSUME_TIMEOUT_MS),
            cycle_yield: Duration::from_millis(timing::CYCLE_YIELD_MS),
            link_retry_idle: Duration::from_millis(timing::LINK_RETRY_IDLE_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Link was down; `recovered` if bring-up succeeded
    LinkDown { recovered: bool },
    /// No new snapshot within the consume timeout
    NoSnapshot,
    /// A fresh envelope was offered to the transport
    Delivered(SendOutcome),
    /// The snapshot could not be serialized
    EncodeFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Result of retrying the pending message, if one was retried
    pub flushed: Option<SendOutcome>,
}

/// Consumer side of the pipeline; owns the pending buffer
pub struct DeliveryWorker<L: LinkDriver, D: Display> {
    config: DeliveryConfig,
    link: L,
    display: D,
    connection: ConnectionManager,
    consumer: SnapshotConsumer,
    auth: Authenticator,
    pending: PendingBuffer,
    latest: Option<Snapshot>,
}

impl<L: LinkDriver, D: Display> DeliveryWorker<L, D> {
    pub fn new(
        config: DeliveryConfig,
        link: L,
        display: D,
        connection: ConnectionManager,
        consumer: SnapshotConsumer,
        auth: Authenticator,
    ) -> Self {
        Self {
            config,
            link,
            display,
            connection,
            consumer,
            auth,
            pending: PendingBuffer::new(),
            latest: None,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.has_pending()
    }

    fn status(&self, link_up: bool) -> StationStatus {
        StationStatus {
            link_up,
            connection: self.connection.state(),
            pending: self.has_pending(),
            attempts: self.connection.attempts(),
            last_error: self.connection.last_error(),
        }
    }

    fn render(&mut self, link_up: bool) {
        let status = self.status(link_up);
        self.display.render(self.latest.as_ref(), &status);
    }

    /// One pass of the delivery loop
    pub async fn run_cycle(&mut self) -> CycleReport {
        if !self.link.link_up() {
            return self.recover_link().await;
        }

        let outcome = match self.consumer.try_consume(self.config.consume_timeout).await {
            Some(snapshot) => {
                self.latest = Some(snapshot);
                self.deliver(&snapshot)
            }
            None => {
                debug!("no fresh snapshot this cycle");
                CycleOutcome::NoSnapshot
            }
        };

        self.render(true);

        let flushed = self.pending.flush_if_possible(&self.connection);
        if flushed == Some(SendOutcome::Sent) {
            info!("pending message delivered");
        }

        CycleReport { outcome, flushed }
    }

    async fn recover_link(&mut self) -> CycleReport {
        warn!("wireless link down");
        self.render(false);

        let recovered = self
            .link
            .connect(&self.config.ssid, &self.config.password, self.config.link_timeout)
            .await;
        if recovered {
            // Never reuse an endpoint from before the outage
            self.connection.close();
            self.connection.start();
        }

        CycleReport {
            outcome: CycleOutcome::LinkDown { recovered },
            flushed: None,
        }
    }

    fn deliver(&mut self, snapshot: &Snapshot) -> CycleOutcome {
        let message = match codec::encode(snapshot, self.pending.has_pending(), &self.auth) {
            Ok(message) => message,
            Err(e) => {
                error!("failed to encode snapshot: {}", e);
                return CycleOutcome::EncodeFailed;
            }
        };

        let outcome = self.connection.send(&message);
        match outcome {
            SendOutcome::Sent => debug!(len = message.len(), "snapshot sent"),
            SendOutcome::Busy => {
                warn!(
                    outstanding = self.connection.outstanding_bytes(),
                    len = message.len(),
                    "transport busy, snapshot buffered"
                );
                self.pending.store(message);
            }
            SendOutcome::Failed => {
                warn!(state = %self.connection.state(), "send failed, snapshot buffered");
                self.pending.store(message);
                self.connection.reconnect();
            }
        }
        CycleOutcome::Delivered(outcome)
    }

    /// Run cycles until `shutdown` flips to true, then close the connection
    /// and tear the link down
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Delivery loop started");
        loop {
            let report = tokio::select! {
                report = self.run_cycle() => report,
                _ = shutdown.changed() => break,
            };

            let pause = match report.outcome {
                CycleOutcome::LinkDown { .. } => self.config.link_retry_idle,
                _ => self.config.cycle_yield,
            };

            tokio::select! {
                _ = sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.connection.close();
        self.link.teardown();
        info!("Delivery loop stopped");
    }
}
