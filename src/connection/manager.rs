//! Connection manager with a single persistent endpoint and poll-driven reconnection
//!
//! Transport callbacks (connected / error / sent / poll) arrive through
//! [`TransportEventSink`] from whatever task the network stack runs on. All
//! shared fields live behind one mutex; no lock is held across an await.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use solarstation_shared::state_machine::{
    ConnectionEvent, ConnectionStateMachine, LinkState, TransitionResult, TransportFault,
};
use solarstation_shared::timing;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::transport::{BoxedStream, TransportConnector};

/// Result of handing a message to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Transport accepted every byte
    Sent,
    /// Outbound budget exhausted; retry later, the link is fine
    Busy,
    /// Fatal transport error or no connection
    Failed,
}

/// Receiver of transport events for one connection attempt.
///
/// `attempt` identifies the connect attempt an event belongs to; events
/// from an attempt that has since been closed are dropped.
pub trait TransportEventSink: Send + Sync {
    fn on_connected(&self, attempt: u64, stream: BoxedStream);
    fn on_error(&self, attempt: u64, fault: TransportFault);
    fn on_sent(&self, attempt: u64, len: usize);
    fn on_poll(&self);
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Outbound bytes the endpoint may hold before `send` reports `Busy`
    pub send_buffer_bytes: usize,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(timing::CONNECT_TIMEOUT_MS),
            send_buffer_bytes: timing::SEND_BUFFER_BYTES,
            reconnect_delay: Duration::from_millis(timing::RECONNECT_BACKOFF_INITIAL_MS),
            max_reconnect_delay: Duration::from_millis(timing::RECONNECT_BACKOFF_MAX_MS),
        }
    }
}

/// Owns the TCP endpoint lifecycle
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ConnectionConfig,
    connector: Arc<dyn TransportConnector>,
    shared: Mutex<Shared>,
}

struct Shared {
    fsm: ConnectionStateMachine,
    connect_task: Option<JoinHandle<()>>,
    endpoint: Option<Endpoint>,
    /// Bytes handed to the writer but not yet confirmed on the socket
    in_flight: usize,
    backoff: Backoff,
}

/// An established connection: a writer draining `outbound` and a reader
/// watching for the peer going away
struct Endpoint {
    attempt: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}

/// Exponential delay between failed connect attempts
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    not_before: Option<Instant>,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
            not_before: None,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| now >= at)
    }

    fn failed(&mut self, now: Instant) {
        self.not_before = Some(now + self.current);
        self.current = std::cmp::min(self.current * 2, self.max);
    }

    fn reset(&mut self) {
        self.current = self.initial;
        self.not_before = None;
    }
}

impl ConnectionManager {
    /// Create a manager in the `Disconnected` state; nothing connects until
    /// [`start`](Self::start) or a poll
    pub fn new(config: ConnectionConfig, connector: Arc<dyn TransportConnector>) -> Self {
        let backoff = Backoff::new(config.reconnect_delay, config.max_reconnect_delay);
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                shared: Mutex::new(Shared {
                    fsm: ConnectionStateMachine::new(),
                    connect_task: None,
                    endpoint: None,
                    in_flight: 0,
                    backoff,
                }),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Issue an asynchronous connect unless one is open or outstanding
    pub fn start(&self) {
        let mut shared = self.inner.shared.lock();
        self.begin_attempt(&mut shared);
    }

    /// Like [`start`](Self::start), but honours the backoff after failed attempts
    pub fn reconnect(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.fsm.state() != LinkState::Disconnected {
            return;
        }
        if !shared.backoff.is_due(Instant::now()) {
            debug!("reconnect deferred by backoff");
            return;
        }
        self.begin_attempt(&mut shared);
    }

    fn begin_attempt(&self, shared: &mut Shared) {
        if let TransitionResult::Ignored { state, .. } =
            shared.fsm.process_event(ConnectionEvent::StartRequested)
        {
            debug!(%state, "start ignored");
            return;
        }

        let attempt = shared.fsm.attempts();
        let connector = self.inner.connector.clone();
        let connect_timeout = self.inner.config.connect_timeout;
        let weak = Arc::downgrade(&self.inner);

        info!(attempt, peer = %connector.peer(), "connecting");

        shared.connect_task = Some(tokio::spawn(async move {
            let result = timeout(connect_timeout, connector.connect()).await;
            let Some(manager) = ConnectionManager::from_weak(&weak) else {
                return;
            };
            match result {
                Ok(Ok(stream)) => manager.on_connected(attempt, stream),
                Ok(Err(e)) => {
                    warn!(attempt, "connect failed: {:#}", e);
                    manager.on_error(attempt, TransportFault::ConnectFailed);
                }
                Err(_) => {
                    warn!(attempt, "connect timed out after {:?}", connect_timeout);
                    manager.on_error(attempt, TransportFault::ConnectTimeout);
                }
            }
        }));
    }

    /// Tear down the endpoint and return to `Disconnected`. Idempotent.
    pub fn close(&self) {
        let mut shared = self.inner.shared.lock();
        if let Some(task) = shared.connect_task.take() {
            task.abort();
        }
        shared.endpoint = None;
        shared.in_flight = 0;
        if let TransitionResult::Changed { from, .. } =
            shared.fsm.process_event(ConnectionEvent::Closed)
        {
            info!(%from, "connection closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().fsm.is_connected()
    }

    pub fn state(&self) -> LinkState {
        self.inner.shared.lock().fsm.state()
    }

    pub fn attempts(&self) -> u64 {
        self.inner.shared.lock().fsm.attempts()
    }

    pub fn last_error(&self) -> Option<TransportFault> {
        self.inner.shared.lock().fsm.last_error()
    }

    /// Bytes accepted by `send` that the socket has not confirmed yet
    pub fn outstanding_bytes(&self) -> usize {
        self.inner.shared.lock().in_flight
    }

    /// Hand a complete message to the transport without blocking
    pub fn send(&self, message: &Bytes) -> SendOutcome {
        let mut shared = self.inner.shared.lock();
        if !shared.fsm.is_connected() {
            return SendOutcome::Failed;
        }

        if shared.in_flight + message.len() > self.inner.config.send_buffer_bytes {
            debug!(
                in_flight = shared.in_flight,
                len = message.len(),
                "send buffer saturated"
            );
            return SendOutcome::Busy;
        }

        let queued = shared
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.outbound.send(message.clone()).is_ok())
            .unwrap_or(false);

        if queued {
            shared.in_flight += message.len();
            SendOutcome::Sent
        } else {
            Self::fail(&mut shared, TransportFault::WriteFailed);
            SendOutcome::Failed
        }
    }

    /// Spawn a task that calls [`TransportEventSink::on_poll`] every `period`.
    ///
    /// The task ends once every manager handle is dropped.
    pub fn spawn_poller(&self, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match ConnectionManager::from_weak(&weak) {
                    Some(manager) => manager.on_poll(),
                    None => break,
                }
            }
        })
    }

    /// Drop the endpoint and record the fault
    fn fail(shared: &mut Shared, fault: TransportFault) {
        let was = shared.fsm.state();
        shared.connect_task = None;
        shared.endpoint = None;
        shared.in_flight = 0;
        shared.fsm.process_event(ConnectionEvent::Error(fault));

        match was {
            LinkState::Connecting => shared.backoff.failed(Instant::now()),
            // A dropped session may reconnect on the next poll
            _ => shared.backoff.reset(),
        }
        warn!(%fault, from = %was, "connection lost");
    }

    fn is_current(shared: &Shared, attempt: u64) -> bool {
        shared.fsm.attempts() == attempt && shared.fsm.state() != LinkState::Disconnected
    }
}

impl TransportEventSink for ConnectionManager {
    fn on_connected(&self, attempt: u64, stream: BoxedStream) {
        let mut shared = self.inner.shared.lock();
        if shared.fsm.attempts() != attempt || shared.fsm.state() != LinkState::Connecting {
            debug!(attempt, "dropping stale connection");
            return;
        }

        shared.connect_task = None;
        shared.fsm.process_event(ConnectionEvent::Connected);
        shared.backoff.reset();
        shared.in_flight = 0;

        let (reader, writer) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.inner);

        shared.endpoint = Some(Endpoint {
            attempt,
            outbound,
            writer: tokio::spawn(write_loop(writer, outbound_rx, weak.clone(), attempt)),
            reader: tokio::spawn(read_loop(reader, weak, attempt)),
        });

        info!(attempt, peer = %self.inner.connector.peer(), "connected");
    }

    fn on_error(&self, attempt: u64, fault: TransportFault) {
        let mut shared = self.inner.shared.lock();
        if !Self::is_current(&shared, attempt) {
            debug!(attempt, %fault, "ignoring error from stale attempt");
            return;
        }
        Self::fail(&mut shared, fault);
    }

    fn on_sent(&self, attempt: u64, len: usize) {
        let mut shared = self.inner.shared.lock();
        let current = shared
            .endpoint
            .as_ref()
            .is_some_and(|endpoint| endpoint.attempt == attempt);
        if current {
            shared.in_flight = shared.in_flight.saturating_sub(len);
        }
    }

    fn on_poll(&self) {
        if self.state() == LinkState::Disconnected {
            debug!("poll found connection down");
            self.reconnect();
        }
    }
}

/// Drain queued messages onto the socket, confirming each one
async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    manager: Weak<Inner>,
    attempt: u64,
) {
    while let Some(message) = outbound_rx.recv().await {
        let result = match writer.write_all(&message).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        let Some(manager) = ConnectionManager::from_weak(&manager) else {
            return;
        };
        match result {
            Ok(()) => manager.on_sent(attempt, message.len()),
            Err(e) => {
                warn!(attempt, "write error: {}", e);
                manager.on_error(attempt, TransportFault::WriteFailed);
                return;
            }
        }
    }
}

/// The collector never talks back; EOF or an error means the session is gone
async fn read_loop(mut reader: ReadHalf<BoxedStream>, manager: Weak<Inner>, attempt: u64) {
    let mut buf = [0u8; 256];
    let fault = loop {
        match reader.read(&mut buf).await {
            Ok(0) => break TransportFault::ClosedByPeer,
            Ok(n) => debug!(attempt, bytes = n, "discarding inbound data"),
            Err(e) => {
                debug!(attempt, "read error: {}", e);
                break TransportFault::ReadFailed;
            }
        }
    };

    if let Some(manager) = ConnectionManager::from_weak(&manager) {
        manager.on_error(attempt, fault);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::{read_line, wait_until, MemoryCollector, MemoryConnector};

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_millis(200),
            send_buffer_bytes: 64,
            reconnect_delay: Duration::from_millis(50),
            max_reconnect_delay: Duration::from_millis(200),
        }
    }

    fn manager_with(buffer: usize) -> (ConnectionManager, Arc<MemoryConnector>, MemoryCollector) {
        let (connector, collector) = MemoryConnector::new(buffer);
        let connector = Arc::new(connector);
        let manager = ConnectionManager::new(test_config(), connector.clone());
        (manager, connector, collector)
    }

    #[tokio::test]
    async fn test_start_connects() {
        let (manager, _connector, mut collector) = manager_with(1024);
        assert_eq!(manager.state(), LinkState::Disconnected);

        manager.start();
        assert_eq!(manager.state(), LinkState::Connecting);
        assert!(wait_until(|| manager.is_connected()).await);
        assert!(collector.accept().await.is_some());
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test]
    async fn test_start_while_connecting_or_connected_is_noop() {
        let (manager, _connector, _collector) = manager_with(1024);
        manager.start();
        manager.start();
        assert_eq!(manager.attempts(), 1);

        assert!(wait_until(|| manager.is_connected()).await);
        manager.start();
        assert_eq!(manager.attempts(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (manager, _connector, _collector) = manager_with(1024);
        manager.close();
        manager.close();
        assert_eq!(manager.state(), LinkState::Disconnected);

        manager.start();
        assert!(wait_until(|| manager.is_connected()).await);
        manager.close();
        manager.close();
        assert_eq!(manager.state(), LinkState::Disconnected);
        assert_eq!(manager.send(&Bytes::from_static(b"x\n")), SendOutcome::Failed);
    }

    #[tokio::test]
    async fn test_send_delivers_and_confirms() {
        let (manager, _connector, mut collector) = manager_with(1024);
        manager.start();
        assert!(wait_until(|| manager.is_connected()).await);
        let mut peer = collector.accept().await.unwrap();

        let outcome = manager.send(&Bytes::from_static(b"hello\n"));
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(read_line(&mut peer).await.as_deref(), Some("hello\n"));
        assert!(wait_until(|| manager.outstanding_bytes() == 0).await);
    }

    #[tokio::test]
    async fn test_send_reports_busy_when_budget_exhausted() {
        // Pipe holds 8 bytes, so the writer stalls until the peer reads
        let (manager, _connector, mut collector) = manager_with(8);
        manager.start();
        assert!(wait_until(|| manager.is_connected()).await);
        let mut peer = collector.accept().await.unwrap();

        let message = Bytes::from(vec![b'a'; 40]);
        assert_eq!(manager.send(&message), SendOutcome::Sent);
        assert_eq!(manager.send(&message), SendOutcome::Busy);
        assert!(manager.is_connected());

        assert!(read_exact_bytes(&mut peer, 40).await);
        assert!(wait_until(|| manager.outstanding_bytes() == 0).await);
        assert_eq!(manager.send(&message), SendOutcome::Sent);
    }

    async fn read_exact_bytes(
        peer: &mut tokio::io::BufReader<tokio::io::DuplexStream>,
        len: usize,
    ) -> bool {
        let mut buf = vec![0u8; len];
        tokio::time::timeout(Duration::from_secs(1), peer.read_exact(&mut buf))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let (manager, _connector, mut collector) = manager_with(1024);
        manager.start();
        assert!(wait_until(|| manager.is_connected()).await);

        drop(collector.accept().await.unwrap());
        assert!(wait_until(|| !manager.is_connected()).await);
        assert_eq!(manager.last_error(), Some(TransportFault::ClosedByPeer));
        assert_eq!(manager.send(&Bytes::from_static(b"x\n")), SendOutcome::Failed);
    }

    #[tokio::test]
    async fn test_poll_reconnects_after_link_loss() {
        let (manager, _connector, mut collector) = manager_with(1024);
        manager.start();
        assert!(wait_until(|| manager.is_connected()).await);
        drop(collector.accept().await.unwrap());
        assert!(wait_until(|| !manager.is_connected()).await);

        manager.on_poll();
        assert!(wait_until(|| manager.is_connected()).await);
        assert_eq!(manager.attempts(), 2);
        assert!(collector.accept().await.is_some());
    }

    #[tokio::test]
    async fn test_failed_connect_backs_off() {
        let (manager, connector, _collector) = manager_with(1024);
        connector.set_refusing(true);

        manager.start();
        assert!(wait_until(|| manager.state() == LinkState::Disconnected).await);
        assert_eq!(manager.last_error(), Some(TransportFault::ConnectFailed));

        // Inside the backoff window the poll does nothing
        manager.on_poll();
        assert_eq!(manager.attempts(), 1);

        connector.set_refusing(false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.on_poll();
        assert_eq!(manager.attempts(), 2);
        assert!(wait_until(|| manager.is_connected()).await);
    }

    #[tokio::test]
    async fn test_close_discards_in_flight_attempt() {
        let (manager, _connector, _collector) = manager_with(1024);
        manager.start();
        manager.close();
        assert_eq!(manager.state(), LinkState::Disconnected);

        // Let any completion from the aborted attempt surface
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_events_are_ignored() {
        let (manager, _connector, _collector) = manager_with(1024);
        manager.start();
        assert!(wait_until(|| manager.is_connected()).await);

        manager.on_error(0, TransportFault::WriteFailed);
        assert!(manager.is_connected());

        let (client, _server) = tokio::io::duplex(16);
        manager.on_connected(7, Box::new(client));
        assert_eq!(manager.attempts(), 1);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_poller_drives_reconnect() {
        let (manager, _connector, _collector) = manager_with(1024);
        let poller = manager.spawn_poller(Duration::from_millis(10));
        assert!(wait_until(|| manager.is_connected()).await);
        poller.abort();
    }
}
