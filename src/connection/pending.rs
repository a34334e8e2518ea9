//! Single-slot store for a message the transport did not accept
//!
//! At most one pre-signed message is retained; storing replaces it. Memory
//! stays bounded however long the outage lasts.

use bytes::Bytes;
use tracing::debug;

use super::manager::{ConnectionManager, SendOutcome};

/// What the pending buffer needs from the transport
pub trait MessageTransport {
    fn is_connected(&self) -> bool;
    fn send(&self, message: &Bytes) -> SendOutcome;
    /// Request a reconnect after a fatal send error
    fn reconnect(&self);
}

impl MessageTransport for ConnectionManager {
    fn is_connected(&self) -> bool {
        ConnectionManager::is_connected(self)
    }

    fn send(&self, message: &Bytes) -> SendOutcome {
        ConnectionManager::send(self, message)
    }

    fn reconnect(&self) {
        ConnectionManager::reconnect(self)
    }
}

#[derive(Debug, Default)]
pub struct PendingBuffer {
    slot: Option<Bytes>,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer `message`, replacing whatever was there
    pub fn store(&mut self, message: Bytes) {
        if self.slot.replace(message).is_some() {
            debug!("pending message overwritten");
        }
    }

    pub fn has_pending(&self) -> bool {
        self.slot.is_some()
    }

    #[cfg(test)]
    pub fn peek(&self) -> Option<&Bytes> {
        self.slot.as_ref()
    }

    /// Retry the buffered message if the transport is connected.
    ///
    /// The slot is cleared only on [`SendOutcome::Sent`]. Returns `None` when
    /// nothing was attempted.
    pub fn flush_if_possible<T: MessageTransport>(&mut self, transport: &T) -> Option<SendOutcome> {
        let message = self.slot.as_ref()?;
        if !transport.is_connected() {
            return None;
        }

        let outcome = transport.send(message);
        match outcome {
            SendOutcome::Sent => {
                debug!(len = message.len(), "pending message flushed");
                self.slot = None;
            }
            SendOutcome::Busy => {}
            SendOutcome::Failed => transport.reconnect(),
        }
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// Transport returning scripted outcomes and recording what it saw
    struct ScriptedTransport {
        connected: Cell<bool>,
        outcome: Cell<SendOutcome>,
        sent: RefCell<Vec<Bytes>>,
        reconnects: Cell<u32>,
    }

    impl ScriptedTransport {
        fn new(outcome: SendOutcome) -> Self {
            Self {
                connected: Cell::new(true),
                outcome: Cell::new(outcome),
                sent: RefCell::new(Vec::new()),
                reconnects: Cell::new(0),
            }
        }
    }

    impl MessageTransport for ScriptedTransport {
        fn is_connected(&self) -> bool {
            self.connected.get()
        }

        fn send(&self, message: &Bytes) -> SendOutcome {
            self.sent.borrow_mut().push(message.clone());
            self.outcome.get()
        }

        fn reconnect(&self) {
            self.reconnects.set(self.reconnects.get() + 1);
        }
    }

    #[test]
    fn test_store_keeps_only_latest() {
        let mut pending = PendingBuffer::new();
        pending.store(Bytes::from_static(b"m1\n"));
        pending.store(Bytes::from_static(b"m2\n"));

        let transport = ScriptedTransport::new(SendOutcome::Sent);
        assert_eq!(pending.flush_if_possible(&transport), Some(SendOutcome::Sent));
        assert_eq!(transport.sent.borrow().as_slice(), &[Bytes::from_static(b"m2\n")]);
        assert!(!pending.has_pending());
    }

    #[test]
    fn test_busy_leaves_message_untouched() {
        let mut pending = PendingBuffer::new();
        pending.store(Bytes::from_static(b"m1\n"));

        let transport = ScriptedTransport::new(SendOutcome::Busy);
        assert_eq!(pending.flush_if_possible(&transport), Some(SendOutcome::Busy));
        assert_eq!(pending.peek(), Some(&Bytes::from_static(b"m1\n")));
        assert_eq!(transport.reconnects.get(), 0);
    }

    #[test]
    fn test_failed_leaves_message_and_reconnects() {
        let mut pending = PendingBuffer::new();
        pending.store(Bytes::from_static(b"m1\n"));

        let transport = ScriptedTransport::new(SendOutcome::Failed);
        assert_eq!(pending.flush_if_possible(&transport), Some(SendOutcome::Failed));
        assert_eq!(pending.peek(), Some(&Bytes::from_static(b"m1\n")));
        assert_eq!(transport.reconnects.get(), 1);
    }

    #[test]
    fn test_no_attempt_while_disconnected_or_empty() {
        let mut pending = PendingBuffer::new();
        let transport = ScriptedTransport::new(SendOutcome::Sent);
        assert_eq!(pending.flush_if_possible(&transport), None);

        pending.store(Bytes::from_static(b"m1\n"));
        transport.connected.set(false);
        assert_eq!(pending.flush_if_possible(&transport), None);
        assert!(transport.sent.borrow().is_empty());
        assert!(pending.has_pending());
    }

    #[test]
    fn test_flushed_bytes_are_identical() {
        let mut pending = PendingBuffer::new();
        let original = Bytes::from_static(b"{\"meta\":{}}\n");
        pending.store(original.clone());

        let transport = ScriptedTransport::new(SendOutcome::Busy);
        pending.flush_if_possible(&transport);
        transport.outcome.set(SendOutcome::Sent);
        pending.flush_if_possible(&transport);

        let sent = transport.sent.borrow();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| *m == original));
        assert!(!pending.has_pending());
    }
}
