//! Connection State Machine
//!
//! Defines the valid transitions of the station's single TCP connection.
//! No state is terminal; the machine cycles indefinitely under link flapping.

use std::fmt;

/// Lifecycle of the outbound connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// Last transport fault observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    /// Connect attempt refused or unreachable
    ConnectFailed,
    /// Connect attempt did not finish in time
    ConnectTimeout,
    /// Peer closed the connection
    ClosedByPeer,
    /// Read side failed
    ReadFailed,
    /// Write side failed
    WriteFailed,
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFault::ConnectFailed => write!(f, "connect failed"),
            TransportFault::ConnectTimeout => write!(f, "connect timed out"),
            TransportFault::ClosedByPeer => write!(f, "closed by peer"),
            TransportFault::ReadFailed => write!(f, "read failed"),
            TransportFault::WriteFailed => write!(f, "write failed"),
        }
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connect attempt was requested
    StartRequested,
    /// The transport reported an established connection
    Connected,
    /// The transport reported a fatal error
    Error(TransportFault),
    /// Explicit teardown
    Closed,
}

/// Result of a state transition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// State changed
    Changed { from: LinkState, to: LinkState },
    /// Event accepted but the state was already the target
    Unchanged(LinkState),
    /// Event has no effect in the current state
    Ignored { state: LinkState, event: ConnectionEvent },
}

/// The process-wide connection state
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    link: LinkState,
    last_error: Option<TransportFault>,
    attempts: u64,
}

impl ConnectionStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current state
    pub fn state(&self) -> LinkState {
        self.link
    }

    /// Last fault recorded, cleared on a successful connect
    pub fn last_error(&self) -> Option<TransportFault> {
        self.last_error
    }

    /// Number of connect attempts started so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn is_connected(&self) -> bool {
        self.link == LinkState::Connected
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: ConnectionEvent) -> TransitionResult {
        let from = self.link;
        let to = match (from, event) {
            (LinkState::Disconnected, ConnectionEvent::StartRequested) => {
                self.attempts += 1;
                LinkState::Connecting
            }
            (LinkState::Connecting, ConnectionEvent::Connected) => {
                self.last_error = None;
                LinkState::Connected
            }
            (_, ConnectionEvent::Error(fault)) => {
                self.last_error = Some(fault);
                LinkState::Disconnected
            }
            (_, ConnectionEvent::Closed) => LinkState::Disconnected,
            _ => return TransitionResult::Ignored { state: from, event },
        };

        self.link = to;
        if from == to {
            TransitionResult::Unchanged(to)
        } else {
            TransitionResult::Changed { from, to }
        }
    }
}
