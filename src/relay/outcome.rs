//! Relay outcome types

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Direction of a copy within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to backend
    AtoB,
    /// Backend to client
    BtoA,
}

impl Direction {
    /// Short label used in logs and metrics
    pub fn label(self) -> &'static str {
        match self {
            Self::AtoB => "client_to_backend",
            Self::BtoA => "backend_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Why a copy direction stopped
#[derive(Debug)]
pub enum TerminationCause {
    /// Source reached end of stream
    CleanEof,
    /// The session scope was cancelled, usually by the sibling direction
    Cancelled,
    /// Read or write failed
    TransportError(io::Error),
}

impl TerminationCause {
    /// Whether this cause is part of normal session teardown
    pub fn is_expected(&self) -> bool {
        match self {
            Self::CleanEof | Self::Cancelled => true,
            Self::TransportError(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
            ),
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CleanEof => f.write_str("end of stream"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

/// Result of one copy direction
#[derive(Debug)]
pub struct CopyOutcome {
    /// Which way the bytes flowed
    pub direction: Direction,
    /// Bytes written to the destination
    pub bytes_transferred: u64,
    /// Why the copy stopped
    pub cause: TerminationCause,
}

/// Severity bucket for a finished relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Normal teardown, logged at warning
    Expected,
    /// Anything else, logged at error
    Unexpected,
}

/// Both directions of a finished relay
#[derive(Debug)]
pub struct RelayResult {
    /// Client to backend
    pub forward: CopyOutcome,
    /// Backend to client
    pub backward: CopyOutcome,
    /// Direction that finished first and cancelled the other
    pub initiator: Direction,
    /// Time from accept to relay completion
    pub duration: Duration,
}

impl RelayResult {
    /// Classify the joint outcome
    pub fn classification(&self) -> Classification {
        if self.forward.cause.is_expected() && self.backward.cause.is_expected() {
            Classification::Expected
        } else {
            Classification::Unexpected
        }
    }

    /// Outcome of the direction that ended the session
    pub fn first_finished(&self) -> &CopyOutcome {
        match self.initiator {
            Direction::AtoB => &self.forward,
            Direction::BtoA => &self.backward,
        }
    }

    /// Outcome that explains the classification
    ///
    /// The first direction with an unexpected cause, or the initiator's outcome
    /// when both ended as expected.
    pub fn decisive(&self) -> &CopyOutcome {
        let first = self.first_finished();
        if !first.cause.is_expected() {
            return first;
        }
        [&self.forward, &self.backward]
            .into_iter()
            .find(|outcome| !outcome.cause.is_expected())
            .unwrap_or(first)
    }
}

/// Identity of one accepted connection, passed to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Random id for correlating log lines
    pub id: Uuid,
    /// Peer address of the accepted connection
    pub remote_addr: SocketAddr,
}

impl SessionInfo {
    /// New session identity for `remote_addr`
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            remote_addr,
        }
    }
}
