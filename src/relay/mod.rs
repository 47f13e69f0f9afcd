//! Relay core
//!
//! Everything between an accepted connection and its backend: the supervisor
//! that owns sessions, the endpoint connectors, and the cancellable
//! bidirectional copy.

mod endpoint;
mod outcome;
mod pump;
mod session;
mod supervisor;

pub use self::endpoint::{AuthenticatingEndpoint, ForwardingEndpoint};
pub use self::outcome::{
    Classification, CopyOutcome, Direction, RelayResult, SessionInfo, TerminationCause,
};
pub use self::pump::{copy_until_cancelled, spawn_read_pump, ReadEvent};
pub use self::session::{Closable, ConnectionRelay, Session};
pub use self::supervisor::{
    ConnectionSupervisor, SessionConnector, SessionState, SupervisorOptions,
};
