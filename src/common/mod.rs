//! Common module
//!
//! This module contains shared errors and utility functions used throughout the application.

pub mod error;
pub mod log;
pub mod net;

// Re-export commonly used types and functions
pub use error::{RelayError, Result};
pub use log::{effective_level, init_logger};
pub use net::{disable_keepalive, host_of, parse_socket_addr};
