//! Default configuration values
//!
//! Single source of truth for defaults shared by the config structs and the
//! command line parsers.

/// Default listen address of the authenticating server
pub const SERVER_ADDR: &str = "0.0.0.0:8000";

/// Default listen address of the forwarder
pub const FORWARDER_ADDR: &str = "0.0.0.0:8080";

/// Default metrics address of the forwarder
pub const FORWARDER_METRICS_ADDR: &str = "0.0.0.0:9200";

/// Default log level
pub const LOG_LEVEL: &str = "info";

/// Default bound on dialing a backend, in seconds
pub const CONNECT_TIMEOUT: u64 = 180;

/// Default read chunk size per copy direction
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Default maximum number of concurrent sessions
pub const MAX_SESSIONS: usize = 4096;

/// Default grace period for sessions at shutdown, in seconds
pub const SHUTDOWN_TIMEOUT: u64 = 30;

pub fn server_addr() -> String {
    SERVER_ADDR.to_string()
}

pub fn forwarder_addr() -> String {
    FORWARDER_ADDR.to_string()
}

pub fn forwarder_metrics_addr() -> Option<String> {
    Some(FORWARDER_METRICS_ADDR.to_string())
}

pub fn log_level() -> String {
    LOG_LEVEL.to_string()
}

pub fn connect_timeout() -> u64 {
    CONNECT_TIMEOUT
}

pub fn buffer_size() -> usize {
    BUFFER_SIZE
}

pub fn max_sessions() -> usize {
    MAX_SESSIONS
}

pub fn shutdown_timeout() -> u64 {
    SHUTDOWN_TIMEOUT
}
