//! Network utility functions
//!
//! This module provides utility functions for network operations.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use socket2::SockRef;
use tokio::net::TcpStream;

use super::error::{RelayError, Result};

/// Parse a socket address
///
/// Accepts literal addresses as well as `host:port` pairs that resolve.
pub fn parse_socket_addr(addr: &str) -> Result<SocketAddr> {
    if let Ok(socket_addr) = SocketAddr::from_str(addr) {
        return Ok(socket_addr);
    }

    match addr.to_socket_addrs() {
        Ok(mut addrs) => addrs
            .next()
            .ok_or_else(|| RelayError::Config(format!("Failed to parse address: {}", addr))),
        Err(e) => Err(RelayError::Config(format!("Failed to parse address {}: {}", addr, e))),
    }
}

/// Extract the host part of a `host:port` address
///
/// Bracketed IPv6 literals lose their brackets.
pub fn host_of(addr: &str) -> &str {
    let host = match addr.rfind(':') {
        Some(idx) if !addr[..idx].is_empty() => &addr[..idx],
        _ => addr,
    };
    host.trim_start_matches('[').trim_end_matches(']')
}

/// Disable TCP keep-alive on a connected stream
pub fn disable_keepalive(stream: &TcpStream) -> std::io::Result<()> {
    SockRef::from(stream).set_keepalive(false)
}
