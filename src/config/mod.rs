//! Configuration module
//!
//! Both binaries start from defaults, layer an optional JSON file on top and
//! finally apply command line / environment overrides.

pub mod defaults;

use config::{Config, File, FileFormat};
use log::debug;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::{parse_socket_addr, RelayError, Result};
use crate::relay::SupervisorOptions;

/// Load and deserialize a JSON configuration file
fn load_json<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let settings = Config::builder()
        .add_source(File::from(path.to_path_buf()).format(FileFormat::Json))
        .build()
        .map_err(|e| {
            RelayError::Config(format!(
                "Failed to load configuration file {}: {}",
                path.display(),
                e
            ))
        })?;

    let loaded = settings.try_deserialize::<T>().map_err(|e| {
        RelayError::Config(format!(
            "Failed to parse configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    debug!("Configuration loaded from {}", path.display());
    Ok(loaded)
}

fn validate_tuning(buffer_size: usize, max_sessions: usize) -> Result<()> {
    if buffer_size == 0 {
        return Err(RelayError::Config("buffer_size must be greater than zero".to_string()));
    }
    if max_sessions == 0 {
        return Err(RelayError::Config("max_sessions must be greater than zero".to_string()));
    }
    Ok(())
}

/// Parse an optional metrics address; an empty string disables the endpoint
fn parse_metrics_addr(addr: Option<&str>) -> Result<Option<SocketAddr>> {
    match addr.map(str::trim) {
        None | Some("") => Ok(None),
        Some(addr) => parse_socket_addr(addr).map(Some),
    }
}

fn require_path<'a>(path: &'a Option<PathBuf>, what: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| RelayError::Config(format!("{} is required", what)))
}

/// Authenticating server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub addr: String,
    /// Credential file (`identity:bcrypt-hash` lines)
    pub auth: Option<PathBuf>,
    /// PEM certificate chain
    pub cert: Option<PathBuf>,
    /// PEM private key
    pub key: Option<PathBuf>,
    /// Only log errors
    pub quiet: bool,
    /// Log level
    pub log_level: String,
    /// Metrics listen address, disabled when unset
    pub metrics_addr: Option<String>,
    /// Target dial timeout in seconds
    pub connect_timeout: u64,
    /// Read chunk size per copy direction
    pub buffer_size: usize,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Shutdown grace period in seconds
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::server_addr(),
            auth: None,
            cert: None,
            key: None,
            quiet: false,
            log_level: defaults::log_level(),
            metrics_addr: None,
            connect_timeout: defaults::connect_timeout(),
            buffer_size: defaults::buffer_size(),
            max_sessions: defaults::max_sessions(),
            shutdown_timeout: defaults::shutdown_timeout(),
        }
    }
}

impl ServerConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// Check the configuration before anything is bound
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.metrics_addr()?;
        self.auth_path()?;
        self.cert_path()?;
        self.key_path()?;
        validate_tuning(self.buffer_size, self.max_sessions)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.addr)
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        parse_metrics_addr(self.metrics_addr.as_deref())
    }

    pub fn auth_path(&self) -> Result<&Path> {
        require_path(&self.auth, "credential file (--auth)")
    }

    pub fn cert_path(&self) -> Result<&Path> {
        require_path(&self.cert, "certificate (--cert)")
    }

    pub fn key_path(&self) -> Result<&Path> {
        require_path(&self.key, "private key (--key)")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            buffer_size: self.buffer_size,
            max_sessions: self.max_sessions,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        }
    }
}

/// Forwarder configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Listen address
    pub addr: String,
    /// Address of the authenticating server
    pub server: Option<String>,
    /// Accept any server certificate
    pub insecure_skip_verify: bool,
    /// Extra CA file used to verify the server
    pub ca_cert: Option<PathBuf>,
    /// Name checked against the server certificate
    pub server_name: Option<String>,
    /// Only log errors
    pub quiet: bool,
    /// Log level
    pub log_level: String,
    /// Metrics listen address; an empty string disables the endpoint
    pub metrics_addr: Option<String>,
    /// Server dial timeout in seconds
    pub connect_timeout: u64,
    /// Read chunk size per copy direction
    pub buffer_size: usize,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Shutdown grace period in seconds
    pub shutdown_timeout: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            addr: defaults::forwarder_addr(),
            server: None,
            insecure_skip_verify: false,
            ca_cert: None,
            server_name: None,
            quiet: false,
            log_level: defaults::log_level(),
            metrics_addr: defaults::forwarder_metrics_addr(),
            connect_timeout: defaults::connect_timeout(),
            buffer_size: defaults::buffer_size(),
            max_sessions: defaults::max_sessions(),
            shutdown_timeout: defaults::shutdown_timeout(),
        }
    }
}

impl ForwarderConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        load_json(path)
    }

    /// Check the configuration before anything is bound
    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.metrics_addr()?;
        self.server_addr()?;
        validate_tuning(self.buffer_size, self.max_sessions)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.addr)
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>> {
        parse_metrics_addr(self.metrics_addr.as_deref())
    }

    /// Server address as given; resolved on every dial
    pub fn server_addr(&self) -> Result<&str> {
        match self.server.as_deref().map(str::trim) {
            Some(server) if !server.is_empty() => Ok(server),
            _ => Err(RelayError::Config("server address (--server) is required".to_string())),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn supervisor_options(&self) -> SupervisorOptions {
        SupervisorOptions {
            buffer_size: self.buffer_size,
            max_sessions: self.max_sessions,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
        }
    }
}
