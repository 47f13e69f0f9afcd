//! Secure SOCKS forwarder
//!
//! Accepts plain TCP from local applications and carries it to a secure SOCKS
//! server over TLS. Applications speak SOCKS5 through the tunnel themselves.

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;

use secure_socks_relay::common::{effective_level, init_logger, Result};
use secure_socks_relay::config::ForwarderConfig;
use secure_socks_relay::relay::{ConnectionSupervisor, ForwardingEndpoint};
use secure_socks_relay::telemetry::start_observer;
use secure_socks_relay::tls::{TlsDialOptions, TlsDialer};
use secure_socks_relay::{RelayError, APP_NAME, VERSION};

/// Plain TCP to TLS forwarder for a secure SOCKS server
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Listen address [default: 0.0.0.0:8080]
    #[clap(long, env = "SECURE_SOCKS_FORWARDER_ADDR")]
    addr: Option<String>,

    /// Address of the secure SOCKS server
    #[clap(long, env = "SECURE_SOCKS_SERVER")]
    server: Option<String>,

    /// Do not verify the server certificate
    #[clap(long)]
    insecure_skip_verify: bool,

    /// CA file used to verify the server certificate
    #[clap(long)]
    ca_cert: Option<PathBuf>,

    /// Name checked against the server certificate [default: host of --server]
    #[clap(long)]
    server_name: Option<String>,

    /// Only log errors
    #[clap(long)]
    quiet: bool,

    /// Log level [default: info]
    #[clap(long, env = "SECURE_SOCKS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Serve Prometheus metrics on this address, empty to disable [default: 0.0.0.0:9200]
    #[clap(long)]
    metrics_addr: Option<String>,

    /// Server dial timeout in seconds [default: 180]
    #[clap(long)]
    connect_timeout: Option<u64>,

    /// Load configuration from a JSON file
    #[clap(long)]
    config_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ForwarderConfig> {
        let mut config = match &self.config_file {
            Some(path) => ForwarderConfig::from_file(path)?,
            None => ForwarderConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if self.server.is_some() {
            config.server = self.server;
        }
        if self.insecure_skip_verify {
            config.insecure_skip_verify = true;
        }
        if self.ca_cert.is_some() {
            config.ca_cert = self.ca_cert;
        }
        if self.server_name.is_some() {
            config.server_name = self.server_name;
        }
        if self.quiet {
            config.quiet = true;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.metrics_addr.is_some() {
            config.metrics_addr = self.metrics_addr;
        }
        if let Some(secs) = self.connect_timeout {
            config.connect_timeout = secs;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            init_logger("error");
            error!("{}", e);
            std::process::exit(1);
        }
    };

    init_logger(effective_level(&config.log_level, config.quiet));

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: ForwarderConfig) -> Result<()> {
    info!("Starting {} forwarder v{}", APP_NAME, VERSION);
    config.validate()?;

    let observer = start_observer(config.metrics_addr()?).await?;

    let dialer = TlsDialer::new(
        config.server_addr()?,
        TlsDialOptions {
            insecure_skip_verify: config.insecure_skip_verify,
            ca_cert: config.ca_cert.clone(),
            server_name: config.server_name.clone(),
            connect_timeout: config.connect_timeout(),
        },
    )?;
    info!("Forwarding to {}", dialer.addr());

    let listen_addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| RelayError::Config(format!("could not listen on {}: {}", listen_addr, e)))?;

    let supervisor = ConnectionSupervisor::new(
        listener,
        ForwardingEndpoint::new(dialer),
        observer,
        config.supervisor_options(),
    );
    let shutdown = supervisor.shutdown_token();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Unable to listen for shutdown signal: {}", e),
        }
    });

    info!("Forwarder ready, press Ctrl+C to stop");
    supervisor.run().await
}
