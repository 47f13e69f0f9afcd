//! Secure SOCKS server
//!
//! Terminates TLS, authenticates SOCKS5 clients against a bcrypt credential
//! file and relays them to the requested targets.

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use secure_socks_relay::auth::{AuthenticationGate, CredentialStore};
use secure_socks_relay::common::{effective_level, init_logger, Result};
use secure_socks_relay::config::ServerConfig;
use secure_socks_relay::relay::{AuthenticatingEndpoint, ConnectionSupervisor};
use secure_socks_relay::socks::Socks5Negotiator;
use secure_socks_relay::telemetry::start_observer;
use secure_socks_relay::tls::{certificate_info, TlsServerBinding};
use secure_socks_relay::{APP_NAME, VERSION};

/// Credential-gated SOCKS5 over TLS
#[derive(Parser, Debug)]
#[clap(author, version = VERSION, about, long_about = None)]
struct Args {
    /// Listen address [default: 0.0.0.0:8000]
    #[clap(long, env = "SECURE_SOCKS_ADDR")]
    addr: Option<String>,

    /// Credential file with identity:bcrypt-hash lines
    #[clap(long, env = "SECURE_SOCKS_AUTH")]
    auth: Option<PathBuf>,

    /// Server certificate chain (PEM)
    #[clap(long, env = "SECURE_SOCKS_CERT")]
    cert: Option<PathBuf>,

    /// Server private key (PEM)
    #[clap(long, env = "SECURE_SOCKS_KEY")]
    key: Option<PathBuf>,

    /// Only log errors
    #[clap(long)]
    quiet: bool,

    /// Log level [default: info]
    #[clap(long, env = "SECURE_SOCKS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Serve Prometheus metrics on this address
    #[clap(long)]
    metrics_addr: Option<String>,

    /// Target dial timeout in seconds [default: 180]
    #[clap(long)]
    connect_timeout: Option<u64>,

    /// Load configuration from a JSON file
    #[clap(long)]
    config_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config_file {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.addr = addr;
        }
        if self.auth.is_some() {
            config.auth = self.auth;
        }
        if self.cert.is_some() {
            config.cert = self.cert;
        }
        if self.key.is_some() {
            config.key = self.key;
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

async fn run(config: ServerConfig) -> Result<()> {
    info!("Starting {} server v{}", APP_NAME, VERSION);
    config.validate()?;

    let observer = start_observer(config.metrics_addr()?).await?;

    let store = CredentialStore::load(config.auth_path()?)?;
    info!("Loaded {} credentials from {}", store.len(), config.auth_path()?.display());

    match certificate_info(config.cert_path()?) {
        Ok(cert) => {
            info!("Certificate subject: {}", cert.subject);
            info!("Certificate fingerprint: {}", cert.fingerprint);
        }
        Err(e) => warn!("Unable to inspect certificate: {}", e),
    }

    let listen_addr = config.listen_addr()?;
    let binding =
        TlsServerBinding::bind(listen_addr, config.cert_path()?, config.key_path()?).await?;
    let (listener, acceptor) = binding.into_parts();

    let negotiator = Socks5Negotiator::new(
        Arc::new(AuthenticationGate::new(Arc::new(store))),
        config.connect_timeout(),
    );
    let endpoint = AuthenticatingEndpoint::new(acceptor, negotiator, config.connect_timeout());

    let supervisor =
        ConnectionSupervisor::new(listener, endpoint, observer, config.supervisor_options());
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

    info!("Server ready, press Ctrl+C to stop");
    supervisor.run().await
}
