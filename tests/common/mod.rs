//! Shared helpers for integration tests
#![allow(dead_code)]

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_openssl::SslStream;
use tokio_util::sync::CancellationToken;

use secure_socks_relay::auth::{AuthenticationGate, CredentialStore};
use secure_socks_relay::relay::{
    AuthenticatingEndpoint, Classification, ConnectionSupervisor, ForwardingEndpoint, RelayResult,
    SessionInfo, SupervisorOptions,
};
use secure_socks_relay::socks::Socks5Negotiator;
use secure_socks_relay::telemetry::RelayObserver;
use secure_socks_relay::tls::{TlsDialOptions, TlsDialer, TlsServerBinding};
use secure_socks_relay::{RelayError, Result};

pub const IDENTITY: &str = "alice";
pub const SECRET: &str = "wonderland";

/// Bound on every wait in these tests
pub const WAIT: Duration = Duration::from_secs(5);

/// Self-signed certificate, key and credential file in a temporary directory
pub struct Fixture {
    pub dir: TempDir,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub credentials: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = self_signed("localhost");

        let cert_path = dir.path().join("server.crt");
        let key_path = dir.path().join("server.key");
        fs::write(&cert_path, cert.to_pem().unwrap()).unwrap();
        fs::write(&key_path, key.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let credentials = dir.path().join("users.htpasswd");
        let hash = bcrypt::hash(SECRET, 4).unwrap();
        fs::write(&credentials, format!("# test users\n{}:{}\n", IDENTITY, hash)).unwrap();

        Self {
            dir,
            cert: cert_path,
            key: key_path,
            credentials,
        }
    }

    pub fn store(&self) -> Arc<CredentialStore> {
        Arc::new(CredentialStore::load(&self.credentials).unwrap())
    }
}

fn self_signed(common_name: &str) -> (X509, PKey<openssl::pkey::Private>) {
    let rsa = Rsa::generate(2048).unwrap();
    let key = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", common_name).unwrap();
    let name = name.build();

    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(1).unwrap())
        .unwrap();
    builder
        .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
        .unwrap();
    let san = SubjectAlternativeName::new()
        .dns("localhost")
        .ip("127.0.0.1")
        .build(&builder.x509v3_context(None, None))
        .unwrap();
    builder.append_extension(san).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();

    (builder.build(), key)
}

pub fn options() -> SupervisorOptions {
    SupervisorOptions {
        buffer_size: 16 * 1024,
        max_sessions: 64,
        shutdown_timeout: Duration::from_secs(2),
    }
}

/// Lifecycle event captured by [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Rejected(String),
    DialFailed(String),
    Completed {
        classification: Classification,
        sent: u64,
        received: u64,
    },
    Fault(String),
    Closed,
}

/// Observer that keeps every event for later assertions
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| matches(e)).count()
    }

    /// Poll until at least `n` events satisfy `matches`
    pub async fn wait_for(&self, n: usize, matches: impl Fn(&Event) -> bool) {
        let waited = tokio::time::timeout(WAIT, async {
            while self.count(&matches) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for events: {:?}", self.events());
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl RelayObserver for RecordingObserver {
    fn client_connected(&self, _session: &SessionInfo) {
        self.push(Event::Connected);
    }

    fn session_rejected(&self, _session: &SessionInfo, error: &RelayError) {
        self.push(Event::Rejected(error.to_string()));
    }

    fn dial_failed(&self, _session: &SessionInfo, error: &RelayError) {
        self.push(Event::DialFailed(error.to_string()));
    }

    fn relay_completed(&self, _session: &SessionInfo, result: &RelayResult) {
        self.push(Event::Completed {
            classification: result.classification(),
            sent: result.forward.bytes_transferred,
            received: result.backward.bytes_transferred,
        });
    }

    fn session_fault(&self, _session: &SessionInfo, reason: &str) {
        self.push(Event::Fault(reason.to_string()));
    }

    fn session_closed(&self, _session: &SessionInfo) {
        self.push(Event::Closed);
    }
}

/// Backend that answers `PING` with `PONG` and reports what it saw
pub struct PingBackend {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
    pub pings: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl PingBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));

        let (a, p, c) = (accepted.clone(), pings.clone(), closed.clone());
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                a.fetch_add(1, Ordering::SeqCst);
                let (p, c) = (p.clone(), c.clone());
                tokio::spawn(async move {
                    let mut buf = [0u8; 4];
                    if stream.read_exact(&mut buf).await.is_ok() && &buf == b"PING" {
                        p.fetch_add(1, Ordering::SeqCst);
                        let _ = stream.write_all(b"PONG").await;
                    }
                    let mut rest = Vec::new();
                    let _ = stream.read_to_end(&mut rest).await;
                    c.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            accepted,
            pings,
            closed,
        }
    }

    pub async fn wait_closed(&self, n: usize) {
        let waited = tokio::time::timeout(WAIT, async {
            while self.closed.load(Ordering::SeqCst) < n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "backend connection was not closed");
    }
}

/// Backend that echoes everything back
pub async fn echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = stream.into_split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// Port nothing is listening on
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// A running supervisor
pub struct Running {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<()>>,
}

pub async fn start_server(fixture: &Fixture, observer: Arc<dyn RelayObserver>) -> Running {
    start_server_with(fixture, observer, options(), Duration::from_secs(2)).await
}

pub async fn start_server_with(
    fixture: &Fixture,
    observer: Arc<dyn RelayObserver>,
    options: SupervisorOptions,
    handshake_timeout: Duration,
) -> Running {
    let binding = TlsServerBinding::bind("127.0.0.1:0".parse().unwrap(), &fixture.cert, &fixture.key)
        .await
        .unwrap();
    let addr = binding.local_addr().unwrap();
    let (listener, acceptor) = binding.into_parts();

    let negotiator = Socks5Negotiator::new(
        Arc::new(AuthenticationGate::new(fixture.store())),
        Duration::from_secs(2),
    );
    let endpoint = AuthenticatingEndpoint::new(acceptor, negotiator, handshake_timeout);
    let supervisor = ConnectionSupervisor::new(listener, endpoint, observer, options);
    let shutdown = supervisor.shutdown_token();

    Running {
        addr,
        shutdown,
        handle: tokio::spawn(supervisor.run()),
    }
}

/// Complete a TLS handshake with `server` without verifying its certificate
pub async fn tls_client(server: SocketAddr) -> SslStream<TcpStream> {
    let mut builder = SslConnector::builder(SslMethod::tls_client()).unwrap();
    builder.set_verify(SslVerifyMode::NONE);
    let connector = builder.build();
    let ssl = connector
        .configure()
        .unwrap()
        .verify_hostname(false)
        .into_ssl("localhost")
        .unwrap();

    let tcp = TcpStream::connect(server).await.unwrap();
    let mut stream = SslStream::new(ssl, tcp).unwrap();
    Pin::new(&mut stream).connect().await.unwrap();
    stream
}

pub async fn start_forwarder(
    server: SocketAddr,
    dial: TlsDialOptions,
    observer: Arc<dyn RelayObserver>,
) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dialer = TlsDialer::new(server.to_string(), dial).unwrap();
    let supervisor =
        ConnectionSupervisor::new(listener, ForwardingEndpoint::new(dialer), observer, options());
    let shutdown = supervisor.shutdown_token();

    Running {
        addr,
        shutdown,
        handle: tokio::spawn(supervisor.run()),
    }
}

pub fn insecure_dial() -> TlsDialOptions {
    TlsDialOptions {
        insecure_skip_verify: true,
        ca_cert: None,
        server_name: None,
        connect_timeout: Duration::from_secs(2),
    }
}

/// Client side of the SOCKS5 handshake with username/password
///
/// Returns the CONNECT reply code; authentication rejection is a
/// `PermissionDenied` error.
pub async fn socks_connect<S>(
    stream: &mut S,
    identity: &str,
    secret: &str,
    target: SocketAddr,
) -> io::Result<u8>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&[0x05, 0x01, 0x02]).await?;
    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await?;
    assert_eq!(method, [0x05, 0x02]);

    let mut auth = vec![0x01, identity.len() as u8];
    auth.extend_from_slice(identity.as_bytes());
    auth.push(secret.len() as u8);
    auth.extend_from_slice(secret.as_bytes());
    stream.write_all(&auth).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != 0x00 {
        return Err(io::Error::new(io::ErrorKind::PermissionDenied, "rejected"));
    }

    let SocketAddr::V4(target) = target else {
        panic!("tests only use IPv4 targets");
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&target.ip().octets());
    request.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await?;
    Ok(reply[1])
}
