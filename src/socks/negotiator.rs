//! SOCKS5 server-side negotiation (username/password, CONNECT only)

use log::debug;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::Authenticator;
use crate::common::{RelayError, Result};

const SOCKS_VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;
const AUTH_SUCCESS: u8 = 0x00;
const AUTH_FAILURE: u8 = 0x01;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_HOST_UNREACHABLE: u8 = 0x04;
const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Destination requested by a CONNECT command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// Literal IP address and port
    Ip(SocketAddr),
    /// Domain name and port, resolved when dialing
    Domain(String, u16),
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{}", addr),
            Self::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

/// Server side of a SOCKS5 handshake
///
/// Requires username/password authentication and supports only CONNECT.
#[derive(Clone)]
pub struct Socks5Negotiator {
    authenticator: Arc<dyn Authenticator>,
    connect_timeout: Duration,
}

impl Socks5Negotiator {
    /// Create a negotiator that checks credentials with `authenticator`
    pub fn new(authenticator: Arc<dyn Authenticator>, connect_timeout: Duration) -> Self {
        Self {
            authenticator,
            connect_timeout,
        }
    }

    /// Run the handshake on `stream` and dial the requested target
    ///
    /// On success the CONNECT reply has been sent and the returned stream is the
    /// backend half of the session. Equivalent to [`handshake`](Self::handshake)
    /// followed by [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// [`RelayError::AuthenticationRejected`] when the gate refuses the client (no
    /// dial is attempted), [`RelayError::Dial`] when the target cannot be reached
    /// and [`RelayError::Negotiation`] for protocol violations.
    pub async fn negotiate<S>(&self, stream: &mut S) -> Result<TcpStream>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let target = self.handshake(stream).await?;
        self.connect(stream, &target).await
    }

    /// Method selection, authentication and the CONNECT request
    ///
    /// Everything the client must send before a backend is dialed. Callers
    /// bound this with their own deadline; it waits on the client indefinitely.
    pub async fn handshake<S>(&self, stream: &mut S) -> Result<TargetAddr>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.select_method(stream).await?;
        self.authenticate(stream).await?;
        let target = read_connect_request(stream).await?;

        debug!("SOCKS5 CONNECT to {}", target);
        Ok(target)
    }

    /// Dial `target` and send the CONNECT reply
    pub async fn connect<S>(&self, stream: &mut S, target: &TargetAddr) -> Result<TcpStream>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let backend = match self.dial(target).await {
            Ok(backend) => backend,
            Err(e) => {
                let code = match e.kind() {
                    io::ErrorKind::ConnectionRefused => REPLY_CONNECTION_REFUSED,
                    io::ErrorKind::TimedOut => REPLY_HOST_UNREACHABLE,
                    _ => REPLY_GENERAL_FAILURE,
                };
                // The client may already be gone; the dial error is what matters.
                let _ = send_reply(stream, code, None).await;
                return Err(RelayError::dial(target.to_string(), e));
            }
        };

        send_reply(stream, REPLY_SUCCEEDED, backend.local_addr().ok()).await?;
        Ok(backend)
    }

    async fn select_method<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut header = [0u8; 2];
        stream.read_exact(&mut header).await?;
        if header[0] != SOCKS_VERSION {
            return Err(RelayError::Negotiation(format!(
                "unsupported SOCKS version: {}",
                header[0]
            )));
        }

        let mut methods = vec![0u8; header[1] as usize];
        stream.read_exact(&mut methods).await?;

        if !methods.contains(&METHOD_USER_PASS) {
            stream.write_all(&[SOCKS_VERSION, METHOD_NONE_ACCEPTABLE]).await?;
            stream.flush().await?;
            return Err(RelayError::Negotiation(
                "client does not offer username/password authentication".to_string(),
            ));
        }

        stream.write_all(&[SOCKS_VERSION, METHOD_USER_PASS]).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn authenticate<S>(&self, stream: &mut S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut version = [0u8; 1];
        stream.read_exact(&mut version).await?;
        if version[0] != AUTH_VERSION {
            return Err(RelayError::Negotiation(format!(
                "unsupported authentication version: {}",
                version[0]
            )));
        }

        let identity = read_length_prefixed(stream).await?;
        let secret = read_length_prefixed(stream).await?;
        let (identity, secret) = match (String::from_utf8(identity), String::from_utf8(secret)) {
            (Ok(identity), Ok(secret)) => (identity, secret),
            _ => {
                stream.write_all(&[AUTH_VERSION, AUTH_FAILURE]).await?;
                stream.flush().await?;
                return Err(RelayError::Negotiation(
                    "credentials are not valid UTF-8".to_string(),
                ));
            }
        };

        // bcrypt is CPU bound; keep it off the reactor threads.
        let authenticator = Arc::clone(&self.authenticator);
        let check_identity = identity.clone();
        let accepted = tokio::task::spawn_blocking(move || {
            authenticator.authenticate(&check_identity, &secret)
        })
        .await
        .unwrap_or(false);

        let status = if accepted { AUTH_SUCCESS } else { AUTH_FAILURE };
        stream.write_all(&[AUTH_VERSION, status]).await?;
        stream.flush().await?;

        if accepted {
            Ok(())
        } else {
            Err(RelayError::AuthenticationRejected(identity))
        }
    }

    async fn dial(&self, target: &TargetAddr) -> io::Result<TcpStream> {
        let connect = async {
            match target {
                TargetAddr::Ip(addr) => TcpStream::connect(addr).await,
                TargetAddr::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
            }
        };
        match timeout(self.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }
}

async fn read_length_prefixed<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut len = [0u8; 1];
    stream.read_exact(&mut len).await?;
    let mut value = vec![0u8; len[0] as usize];
    stream.read_exact(&mut value).await?;
    Ok(value)
}

async fn read_connect_request<S>(stream: &mut S) -> Result<TargetAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // VER | CMD | RSV | ATYP
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    if header[0] != SOCKS_VERSION {
        return Err(RelayError::Negotiation(format!(
            "invalid request version: {}",
            header[0]
        )));
    }

    if header[1] != CMD_CONNECT {
        send_reply(stream, REPLY_COMMAND_NOT_SUPPORTED, None).await?;
        return Err(RelayError::Negotiation(format!(
            "unsupported command: {}",
            header[1]
        )));
    }

    let target = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
        }
        ATYP_DOMAIN => {
            let domain = read_length_prefixed(stream).await?;
            let domain = String::from_utf8(domain)
                .map_err(|_| RelayError::Negotiation("domain is not valid UTF-8".to_string()))?;
            let port = stream.read_u16().await?;
            TargetAddr::Domain(domain, port)
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
        }
        other => {
            send_reply(stream, REPLY_ADDRESS_NOT_SUPPORTED, None).await?;
            return Err(RelayError::Negotiation(format!(
                "unsupported address type: {}",
                other
            )));
        }
    };

    Ok(target)
}

/// VER | REP | RSV | ATYP | BND.ADDR | BND.PORT
async fn send_reply<S>(stream: &mut S, code: u8, bound: Option<SocketAddr>) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let bound = bound.unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
    let mut reply = vec![SOCKS_VERSION, code, 0x00];
    match bound.ip() {
        IpAddr::V4(ip) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&ip.octets());
        }
    }
    reply.extend_from_slice(&bound.port().to_be_bytes());
    stream.write_all(&reply).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::net::TcpListener;

    struct Fixed;

    impl Authenticator for Fixed {
        fn authenticate(&self, identity: &str, secret: &str) -> bool {
            identity == "alice" && secret == "wonderland"
        }
    }

    fn negotiator() -> Socks5Negotiator {
        Socks5Negotiator::new(Arc::new(Fixed), Duration::from_secs(5))
    }

    fn auth_request(identity: &str, secret: &str) -> Vec<u8> {
        let mut req = vec![AUTH_VERSION, identity.len() as u8];
        req.extend_from_slice(identity.as_bytes());
        req.push(secret.len() as u8);
        req.extend_from_slice(secret.as_bytes());
        req
    }

    #[tokio::test]
    async fn test_rejects_client_without_password_method() {
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (result, reply) = tokio::join!(negotiator.negotiate(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
            let mut reply = [0u8; 2];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        assert_eq!(reply, [0x05, 0xFF]);
        assert!(matches!(result, Err(RelayError::Negotiation(_))));
    }

    #[tokio::test]
    async fn test_rejects_wrong_password_without_dial() {
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (result, replies) = tokio::join!(negotiator.negotiate(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut method = [0u8; 2];
            client.read_exact(&mut method).await.unwrap();
            client.write_all(&auth_request("alice", "wrong")).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();
            (method, status)
        });

        assert_eq!(replies.0, [0x05, 0x02]);
        assert_eq!(replies.1, [0x01, 0x01]);
        match result {
            Err(RelayError::AuthenticationRejected(identity)) => assert_eq!(identity, "alice"),
            other => panic!("expected rejection, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_rejects_credentials_that_are_not_utf8() {
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (result, status) = tokio::join!(negotiator.negotiate(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut method = [0u8; 2];
            client.read_exact(&mut method).await.unwrap();

            // "wonderland" with one byte replaced by an invalid UTF-8 sequence
            let mut request = vec![AUTH_VERSION, 5];
            request.extend_from_slice(b"alice");
            request.push(10);
            request.extend_from_slice(b"wonder\xFFand");
            client.write_all(&request).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();
            status
        });

        assert_eq!(status, [AUTH_VERSION, AUTH_FAILURE]);
        match result {
            Err(RelayError::Negotiation(msg)) => assert!(msg.contains("UTF-8")),
            other => panic!("expected a negotiation error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_handshake_returns_target_without_dialing() {
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (target, _) = tokio::join!(negotiator.handshake(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut method = [0u8; 2];
            client.read_exact(&mut method).await.unwrap();
            client.write_all(&auth_request("alice", "wonderland")).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();

            let mut request = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 11];
            request.extend_from_slice(b"example.com");
            request.extend_from_slice(&443u16.to_be_bytes());
            client.write_all(&request).await.unwrap();
        });

        assert_eq!(
            target.unwrap(),
            TargetAddr::Domain("example.com".to_string(), 443)
        );
    }

    #[tokio::test]
    async fn test_connect_to_ipv4_target() {
        let target = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target_addr = target.local_addr().unwrap();
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (result, reply) = tokio::join!(negotiator.negotiate(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut method = [0u8; 2];
            client.read_exact(&mut method).await.unwrap();
            client.write_all(&auth_request("alice", "wonderland")).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();
            assert_eq!(status, [0x01, 0x00]);

            let mut request = vec![0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 127, 0, 0, 1];
            request.extend_from_slice(&target_addr.port().to_be_bytes());
            client.write_all(&request).await.unwrap();
            let mut reply = [0u8; 10];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        assert!(result.is_ok(), "negotiation should succeed");
        assert_eq!(&reply[..4], &[0x05, REPLY_SUCCEEDED, 0x00, ATYP_IPV4]);
        let (_accepted, _) = target.accept().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_command() {
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (result, reply) = tokio::join!(negotiator.negotiate(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut method = [0u8; 2];
            client.read_exact(&mut method).await.unwrap();
            client.write_all(&auth_request("alice", "wonderland")).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();

            // BIND
            client.write_all(&[0x05, 0x02, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0, 80]).await.unwrap();
            let mut reply = [0u8; 10];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        assert_eq!(reply[1], REPLY_COMMAND_NOT_SUPPORTED);
        assert!(matches!(result, Err(RelayError::Negotiation(_))));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_dial_error() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (mut client, mut server) = duplex(1024);
        let negotiator = negotiator();

        let (result, reply) = tokio::join!(negotiator.negotiate(&mut server), async {
            client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
            let mut method = [0u8; 2];
            client.read_exact(&mut method).await.unwrap();
            client.write_all(&auth_request("alice", "wonderland")).await.unwrap();
            let mut status = [0u8; 2];
            client.read_exact(&mut status).await.unwrap();

            let mut request = vec![0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 127, 0, 0, 1];
            request.extend_from_slice(&port.to_be_bytes());
            client.write_all(&request).await.unwrap();
            let mut reply = [0u8; 10];
            client.read_exact(&mut reply).await.unwrap();
            reply
        });

        assert_eq!(reply[1], REPLY_CONNECTION_REFUSED);
        assert!(result.map(|_| ()).unwrap_err().is_dial());
    }

    #[test]
    fn test_target_display() {
        let ip = TargetAddr::Ip("[::1]:443".parse().unwrap());
        assert_eq!(ip.to_string(), "[::1]:443");
        let domain = TargetAddr::Domain("example.com".to_string(), 80);
        assert_eq!(domain.to_string(), "example.com:80");
    }
}
