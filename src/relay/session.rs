//! Connection relay
//!
//! Drives both copy directions of one session under a shared cancellation
//! scope and closes both streams exactly once.

use log::debug;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::outcome::{Direction, RelayResult, SessionInfo};
use super::pump::{copy_until_cancelled, spawn_read_pump};

/// Upper bound on a graceful shutdown of one stream (TLS close_notify, FIN)
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// One accepted client paired with its backend connection
pub struct Session<A, B> {
    /// Accepted client side
    pub client: A,
    /// Dialed backend side
    pub backend: B,
    /// When the client connection was accepted
    pub started_at: Instant,
    /// Identity for logging
    pub info: SessionInfo,
    /// Cancellation scope shared by both directions
    pub scope: CancellationToken,
}

/// Write side of a stream that can be closed any number of times
///
/// Only the first [`close`](Closable::close) shuts the stream down; later calls
/// do nothing. Shutdown errors are swallowed since the peer may already be gone.
pub struct Closable<S> {
    inner: Option<S>,
}

impl<S> Closable<S>
where
    S: AsyncWrite + Unpin,
{
    /// Wrap an open stream
    pub fn new(stream: S) -> Self {
        Self {
            inner: Some(stream),
        }
    }

    /// Whether `close` has already run
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Shut the stream down and drop it
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.inner.take() {
            match timeout(CLOSE_GRACE, stream.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Ignoring error while closing stream: {}", e),
                Err(_) => debug!("Stream did not close within {:?}, dropping it", CLOSE_GRACE),
            }
        }
    }
}

/// Runs the bidirectional copy for one session
#[derive(Debug, Clone, Copy)]
pub struct ConnectionRelay {
    buffer_size: usize,
}

impl ConnectionRelay {
    /// Create a relay that reads in chunks of at most `buffer_size` bytes
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    /// Relay `session` until one direction ends, then tear both down
    ///
    /// The first direction to finish cancels the session scope so the other
    /// unwinds promptly. Both streams are closed before this returns.
    pub async fn run<A, B>(&self, session: Session<A, B>) -> RelayResult
    where
        A: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Session {
            client,
            backend,
            started_at,
            info,
            scope,
        } = session;

        // Pumps outlive this future if it unwinds; make sure they retire.
        let _retire_pumps = scope.clone().drop_guard();

        let (client_read, mut client_write) = split(client);
        let (backend_read, mut backend_write) = split(backend);

        let (forward_events, forward_pump) =
            spawn_read_pump(client_read, scope.clone(), self.buffer_size);
        let (backward_events, backward_pump) =
            spawn_read_pump(backend_read, scope.clone(), self.buffer_size);

        let initiator = OnceLock::new();

        let forward = async {
            let outcome =
                copy_until_cancelled(Direction::AtoB, forward_events, &mut backend_write, &scope)
                    .await;
            let _ = initiator.set(Direction::AtoB);
            scope.cancel();
            outcome
        };
        let backward = async {
            let outcome =
                copy_until_cancelled(Direction::BtoA, backward_events, &mut client_write, &scope)
                    .await;
            let _ = initiator.set(Direction::BtoA);
            scope.cancel();
            outcome
        };

        let (forward, backward) = tokio::join!(forward, backward);

        // Pumps observe the cancelled scope and retire; a pump that panicked
        // has already dropped its read half.
        let client_read = forward_pump.await.ok();
        let backend_read = backward_pump.await.ok();

        let mut backend_out = Closable::new(backend_write);
        let mut client_out = Closable::new(client_write);
        backend_out.close().await;
        client_out.close().await;
        drop(client_read);
        drop(backend_read);

        debug!(
            "Session {} relay finished: {} {}, {} {}",
            info.id, forward.direction, forward.cause, backward.direction, backward.cause
        );

        RelayResult {
            initiator: initiator.get().copied().unwrap_or(Direction::AtoB),
            forward,
            backward,
            duration: started_at.elapsed(),
        }
    }
}
