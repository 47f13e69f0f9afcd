//! Cancellable copy pump
//!
//! A read pump task owns the source and hands every read result to the copy
//! loop through a single-slot channel. The copy loop waits on either the next
//! chunk or the session scope, so a direction can be abandoned while its
//! source is idle.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::outcome::{CopyOutcome, Direction, TerminationCause};

/// One read result handed from the pump to the copy loop
#[derive(Debug)]
pub enum ReadEvent {
    /// Bytes read from the source, in order
    Data(Bytes),
    /// Source reached end of stream
    Eof,
    /// Read failed
    Failed(io::Error),
}

/// Spawn a task that reads `reader` until EOF, error or cancellation
///
/// The channel has capacity one, so at most one chunk is buffered ahead of the
/// copy loop. Once `scope` is cancelled no further read is started and any read
/// in flight is dropped at its await point. The task hands the reader back when
/// it retires.
pub fn spawn_read_pump<R>(
    mut reader: R,
    scope: CancellationToken,
    buffer_size: usize,
) -> (mpsc::Receiver<ReadEvent>, JoinHandle<R>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);

    let handle = tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(buffer_size);

        while !scope.is_cancelled() {
            buf.reserve(buffer_size);

            let event = tokio::select! {
                biased;
                _ = scope.cancelled() => break,
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => ReadEvent::Eof,
                    Ok(_) => ReadEvent::Data(buf.split().freeze()),
                    Err(e) => ReadEvent::Failed(e),
                },
            };
            let terminal = !matches!(event, ReadEvent::Data(_));

            let delivered = tokio::select! {
                biased;
                _ = scope.cancelled() => false,
                sent = tx.send(event) => sent.is_ok(),
            };
            if !delivered || terminal {
                break;
            }
        }

        reader
    });

    (rx, handle)
}

/// Write every chunk from `events` to `writer` until the source ends, an
/// error occurs or `scope` is cancelled
pub async fn copy_until_cancelled<W>(
    direction: Direction,
    mut events: mpsc::Receiver<ReadEvent>,
    writer: &mut W,
    scope: &CancellationToken,
) -> CopyOutcome
where
    W: AsyncWrite + Unpin,
{
    let mut bytes_transferred = 0u64;

    let cause = loop {
        let event = tokio::select! {
            biased;
            _ = scope.cancelled() => break TerminationCause::Cancelled,
            event = events.recv() => event,
        };

        match event {
            Some(ReadEvent::Data(chunk)) => {
                let written = tokio::select! {
                    biased;
                    _ = scope.cancelled() => break TerminationCause::Cancelled,
                    written = write_chunk(writer, &chunk) => written,
                };
                match written {
                    Ok(()) => bytes_transferred += chunk.len() as u64,
                    Err(e) => break TerminationCause::TransportError(e),
                }
            }
            Some(ReadEvent::Eof) => break TerminationCause::CleanEof,
            Some(ReadEvent::Failed(e)) => break TerminationCause::TransportError(e),
            // The pump only hangs up without a terminal event when it died
            None if scope.is_cancelled() => break TerminationCause::Cancelled,
            None => {
                break TerminationCause::TransportError(io::Error::other("read pump stopped"))
            }
        }
    };

    CopyOutcome {
        direction,
        bytes_transferred,
        cause,
    }
}

async fn write_chunk<W>(writer: &mut W, chunk: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(chunk).await?;
    writer.flush().await
}
