//! Logical streams multiplexed over a connection.
//!
//! [`RawStream`] is the mux-level channel: frames in, frames out, no payload
//! pipeline. [`Stream`] is the user-facing handle that runs every write and
//! read through the connection's pipeline, framing each write as a raw
//! payload envelope.

use crate::connection::{Shared, STREAM_INBOX_CAPACITY};
use crate::error::TransportError;
use bytes::Bytes;
use muxcall_encoding::{Payload, Pipeline};
use muxcall_protocol::{FrameFlags, MAX_PAYLOAD_SIZE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch};

/// Stream state shared between the streams table and the handle.
///
/// The table owns one reference and the handle another; after removal the
/// handle still observes the dead state through the atomic flag and the
/// error slot.
pub(crate) struct StreamShared {
    id: u32,
    closed: AtomicBool,
    error: OnceLock<TransportError>,
    inbox_tx: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
}

impl StreamShared {
    /// Marks the stream dead with `err`, waking blocked readers. Returns
    /// whether this call was the one that killed it.
    pub(crate) fn mark_dead(&self, err: TransportError) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.error.set(err);
        let _ = self.shutdown.send(true);
        true
    }

    /// Enqueues an inbound payload; blocks when the inbox is full.
    pub(crate) async fn deliver(&self, payload: Bytes) -> Result<(), TransportError> {
        self.inbox_tx
            .send(payload)
            .await
            .map_err(|_| self.death_error())
    }

    fn is_dead(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn death_error(&self) -> TransportError {
        self.error
            .get()
            .cloned()
            .unwrap_or(TransportError::StreamClosed)
    }
}

/// A mux-level logical stream.
pub struct RawStream {
    state: Arc<StreamShared>,
    conn: Arc<Shared>,
    inbox_rx: mpsc::Receiver<Bytes>,
}

impl std::fmt::Debug for RawStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawStream").finish_non_exhaustive()
    }
}

impl RawStream {
    pub(crate) fn create(conn: Arc<Shared>, id: u32) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(STREAM_INBOX_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let state = Arc::new(StreamShared {
            id: id & FrameFlags::STREAM_ID_MASK,
            closed: AtomicBool::new(false),
            error: OnceLock::new(),
            inbox_tx,
            shutdown,
        });
        Self {
            state,
            conn,
            inbox_rx,
        }
    }

    pub(crate) fn state(&self) -> &Arc<StreamShared> {
        &self.state
    }

    /// The 24-bit stream identifier.
    pub fn id(&self) -> u32 {
        self.state.id
    }

    /// Receives the next inbound payload.
    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        if self.state.is_dead() {
            return Err(self.state.death_error());
        }
        let mut shutdown = self.state.shutdown.subscribe();
        tokio::select! {
            _ = shutdown.wait_for(|dead| *dead) => Err(self.state.death_error()),
            payload = self.inbox_rx.recv() => {
                payload.ok_or_else(|| self.state.death_error())
            }
        }
    }

    /// Copies the next inbound payload into `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let payload = self.recv().await?;
        if buf.len() < payload.len() {
            return Err(TransportError::BufferTooShort {
                needed: payload.len(),
                got: buf.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    /// Emits `data` as one data frame on this stream.
    pub async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if self.state.is_dead() {
            return Err(self.state.death_error());
        }
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(muxcall_protocol::ProtocolError::FrameTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        self.conn
            .send_frame(
                FrameFlags::data(self.state.id),
                Bytes::copy_from_slice(data),
            )
            .await?;
        Ok(data.len())
    }

    /// Closes the stream. Idempotent; the close frame is best-effort.
    pub async fn close(&self) {
        if !self.state.mark_dead(TransportError::StreamClosed) {
            return;
        }
        let _ = self
            .conn
            .send_frame(FrameFlags::close(self.state.id), Bytes::new())
            .await;
        self.conn.remove_stream(self.state.id);
    }
}

/// A user-facing stream: the payload pipeline applied to both directions.
pub struct Stream {
    raw: RawStream,
    pipeline: Pipeline,
}

impl Stream {
    pub(crate) fn new(raw: RawStream, pipeline: Pipeline) -> Self {
        Self { raw, pipeline }
    }

    /// The 24-bit stream identifier.
    pub fn id(&self) -> u32 {
        self.raw.id()
    }

    /// Encodes `data` as a raw payload and writes it as one data frame.
    pub async fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let encoded = self
            .pipeline
            .encode(&Payload::Raw(Bytes::copy_from_slice(data)))?;
        self.raw.write(&encoded).await?;
        Ok(data.len())
    }

    /// Receives and decodes the next payload.
    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let encoded = self.raw.recv().await?;
        match self.pipeline.decode(&encoded)? {
            Payload::Raw(data) => Ok(data),
            _ => Err(TransportError::UnexpectedPayload),
        }
    }

    /// Copies the next decoded payload into `buf`.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let payload = self.recv().await?;
        if buf.len() < payload.len() {
            return Err(TransportError::BufferTooShort {
                needed: payload.len(),
                got: buf.len(),
            });
        }
        buf[..payload.len()].copy_from_slice(&payload);
        Ok(payload.len())
    }

    /// Closes the stream. Idempotent.
    pub async fn close(&self) {
        self.raw.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use std::time::Duration;

    fn pair() -> (Connection, Connection) {
        let (a, b) = tokio::io::duplex(1 << 20);
        (Connection::new(a), Connection::new(b))
    }

    #[tokio::test]
    async fn test_read_into_buffer() {
        let (a, b) = pair();
        let peer = tokio::spawn(async move {
            let stream = b.accept_stream().await.unwrap();
            stream.write(b"four").await.unwrap();
            (stream, b)
        });
        let mut stream = a.open_stream(Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 16];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"four");
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_buffer_too_short() {
        let (a, b) = pair();
        let peer = tokio::spawn(async move {
            let stream = b.accept_stream().await.unwrap();
            stream.write(b"too big for two bytes").await.unwrap();
            (stream, b)
        });
        let mut stream = a.open_stream(Duration::from_secs(1)).await.unwrap();
        let mut buf = [0u8; 2];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::BufferTooShort { .. }));
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, b) = pair();
        let peer = tokio::spawn(async move { (b.accept_stream().await.unwrap(), b) });
        let stream = a.open_stream(Duration::from_secs(1)).await.unwrap();
        stream.close().await;
        stream.close().await;
        let err = stream.write(b"x").await.unwrap_err();
        assert_eq!(err, TransportError::StreamClosed);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_close_observed() {
        let (a, b) = pair();
        let peer = tokio::spawn(async move {
            let stream = b.accept_stream().await.unwrap();
            stream.close().await;
            b
        });
        let mut stream = a.open_stream(Duration::from_secs(1)).await.unwrap();
        let err = stream.recv().await.unwrap_err();
        assert_eq!(err, TransportError::ClosedByRemote);
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_oversize_write_keeps_stream_usable() {
        let (a, b) = pair();
        let peer = tokio::spawn(async move {
            let mut stream = b.accept_stream().await.unwrap();
            let data = stream.recv().await.unwrap();
            (data, b)
        });
        let stream = a.open_stream(Duration::from_secs(1)).await.unwrap();

        let err = stream.write(&vec![0u8; 70_000]).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(muxcall_protocol::ProtocolError::FrameTooLarge { .. })
        ));

        stream.write(b"still alive").await.unwrap();
        let (data, _b) = peer.await.unwrap();
        assert_eq!(data.as_ref(), b"still alive");
    }
}
