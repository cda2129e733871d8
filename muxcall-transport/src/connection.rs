//! Connection core: frame plumbing and the stream multiplexer.
//!
//! Each connection owns two long-lived tasks:
//!
//! - a **reader** with exclusive ownership of the read half, decoding frames
//!   and dispatching them by flag bits;
//! - a **writer** with exclusive ownership of the write half, draining a
//!   queue of pre-encoded frames. Every producer (calls, stream writes,
//!   keepalive, control replies) funnels through this queue, so frames never
//!   interleave on the socket.
//!
//! A fatal error is stored once and the shutdown signal fired; every waiter
//! (pending calls, stream readers, accepts) unblocks with that same error.

use crate::error::TransportError;
use crate::stream::{RawStream, StreamShared};
use bytes::{Bytes, BytesMut};
use muxcall_protocol::{Frame, FrameDecoder, FrameFlags};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};

/// Socket read chunk size.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Outbound frame queue capacity.
const WRITE_QUEUE_CAPACITY: usize = 1024;

/// Bare-payload queue capacity (frames awaiting the call dispatcher).
const PAYLOAD_QUEUE_CAPACITY: usize = 10_000;

/// Per-stream inbox capacity. A full inbox blocks the connection reader.
pub(crate) const STREAM_INBOX_CAPACITY: usize = 1000;

/// State shared between the connection handle, its tasks, and stream handles.
pub(crate) struct Shared {
    writer_tx: mpsc::Sender<BytesMut>,
    sequence: AtomicU64,
    /// Acceptor-side stream-ID allocator.
    next_stream_id: AtomicU32,
    streams: RwLock<HashMap<u32, Arc<StreamShared>>>,
    opened_tx: mpsc::Sender<RawStream>,
    payload_tx: mpsc::Sender<Bytes>,
    fatal: OnceLock<TransportError>,
    shutdown: watch::Sender<bool>,
}

impl Shared {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Encodes and enqueues one frame for the writer task.
    pub(crate) async fn send_frame(
        &self,
        flags: FrameFlags,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        let frame = Frame::new(self.next_sequence(), flags, payload);
        let encoded = frame.encode()?;
        self.writer_tx
            .send(encoded)
            .await
            .map_err(|_| self.fatal_error())
    }

    /// The stored fatal error, or `Closed` if the connection died without one.
    pub(crate) fn fatal_error(&self) -> TransportError {
        self.fatal
            .get()
            .cloned()
            .unwrap_or(TransportError::Closed)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once the connection is dead.
    pub(crate) async fn closed(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|dead| *dead).await;
    }

    pub(crate) fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Stores the fatal error (first writer wins), fires the shutdown signal,
    /// and kills every live stream with the same error.
    pub(crate) fn set_fatal(&self, err: TransportError) {
        let first = self.fatal.set(err).is_ok();
        let _ = self.shutdown.send(true);
        if first {
            let streams: Vec<Arc<StreamShared>> = {
                let mut table = self.streams.write().unwrap();
                table.drain().map(|(_, s)| s).collect()
            };
            let err = self.fatal_error();
            for stream in streams {
                stream.mark_dead(err.clone());
            }
        }
    }

    pub(crate) fn remove_stream(&self, id: u32) {
        self.streams.write().unwrap().remove(&id);
    }
}

/// A framed, multiplexed connection over one byte stream.
pub struct Connection {
    shared: Arc<Shared>,
    opened_rx: Mutex<mpsc::Receiver<RawStream>>,
    payload_rx: Mutex<mpsc::Receiver<Bytes>>,
}

impl Connection {
    /// Wraps a byte stream and spawns the reader and writer tasks.
    pub fn new<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        // The opened-stream queue is a near-synchronous handoff.
        let (opened_tx, opened_rx) = mpsc::channel(1);
        let (payload_tx, payload_rx) = mpsc::channel(PAYLOAD_QUEUE_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            writer_tx,
            sequence: AtomicU64::new(0),
            next_stream_id: AtomicU32::new(0),
            streams: RwLock::new(HashMap::new()),
            opened_tx,
            payload_tx,
            fatal: OnceLock::new(),
            shutdown,
        });

        tokio::spawn(write_loop(shared.clone(), writer_rx, write_half));
        tokio::spawn(read_loop(shared.clone(), read_half));

        Self {
            shared,
            opened_rx: Mutex::new(opened_rx),
            payload_rx: Mutex::new(payload_rx),
        }
    }

    /// Opens a logical stream: emits an open request and waits for the
    /// acknowledgment carrying the assigned ID.
    ///
    /// Open requests are not correlated on the wire, so concurrent callers
    /// are serialized here; the first acknowledgment answers the caller at
    /// the head of the queue.
    pub async fn open_stream(&self, timeout: Duration) -> Result<RawStream, TransportError> {
        let mut opened = self.opened_rx.lock().await;
        self.shared
            .send_frame(FrameFlags::open(), Bytes::new())
            .await?;
        let mut shutdown = self.shared.shutdown_rx();
        tokio::select! {
            _ = tokio::time::sleep(timeout) => Err(TransportError::OpenTimeout),
            _ = shutdown.wait_for(|dead| *dead) => Err(self.shared.fatal_error()),
            stream = opened.recv() => stream.ok_or_else(|| self.shared.fatal_error()),
        }
    }

    /// Waits for a stream opened by the peer.
    pub async fn accept_stream(&self) -> Result<RawStream, TransportError> {
        let mut opened = self.opened_rx.lock().await;
        let mut shutdown = self.shared.shutdown_rx();
        tokio::select! {
            _ = shutdown.wait_for(|dead| *dead) => Err(self.shared.fatal_error()),
            stream = opened.recv() => stream.ok_or_else(|| self.shared.fatal_error()),
        }
    }

    /// Emits a bare-payload frame (call-dispatcher traffic).
    pub async fn write_payload(&self, data: Vec<u8>) -> Result<(), TransportError> {
        self.shared
            .send_frame(FrameFlags::bare(), Bytes::from(data))
            .await
    }

    /// Pulls the next inbound bare payload.
    pub async fn next_payload(&self) -> Result<Bytes, TransportError> {
        let mut payloads = self.payload_rx.lock().await;
        let mut shutdown = self.shared.shutdown_rx();
        tokio::select! {
            _ = shutdown.wait_for(|dead| *dead) => Err(self.shared.fatal_error()),
            payload = payloads.recv() => payload.ok_or_else(|| self.shared.fatal_error()),
        }
    }

    /// Emits a liveness probe.
    pub async fn send_ping(&self) -> Result<(), TransportError> {
        self.shared
            .send_frame(FrameFlags::ping(), Bytes::new())
            .await
    }

    /// Closes the connection, unblocking every waiter with `Closed` (or the
    /// earlier fatal error if one is already stored).
    pub fn close(&self) {
        self.shared.set_fatal(TransportError::Closed);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the connection is dead.
    pub async fn closed(&self) {
        self.shared.closed().await
    }

    /// The stored fatal error, or `Closed`.
    pub fn fatal_error(&self) -> TransportError {
        self.shared.fatal_error()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.set_fatal(TransportError::Closed);
    }
}

/// Writer task: drains pre-encoded frames onto the write half.
async fn write_loop<S>(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<BytesMut>,
    mut writer: WriteHalf<S>,
) where
    S: AsyncRead + AsyncWrite,
{
    let mut shutdown = shared.shutdown_rx();
    loop {
        let frame = tokio::select! {
            _ = shutdown.wait_for(|dead| *dead) => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = writer.write_all(&frame).await {
            tracing::error!("write frame: {e}");
            shared.set_fatal(e.into());
            break;
        }
        if let Err(e) = writer.flush().await {
            tracing::error!("flush: {e}");
            shared.set_fatal(e.into());
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Reader task: decodes frames and dispatches them.
async fn read_loop<S>(shared: Arc<Shared>, mut reader: ReadHalf<S>)
where
    S: AsyncRead + AsyncWrite,
{
    if let Err(e) = read_frames(&shared, &mut reader).await {
        tracing::debug!("reader: {e}");
        shared.set_fatal(e);
    }
}

async fn read_frames<S>(
    shared: &Arc<Shared>,
    reader: &mut ReadHalf<S>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if decoder.buffered() > 0 {
                return Err(muxcall_protocol::ProtocolError::TruncatedFrame {
                    buffered: decoder.buffered(),
                }
                .into());
            }
            return Err(TransportError::Closed);
        }
        decoder.extend(&buf[..n]);
        while let Some(frame) = decoder.decode_frame()? {
            dispatch(shared, frame).await?;
        }
    }
}

/// Routes one inbound frame by its flag bits.
async fn dispatch(shared: &Arc<Shared>, frame: Frame) -> Result<(), TransportError> {
    let flags = frame.flags;

    if flags.is_ping() {
        tracing::trace!(sequence = frame.sequence, "ping");
        return shared.send_frame(FrameFlags::pong(), Bytes::new()).await;
    }
    if flags.is_pong() {
        tracing::trace!(sequence = frame.sequence, "pong");
        return Ok(());
    }
    if flags.is_open() {
        return handle_open(shared).await;
    }
    if flags.is_open_ack() {
        return handle_open_ack(shared, flags.stream_id()).await;
    }
    if flags.is_close() {
        handle_close(shared, flags.stream_id());
        return Ok(());
    }
    if flags.is_data() {
        return handle_data(shared, flags.stream_id(), frame.payload).await;
    }
    if !frame.payload.is_empty() {
        return shared
            .payload_tx
            .send(frame.payload)
            .await
            .map_err(|_| shared.fatal_error());
    }
    // Bare empty frame: idle, drop.
    Ok(())
}

/// Acceptor side of a stream open: allocate an ID, acknowledge, notify.
async fn handle_open(shared: &Arc<Shared>) -> Result<(), TransportError> {
    let id = (shared.next_stream_id.fetch_add(1, Ordering::Relaxed) + 1)
        & FrameFlags::STREAM_ID_MASK;
    let stream = RawStream::create(shared.clone(), id);
    shared
        .send_frame(FrameFlags::open_ack(id), Bytes::new())
        .await?;
    shared
        .streams
        .write()
        .unwrap()
        .insert(id, stream.state().clone());
    tracing::debug!(id, "stream opened by peer");
    shared
        .opened_tx
        .send(stream)
        .await
        .map_err(|_| shared.fatal_error())
}

/// Initiator side: the acknowledgment carries our new stream's identity.
async fn handle_open_ack(shared: &Arc<Shared>, id: u32) -> Result<(), TransportError> {
    let stream = RawStream::create(shared.clone(), id);
    shared
        .streams
        .write()
        .unwrap()
        .insert(id, stream.state().clone());
    tracing::debug!(id, "stream open acknowledged");
    shared
        .opened_tx
        .send(stream)
        .await
        .map_err(|_| shared.fatal_error())
}

fn handle_close(shared: &Arc<Shared>, id: u32) {
    let stream = shared.streams.write().unwrap().remove(&id);
    match stream {
        Some(stream) => {
            tracing::debug!(id, "stream closed by remote");
            stream.mark_dead(TransportError::ClosedByRemote);
        }
        None => tracing::trace!(id, "close for unknown stream"),
    }
}

async fn handle_data(
    shared: &Arc<Shared>,
    id: u32,
    payload: Bytes,
) -> Result<(), TransportError> {
    let stream = shared.streams.read().unwrap().get(&id).cloned();
    match stream {
        Some(stream) => {
            // A full inbox blocks the reader here until the stream's consumer
            // catches up. Send fails only if the handle is gone; drop then.
            let _ = stream.deliver(payload).await;
        }
        None => tracing::trace!(id, "data for unknown stream"),
    }
    Ok(())
}
