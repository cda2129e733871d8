//! The call dispatcher: request/response semantics over bare-payload frames.
//!
//! Outgoing requests are stamped with a correlation header and paired with a
//! single-slot reply channel in the pending table; the serve loop decodes
//! inbound bare payloads and either spawns a handler task (requests) or
//! delivers to the matching reply slot (responses).

use crate::connection::Connection;
use crate::error::TransportError;
use crate::stream::Stream;
use muxcall_encoding::{HttpRequest, HttpResponse, Payload, Pipeline};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

/// Correlation header carried by every request/response payload.
pub const REQUEST_ID_HEADER: &str = "X-Crpc-Request-Id";

/// Interval between liveness probes.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error type returned by request handlers; converted to an HTTP 500.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A caller-supplied request handler.
pub type RequestHandler =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, BoxError>> + Send + Sync>;

/// The default request handler: an empty success response.
///
/// Installed by [`Transport::new`] until a caller replaces it.
pub fn default_handler() -> RequestHandler {
    Arc::new(|_req| Box::pin(async { Ok(HttpResponse::new(200)) }))
}

/// A connection with call-dispatch, stream, and keepalive semantics.
pub struct Transport {
    conn: Connection,
    pipeline: Pipeline,
    next_request_id: AtomicU64,
    pending: RwLock<HashMap<u64, oneshot::Sender<HttpResponse>>>,
    on_request: RwLock<RequestHandler>,
}

impl Transport {
    /// Wraps a byte stream and starts the keepalive timer.
    ///
    /// The returned transport does nothing until [`serve`](Self::serve) runs;
    /// calls made before then will not see their responses.
    pub fn new<S>(io: S, pipeline: Pipeline) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let transport = Arc::new(Self {
            conn: Connection::new(io),
            pipeline,
            next_request_id: AtomicU64::new(0),
            pending: RwLock::new(HashMap::new()),
            on_request: RwLock::new(default_handler()),
        });

        let weak = Arc::downgrade(&transport);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(transport) = weak.upgrade() else {
                    return;
                };
                if transport.conn.is_closed() {
                    return;
                }
                if let Err(e) = transport.conn.send_ping().await {
                    tracing::warn!("keepalive: {e}");
                }
            }
        });

        transport
    }

    /// Replaces the request handler.
    pub fn set_request_handler(&self, handler: RequestHandler) {
        *self.on_request.write().unwrap() = handler;
    }

    /// Sends a request and waits for the correlated response.
    pub async fn call(
        &self,
        mut req: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1;
        req.headers.set(REQUEST_ID_HEADER, id.to_string());
        tracing::debug!(id, method = %req.method, uri = %req.uri, "outgoing call");

        let data = self.pipeline.encode(&Payload::Request(req))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.write().unwrap().insert(id, reply_tx);

        let result = self.send_and_wait(data, reply_rx, timeout).await;
        // The single cleanup path: whatever way we exited, the entry goes.
        self.pending.write().unwrap().remove(&id);
        result
    }

    async fn send_and_wait(
        &self,
        data: Vec<u8>,
        reply_rx: oneshot::Receiver<HttpResponse>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.conn.write_payload(data).await?;
        tokio::select! {
            resp = reply_rx => resp.map_err(|_| self.conn.fatal_error()),
            _ = tokio::time::sleep(timeout) => Err(TransportError::Timeout),
            _ = self.conn.closed() => Err(self.conn.fatal_error()),
        }
    }

    /// Pulls bare payloads and dispatches them until the connection dies.
    ///
    /// Both sides of a connection run this loop; it exits with the
    /// connection's fatal error, which it also stores so every other waiter
    /// observes the same failure.
    pub async fn serve(self: Arc<Self>) -> Result<(), TransportError> {
        let result = serve_loop(&self).await;
        if let Err(e) = &result {
            self.conn.shared().set_fatal(e.clone());
        }
        result
    }

    fn deliver_response(&self, resp: HttpResponse) {
        let id = correlation_id(resp.header(REQUEST_ID_HEADER));
        tracing::debug!(id, status = resp.status, "incoming response");
        let slot = self.pending.write().unwrap().remove(&id);
        match slot {
            // A reply slot that closed concurrently (timeout raced the
            // delivery) is not an error; the response is simply dropped.
            Some(reply_tx) => {
                let _ = reply_tx.send(resp);
            }
            None => tracing::debug!(id, "no pending call for response"),
        }
    }

    async fn handle_request(self: Arc<Self>, req: HttpRequest) {
        let id = correlation_id(req.header(REQUEST_ID_HEADER));
        let version = req.version;
        tracing::debug!(id, method = %req.method, uri = %req.uri, "incoming call");

        let handler = self.on_request.read().unwrap().clone();
        let mut resp = match handler(req).await {
            Ok(resp) => resp,
            Err(e) => HttpResponse::new(500).with_body(e.to_string()),
        };

        resp.version = version;
        resp.headers.set(REQUEST_ID_HEADER, id.to_string());
        resp.headers
            .set("Content-Length", resp.body.len().to_string());

        let data = match self.pipeline.encode(&Payload::Response(resp)) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(id, "encode response: {e}");
                return;
            }
        };
        if let Err(e) = self.conn.write_payload(data).await {
            tracing::error!(id, "write response: {e}");
        }
    }

    /// Opens a logical stream with the pipeline applied.
    pub async fn open_stream(&self, timeout: Duration) -> Result<Stream, TransportError> {
        let raw = self.conn.open_stream(timeout).await?;
        Ok(Stream::new(raw, self.pipeline.clone()))
    }

    /// Accepts a peer-opened stream with the pipeline applied.
    pub async fn accept_stream(&self) -> Result<Stream, TransportError> {
        let raw = self.conn.accept_stream().await?;
        Ok(Stream::new(raw, self.pipeline.clone()))
    }

    /// Closes the connection, unblocking every waiter.
    pub fn close(&self) {
        self.conn.close();
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// The pipeline this transport encodes with.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

async fn serve_loop(transport: &Arc<Transport>) -> Result<(), TransportError> {
    loop {
        let data = transport.conn.next_payload().await?;
        match transport.pipeline.decode(&data)? {
            Payload::Request(req) => {
                let transport = transport.clone();
                tokio::spawn(async move { transport.handle_request(req).await });
            }
            Payload::Response(resp) => transport.deliver_response(resp),
            Payload::Raw(_) => return Err(TransportError::UnexpectedPayload),
        }
    }
}

fn correlation_id(value: Option<&str>) -> u64 {
    value.and_then(|v| v.parse().ok()).unwrap_or(0)
}
