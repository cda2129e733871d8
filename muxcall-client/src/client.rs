//! Client connection management.

use crate::error::ClientError;
use muxcall_encoding::{Compressor, Encrypter, HttpRequest, HttpResponse, Pipeline};
use muxcall_transport::{RequestHandler, Stream, Transport};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Delay between reconnection attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    /// Server address (`host:port`).
    pub addr: String,
    /// Dial timeout for the initial connection and every reconnect.
    pub connect_timeout: Duration,
    pipeline: Pipeline,
    request_handler: Option<RequestHandler>,
}

impl ClientConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(10),
            pipeline: Pipeline::new(),
            request_handler: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Compresses every payload in both directions.
    pub fn with_compressor(mut self, compressor: Compressor) -> Self {
        self.pipeline = self.pipeline.with_compressor(compressor);
        self
    }

    /// Encrypts every payload in both directions.
    pub fn with_encrypter(mut self, encrypter: Encrypter) -> Self {
        self.pipeline = self.pipeline.with_encrypter(encrypter);
        self
    }

    /// Handles requests the server sends over this connection. Without one,
    /// inbound requests receive an empty success response.
    pub fn with_request_handler(mut self, handler: RequestHandler) -> Self {
        self.request_handler = Some(handler);
        self
    }
}

struct ClientInner {
    config: ClientConfig,
    /// `None` while reconnecting.
    transport: RwLock<Option<Arc<Transport>>>,
    shutdown: watch::Sender<bool>,
}

/// An rpc client over one muxcall connection.
///
/// The serve loop runs in the background. When the connection dies the
/// client closes it and redials with a fixed backoff until it succeeds or
/// the client is closed; the fresh transport carries the same pipeline.
/// Calls during the gap return [`ClientError::Reconnecting`].
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Dials the server and starts the background serve loop.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let stream = dial(&config.addr, config.connect_timeout).await?;
        let transport = new_transport(stream, &config);
        let (shutdown, _) = watch::channel(false);

        let inner = Arc::new(ClientInner {
            config,
            transport: RwLock::new(Some(transport)),
            shutdown,
        });
        tokio::spawn(run(inner.clone()));

        Ok(Self { inner })
    }

    /// Sends a request and waits for the correlated response.
    pub async fn call(
        &self,
        req: HttpRequest,
        timeout: Duration,
    ) -> Result<HttpResponse, ClientError> {
        let transport = self.current_transport()?;
        Ok(transport.call(req, timeout).await?)
    }

    /// Opens a logical stream.
    pub async fn open_stream(&self, timeout: Duration) -> Result<Stream, ClientError> {
        let transport = self.current_transport()?;
        Ok(transport.open_stream(timeout).await?)
    }

    /// Whether a live transport is currently installed.
    pub fn is_connected(&self) -> bool {
        !*self.inner.shutdown.borrow() && self.inner.transport.read().unwrap().is_some()
    }

    /// Closes the client: the live transport is torn down and the reconnect
    /// loop stops. Subsequent operations return [`ClientError::Closed`].
    pub fn close(&self) {
        let _ = self.inner.shutdown.send(true);
        if let Some(transport) = self.inner.transport.read().unwrap().as_ref() {
            transport.close();
        }
    }

    fn current_transport(&self) -> Result<Arc<Transport>, ClientError> {
        if *self.inner.shutdown.borrow() {
            return Err(ClientError::Closed);
        }
        self.inner
            .transport
            .read()
            .unwrap()
            .clone()
            .ok_or(ClientError::Reconnecting)
    }
}

fn new_transport(stream: TcpStream, config: &ClientConfig) -> Arc<Transport> {
    stream.set_nodelay(true).ok();
    let transport = Transport::new(stream, config.pipeline.clone());
    if let Some(handler) = &config.request_handler {
        transport.set_request_handler(handler.clone());
    }
    transport
}

async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream, ClientError> {
    let connect = TcpStream::connect(addr);
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ClientError::Dial {
            addr: addr.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Err(ClientError::Dial {
            addr: addr.to_string(),
            message: "connect timeout".to_string(),
        }),
    }
}

/// Background loop: serve the live transport, reconnect when it dies.
async fn run(inner: Arc<ClientInner>) {
    let mut shutdown = inner.shutdown.subscribe();
    loop {
        let transport = match inner.transport.read().unwrap().clone() {
            Some(transport) => transport,
            None => return,
        };

        let served = tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => {
                transport.close();
                return;
            }
            result = transport.clone().serve() => result,
        };
        if let Err(e) = served {
            tracing::error!("serve {}: {e}", inner.config.addr);
        }

        transport.close();
        *inner.transport.write().unwrap() = None;

        let fresh = loop {
            if *shutdown.borrow() {
                return;
            }
            match dial(&inner.config.addr, inner.config.connect_timeout).await {
                Ok(stream) => break new_transport(stream, &inner.config),
                Err(e) => tracing::debug!("redial: {e}"),
            }
            tokio::select! {
                _ = shutdown.wait_for(|closed| *closed) => return,
                _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
            }
        };

        tracing::info!("reconnected to {}", inner.config.addr);
        *inner.transport.write().unwrap() = Some(fresh);
    }
}
