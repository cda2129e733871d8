//! TCP server implementation.

use crate::error::ServerError;
use muxcall_encoding::{Compressor, Encrypter, Pipeline};
use muxcall_transport::{default_handler, BoxFuture, RequestHandler, Stream, Transport};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

/// A caller-supplied handler owning the lifetime of an accepted stream.
pub type AcceptStreamHandler = Arc<dyn Fn(Stream) -> BoxFuture<'static, ()> + Send + Sync>;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pipeline: Pipeline,
    on_request: RequestHandler,
    on_accept: Option<AcceptStreamHandler>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            pipeline: Pipeline::new(),
            on_request: default_handler(),
            on_accept: None,
        }
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

    /// Handles inbound requests on every connection.
    pub fn on_request(mut self, handler: RequestHandler) -> Self {
        self.on_request = handler;
        self
    }

    /// Handles streams opened by clients. The handler owns the stream.
    pub fn on_accept_stream(mut self, handler: AcceptStreamHandler) -> Self {
        self.on_accept = Some(handler);
        self
    }
}

/// TCP server: one muxcall transport per accepted connection.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
}

impl Server {
    /// Binds the listen address.
    pub async fn bind(addr: impl ToSocketAddrs, config: ServerConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { config, listener })
    }

    /// The bound address; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until the listener fails fatally.
    pub async fn serve(&self) -> Result<(), ServerError> {
        tracing::info!("listening on {}", self.listener.local_addr()?);
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept: {e}");
                    continue;
                }
            };
            tracing::debug!(%peer, "connection accepted");
            let config = self.config.clone();
            tokio::spawn(handle_connection(socket, peer, config));
        }
    }
}

async fn handle_connection(socket: TcpStream, peer: SocketAddr, config: ServerConfig) {
    socket.set_nodelay(true).ok();

    let transport = Transport::new(socket, config.pipeline.clone());
    transport.set_request_handler(config.on_request.clone());

    if let Some(on_accept) = config.on_accept.clone() {
        let transport = transport.clone();
        tokio::spawn(async move {
            loop {
                match transport.accept_stream().await {
                    Ok(stream) => {
                        tokio::spawn(on_accept(stream));
                    }
                    Err(e) => {
                        tracing::debug!(%peer, "accept stream: {e}");
                        return;
                    }
                }
            }
        });
    }

    if let Err(e) = transport.clone().serve().await {
        tracing::debug!(%peer, "connection closed: {e}");
    }
    transport.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxcall_encoding::{HttpRequest, HttpResponse};
    use muxcall_transport::{BoxError, BoxFuture};
    use std::time::Duration;

    fn pong_handler() -> RequestHandler {
        Arc::new(
            |_req: HttpRequest| -> BoxFuture<'static, Result<HttpResponse, BoxError>> {
                Box::pin(async { Ok(HttpResponse::new(200).with_body(&b"pong"[..])) })
            },
        )
    }

    async fn connect(addr: std::net::SocketAddr) -> Arc<Transport> {
        let socket = TcpStream::connect(addr).await.unwrap();
        let transport = Transport::new(socket, Pipeline::new());
        tokio::spawn(transport.clone().serve());
        transport
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::bind("127.0.0.1:0", ServerConfig::new())
            .await
            .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_serves_requests() {
        let server = Server::bind(
            "127.0.0.1:0",
            ServerConfig::new().on_request(pong_handler()),
        )
        .await
        .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.serve().await });

        let transport = connect(addr).await;
        let resp = transport
            .call(HttpRequest::new("GET", "/ping"), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body.as_ref(), b"pong");
        transport.close();
    }

    #[tokio::test]
    async fn test_accepted_streams_reach_handler() {
        let echo: AcceptStreamHandler = Arc::new(|mut stream: Stream| -> BoxFuture<'static, ()> {
            Box::pin(async move {
                while let Ok(data) = stream.recv().await {
                    if stream.write(&data).await.is_err() {
                        return;
                    }
                }
            })
        });
        let server = Server::bind("127.0.0.1:0", ServerConfig::new().on_accept_stream(echo))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move { server.serve().await });

        let transport = connect(addr).await;
        let mut stream = transport.open_stream(Duration::from_secs(2)).await.unwrap();
        stream.write(b"echo me").await.unwrap();
        assert_eq!(stream.recv().await.unwrap().as_ref(), b"echo me");
        transport.close();
    }
}
