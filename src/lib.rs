//! # muxcall
//!
//! A connection-oriented RPC transport: one TCP connection carries
//! HTTP-shaped request/response calls and multiplexed byte streams, with
//! optional symmetric encryption and compression applied to every payload.
//!
//! ```no_run
//! use muxcall::{Client, ClientConfig, HttpRequest};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::connect(ClientConfig::new("127.0.0.1:4680")).await?;
//! let resp = client
//!     .call(HttpRequest::new("GET", "/ping"), Duration::from_secs(5))
//!     .await?;
//! println!("{} {}", resp.status, String::from_utf8_lossy(&resp.body));
//! # Ok(())
//! # }
//! ```

pub use muxcall_client::{Client, ClientConfig, ClientError};
pub use muxcall_encoding::{
    CipherMethod, CompressMethod, Compressor, Encrypter, EncodingError, Headers, HttpRequest,
    HttpResponse, Payload, Pipeline,
};
pub use muxcall_protocol::{Frame, FrameFlags, ProtocolError, MAX_PAYLOAD_SIZE};
pub use muxcall_server::{AcceptStreamHandler, Server, ServerConfig, ServerError};
pub use muxcall_transport::{
    default_handler, BoxError, BoxFuture, RequestHandler, Stream, Transport, TransportError,
    KEEPALIVE_INTERVAL, REQUEST_ID_HEADER,
};
