//! # muxcall-transport
//!
//! The muxcall connection core: a stream multiplexer and an HTTP-shaped call
//! dispatcher sharing one framed byte stream.
//!
//! This crate provides:
//! - [`Connection`]: frame plumbing, logical-stream table, inbound dispatch
//! - [`Transport`]: request/response correlation, handler invocation,
//!   keepalive
//! - [`Stream`]: a logical byte channel with the payload pipeline applied

pub mod connection;
pub mod error;
pub mod stream;
pub mod transport;

pub use connection::Connection;
pub use error::TransportError;
pub use stream::{RawStream, Stream};
pub use transport::{
    default_handler, BoxError, BoxFuture, RequestHandler, Transport, KEEPALIVE_INTERVAL,
    REQUEST_ID_HEADER,
};
