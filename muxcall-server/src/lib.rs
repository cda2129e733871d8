//! # muxcall-server
//!
//! TCP server for the muxcall transport.
//!
//! This crate provides:
//! - A TCP accept loop spawning one transport per connection
//! - Caller-supplied request and accept-stream handlers
//! - Optional compression and encryption shared by every connection

pub mod error;
pub mod server;

pub use error::ServerError;
pub use server::{AcceptStreamHandler, Server, ServerConfig};
