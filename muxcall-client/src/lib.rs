//! # muxcall-client
//!
//! Reconnecting client for the muxcall transport.
//!
//! This crate provides:
//! - Dial-and-serve connection management
//! - Automatic reconnection with a fixed 1-second backoff
//! - The same call/stream surface as the underlying transport

pub mod client;
pub mod error;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
