//! # RSocket
//!
//! Connection dispatch layer for RSocket.
//!
//! A [`Connection`] multiplexes many logical streams over one ordered
//! byte-stream transport. Inbound frames are decoded, validated and routed
//! to handlers registered per frame type; stream 0 carries connection-level
//! frames and every other stream id belongs to one interaction. Outbound
//! frames are written in atomic groups. The wire format lives in
//! [`proto`].

#![warn(missing_docs)]

pub use rsocket_proto as proto;

/// Error types for the connection layer
pub mod error;

/// Connection configuration
pub mod config;

/// Frame handlers
pub mod handler;

/// Connection dispatch layer
pub mod connection;

pub use config::ConnectionConfig;
pub use connection::Connection;
pub use error::{ConnectionError, HandlerError};
pub use handler::{handler_fn, FnHandler, Handler};

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, ConnectionError>;
