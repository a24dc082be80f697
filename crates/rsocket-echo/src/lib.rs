//! # RSocket Echo
//!
//! A small RSocket responder over TCP that echoes requests back to the
//! requester. Useful as a peer when testing clients.

#![warn(missing_docs)]

/// Frame handlers
pub mod handlers;

/// Server configuration and accept loop
pub mod server;

pub use server::{EchoConfig, EchoServer};
