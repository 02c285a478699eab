//! # embhttp
//!
//! A small HTTP/1.1 server core for `no_std` targets with an allocator.
//!
//! Requests are parsed straight off anything implementing
//! `embedded_io_async::{Read, Write}`, matched against a [`router::Router`] of
//! regex path patterns and answered by a [`response::Response`] whose body may
//! be text or a chunked [`response::BodySource`], so that large files or
//! generated pages never need to sit in memory in one piece.
//!
//! Every connection carries exactly one request and is closed after the
//! response, unless a handler keeps it open for server-sent events or a
//! websocket upgrade.
//!
//! The [`server::Listener`] runs either as a cooperative accept loop (any
//! executor, several connections interleaved at their await points) or as a
//! blocking loop over `embedded_io` streams for targets without one.

#![no_std]

extern crate alloc;

#[macro_use]
mod fmt;

mod ascii;
/// File extension to MIME type mapping
pub mod content_type;
/// Case-insensitive header container
pub mod header;
/// Handler wrappers: JSON bodies, server-sent events, websockets
pub mod middleware;
/// Query strings and their validation
pub mod query;
/// Request parsing
pub mod request;
/// Responses and the response writer
pub mod response;
/// Route registry and dispatch
pub mod router;
/// Connection handling and accept loops
pub mod server;
/// Websocket upgrade handshake
pub mod websocket;

#[cfg(test)]
mod testing;

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt::{Display, Formatter};
use core::future::Future;
use core::pin::Pin;
use embedded_io_async::{Read, Write};

pub use conf::{ConfigError, ServerConfig, ServerConfigUpdate};

/// A boxed, non-`Send` future. Everything runs on one executor thread.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

pub(crate) trait HttpWrite {
    async fn write<T: Write>(self, writer: &mut T) -> Result<(), HTTPError>;
}

/// Releases the underlying transport. Must tolerate being called more than once.
pub trait Close {
    fn close(&mut self);
}

/// A bidirectional stream the server can own for one request/response cycle.
pub trait Connection: Read + Write + Close {}

impl<T: Read + Write + Close> Connection for T {}

#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HTTPError {
    /// The peer closed the connection without sending anything.
    ZeroRead,
    /// A CRLF delimiter was required but not found in the bytes available.
    ShortRead,
    Disconnected,
    ProtocolError(&'static str),
    NetworkError(&'static str),
    /// A websocket upgrade was requested without a `Sec-WebSocket-Key`.
    NotUpgradeable,
    InvalidRoute(String),
    Serialization(&'static str),
}

impl Display for HTTPError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ZeroRead => f.write_str("connection closed before any data was received"),
            Self::ShortRead => f.write_str("request ended before a line delimiter was found"),
            Self::Disconnected => f.write_str("connection reset by peer"),
            Self::ProtocolError(e) => write!(f, "protocol error: {}", e),
            Self::NetworkError(e) => write!(f, "network error: {}", e),
            Self::NotUpgradeable => f.write_str("not a websocket request"),
            Self::InvalidRoute(e) => write!(f, "invalid route pattern: {}", e),
            Self::Serialization(e) => write!(f, "serialization error: {}", e),
        }
    }
}
