//! Physical transport behind an RTSP session.
//!
//! The core never opens sockets itself. A transport implementation is handed
//! to [`RtspContext`](super::RtspContext) and performs one request/response
//! exchange at a time.

use std::net::IpAddr;

use thiserror::Error;

use super::message::{RtspRequest, RtspResponse};

/// Errors raised by a transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection to {host}:{port} failed: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("transport I/O error: {0}")]
    Io(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error("malformed RTSP response: {0}")]
    Malformed(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Request/response channel to a streaming receiver.
pub trait RtspTransport: Send {
    /// Opens the connection.
    fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Local address of the open connection, as seen by the receiver.
    fn local_ip(&self) -> Result<IpAddr, TransportError>;

    /// Sends one request and reads its response.
    fn exchange(&mut self, request: &RtspRequest) -> Result<RtspResponse, TransportError>;

    /// Closes the connection. Closing a closed transport does nothing.
    fn close(&mut self);
}
