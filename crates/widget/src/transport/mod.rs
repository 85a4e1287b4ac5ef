// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplex text transports beneath the STOMP client.

pub mod ws;

pub use ws::{sockjs_websocket_url, WsTransport};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

/// Event delivered by an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// Socket error. A `Closed` event always follows.
    Error(String),
    /// The socket is gone. `clean` is true for a normal close handshake.
    Closed { clean: bool },
}

/// An open connection: outbound text frames in, transport events out.
///
/// Dropping `outbound` closes the socket.
pub struct Duplex {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect to {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// Opens duplex connections. Implemented by the WebSocket transport and by
/// the in-memory transport used in tests.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Duplex, TransportError>>;
}
