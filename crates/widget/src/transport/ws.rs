// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::{Duplex, Transport, TransportError, TransportEvent};

/// WebSocket transport over tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Duplex, TransportError>> {
        let url = url.to_owned();
        Box::pin(async move {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(TransportError::InvalidUrl {
                    url,
                    reason: "expected a ws:// or wss:// scheme".to_owned(),
                });
            }
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect { url: url.clone(), reason: e.to_string() })?;
            tracing::debug!(%url, "websocket open");

            let (mut sink, mut stream) = ws_stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel();

            // Writer: drains outbound frames, closes the socket once the
            // sender side is dropped.
            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            // Reader: forwards text and reports the close exactly once.
            tokio::spawn(async move {
                loop {
                    let event = match stream.next().await {
                        Some(Ok(WsMessage::Text(text))) => TransportEvent::Text(text.to_string()),
                        Some(Ok(WsMessage::Binary(data))) => {
                            TransportEvent::Text(String::from_utf8_lossy(&data).into_owned())
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            let clean = frame.as_ref().map_or(true, |f| f.code == CloseCode::Normal);
                            let _ = in_tx.send(TransportEvent::Closed { clean });
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                            let _ = in_tx.send(TransportEvent::Closed { clean: false });
                            break;
                        }
                        None => {
                            let _ = in_tx.send(TransportEvent::Closed { clean: false });
                            break;
                        }
                    };
                    if in_tx.send(event).is_err() {
                        break;
                    }
                }
            });

            Ok(Duplex { outbound: out_tx, inbound: in_rx })
        })
    }
}

/// Raw WebSocket URL for a SockJS endpoint.
///
/// Converts `http(s)://` to `ws(s)://` and appends the `/websocket` raw
/// sub-path. URLs that already use a ws scheme are passed through.
pub fn sockjs_websocket_url(endpoint: &str) -> String {
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return endpoint.to_owned();
    }
    let ws_base = if endpoint.starts_with("https://") {
        endpoint.replacen("https://", "wss://", 1)
    } else {
        endpoint.replacen("http://", "ws://", 1)
    };
    format!("{}/websocket", ws_base.trim_end_matches('/'))
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
