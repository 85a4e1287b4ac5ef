// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! STOMP client over a real WebSocket against an in-process axum broker.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use talkwidget::model::{Inbound, SenderType};
use talkwidget::stomp::frame::{self, Command, Frame, Item};
use talkwidget::stomp::{ClientEvent, ConnectionOptions, Disconnect, HeartbeatOptions, StompClient};
use talkwidget::test_support::eventually;
use talkwidget::transport::{sockjs_websocket_url, WsTransport};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimal broker: answers CONNECT, remembers subscriptions and reflects
/// every SEND back to subscribers of the same destination.
async fn serve_socket(mut socket: WebSocket) {
    let mut subs: HashMap<String, String> = HashMap::new();
    let mut next_id = 0u64;
    while let Some(Ok(msg)) = socket.recv().await {
        let text = match msg {
            AxumMessage::Text(text) => text.as_str().to_owned(),
            AxumMessage::Close(_) => break,
            _ => continue,
        };
        let Ok(items) = frame::decode(&text) else { continue };
        for item in items {
            let Item::Frame(f) = item else { continue };
            let destination = f.get("destination").unwrap_or_default().to_owned();
            let reply = match f.command {
                Command::Connect | Command::Stomp => {
                    Some(Frame::new(Command::Connected).header("version", "1.2").header("heart-beat", "0,0"))
                }
                Command::Subscribe => {
                    subs.insert(destination, f.get("id").unwrap_or_default().to_owned());
                    None
                }
                Command::Send => subs.get(&destination).map(|sub_id| {
                    next_id += 1;
                    Frame::new(Command::Message)
                        .header("subscription", sub_id.as_str())
                        .header("message-id", format!("m-{next_id}"))
                        .header("destination", destination.as_str())
                        .body(f.body.clone())
                }),
                Command::Disconnect => {
                    f.get("receipt").map(|r| Frame::new(Command::Receipt).header("receipt-id", r))
                }
                _ => None,
            };
            if let Some(reply) = reply {
                if socket.send(AxumMessage::Text(reply.encode().into())).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn upgrade(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(serve_socket)
}

async fn spawn_broker() -> anyhow::Result<SocketAddr> {
    let app = Router::new().route("/ws/widget/websocket", get(upgrade));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(addr)
}

fn options() -> ConnectionOptions {
    ConnectionOptions {
        heartbeat: HeartbeatOptions { outgoing: Duration::ZERO, incoming: Duration::ZERO },
        connect_timeout: Duration::from_secs(2),
        ..ConnectionOptions::default()
    }
}

#[tokio::test]
async fn publish_and_receive_over_websocket() -> anyhow::Result<()> {
    let addr = spawn_broker().await?;
    let client = StompClient::new(Arc::new(WsTransport::new()));
    client.connect(&sockjs_websocket_url(&format!("http://{addr}/ws/widget")), options());
    eventually(|| client.is_connected()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe("/topic/conversation/c1", move |payload| {
        let _ = tx.send(payload);
    })?;

    client.publish(
        "/topic/conversation/c1",
        &json!({
            "type": "message",
            "messageId": "m1",
            "conversationId": "c1",
            "content": "over the wire",
            "messageType": "TEXT",
            "senderType": "AGENT",
        }),
    )?;

    let payload = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription closed"))?;
    assert_eq!(payload.destination, "/topic/conversation/c1");
    match payload.body {
        Inbound::Message(message) => {
            assert_eq!(message.content, "over the wire");
            assert_eq!(message.sender_type, SenderType::Agent);
        }
        other => anyhow::bail!("expected a message, got {other:?}"),
    }

    client.disconnect();
    Ok(())
}

#[tokio::test]
async fn undecodable_body_becomes_system_message() -> anyhow::Result<()> {
    let addr = spawn_broker().await?;
    let client = StompClient::new(Arc::new(WsTransport::new()));
    client.connect(&format!("ws://{addr}/ws/widget/websocket"), options());
    eventually(|| client.is_connected()).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = client.subscribe("/topic/conversation/c1", move |payload| {
        let _ = tx.send(payload);
    })?;
    client.publish_raw("/topic/conversation/c1", "plain words")?;

    let payload = tokio::time::timeout(RECV_TIMEOUT, rx.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("subscription closed"))?;
    let message = payload.body.into_message().ok_or_else(|| anyhow::anyhow!("expected a message"))?;
    assert_eq!(message.sender_type, SenderType::System);
    assert_eq!(message.content, "plain words");
    assert!(message.message_id.starts_with("fallback-"));
    Ok(())
}

#[tokio::test]
async fn explicit_disconnect_is_final() -> anyhow::Result<()> {
    let addr = spawn_broker().await?;
    let client = StompClient::new(Arc::new(WsTransport::new()));
    let mut events = client.events();
    client.connect(&format!("ws://{addr}/ws/widget/websocket"), options());

    let first = tokio::time::timeout(RECV_TIMEOUT, events.recv()).await??;
    assert_eq!(first, ClientEvent::Connected);

    client.disconnect();
    let last = tokio::time::timeout(RECV_TIMEOUT, events.recv()).await??;
    assert_eq!(last, ClientEvent::Disconnected(Disconnect::Final));
    assert!(!client.is_connected());
    Ok(())
}

#[tokio::test]
async fn refused_connection_reports_transport_error() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = StompClient::new(Arc::new(WsTransport::new()));
    let mut events = client.events();
    let mut opts = options();
    opts.reconnect.enabled = false;
    client.connect(&format!("ws://{addr}/ws/widget/websocket"), opts);

    let first = tokio::time::timeout(RECV_TIMEOUT, events.recv()).await??;
    assert!(matches!(first, ClientEvent::Error(ref e) if e.is_transient()), "got {first:?}");
    let last = tokio::time::timeout(RECV_TIMEOUT, events.recv()).await??;
    assert_eq!(last, ClientEvent::Disconnected(Disconnect::Final));
    Ok(())
}
