// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: an in-memory transport and a fake STOMP
//! broker that speaks enough of the protocol to drive every layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::stomp::frame::{self, Command, Frame, Item};
use crate::stomp::{ConnectionOptions, HeartbeatOptions, ReconnectOptions, StompClient};
use crate::transport::{Duplex, Transport, TransportError, TransportEvent};

/// URL accepted by [`MemoryTransport`]. The value is only used for the
/// CONNECT `host` header.
pub const MEMORY_URL: &str = "memory://broker/ws";

/// How long async helpers wait before giving up.
const WAIT: Duration = Duration::from_secs(5);

/// A SEND frame received by the broker.
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub destination: String,
    pub body: String,
}

impl SentFrame {
    pub fn json(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

struct Conn {
    tx: mpsc::UnboundedSender<TransportEvent>,
    /// subscription id → destination
    subs: HashMap<String, String>,
}

#[derive(Default)]
struct BrokerState {
    refuse: bool,
    reject_connect: Option<String>,
    heartbeat: (u64, u64),
    next_conn: u64,
    next_msg: u64,
    opens: usize,
    connects: usize,
    connections: HashMap<u64, Conn>,
    subscribe_frames: Vec<String>,
    commands: Vec<Command>,
}

struct BrokerInner {
    state: Mutex<BrokerState>,
    sends_tx: mpsc::UnboundedSender<SentFrame>,
    sends_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<SentFrame>>,
}

/// In-process STOMP broker. Clones share state.
#[derive(Clone)]
pub struct FakeBroker {
    inner: Arc<BrokerInner>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBroker {
    pub fn new() -> Self {
        let (sends_tx, sends_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(BrokerInner {
                state: Mutex::new(BrokerState::default()),
                sends_tx,
                sends_rx: tokio::sync::Mutex::new(sends_rx),
            }),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport { broker: self.clone() })
    }

    /// Fail transport opens while set.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.state.lock().refuse = refuse;
    }

    /// Answer CONNECT with an ERROR frame carrying `reason`.
    pub fn reject_connect(&self, reason: Option<&str>) {
        self.inner.state.lock().reject_connect = reason.map(str::to_owned);
    }

    /// Heart-beat header advertised in CONNECTED. Defaults to `0,0`.
    pub fn set_heartbeat(&self, send_ms: u64, expect_ms: u64) {
        self.inner.state.lock().heartbeat = (send_ms, expect_ms);
    }

    /// Transport opens attempted, including refused ones.
    pub fn opens(&self) -> usize {
        self.inner.state.lock().opens
    }

    /// CONNECT frames accepted.
    pub fn connects(&self) -> usize {
        self.inner.state.lock().connects
    }

    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Live subscriptions to `destination` across all connections.
    pub fn active_subscriptions(&self, destination: &str) -> usize {
        let state = self.inner.state.lock();
        state.connections.values().flat_map(|c| c.subs.values()).filter(|d| *d == destination).count()
    }

    /// SUBSCRIBE frames ever received for `destination`.
    pub fn subscribe_total(&self, destination: &str) -> usize {
        self.inner.state.lock().subscribe_frames.iter().filter(|d| *d == destination).count()
    }

    /// Frames of `command` received so far.
    pub fn received(&self, command: Command) -> usize {
        self.inner.state.lock().commands.iter().filter(|c| **c == command).count()
    }

    /// Next SEND frame, in arrival order.
    pub async fn next_send(&self) -> anyhow::Result<SentFrame> {
        let mut rx = self.inner.sends_rx.lock().await;
        match tokio::time::timeout(WAIT, rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => anyhow::bail!("broker send channel closed"),
            Err(_) => anyhow::bail!("no SEND frame within {WAIT:?}"),
        }
    }

    /// Deliver `body` to every subscriber of `destination`. Returns the
    /// number of deliveries.
    pub fn publish(&self, destination: &str, body: &str) -> usize {
        let mut state = self.inner.state.lock();
        let mut delivered = 0;
        let mut next_msg = state.next_msg;
        for conn in state.connections.values() {
            for (sub_id, dest) in &conn.subs {
                if dest != destination {
                    continue;
                }
                next_msg += 1;
                let frame = Frame::new(Command::Message)
                    .header("subscription", sub_id.as_str())
                    .header("message-id", format!("m-{next_msg}"))
                    .header("destination", destination)
                    .header("content-type", "application/json")
                    .body(body);
                if conn.tx.send(TransportEvent::Text(frame.encode())).is_ok() {
                    delivered += 1;
                }
            }
        }
        state.next_msg = next_msg;
        delivered
    }

    pub fn publish_json<T: Serialize + ?Sized>(&self, destination: &str, body: &T) -> anyhow::Result<usize> {
        Ok(self.publish(destination, &serde_json::to_string(body)?))
    }

    /// Send a raw text message to every connection.
    pub fn send_raw(&self, text: &str) {
        for conn in self.inner.state.lock().connections.values() {
            let _ = conn.tx.send(TransportEvent::Text(text.to_owned()));
        }
    }

    /// Send an ERROR frame to every connection.
    pub fn send_error(&self, message: &str) {
        self.send_raw(&Frame::new(Command::Error).header("message", message).encode());
    }

    /// Abnormally close every connection.
    pub fn drop_connections(&self) {
        self.close_all(false);
    }

    /// Close every connection with a normal close.
    pub fn close_connections(&self) {
        self.close_all(true);
    }

    /// Poll `check` until it holds.
    pub async fn wait_until(&self, check: impl Fn(&FakeBroker) -> bool) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + WAIT;
        while !check(self) {
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("broker condition not met within {WAIT:?}");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    fn close_all(&self, clean: bool) {
        let conns: Vec<Conn> = self.inner.state.lock().connections.drain().map(|(_, c)| c).collect();
        for conn in conns {
            let _ = conn.tx.send(TransportEvent::Closed { clean });
        }
    }

    fn accept(&self, url: &str) -> Result<Duplex, TransportError> {
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let (from_client_tx, mut from_client_rx) = mpsc::unbounded_channel::<String>();
        let id = {
            let mut state = self.inner.state.lock();
            state.opens += 1;
            if state.refuse {
                return Err(TransportError::Connect {
                    url: url.to_owned(),
                    reason: "connection refused".to_owned(),
                });
            }
            state.next_conn += 1;
            let id = state.next_conn;
            state.connections.insert(id, Conn { tx: to_client_tx, subs: HashMap::new() });
            id
        };

        let broker = self.clone();
        tokio::spawn(async move {
            while let Some(text) = from_client_rx.recv().await {
                broker.on_client_text(id, &text);
            }
            broker.inner.state.lock().connections.remove(&id);
        });
        Ok(Duplex { outbound: from_client_tx, inbound: to_client_rx })
    }

    fn on_client_text(&self, conn_id: u64, text: &str) {
        let items = match frame::decode(text) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(err = %e, "fake broker got a malformed frame");
                return;
            }
        };
        let mut state = self.inner.state.lock();
        for item in items {
            let Item::Frame(frame) = item else { continue };
            state.commands.push(frame.command);
            match frame.command {
                Command::Connect | Command::Stomp => {
                    let reply = match state.reject_connect.clone() {
                        Some(reason) => Frame::new(Command::Error).header("message", reason),
                        None => {
                            state.connects += 1;
                            let (sx, sy) = state.heartbeat;
                            Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", format!("{sx},{sy}"))
                        }
                    };
                    if let Some(conn) = state.connections.get(&conn_id) {
                        let _ = conn.tx.send(TransportEvent::Text(reply.encode()));
                    }
                }
                Command::Subscribe => {
                    let id = frame.get("id").unwrap_or_default().to_owned();
                    let dest = frame.get("destination").unwrap_or_default().to_owned();
                    state.subscribe_frames.push(dest.clone());
                    if let Some(conn) = state.connections.get_mut(&conn_id) {
                        conn.subs.insert(id, dest);
                    }
                }
                Command::Unsubscribe => {
                    if let (Some(conn), Some(id)) = (state.connections.get_mut(&conn_id), frame.get("id")) {
                        conn.subs.remove(id);
                    }
                }
                Command::Send => {
                    let _ = self.inner.sends_tx.send(SentFrame {
                        destination: frame.get("destination").unwrap_or_default().to_owned(),
                        body: frame.body.clone(),
                    });
                }
                Command::Disconnect => {
                    if let Some(conn) = state.connections.remove(&conn_id) {
                        if let Some(receipt) = frame.get("receipt") {
                            let reply = Frame::new(Command::Receipt).header("receipt-id", receipt);
                            let _ = conn.tx.send(TransportEvent::Text(reply.encode()));
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Transport whose connections terminate in a [`FakeBroker`].
pub struct MemoryTransport {
    broker: FakeBroker,
}

impl Transport for MemoryTransport {
    fn open(&self, url: &str) -> BoxFuture<'static, Result<Duplex, TransportError>> {
        let result = self.broker.accept(url);
        Box::pin(async move { result })
    }
}

/// Connection options for tests: no heart-beats, fast reconnect.
pub fn test_options() -> ConnectionOptions {
    ConnectionOptions {
        headers: Vec::new(),
        reconnect: ReconnectOptions {
            delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(400),
            ..ReconnectOptions::default()
        },
        heartbeat: HeartbeatOptions { outgoing: Duration::ZERO, incoming: Duration::ZERO },
        connect_timeout: Duration::from_secs(2),
    }
}

/// Wait for `check` to hold, polling every few milliseconds.
pub async fn eventually(check: impl Fn() -> bool) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {WAIT:?}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// A client connected to `broker` with [`test_options`].
pub async fn connected_client(broker: &FakeBroker) -> anyhow::Result<StompClient> {
    let client = StompClient::new(broker.transport());
    client.connect(MEMORY_URL, test_options());
    eventually(|| client.is_connected()).await?;
    Ok(client)
}
