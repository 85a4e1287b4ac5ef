// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! STOMP client over a [`Transport`], with heart-beats and reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

use super::frame::{self, Command, Frame, Item};
use super::payload::Payload;
use crate::error::ChatError;
use crate::transport::{Duplex, Transport, TransportEvent};

/// Backoff growth between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffMode {
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    pub enabled: bool,
    /// Wait before the first reconnect attempt.
    pub delay: Duration,
    pub max_delay: Duration,
    pub mode: BackoffMode,
    pub multiplier: u32,
    /// Consecutive failed attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            mode: BackoffMode::Exponential,
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ReconnectOptions {
    /// Delay to use after an attempt that waited `current`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        match self.mode {
            BackoffMode::Linear => current.min(self.max_delay),
            BackoffMode::Exponential => current.saturating_mul(self.multiplier.max(1)).min(self.max_delay),
        }
    }
}

/// Heart-beat intervals we offer. Zero disables a direction.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatOptions {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self { outgoing: Duration::from_secs(10), incoming: Duration::from_secs(10) }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Extra CONNECT headers (credentials and the like).
    pub headers: Vec<(String, String)>,
    pub reconnect: ReconnectOptions,
    pub heartbeat: HeartbeatOptions,
    /// Bound on the transport open plus CONNECTED wait.
    pub connect_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            reconnect: ReconnectOptions::default(),
            heartbeat: HeartbeatOptions::default(),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// How a connection ended, as reported to the disconnect hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// A reconnect attempt is scheduled.
    Retrying,
    /// The client is finished and will not reconnect.
    Final,
}

/// Lifecycle notifications fanned out to any number of listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Error(ChatError),
    Disconnected(Disconnect),
}

type ConnectHook = Arc<dyn Fn() + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ChatError) + Send + Sync>;
type DisconnectHook = Arc<dyn Fn(Disconnect) + Send + Sync>;
pub(crate) type PayloadCallback = Arc<dyn Fn(Payload) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    on_connect: Option<ConnectHook>,
    on_error: Option<ErrorHook>,
    on_disconnect: Option<DisconnectHook>,
}

#[derive(Default)]
struct Link {
    writer: Option<mpsc::UnboundedSender<String>>,
    connected: bool,
}

struct SubEntry {
    destination: String,
    callback: PayloadCallback,
}

struct Shared {
    id: u64,
    transport: Arc<dyn Transport>,
    link: Mutex<Link>,
    subs: Mutex<HashMap<String, SubEntry>>,
    next_sub: AtomicU64,
    next_receipt: AtomicU64,
    hooks: Mutex<Hooks>,
    events: broadcast::Sender<ClientEvent>,
    started: AtomicBool,
    cancel: CancellationToken,
}

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Cheaply cloneable handle to one logical STOMP connection.
///
/// `connect` starts a background loop that owns the socket and reconnects
/// after abnormal closes. Once `disconnect` is called the client is done;
/// build a new one to connect again.
#[derive(Clone)]
pub struct StompClient {
    shared: Arc<Shared>,
}

impl StompClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
                transport,
                link: Mutex::new(Link::default()),
                subs: Mutex::new(HashMap::new()),
                next_sub: AtomicU64::new(0),
                next_receipt: AtomicU64::new(0),
                hooks: Mutex::new(Hooks::default()),
                events,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Process-unique id of this client.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Start the connection loop. Must be called inside a tokio runtime.
    /// A second call, or a call after `disconnect`, is ignored.
    pub fn connect(&self, url: &str, options: ConnectionOptions) {
        if self.shared.cancel.is_cancelled() || self.shared.started.swap(true, Ordering::SeqCst) {
            tracing::debug!(client = self.shared.id, "connect ignored: client already started");
            return;
        }
        tokio::spawn(run_connection(Arc::clone(&self.shared), url.to_owned(), options));
    }

    /// Send DISCONNECT if connected and stop reconnecting.
    pub fn disconnect(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.link.lock().connected
    }

    pub fn on_connect(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.shared.hooks.lock().on_connect = Some(Arc::new(hook));
    }

    pub fn on_error(&self, hook: impl Fn(&ChatError) + Send + Sync + 'static) {
        self.shared.hooks.lock().on_error = Some(Arc::new(hook));
    }

    pub fn on_disconnect(&self, hook: impl Fn(Disconnect) + Send + Sync + 'static) {
        self.shared.hooks.lock().on_disconnect = Some(Arc::new(hook));
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribe `callback` to `destination` on the current connection.
    pub fn subscribe(
        &self,
        destination: &str,
        callback: impl Fn(Payload) + Send + Sync + 'static,
    ) -> Result<Subscription, ChatError> {
        let writer = self.writer()?;
        let id = format!("sub-{}", self.shared.next_sub.fetch_add(1, Ordering::Relaxed));
        self.shared.subs.lock().insert(
            id.clone(),
            SubEntry { destination: destination.to_owned(), callback: Arc::new(callback) },
        );
        let frame = Frame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        if writer.send(frame.encode()).is_err() {
            self.shared.subs.lock().remove(&id);
            return Err(ChatError::NotConnected);
        }
        tracing::debug!(client = self.shared.id, sub = %id, destination, "subscribed");
        Ok(Subscription {
            id,
            destination: destination.to_owned(),
            client: Arc::downgrade(&self.shared),
        })
    }

    /// Publish `body` as JSON to `destination`.
    pub fn publish<T: Serialize + ?Sized>(&self, destination: &str, body: &T) -> Result<(), ChatError> {
        let text = serde_json::to_string(body).map_err(|e| ChatError::Encode(e.to_string()))?;
        self.publish_raw(destination, &text)
    }

    /// Publish an already encoded body.
    pub fn publish_raw(&self, destination: &str, body: &str) -> Result<(), ChatError> {
        let writer = self.writer()?;
        let frame = Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body);
        writer.send(frame.encode()).map_err(|_| ChatError::NotConnected)?;
        tracing::debug!(client = self.shared.id, destination, bytes = body.len(), "published");
        Ok(())
    }

    /// Live subscriptions on the current connection for `destination`.
    pub fn subscription_count(&self, destination: &str) -> usize {
        self.shared.subs.lock().values().filter(|s| s.destination == destination).count()
    }

    fn writer(&self) -> Result<mpsc::UnboundedSender<String>, ChatError> {
        let link = self.shared.link.lock();
        match (&link.writer, link.connected) {
            (Some(writer), true) => Ok(writer.clone()),
            _ => Err(ChatError::NotConnected),
        }
    }
}

/// Handle to one broker subscription.
pub struct Subscription {
    pub id: String,
    pub destination: String,
    client: Weak<Shared>,
}

impl Subscription {
    /// Remove the subscription. Idempotent; a no-op once the connection
    /// that created it has ended.
    pub fn unsubscribe(&self) {
        let Some(shared) = self.client.upgrade() else { return };
        if shared.subs.lock().remove(&self.id).is_none() {
            return;
        }
        let writer = {
            let link = shared.link.lock();
            link.writer.clone().filter(|_| link.connected)
        };
        if let Some(writer) = writer {
            let _ = writer.send(Frame::new(Command::Unsubscribe).header("id", self.id.as_str()).encode());
        }
        tracing::debug!(sub = %self.id, destination = %self.destination, "unsubscribed");
    }
}

// ── Hook dispatch ──────────────────────────────────────────────────────

impl Shared {
    fn emit_connected(&self) {
        let hook = self.hooks.lock().on_connect.clone();
        if let Some(hook) = hook {
            hook();
        }
        let _ = self.events.send(ClientEvent::Connected);
    }

    fn emit_error(&self, error: ChatError) {
        tracing::warn!(client = self.id, code = %error.code(), err = %error, "stomp client error");
        let hook = self.hooks.lock().on_error.clone();
        if let Some(hook) = hook {
            hook(&error);
        }
        let _ = self.events.send(ClientEvent::Error(error));
    }

    fn emit_disconnected(&self, kind: Disconnect) {
        let hook = self.hooks.lock().on_disconnect.clone();
        if let Some(hook) = hook {
            hook(kind);
        }
        let _ = self.events.send(ClientEvent::Disconnected(kind));
    }

    fn dispatch(&self, frame: &Frame) {
        let Some(sub_id) = frame.get("subscription") else {
            tracing::debug!("MESSAGE without subscription header");
            return;
        };
        let target = self
            .subs
            .lock()
            .get(sub_id)
            .map(|s| (Arc::clone(&s.callback), s.destination.clone()));
        match target {
            Some((callback, destination)) => callback(Payload::from_frame(frame, &destination)),
            None => tracing::debug!(sub = sub_id, "MESSAGE for unknown subscription"),
        }
    }
}

// ── Connection loop ────────────────────────────────────────────────────

enum SessionEnd {
    /// `disconnect` was called.
    Cancelled,
    /// Broker closed the socket with a normal close.
    Closed,
    /// Abnormal loss; eligible for reconnect.
    Lost,
}

struct Attempt {
    established: bool,
    end: SessionEnd,
}

async fn run_connection(shared: Arc<Shared>, url: String, options: ConnectionOptions) {
    let mut delay = options.reconnect.delay;
    let mut failures: u32 = 0;

    loop {
        let attempt = attempt_session(&shared, &url, &options).await;
        if attempt.established {
            delay = options.reconnect.delay;
            failures = 0;
        }
        failures = failures.saturating_add(1);

        let retry = matches!(attempt.end, SessionEnd::Lost)
            && options.reconnect.enabled
            && !shared.cancel.is_cancelled()
            && options.reconnect.max_attempts.map_or(true, |max| failures <= max);

        if attempt.established || !retry {
            shared.emit_disconnected(if retry { Disconnect::Retrying } else { Disconnect::Final });
        }
        if !retry {
            if matches!(attempt.end, SessionEnd::Lost) && !shared.cancel.is_cancelled() {
                tracing::warn!(client = shared.id, %url, failures, "giving up on reconnect");
            }
            break;
        }

        tracing::info!(client = shared.id, %url, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                shared.emit_disconnected(Disconnect::Final);
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = options.reconnect.next_delay(delay);
    }
    tracing::debug!(client = shared.id, "connection loop finished");
}

async fn attempt_session(shared: &Arc<Shared>, url: &str, options: &ConnectionOptions) -> Attempt {
    let not_established = |end| Attempt { established: false, end };
    let deadline = Instant::now() + options.connect_timeout;

    let opened = tokio::select! {
        _ = shared.cancel.cancelled() => return not_established(SessionEnd::Cancelled),
        r = tokio::time::timeout_at(deadline, shared.transport.open(url)) => r,
    };
    let Duplex { outbound, mut inbound } = match opened {
        Ok(Ok(duplex)) => duplex,
        Ok(Err(e)) => {
            shared.emit_error(ChatError::Transport(e.to_string()));
            return not_established(SessionEnd::Lost);
        }
        Err(_) => {
            shared.emit_error(ChatError::Transport(format!("timed out opening {url}")));
            return not_established(SessionEnd::Lost);
        }
    };

    let mut connect = Frame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header(
            "heart-beat",
            format!("{},{}", options.heartbeat.outgoing.as_millis(), options.heartbeat.incoming.as_millis()),
        );
    if let Some(host) = host_of(url) {
        connect = connect.header("host", host);
    }
    for (k, v) in &options.headers {
        connect = connect.header(k.as_str(), v.as_str());
    }
    if outbound.send(connect.encode()).is_err() {
        shared.emit_error(ChatError::Transport("connection closed before CONNECT".to_owned()));
        return not_established(SessionEnd::Lost);
    }

    // Wait for CONNECTED.
    let server_heartbeat = loop {
        let event = tokio::select! {
            _ = shared.cancel.cancelled() => return not_established(SessionEnd::Cancelled),
            r = tokio::time::timeout_at(deadline, inbound.recv()) => r,
        };
        match event {
            Err(_) => {
                shared.emit_error(ChatError::Transport("timed out waiting for CONNECTED".to_owned()));
                return not_established(SessionEnd::Lost);
            }
            Ok(None) | Ok(Some(TransportEvent::Closed { .. })) => {
                shared.emit_error(ChatError::Transport("connection closed during handshake".to_owned()));
                return not_established(SessionEnd::Lost);
            }
            Ok(Some(TransportEvent::Error(e))) => shared.emit_error(ChatError::Transport(e)),
            Ok(Some(TransportEvent::Text(text))) => match handshake_reply(&text) {
                Handshake::Connected(heartbeat) => break heartbeat,
                Handshake::Rejected(reason) => {
                    shared.emit_error(ChatError::Protocol(reason));
                    return not_established(SessionEnd::Lost);
                }
                Handshake::Pending => {}
            },
        }
    };

    {
        let mut link = shared.link.lock();
        link.writer = Some(outbound.clone());
        link.connected = true;
    }
    tracing::info!(client = shared.id, %url, "stomp connected");
    shared.emit_connected();

    let (send_every, expect_every) = negotiate(options.heartbeat, server_heartbeat);
    let end = run_session(shared, &outbound, &mut inbound, send_every, expect_every).await;

    {
        let mut link = shared.link.lock();
        link.writer = None;
        link.connected = false;
    }
    // Subscriptions do not outlive their connection.
    shared.subs.lock().clear();

    Attempt { established: true, end }
}

async fn run_session(
    shared: &Arc<Shared>,
    outbound: &mpsc::UnboundedSender<String>,
    inbound: &mut mpsc::UnboundedReceiver<TransportEvent>,
    send_every: Option<Duration>,
    expect_every: Option<Duration>,
) -> SessionEnd {
    let mut ping = send_every.map(every);
    let mut watchdog = expect_every.map(every);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                send_disconnect(shared, outbound, inbound).await;
                return SessionEnd::Cancelled;
            }
            _ = tick(&mut ping) => {
                if outbound.send("\n".to_owned()).is_err() {
                    shared.emit_error(ChatError::Transport("connection writer closed".to_owned()));
                    return SessionEnd::Lost;
                }
            }
            _ = tick(&mut watchdog) => {
                let limit = expect_every.map_or(Duration::MAX, |d| d * 2);
                if last_seen.elapsed() > limit {
                    shared.emit_error(ChatError::Transport("heart-beat timeout".to_owned()));
                    return SessionEnd::Lost;
                }
            }
            event = inbound.recv() => match event {
                Some(TransportEvent::Text(text)) => {
                    last_seen = Instant::now();
                    handle_text(shared, &text);
                }
                Some(TransportEvent::Error(e)) => shared.emit_error(ChatError::Transport(e)),
                Some(TransportEvent::Closed { clean: true }) => {
                    tracing::info!(client = shared.id, "connection closed by server");
                    return SessionEnd::Closed;
                }
                Some(TransportEvent::Closed { clean: false }) | None => {
                    shared.emit_error(ChatError::Transport("connection closed abnormally".to_owned()));
                    return SessionEnd::Lost;
                }
            }
        }
    }
}

fn handle_text(shared: &Shared, text: &str) {
    let items = match frame::decode(text) {
        Ok(items) => items,
        Err(e) => {
            shared.emit_error(ChatError::Protocol(e.to_string()));
            return;
        }
    };
    for item in items {
        let Item::Frame(frame) = item else { continue };
        match frame.command {
            Command::Message => shared.dispatch(&frame),
            Command::Receipt => {
                tracing::debug!(receipt = frame.get("receipt-id").unwrap_or_default(), "receipt");
            }
            Command::Error => shared.emit_error(ChatError::Protocol(error_text(&frame))),
            other => tracing::debug!(command = %other, "ignoring unexpected frame"),
        }
    }
}

/// Send DISCONNECT and wait briefly for its RECEIPT.
async fn send_disconnect(
    shared: &Shared,
    outbound: &mpsc::UnboundedSender<String>,
    inbound: &mut mpsc::UnboundedReceiver<TransportEvent>,
) {
    let receipt = format!("disconnect-{}", shared.next_receipt.fetch_add(1, Ordering::Relaxed));
    let frame = Frame::new(Command::Disconnect).header("receipt", receipt.as_str());
    if outbound.send(frame.encode()).is_err() {
        return;
    }
    let wait = async {
        while let Some(TransportEvent::Text(text)) = inbound.recv().await {
            let acked = frame::decode(&text).map_or(false, |items| {
                items.iter().any(|item| {
                    matches!(item, Item::Frame(f) if f.command == Command::Receipt
                        && f.get("receipt-id") == Some(receipt.as_str()))
                })
            });
            if acked {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(1), wait).await.is_err() {
        tracing::debug!(client = shared.id, "no receipt for DISCONNECT");
    }
    tracing::info!(client = shared.id, "stomp disconnected");
}

enum Handshake {
    Connected(Option<(u64, u64)>),
    Rejected(String),
    Pending,
}

fn handshake_reply(text: &str) -> Handshake {
    let items = match frame::decode(text) {
        Ok(items) => items,
        Err(e) => return Handshake::Rejected(e.to_string()),
    };
    for item in items {
        let Item::Frame(frame) = item else { continue };
        match frame.command {
            Command::Connected => return Handshake::Connected(frame.get("heart-beat").and_then(parse_heartbeat)),
            Command::Error => return Handshake::Rejected(error_text(&frame)),
            _ => {}
        }
    }
    Handshake::Pending
}

fn error_text(frame: &Frame) -> String {
    match frame.get("message") {
        Some(message) if !frame.body.is_empty() => format!("{message}: {}", frame.body.trim()),
        Some(message) => message.to_owned(),
        None => frame.body.trim().to_owned(),
    }
}

fn parse_heartbeat(value: &str) -> Option<(u64, u64)> {
    let (sx, sy) = value.split_once(',')?;
    Some((sx.trim().parse().ok()?, sy.trim().parse().ok()?))
}

/// STOMP 1.2 heart-beat negotiation.
///
/// Returns (how often we send, how often we expect to receive). The server's
/// `heart-beat:sx,sy` means it can send every `sx` and wants every `sy`.
pub(crate) fn negotiate(ours: HeartbeatOptions, server: Option<(u64, u64)>) -> (Option<Duration>, Option<Duration>) {
    let (sx, sy) = server.unwrap_or((0, 0));
    let cx = ours.outgoing.as_millis() as u64;
    let cy = ours.incoming.as_millis() as u64;
    let pick = |mine: u64, theirs: u64| {
        (mine != 0 && theirs != 0).then(|| Duration::from_millis(mine.max(theirs)))
    };
    (pick(cx, sy), pick(cy, sx))
}

fn every(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn host_of(url: &str) -> Option<String> {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = after_scheme.split(['/', '?', '#']).next()?;
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = match host.rsplit_once(':') {
        Some((h, port)) if port.chars().all(|c| c.is_ascii_digit()) => h,
        _ => host,
    };
    (!host.is_empty()).then(|| host.to_owned())
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
