// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal chat client, shared by `main` and tests.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::WidgetConfig;
use crate::model::{Inbound, Message, MessageStatus, MessageType, SenderType};
use crate::pipeline::{HandlerChain, MessagePipeline, PipelineOptions};
use crate::store::{ChatState, ChatStore, ConnectionStatus, ConversationPhase, StoreOptions};
use crate::transport::{Transport, WsTransport};
use crate::visitor::VisitorStore;

const HELP: &str = "commands: /retry <tempId>, /typing on|off, /read <messageId>, /close [reason], /quit";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Send(String),
    Retry(String),
    Typing(bool),
    Read(String),
    Close(Option<String>),
    Quit,
    Help,
    Empty,
}

/// Parse a line typed by the user. Anything not starting with `/` is a
/// message.
pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Input::Empty);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Send(line.to_owned()));
    };
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };
    match (name, arg) {
        ("retry", "") => Err("usage: /retry <tempId>".to_owned()),
        ("retry", id) => Ok(Input::Retry(id.to_owned())),
        ("typing", "on") => Ok(Input::Typing(true)),
        ("typing", "off") => Ok(Input::Typing(false)),
        ("typing", _) => Err("usage: /typing on|off".to_owned()),
        ("read", "") => Err("usage: /read <messageId>".to_owned()),
        ("read", id) => Ok(Input::Read(id.to_owned())),
        ("close", "") => Ok(Input::Close(None)),
        ("close", reason) => Ok(Input::Close(Some(reason.to_owned()))),
        ("quit" | "exit", _) => Ok(Input::Quit),
        ("help", _) => Ok(Input::Help),
        (other, _) => Err(format!("unknown command /{other} ({HELP})")),
    }
}

/// Render one message as a single terminal line.
pub fn format_message(message: &Message) -> String {
    let time = chrono::DateTime::parse_from_rfc3339(&message.created_at)
        .map(|t| t.with_timezone(&chrono::Local).format("%H:%M").to_string())
        .unwrap_or_else(|_| "--:--".to_owned());
    let who = match message.sender_type {
        SenderType::User => "you".to_owned(),
        _ if !message.sender_name.is_empty() => message.sender_name.clone(),
        other => other.as_str().to_lowercase(),
    };
    let body = match (message.message_type, &message.file_info) {
        (MessageType::Loading, _) => "…".to_owned(),
        (MessageType::Image | MessageType::File, Some(file)) => {
            format!("[{}] {} ({})", message.message_type.as_str().to_lowercase(), file.file_name, file.file_url)
        }
        _ => message.content.clone(),
    };
    let suffix = match (message.status, &message.temp_message_id) {
        (Some(MessageStatus::Pending), _) => " (sending)".to_owned(),
        (Some(MessageStatus::Failed), Some(temp)) => format!(" (failed: /retry {temp})"),
        (Some(MessageStatus::Failed), None) => " (failed)".to_owned(),
        _ => String::new(),
    };
    format!("[{time}] {who}: {body}{suffix}")
}

/// A client ready to run. The store and pipeline are live, so callers can
/// observe them before [`PreparedSession::run`] starts the loop.
pub struct PreparedSession {
    pub store: ChatStore,
    pub pipeline: MessagePipeline,
    pub shutdown: CancellationToken,
    config: WidgetConfig,
}

/// Run the terminal client on stdin/stdout until `/quit`, `/close`, EOF or
/// a signal.
pub async fn run(config: WidgetConfig) -> anyhow::Result<()> {
    let session = prepare(config, Arc::new(WsTransport::new()))?;
    spawn_signal_handler(session.shutdown.clone());
    session.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

/// Initialize tracing/logging from config.
///
/// `RUST_LOG` takes precedence over `--log-level`. Uses `try_init` so it's
/// safe to call more than once.
pub fn init_tracing(config: &WidgetConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Build the store and attach a pipeline. Must be called inside a tokio
/// runtime.
pub fn prepare(config: WidgetConfig, transport: Arc<dyn Transport>) -> anyhow::Result<PreparedSession> {
    config.validate()?;
    let visitor = match &config.visitor_file {
        Some(path) => VisitorStore::open(path),
        None => VisitorStore::in_memory(),
    };
    let store = ChatStore::new(transport, visitor, StoreOptions { init_timeout: config.init_timeout() });
    let pipeline = MessagePipeline::attach(
        store.clone(),
        HandlerChain::default(),
        PipelineOptions { message_timeout: config.message_timeout(), ..PipelineOptions::default() },
    );
    Ok(PreparedSession { store, pipeline, shutdown: CancellationToken::new(), config })
}

impl PreparedSession {
    /// Connect, keep a conversation initialized, print the message list to
    /// `output` and act on lines read from `input`.
    pub async fn run<R, W>(self, input: R, output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self { store, pipeline, shutdown, config } = self;
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        let renderer = tokio::spawn(render(store.clone(), pipeline.clone(), output, notice_rx, shutdown.clone()));
        tokio::spawn(keep_initialized(
            store.clone(),
            config.hospital_id.clone(),
            config.visitor_info(),
            shutdown.clone(),
        ));

        store.connect(&config.ws_endpoint(), config.connection_options());

        let mut lines = input.lines();
        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            let input = match parse_input(&line) {
                Ok(input) => input,
                Err(usage) => {
                    let _ = notice_tx.send(usage);
                    continue;
                }
            };
            let result = match input {
                Input::Empty => Ok(()),
                Input::Help => {
                    let _ = notice_tx.send(HELP.to_owned());
                    Ok(())
                }
                Input::Quit => break,
                Input::Send(text) => pipeline.send_message(&text, MessageType::Text, None).map(drop),
                Input::Retry(temp_id) => {
                    if !pipeline.retry_message(&temp_id) {
                        let _ = notice_tx.send(format!("nothing to retry for {temp_id}"));
                    }
                    Ok(())
                }
                Input::Typing(on) => store.send_typing(on),
                Input::Read(message_id) => store.mark_as_read(&message_id),
                Input::Close(reason) => {
                    if let Err(e) = store.close_conversation(reason) {
                        let _ = notice_tx.send(format!("! {e}"));
                    }
                    break;
                }
            };
            if let Err(e) = result {
                let _ = notice_tx.send(format!("! {e}"));
            }
        }

        info!("shutting down");
        shutdown.cancel();
        pipeline.close();
        store.disconnect();
        drop(notice_tx);
        renderer.await??;
        Ok(())
    }
}

/// Run `init` once per established connection while no conversation
/// exists. A reconnect resets the conversation, which triggers a fresh init.
async fn keep_initialized(
    store: ChatStore,
    hospital_id: String,
    visitor_info: Option<crate::model::VisitorInfo>,
    shutdown: CancellationToken,
) {
    let mut states = store.watch();
    let mut attempted = false;
    loop {
        let state = states.borrow_and_update().clone();
        if !state.is_connected() {
            attempted = false;
        } else if !attempted && state.conversation.phase == ConversationPhase::Uninitialized {
            attempted = true;
            tokio::select! {
                _ = shutdown.cancelled() => break,
                data = store.init(&hospital_id, visitor_info.clone()) => {
                    if data.is_none() {
                        warn!("conversation init did not complete");
                    }
                }
            }
            continue;
        }
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = states.changed() => if changed.is_err() { break },
        }
    }
}

/// Lines produced by the message list since `shown` was last updated.
/// The list only appends or replaces in place, so rows are tracked by
/// position.
fn diff_lines(shown: &mut Vec<String>, messages: &[Message]) -> Vec<String> {
    if messages.len() < shown.len() {
        shown.clear();
    }
    let mut out = Vec::new();
    for (index, message) in messages.iter().enumerate() {
        let line = format_message(message);
        match shown.get_mut(index) {
            Some(existing) if *existing == line => {}
            Some(existing) => {
                *existing = line.clone();
                out.push(line);
            }
            None => {
                shown.push(line.clone());
                out.push(line);
            }
        }
    }
    out
}

fn status_line(previous: Option<&ChatState>, state: &ChatState) -> Option<String> {
    let status = state.connection.status;
    let conversation = state.conversation_id();
    if let Some(prev) = previous {
        if prev.connection.status == status && prev.conversation_id() == conversation {
            return None;
        }
        if prev.connection.status == status {
            return conversation.map(|id| format!("* conversation {id}"));
        }
    }
    Some(match (status, &state.connection.error) {
        (ConnectionStatus::Connecting, _) => "* connecting".to_owned(),
        (ConnectionStatus::Connected, _) => "* connected".to_owned(),
        (ConnectionStatus::Error, Some(e)) if !state.connection.closed => format!("* connection problem: {e} (retrying)"),
        (ConnectionStatus::Error, Some(e)) => format!("* connection failed: {e}"),
        (ConnectionStatus::Error, None) => "* connection problem".to_owned(),
        (ConnectionStatus::Disconnected, _) => "* disconnected".to_owned(),
    })
}

fn event_line(event: &Inbound) -> Option<String> {
    match event {
        Inbound::Typing(t) if t.is_typing => {
            let who = if t.sender_name.is_empty() { t.sender_type.as_str().to_lowercase() } else { t.sender_name.clone() };
            Some(format!("* {who} is typing"))
        }
        Inbound::ConversationClosed(c) => Some(match &c.close_reason {
            Some(reason) => format!("* conversation closed by {}: {reason}", c.closed_by),
            None => format!("* conversation closed by {}", c.closed_by),
        }),
        Inbound::Error(e) => Some(format!("! server error {}: {}", e.code, e.message)),
        _ => None,
    }
}

async fn render<W>(
    store: ChatStore,
    pipeline: MessagePipeline,
    mut out: W,
    mut notices: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut revisions = pipeline.watch();
    let mut states = store.watch();
    let mut events = store.events();
    let mut shown = Vec::new();
    let mut last_state: Option<ChatState> = None;

    loop {
        let mut lines = Vec::new();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() { break }
                lines = diff_lines(&mut shown, &pipeline.snapshot());
            }
            changed = states.changed() => {
                if changed.is_err() { break }
                let state = states.borrow_and_update().clone();
                lines.extend(status_line(last_state.as_ref(), &state));
                last_state = Some(state);
            }
            event = events.recv() => match event {
                Ok(event) => lines.extend(event_line(&event)),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "renderer lagged behind events"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            notice = notices.recv() => match notice {
                Some(notice) => lines.push(notice),
                None => break,
            },
        }
        for line in lines {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
        }
        out.flush().await?;
    }

    // Drain whatever the input loop reported last.
    while let Ok(notice) = notices.try_recv() {
        out.write_all(notice.as_bytes()).await?;
        out.write_all(b"\n").await?;
    }
    out.flush().await?;
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        tokio::select! {
            _ = async {
                if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
            } => info!("received SIGTERM"),
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        }
        shutdown.cancel();
    });
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
