// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::destination::WS_ENDPOINT;
use crate::model::VisitorInfo;
use crate::stomp::{BackoffMode, ConnectionOptions, HeartbeatOptions, ReconnectOptions};
use crate::transport::ws::sockjs_websocket_url;

/// Terminal client for the chat widget backend.
#[derive(Debug, Parser)]
#[command(name = "talkwidget", version, about)]
pub struct WidgetConfig {
    /// REST base URL. The WebSocket endpoint is derived from it unless
    /// --ws-url is given.
    #[arg(long, env = "WIDGET_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// WebSocket URL (ws://, or an http(s) SockJS endpoint).
    #[arg(long, env = "WIDGET_WS_URL")]
    pub ws_url: Option<String>,

    /// Hospital the conversation belongs to.
    #[arg(long, env = "WIDGET_HOSPITAL_ID")]
    pub hospital_id: String,

    #[arg(long, env = "WIDGET_VISITOR_NAME")]
    pub visitor_name: Option<String>,

    #[arg(long, env = "WIDGET_VISITOR_EMAIL")]
    pub visitor_email: Option<String>,

    /// Where the visitor id is persisted. In-memory when unset.
    #[arg(long, env = "WIDGET_VISITOR_FILE")]
    pub visitor_file: Option<PathBuf>,

    /// Disable automatic reconnect.
    #[arg(long, env = "WIDGET_NO_RECONNECT")]
    pub no_reconnect: bool,

    /// Keep the reconnect delay fixed instead of growing it exponentially.
    #[arg(long, env = "WIDGET_LINEAR_BACKOFF")]
    pub linear_backoff: bool,

    #[arg(long, env = "WIDGET_RECONNECT_DELAY_MS", default_value = "5000")]
    pub reconnect_delay_ms: u64,

    #[arg(long, env = "WIDGET_RECONNECT_MAX_DELAY_MS", default_value = "60000")]
    pub reconnect_max_delay_ms: u64,

    /// Give up after this many consecutive failed attempts.
    #[arg(long, env = "WIDGET_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: Option<u32>,

    /// Outgoing heart-beat interval (0 disables).
    #[arg(long, env = "WIDGET_HEARTBEAT_OUT_MS", default_value = "10000")]
    pub heartbeat_out_ms: u64,

    /// Expected incoming heart-beat interval (0 disables).
    #[arg(long, env = "WIDGET_HEARTBEAT_IN_MS", default_value = "10000")]
    pub heartbeat_in_ms: u64,

    #[arg(long, env = "WIDGET_CONNECT_TIMEOUT_MS", default_value = "15000")]
    pub connect_timeout_ms: u64,

    /// How long a sent message waits for its echo before it is failed.
    #[arg(long, env = "WIDGET_MESSAGE_TIMEOUT_MS", default_value = "10000")]
    pub message_timeout_ms: u64,

    #[arg(long, env = "WIDGET_INIT_TIMEOUT_MS", default_value = "30000")]
    pub init_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "WIDGET_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level or filter directive. `RUST_LOG` wins when set.
    #[arg(long, env = "WIDGET_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl WidgetConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hospital_id.trim().is_empty() {
            anyhow::bail!("--hospital-id must not be empty");
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            anyhow::bail!("--api-url must be an http(s) URL: {}", self.api_url);
        }
        let ws = self.ws_endpoint();
        if !ws.starts_with("ws://") && !ws.starts_with("wss://") {
            anyhow::bail!("unsupported WebSocket URL: {ws}");
        }
        if self.reconnect_max_delay_ms < self.reconnect_delay_ms {
            anyhow::bail!("--reconnect-max-delay-ms is smaller than --reconnect-delay-ms");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid log format: {other}"),
        }
    }

    /// Raw WebSocket URL to dial.
    pub fn ws_endpoint(&self) -> String {
        match &self.ws_url {
            Some(url) => sockjs_websocket_url(url),
            None => sockjs_websocket_url(&format!("{}{WS_ENDPOINT}", self.api_url.trim_end_matches('/'))),
        }
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            headers: Vec::new(),
            reconnect: ReconnectOptions {
                enabled: !self.no_reconnect,
                delay: Duration::from_millis(self.reconnect_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                mode: if self.linear_backoff { BackoffMode::Linear } else { BackoffMode::Exponential },
                max_attempts: self.max_reconnect_attempts,
                ..ReconnectOptions::default()
            },
            heartbeat: HeartbeatOptions {
                outgoing: Duration::from_millis(self.heartbeat_out_ms),
                incoming: Duration::from_millis(self.heartbeat_in_ms),
            },
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }

    /// Visitor details sent with the init handshake, if any were given.
    pub fn visitor_info(&self) -> Option<VisitorInfo> {
        if self.visitor_name.is_none() && self.visitor_email.is_none() {
            return None;
        }
        Some(VisitorInfo {
            name: self.visitor_name.clone(),
            email: self.visitor_email.clone(),
            user_agent: Some(concat!("talkwidget/", env!("CARGO_PKG_VERSION")).to_owned()),
            ..VisitorInfo::default()
        })
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
