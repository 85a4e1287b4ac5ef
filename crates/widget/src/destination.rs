// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pub/sub addresses used by the widget backend.

/// SockJS endpoint path, relative to the API base URL.
pub const WS_ENDPOINT: &str = "/ws/widget";

/// Outbound destinations (client → server).
pub mod endpoint {
    pub const INIT: &str = "/app/widget/init";
    pub const MESSAGE: &str = "/app/widget/message";
    pub const TYPING: &str = "/app/widget/typing";
    pub const READ: &str = "/app/widget/read";
    pub const CLOSE: &str = "/app/widget/close";
}

/// Personal error channel.
pub const ERROR_CHANNEL: &str = "/user/queue/reply";

/// One-shot channel carrying the init handshake response.
pub fn temp_channel(temp_id: &str) -> String {
    format!("/topic/widget/temp/{temp_id}")
}

/// Durable message stream for a conversation.
pub fn conversation_channel(conversation_id: &str) -> String {
    format!("/topic/conversation/{conversation_id}")
}
