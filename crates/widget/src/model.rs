// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire and domain types shared by the protocol adapter, the store and the
//! pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Template,
    System,
    /// Locally synthesized "agent is thinking" placeholder.
    Loading,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
            Self::File => "FILE",
            Self::Template => "TEMPLATE",
            Self::System => "SYSTEM",
            Self::Loading => "LOADING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    User,
    Agent,
    Ai,
    System,
}

impl SenderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Agent => "AGENT",
            Self::Ai => "AI",
            Self::System => "SYSTEM",
        }
    }
}

/// Delivery state of a locally originated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_id: String,
    pub file_name: String,
    pub file_url: String,
    pub file_size: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Visitor details sent with the init handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

/// The unit exchanged and displayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id. Empty for an unconfirmed local message.
    #[serde(default)]
    pub message_id: String,
    /// Client correlation id, present only until the server echo arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub sender_type: SenderType,
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_generated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub created_at: String,
    /// Drives the typewriter reveal for agent replies. Local only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub animate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl Message {
    /// Pending outbound message shown before the server confirms it.
    pub fn outgoing(
        temp_message_id: &str,
        conversation_id: &str,
        content: &str,
        message_type: MessageType,
        file_info: Option<FileInfo>,
    ) -> Self {
        Self {
            message_id: temp_message_id.to_owned(),
            temp_message_id: Some(temp_message_id.to_owned()),
            conversation_id: Some(conversation_id.to_owned()),
            content: content.to_owned(),
            message_type,
            sender_type: SenderType::User,
            sender_id: String::new(),
            sender_name: "User".to_owned(),
            file_info,
            created_at: now_iso(),
            status: Some(MessageStatus::Pending),
            ..Self::blank(SenderType::User)
        }
    }

    /// Synthetic SYSTEM message wrapping an inbound body that could not be
    /// decoded.
    pub fn fallback(raw: &str) -> Self {
        Self {
            message_id: format!("fallback-{}", uuid::Uuid::new_v4()),
            content: raw.to_owned(),
            message_type: MessageType::System,
            sender_id: "system".to_owned(),
            sender_name: "System".to_owned(),
            created_at: now_iso(),
            ..Self::blank(SenderType::System)
        }
    }

    /// Greeting shown at the top of a freshly initialized conversation.
    pub fn welcome(conversation_id: &str, text: &str) -> Self {
        Self {
            message_id: format!("welcome-{}", crate::epoch_ms()),
            conversation_id: Some(conversation_id.to_owned()),
            content: text.to_owned(),
            message_type: MessageType::System,
            sender_name: "Agent".to_owned(),
            created_at: now_iso(),
            ..Self::blank(SenderType::Agent)
        }
    }

    /// Dedup and lookup key: the server id when known, else the temp id.
    pub fn key(&self) -> Option<&str> {
        if !self.message_id.is_empty() {
            return Some(&self.message_id);
        }
        self.temp_message_id.as_deref()
    }

    /// Outbound and still awaiting the server echo.
    pub fn is_unconfirmed(&self) -> bool {
        self.temp_message_id.is_some() && self.status != Some(MessageStatus::Failed)
    }

    pub fn is_loading(&self) -> bool {
        self.message_type == MessageType::Loading
    }

    fn blank(sender_type: SenderType) -> Self {
        Self {
            message_id: String::new(),
            temp_message_id: None,
            conversation_id: None,
            content: String::new(),
            message_type: MessageType::Text,
            sender_type,
            sender_id: String::new(),
            sender_name: String::new(),
            file_info: None,
            template_info: None,
            read: None,
            read_at: None,
            ai_generated: None,
            ai_confidence: None,
            metadata: None,
            created_at: String::new(),
            animate: false,
            status: None,
        }
    }
}

/// Payload of the `connected` init response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedMessage {
    pub conversation_id: String,
    pub visitor_id: String,
    #[serde(default)]
    pub welcome_message: Option<String>,
    #[serde(default)]
    pub recent_messages: Vec<Message>,
    #[serde(default)]
    pub ai_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    #[serde(default)]
    pub conversation_id: String,
    pub sender_type: SenderType,
    #[serde(default)]
    pub sender_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationClosed {
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub closed_by: String,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Decoded body of an inbound frame, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Connected(ConnectedMessage),
    Message(Message),
    Typing(TypingStatus),
    ConversationClosed(ConversationClosed),
    Error(ErrorResponse),
}

impl Inbound {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::Message(_) => "message",
            Self::Typing(_) => "typing",
            Self::ConversationClosed(_) => "conversation_closed",
            Self::Error(_) => "error",
        }
    }

    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(m) => Some(m),
            _ => None,
        }
    }
}

// ── Outbound request bodies ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub hospital_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,
    pub temp_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visitor_info: Option<VisitorInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendRequest {
    pub conversation_id: String,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_info: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub conversation_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseRequest {
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

/// Current time as an ISO-8601 UTC string with millisecond precision.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
