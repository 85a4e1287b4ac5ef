// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{build_query, encode_segment, ApiClient, ApiError, UnreadCount};

/// A stored chat-room message as served by the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub id: String,
    pub chat_room_id: String,
    pub sender: Sender,
    pub content: String,
    pub message_type: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub read_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_room_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListMessagesParams {
    pub user_id: String,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

/// One page of a paged listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesPage {
    pub content: Vec<RoomMessage>,
    #[serde(default)]
    pub total_elements: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub first: Option<bool>,
    #[serde(default)]
    pub last: Option<bool>,
    #[serde(default)]
    pub empty: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMessageRequest {
    pub user_id: String,
}

fn user_query(user_id: &str) -> String {
    build_query(&[("userId", Some(user_id.to_owned()))])
}

impl ApiClient {
    pub async fn send_room_message(&self, req: &SendMessageRequest) -> Result<RoomMessage, ApiError> {
        self.post("/api/messages", req).await
    }

    pub async fn list_messages(&self, chat_room_id: &str, params: &ListMessagesParams) -> Result<MessagesPage, ApiError> {
        let query = build_query(&[
            ("userId", Some(params.user_id.clone())),
            ("page", params.page.map(|p| p.to_string())),
            ("size", params.size.map(|s| s.to_string())),
        ]);
        self.get(&format!("/api/messages/chatroom/{}{query}", encode_segment(chat_room_id))).await
    }

    /// Messages created after `since` (ISO-8601).
    pub async fn messages_since(&self, chat_room_id: &str, user_id: &str, since: &str) -> Result<Vec<RoomMessage>, ApiError> {
        let query = build_query(&[("userId", Some(user_id.to_owned())), ("since", Some(since.to_owned()))]);
        self.get(&format!("/api/messages/chatroom/{}/since{query}", encode_segment(chat_room_id))).await
    }

    pub async fn unread_messages(&self, chat_room_id: &str, user_id: &str) -> Result<Vec<RoomMessage>, ApiError> {
        let query = user_query(user_id);
        self.get(&format!("/api/messages/chatroom/{}/unread{query}", encode_segment(chat_room_id))).await
    }

    pub async fn unread_message_count(&self, chat_room_id: &str, user_id: &str) -> Result<UnreadCount, ApiError> {
        let query = user_query(user_id);
        self.get(&format!("/api/messages/chatroom/{}/unread-count{query}", encode_segment(chat_room_id))).await
    }

    pub async fn mark_message_read(&self, message_id: &str, req: &ReadMessageRequest) -> Result<(), ApiError> {
        self.patch(&format!("/api/messages/{}/read", encode_segment(message_id)), req).await
    }

    pub async fn mark_all_messages_read(&self, chat_room_id: &str, req: &ReadMessageRequest) -> Result<(), ApiError> {
        self.patch(&format!("/api/messages/chatroom/{}/read-all", encode_segment(chat_room_id)), req).await
    }

    pub async fn delete_message(&self, message_id: &str, user_id: &str) -> Result<(), ApiError> {
        let query = user_query(user_id);
        self.delete(&format!("/api/messages/{}{query}", encode_segment(message_id))).await
    }
}
