// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{encode_segment, ApiClient, ApiError, UnreadCount};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub last_message: Option<Value>,
    #[serde(default)]
    pub unread_count: Option<u64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRoomRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkChatRoomReadRequest {
    pub user_id: String,
}

impl ApiClient {
    pub async fn create_chat_room(&self, req: &CreateChatRoomRequest) -> Result<ChatRoom, ApiError> {
        self.post("/api/chatrooms", req).await
    }

    pub async fn get_chat_room(&self, chat_room_id: &str) -> Result<ChatRoom, ApiError> {
        self.get(&format!("/api/chatrooms/{}", encode_segment(chat_room_id))).await
    }

    pub async fn chat_rooms_by_user(&self, user_id: &str) -> Result<Vec<ChatRoom>, ApiError> {
        self.get(&format!("/api/chatrooms/user/{}", encode_segment(user_id))).await
    }

    pub async fn chat_rooms_with_unread(&self, user_id: &str) -> Result<Vec<ChatRoom>, ApiError> {
        self.get(&format!("/api/chatrooms/user/{}/unread", encode_segment(user_id))).await
    }

    pub async fn unread_chat_room_count(&self, user_id: &str) -> Result<UnreadCount, ApiError> {
        self.get(&format!("/api/chatrooms/user/{}/unread-count", encode_segment(user_id))).await
    }

    pub async fn mark_chat_room_read(&self, chat_room_id: &str, req: &MarkChatRoomReadRequest) -> Result<(), ApiError> {
        self.patch(&format!("/api/chatrooms/{}/read", encode_segment(chat_room_id)), req).await
    }
}
