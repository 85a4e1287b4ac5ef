// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::ChatStore;
use crate::destination::endpoint;
use crate::error::ChatError;
use crate::model::{CloseRequest, FileInfo, MessageSendRequest, MessageType, ReadRequest, TypingRequest};
use crate::stomp::StompClient;

impl ChatStore {
    /// Publish a message. `temp_message_id` correlates the server echo with
    /// an optimistic local entry.
    pub fn send_message(
        &self,
        content: &str,
        message_type: MessageType,
        file_info: Option<FileInfo>,
        temp_message_id: Option<String>,
    ) -> Result<(), ChatError> {
        let (client, conversation_id) = self.ready("send_message")?;
        client.publish(
            endpoint::MESSAGE,
            &MessageSendRequest {
                conversation_id,
                content: content.to_owned(),
                message_type,
                file_info,
                temp_message_id,
            },
        )
    }

    pub fn send_typing(&self, is_typing: bool) -> Result<(), ChatError> {
        let (client, conversation_id) = self.ready("send_typing")?;
        client.publish(endpoint::TYPING, &TypingRequest { conversation_id, is_typing })
    }

    pub fn mark_as_read(&self, message_id: &str) -> Result<(), ChatError> {
        let (client, conversation_id) = self.ready("mark_as_read")?;
        client.publish(endpoint::READ, &ReadRequest { conversation_id, message_id: message_id.to_owned() })
    }

    /// Tell the server the conversation is over, then disconnect.
    pub fn close_conversation(&self, reason: Option<String>) -> Result<(), ChatError> {
        let (client, conversation_id) = self.ready("close_conversation")?;
        let result = client.publish(endpoint::CLOSE, &CloseRequest { conversation_id, close_reason: reason });
        self.disconnect();
        result
    }

    /// Client and conversation id for an outbound action, or the misuse
    /// error (logged).
    fn ready(&self, action: &str) -> Result<(StompClient, String), ChatError> {
        let state = self.snapshot();
        let client = match self.inner.subscriptions.client() {
            Some(client) if state.is_connected() => client,
            _ => {
                tracing::warn!(action, "client is not connected");
                return Err(ChatError::NotConnected);
            }
        };
        match state.conversation.conversation_id {
            Some(id) => Ok((client, id)),
            None => {
                tracing::warn!(action, "conversation is not initialized");
                Err(ChatError::NoConversation)
            }
        }
    }
}
