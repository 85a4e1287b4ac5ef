// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{ChatStore, ConversationPhase, ConversationState};
use crate::destination::{self, endpoint};
use crate::model::{ConnectedMessage, Inbound, InitRequest, SenderType, VisitorInfo};

impl ChatStore {
    /// Run the init handshake and adopt the conversation it returns.
    ///
    /// Failures are recorded in `connection.error` and yield `None`.
    pub async fn init(&self, hospital_id: &str, visitor_info: Option<VisitorInfo>) -> Option<ConnectedMessage> {
        self.init_with(hospital_id, visitor_info, |_| {}).await
    }

    /// [`init`](Self::init) with a callback run once the conversation is in
    /// place.
    pub async fn init_with(
        &self,
        hospital_id: &str,
        visitor_info: Option<VisitorInfo>,
        on_connected: impl FnOnce(&ConnectedMessage) + Send,
    ) -> Option<ConnectedMessage> {
        let snapshot = self.snapshot();
        let client = match self.inner.subscriptions.client() {
            Some(client) if snapshot.is_connected() => client,
            _ => {
                tracing::warn!(hospital_id, "init called while not connected");
                return None;
            }
        };
        if snapshot.conversation.phase == ConversationPhase::Initializing {
            tracing::warn!(hospital_id, "init already in progress");
            return None;
        }

        let temp_id = format!("temp-{}", uuid::Uuid::new_v4());
        let channel = destination::temp_channel(&temp_id);
        self.update(|s| s.conversation.phase = ConversationPhase::Initializing);

        let response = self.inner.subscriptions.subscribe_once(&channel, |_| {}, self.inner.options.init_timeout);
        let request = InitRequest {
            hospital_id: hospital_id.to_owned(),
            visitor_id: self.inner.visitor.visitor_id(),
            temp_id: temp_id.clone(),
            visitor_info,
        };
        if let Err(e) = client.publish(endpoint::INIT, &request) {
            tracing::error!(err = %e, "failed to publish init request");
            self.update(|s| {
                s.conversation.phase = ConversationPhase::Uninitialized;
                s.connection.error = Some(e);
            });
            return None;
        }
        tracing::debug!(%temp_id, hospital_id, "init request sent");

        let response = response.await;
        if !self.is_current(client.id()) || !self.snapshot().is_connected() {
            tracing::debug!("discarding init outcome for a closed connection");
            return None;
        }
        match response {
            Ok(Inbound::Connected(data)) => {
                self.adopt_conversation(&data);
                on_connected(&data);
                Some(data)
            }
            Ok(other) => {
                tracing::warn!(kind = other.kind(), "unexpected init response");
                self.update(|s| {
                    s.conversation.phase = ConversationPhase::Uninitialized;
                    if let Inbound::Error(e) = other {
                        s.conversation.server_error = Some(e);
                    }
                });
                None
            }
            Err(e) => {
                tracing::error!(err = %e, "init handshake failed");
                self.update(|s| {
                    s.conversation.phase = ConversationPhase::Uninitialized;
                    s.connection.error = Some(e);
                });
                None
            }
        }
    }

    /// Forget the conversation. The connection stays up.
    pub fn reset_conversation(&self) {
        self.release_conversation_subs();
        self.update(|s| {
            s.conversation = ConversationState {
                visitor_id: s.conversation.visitor_id.take(),
                ..Default::default()
            };
        });
    }

    fn adopt_conversation(&self, data: &ConnectedMessage) {
        if let Err(e) = self.inner.visitor.set_visitor_id(&data.visitor_id) {
            tracing::warn!(err = %e, "failed to persist visitor id");
        }
        self.release_conversation_subs();
        self.update(|s| {
            s.conversation = ConversationState {
                phase: ConversationPhase::Initialized,
                conversation_id: Some(data.conversation_id.clone()),
                visitor_id: Some(data.visitor_id.clone()),
                ai_enabled: data.ai_enabled,
                welcome_message: data.welcome_message.clone(),
                recent_messages: data.recent_messages.clone(),
                ..Default::default()
            };
        });

        let weak = self.downgrade();
        let on_event = self.inner.subscriptions.subscribe(
            &destination::conversation_channel(&data.conversation_id),
            move |event| {
                if let Some(store) = ChatStore::upgrade(&weak) {
                    store.handle_conversation_event(event);
                }
            },
        );
        let weak = self.downgrade();
        let on_error = self.inner.subscriptions.subscribe(destination::ERROR_CHANNEL, move |event| {
            if let Some(store) = ChatStore::upgrade(&weak) {
                store.handle_server_error(event);
            }
        });
        self.inner.conversation_subs.lock().extend([on_event, on_error]);
        tracing::info!(
            conversation_id = %data.conversation_id,
            visitor_id = %data.visitor_id,
            ai_enabled = data.ai_enabled,
            "conversation initialized"
        );
    }

    fn handle_conversation_event(&self, event: &Inbound) {
        match event {
            Inbound::Typing(typing) if typing.sender_type != SenderType::User => self.update(|s| {
                s.conversation.agent_typing = typing.is_typing.then(|| typing.clone());
            }),
            Inbound::ConversationClosed(closed) => {
                tracing::info!(closed_by = %closed.closed_by, "conversation closed by server");
                self.update(|s| s.conversation.closed_by_server = Some(closed.clone()));
            }
            Inbound::Error(e) => {
                tracing::error!(code = %e.code, message = %e.message, "server error on conversation channel");
                self.update(|s| s.conversation.server_error = Some(e.clone()));
            }
            _ => {}
        }
        let _ = self.inner.events.send(event.clone());
    }

    fn handle_server_error(&self, event: &Inbound) {
        match event {
            Inbound::Error(e) => {
                tracing::error!(code = %e.code, message = %e.message, "server error");
                self.update(|s| s.conversation.server_error = Some(e.clone()));
            }
            other => tracing::debug!(kind = other.kind(), "reply on personal queue"),
        }
        let _ = self.inner.events.send(event.clone());
    }

    pub(super) fn release_conversation_subs(&self) {
        let handles: Vec<_> = self.inner.conversation_subs.lock().drain(..).collect();
        for handle in handles {
            handle.unsubscribe();
        }
    }
}
