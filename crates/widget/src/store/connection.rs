// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use super::{ChatStore, ConnectionStatus, ConversationState};
use crate::error::ChatError;
use crate::stomp::{ConnectionOptions, Disconnect, StompClient};

impl ChatStore {
    /// Create a client and start connecting. A no-op while a client exists.
    pub fn connect(&self, url: &str, options: ConnectionOptions) {
        if self.inner.subscriptions.client().is_some() {
            tracing::debug!("connect ignored: a client already exists");
            return;
        }
        self.update(|s| {
            s.connection.status = ConnectionStatus::Connecting;
            s.connection.closed = false;
            s.connection.error = None;
        });

        let client = StompClient::new(Arc::clone(&self.inner.transport));
        let id = client.id();

        let weak = self.downgrade();
        client.on_connect(move || {
            if let Some(store) = ChatStore::upgrade(&weak).filter(|s| s.is_current(id)) {
                store.handle_connected();
            }
        });
        let weak = self.downgrade();
        client.on_error(move |e| {
            if let Some(store) = ChatStore::upgrade(&weak).filter(|s| s.is_current(id)) {
                store.handle_error(e.clone());
            }
        });
        let weak = self.downgrade();
        client.on_disconnect(move |kind| {
            if let Some(store) = ChatStore::upgrade(&weak).filter(|s| s.is_current(id)) {
                store.handle_disconnected(kind);
            }
        });

        self.inner.subscriptions.set_client(Some(client.clone()));
        tracing::info!(url, "connecting");
        client.connect(url, options);
    }

    /// Tear down listeners, the client and the conversation.
    pub fn disconnect(&self) {
        let client = self.inner.subscriptions.client();
        self.release_conversation_subs();
        self.inner.subscriptions.dispose();
        if let Some(client) = client {
            client.disconnect();
        }
        self.update(|s| {
            s.connection.status = ConnectionStatus::Disconnected;
            s.connection.closed = true;
            s.connection.error = None;
            s.connection.interrupted = false;
            s.conversation = ConversationState {
                visitor_id: s.conversation.visitor_id.take(),
                ..Default::default()
            };
        });
        tracing::info!("disconnected");
    }

    /// Called after a dropped connection comes back. Last registration wins.
    ///
    /// Messages exchanged while the connection was down are not recovered.
    pub fn on_reconnect(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_reconnect.lock() = Some(Arc::new(hook));
    }

    pub(super) fn is_current(&self, client_id: u64) -> bool {
        self.inner.subscriptions.client().is_some_and(|c| c.id() == client_id)
    }

    fn handle_connected(&self) {
        let mut reconnected = false;
        self.update(|s| {
            let c = &mut s.connection;
            reconnected = c.interrupted;
            c.status = ConnectionStatus::Connected;
            c.closed = false;
            c.error = None;
            c.interrupted = false;
            c.has_connected_once = true;
        });
        tracing::info!(reconnected, "connected");
        if reconnected {
            let hook = self.inner.on_reconnect.lock().clone();
            if let Some(hook) = hook {
                hook();
            }
        }
    }

    /// Record `error`. The status only moves to `Error` when the link is
    /// down; a protocol error on a live socket leaves the session usable.
    fn handle_error(&self, error: ChatError) {
        tracing::error!(code = %error.code(), err = %error, "connection error");
        let link_up = self.inner.subscriptions.client().is_some_and(|c| c.is_connected());
        self.update(|s| {
            let c = &mut s.connection;
            if !link_up {
                c.status = ConnectionStatus::Error;
            }
            c.error = Some(error);
        });
    }

    fn handle_disconnected(&self, kind: Disconnect) {
        self.release_conversation_subs();
        self.inner.subscriptions.unsubscribe_all();
        if kind == Disconnect::Final {
            self.inner.subscriptions.set_client(None);
        }
        self.update(|s| {
            let c = &mut s.connection;
            c.status = if c.error.is_some() { ConnectionStatus::Error } else { ConnectionStatus::Disconnected };
            c.closed = kind == Disconnect::Final;
            if c.has_connected_once && kind == Disconnect::Retrying {
                c.interrupted = true;
            }
            s.conversation = ConversationState {
                visitor_id: s.conversation.visitor_id.take(),
                ..Default::default()
            };
        });
        tracing::info!(?kind, "connection lost");
    }
}
