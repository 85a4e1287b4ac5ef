// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session store: one state container, four slices.
//!
//! Every mutation goes through [`ChatStore::update`], so watchers always see
//! a consistent [`ChatState`] snapshot.

mod actions;
mod connection;
mod conversation;
mod subscription;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};

use crate::error::ChatError;
use crate::model::{ConversationClosed, ErrorResponse, Inbound, Message, TypingStatus};
use crate::subscription::{SubscriptionManager, Unsubscribe};
use crate::transport::Transport;
use crate::visitor::VisitorStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationPhase {
    #[default]
    Uninitialized,
    Initializing,
    Initialized,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// The connection has ended and nothing will bring it back on its own.
    pub closed: bool,
    pub error: Option<ChatError>,
    pub has_connected_once: bool,
    /// Dropped with an error after having been connected; the next
    /// successful connect counts as a reconnect.
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    pub phase: ConversationPhase,
    pub conversation_id: Option<String>,
    pub visitor_id: Option<String>,
    pub ai_enabled: bool,
    pub welcome_message: Option<String>,
    pub recent_messages: Vec<Message>,
    pub agent_typing: Option<TypingStatus>,
    pub closed_by_server: Option<ConversationClosed>,
    pub server_error: Option<ErrorResponse>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub connection: ConnectionState,
    pub conversation: ConversationState,
}

impl ChatState {
    pub fn is_connected(&self) -> bool {
        self.connection.status == ConnectionStatus::Connected
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.conversation_id.as_deref()
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Bound on the init handshake.
    pub init_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { init_timeout: crate::subscription::ONCE_TIMEOUT }
    }
}

type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct StoreInner {
    state: watch::Sender<ChatState>,
    subscriptions: SubscriptionManager,
    transport: Arc<dyn Transport>,
    visitor: VisitorStore,
    events: broadcast::Sender<Inbound>,
    on_reconnect: Mutex<Option<ReconnectHook>>,
    /// Listeners owned by the active conversation.
    conversation_subs: Mutex<Vec<Unsubscribe>>,
    options: StoreOptions,
}

/// Session store handle. Clones share state.
#[derive(Clone)]
pub struct ChatStore {
    inner: Arc<StoreInner>,
}

impl ChatStore {
    pub fn new(transport: Arc<dyn Transport>, visitor: VisitorStore, options: StoreOptions) -> Self {
        let initial = ChatState {
            conversation: ConversationState { visitor_id: visitor.visitor_id(), ..Default::default() },
            ..Default::default()
        };
        let (state, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(StoreInner {
                state,
                subscriptions: SubscriptionManager::new(),
                transport,
                visitor,
                events,
                on_reconnect: Mutex::new(None),
                conversation_subs: Mutex::new(Vec::new()),
                options,
            }),
        }
    }

    /// The single mutation entry point. `f` runs under the state lock and
    /// must not call back into the store.
    pub fn update(&self, f: impl FnOnce(&mut ChatState)) {
        self.inner.state.send_modify(f);
    }

    pub fn snapshot(&self) -> ChatState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified after every update.
    pub fn watch(&self) -> watch::Receiver<ChatState> {
        self.inner.state.subscribe()
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    pub fn visitor(&self) -> &VisitorStore {
        &self.inner.visitor
    }

    /// Every event seen on the conversation and error channels.
    pub fn events(&self) -> broadcast::Receiver<Inbound> {
        self.inner.events.subscribe()
    }

    fn downgrade(&self) -> Weak<StoreInner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<StoreInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
