// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Optimistic message pipeline.
//!
//! Each outbound message moves `pending → sent | failed`, and `failed →
//! pending` on retry. The pending registry maps temp ids to cancellable
//! timers; confirmation always wins over a timer that has not fired yet.

pub mod handlers;

pub use handlers::{HandlerChain, HandlerContext, MessageHandler, ProcessedIds, PROCESSED_CAPACITY};

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::destination;
use crate::error::ChatError;
use crate::model::{FileInfo, Inbound, Message, MessageStatus, MessageType};
use crate::store::{ChatState, ChatStore, ConversationPhase};
use crate::subscription::Unsubscribe;

/// How long an outbound message may wait for its echo.
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub message_timeout: Duration,
    pub processed_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { message_timeout: MESSAGE_TIMEOUT, processed_capacity: PROCESSED_CAPACITY }
    }
}

struct State {
    ctx: HandlerContext,
    loading: bool,
    /// Conversation the list was seeded for.
    seeded_for: Option<String>,
}

impl State {
    fn new(processed_capacity: usize) -> Self {
        Self {
            ctx: HandlerContext { processed: ProcessedIds::with_capacity(processed_capacity), ..Default::default() },
            loading: true,
            seeded_for: None,
        }
    }
}

struct PipelineInner {
    store: ChatStore,
    chain: HandlerChain,
    options: PipelineOptions,
    state: Mutex<State>,
    revision: watch::Sender<u64>,
    cancel: CancellationToken,
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.state.get_mut().ctx.pending.cancel_all();
    }
}

/// Ordered message list for one consumer. Clones share state.
#[derive(Clone)]
pub struct MessagePipeline {
    inner: Arc<PipelineInner>,
}

impl MessagePipeline {
    /// A pipeline that is fed by hand through [`handle_message`](Self::handle_message).
    pub fn new(store: ChatStore, chain: HandlerChain, options: PipelineOptions) -> Self {
        let (revision, _) = watch::channel(0);
        let state = Mutex::new(State::new(options.processed_capacity));
        Self {
            inner: Arc::new(PipelineInner { store, chain, options, state, revision, cancel: CancellationToken::new() }),
        }
    }

    /// A pipeline that follows the store: seeds itself when a conversation
    /// is initialized, listens on the conversation channel while connected,
    /// and clears on an intentional disconnect.
    pub fn attach(store: ChatStore, chain: HandlerChain, options: PipelineOptions) -> Self {
        let pipeline = Self::new(store, chain, options);
        tokio::spawn(follow_store(Arc::downgrade(&pipeline.inner), pipeline.inner.cancel.clone()));
        pipeline
    }

    /// Stop following the store and cancel every timer.
    pub fn close(&self) {
        self.inner.cancel.cancel();
        self.inner.state.lock().ctx.pending.cancel_all();
    }

    /// Append a pending message, arm its timeout and publish it. Returns
    /// the temp id.
    pub fn send_message(
        &self,
        content: &str,
        message_type: MessageType,
        file_info: Option<FileInfo>,
    ) -> Result<String, ChatError> {
        let Some(conversation_id) = self.inner.store.snapshot().conversation.conversation_id else {
            tracing::error!("cannot send: conversation is not initialized");
            return Err(ChatError::NoConversation);
        };
        let temp_id = format!("temp-{}", uuid::Uuid::new_v4());
        let message = Message::outgoing(&temp_id, &conversation_id, content, message_type, file_info.clone());
        {
            let mut state = self.inner.state.lock();
            self.arm_timeout(&mut state, &temp_id);
            state.ctx.messages.push(message);
        }
        self.notify();

        if let Err(e) = self.inner.store.send_message(content, message_type, file_info, Some(temp_id.clone())) {
            tracing::warn!(%temp_id, err = %e, "publish failed; message will time out");
        }
        Ok(temp_id)
    }

    /// Re-send a failed message with its original temp id. Returns false
    /// unless the message exists and is currently failed.
    pub fn retry_message(&self, temp_id: &str) -> bool {
        let resend = {
            let mut state = self.inner.state.lock();
            let Some(message) = state
                .ctx
                .messages
                .iter_mut()
                .find(|m| m.temp_message_id.as_deref() == Some(temp_id))
            else {
                return false;
            };
            if message.status != Some(MessageStatus::Failed) {
                return false;
            }
            message.status = Some(MessageStatus::Pending);
            let resend = (message.content.clone(), message.message_type, message.file_info.clone());
            self.arm_timeout(&mut state, temp_id);
            resend
        };
        self.notify();
        tracing::info!(temp_id, "retrying message");

        let (content, message_type, file_info) = resend;
        if let Err(e) = self.inner.store.send_message(&content, message_type, file_info, Some(temp_id.to_owned())) {
            tracing::warn!(temp_id, err = %e, "retry publish failed; message will time out");
        }
        true
    }

    /// Mark a pending message failed. A no-op once it has been confirmed.
    pub fn mark_failed(&self, temp_id: &str) {
        let changed = {
            let mut state = self.inner.state.lock();
            state.ctx.pending.confirm(temp_id) && set_failed(&mut state.ctx.messages, temp_id)
        };
        if changed {
            self.notify();
        }
    }

    /// Run one inbound message through the handler chain.
    pub fn handle_message(&self, message: Message) {
        let applied = {
            let mut state = self.inner.state.lock();
            self.inner.chain.handle(message, &mut state.ctx)
        };
        if applied {
            self.notify();
        }
    }

    /// Seed the list once. Later calls are ignored until [`clear`](Self::clear).
    pub fn initialize(&self, initial: Vec<Message>) {
        {
            let mut state = self.inner.state.lock();
            if !state.loading {
                return;
            }
            for message in &initial {
                if let Some(key) = message.key() {
                    state.ctx.processed.insert(key);
                }
            }
            state.ctx.messages = initial;
            state.loading = false;
        }
        self.notify();
    }

    /// Drop every message, timer and processed id.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            state.ctx.pending.cancel_all();
            *state = State::new(self.inner.options.processed_capacity);
        }
        self.notify();
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.state.lock().ctx.messages.clone()
    }

    /// True until the list has been seeded.
    pub fn loading(&self) -> bool {
        self.inner.state.lock().loading
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().ctx.pending.len()
    }

    /// Revision counter bumped after every change to the list.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    fn notify(&self) {
        self.inner.revision.send_modify(|r| *r += 1);
    }

    fn arm_timeout(&self, state: &mut State, temp_id: &str) {
        let generation = state.ctx.pending.register(temp_id);
        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.options.message_timeout;
        let temp = temp_id.to_owned();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                MessagePipeline { inner }.expire(&temp, generation);
            }
        });
        state.ctx.pending.attach(temp_id, generation, timer.abort_handle());
    }

    fn expire(&self, temp_id: &str, generation: u64) {
        let changed = {
            let mut state = self.inner.state.lock();
            state.ctx.pending.expire(temp_id, generation) && set_failed(&mut state.ctx.messages, temp_id)
        };
        if changed {
            tracing::warn!(temp_id, "no echo before timeout; message failed");
            self.notify();
        }
    }

    /// Bring the pipeline in line with one store snapshot.
    fn sync(&self, state: &ChatState, listener: &mut Option<(String, Unsubscribe)>) {
        let connection = &state.connection;
        let conversation = &state.conversation;

        if !state.is_connected() && connection.error.is_none() && self.has_content() {
            tracing::debug!("connection closed intentionally; clearing messages");
            self.clear();
        }

        if let (ConversationPhase::Initialized, Some(id)) = (conversation.phase, &conversation.conversation_id) {
            let seed = {
                let mut pipeline = self.inner.state.lock();
                let fresh = pipeline.seeded_for.as_deref() != Some(id.as_str());
                if fresh {
                    pipeline.seeded_for = Some(id.clone());
                }
                fresh && pipeline.loading
            };
            if seed {
                let mut initial = Vec::with_capacity(conversation.recent_messages.len() + 1);
                if let Some(text) = &conversation.welcome_message {
                    initial.push(Message::welcome(id, text));
                }
                initial.extend(conversation.recent_messages.iter().cloned());
                self.initialize(initial);
            }
        }

        let wanted = match (state.is_connected(), conversation.phase, &conversation.conversation_id) {
            (true, ConversationPhase::Initialized, Some(id)) => Some(destination::conversation_channel(id)),
            _ => None,
        };
        if listener.as_ref().map(|(dest, _)| dest) == wanted.as_ref() {
            return;
        }
        if let Some((_, handle)) = listener.take() {
            handle.unsubscribe();
        }
        if let Some(channel) = wanted {
            let weak = Arc::downgrade(&self.inner);
            let handle = self.inner.store.subscribe(&channel, move |event| {
                if let (Some(inner), Inbound::Message(message)) = (weak.upgrade(), event) {
                    MessagePipeline { inner }.handle_message(message.clone());
                }
            });
            *listener = Some((channel, handle));
        }
    }

    fn has_content(&self) -> bool {
        let state = self.inner.state.lock();
        !state.loading || !state.ctx.messages.is_empty() || !state.ctx.pending.is_empty()
    }
}

fn set_failed(messages: &mut [Message], temp_id: &str) -> bool {
    match messages.iter_mut().find(|m| m.temp_message_id.as_deref() == Some(temp_id)) {
        Some(message) => {
            message.status = Some(MessageStatus::Failed);
            true
        }
        None => false,
    }
}

async fn follow_store(pipeline: Weak<PipelineInner>, cancel: CancellationToken) {
    let Some(mut rx) = pipeline.upgrade().map(|inner| inner.store.watch()) else { return };
    let mut listener: Option<(String, Unsubscribe)> = None;
    loop {
        let state = rx.borrow_and_update().clone();
        match pipeline.upgrade() {
            Some(inner) => MessagePipeline { inner }.sync(&state, &mut listener),
            None => break,
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => if changed.is_err() { break },
        }
    }
    if let Some((_, handle)) = listener.take() {
        handle.unsubscribe();
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
