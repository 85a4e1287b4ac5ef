// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound reconciliation: an ordered chain of handlers, first match wins.

use std::collections::HashMap;

use indexmap::IndexSet;
use tokio::task::AbortHandle;

use crate::model::{Message, MessageStatus, SenderType};

/// Default bound on remembered message ids.
pub const PROCESSED_CAPACITY: usize = 2048;

/// Insertion-ordered set of handled message ids; the oldest id is evicted
/// once capacity is reached.
#[derive(Debug, Clone)]
pub struct ProcessedIds {
    ids: IndexSet<String>,
    capacity: usize,
}

impl Default for ProcessedIds {
    fn default() -> Self {
        Self::with_capacity(PROCESSED_CAPACITY)
    }
}

impl ProcessedIds {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { ids: IndexSet::new(), capacity: capacity.max(1) }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if `id` was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.ids.len() >= self.capacity {
            self.ids.shift_remove_index(0);
        }
        self.ids.insert(id.to_owned())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[derive(Debug)]
struct PendingEntry {
    generation: u64,
    timer: Option<AbortHandle>,
}

/// Outbound messages awaiting their echo: temp id → armed timeout.
///
/// Each arm gets a fresh generation so a stale timer can never fail a
/// message that was confirmed or re-armed after it was scheduled.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: HashMap<String, PendingEntry>,
    next_generation: u64,
}

impl PendingRegistry {
    /// Register `temp_id`, replacing (and cancelling) any previous entry.
    pub fn register(&mut self, temp_id: &str) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        let previous = self.entries.insert(temp_id.to_owned(), PendingEntry { generation, timer: None });
        if let Some(timer) = previous.and_then(|p| p.timer) {
            timer.abort();
        }
        generation
    }

    /// Attach the timer for the entry registered as `generation`.
    pub fn attach(&mut self, temp_id: &str, generation: u64, timer: AbortHandle) {
        match self.entries.get_mut(temp_id) {
            Some(entry) if entry.generation == generation => entry.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    pub fn contains(&self, temp_id: &str) -> bool {
        self.entries.contains_key(temp_id)
    }

    /// Remove the entry and cancel its timer. Returns whether it existed.
    pub fn confirm(&mut self, temp_id: &str) -> bool {
        match self.entries.remove(temp_id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Remove the entry only if it is still the `generation` that armed the
    /// firing timer.
    pub fn expire(&mut self, temp_id: &str, generation: u64) -> bool {
        match self.entries.get(temp_id) {
            Some(entry) if entry.generation == generation => {
                self.entries.remove(temp_id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cancel every timer and forget all entries.
    pub fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }
}

/// Mutable pipeline state handed to handlers.
#[derive(Debug, Default)]
pub struct HandlerContext {
    pub messages: Vec<Message>,
    pub processed: ProcessedIds,
    pub pending: PendingRegistry,
}

pub trait MessageHandler: Send + Sync {
    fn can_handle(&self, message: &Message) -> bool;
    fn handle(&self, message: Message, ctx: &mut HandlerContext);
}

/// Confirms pending optimistic sends by temp id; otherwise appends.
pub struct UserEchoHandler;

impl MessageHandler for UserEchoHandler {
    fn can_handle(&self, message: &Message) -> bool {
        message.sender_type == SenderType::User
    }

    fn handle(&self, mut message: Message, ctx: &mut HandlerContext) {
        let Some(temp_id) = message.temp_message_id.take() else {
            ctx.messages.push(message);
            return;
        };
        message.status = Some(MessageStatus::Sent);
        // Only a live pending entry is replaced; a failed or unknown one
        // gets the echo appended next to it.
        let slot = if ctx.pending.confirm(&temp_id) {
            ctx.messages.iter_mut().find(|m| m.temp_message_id.as_deref() == Some(temp_id.as_str()))
        } else {
            None
        };
        match slot {
            Some(existing) => {
                tracing::debug!(%temp_id, message_id = %message.message_id, "confirmed optimistic message");
                *existing = message;
            }
            None => ctx.messages.push(message),
        }
    }
}

/// Keeps at most one LOADING placeholder in the list.
pub struct LoadingHandler;

impl MessageHandler for LoadingHandler {
    fn can_handle(&self, message: &Message) -> bool {
        message.is_loading()
    }

    fn handle(&self, message: Message, ctx: &mut HandlerContext) {
        if !ctx.messages.iter().any(Message::is_loading) {
            ctx.messages.push(message);
        }
    }
}

/// Agent and AI replies take over the LOADING placeholder when present.
pub struct AgentHandler;

impl MessageHandler for AgentHandler {
    fn can_handle(&self, message: &Message) -> bool {
        matches!(message.sender_type, SenderType::Agent | SenderType::Ai)
    }

    fn handle(&self, mut message: Message, ctx: &mut HandlerContext) {
        for existing in &mut ctx.messages {
            existing.animate = false;
        }
        message.animate = true;
        match ctx.messages.iter().position(Message::is_loading) {
            Some(index) => ctx.messages[index] = message,
            None => ctx.messages.push(message),
        }
    }
}

/// Catch-all: append.
pub struct DefaultHandler;

impl MessageHandler for DefaultHandler {
    fn can_handle(&self, _: &Message) -> bool {
        true
    }

    fn handle(&self, message: Message, ctx: &mut HandlerContext) {
        ctx.messages.push(message);
    }
}

pub struct HandlerChain {
    handlers: Vec<Box<dyn MessageHandler>>,
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::with_custom(Vec::new())
    }
}

impl HandlerChain {
    /// The built-in chain with `custom` handlers tried first.
    pub fn with_custom(custom: Vec<Box<dyn MessageHandler>>) -> Self {
        let mut handlers = custom;
        handlers.push(Box::new(UserEchoHandler));
        handlers.push(Box::new(LoadingHandler));
        handlers.push(Box::new(AgentHandler));
        handlers.push(Box::new(DefaultHandler));
        Self { handlers }
    }

    /// Apply `message` to `ctx`. Returns false if it was dropped as a
    /// duplicate.
    pub fn handle(&self, message: Message, ctx: &mut HandlerContext) -> bool {
        if !message.is_loading() {
            if let Some(key) = message.key() {
                if !ctx.processed.insert(key) {
                    tracing::debug!(key, "dropping duplicate message");
                    return false;
                }
            }
        }
        match self.handlers.iter().find(|h| h.can_handle(&message)) {
            Some(handler) => {
                handler.handle(message, ctx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
