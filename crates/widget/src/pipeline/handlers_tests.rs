// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::model::MessageType;

fn inbound(id: &str, sender: SenderType, kind: MessageType) -> Message {
    let mut msg = Message::fallback("");
    msg.message_id = id.to_owned();
    msg.sender_type = sender;
    msg.message_type = kind;
    msg.content = format!("content of {id}");
    msg
}

fn ids(ctx: &HandlerContext) -> Vec<&str> {
    ctx.messages.iter().map(|m| m.message_id.as_str()).collect()
}

// ── Dedup ──────────────────────────────────────────────────────────────

#[test]
fn same_message_id_is_applied_once() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    let msg = inbound("m1", SenderType::System, MessageType::System);

    assert!(chain.handle(msg.clone(), &mut ctx));
    assert!(!chain.handle(msg, &mut ctx));
    assert_eq!(ids(&ctx), vec!["m1"]);
}

#[test]
fn loading_placeholders_collapse_to_one() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    ctx.messages.push(inbound("loading-0", SenderType::Agent, MessageType::Loading));

    chain.handle(inbound("loading-1", SenderType::Agent, MessageType::Loading), &mut ctx);
    chain.handle(inbound("loading-2", SenderType::Agent, MessageType::Loading), &mut ctx);

    assert_eq!(ctx.messages.iter().filter(|m| m.is_loading()).count(), 1);
    assert!(ctx.processed.is_empty());
}

#[test]
fn loading_is_exempt_from_dedup() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    let loading = inbound("loading", SenderType::Agent, MessageType::Loading);

    chain.handle(loading.clone(), &mut ctx);
    ctx.messages.clear();
    assert!(chain.handle(loading, &mut ctx));
    assert_eq!(ids(&ctx), vec!["loading"]);
}

#[test]
fn processed_ids_evict_oldest() {
    let mut processed = ProcessedIds::with_capacity(2);
    assert!(processed.insert("a"));
    assert!(processed.insert("b"));
    assert!(processed.insert("c"));
    assert!(!processed.contains("a"));
    assert!(processed.contains("b") && processed.contains("c"));
    assert_eq!(processed.len(), 2);
    assert!(!processed.insert("c"));
}

// ── User echo ──────────────────────────────────────────────────────────

#[test]
fn echo_replaces_optimistic_entry_in_place() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    ctx.messages.push(inbound("m0", SenderType::Agent, MessageType::Text));
    ctx.messages.push(Message::outgoing("temp-1", "c1", "hi", MessageType::Text, None));
    ctx.messages.push(inbound("m2", SenderType::Agent, MessageType::Text));
    ctx.pending.register("temp-1");

    let mut echo = inbound("m1", SenderType::User, MessageType::Text);
    echo.temp_message_id = Some("temp-1".into());
    chain.handle(echo, &mut ctx);

    assert_eq!(ids(&ctx), vec!["m0", "m1", "m2"]);
    assert_eq!(ctx.messages[1].status, Some(MessageStatus::Sent));
    assert_eq!(ctx.messages[1].temp_message_id, None);
    assert!(ctx.pending.is_empty());
}

#[test]
fn echo_without_local_entry_appends() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    let mut echo = inbound("m1", SenderType::User, MessageType::Text);
    echo.temp_message_id = Some("temp-other-device".into());

    chain.handle(echo, &mut ctx);
    chain.handle(inbound("m2", SenderType::User, MessageType::Text), &mut ctx);

    assert_eq!(ids(&ctx), vec!["m1", "m2"]);
    assert_eq!(ctx.messages[0].status, Some(MessageStatus::Sent));
}

#[test]
fn late_echo_for_failed_message_is_appended() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    let mut failed = Message::outgoing("temp-1", "c1", "hi", MessageType::Text, None);
    failed.status = Some(MessageStatus::Failed);
    ctx.messages.push(failed);

    let mut echo = inbound("m1", SenderType::User, MessageType::Text);
    echo.temp_message_id = Some("temp-1".into());
    chain.handle(echo, &mut ctx);

    assert_eq!(ctx.messages.len(), 2);
    assert_eq!(ctx.messages[0].status, Some(MessageStatus::Failed));
    assert_eq!(ctx.messages[0].temp_message_id.as_deref(), Some("temp-1"));
    assert_eq!(ctx.messages[1].message_id, "m1");
    assert_eq!(ctx.messages[1].status, Some(MessageStatus::Sent));
}

// ── Agent ──────────────────────────────────────────────────────────────

#[test]
fn agent_reply_replaces_loading_placeholder() {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();
    ctx.messages.push(inbound("u1", SenderType::User, MessageType::Text));
    ctx.messages.push(inbound("loading", SenderType::Ai, MessageType::Loading));

    chain.handle(inbound("a1", SenderType::Agent, MessageType::Text), &mut ctx);

    assert_eq!(ids(&ctx), vec!["u1", "a1"]);
    assert!(ctx.messages[1].animate);
}

#[yare::parameterized(
    agent = { SenderType::Agent },
    ai = { SenderType::Ai },
)]
fn only_latest_reply_animates(sender: SenderType) {
    let chain = HandlerChain::default();
    let mut ctx = HandlerContext::default();

    chain.handle(inbound("a1", sender, MessageType::Text), &mut ctx);
    chain.handle(inbound("a2", sender, MessageType::Text), &mut ctx);

    assert_eq!(ids(&ctx), vec!["a1", "a2"]);
    assert!(!ctx.messages[0].animate);
    assert!(ctx.messages[1].animate);
}

// ── Chain ──────────────────────────────────────────────────────────────

struct UppercaseSystem;

impl MessageHandler for UppercaseSystem {
    fn can_handle(&self, message: &Message) -> bool {
        message.sender_type == SenderType::System
    }

    fn handle(&self, mut message: Message, ctx: &mut HandlerContext) {
        message.content = message.content.to_uppercase();
        ctx.messages.push(message);
    }
}

#[test]
fn custom_handlers_run_first() {
    let chain = HandlerChain::with_custom(vec![Box::new(UppercaseSystem)]);
    let mut ctx = HandlerContext::default();

    chain.handle(inbound("s1", SenderType::System, MessageType::System), &mut ctx);
    chain.handle(inbound("a1", SenderType::Agent, MessageType::Text), &mut ctx);

    assert_eq!(ctx.messages[0].content, "CONTENT OF S1");
    assert_eq!(ctx.messages[1].content, "content of a1");
}

#[test]
fn stale_generation_does_not_expire_rearmed_entry() {
    let mut pending = PendingRegistry::default();
    let first = pending.register("temp-1");
    let second = pending.register("temp-1");

    assert!(!pending.expire("temp-1", first));
    assert!(pending.contains("temp-1"));
    assert!(pending.expire("temp-1", second));
    assert!(!pending.confirm("temp-1"));
}
