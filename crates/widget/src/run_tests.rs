// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;
use crate::destination::{endpoint, temp_channel};
use crate::model::FileInfo;
use crate::test_support::{eventually, FakeBroker};

#[yare::parameterized(
    text         = { "hello there", Input::Send("hello there".into()) },
    trimmed      = { "  hi  ", Input::Send("hi".into()) },
    empty        = { "   ", Input::Empty },
    retry        = { "/retry temp-1", Input::Retry("temp-1".into()) },
    typing_on    = { "/typing on", Input::Typing(true) },
    typing_off   = { "/typing off", Input::Typing(false) },
    read         = { "/read m-9", Input::Read("m-9".into()) },
    close        = { "/close", Input::Close(None) },
    close_reason = { "/close all sorted", Input::Close(Some("all sorted".into())) },
    quit         = { "/quit", Input::Quit },
    exit         = { "/exit", Input::Quit },
    help         = { "/help", Input::Help },
)]
fn parses_input(line: &str, expected: Input) {
    assert_eq!(parse_input(line), Ok(expected));
}

#[yare::parameterized(
    retry_without_id = { "/retry", "usage: /retry" },
    typing_maybe     = { "/typing maybe", "usage: /typing" },
    read_without_id  = { "/read ", "usage: /read" },
    unknown          = { "/dance", "unknown command /dance" },
)]
fn rejects_bad_input(line: &str, expected: &str) {
    let err = parse_input(line).err().unwrap_or_default();
    assert!(err.contains(expected), "got: {err:?}");
}

#[test]
fn formats_message_states() {
    let mut msg = Message::outgoing("temp-1", "c1", "hello", MessageType::Text, None);
    assert!(format_message(&msg).ends_with("you: hello (sending)"));

    msg.status = Some(MessageStatus::Failed);
    assert!(format_message(&msg).ends_with("you: hello (failed: /retry temp-1)"));

    let welcome = Message::welcome("c1", "How can we help?");
    assert!(format_message(&welcome).ends_with("Agent: How can we help?"));

    let mut broken = Message::fallback("garbage");
    broken.created_at = "not a time".into();
    assert_eq!(format_message(&broken), "[--:--] System: garbage");
}

#[test]
fn formats_attachments() {
    let file = FileInfo {
        file_id: "f1".into(),
        file_name: "scan.pdf".into(),
        file_url: "https://cdn.example.com/scan.pdf".into(),
        file_size: 1024,
        mime_type: "application/pdf".into(),
        width: None,
        height: None,
    };
    let msg = Message::outgoing("temp-1", "c1", "", MessageType::File, Some(file));
    assert!(format_message(&msg).contains("[file] scan.pdf (https://cdn.example.com/scan.pdf)"));
}

#[test]
fn diff_prints_new_and_changed_rows_only() {
    let mut shown = Vec::new();
    let mut messages = vec![Message::welcome("c1", "hi")];
    assert_eq!(diff_lines(&mut shown, &messages).len(), 1);
    assert!(diff_lines(&mut shown, &messages).is_empty());

    messages.push(Message::outgoing("temp-1", "c1", "hello", MessageType::Text, None));
    let lines = diff_lines(&mut shown, &messages);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("(sending)"));

    messages[1].status = Some(MessageStatus::Sent);
    let lines = diff_lines(&mut shown, &messages);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].ends_with("you: hello"));

    assert!(diff_lines(&mut shown, &[]).is_empty());
    assert!(shown.is_empty());
}

fn test_config() -> WidgetConfig {
    WidgetConfig::parse_from([
        "talkwidget",
        "--hospital-id",
        "H1",
        "--ws-url",
        "ws://broker/ws",
        "--heartbeat-out-ms",
        "0",
        "--heartbeat-in-ms",
        "0",
        "--reconnect-delay-ms",
        "50",
        "--reconnect-max-delay-ms",
        "400",
    ])
}

async fn answer_init(broker: &FakeBroker, conversation_id: &str) -> anyhow::Result<()> {
    let sent = broker.next_send().await?;
    anyhow::ensure!(sent.destination == endpoint::INIT, "unexpected send to {}", sent.destination);
    assert_eq!(sent.json()?["hospitalId"], "H1");
    let temp_id = sent.json()?["tempId"].as_str().unwrap_or_default().to_owned();
    broker.publish_json(
        &temp_channel(&temp_id),
        &json!({
            "type": "connected",
            "conversationId": conversation_id,
            "visitorId": "v1",
            "welcomeMessage": "How can we help?",
        }),
    )?;
    Ok(())
}

#[tokio::test]
async fn client_initializes_sends_and_quits() -> anyhow::Result<()> {
    let broker = FakeBroker::new();
    let session = prepare(test_config(), broker.transport())?;
    let store = session.store.clone();
    let pipeline = session.pipeline.clone();

    let (mut keyboard, input) = tokio::io::duplex(1024);
    let (output, mut screen) = tokio::io::duplex(64 * 1024);
    let client = tokio::spawn(session.run(BufReader::new(input), output));

    answer_init(&broker, "c1").await?;
    eventually(|| pipeline.snapshot().len() == 1).await?;

    keyboard.write_all(b"hello\n").await?;
    let sent = broker.next_send().await?;
    assert_eq!(sent.destination, endpoint::MESSAGE);
    assert_eq!(sent.json()?["content"], "hello");
    eventually(|| pipeline.snapshot().len() == 2).await?;

    keyboard.write_all(b"/bogus\n/quit\n").await?;
    client.await??;
    assert!(!store.snapshot().is_connected());

    let mut printed = String::new();
    screen.read_to_string(&mut printed).await?;
    assert!(printed.contains("* connected"), "{printed}");
    assert!(printed.contains("How can we help?"), "{printed}");
    assert!(printed.contains("you: hello (sending)"), "{printed}");
    assert!(printed.contains("unknown command /bogus"), "{printed}");
    Ok(())
}

#[tokio::test]
async fn client_reinitializes_after_reconnect() -> anyhow::Result<()> {
    let broker = FakeBroker::new();
    let session = prepare(test_config(), broker.transport())?;
    let store = session.store.clone();
    let shutdown = session.shutdown.clone();

    let (_keyboard, input) = tokio::io::duplex(1024);
    let (output, _screen) = tokio::io::duplex(64 * 1024);
    let client = tokio::spawn(session.run(BufReader::new(input), output));

    answer_init(&broker, "c1").await?;
    eventually(|| store.snapshot().conversation_id() == Some("c1")).await?;

    broker.drop_connections();
    answer_init(&broker, "c2").await?;
    eventually(|| store.snapshot().conversation_id() == Some("c2")).await?;
    assert_eq!(broker.connects(), 2);

    shutdown.cancel();
    client.await??;
    Ok(())
}

#[tokio::test]
async fn close_command_publishes_and_exits() -> anyhow::Result<()> {
    let broker = FakeBroker::new();
    let session = prepare(test_config(), broker.transport())?;
    let store = session.store.clone();

    let (mut keyboard, input) = tokio::io::duplex(1024);
    let (output, _screen) = tokio::io::duplex(64 * 1024);
    let client = tokio::spawn(session.run(BufReader::new(input), output));

    answer_init(&broker, "c1").await?;
    eventually(|| store.snapshot().conversation_id() == Some("c1")).await?;

    keyboard.write_all(b"/close resolved\n").await?;
    let sent = broker.next_send().await?;
    assert_eq!(sent.destination, endpoint::CLOSE);
    assert_eq!(sent.json()?["closeReason"], "resolved");

    client.await??;
    assert!(store.snapshot().connection.closed);
    Ok(())
}

#[tokio::test]
async fn prepare_rejects_invalid_config() {
    let mut config = test_config();
    config.hospital_id = String::new();
    assert!(prepare(config, FakeBroker::new().transport()).is_err());
}
