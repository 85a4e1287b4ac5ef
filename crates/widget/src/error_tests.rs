// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    transport = { ChatError::Transport("reset".into()), ErrorCode::Transport, true },
    protocol = { ChatError::Protocol("bad frame".into()), ErrorCode::Protocol, true },
    encode = { ChatError::Encode("nan".into()), ErrorCode::Protocol, true },
    timeout = { ChatError::Timeout { destination: "/topic/x".into() }, ErrorCode::Correlation, false },
    cancelled = { ChatError::Cancelled { destination: "/topic/x".into() }, ErrorCode::Correlation, false },
    not_connected = { ChatError::NotConnected, ErrorCode::Misuse, false },
    no_conversation = { ChatError::NoConversation, ErrorCode::Misuse, false },
)]
fn classifies_errors(error: ChatError, code: ErrorCode, transient: bool) {
    assert_eq!(error.code(), code);
    assert_eq!(error.is_transient(), transient);
}

#[test]
fn timeout_message_names_destination() {
    let err = ChatError::Timeout { destination: "/topic/widget/temp/t1".into() };
    assert_eq!(err.to_string(), "timeout waiting for message on /topic/widget/temp/t1");
}

#[test]
fn code_display_matches_as_str() {
    assert_eq!(ErrorCode::Correlation.to_string(), "CORRELATION");
    assert_eq!(ErrorCode::Misuse.as_str(), "MISUSE");
}
