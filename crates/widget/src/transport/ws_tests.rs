// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    http = { "http://localhost:8080/ws/widget", "ws://localhost:8080/ws/widget/websocket" },
    https = { "https://chat.example.com/ws/widget", "wss://chat.example.com/ws/widget/websocket" },
    trailing_slash = { "http://localhost:8080/ws/widget/", "ws://localhost:8080/ws/widget/websocket" },
    already_ws = { "ws://localhost:9000/raw", "ws://localhost:9000/raw" },
)]
fn converts_sockjs_endpoint(input: &str, expected: &str) {
    assert_eq!(sockjs_websocket_url(input), expected);
}

#[tokio::test]
async fn rejects_non_websocket_scheme() {
    let result = WsTransport::new().open("http://localhost:1/ws").await;
    assert!(matches!(result, Err(TransportError::InvalidUrl { .. })));
}
