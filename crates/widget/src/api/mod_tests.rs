// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[test]
fn query_skips_missing_values() {
    let query = build_query(&[("userId", Some("u 1".into())), ("page", None), ("size", Some("20".into()))]);
    assert_eq!(query, "?userId=u+1&size=20");
}

#[test]
fn query_is_empty_without_values() {
    assert_eq!(build_query(&[("page", None)]), "");
    assert_eq!(build_query(&[]), "");
}

#[yare::parameterized(
    plain  = { "abc123", "abc123" },
    email  = { "a@b.com", "a@b.com" },
    slash  = { "a/b", "a%2Fb" },
    space  = { "a b", "a%20b" },
    query  = { "a?b#c", "a%3Fb%23c" },
)]
fn encodes_path_segments(raw: &str, expected: &str) {
    assert_eq!(encode_segment(raw), expected);
}

#[test]
fn error_envelope_is_parsed() {
    let body = json!({ "message": "nope", "code": "E_NOPE", "details": { "field": "id" } }).to_string();
    let err = error_from_body(StatusCode::BAD_REQUEST, body.as_bytes());
    assert_eq!(err.status, 400);
    assert_eq!(err.message, "nope");
    assert_eq!(err.code.as_deref(), Some("E_NOPE"));
    assert_eq!(err.details, Some(json!({ "field": "id" })));
    assert!(err.is_client_error());
}

#[test]
fn non_json_error_falls_back_to_status_text() {
    let err = error_from_body(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>");
    assert_eq!(err.message, "Bad Gateway");
    assert!(err.is_server_error());
}

#[test]
fn json_error_without_message_is_unknown() {
    let err = error_from_body(StatusCode::NOT_FOUND, b"{}");
    assert_eq!(err.message, "Unknown error occurred");
}

#[test]
fn empty_success_decodes_as_null() -> anyhow::Result<()> {
    decode_success::<()>(StatusCode::NO_CONTENT, b"")?;
    decode_success::<()>(StatusCode::OK, b"")?;
    let missing: Option<UnreadCount> = decode_success(StatusCode::OK, b"")?;
    assert_eq!(missing, None);
    let count: UnreadCount = decode_success(StatusCode::OK, br#"{"unreadCount":3}"#)?;
    assert_eq!(count.unread_count, 3);
    Ok(())
}

#[test]
fn base_url_is_normalized() {
    let client = ApiClient::new("http://localhost:8080/");
    assert_eq!(client.base_url(), "http://localhost:8080");
    assert_eq!(client.url("/api/users"), "http://localhost:8080/api/users");
    assert_eq!(client.url("https://cdn.example.com/f.png"), "https://cdn.example.com/f.png");
}

#[test]
fn network_errors_have_status_zero() {
    assert!(ApiError::new(0, "Request timeout").is_network_error());
    assert!(!ApiError::new(500, "boom").is_network_error());
}
