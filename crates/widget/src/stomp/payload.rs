// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use serde_json::Value;

use super::frame::Frame;
use crate::model::{Inbound, Message};

/// An inbound MESSAGE frame translated for application code.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub id: String,
    pub destination: String,
    pub headers: HashMap<String, String>,
    pub body: Inbound,
    /// Receive time, epoch milliseconds.
    pub timestamp: u64,
}

impl Payload {
    pub(crate) fn from_frame(frame: &Frame, fallback_destination: &str) -> Self {
        let mut headers = HashMap::with_capacity(frame.headers.len());
        for (k, v) in &frame.headers {
            headers.entry(k.clone()).or_insert_with(|| v.clone());
        }
        Self {
            id: frame
                .get("message-id")
                .map(str::to_owned)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            destination: frame.get("destination").unwrap_or(fallback_destination).to_owned(),
            headers,
            body: decode_body(&frame.body),
            timestamp: crate::epoch_ms(),
        }
    }
}

/// Decode a frame body into a typed event. Never fails: anything that is
/// not recognizable becomes a SYSTEM fallback message carrying the raw text.
pub fn decode_body(raw: &str) -> Inbound {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => decode_value(value, raw),
        Err(e) => {
            tracing::debug!(err = %e, "inbound body is not JSON");
            Inbound::Message(Message::fallback(raw))
        }
    }
}

fn decode_value(value: Value, raw: &str) -> Inbound {
    match value {
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => decode_value(first, raw),
            None => Inbound::Message(Message::fallback(raw)),
        },
        Value::Object(ref map) if map.contains_key("type") => {
            match serde_json::from_value::<Inbound>(value.clone()) {
                Ok(event) => event,
                Err(e) => {
                    tracing::debug!(err = %e, "unrecognized tagged body");
                    as_message(value, raw)
                }
            }
        }
        Value::Object(_) => as_message(value, raw),
        _ => Inbound::Message(Message::fallback(raw)),
    }
}

fn as_message(value: Value, raw: &str) -> Inbound {
    Inbound::Message(serde_json::from_value(value).unwrap_or_else(|_| Message::fallback(raw)))
}

#[cfg(test)]
#[path = "payload_tests.rs"]
mod tests;
