// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol adapter: STOMP frames over a duplex text transport.

pub mod client;
pub mod frame;
pub mod payload;

pub use client::{
    BackoffMode, ClientEvent, ConnectionOptions, Disconnect, HeartbeatOptions, ReconnectOptions,
    StompClient, Subscription,
};
pub use payload::{decode_body, Payload};
