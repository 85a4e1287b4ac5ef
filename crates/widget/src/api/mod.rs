// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the chat backend's REST endpoints.

mod chatrooms;
mod files;
mod messages;
mod users;

pub use chatrooms::{ChatRoom, CreateChatRoomRequest, MarkChatRoomReadRequest};
pub use files::{
    format_file_size, is_image_type, is_valid_file_size, is_valid_file_type, upload_error_message, UploadFile,
    MAX_FILE_SIZE, UPLOAD_PATH,
};
pub use messages::{ListMessagesParams, MessagesPage, ReadMessageRequest, RoomMessage, SendMessageRequest};
pub use users::{CreateUserRequest, UpdateUserProfileRequest, UpdateUserStatusRequest, User, UserStatus};

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A failed REST call. `status` is 0 when no HTTP response was received.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (status {status})")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), code: None, details: None }
    }

    pub fn is_network_error(&self) -> bool {
        self.status == 0
    }

    pub fn is_server_error(&self) -> bool {
        self.status >= 500
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    fn from_transport(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::new(0, "Request timeout");
        }
        tracing::debug!(err = %e, "request failed before a response arrived");
        Self::new(0, "Network error: Unable to connect to server")
    }
}

/// Error body returned by the backend.
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<serde_json::Value>,
}

/// Count returned by the unread-count endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    pub unread_count: u64,
}

/// JSON-over-HTTP client bound to one backend base URL.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        crate::ensure_crypto();
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, client }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        format!("{}{}", self.base_url, path)
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(self.request(Method::GET, path)).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    pub(crate) async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send(self.request(Method::PATCH, path).json(body)).await
    }

    pub(crate) async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(self.request(Method::DELETE, path)).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        tracing::debug!(%method, path, "api request");
        self.client.request(method, self.url(path))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let (status, bytes) = self.fetch(req).await?;
        decode_success(status, &bytes)
    }

    /// Status and raw body of a successful response.
    async fn fetch(&self, req: RequestBuilder) -> Result<(StatusCode, Vec<u8>), ApiError> {
        let resp = req.send().await.map_err(|e| ApiError::from_transport(&e))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| ApiError::from_transport(&e))?;
        if !status.is_success() {
            let err = error_from_body(status, &bytes);
            tracing::warn!(status = err.status, message = %err.message, "api error response");
            return Err(err);
        }
        Ok((status, bytes.to_vec()))
    }
}

/// Decode a 2xx body. No-content and empty bodies decode as JSON `null`.
fn decode_success<T: DeserializeOwned>(status: StatusCode, bytes: &[u8]) -> Result<T, ApiError> {
    let body: &[u8] = if status == StatusCode::NO_CONTENT || bytes.is_empty() { b"null" } else { bytes };
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(status.as_u16(), format!("invalid response body: {e}")))
}

fn error_from_body(status: StatusCode, bytes: &[u8]) -> ApiError {
    match serde_json::from_slice::<ErrorEnvelope>(bytes) {
        Ok(envelope) => ApiError {
            status: status.as_u16(),
            message: envelope.message.unwrap_or_else(|| "Unknown error occurred".to_owned()),
            code: envelope.code,
            details: envelope.details,
        },
        Err(_) => ApiError::new(
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error occurred"),
        ),
    }
}

/// `?k=v&...` from the pairs whose value is present; empty when none are.
pub fn build_query(params: &[(&str, Option<String>)]) -> String {
    let mut url = match reqwest::Url::parse("http://query.invalid/") {
        Ok(url) => url,
        Err(_) => return String::new(),
    };
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            if let Some(value) = value {
                pairs.append_pair(key, value);
            }
        }
    }
    match url.query() {
        Some(query) if !query.is_empty() => format!("?{query}"),
        _ => String::new(),
    }
}

/// Percent-encode one path segment.
pub fn encode_segment(segment: &str) -> String {
    let mut url = match reqwest::Url::parse("http://segment.invalid/") {
        Ok(url) => url,
        Err(_) => return segment.to_owned(),
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(segment);
    }
    url.path().trim_start_matches('/').to_owned()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
