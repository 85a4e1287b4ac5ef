// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{build_query, encode_segment, ApiClient, ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserStatus {
    Online,
    Offline,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub status: Option<UserStatus>,
    #[serde(default)]
    pub last_seen_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    /// Fields this client does not model.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub nickname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_image_url: Option<String>,
}

impl ApiClient {
    pub async fn create_user(&self, req: &CreateUserRequest) -> Result<User, ApiError> {
        self.post("/api/users", req).await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, ApiError> {
        self.get(&format!("/api/users/{}", encode_segment(user_id))).await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<User, ApiError> {
        self.get(&format!("/api/users/email/{}", encode_segment(email))).await
    }

    pub async fn search_users(&self, keyword: &str) -> Result<Vec<User>, ApiError> {
        let query = build_query(&[("keyword", Some(keyword.to_owned()))]);
        self.get(&format!("/api/users/search{query}")).await
    }

    pub async fn update_user_status(&self, user_id: &str, req: &UpdateUserStatusRequest) -> Result<User, ApiError> {
        self.patch(&format!("/api/users/{}/status", encode_segment(user_id)), req).await
    }

    pub async fn update_user_profile(
        &self,
        user_id: &str,
        req: &UpdateUserProfileRequest,
    ) -> Result<User, ApiError> {
        self.patch(&format!("/api/users/{}/profile", encode_segment(user_id)), req).await
    }
}
