// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::Deserialize;

use super::{ApiClient, ApiError};
use crate::model::FileInfo;

/// Upload endpoint for widget attachments.
pub const UPLOAD_PATH: &str = "/api/widget/files/upload";

/// Largest attachment accepted before sending (10 MiB).
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// An attachment ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Read `path`, guessing the MIME type from its extension.
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let mime_type = mime_for_name(&name).to_owned();
        Ok(Self { name, mime_type, bytes })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

impl ApiClient {
    /// Upload an attachment as multipart form data with `file` and
    /// `hospitalId` parts.
    pub async fn upload_file(&self, hospital_id: &str, file: UploadFile) -> Result<FileInfo, ApiError> {
        if !is_valid_file_size(file.size(), MAX_FILE_SIZE) {
            return Err(ApiError::new(413, format!("{} exceeds {}", file.name, format_file_size(MAX_FILE_SIZE))));
        }
        let size = file.size();
        let part = Part::bytes(file.bytes)
            .file_name(file.name.clone())
            .mime_str(&file.mime_type)
            .map_err(|e| ApiError::new(0, format!("invalid mime type {}: {e}", file.mime_type)))?;
        let form = Form::new().part("file", part).text("hospitalId", hospital_id.to_owned());

        tracing::info!(name = %file.name, size, "uploading file");
        let envelope: DataEnvelope<FileInfo> = self.send(self.request(Method::POST, UPLOAD_PATH).multipart(form)).await?;
        Ok(envelope.data)
    }

    /// Fetch a file's bytes. `url` may be absolute or a path on this backend.
    pub async fn download_file(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        let (_, bytes) = self.fetch(self.request(Method::GET, url)).await?;
        Ok(bytes)
    }
}

/// Human-readable size: `0 B`, `512 B`, `1.5 KB`, `10 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_owned();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.fract() == 0.0 {
        format!("{rounded:.0} {}", UNITS[unit])
    } else {
        format!("{rounded:.1} {}", UNITS[unit])
    }
}

pub fn is_valid_file_size(size: u64, max: u64) -> bool {
    size <= max
}

/// Match `mime_type` against accept patterns such as `image/*`, `*/*` or
/// an exact type.
pub fn is_valid_file_type(mime_type: &str, accepted: &[&str]) -> bool {
    accepted.iter().any(|pattern| match pattern.strip_suffix("/*") {
        Some("*") => true,
        Some(category) => mime_type.strip_prefix(category).is_some_and(|rest| rest.starts_with('/')),
        None => mime_type == *pattern,
    })
}

pub fn is_image_type(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

/// User-facing text for a failed upload.
pub fn upload_error_message(err: &ApiError) -> &'static str {
    match err.status {
        0 => "Check your network connection.",
        400 => "The request was invalid.",
        401 => "Sign-in required.",
        403 => "You are not allowed to upload files.",
        404 => "Upload server not found.",
        413 => "The file is too large.",
        415 => "This file type is not supported.",
        429 => "Too many requests. Try again shortly.",
        500 => "Server error.",
        502 => "Cannot reach the server.",
        503 => "The server is temporarily unavailable.",
        _ => "File upload failed.",
    }
}

fn mime_for_name(name: &str) -> &'static str {
    let ext = match name.rfind('.') {
        Some(i) if i > 0 => name[i + 1..].to_ascii_lowercase(),
        _ => String::new(),
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
#[path = "files_tests.rs"]
mod tests;
