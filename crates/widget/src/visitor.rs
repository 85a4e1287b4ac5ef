// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Visitor identity persistence: the backend recognizes returning visitors
//! by the id it issued on their first init.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// On-disk shape of the visitor file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedVisitor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_id: Option<String>,
}

struct Inner {
    path: Option<PathBuf>,
    visitor_id: Option<String>,
}

/// Visitor id cache backed by an optional JSON file.
#[derive(Clone)]
pub struct VisitorStore {
    inner: Arc<Mutex<Inner>>,
}

impl VisitorStore {
    /// Not persisted; forgotten with the process.
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner { path: None, visitor_id: None })) }
    }

    /// Backed by `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let visitor_id = match load(&path) {
            Ok(persisted) => persisted.visitor_id,
            Err(e) => {
                if path.exists() {
                    tracing::warn!(path = %path.display(), err = %e, "ignoring unreadable visitor file");
                }
                None
            }
        };
        Self { inner: Arc::new(Mutex::new(Inner { path: Some(path), visitor_id })) }
    }

    pub fn visitor_id(&self) -> Option<String> {
        self.inner.lock().visitor_id.clone()
    }

    /// Remember `id` and persist it.
    pub fn set_visitor_id(&self, id: &str) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.visitor_id = Some(id.to_owned());
        match &inner.path {
            Some(path) => save(path, &PersistedVisitor { visitor_id: inner.visitor_id.clone() }),
            None => Ok(()),
        }
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        inner.visitor_id = None;
        match &inner.path {
            Some(path) if path.exists() => Ok(std::fs::remove_file(path)?),
            _ => Ok(()),
        }
    }
}

pub fn load(path: &Path) -> anyhow::Result<PersistedVisitor> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Replace `path` with `visitor` in one rename. The scratch file lives in
/// the same directory so the rename never crosses filesystems.
pub fn save(path: &Path, visitor: &PersistedVisitor) -> anyhow::Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            dir
        }
        None => Path::new("."),
    };
    let mut scratch = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut scratch, visitor)?;
    scratch.as_file().sync_all()?;
    scratch.persist(path)?;
    Ok(())
}

#[cfg(test)]
#[path = "visitor_tests.rs"]
mod tests;
