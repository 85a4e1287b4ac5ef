// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::ChatStore;
use crate::model::Inbound;
use crate::subscription::Unsubscribe;

impl ChatStore {
    /// Listen on `destination`. Returns an inactive handle unless connected.
    pub fn subscribe(&self, destination: &str, callback: impl Fn(&Inbound) + Send + Sync + 'static) -> Unsubscribe {
        if !self.snapshot().is_connected() {
            tracing::warn!(destination, "subscribe called while not connected");
            return Unsubscribe::noop();
        }
        self.inner.subscriptions.subscribe(destination, callback)
    }

    /// Drop every listener on `destination`.
    pub fn unsubscribe(&self, destination: &str) {
        self.inner.subscriptions.unsubscribe(destination);
    }
}
