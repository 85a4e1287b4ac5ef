// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multiplexes many listeners per destination onto one broker subscription.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ChatError;
use crate::model::Inbound;
use crate::stomp::{StompClient, Subscription};

pub type Callback = Arc<dyn Fn(&Inbound) + Send + Sync>;

/// Default bound for [`SubscriptionManager::subscribe_once`].
pub const ONCE_TIMEOUT: Duration = Duration::from_secs(30);

struct Entry {
    subscription: Subscription,
    callbacks: IndexMap<u64, Callback>,
}

#[derive(Default)]
struct Registry {
    client: Option<StompClient>,
    entries: HashMap<String, Entry>,
    next_id: u64,
}

/// Explicitly constructed registry of destination → listeners.
///
/// The first listener on a destination creates the broker subscription and
/// the last one to leave tears it down.
#[derive(Clone, Default)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<Registry>>,
}

/// Removes one listener when called. Dropping it without calling keeps the
/// listener registered.
#[must_use = "dropping the handle keeps the listener registered"]
pub struct Unsubscribe {
    target: Option<(Weak<Mutex<Registry>>, String, u64)>,
}

impl Unsubscribe {
    pub(crate) fn noop() -> Self {
        Self { target: None }
    }

    /// False for the handle returned when subscribing failed.
    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some((registry, destination, id)) = self.target.take() {
            if let Some(registry) = registry.upgrade() {
                remove_callback(&registry, &destination, id);
            }
        }
    }
}

/// Releases a one-shot listener however its future ends.
struct ReleaseOnDrop(Unsubscribe);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_client(&self, client: Option<StompClient>) {
        self.inner.lock().client = client;
    }

    pub fn client(&self) -> Option<StompClient> {
        self.inner.lock().client.clone()
    }

    /// Add `callback` as a listener on `destination`.
    ///
    /// Without a client this logs and returns an inactive handle.
    pub fn subscribe(&self, destination: &str, callback: impl Fn(&Inbound) + Send + Sync + 'static) -> Unsubscribe {
        let id = self.allocate_id();
        self.register(destination, id, Arc::new(callback))
    }

    /// Resolve with the first event on `destination`, or fail with
    /// [`ChatError::Timeout`] after `timeout`.
    ///
    /// The listener is registered before this returns, so a publish issued
    /// right after the call cannot race the subscription. It is removed on
    /// the first event, on timeout, or when the future is dropped.
    pub fn subscribe_once(
        &self,
        destination: &str,
        callback: impl FnOnce(&Inbound) + Send + 'static,
        timeout: Duration,
    ) -> impl Future<Output = Result<Inbound, ChatError>> + Send + 'static {
        let deadline = tokio::time::Instant::now() + timeout;
        let destination = destination.to_owned();
        let (tx, rx) = oneshot::channel::<Inbound>();

        let registration = if self.client().is_none() {
            tracing::error!(%destination, "subscribe_once without a client");
            None
        } else {
            let id = self.allocate_id();
            let slot = Mutex::new(Some((tx, callback)));
            let registry = Arc::downgrade(&self.inner);
            let dest = destination.clone();
            let handle = self.register(
                &destination,
                id,
                Arc::new(move |event: &Inbound| {
                    let Some((tx, callback)) = slot.lock().take() else { return };
                    if let Some(registry) = registry.upgrade() {
                        remove_callback(&registry, &dest, id);
                    }
                    callback(event);
                    let _ = tx.send(event.clone());
                }),
            );
            handle.is_active().then_some(handle)
        };

        async move {
            let Some(handle) = registration else {
                return Err(ChatError::NotConnected);
            };
            let _guard = ReleaseOnDrop(handle);
            match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(event)) => Ok(event),
                Ok(Err(_)) => Err(ChatError::Cancelled { destination }),
                Err(_) => {
                    tracing::warn!(%destination, "timed out waiting for one-shot message");
                    Err(ChatError::Timeout { destination })
                }
            }
        }
    }

    /// Tear down `destination` and every listener on it.
    pub fn unsubscribe(&self, destination: &str) {
        let entry = self.inner.lock().entries.remove(destination);
        if let Some(entry) = entry {
            entry.subscription.unsubscribe();
        }
    }

    pub fn unsubscribe_all(&self) {
        let entries: Vec<Entry> = self.inner.lock().entries.drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.subscription.unsubscribe();
        }
    }

    /// Drop every listener and forget the client.
    pub fn dispose(&self) {
        self.unsubscribe_all();
        self.set_client(None);
    }

    pub fn has_subscription(&self, destination: &str) -> bool {
        self.inner.lock().entries.contains_key(destination)
    }

    /// Destinations with at least one listener, sorted.
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut destinations: Vec<String> = self.inner.lock().entries.keys().cloned().collect();
        destinations.sort();
        destinations
    }

    pub fn listener_count(&self, destination: &str) -> usize {
        self.inner.lock().entries.get(destination).map_or(0, |e| e.callbacks.len())
    }

    fn allocate_id(&self) -> u64 {
        let mut registry = self.inner.lock();
        registry.next_id += 1;
        registry.next_id
    }

    fn register(&self, destination: &str, id: u64, callback: Callback) -> Unsubscribe {
        let mut registry = self.inner.lock();
        let handle = Unsubscribe {
            target: Some((Arc::downgrade(&self.inner), destination.to_owned(), id)),
        };
        if let Some(entry) = registry.entries.get_mut(destination) {
            entry.callbacks.insert(id, callback);
            return handle;
        }

        let Some(client) = registry.client.clone() else {
            tracing::error!(destination, "subscribe without a client");
            return Unsubscribe::noop();
        };
        let weak = Arc::downgrade(&self.inner);
        let dest = destination.to_owned();
        match client.subscribe(destination, move |payload| dispatch(&weak, &dest, &payload.body)) {
            Ok(subscription) => {
                let mut callbacks = IndexMap::new();
                callbacks.insert(id, callback);
                registry.entries.insert(destination.to_owned(), Entry { subscription, callbacks });
                handle
            }
            Err(e) => {
                tracing::error!(destination, err = %e, "subscribe failed");
                Unsubscribe::noop()
            }
        }
    }
}

/// Fan one event out to a snapshot of the destination's listeners.
fn dispatch(registry: &Weak<Mutex<Registry>>, destination: &str, event: &Inbound) {
    let Some(registry) = registry.upgrade() else { return };
    let callbacks: Vec<Callback> = match registry.lock().entries.get(destination) {
        Some(entry) => entry.callbacks.values().cloned().collect(),
        None => return,
    };
    for callback in callbacks {
        callback(event);
    }
}

fn remove_callback(registry: &Mutex<Registry>, destination: &str, id: u64) {
    let emptied = {
        let mut registry = registry.lock();
        let Some(entry) = registry.entries.get_mut(destination) else { return };
        entry.callbacks.shift_remove(&id);
        if entry.callbacks.is_empty() {
            registry.entries.remove(destination)
        } else {
            None
        }
    };
    if let Some(entry) = emptied {
        entry.subscription.unsubscribe();
    }
}

#[cfg(test)]
#[path = "subscription_tests.rs"]
mod tests;
