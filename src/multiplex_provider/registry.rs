//! URL-keyed endpoint registry with stable per-slot identifiers.
//!
//! Each endpoint URL owns one slot. A slot is created without a connection,
//! filled by the dial pass, and destroyed on removal. Slot ids are allocated
//! from a monotonically increasing counter and are never reused, so a
//! subscription worker can hold an id across endpoint churn and detect that
//! its endpoint is gone.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use alloy::{
    network::{Ethereum, Network},
    providers::RootProvider,
};
use tokio::sync::mpsc;

/// A connected endpoint: the URL it was dialed from plus its live handle.
///
/// Snapshots of this value are handed to dispatch and travel with
/// subscription events, so follow-up queries can target the same node.
#[derive(Debug, Clone)]
pub struct Endpoint<N: Network = Ethereum> {
    /// The endpoint URL, as registered.
    pub url: Arc<str>,
    /// The established transport handle.
    pub provider: RootProvider<N>,
}

#[derive(Debug)]
struct Slot<N: Network> {
    id: u64,
    provider: Option<RootProvider<N>>,
}

#[derive(Debug)]
struct Inner<N: Network> {
    slots: HashMap<Arc<str>, Slot<N>>,
    urls_by_id: HashMap<u64, Arc<str>>,
    counter: u64,
}

/// Thread-safe registry mapping endpoint URLs to connection slots.
#[derive(Debug)]
pub struct EndpointRegistry<N: Network = Ethereum> {
    inner: RwLock<Inner<N>>,
    // Nudges the reconnect loop; capacity 1, lossy on purpose (a pending
    // nudge already guarantees a dial pass).
    new_slot_tx: mpsc::Sender<Arc<str>>,
}

impl<N: Network> EndpointRegistry<N> {
    pub(crate) fn new(new_slot_tx: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                slots: HashMap::new(),
                urls_by_id: HashMap::new(),
                counter: 0,
            }),
            new_slot_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner<N>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner<N>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a new slot with no connection and returns its id.
    ///
    /// A URL that is already registered is left untouched and its existing id
    /// is returned; discovery plug-ins are expected to feed unique URLs, this
    /// is defense against the ones that don't.
    pub fn add(&self, url: impl Into<Arc<str>>) -> u64 {
        let url = url.into();
        let id = {
            let mut inner = self.write();
            if let Some(slot) = inner.slots.get(&url) {
                trace!(url = %url, id = slot.id, "endpoint already registered");
                return slot.id;
            }
            inner.counter += 1;
            let id = inner.counter;
            inner.slots.insert(url.clone(), Slot { id, provider: None });
            inner.urls_by_id.insert(id, url.clone());
            id
        };
        let _ = self.new_slot_tx.try_send(url.clone());
        trace!(url = %url, id, "endpoint added");
        id
    }

    /// Fills an existing slot with an established connection and returns the
    /// slot id, or `None` when the URL is not registered.
    pub(crate) fn replace(&self, url: &str, provider: RootProvider<N>) -> Option<u64> {
        let mut inner = self.write();
        let slot = inner.slots.get_mut(url)?;
        slot.provider = Some(provider);
        Some(slot.id)
    }

    /// Removes a slot; its connection handle (if any) is dropped here.
    pub fn remove(&self, url: &str) {
        let mut inner = self.write();
        let Some(slot) = inner.slots.remove(url) else {
            return;
        };
        inner.urls_by_id.remove(&slot.id);
        trace!(url = %url, id = slot.id, "endpoint removed");
    }

    /// Removes every slot, dropping all connection handles.
    pub(crate) fn clear(&self) {
        let mut inner = self.write();
        inner.slots.clear();
        inner.urls_by_id.clear();
    }

    /// The connection for `url`, if the slot exists and has been dialed.
    #[must_use]
    pub fn get(&self, url: &str) -> Option<RootProvider<N>> {
        self.read().slots.get(url).and_then(|slot| slot.provider.clone())
    }

    /// The endpoint for a slot id, if the slot still exists and is connected.
    #[must_use]
    pub fn get_by_id(&self, id: u64) -> Option<Endpoint<N>> {
        let inner = self.read();
        let url = inner.urls_by_id.get(&id)?;
        let provider = inner.slots.get(url)?.provider.clone()?;
        Some(Endpoint { url: url.clone(), provider })
    }

    /// Snapshot of all connected endpoints. Callers iterate without holding
    /// the registry lock.
    #[must_use]
    pub fn connected(&self) -> Vec<Endpoint<N>> {
        self.read()
            .slots
            .iter()
            .filter_map(|(url, slot)| {
                slot.provider
                    .clone()
                    .map(|provider| Endpoint { url: url.clone(), provider })
            })
            .collect()
    }

    /// All registered URLs, connected or not.
    #[must_use]
    pub fn urls(&self) -> Vec<Arc<str>> {
        self.read().slots.keys().cloned().collect()
    }

    /// All slot ids, connected or not.
    #[must_use]
    pub fn ids(&self) -> Vec<u64> {
        self.read().urls_by_id.keys().copied().collect()
    }

    /// URLs whose slot has no connection yet (never dialed, or dial failed).
    #[must_use]
    pub fn unresolved_urls(&self) -> Vec<Arc<str>> {
        self.read()
            .slots
            .iter()
            .filter(|(_, slot)| slot.provider.is_none())
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Number of registered slots, connected or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    /// `true` when no slot is registered at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().slots.is_empty()
    }
}
