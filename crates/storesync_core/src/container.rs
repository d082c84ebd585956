//! Reactive state container.
//!
//! A [`StateContainer`] holds one [`StateSnapshot`], hands it out by
//! reference, and pushes every new snapshot to its subscribers. It can
//! mirror each write to a [`SnapshotBackend`].
//!
//! # Ordering
//!
//! - Writes are applied in call order
//! - Each subscriber sees every snapshot, in write order, exactly once
//! - A new subscriber is called with the current snapshot before `subscribe`
//!   returns
//!
//! A subscriber that writes to the container from inside its callback does
//! not recurse: the nested snapshot is queued and delivered once the current
//! round has reached every subscriber.
//!
//! A subscriber that panics ends the round: the panic propagates to the
//! writer, and snapshots queued behind it are not delivered. The current
//! snapshot is unaffected and the next write notifies everyone as usual.
//!
//! # Persistence
//!
//! Snapshots are CBOR-encoded inside an envelope naming their key and scope.
//! A stored record whose envelope does not match, or that fails to decode,
//! is ignored. Write failures are logged and never reach the caller.

use crate::config::PersistenceConfig;
use crate::types::{Phase, SnapshotData, StateSnapshot};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use storesync_storage::{
    SnapshotBackend, StorageError, StorageProvider, StorageResult, StorageScope,
};

/// A subscriber callback.
pub type Subscriber<T> = Arc<dyn Fn(&Arc<StateSnapshot<T>>) + Send + Sync>;

/// A snapshot as written to storage, tagged with the key and scope it was
/// persisted under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSnapshot<T> {
    /// Unqualified persistence key.
    pub key: String,
    /// Scope the record was written for.
    pub scope: StorageScope,
    /// The snapshot itself.
    pub snapshot: StateSnapshot<T>,
}

impl<T: SnapshotData> PersistedSnapshot<T> {
    /// Decodes a stored record.
    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| StorageError::Corrupted(e.to_string()))
    }

    /// Encodes the record for storage.
    pub fn encode(&self) -> StorageResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| StorageError::Corrupted(e.to_string()))?;
        Ok(bytes)
    }
}

struct Persistence {
    backend: Arc<dyn SnapshotBackend>,
    key: String,
    scope: StorageScope,
}

impl Persistence {
    fn load<T: SnapshotData>(&self) -> Option<StateSnapshot<T>> {
        let storage_key = self.scope.qualify(&self.key);
        let bytes = match self.backend.get(&storage_key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %storage_key, error = %e, "failed to read persisted snapshot");
                return None;
            }
        };

        let envelope = match PersistedSnapshot::<T>::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(key = %storage_key, error = %e, "ignoring undecodable snapshot");
                return None;
            }
        };

        if envelope.key != self.key || envelope.scope != self.scope {
            tracing::warn!(
                key = %storage_key,
                stored_key = %envelope.key,
                stored_scope = %envelope.scope,
                "ignoring snapshot persisted for another key or scope"
            );
            return None;
        }
        if !envelope.snapshot.is_consistent() {
            tracing::warn!(key = %storage_key, "ignoring inconsistent snapshot");
            return None;
        }

        Some(settle_restored(envelope.snapshot))
    }

    fn store<T: SnapshotData>(&self, snapshot: &StateSnapshot<T>) {
        let storage_key = self.scope.qualify(&self.key);
        let envelope = PersistedSnapshot {
            key: self.key.clone(),
            scope: self.scope,
            snapshot: snapshot.clone(),
        };

        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %storage_key, error = %e, "failed to encode snapshot");
                return;
            }
        };
        if let Err(e) = self.backend.set(&storage_key, &bytes) {
            tracing::warn!(key = %storage_key, error = %e, "failed to persist snapshot");
        }
    }
}

/// A restored snapshot cannot have an operation in flight.
fn settle_restored<T>(snapshot: StateSnapshot<T>) -> StateSnapshot<T> {
    if snapshot.state() != Phase::Syncing {
        return snapshot;
    }
    let phase = if snapshot.data().is_some() {
        Phase::Ready
    } else {
        Phase::Initializing
    };
    snapshot.with_phase(phase)
}

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Subscriber<T>)>,
}

/// Handle returned by [`StateContainer::subscribe`].
///
/// Dropping the handle removes the subscriber; call [`Subscription::detach`]
/// to keep it registered for the container's lifetime.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Removes the subscriber.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keeps the subscriber registered after the handle is dropped.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Ends a delivery round, including one cut short by a panicking
/// subscriber. Snapshots still queued at that point are dropped so the next
/// write does not replay them ahead of itself.
struct DeliveryGuard<'a, T> {
    delivering: &'a AtomicBool,
    pending: &'a Mutex<VecDeque<Arc<StateSnapshot<T>>>>,
}

impl<T> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        let dropped = {
            let mut pending = self.pending.lock();
            let dropped = pending.len();
            pending.clear();
            dropped
        };
        if dropped > 0 {
            tracing::warn!(dropped, "delivery interrupted; discarding queued snapshots");
        }
        self.delivering.store(false, Ordering::SeqCst);
    }
}

/// Holds one domain's current snapshot and notifies subscribers of changes.
pub struct StateContainer<T> {
    current: RwLock<Arc<StateSnapshot<T>>>,
    registry: Arc<Mutex<Registry<T>>>,
    /// Serializes writes and their delivery. Re-entrant so subscribers may write.
    write_gate: ReentrantMutex<()>,
    pending: Mutex<VecDeque<Arc<StateSnapshot<T>>>>,
    delivering: AtomicBool,
    version: AtomicU64,
    persistence: Option<Persistence>,
}

impl<T: SnapshotData> StateContainer<T> {
    /// Creates a container without persistence, starting from
    /// [`StateSnapshot::initial`].
    pub fn new() -> Self {
        Self::from_parts(StateSnapshot::initial(), None)
    }

    /// Creates a container persisting through the provider's backend for the
    /// configured scope.
    ///
    /// A previously persisted snapshot for the same key and scope becomes the
    /// initial snapshot. [`StorageScope::None`] disables persistence.
    pub fn with_persistence(provider: &StorageProvider, config: &PersistenceConfig) -> Self {
        match provider.backend(config.scope) {
            Some(backend) => Self::with_backend(backend, config),
            None => Self::new(),
        }
    }

    /// Creates a container persisting to `backend` under the configured key
    /// and scope.
    pub fn with_backend(backend: Arc<dyn SnapshotBackend>, config: &PersistenceConfig) -> Self {
        if config.scope == StorageScope::None {
            return Self::new();
        }
        let persistence = Persistence {
            backend,
            key: config.key.clone(),
            scope: config.scope,
        };
        let initial = persistence.load().unwrap_or_else(StateSnapshot::initial);
        if initial.data().is_some() {
            tracing::debug!(key = %config.key, scope = %config.scope, phase = %initial.state(), "restored persisted snapshot");
        }
        Self::from_parts(initial, Some(persistence))
    }

    fn from_parts(initial: StateSnapshot<T>, persistence: Option<Persistence>) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
            write_gate: ReentrantMutex::new(()),
            pending: Mutex::new(VecDeque::new()),
            delivering: AtomicBool::new(false),
            version: AtomicU64::new(0),
            persistence,
        }
    }

    /// Returns the current snapshot.
    ///
    /// Two calls without an intervening write return the same `Arc`.
    pub fn get(&self) -> Arc<StateSnapshot<T>> {
        Arc::clone(&self.current.read())
    }

    /// Returns the number of writes applied since construction.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Registers `subscriber` and immediately calls it with the current
    /// snapshot.
    pub fn subscribe<F>(&self, subscriber: F) -> Subscription
    where
        F: Fn(&Arc<StateSnapshot<T>>) + Send + Sync + 'static,
    {
        let subscriber: Subscriber<T> = Arc::new(subscriber);

        // Holding the gate keeps a concurrent write from reaching this
        // subscriber before its initial snapshot.
        let _gate = self.write_gate.lock();
        let id = {
            let mut registry = self.registry.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Arc::clone(&subscriber)));
            id
        };
        subscriber(&self.get());

        let registry: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.registry);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// Replaces the snapshot with `mutator(current)`, persists it and
    /// notifies every subscriber. Returns the new snapshot.
    pub fn update<F>(&self, mutator: F) -> Arc<StateSnapshot<T>>
    where
        F: FnOnce(&StateSnapshot<T>) -> StateSnapshot<T>,
    {
        let _gate = self.write_gate.lock();
        let next = Arc::new(mutator(&self.get()));
        *self.current.write() = Arc::clone(&next);
        self.version.fetch_add(1, Ordering::SeqCst);

        if let Some(persistence) = &self.persistence {
            persistence.store(next.as_ref());
        }

        self.pending.lock().push_back(Arc::clone(&next));
        self.deliver();
        next
    }

    /// Replaces the snapshot outright.
    pub fn set(&self, snapshot: StateSnapshot<T>) -> Arc<StateSnapshot<T>> {
        self.update(move |_| snapshot)
    }

    /// Replaces the data. With `mark_ready` the phase also becomes `Ready`
    /// and any error is cleared; otherwise phase and error are kept.
    pub fn update_data(&self, data: Option<T>, mark_ready: bool) -> Arc<StateSnapshot<T>> {
        self.update(move |prev| {
            let next = prev.clone().with_data(data);
            if mark_ready {
                next.with_phase(Phase::Ready)
            } else {
                next
            }
        })
    }

    /// Replaces the data with `f(current data)`; see [`Self::update_data`].
    pub fn modify_data<F>(&self, f: F, mark_ready: bool) -> Arc<StateSnapshot<T>>
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        self.update(move |prev| {
            let data = f(prev.data());
            let next = prev.clone().with_data(data);
            if mark_ready {
                next.with_phase(Phase::Ready)
            } else {
                next
            }
        })
    }

    /// Drains queued snapshots to subscribers unless an outer call on this
    /// thread is already doing so. Called with the write gate held.
    fn deliver(&self) {
        if self.delivering.swap(true, Ordering::SeqCst) {
            return;
        }
        let _reset = DeliveryGuard {
            delivering: &self.delivering,
            pending: &self.pending,
        };

        loop {
            let Some(snapshot) = self.pending.lock().pop_front() else {
                break;
            };
            let subscribers: Vec<Subscriber<T>> = self
                .registry
                .lock()
                .entries
                .iter()
                .map(|(_, subscriber)| Arc::clone(subscriber))
                .collect();
            tracing::trace!(
                subscribers = subscribers.len(),
                phase = %snapshot.state(),
                "notifying subscribers"
            );
            for subscriber in subscribers {
                subscriber(&snapshot);
            }
        }
    }
}

impl<T: SnapshotData> Default for StateContainer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for StateContainer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateContainer")
            .field("phase", &self.current.read().state())
            .field("version", &self.version.load(Ordering::SeqCst))
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}
