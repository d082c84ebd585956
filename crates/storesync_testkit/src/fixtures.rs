//! Test fixtures and recording helpers.
//!
//! Provides a subscriber that records every snapshot it is handed, helpers
//! for draining lifecycle events, and coordinator constructors for tests.

use parking_lot::Mutex;
use std::sync::Arc;
use storesync_core::{
    Coordinator, CoordinatorConfig, EventBus, LifecycleEvent, Phase, SnapshotData, StateContainer,
    StateSnapshot, Subscription,
};
use tokio::sync::mpsc::UnboundedReceiver;

/// A subscriber that records every snapshot it receives.
///
/// The subscription lives as long as the recorder.
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<Arc<StateSnapshot<T>>>>>,
    _subscription: Subscription,
}

impl<T: SnapshotData> Recorder<T> {
    /// Subscribes to `container`. The first recorded snapshot is the
    /// container's current one.
    pub fn attach(container: &StateContainer<T>) -> Self {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let subscription = container.subscribe(move |snapshot| sink.lock().push(Arc::clone(snapshot)));
        Self {
            seen,
            _subscription: subscription,
        }
    }

    /// Subscribes to a coordinator's container.
    pub fn attach_to(coordinator: &Coordinator<T>) -> Self {
        Self::attach(coordinator.container())
    }

    /// Returns every recorded snapshot.
    pub fn snapshots(&self) -> Vec<Arc<StateSnapshot<T>>> {
        self.seen.lock().clone()
    }

    /// Returns the phase of every recorded snapshot.
    pub fn phases(&self) -> Vec<Phase> {
        self.seen.lock().iter().map(|s| s.state()).collect()
    }

    /// Returns the data of every recorded snapshot.
    pub fn data(&self) -> Vec<Option<T>> {
        self.seen.lock().iter().map(|s| s.data().cloned()).collect()
    }

    /// Returns the most recent snapshot.
    pub fn last(&self) -> Option<Arc<StateSnapshot<T>>> {
        self.seen.lock().last().cloned()
    }

    /// Returns the number of recorded snapshots.
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}

/// Returns every event currently queued on `receiver`.
pub fn drain_events(receiver: &mut UnboundedReceiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

/// Returns the type name of each event, e.g. `state:changed`.
pub fn event_types(events: &[LifecycleEvent]) -> Vec<String> {
    events.iter().map(|e| e.kind.type_name().to_string()).collect()
}

/// Creates a coordinator for `domain` over a fresh in-memory container and
/// a fresh bus.
pub fn test_coordinator<T: SnapshotData>(domain: &str) -> Arc<Coordinator<T>> {
    Arc::new(Coordinator::new(
        CoordinatorConfig::new(domain),
        Arc::new(StateContainer::new()),
        EventBus::new(),
    ))
}

/// Creates a coordinator whose container already holds `data` in `Ready`.
pub fn ready_coordinator<T: SnapshotData>(domain: &str, data: T) -> Arc<Coordinator<T>> {
    let container = StateContainer::new();
    container.set(StateSnapshot::ready(data, storesync_core::Timestamp(1)));
    Arc::new(Coordinator::new(
        CoordinatorConfig::new(domain),
        Arc::new(container),
        EventBus::new(),
    ))
}
