//! Lifecycle event bus shared by the domains of one application.
//!
//! Every phase transition, commit and failure is published as a
//! [`LifecycleEvent`]. The bus is an explicit handle injected into each
//! coordinator at construction; there is no process-wide instance.
//!
//! # Usage
//!
//! ```rust
//! use storesync_core::{EventBus, EventKind, Phase};
//!
//! let bus = EventBus::new();
//! let mut receiver = bus.subscribe();
//!
//! bus.emit("cart", None, EventKind::StateChanged {
//!     previous: Phase::Ready,
//!     next: Phase::Syncing,
//! });
//!
//! let event = receiver.try_recv().unwrap();
//! assert_eq!(event.kind.type_name(), "state:changed");
//! ```

use crate::types::{ErrorInfo, OperationId, Phase, Timestamp};
use parking_lot::{Mutex, RwLock};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

const DEFAULT_MAX_HISTORY: usize = 1024;

/// What happened.
///
/// Serialized with a `type` field naming the kind: `state:changed`,
/// `synced`, `error`, or the domain event's own name (e.g. `item:added`)
/// next to its `payload`. Domain events should not reuse the built-in names.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// The domain moved between phases.
    StateChanged {
        /// Phase before the transition.
        previous: Phase,
        /// Phase after the transition.
        next: Phase,
    },
    /// The remote source confirmed an operation.
    Synced {
        /// Name of the confirmed operation.
        operation: String,
    },
    /// An operation failed.
    Error {
        /// Failure details.
        error: ErrorInfo,
    },
    /// A domain-declared event such as `item:added`.
    Domain {
        /// Domain-specific event name.
        name: String,
        /// Event payload.
        payload: serde_json::Value,
    },
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", self.type_name())?;
        match self {
            EventKind::StateChanged { previous, next } => {
                map.serialize_entry("previous", previous)?;
                map.serialize_entry("next", next)?;
            }
            EventKind::Synced { operation } => map.serialize_entry("operation", operation)?,
            EventKind::Error { error } => map.serialize_entry("error", error)?,
            EventKind::Domain { payload, .. } => map.serialize_entry("payload", payload)?,
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawKind {
    #[serde(rename = "type")]
    kind: String,
    previous: Option<Phase>,
    next: Option<Phase>,
    operation: Option<String>,
    error: Option<ErrorInfo>,
    payload: Option<serde_json::Value>,
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawKind::deserialize(deserializer)?;
        Ok(match (raw.kind.as_str(), raw.previous, raw.next, raw.operation, raw.error) {
            ("state:changed", Some(previous), Some(next), _, _) => {
                EventKind::StateChanged { previous, next }
            }
            ("synced", _, _, Some(operation), _) => EventKind::Synced { operation },
            ("error", _, _, _, Some(error)) => EventKind::Error { error },
            _ => EventKind::Domain {
                name: raw.kind,
                payload: raw.payload.unwrap_or(serde_json::Value::Null),
            },
        })
    }
}

impl EventKind {
    /// Returns the event type as subscribers see it: `state:changed`,
    /// `synced`, `error`, or the domain event name.
    pub fn type_name(&self) -> &str {
        match self {
            EventKind::StateChanged { .. } => "state:changed",
            EventKind::Synced { .. } => "synced",
            EventKind::Error { .. } => "error",
            EventKind::Domain { name, .. } => name,
        }
    }
}

/// A single published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Bus-wide sequence number, starting at 1.
    pub sequence: u64,
    /// Emitting domain.
    pub domain: String,
    /// Emission time.
    pub timestamp: Timestamp,
    /// Operation the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    /// Event type and payload.
    #[serde(flatten)]
    pub kind: EventKind,
}

struct BusInner {
    subscribers: Mutex<Vec<UnboundedSender<LifecycleEvent>>>,
    history: RwLock<VecDeque<LifecycleEvent>>,
    max_history: usize,
    next_sequence: AtomicU64,
}

/// Distributes lifecycle events to subscribers.
///
/// The bus:
/// - Preserves emission order
/// - Supports multiple subscribers
/// - Keeps a bounded history for polling
/// - Is cheap to clone; clones share subscribers and history
///
/// Delivery is fire-and-forget: a dropped receiver is pruned on the next emit.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a new bus.
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Creates a bus that retains at most `max_history` events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                history: RwLock::new(VecDeque::new()),
                max_history,
                next_sequence: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Publishes an event and returns it.
    pub fn emit(
        &self,
        domain: &str,
        operation_id: Option<OperationId>,
        kind: EventKind,
    ) -> LifecycleEvent {
        // Sequence assignment and delivery happen under one lock so every
        // subscriber sees events in sequence order.
        let mut subscribers = self.inner.subscribers.lock();
        let event = LifecycleEvent {
            sequence: self.inner.next_sequence.fetch_add(1, Ordering::SeqCst),
            domain: domain.to_string(),
            timestamp: Timestamp::now(),
            operation_id,
            kind,
        };
        tracing::trace!(
            domain,
            sequence = event.sequence,
            kind = event.kind.type_name(),
            "event emitted"
        );

        {
            let mut history = self.inner.history.write();
            history.push_back(event.clone());
            while history.len() > self.inner.max_history {
                history.pop_front();
            }
        }

        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        event
    }

    /// Returns events with `sequence > cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<LifecycleEvent> {
        self.inner
            .history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest emitted sequence number, or 0.
    pub fn latest_sequence(&self) -> u64 {
        self.inner.next_sequence.load(Ordering::SeqCst) - 1
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|tx| !tx.is_closed());
        subscribers.len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.inner.history.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("latest_sequence", &self.latest_sequence())
            .field("history_len", &self.history_len())
            .finish()
    }
}
