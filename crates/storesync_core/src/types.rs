//! Core type definitions: phases, timestamps, error info and snapshots.

use crate::error::RemoteError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Data that can live in a state container.
///
/// Snapshots are persisted, cloned for rollback and shared across threads,
/// hence the bounds.
pub trait SnapshotData: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> SnapshotData for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Coarse lifecycle state of one domain.
///
/// ```text
/// Initializing --(initial data available)--> Ready
/// Ready --(write op starts)--> Syncing
/// Syncing --(remote resolves)--> Ready
/// Syncing --(remote rejects)--> Error
/// Error --(new op starts)--> Syncing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No data has been loaded yet.
    Initializing,
    /// Data is available and no operation is in flight.
    Ready,
    /// An operation is waiting on the remote source.
    Syncing,
    /// The last operation failed.
    Error,
}

impl Phase {
    /// Returns true while a remote call is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Phase::Syncing)
    }

    /// Returns true if no operation is in flight and data has been loaded
    /// or a failure recorded.
    pub fn is_settled(&self) -> bool {
        matches!(self, Phase::Ready | Phase::Error)
    }

    /// Returns the lowercase phase name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Phase::Initializing => "initializing",
            Phase::Ready => "ready",
            Phase::Syncing => "syncing",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wall-clock time in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Returns the current time.
    #[must_use]
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from raw milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the raw milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Identifies one coordinator invocation.
///
/// Every event emitted while an operation runs carries its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// Describes why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine-readable code, e.g. `NETWORK_ERROR`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Name of the operation that failed.
    pub operation: String,
    /// Debug rendering of the underlying cause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorInfo {
    /// Creates an error info without a cause.
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            operation: operation.into(),
            cause: None,
        }
    }

    /// Builds the error info recorded when `operation`'s remote call fails.
    pub fn from_remote(operation: &str, error: &RemoteError) -> Self {
        Self {
            code: error.code().to_string(),
            message: error.to_string(),
            operation: operation.to_string(),
            cause: Some(format!("{error:?}")),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed [{}]: {}", self.operation, self.code, self.message)
    }
}

/// One immutable view of a domain's state.
///
/// Snapshots are replaced wholesale on every write. The constructors and
/// builders keep the invariant that `state == Error` exactly when `error`
/// is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot<T> {
    state: Phase,
    data: Option<T>,
    error: Option<ErrorInfo>,
    last_synced_at: Option<Timestamp>,
}

impl<T> StateSnapshot<T> {
    /// The snapshot every container starts from: `{Initializing, None, None, None}`.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            state: Phase::Initializing,
            data: None,
            error: None,
            last_synced_at: None,
        }
    }

    /// A ready snapshot holding authoritative data synced at `at`.
    #[must_use]
    pub fn ready(data: T, at: Timestamp) -> Self {
        Self {
            state: Phase::Ready,
            data: Some(data),
            error: None,
            last_synced_at: Some(at),
        }
    }

    /// Returns the phase.
    pub fn state(&self) -> Phase {
        self.state
    }

    /// Returns the domain data, if loaded.
    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    /// Returns the error of the last failed operation.
    pub fn error(&self) -> Option<&ErrorInfo> {
        self.error.as_ref()
    }

    /// Returns when data was last confirmed by the remote source.
    pub fn last_synced_at(&self) -> Option<Timestamp> {
        self.last_synced_at
    }

    /// Returns true in the `Ready` phase.
    pub fn is_ready(&self) -> bool {
        self.state == Phase::Ready
    }

    /// Returns true in the `Syncing` phase.
    pub fn is_syncing(&self) -> bool {
        self.state == Phase::Syncing
    }

    /// Returns true in the `Error` phase.
    pub fn has_error(&self) -> bool {
        self.state == Phase::Error
    }

    /// Returns true if the phase/error invariant holds.
    pub fn is_consistent(&self) -> bool {
        (self.state == Phase::Error) == self.error.is_some()
    }

    /// Replaces the data, keeping phase, error and sync time.
    #[must_use]
    pub fn with_data(mut self, data: Option<T>) -> Self {
        self.data = data;
        self
    }

    /// Moves to a non-error phase, clearing any error.
    ///
    /// Passing [`Phase::Error`] is a caller bug; use [`Self::with_error`].
    #[must_use]
    pub fn with_phase(mut self, phase: Phase) -> Self {
        debug_assert!(phase != Phase::Error, "use with_error to enter the error phase");
        if phase == Phase::Error {
            return self;
        }
        self.state = phase;
        self.error = None;
        self
    }

    /// Moves to the `Error` phase with the given error.
    #[must_use]
    pub fn with_error(mut self, error: ErrorInfo) -> Self {
        self.state = Phase::Error;
        self.error = Some(error);
        self
    }

    /// Records a successful sync at `at`: `Ready`, no error.
    #[must_use]
    pub fn synced_at(mut self, at: Timestamp) -> Self {
        self.state = Phase::Ready;
        self.error = None;
        self.last_synced_at = Some(at);
        self
    }
}

impl<T> Default for StateSnapshot<T> {
    fn default() -> Self {
        Self::initial()
    }
}
