//! Optimistic operation coordinator.
//!
//! A [`Coordinator`] wraps every write on one domain in a three-step
//! protocol:
//!
//! 1. **Apply**: capture the current data as the rollback point, apply the
//!    optimistic change and enter `Syncing`, all in one snapshot
//! 2. **Reconcile**: await the caller's remote call (the only suspension
//!    point; no timeout is imposed here)
//! 3. **Commit or roll back**: on success the server-authoritative data is
//!    committed and the domain returns to `Ready`; on failure the rollback
//!    point is restored and the domain enters `Error`, again in one snapshot
//!
//! Subscribers of a successful operation therefore observe exactly two
//! snapshots: the optimistic one and the committed one.
//!
//! ## Key Invariants
//!
//! - The optimistic snapshot is visible before the remote call starts
//! - Rollback is exact: the restored data is the captured rollback point
//! - Rollback is visible before the `error` event is emitted
//! - Failure never panics; it is returned, stored in the snapshot's `error`
//!   field and published as an `error` event
//! - No automatic retry; a retry is a new `run`

use crate::config::{CoordinatorConfig, WritePolicy};
use crate::container::{StateContainer, Subscription};
use crate::error::RemoteError;
use crate::events::{EventBus, EventKind, LifecycleEvent};
use crate::remote::RemoteSource;
use crate::types::{ErrorInfo, OperationId, Phase, SnapshotData, StateSnapshot, Timestamp};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

type Optimistic<'a, T> = Box<dyn FnOnce(Option<&T>) -> Option<T> + Send + 'a>;
type Reconcile<'a, T, R> = Box<dyn FnOnce(&R, Option<&T>) -> Option<T> + Send + 'a>;
type OnCommit<'a, T, R> = Box<dyn FnOnce(&OperationContext<'_, T>, &R) + Send + 'a>;
type OnError<'a, T> = Box<dyn FnOnce(&OperationContext<'_, T>, &ErrorInfo) + Send + 'a>;

/// One write operation: its name plus the local halves of the protocol.
///
/// ```rust
/// use storesync_core::Operation;
///
/// let op: Operation<'_, Vec<String>, Vec<String>> = Operation::new("addItem")
///     .optimistic(|items: Option<&Vec<String>>| {
///         let mut items = items.cloned().unwrap_or_default();
///         items.push("sku-1".to_string());
///         Some(items)
///     })
///     .server_wins();
/// assert_eq!(op.name(), "addItem");
/// ```
pub struct Operation<'a, T, R> {
    name: String,
    optimistic: Option<Optimistic<'a, T>>,
    reconcile: Option<Reconcile<'a, T, R>>,
    on_commit: Option<OnCommit<'a, T, R>>,
    on_error: Option<OnError<'a, T>>,
}

impl<'a, T, R> Operation<'a, T, R> {
    /// Creates an operation with no local mutation and no hooks.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            optimistic: None,
            reconcile: None,
            on_commit: None,
            on_error: None,
        }
    }

    /// Returns the operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the optimistic mutation: maps the current data to the data
    /// shown while the remote call is in flight.
    #[must_use]
    pub fn optimistic<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Option<&T>) -> Option<T> + Send + 'a,
    {
        self.optimistic = Some(Box::new(f));
        self
    }

    /// Sets how the remote result replaces the optimistic data on commit.
    ///
    /// Without it the optimistic data is kept.
    #[must_use]
    pub fn reconcile<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&R, Option<&T>) -> Option<T> + Send + 'a,
    {
        self.reconcile = Some(Box::new(f));
        self
    }

    /// Sets a hook run after the commit, e.g. to emit a domain event.
    #[must_use]
    pub fn on_commit<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&OperationContext<'_, T>, &R) + Send + 'a,
    {
        self.on_commit = Some(Box::new(f));
        self
    }

    /// Sets a hook run after a failure has been recorded.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&OperationContext<'_, T>, &ErrorInfo) + Send + 'a,
    {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl<'a, T: Clone + Send + 'a> Operation<'a, T, T> {
    /// Commits the remote result as the domain data.
    #[must_use]
    pub fn server_wins(self) -> Self {
        self.reconcile(|result: &T, _| Some(result.clone()))
    }
}

impl<T, R> std::fmt::Debug for Operation<'_, T, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("optimistic", &self.optimistic.is_some())
            .field("reconcile", &self.reconcile.is_some())
            .finish_non_exhaustive()
    }
}

/// What commit and error hooks can see and do.
pub struct OperationContext<'c, T> {
    coordinator: &'c Coordinator<T>,
    operation: &'c str,
    id: OperationId,
}

impl<T: SnapshotData> OperationContext<'_, T> {
    /// Returns the operation name.
    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Returns the operation id carried by this operation's events.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the domain name.
    pub fn domain(&self) -> &str {
        self.coordinator.domain()
    }

    /// Returns the current snapshot.
    pub fn snapshot(&self) -> Arc<StateSnapshot<T>> {
        self.coordinator.container.get()
    }

    /// Returns the domain's container.
    pub fn container(&self) -> &StateContainer<T> {
        &self.coordinator.container
    }

    /// Emits a domain-declared event tagged with this operation's id.
    pub fn emit(&self, name: impl Into<String>, payload: serde_json::Value) -> LifecycleEvent {
        self.coordinator.events.emit(
            self.coordinator.domain(),
            Some(self.id),
            EventKind::Domain {
                name: name.into(),
                payload,
            },
        )
    }
}

/// Drives one domain's phase state machine around optimistic writes.
pub struct Coordinator<T> {
    config: CoordinatorConfig,
    container: Arc<StateContainer<T>>,
    events: EventBus,
    write_lock: Mutex<()>,
}

impl<T: SnapshotData> Coordinator<T> {
    /// Creates a coordinator for `container`, publishing to `events`.
    pub fn new(config: CoordinatorConfig, container: Arc<StateContainer<T>>, events: EventBus) -> Self {
        Self {
            config,
            container,
            events,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the domain name.
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns the domain's container.
    pub fn container(&self) -> &Arc<StateContainer<T>> {
        &self.container
    }

    /// Returns the event bus this coordinator publishes to.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the current snapshot.
    pub fn get(&self) -> Arc<StateSnapshot<T>> {
        self.container.get()
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.container.get().state()
    }

    /// Subscribes to the domain's snapshots; see [`StateContainer::subscribe`].
    pub fn subscribe<F>(&self, subscriber: F) -> Subscription
    where
        F: Fn(&Arc<StateSnapshot<T>>) + Send + Sync + 'static,
    {
        self.container.subscribe(subscriber)
    }

    /// Emits a domain-declared event outside any operation.
    pub fn emit(&self, name: impl Into<String>, payload: serde_json::Value) -> LifecycleEvent {
        self.events.emit(
            self.domain(),
            None,
            EventKind::Domain {
                name: name.into(),
                payload,
            },
        )
    }

    /// Runs `operation` optimistically against `remote_sync`.
    ///
    /// Returns the remote result on commit, or the recorded [`ErrorInfo`]
    /// after rollback. Under [`WritePolicy::Serialized`] a call waits until
    /// earlier calls on this coordinator have settled.
    pub async fn run<R, S, Fut>(&self, operation: Operation<'_, T, R>, remote_sync: S) -> Result<R, ErrorInfo>
    where
        S: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, RemoteError>>,
    {
        let _turn = self.acquire_turn().await;
        self.run_in_turn(operation, remote_sync).await
    }

    /// Loads the domain's initial data.
    ///
    /// From `Initializing` without data, the fetch result moves the domain
    /// straight to `Ready` (or `Error` on failure). Data restored from
    /// persistence makes the domain `Ready` at once; it is then refreshed
    /// through the normal protocol, as is any domain past initialization.
    pub async fn initialize<S, Fut>(&self, fetch: S) -> Result<T, ErrorInfo>
    where
        S: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let _turn = self.acquire_turn().await;
        let current = self.container.get();

        if current.state() != Phase::Initializing {
            return self.run_in_turn(Operation::new("refresh").server_wins(), fetch).await;
        }

        if current.data().is_some() {
            self.container.update(|prev| prev.clone().with_phase(Phase::Ready));
            self.announce(None, Phase::Initializing, Phase::Ready);
            return self.run_in_turn(Operation::new("refresh").server_wins(), fetch).await;
        }

        let id = OperationId::new();
        match fetch().await {
            Ok(data) => {
                let mut previous = Phase::Initializing;
                let committed = data.clone();
                self.container.update(|prev| {
                    previous = prev.state();
                    prev.clone().with_data(Some(committed)).synced_at(Timestamp::now())
                });
                self.announce(Some(id), previous, Phase::Ready);
                self.events.emit(
                    self.domain(),
                    Some(id),
                    EventKind::Synced {
                        operation: "initialize".to_string(),
                    },
                );
                tracing::debug!(domain = %self.domain(), "initial data loaded");
                Ok(data)
            }
            Err(e) => {
                let info = ErrorInfo::from_remote("initialize", &e);
                let mut previous = Phase::Initializing;
                self.container.update(|prev| {
                    previous = prev.state();
                    prev.clone().with_error(info.clone())
                });
                self.announce(Some(id), previous, Phase::Error);
                self.events.emit(
                    self.domain(),
                    Some(id),
                    EventKind::Error { error: info.clone() },
                );
                tracing::warn!(domain = %self.domain(), error = %info, "initial fetch failed");
                Err(info)
            }
        }
    }

    /// [`Self::initialize`] from a domain's [`RemoteSource`].
    pub async fn initialize_from<S: RemoteSource<T>>(&self, source: &S) -> Result<T, ErrorInfo> {
        self.initialize(|| source.fetch()).await
    }

    /// Re-fetches authoritative data; the result replaces the domain data.
    pub async fn refresh<S, Fut>(&self, fetch: S) -> Result<T, ErrorInfo>
    where
        S: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.run(Operation::new("refresh").server_wins(), fetch).await
    }

    /// Returns the domain to its initial snapshot.
    pub async fn reset(&self) {
        let _turn = self.acquire_turn().await;
        let mut previous = Phase::Initializing;
        self.container.update(|prev| {
            previous = prev.state();
            StateSnapshot::initial()
        });
        self.announce(None, previous, Phase::Initializing);
    }

    async fn acquire_turn(&self) -> Option<MutexGuard<'_, ()>> {
        match self.config.write_policy {
            WritePolicy::Serialized => Some(self.write_lock.lock().await),
            WritePolicy::Overlapping => None,
        }
    }

    async fn run_in_turn<R, S, Fut>(&self, operation: Operation<'_, T, R>, remote_sync: S) -> Result<R, ErrorInfo>
    where
        S: FnOnce() -> Fut,
        Fut: Future<Output = Result<R, RemoteError>>,
    {
        let Operation {
            name,
            optimistic,
            reconcile,
            on_commit,
            on_error,
        } = operation;
        let ctx = OperationContext {
            coordinator: self,
            operation: &name,
            id: OperationId::new(),
        };

        let rollback_point = self.container.get().data().cloned();

        let mut previous = Phase::Initializing;
        self.container.update(|prev| {
            previous = prev.state();
            let data = match optimistic {
                Some(apply) => apply(prev.data()),
                None => prev.data().cloned(),
            };
            prev.clone().with_data(data).with_phase(Phase::Syncing)
        });
        self.announce(Some(ctx.id), previous, Phase::Syncing);
        tracing::debug!(domain = %self.domain(), operation = %name, "optimistic update applied");

        match remote_sync().await {
            Ok(result) => {
                self.container.update(|prev| {
                    previous = prev.state();
                    let data = match reconcile {
                        Some(reconcile) => reconcile(&result, prev.data()),
                        None => prev.data().cloned(),
                    };
                    prev.clone().with_data(data).synced_at(Timestamp::now())
                });
                self.announce(Some(ctx.id), previous, Phase::Ready);
                self.events.emit(
                    self.domain(),
                    Some(ctx.id),
                    EventKind::Synced {
                        operation: name.clone(),
                    },
                );
                tracing::debug!(domain = %self.domain(), operation = %name, "operation committed");

                if let Some(on_commit) = on_commit {
                    on_commit(&ctx, &result);
                }
                Ok(result)
            }
            Err(e) => {
                let info = ErrorInfo::from_remote(&name, &e);
                if rollback_point.is_none() {
                    tracing::warn!(
                        domain = %self.domain(),
                        operation = %name,
                        "no rollback point; optimistic data kept after failure"
                    );
                }

                self.container.update(|prev| {
                    previous = prev.state();
                    let base = match rollback_point {
                        Some(point) => prev.clone().with_data(Some(point)),
                        None => prev.clone(),
                    };
                    base.with_error(info.clone())
                });
                self.announce(Some(ctx.id), previous, Phase::Error);
                self.events.emit(
                    self.domain(),
                    Some(ctx.id),
                    EventKind::Error { error: info.clone() },
                );
                tracing::warn!(domain = %self.domain(), error = %info, "operation rolled back");

                if let Some(on_error) = on_error {
                    on_error(&ctx, &info);
                }
                Err(info)
            }
        }
    }

    /// Publishes a phase change. No-op transitions publish nothing.
    fn announce(&self, operation_id: Option<OperationId>, previous: Phase, next: Phase) {
        if previous == next {
            return;
        }
        tracing::debug!(domain = %self.domain(), %previous, %next, "phase changed");
        self.events
            .emit(self.domain(), operation_id, EventKind::StateChanged { previous, next });
    }
}

impl<T> std::fmt::Debug for Coordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("domain", &self.config.domain)
            .field("write_policy", &self.config.write_policy)
            .field("container", &self.container)
            .finish()
    }
}
