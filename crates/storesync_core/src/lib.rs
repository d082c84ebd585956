//! # storesync core
//!
//! Optimistic state synchronisation for storefront domains.
//!
//! This crate provides:
//! - Phase state machine (initializing → ready ↔ syncing → error)
//! - Reactive state container with push-on-subscribe and best-effort persistence
//! - Optimistic operation coordinator (apply → reconcile → commit or roll back)
//! - Lifecycle event bus injected into every domain
//! - Retry and timeout wrappers for remote calls
//! - A hub composing several domains over shared events and storage
//!
//! ## Architecture
//!
//! Each domain (cart, wishlist, orders, ...) owns one [`StateContainer`] and
//! one [`Coordinator`]. Domain managers supply the optimistic mutation and
//! the remote call for each write; the coordinator drives the phase machine
//! and publishes [`LifecycleEvent`]s:
//!
//! 1. Capture the rollback point and apply the optimistic change (`Syncing`)
//! 2. Await the remote call
//! 3. Commit the server-authoritative data (`Ready`) or restore the rollback
//!    point (`Error`)
//!
//! ## Key Invariants
//!
//! - Server data wins over the optimistic guess
//! - `state == Error` exactly when `error` is set
//! - Every subscriber sees every snapshot, in write order
//! - Persistence failures never reach callers

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod container;
mod coordinator;
mod error;
mod events;
mod hub;
mod remote;
pub mod retry;
mod types;

pub use config::{CoordinatorConfig, PersistenceConfig, RetryConfig, WritePolicy};
pub use container::{PersistedSnapshot, StateContainer, Subscriber, Subscription};
pub use coordinator::{Coordinator, Operation, OperationContext};
pub use error::{CoreError, CoreResult, RemoteError};
pub use events::{EventBus, EventKind, LifecycleEvent};
pub use hub::SyncHub;
pub use remote::RemoteSource;
pub use retry::{with_retry, with_timeout};
pub use types::{ErrorInfo, OperationId, Phase, SnapshotData, StateSnapshot, Timestamp};

pub use storesync_storage::{StorageProvider, StorageScope};
