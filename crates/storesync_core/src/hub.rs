//! Composition of several domains over one event bus and one storage
//! provider.

use crate::config::{CoordinatorConfig, PersistenceConfig};
use crate::container::StateContainer;
use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, LifecycleEvent};
use crate::types::{Phase, SnapshotData};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use storesync_storage::StorageProvider;
use tokio::sync::mpsc::UnboundedReceiver;

type PhaseProbe = Box<dyn Fn() -> Option<Phase> + Send + Sync>;

/// Builds domain coordinators that share one [`EventBus`] and one
/// [`StorageProvider`].
///
/// The hub only holds weak references to the domains it built; dropping a
/// coordinator frees its name for re-registration.
///
/// # Example
///
/// ```rust
/// use storesync_core::{CoordinatorConfig, PersistenceConfig, SyncHub};
///
/// let hub = SyncHub::in_memory();
/// let cart = hub
///     .domain::<Vec<String>>(CoordinatorConfig::new("cart"), Some(&PersistenceConfig::session("cart")))
///     .unwrap();
/// assert_eq!(hub.domains(), vec!["cart".to_string()]);
/// assert_eq!(cart.domain(), "cart");
/// ```
pub struct SyncHub {
    events: EventBus,
    storage: StorageProvider,
    domains: Mutex<BTreeMap<String, PhaseProbe>>,
}

impl SyncHub {
    /// Creates a hub over `storage` with a fresh event bus.
    pub fn new(storage: StorageProvider) -> Self {
        Self::with_events(storage, EventBus::new())
    }

    /// Creates a hub publishing to an existing bus.
    pub fn with_events(storage: StorageProvider, events: EventBus) -> Self {
        Self {
            events,
            storage,
            domains: Mutex::new(BTreeMap::new()),
        }
    }

    /// Creates a hub whose every storage scope lives in memory.
    pub fn in_memory() -> Self {
        Self::new(StorageProvider::in_memory())
    }

    /// Creates a hub whose local scope persists to files under `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Storage`] if the directory cannot be created.
    pub fn with_local_dir(dir: &Path) -> CoreResult<Self> {
        Ok(Self::new(StorageProvider::with_local_dir(dir)?))
    }

    /// Returns the shared event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribes to the events of every domain.
    pub fn subscribe(&self) -> UnboundedReceiver<LifecycleEvent> {
        self.events.subscribe()
    }

    /// Returns the shared storage provider.
    pub fn storage(&self) -> &StorageProvider {
        &self.storage
    }

    /// Builds the coordinator for a new domain.
    ///
    /// With `persistence`, the domain's container restores from and mirrors
    /// to the provider's backend for that scope.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DuplicateDomain`] if a live domain already uses
    /// the name.
    pub fn domain<T: SnapshotData>(
        &self,
        config: CoordinatorConfig,
        persistence: Option<&PersistenceConfig>,
    ) -> CoreResult<Arc<Coordinator<T>>> {
        let mut domains = self.domains.lock();
        if let Some(phase_of) = domains.get(&config.domain) {
            if phase_of().is_some() {
                return Err(CoreError::DuplicateDomain(config.domain));
            }
        }

        let container = match persistence {
            Some(persistence) => StateContainer::with_persistence(&self.storage, persistence),
            None => StateContainer::new(),
        };
        let name = config.domain.clone();
        let coordinator = Arc::new(Coordinator::new(
            config,
            Arc::new(container),
            self.events.clone(),
        ));

        let weak = Arc::downgrade(&coordinator);
        domains.insert(
            name.clone(),
            Box::new(move || weak.upgrade().map(|c| c.phase())),
        );
        tracing::debug!(domain = %name, persistent = persistence.is_some(), "domain registered");
        Ok(coordinator)
    }

    /// Returns the names of live domains, sorted.
    pub fn domains(&self) -> Vec<String> {
        self.status().into_keys().collect()
    }

    /// Returns the current phase of every live domain.
    pub fn status(&self) -> BTreeMap<String, Phase> {
        let mut domains = self.domains.lock();
        domains.retain(|_, phase_of| phase_of().is_some());
        domains
            .iter()
            .filter_map(|(name, phase_of)| phase_of().map(|phase| (name.clone(), phase)))
            .collect()
    }

    /// Returns true if no live domain is initializing or syncing.
    pub fn is_settled(&self) -> bool {
        self.status().values().all(Phase::is_settled)
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for SyncHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHub")
            .field("domains", &self.domains.lock().keys().collect::<Vec<_>>())
            .field("events", &self.events)
            .finish()
    }
}
