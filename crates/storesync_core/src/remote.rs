//! Capability traits implemented by domain remote adapters.

use crate::error::RemoteError;
use std::future::Future;

/// The read capability every domain's remote adapter provides: fetching
/// the server-authoritative value of the whole domain.
///
/// Write capabilities are domain-specific and declared by each domain as
/// its own trait. A capability only some adapters offer (for example a
/// payment `capture` step) is held as an `Option` on the domain, never
/// discovered at runtime.
pub trait RemoteSource<T>: Send + Sync {
    /// Fetches the current server state.
    fn fetch(&self) -> impl Future<Output = Result<T, RemoteError>> + Send;
}
