//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;
use storesync_core::{PersistedSnapshot, Phase};
use storesync_storage::{FileBackend, SnapshotBackend, StorageScope};

/// A decoded snapshot record.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Persistence key.
    pub key: String,
    /// Scope the record was written for.
    pub scope: StorageScope,
    /// Record size in bytes.
    pub size: usize,
    /// Stored phase.
    pub state: Phase,
    /// Stored error code, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Last sync time in milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<u64>,
    /// Stored data.
    pub data: Option<serde_json::Value>,
}

/// Runs the inspect command.
pub fn run(dir: &Path, key: Option<&str>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.is_dir() {
        return Err(format!("No snapshot directory found at {:?}", dir).into());
    }
    let backend = FileBackend::open(dir)?;

    let Some(key) = key else {
        let keys = list_keys(&backend)?;
        match format {
            "json" => println!("{}", serde_json::to_string_pretty(&keys)?),
            _ => {
                for key in keys {
                    println!("{key}");
                }
            }
        }
        return Ok(());
    };

    let result = inspect(&backend, key)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result)?,
    }
    Ok(())
}

/// Returns the persistence keys stored in the local scope.
pub fn list_keys(backend: &dyn SnapshotBackend) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    let prefix = StorageScope::Local.qualify("");
    Ok(backend
        .keys()?
        .into_iter()
        .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
        .collect())
}

/// Decodes the local-scope record for `key`.
pub fn inspect(
    backend: &dyn SnapshotBackend,
    key: &str,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let storage_key = StorageScope::Local.qualify(key);
    let bytes = backend
        .get(&storage_key)?
        .ok_or_else(|| format!("No snapshot stored for key {key:?}"))?;
    let record = PersistedSnapshot::<serde_json::Value>::decode(&bytes)?;
    if record.key != key || record.scope != StorageScope::Local {
        tracing::warn!(
            stored_key = %record.key,
            stored_scope = %record.scope,
            "record was persisted for another key or scope"
        );
    }

    let snapshot = record.snapshot;
    Ok(InspectResult {
        key: record.key,
        scope: record.scope,
        size: bytes.len(),
        state: snapshot.state(),
        error: snapshot.error().map(|e| e.code.clone()),
        last_synced_at: snapshot.last_synced_at().map(|t| t.as_millis()),
        data: snapshot.data().cloned(),
    })
}

fn print_text_output(result: &InspectResult) -> Result<(), Box<dyn std::error::Error>> {
    println!("Key:         {}", result.key);
    println!("Scope:       {}", result.scope);
    println!("Size:        {} bytes", result.size);
    println!("State:       {}", result.state);
    if let Some(code) = &result.error {
        println!("Error:       {code}");
    }
    match result.last_synced_at {
        Some(ms) => println!("Last synced: {ms} ms"),
        None => println!("Last synced: never"),
    }
    match &result.data {
        Some(data) => println!("Data:\n{}", serde_json::to_string_pretty(data)?),
        None => println!("Data:        none"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_core::{PersistenceConfig, StateContainer, StateSnapshot, Timestamp};
    use storesync_storage::InMemoryBackend;
    use std::sync::Arc;

    #[test]
    fn decodes_persisted_cart() {
        let backend = Arc::new(InMemoryBackend::new());
        let container: StateContainer<Vec<String>> =
            StateContainer::with_backend(backend.clone(), &PersistenceConfig::local("cart"));
        container.set(StateSnapshot::ready(vec!["SKU-TEE".to_string()], Timestamp(42)));

        let result = inspect(backend.as_ref(), "cart").unwrap();
        assert_eq!(result.key, "cart");
        assert_eq!(result.state, Phase::Ready);
        assert_eq!(result.last_synced_at, Some(42));
        assert_eq!(result.data, Some(serde_json::json!(["SKU-TEE"])));
    }

    #[test]
    fn lists_only_local_keys() {
        let backend = InMemoryBackend::new();
        backend.set("local/cart", b"x").unwrap();
        backend.set("session/cart", b"x").unwrap();
        backend.set("local/wishlist", b"x").unwrap();

        let mut keys = list_keys(&backend).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["cart", "wishlist"]);
    }

    #[test]
    fn missing_key_is_an_error() {
        let backend = InMemoryBackend::new();
        assert!(inspect(&backend, "cart").is_err());
    }

    #[test]
    fn garbage_record_is_an_error() {
        let backend = InMemoryBackend::new();
        backend.set("local/cart", &[0xff, 0x00, 0x13]).unwrap();
        assert!(inspect(&backend, "cart").is_err());
    }
}
