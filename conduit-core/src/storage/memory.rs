/*!
In-process backend.

Payloads live in a map guarded by a read/write lock. `mem://` contracts all
share one process-wide store so a persist through one connector is visible
to a load through another.
*/

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::BackendClient;
use crate::{ConnectorError, Result};

type Store = Arc<RwLock<HashMap<String, Vec<u8>>>>;

static SHARED_STORE: Lazy<Store> = Lazy::new(|| Arc::new(RwLock::new(HashMap::new())));

/// Memory-backed client
#[derive(Debug, Clone)]
pub struct MemoryClient {
    data: Store,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// Client over a private, empty store
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Client over the process-wide store used by `mem://` contracts
    pub fn shared() -> Self {
        Self {
            data: SHARED_STORE.clone(),
        }
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.read_guard("len", "").map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_guard(&self, verb: &'static str, key: &str) -> Result<RwLockReadGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .read()
            .map_err(|_| ConnectorError::backend(verb, key, "memory store lock poisoned"))
    }

    fn write_guard(&self, verb: &'static str, key: &str) -> Result<RwLockWriteGuard<'_, HashMap<String, Vec<u8>>>> {
        self.data
            .write()
            .map_err(|_| ConnectorError::backend(verb, key, "memory store lock poisoned"))
    }
}

impl BackendClient for MemoryClient {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, key: &str) -> Result<Vec<u8>> {
        let map = self.read_guard("read", key)?;
        map.get(key)
            .cloned()
            .ok_or_else(|| ConnectorError::not_found("read", key))
    }

    fn write(&self, key: &str, data: &[u8], content_type: &str) -> Result<()> {
        debug!(key = %key, size = data.len(), content_type = %content_type, "Storing payload in memory");
        let mut map = self.write_guard("write", key)?;
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read_guard("exists", key)?.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.write_guard("delete", key)?;
        match map.remove(key) {
            Some(_) => Ok(()),
            None => Err(ConnectorError::not_found("delete", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Fingerprint;

    #[test]
    fn test_memory_client_basic_operations() {
        let client = MemoryClient::new();
        let key = "folder/data.csv";

        assert!(!client.exists(key).unwrap());
        client.write(key, b"a,b\n1,2\n", "text/csv").unwrap();
        assert!(client.exists(key).unwrap());
        assert_eq!(client.read(key).unwrap(), b"a,b\n1,2\n");
        assert_eq!(client.len(), 1);

        client.delete(key).unwrap();
        assert!(!client.exists(key).unwrap());
        assert!(client.is_empty());
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let client = MemoryClient::new();
        assert!(client.read("nope").unwrap_err().is_not_found());
        assert!(client.delete("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_content_fingerprint() {
        let client = MemoryClient::new();
        assert!(client.fingerprint("k").unwrap().is_absent());

        client.write("k", b"one", "text/plain").unwrap();
        let first = client.fingerprint("k").unwrap();
        assert!(matches!(first, Fingerprint::Etag(_)));
        assert_eq!(first, client.fingerprint("k").unwrap());

        client.write("k", b"two", "text/plain").unwrap();
        assert_ne!(first, client.fingerprint("k").unwrap());
    }

    #[test]
    fn test_shared_clients_see_each_other() {
        let writer = MemoryClient::shared();
        let reader = MemoryClient::shared();
        writer
            .write("memory-tests/shared.json", b"{}", "application/json")
            .unwrap();
        assert_eq!(reader.read("memory-tests/shared.json").unwrap(), b"{}");

        let private = MemoryClient::new();
        assert!(!private.exists("memory-tests/shared.json").unwrap());
    }
}
