//! In-memory storage backend.
//!
//! The default [`DataSource`] when no platform backend is configured, and
//! the backend tests run against. Readiness can be toggled to exercise the
//! locked-store path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::{DataSource, Result};

/// A [`DataSource`] backed by a process-local map.
#[derive(Default)]
pub struct MemoryDataSource {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    locked: AtomicBool,
}

impl MemoryDataSource {
    /// Create an empty, ready data source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backing store locking or unlocking.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }
}

impl DataSource for MemoryDataSource {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    fn is_ready(&self) -> bool {
        !self.locked.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let source = MemoryDataSource::new();
        source.put("k", b"v".to_vec()).unwrap();
        assert_eq!(source.get("k").unwrap().as_deref(), Some(b"v".as_slice()));

        source.remove("k").unwrap();
        assert_eq!(source.get("k").unwrap(), None);
    }

    #[test]
    fn list_keys_sees_all_entries() {
        let source = MemoryDataSource::new();
        source.put("a", vec![1]).unwrap();
        source.put("b", vec![2]).unwrap();

        let mut keys = source.list_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn lock_toggles_readiness() {
        let source = MemoryDataSource::new();
        assert!(source.is_ready());
        source.set_locked(true);
        assert!(!source.is_ready());
        source.set_locked(false);
        assert!(source.is_ready());
    }
}
