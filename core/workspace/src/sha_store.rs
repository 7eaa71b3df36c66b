//! Path → blob SHA store.
//!
//! Writes must carry the SHA of the last successful read or write of the
//! same path. The store is replaced wholesale on every reconciliation and
//! updated per path after each successful upload or download.

use std::collections::HashMap;
use std::sync::RwLock;

/// Injectable store of the last known blob SHA per remote path.
pub trait ShaStore: Send + Sync {
    fn get(&self, path: &str) -> Option<String>;

    fn set(&self, path: &str, sha: &str);

    fn remove(&self, path: &str);

    /// Replace the whole map.
    fn replace_all(&self, shas: HashMap<String, String>);

    fn snapshot(&self) -> HashMap<String, String>;
}

/// In-process SHA store.
#[derive(Debug, Default)]
pub struct MemoryShaStore {
    shas: RwLock<HashMap<String, String>>,
}

impl MemoryShaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.shas.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ShaStore for MemoryShaStore {
    fn get(&self, path: &str) -> Option<String> {
        self.shas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    fn set(&self, path: &str, sha: &str) {
        self.shas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), sha.to_string());
    }

    fn remove(&self, path: &str) {
        self.shas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(path);
    }

    fn replace_all(&self, shas: HashMap<String, String>) {
        *self.shas.write().unwrap_or_else(|e| e.into_inner()) = shas;
    }

    fn snapshot(&self) -> HashMap<String, String> {
        self.shas.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
