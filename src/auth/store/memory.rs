//! In-memory token store.

use super::TokenStore;
use crate::auth::error::StoreError;
use crate::auth::tokens::TokenPair;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::instrument;

/// In-memory token store.
///
/// Cloning shares the underlying slot, so a clone handed to a test observes
/// every write made through the pipeline. Each `new()` is independent, which
/// keeps pipeline instances from sharing session state by accident.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    inner: Arc<RwLock<Option<TokenPair>>>,
}

impl MemoryTokenStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding an initial pair.
    pub fn with_pair(pair: TokenPair) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(pair))),
        }
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    #[instrument(skip_all)]
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(pair.clone());
        Ok(())
    }

    #[instrument(skip_all)]
    fn clear(&self) -> Result<(), StoreError> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = None;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_new_is_empty() {
        let store = MemoryTokenStore::new();
        assert!(store.get().unwrap().is_none());
        assert!(!store.exists().unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_memory_with_pair() {
        let store = MemoryTokenStore::with_pair(TokenPair::new("access", "refresh", Some(3600)));
        let loaded = store.get().unwrap().unwrap();
        assert_eq!(loaded.access_token, "access");
        assert_eq!(loaded.refresh_token, "refresh");
        assert!(store.exists().unwrap());
    }

    #[test]
    fn test_memory_set_replaces_whole_pair() {
        let store = MemoryTokenStore::with_pair(TokenPair::new("a1", "r1", None));
        store.set(&TokenPair::new("a2", "r2", None)).unwrap();
        let loaded = store.get().unwrap().unwrap();
        assert_eq!(loaded.access_token, "a2");
        assert_eq!(loaded.refresh_token, "r2");
    }

    #[test]
    fn test_memory_clear() {
        let store = MemoryTokenStore::with_pair(TokenPair::new("a", "r", None));
        store.clear().unwrap();
        assert!(store.is_empty());
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_memory_clones_share_state_but_instances_do_not() {
        let store = MemoryTokenStore::new();
        let view = store.clone();
        store.set(&TokenPair::new("a", "r", None)).unwrap();
        assert!(view.exists().unwrap());

        let other = MemoryTokenStore::new();
        assert!(!other.exists().unwrap());
    }
}
