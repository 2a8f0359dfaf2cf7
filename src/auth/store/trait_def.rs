//! Token store trait.

use crate::auth::error::StoreError;
use crate::auth::tokens::TokenPair;
use std::sync::Arc;

/// Durable storage for the session's token pair.
///
/// Pure storage with no refresh logic. Implementations must be thread-safe
/// and `set`/`clear` must be atomic with respect to `get`: a reader sees the
/// old pair, the new pair, or nothing, never a mix.
pub trait TokenStore: Send + Sync {
    /// Read the stored pair, if any.
    fn get(&self) -> Result<Option<TokenPair>, StoreError>;

    /// Replace the stored pair.
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError>;

    /// Remove the stored pair. Clearing an empty store is not an error.
    fn clear(&self) -> Result<(), StoreError>;

    /// Check whether a pair is stored.
    fn exists(&self) -> Result<bool, StoreError> {
        Ok(self.get()?.is_some())
    }

    /// Name of this backend, for logging.
    fn name(&self) -> &str;
}

// Blanket implementation for Arc<T>
impl<T: TokenStore + ?Sized> TokenStore for Arc<T> {
    fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        (**self).get()
    }
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        (**self).set(pair)
    }
    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
    fn exists(&self) -> Result<bool, StoreError> {
        (**self).exists()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}

// Blanket implementation for Box<T>
impl<T: TokenStore + ?Sized> TokenStore for Box<T> {
    fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        (**self).get()
    }
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        (**self).set(pair)
    }
    fn clear(&self) -> Result<(), StoreError> {
        (**self).clear()
    }
    fn exists(&self) -> Result<bool, StoreError> {
        (**self).exists()
    }
    fn name(&self) -> &str {
        (**self).name()
    }
}
