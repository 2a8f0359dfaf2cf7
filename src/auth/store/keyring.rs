//! Keyring-based token store.

use super::TokenStore;
use crate::auth::error::StoreError;
use crate::auth::tokens::TokenPair;
use tracing::instrument;

/// Keyring-based token store.
///
/// Keeps the pair as a single JSON secret in the system's native credential
/// store, so the three fields are always written and removed together.
///
/// Feature-gated behind `system-keyring`.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
    account: String,
}

impl Default for KeyringTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyringTokenStore {
    const SERVICE_NAME: &str = "storefront-client";
    const ACCOUNT_NAME: &str = "session";

    /// Create a store using the default service and account names.
    pub fn new() -> Self {
        Self {
            service: Self::SERVICE_NAME.to_string(),
            account: Self::ACCOUNT_NAME.to_string(),
        }
    }

    /// Create a store under a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: Self::ACCOUNT_NAME.to_string(),
        }
    }

    /// Check if the system keyring is usable on this machine.
    pub fn is_available() -> bool {
        match keyring::Entry::new("storefront-client-check", "availability-check") {
            Ok(entry) => match entry.get_password() {
                Ok(_) | Err(keyring::Error::NoEntry) => true,
                Err(keyring::Error::NoStorageAccess(_)) | Err(keyring::Error::PlatformFailure(_)) => {
                    false
                }
                Err(_) => true,
            },
            Err(_) => false,
        }
    }

    fn entry(&self) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| StoreError::Keyring(format!("failed to open keyring entry: {e}")))
    }
}

impl TokenStore for KeyringTokenStore {
    #[instrument(skip(self))]
    fn get(&self) -> Result<Option<TokenPair>, StoreError> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        }
    }

    #[instrument(skip_all)]
    fn set(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let secret = serde_json::to_string(pair)?;
        self.entry()?
            .set_password(&secret)
            .map_err(|e| StoreError::Keyring(e.to_string()))
    }

    #[instrument(skip(self))]
    fn clear(&self) -> Result<(), StoreError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StoreError::Keyring(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "keyring"
    }
}
