//! Session credentials: storage, injection and refresh.

pub mod error;
pub mod exchange;
pub mod injector;
pub mod refresh;
pub mod store;
pub mod tokens;
pub mod traits;

pub use error::StoreError;
pub use exchange::HttpRefreshExchange;
pub use injector::AuthInjector;
pub use refresh::{RefreshCoordinator, RefreshState, Settled, TransitionObserver};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use tokens::{TokenGrant, TokenPair};
pub use traits::RefreshExchange;

#[cfg(feature = "system-keyring")]
pub use store::KeyringTokenStore;
