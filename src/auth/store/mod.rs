//! Token store implementations.

pub mod file;
pub mod memory;
pub mod trait_def;

#[cfg(feature = "system-keyring")]
pub mod keyring;

// Re-exports
pub use file::FileTokenStore;
pub use memory::MemoryTokenStore;
pub use trait_def::TokenStore;

#[cfg(feature = "system-keyring")]
pub use keyring::KeyringTokenStore;
