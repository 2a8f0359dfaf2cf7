//! Shared authentication traits.

use std::sync::Arc;

use crate::auth::tokens::TokenGrant;
use crate::error::Failure;

/// Trait for trading a refresh token for a new grant.
///
/// This is a network call distinct from the operation transport; any error it
/// returns ends the session.
#[async_trait::async_trait]
pub trait RefreshExchange: Send + Sync {
    /// Exchange `refresh_token` for a fresh grant.
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, Failure>;
}

#[async_trait::async_trait]
impl<T: RefreshExchange + ?Sized> RefreshExchange for Arc<T> {
    async fn exchange(&self, refresh_token: &str) -> Result<TokenGrant, Failure> {
        (**self).exchange(refresh_token).await
    }
}
