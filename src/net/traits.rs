//! Networking traits.

use std::sync::Arc;

use serde_json::Value;

use crate::error::Failure;
use crate::net::transport::OutgoingRequest;

/// Moves one augmented request to the far end and back.
///
/// Implementations classify their own failures: a rejected credential must
/// come back as [`Failure::Authentication`], and timeouts and connectivity
/// problems as the matching [`crate::error::NetworkFailure`] variants.
/// Nothing here retries or refreshes.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` and return the payload under `data`.
    async fn execute(&self, request: &OutgoingRequest) -> Result<Value, Failure>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn execute(&self, request: &OutgoingRequest) -> Result<Value, Failure> {
        (**self).execute(request).await
    }
}
