//! Attaches the stored credential to outgoing operations.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::auth::store::TokenStore;
use crate::auth::tokens::TokenPair;
use crate::error::Failure;
use crate::net::transport::OutgoingRequest;
use crate::operation::Operation;

/// First stage of the pipeline.
///
/// Public operations go out anonymously even when a session exists. Private
/// operations without a stored access token fail here, before any network
/// call is made.
#[derive(Clone)]
pub struct AuthInjector {
    store: Arc<dyn TokenStore>,
}

impl AuthInjector {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Turn `operation` into a request, with a bearer credential when required.
    pub fn augment(&self, operation: &Operation) -> Result<OutgoingRequest, Failure> {
        if !operation.context.requires_auth {
            trace!(operation = %operation.name, "Public operation; no credential attached");
            return Ok(OutgoingRequest::anonymous(
                &operation.name,
                operation.document.clone(),
                operation.variables.clone(),
            ));
        }

        match self.current()? {
            Some(pair) => Ok(OutgoingRequest::authenticated(
                &operation.name,
                operation.document.clone(),
                operation.variables.clone(),
                pair.bearer(),
            )),
            None => {
                debug!(operation = %operation.name, "No access token stored; failing fast");
                Err(Failure::missing_credential())
            }
        }
    }

    /// The stored pair, treating an empty access token as no session.
    pub fn current(&self) -> Result<Option<TokenPair>, Failure> {
        Ok(self
            .store
            .get()?
            .filter(|pair| !pair.access_token.is_empty()))
    }
}

impl std::fmt::Debug for AuthInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInjector")
            .field("store", &self.store.name())
            .finish()
    }
}
