//! Refresh Coordinator: detect a rejected credential, refresh once, replay once.
//!
//! Every operation runs through the machine below after its first transport
//! attempt:
//!
//! ```text
//! Idle -> Detecting -> Refreshing -> Replaying -> Resolved
//!              |             |            |
//!              |             +------------+-----> Failed
//!              +--> (success / non-auth failure passes through)
//! ```
//!
//! Whatever the path, the machine reports `Idle` again once the operation
//! has settled.
//!
//! Concurrent operations that hit an authentication failure share one
//! in-flight refresh. The refresh runs on its own task so that a caller
//! dropping its future never strands the others or loses a rotated pair.

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::auth::store::TokenStore;
use crate::auth::tokens::TokenPair;
use crate::auth::traits::RefreshExchange;
use crate::error::{Failure, NetworkFailure};
use crate::events::{TokenEvent, TokenEventBus};
use crate::net::traits::Transport;
use crate::net::transport::OutgoingRequest;

/// States of the refresh-and-replay machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Idle,
    Detecting,
    Refreshing,
    Replaying,
    Resolved,
    Failed,
}

impl RefreshState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Refreshing => "refreshing",
            Self::Replaying => "replaying",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RefreshState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives every state transition, tagged with the operation name.
pub trait TransitionObserver: Send + Sync {
    fn on_transition(&self, operation: &str, state: RefreshState);
}

impl<F> TransitionObserver for F
where
    F: Fn(&str, RefreshState) + Send + Sync,
{
    fn on_transition(&self, operation: &str, state: RefreshState) {
        self(operation, state)
    }
}

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenPair, Failure>>>;

/// Result of an operation that made it through the machine.
#[derive(Clone, PartialEq)]
pub struct Settled {
    pub value: Value,
    /// Credential of the attempt that produced `value`; the replay's when one
    /// happened.
    pub bearer: Option<String>,
}

impl std::fmt::Debug for Settled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settled")
            .field("value", &self.value)
            .field("authenticated", &self.bearer.is_some())
            .finish()
    }
}

/// Store plus bus: the only path through which the token pair changes.
#[derive(Clone)]
struct Session {
    store: Arc<dyn TokenStore>,
    events: TokenEventBus,
}

impl Session {
    fn install(&self, pair: &TokenPair) -> Result<(), Failure> {
        if !pair.is_complete() {
            return Err(Failure::Decode(
                "token pair needs both an access and a refresh token".into(),
            ));
        }
        self.store.set(pair)?;
        self.events.publish(TokenEvent::Updated);
        Ok(())
    }

    fn end(&self) -> Result<(), Failure> {
        let cleared = self.store.clear();
        if let Err(e) = &cleared {
            error!(error = %e, store = self.store.name(), "Failed to clear token store");
        }
        self.events.publish(TokenEvent::Removed);
        cleared.map_err(Failure::from)
    }
}

/// Owns the refresh path and the session entry points.
pub struct RefreshCoordinator {
    session: Session,
    exchange: Arc<dyn RefreshExchange>,
    in_flight: Mutex<Option<SharedRefresh>>,
    observer: Option<Arc<dyn TransitionObserver>>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        exchange: Arc<dyn RefreshExchange>,
        events: TokenEventBus,
    ) -> Self {
        Self {
            session: Session { store, events },
            exchange,
            in_flight: Mutex::new(None),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Persist a pair obtained from sign-in and announce it.
    pub fn install(&self, pair: &TokenPair) -> Result<(), Failure> {
        info!(store = self.session.store.name(), "Session established");
        self.session.install(pair)
    }

    /// Clear the pair and announce the removal.
    pub fn end_session(&self) -> Result<(), Failure> {
        info!(store = self.session.store.name(), "Session ended");
        self.session.end()
    }

    fn transition(&self, operation: &str, state: RefreshState) {
        debug!(operation, %state, "Refresh state transition");
        if let Some(observer) = &self.observer {
            observer.on_transition(operation, state);
        }
    }

    /// Run the machine over the first attempt's `outcome`.
    ///
    /// `sent` is the request that produced it; on an authentication failure it
    /// is replayed at most once with the refreshed credential. A second
    /// authentication failure is final.
    pub async fn resolve(
        &self,
        sent: &OutgoingRequest,
        outcome: Result<Value, Failure>,
        transport: &dyn Transport,
    ) -> Result<Value, Failure> {
        self.settle(sent, outcome, transport)
            .await
            .map(|settled| settled.value)
    }

    /// [`RefreshCoordinator::resolve`], also reporting which credential the
    /// value was obtained with.
    pub async fn settle(
        &self,
        sent: &OutgoingRequest,
        outcome: Result<Value, Failure>,
        transport: &dyn Transport,
    ) -> Result<Settled, Failure> {
        let result = self.run(sent, outcome, transport).await;
        self.transition(&sent.name, RefreshState::Idle);
        result
    }

    async fn run(
        &self,
        sent: &OutgoingRequest,
        outcome: Result<Value, Failure>,
        transport: &dyn Transport,
    ) -> Result<Settled, Failure> {
        let operation = sent.name.as_str();
        self.transition(operation, RefreshState::Detecting);

        let failure = match outcome {
            Ok(value) => {
                return Ok(Settled {
                    value,
                    bearer: sent.bearer.clone(),
                });
            }
            Err(f) if !f.is_authentication() => return Err(f),
            Err(f) => f,
        };

        // Nothing to refresh for a request that carried no credential.
        if !sent.is_authenticated() {
            return Err(failure);
        }

        self.transition(operation, RefreshState::Refreshing);
        let rejected = sent
            .bearer
            .as_deref()
            .and_then(|b| b.strip_prefix("Bearer "));
        let pair = match self.refresh(rejected).await {
            Ok(pair) => pair,
            Err(e) => {
                self.transition(operation, RefreshState::Failed);
                return Err(e);
            }
        };

        self.transition(operation, RefreshState::Replaying);
        let replay = sent.with_bearer(pair.bearer());
        match transport.execute(&replay).await {
            Ok(value) => {
                self.transition(operation, RefreshState::Resolved);
                Ok(Settled {
                    value,
                    bearer: replay.bearer,
                })
            }
            Err(e) => {
                self.transition(operation, RefreshState::Failed);
                if e.is_authentication() {
                    warn!(operation, "Replay rejected after refresh");
                    Err(Failure::rejected())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Obtain a pair newer than `rejected_access`, joining any refresh in flight.
    ///
    /// If the store already holds a different access token, someone else
    /// refreshed in the meantime and that pair is returned without an
    /// exchange. Without a stored pair, or with an empty refresh token, the
    /// session is over.
    pub async fn refresh(&self, rejected_access: Option<&str>) -> Result<TokenPair, Failure> {
        let shared = {
            let mut slot = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            let pending = slot.as_ref().filter(|f| f.peek().is_none()).cloned();
            match pending {
                Some(pending) => {
                    debug!("Joining in-flight refresh");
                    pending
                }
                None => {
                    let current = match self.session.store.get()? {
                        Some(pair) => pair,
                        None => {
                            debug!("No stored session to refresh");
                            return Err(Failure::session_expired());
                        }
                    };

                    if rejected_access.is_some_and(|stale| stale != current.access_token) {
                        debug!("Credential already rotated; skipping exchange");
                        return Ok(current);
                    }

                    if current.refresh_token.is_empty() {
                        drop(slot);
                        warn!("No refresh token stored; ending session");
                        self.session.end()?;
                        return Err(Failure::session_expired());
                    }

                    let task = tokio::spawn(perform_refresh(
                        self.session.clone(),
                        Arc::clone(&self.exchange),
                        current.refresh_token,
                    ));
                    let fut: BoxFuture<'static, Result<TokenPair, Failure>> = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(Failure::Network(NetworkFailure::Other(format!(
                                "refresh task failed: {e}"
                            ))))
                        })
                    }
                    .boxed();
                    let shared = fut.shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    /// True while an exchange is running.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|f| f.peek().is_none())
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.session.store.name())
            .field("refreshing", &self.is_refreshing())
            .finish()
    }
}

async fn perform_refresh(
    session: Session,
    exchange: Arc<dyn RefreshExchange>,
    refresh_token: String,
) -> Result<TokenPair, Failure> {
    info!("Refreshing session credentials");

    // The spent refresh token is useless from here on, so a pair that cannot
    // be persisted ends the session just like a refused exchange.
    let outcome = match exchange.exchange(&refresh_token).await {
        Ok(grant) => grant
            .into_pair(Some(&refresh_token))
            .and_then(|pair| session.install(&pair).map(|()| pair)),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(pair) => {
            info!(expires_at = ?pair.expires_at, "Session refreshed");
            Ok(pair)
        }
        Err(e) => {
            warn!(kind = e.kind(), error = %e, "Refresh failed; ending session");
            // The end-of-session error is already logged; the caller needs to re-authenticate either way.
            let _ = session.end();
            Err(Failure::session_expired())
        }
    }
}
