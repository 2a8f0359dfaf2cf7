//! The request pipeline.
//!
//! `submit` runs every operation through the same stages:
//!
//! 1. cache read for `CacheFirst` queries
//! 2. [`AuthInjector`] attaches the credential (or fails fast)
//! 3. optional proactive refresh when the token is about to expire
//! 4. [`Transport`] sends the request
//! 5. [`RefreshCoordinator`] refreshes and replays on an authentication failure
//! 6. cache write according to the operation's policy

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::auth::exchange::HttpRefreshExchange;
use crate::auth::injector::AuthInjector;
use crate::auth::refresh::{RefreshCoordinator, Settled, TransitionObserver};
use crate::auth::store::{MemoryTokenStore, TokenStore};
use crate::auth::tokens::{TokenGrant, TokenPair};
use crate::auth::traits::RefreshExchange;
use crate::cache::{CachePlan, CachePolicy, PolicyRegistry, ResultCache};
use crate::config::{Config, ConfigError};
use crate::error::Failure;
use crate::events::{Subscription, TokenEventBus};
use crate::net::client::HttpClient;
use crate::net::traits::Transport;
use crate::net::transport::HttpTransport;
use crate::operation::{FetchPolicy, Operation, TypedOperation, Variables, decode_root};

/// Session state as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub expired: bool,
    pub needs_refresh: bool,
    pub expires_in_secs: Option<u64>,
    pub store: String,
}

/// Data-access pipeline shared by every page of the storefront.
pub struct Pipeline {
    injector: AuthInjector,
    store: Arc<dyn TokenStore>,
    transport: Arc<dyn Transport>,
    coordinator: RefreshCoordinator,
    cache: Arc<ResultCache>,
    policies: PolicyRegistry,
    events: TokenEventBus,
    cache_enabled: bool,
    proactive_skew: Option<Duration>,
    login_operation: String,
    _cache_subscriptions: Vec<Subscription>,
}

impl Pipeline {
    pub fn builder(
        transport: Arc<dyn Transport>,
        exchange: Arc<dyn RefreshExchange>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(transport, exchange)
    }

    /// HTTP pipeline wired from configuration.
    pub fn from_config(config: &Config, events: TokenEventBus) -> Result<Self, ConfigError> {
        let mut client = HttpClient::builder()
            .connect_timeout(config.connect_timeout())
            .request_timeout(config.request_timeout());
        if let Some(ua) = &config.transport.user_agent {
            client = client.user_agent(ua);
        }
        let client = client.build();

        let transport = HttpTransport::new(client.clone(), config.endpoint_url()?)
            .with_timeout(config.request_timeout());
        let exchange = HttpRefreshExchange::new(client, config.refresh_url()?)
            .with_timeout(config.request_timeout());

        let mut builder = Self::builder(Arc::new(transport), Arc::new(exchange))
            .store(config.token_store()?)
            .events(events)
            .policies(config.policy_registry())
            .cache_enabled(config.cache.enabled)
            .login_operation(&config.session.login_operation);
        if config.session.proactive_refresh {
            builder = builder.proactive_refresh(config.refresh_skew());
        }
        Ok(builder.build())
    }

    /// Run `operation` through the pipeline.
    #[instrument(skip_all, fields(operation = %operation.name))]
    pub async fn submit(&self, operation: Operation) -> Result<Value, Failure> {
        let plan = if self.cache_enabled {
            self.policies.plan(&operation)
        } else {
            None
        };

        if let Some(plan) = &plan {
            if operation.fetch_policy() == FetchPolicy::CacheFirst {
                if let Some(value) = self.cache.read(&plan.key) {
                    debug!(key = %plan.key, "Served from cache");
                    return Ok(value);
                }
            }
        }

        let generation = self.cache.generation();
        let settled = self.dispatch(&operation).await?;

        Ok(match plan {
            Some(plan) => self.store_result(plan, settled, generation),
            None => settled.value,
        })
    }

    /// Like [`Pipeline::submit`], but gives up with [`Failure::Cancelled`]
    /// once `cancel` fires. An abandoned result is never written to the cache.
    pub async fn submit_cancellable(
        &self,
        operation: Operation,
        cancel: CancellationToken,
    ) -> Result<Value, Failure> {
        let name = operation.name.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(operation = %name, "Operation cancelled by caller");
                Err(Failure::Cancelled)
            }
            result = self.submit(operation) => result,
        }
    }

    /// Submit a typed operation and decode its root field.
    pub async fn execute<O: TypedOperation>(
        &self,
        variables: &O::Variables,
    ) -> Result<O::Output, Failure> {
        let operation = Operation::from_typed::<O>(variables)?;
        let data = self.submit(operation).await?;
        decode_root::<O>(&data)
    }

    /// Sign in through the public login mutation and persist the returned pair.
    pub async fn sign_in(&self, variables: Variables) -> Result<TokenPair, Failure> {
        let operation = Operation::mutation(&self.login_operation)
            .with_variables(variables)
            .public();
        let data = self.submit(operation).await?;

        let root = data.get(&self.login_operation).cloned().unwrap_or(Value::Null);
        let grant: TokenGrant = serde_json::from_value(root)
            .map_err(|e| Failure::Decode(format!("{}: {e}", self.login_operation)))?;
        let pair = grant.into_pair(None)?;
        self.coordinator.install(&pair)?;
        info!("Signed in");
        Ok(pair)
    }

    /// Persist a pair obtained outside the pipeline, e.g. from signup.
    pub fn install_tokens(&self, pair: &TokenPair) -> Result<(), Failure> {
        self.coordinator.install(pair)
    }

    pub fn sign_out(&self) -> Result<(), Failure> {
        self.coordinator.end_session()
    }

    pub fn session_status(&self) -> Result<SessionStatus, Failure> {
        let skew = self.proactive_skew.unwrap_or(Duration::ZERO);
        let status = match self.injector.current()? {
            Some(pair) => SessionStatus {
                authenticated: true,
                expired: pair.is_expired(),
                needs_refresh: pair.needs_refresh(skew),
                expires_in_secs: pair.expires_at.map(|_| pair.time_until_expiry().as_secs()),
                store: self.store.name().to_string(),
            },
            None => SessionStatus {
                authenticated: false,
                expired: false,
                needs_refresh: false,
                expires_in_secs: None,
                store: self.store.name().to_string(),
            },
        };
        Ok(status)
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn events(&self) -> &TokenEventBus {
        &self.events
    }

    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    async fn dispatch(&self, operation: &Operation) -> Result<Settled, Failure> {
        let mut request = self.injector.augment(operation)?;

        if let (Some(skew), true) = (self.proactive_skew, request.is_authenticated()) {
            if let Some(pair) = self.injector.current()? {
                if pair.needs_refresh(skew) {
                    debug!("Access token near expiry; refreshing before send");
                    let fresh = self.coordinator.refresh(Some(&pair.access_token)).await?;
                    request = request.with_bearer(fresh.bearer());
                }
            }
        }

        let outcome = self.transport.execute(&request).await;
        self.coordinator
            .settle(&request, outcome, self.transport.as_ref())
            .await
    }

    /// Write a settled result unless the token pair changed underneath it.
    ///
    /// An authenticated result is only cached while its credential is still
    /// the stored one, checked against the generation read beforehand so a
    /// change racing the write is caught too. This admits a refresh replay.
    /// An anonymous result needs the generation from before it was sent.
    fn store_result(&self, plan: CachePlan, settled: Settled, started: u64) -> Value {
        let Settled { value, bearer } = settled;
        if plan.policy == CachePolicy::StaticRetain {
            return self.cache.write(plan.key, value, plan.policy);
        }

        let generation = match bearer {
            Some(bearer) => {
                let generation = self.cache.generation();
                if !self.holds_credential(&bearer) {
                    debug!(key = %plan.key, "Credential changed during request; result not cached");
                    return value;
                }
                generation
            }
            None => started,
        };

        self.cache
            .write_if_current(plan.key, value, plan.policy, generation)
            .unwrap_or_else(|stale| stale)
    }

    fn holds_credential(&self, bearer: &str) -> bool {
        matches!(self.injector.current(), Ok(Some(pair)) if pair.bearer() == bearer)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store.name())
            .field("cache", &self.cache)
            .field("cache_enabled", &self.cache_enabled)
            .field("proactive_skew", &self.proactive_skew)
            .field("login_operation", &self.login_operation)
            .finish()
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    transport: Arc<dyn Transport>,
    exchange: Arc<dyn RefreshExchange>,
    store: Option<Arc<dyn TokenStore>>,
    events: Option<TokenEventBus>,
    policies: Option<PolicyRegistry>,
    observer: Option<Arc<dyn TransitionObserver>>,
    proactive_skew: Option<Duration>,
    cache_enabled: bool,
    login_operation: String,
}

impl PipelineBuilder {
    fn new(transport: Arc<dyn Transport>, exchange: Arc<dyn RefreshExchange>) -> Self {
        Self {
            transport,
            exchange,
            store: None,
            events: None,
            policies: None,
            observer: None,
            proactive_skew: None,
            cache_enabled: true,
            login_operation: "login".to_string(),
        }
    }

    /// Token store backend. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Event bus shared with the UI. Defaults to a private bus.
    pub fn events(mut self, events: TokenEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Cache rules. Defaults to the reference-data rules.
    pub fn policies(mut self, policies: PolicyRegistry) -> Self {
        self.policies = Some(policies);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn TransitionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Refresh before sending when the token expires within `skew`.
    pub fn proactive_refresh(mut self, skew: Duration) -> Self {
        self.proactive_skew = Some(skew);
        self
    }

    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn login_operation(mut self, name: impl Into<String>) -> Self {
        self.login_operation = name.into();
        self
    }

    pub fn build(self) -> Pipeline {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryTokenStore::new()));
        let events = self.events.unwrap_or_default();

        let mut coordinator =
            RefreshCoordinator::new(Arc::clone(&store), self.exchange, events.clone());
        if let Some(observer) = self.observer {
            coordinator = coordinator.with_observer(observer);
        }

        let cache = Arc::new(ResultCache::new());
        let subscriptions = cache.attach(&events);

        debug!(
            store = store.name(),
            proactive = self.proactive_skew.is_some(),
            cache = self.cache_enabled,
            "Pipeline ready"
        );

        Pipeline {
            injector: AuthInjector::new(Arc::clone(&store)),
            store,
            transport: self.transport,
            coordinator,
            cache,
            policies: self
                .policies
                .unwrap_or_else(PolicyRegistry::with_reference_defaults),
            events,
            cache_enabled: self.cache_enabled,
            proactive_skew: self.proactive_skew,
            login_operation: self.login_operation,
            _cache_subscriptions: subscriptions,
        }
    }
}
