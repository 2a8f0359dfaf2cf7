//! Client-side data-access pipeline for the storefront.
//!
//! Attaches credentials, refreshes and replays on authentication failures,
//! and keeps a policy-driven result cache in step with the session.

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod net;
pub mod operation;
pub mod pipeline;
pub mod reference;

pub use crate::auth::{RefreshState, TokenPair, TokenStore};
pub use crate::cache::{CachePolicy, PolicyRegistry, ResultCache};
pub use crate::config::Config;
pub use crate::error::{AuthFailure, Failure, NetworkFailure};
pub use crate::events::{Subscription, TokenEvent, TokenEventBus};
pub use crate::operation::{FetchPolicy, Operation, OperationContext, TypedOperation, Variables};
pub use crate::pipeline::{Pipeline, PipelineBuilder, SessionStatus};
