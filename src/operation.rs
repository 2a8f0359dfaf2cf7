//! Operations submitted to the pipeline.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Failure;

/// Named arguments of an operation.
pub type Variables = serde_json::Map<String, Value>;

/// Whether an operation reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

/// Where a query result may come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchPolicy {
    /// Serve from the result cache when present, otherwise go to the network.
    CacheFirst,
    /// Always go to the network. The result is still written to the cache.
    NetworkOnly,
}

/// Per-call options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationContext {
    /// When false, no credential is ever attached, even if one is stored.
    pub requires_auth: bool,

    /// Arguments that identify the cached result. `None` means all of them.
    pub cache_key_args: Option<Vec<String>>,

    /// Overrides the kind's default fetch policy.
    pub fetch_policy: Option<FetchPolicy>,
}

impl Default for OperationContext {
    fn default() -> Self {
        Self {
            requires_auth: true,
            cache_key_args: None,
            fetch_policy: None,
        }
    }
}

impl OperationContext {
    /// Context for public endpoints (catalog browsing, login, signup).
    pub fn public() -> Self {
        Self {
            requires_auth: false,
            ..Self::default()
        }
    }
}

/// A named, parameterized request.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    /// Query document sent alongside the name. Servers with persisted
    /// operations only need the name.
    pub document: Option<String>,
    pub variables: Variables,
    pub context: OperationContext,
}

impl Operation {
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(name, OperationKind::Query)
    }

    pub fn mutation(name: impl Into<String>) -> Self {
        Self::new(name, OperationKind::Mutation)
    }

    fn new(name: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            name: name.into(),
            kind,
            document: None,
            variables: Variables::new(),
            context: OperationContext::default(),
        }
    }

    /// Build an operation from a [`TypedOperation`] and its variables.
    pub fn from_typed<O: TypedOperation>(variables: &O::Variables) -> Result<Self, Failure> {
        let variables = match serde_json::to_value(variables)? {
            Value::Object(map) => map,
            Value::Null => Variables::new(),
            other => {
                return Err(Failure::Decode(format!(
                    "variables for {} must serialize to an object, got {other}",
                    O::NAME
                )));
            }
        };

        Ok(Self {
            name: O::NAME.to_string(),
            kind: O::KIND,
            document: O::document().map(str::to_string),
            variables,
            context: OperationContext {
                requires_auth: O::REQUIRES_AUTH,
                cache_key_args: O::cache_key_args()
                    .map(|args| args.iter().map(|a| a.to_string()).collect()),
                fetch_policy: None,
            },
        })
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    pub fn with_context(mut self, context: OperationContext) -> Self {
        self.context = context;
        self
    }

    /// Mark the operation as not requiring a credential.
    pub fn public(mut self) -> Self {
        self.context.requires_auth = false;
        self
    }

    pub fn with_cache_key_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context.cache_key_args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.context.fetch_policy = Some(policy);
        self
    }

    /// Effective fetch policy: explicit context first, then the kind's default.
    pub fn fetch_policy(&self) -> FetchPolicy {
        self.context.fetch_policy.unwrap_or(match self.kind {
            OperationKind::Query => FetchPolicy::CacheFirst,
            OperationKind::Mutation => FetchPolicy::NetworkOnly,
        })
    }

    /// Only queries are ever cached.
    pub fn is_cacheable(&self) -> bool {
        self.kind == OperationKind::Query
    }
}

/// An operation with a concrete variables type and result type.
///
/// The pipeline decodes `data[ROOT_FIELD]` of the response into `Output`, so a
/// shape mismatch surfaces as [`Failure::Decode`] at the boundary instead of
/// deep inside a caller.
pub trait TypedOperation {
    const NAME: &'static str;
    const ROOT_FIELD: &'static str;
    const KIND: OperationKind = OperationKind::Query;
    const REQUIRES_AUTH: bool = true;

    type Variables: Serialize;
    type Output: DeserializeOwned;

    fn document() -> Option<&'static str> {
        None
    }

    fn cache_key_args() -> Option<&'static [&'static str]> {
        None
    }
}

/// Decode the root field of a response payload for `O`.
pub fn decode_root<O: TypedOperation>(data: &Value) -> Result<O::Output, Failure> {
    let root = data.get(O::ROOT_FIELD).cloned().unwrap_or(Value::Null);
    serde_json::from_value(root)
        .map_err(|e| Failure::Decode(format!("{}.{}: {e}", O::NAME, O::ROOT_FIELD)))
}
