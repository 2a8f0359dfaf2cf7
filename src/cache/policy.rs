use std::collections::HashMap;

use crate::cache::key::CacheKey;
use crate::cache::types::{CachePolicy, PolicyRule};
use crate::operation::Operation;

/// Per-operation cache rules. Operations without a rule use [`CachePolicy::Replace`]
/// keyed on all of their variables.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    rules: HashMap<String, PolicyRule>,
}

/// Where a query result lives in the cache and how it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePlan {
    pub key: CacheKey,
    pub policy: CachePolicy,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the reference-data rules.
    pub fn with_reference_defaults() -> Self {
        let mut registry = Self::new();
        registry.extend(crate::reference::default_policies());
        registry
    }

    /// Set the rule for `operation`, replacing any existing one.
    pub fn insert(&mut self, operation: impl Into<String>, rule: PolicyRule) -> &mut Self {
        self.rules.insert(operation.into(), rule);
        self
    }

    pub fn extend<I, S>(&mut self, rules: I)
    where
        I: IntoIterator<Item = (S, PolicyRule)>,
        S: Into<String>,
    {
        for (name, rule) in rules {
            self.insert(name, rule);
        }
    }

    pub fn get(&self, operation: &str) -> Option<&PolicyRule> {
        self.rules.get(operation)
    }

    pub fn policy_for(&self, operation: &str) -> CachePolicy {
        self.get(operation).map(|r| r.policy).unwrap_or_default()
    }

    /// Cache plan for `operation`, or `None` for mutations.
    ///
    /// Key arguments given on the operation's context win over the rule's.
    pub fn plan(&self, operation: &Operation) -> Option<CachePlan> {
        if !operation.is_cacheable() {
            return None;
        }

        let rule = self.get(&operation.name);
        let key_args = operation
            .context
            .cache_key_args
            .as_deref()
            .or_else(|| rule.and_then(|r| r.key_args.as_deref()));

        Some(CachePlan {
            key: CacheKey::for_operation(&operation.name, &operation.variables, key_args),
            policy: rule.map(|r| r.policy).unwrap_or_default(),
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
