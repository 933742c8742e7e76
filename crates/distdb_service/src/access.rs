//! Access checks applied before any store is touched.

use crate::context::ProcessContext;
use dashmap::DashMap;
use std::collections::HashSet;

/// Decides whether a caller may use a store.
pub trait AccessChecker: Send + Sync {
    /// True if `ctx` may access `store` of `bundle`.
    fn check(&self, bundle: &str, store: &str, ctx: &ProcessContext) -> bool;
}

/// Allows every caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessChecker for AllowAll {
    fn check(&self, _bundle: &str, _store: &str, _ctx: &ProcessContext) -> bool {
        true
    }
}

/// Grants access by access token: a token may use the stores of the
/// bundles it was registered for.
#[derive(Debug, Default)]
pub struct TokenAccessChecker {
    grants: DashMap<u32, HashSet<String>>,
}

impl TokenAccessChecker {
    /// Creates a checker with no grants.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `token` access every store of `bundle`.
    pub fn grant(&self, token: u32, bundle: impl Into<String>) {
        self.grants.entry(token).or_default().insert(bundle.into());
    }

    /// Withdraws every grant of `token`.
    pub fn revoke(&self, token: u32) {
        self.grants.remove(&token);
    }
}

impl AccessChecker for TokenAccessChecker {
    fn check(&self, bundle: &str, _store: &str, ctx: &ProcessContext) -> bool {
        self.grants
            .get(&ctx.token)
            .is_some_and(|bundles| bundles.contains(bundle))
    }
}
