//! Ordered composition of rate-limiting stages.
//!
//! A chain evaluates its stages in order and stops at the first rejection,
//! so a rejected request never touches a later stage's counter, and slots
//! already taken on earlier stages are released. Passing
//! every stage yields a [`ChainPermit`]; once the guarded operation has run,
//! the caller records its outcome on the permit so failure-only stages can
//! count it.

use crate::limiter::{Admission, Outcome, RateLimitRule, RateLimited, RateLimiter, RequestContext};
use std::sync::Arc;
use tracing::debug;

/// Permission to run the guarded operation.
///
/// Dropping a permit without recording counts nothing on failure-only
/// stages.
#[derive(Debug)]
#[must_use = "record the outcome so failure-only stages can count it"]
pub struct ChainPermit {
    pending: Vec<(Arc<RateLimiter>, String)>,
}

impl ChainPermit {
    /// Record the guarded operation's outcome on every failure-only stage.
    pub fn record(self, outcome: Outcome) {
        for (stage, key) in self.pending {
            stage.record(&key, outcome);
        }
    }
}

/// A named, ordered list of rate-limiting stages.
#[derive(Debug, Clone)]
pub struct RateLimiterChain {
    name: String,
    stages: Vec<Arc<RateLimiter>>,
}

impl RateLimiterChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: RateLimiter) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a stage shared with other chains.
    #[must_use]
    pub fn with_shared_stage(mut self, stage: Arc<RateLimiter>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Signup protection: one IP-wide stage counting every attempt.
    #[must_use]
    pub fn signup(rule: RateLimitRule) -> Self {
        Self::new("signup").with_stage(
            RateLimiter::new("signup", rule)
                .with_message("Too many signup attempts. Try again later."),
        )
    }

    /// Login protection: a generous IP-wide stage, then a strict per-account
    /// stage that only counts failed attempts.
    #[must_use]
    pub fn login(ip_rule: RateLimitRule, account_rule: RateLimitRule) -> Self {
        Self::new("login")
            .with_stage(
                RateLimiter::new("login-ip", ip_rule)
                    .with_message("Too many requests from this IP. Try again later."),
            )
            .with_stage(RateLimiter::new("login-account", account_rule).with_message(
                "Too many failed login attempts. Try again later or reset your password.",
            ))
    }

    /// Get the chain name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the stages in evaluation order.
    #[must_use]
    pub fn stages(&self) -> &[Arc<RateLimiter>] {
        &self.stages
    }

    /// Run every stage in order.
    ///
    /// # Errors
    ///
    /// Returns the first stage's [`RateLimited`]; stages after it are not
    /// evaluated and earlier stages keep no count for the request.
    pub fn evaluate(&self, ctx: &RequestContext) -> Result<ChainPermit, RateLimited> {
        let mut admitted: Vec<(&Arc<RateLimiter>, Admission)> =
            Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            match stage.admit(ctx) {
                Ok(admission) => admitted.push((stage, admission)),
                Err(limited) => {
                    for (earlier, admission) in &admitted {
                        earlier.release(admission);
                    }
                    return Err(limited);
                }
            }
        }

        let pending = admitted
            .into_iter()
            .filter(|(stage, _)| stage.rule().failures_only)
            .map(|(stage, admission)| (Arc::clone(stage), admission.key))
            .collect();

        Ok(ChainPermit { pending })
    }

    /// Drop expired windows in every stage.
    ///
    /// Returns the total number of windows removed.
    pub fn prune_expired(&self) -> usize {
        let removed: usize = self.stages.iter().map(|s| s.prune_expired()).sum();
        if removed > 0 {
            debug!(chain = %self.name, removed, "Pruned expired rate windows");
        }
        removed
    }
}
