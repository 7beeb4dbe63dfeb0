//! Fixed-window rate limiting.
//!
//! A [`RateLimiter`] is one stage: a window length, a threshold, a way to
//! derive the key from a request, and whether it counts every request or
//! only failed ones. Stages are composed into a
//! [`RateLimiterChain`](crate::chain::RateLimiterChain).
//!
//! ```text
//!   evaluate(ctx)                         record(key, outcome)
//!   ─────────────                         ────────────────────
//!   key = derive(ctx)                     failures_only && Failure?
//!   expired?  → count = 0, start = now        expired? → reset
//!   count ≥ N → RateLimited(retry_after)      count += 1
//!   !failures_only → count += 1
//! ```
//!
//! A rejected request never increments the counter that rejected it. When
//! a chain admits a request on one stage and a later stage rejects it, the
//! earlier stage's slot is handed back with [`RateLimiter::release`].

use dashmap::DashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{trace, warn};

/// IPv6 prefix length used to group addresses from one subscriber.
pub const IPV6_PREFIX_LEN: u32 = 56;

/// How a stage derives its key from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Normalized client IP.
    Ip,
    /// Normalized account identifier, falling back to the client IP.
    AccountOrIp,
}

/// Parameters of one rate-limiting stage.
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    /// Window length.
    pub window: Duration,
    /// Requests allowed per window.
    pub max: u32,
    /// Key derivation.
    pub key: KeyStrategy,
    /// Only count requests whose outcome is a failure.
    pub failures_only: bool,
}

impl RateLimitRule {
    /// Count every request from an IP.
    #[must_use]
    pub fn per_ip(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            key: KeyStrategy::Ip,
            failures_only: false,
        }
    }

    /// Count failed attempts per account (or IP when no account is given).
    #[must_use]
    pub fn failed_attempts_per_account(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            key: KeyStrategy::AccountOrIp,
            failures_only: true,
        }
    }
}

/// What a stage knows about an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Client IP as reported by the transport or proxy.
    pub ip: String,
    /// Account identifier the caller supplied, if any.
    pub account: Option<String>,
}

impl RequestContext {
    /// Create a context for a client IP.
    #[must_use]
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            account: None,
        }
    }

    /// Attach the account identifier the caller supplied.
    #[must_use]
    pub fn with_account(mut self, account: Option<impl Into<String>>) -> Self {
        self.account = account.map(Into::into);
        self
    }
}

/// Result of the guarded operation, as seen by failure-only stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation succeeded; failure-only stages ignore it.
    Success,
    /// The operation failed and counts against failure-only stages.
    Failure,
}

impl Outcome {
    /// Classify an HTTP status: anything 400 or above is a failure.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        if status >= 400 {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }
}

/// A request was rejected by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RateLimited {
    /// Name of the stage that rejected the request.
    pub stage: String,
    /// Time until the stage's window resets.
    pub retry_after: Duration,
    /// User-facing explanation.
    pub message: String,
}

impl RateLimited {
    /// Retry-after in whole seconds, rounded up and never zero.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        let rounded = if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        };
        rounded.max(1)
    }
}

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    /// Counted requests in the current window.
    pub count: u32,
    /// When the current window began.
    pub window_start: Instant,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) > window
    }

    fn reset_if_expired(&mut self, now: Instant, window: Duration) {
        if self.is_expired(now, window) {
            self.count = 0;
            self.window_start = now;
        }
    }
}

/// A request admitted by one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Key the request was evaluated under.
    pub key: String,
    /// Start of the window the request was admitted in.
    pub window_start: Instant,
    /// Whether admission took a slot in that window.
    pub counted: bool,
}

const DEFAULT_MESSAGE: &str = "Too many requests. Try again later.";

/// One rate-limiting stage.
///
/// Windows live in a `DashMap`; each evaluation or record holds the
/// entry's shard lock for its whole read-modify-write.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    rule: RateLimitRule,
    message: String,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    /// Create a new stage.
    #[must_use]
    pub fn new(name: impl Into<String>, rule: RateLimitRule) -> Self {
        Self {
            name: name.into(),
            rule,
            message: DEFAULT_MESSAGE.to_string(),
            windows: DashMap::new(),
        }
    }

    /// Set the message returned with rejections.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Get the stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the stage parameters.
    #[must_use]
    pub fn rule(&self) -> &RateLimitRule {
        &self.rule
    }

    /// Derive this stage's key for a request.
    #[must_use]
    pub fn key_for(&self, ctx: &RequestContext) -> String {
        match self.rule.key {
            KeyStrategy::Ip => normalize_ip(&ctx.ip),
            KeyStrategy::AccountOrIp => ctx
                .account
                .as_deref()
                .and_then(normalize_account)
                .unwrap_or_else(|| normalize_ip(&ctx.ip)),
        }
    }

    /// Decide whether a request may proceed.
    ///
    /// On success returns the key the request was counted under, which a
    /// failure-only stage needs later for [`record`](Self::record).
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] if the key's window is already full.
    pub fn evaluate(&self, ctx: &RequestContext) -> Result<String, RateLimited> {
        self.admit(ctx).map(|admission| admission.key)
    }

    /// Like [`evaluate`](Self::evaluate), but also returns which window the
    /// request was counted in so the slot can be [released](Self::release).
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] if the key's window is already full.
    pub fn admit(&self, ctx: &RequestContext) -> Result<Admission, RateLimited> {
        let key = self.key_for(ctx);
        let now = Instant::now();

        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| RateWindow::new(now));
        let window = entry.value_mut();
        window.reset_if_expired(now, self.rule.window);

        if window.count >= self.rule.max {
            let retry_after =
                (window.window_start + self.rule.window).saturating_duration_since(now);
            warn!(
                stage = %self.name,
                key = %key,
                count = window.count,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate limited"
            );
            return Err(RateLimited {
                stage: self.name.clone(),
                retry_after,
                message: self.message.clone(),
            });
        }

        let counted = !self.rule.failures_only;
        if counted {
            window.count += 1;
        }
        trace!(stage = %self.name, key = %key, count = window.count, "Rate check passed");

        Ok(Admission {
            window_start: window.window_start,
            counted,
            key,
        })
    }

    /// Hand back the slot an admission took.
    ///
    /// A no-op for failure-only stages, or if the window has since rolled
    /// over.
    pub fn release(&self, admission: &Admission) {
        if !admission.counted {
            return;
        }
        if let Some(mut entry) = self.windows.get_mut(&admission.key) {
            let window = entry.value_mut();
            if window.window_start == admission.window_start {
                window.count = window.count.saturating_sub(1);
                trace!(
                    stage = %self.name,
                    key = %admission.key,
                    count = window.count,
                    "Slot released"
                );
            }
        }
    }

    /// Count the outcome of a request that passed [`evaluate`](Self::evaluate).
    ///
    /// Only failure-only stages record, and only failures.
    pub fn record(&self, key: &str, outcome: Outcome) {
        if !self.rule.failures_only || outcome == Outcome::Success {
            return;
        }

        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow::new(now));
        let window = entry.value_mut();
        window.reset_if_expired(now, self.rule.window);
        window.count = window.count.saturating_add(1);

        trace!(stage = %self.name, key = %key, count = window.count, "Failure recorded");
    }

    /// Current window for a key, if one exists.
    #[must_use]
    pub fn window(&self, key: &str) -> Option<RateWindow> {
        self.windows.get(key).map(|entry| *entry.value())
    }

    /// Drop windows whose period has fully elapsed.
    ///
    /// Returns the number of windows removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, window| !window.is_expired(now, self.rule.window));
        before.saturating_sub(self.windows.len())
    }

    /// Get the number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Check if no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Normalize a client IP into a rate key.
///
/// IPv4-mapped IPv6 addresses collapse to IPv4, other IPv6 addresses are
/// masked to their /56 prefix, and unparseable input is used trimmed.
#[must_use]
pub fn normalize_ip(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.to_string(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => v4.to_string(),
            None => {
                let mask = u128::MAX << (128 - IPV6_PREFIX_LEN);
                let prefix = Ipv6Addr::from(u128::from(v6) & mask);
                format!("{prefix}/{IPV6_PREFIX_LEN}")
            }
        },
        Err(_) => trimmed.to_string(),
    }
}

/// Normalize an account identifier, or `None` if it is blank.
#[must_use]
pub fn normalize_account(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}
