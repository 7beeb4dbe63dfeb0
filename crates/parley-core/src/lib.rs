//! # parley-core
//!
//! Core services for the Parley direct-messaging server.
//!
//! This crate provides the three pieces that must stay correct under
//! concurrent requests:
//!
//! - **Presence** - Which user currently holds an open push connection
//! - **Limiter / Chain** - Fixed-window counters guarding auth endpoints
//! - **Pipeline** - Validate, persist, normalize, then best-effort push
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Auth req   │────▶│ RateLimiter │────▶│  Handler    │
//! └─────────────┘     │   Chain     │◀────│ (outcome)   │
//!                     └─────────────┘     └─────────────┘
//!
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Send req   │────▶│  Pipeline   │────▶│ MessageStore│
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Notifier   │────▶│  Presence   │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod chain;
pub mod limiter;
pub mod notify;
pub mod pipeline;
pub mod presence;
pub mod store;

pub use chain::{ChainPermit, RateLimiterChain};
pub use limiter::{
    Admission, KeyStrategy, Outcome, RateLimitRule, RateLimited, RateLimiter, RateWindow,
    RequestContext,
};
pub use notify::{Delivery, Notifier, PresenceNotifier};
pub use pipeline::{
    MessagePipeline, PipelineConfig, PipelineError, SendOutcome, SendRequest, ValidationError,
};
pub use presence::{PresenceRegistry, SharedConnection};
pub use store::{InMemoryMessageStore, MessageStore, NewMessage, StorageError};
