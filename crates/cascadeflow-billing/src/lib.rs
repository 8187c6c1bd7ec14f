//! # cascadeflow-billing
//!
//! Opt-in Paygentic billing integration:
//!
//! - [`PaygenticClient`] — thin API client with deterministic idempotency
//!   keys and bounded retries on transient failures
//! - [`UsageReporter`] — maps proxy results to usage events (fail-open)
//! - [`BillingProxyService`] — post-response hook around the proxy service
//!   that reports usage in tracked background tasks

pub mod paygentic;

pub use paygentic::{
    BillingProxyService, PaygenticClient, PaygenticConfig, QuantityMode, UsageReporter,
};
