//! # cascadeflow-proxy
//!
//! Pass-through proxy layer: parse `provider:model` identifiers, pick an
//! upstream route, execute the HTTP call, and extract usage and cost from
//! the response.

pub mod handler;
pub mod models;
pub mod router;
pub mod service;

pub use handler::ProxyHandler;
pub use models::{ModelRegistry, ProxyPlan, ProxyRequest, ProxyResult, ProxyRoute, RegistryEntry};
pub use router::ProxyRouter;
pub use service::ProxyService;
