//! # cascadeflow-engine
//!
//! The speculative cascade: run a cheap drafter, estimate response quality
//! with the alignment scorer, and either accept the draft or escalate to the
//! verifier. Emits a typed event stream for streaming clients.

pub mod cascade;
pub mod domain;

pub use cascade::{CascadeConfig, CascadeEngine, CascadeRequest, CascadeResult};
pub use domain::{QueryClassification, classify_query};
