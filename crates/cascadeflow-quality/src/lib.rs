//! # cascadeflow-quality
//!
//! Deterministic, CPU-cheap estimator of how well a response addresses its
//! prompt. This is the quality signal the cascade engine uses to decide
//! whether a drafter's output can be accepted without calling the verifier.
//!
//! The scorer evaluates format-specific fast paths first (multiple choice,
//! classification, long-context QA, function calling, roleplay, extraction,
//! multi-turn); when one fires it returns a fixed high score. Otherwise it
//! sums weighted signals on top of a dynamic baseline and clamps to [0, 1].

pub mod alignment;

pub use alignment::{AlignmentAnalysis, AlignmentScorer};
