//! # cascadeflow-cli
//!
//! Command-line interface for the cascadeflow gateway.
//!
//! ```text
//! cascadeflow --mode mock --port 8084
//! cascadeflow --mode agent --preset balanced --auth-token secret
//! ```

pub mod commands;
pub mod presets;

pub use commands::Cli;
