// flowlink — Workflow automation glue in Rust
// License: Apache-2.0

pub mod config;
pub mod connector;
pub mod logger;
pub mod metrics;
pub mod web;
pub mod workflow;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
