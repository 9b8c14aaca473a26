//! JSON-RPC load testing driven by vegeta.
//!
//! Builds deterministic attack plans, runs them against local or SSH-reachable
//! nodes, decodes vegeta's reports, and optionally classifies every response.

pub mod config;
pub mod deep;
pub mod display;
pub mod engine;
pub mod error;
pub mod generators;
pub mod node;
pub mod output;
pub mod payload;
pub mod plan;
pub mod process;
pub mod remote;
pub mod report;
pub mod runner;
pub mod summary;
pub mod vegeta;
