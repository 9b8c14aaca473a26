//! flood: load testing for JSON-RPC nodes.
//!
//! The library half of the `flood` binary. See [`loadtest`] for the plan
//! builder, the vegeta adapter and the local/remote scheduler.

pub mod loadtest;
