//! Integration tests for Cinestream
//!
//! These tests drive the HTTP surface against in-process services, with
//! either the mock content client or the simulated swarm behind them.

#[path = "integration/harness.rs"]
mod harness;

#[path = "integration/http_api.rs"]
mod http_api;
#[path = "integration/range_streaming.rs"]
mod range_streaming;
#[path = "integration/sim_streaming.rs"]
mod sim_streaming;
