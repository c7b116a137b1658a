//! End-to-end tests for Cinestream
//!
//! Complete playback workflows: add content, wait for metadata from the
//! simulated swarm, seek, and fetch segmented output over HTTP.

#[path = "../integration/harness.rs"]
mod harness;

mod streaming_workflow;
