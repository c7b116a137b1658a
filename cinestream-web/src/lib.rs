//! Cinestream Web - JSON and media API server
//!
//! Thin HTTP surface over [`cinestream_core::StreamService`]: every handler
//! decodes its arguments, calls one service operation and encodes the result.

#![warn(clippy::missing_errors_doc)]
#![deny(clippy::missing_panics_doc)]

pub mod handlers;
pub mod server;

// Re-export main types
pub use handlers::ApiError;
pub use server::{AppState, ServerError, router, run_server};
