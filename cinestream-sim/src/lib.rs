//! Cinestream Simulation - an in-memory swarm for development and tests.
//!
//! Content items are published into a catalog. Opening an item yields a
//! source whose metadata arrives after a delay and whose pieces complete
//! over time: pieces marked `now` first, the rest in seeded random order.
//! Readers over such a source block on pieces that have not arrived yet.
//!
//! # Example
//!
//! ```rust,no_run
//! use cinestream_core::ContentId;
//! use cinestream_sim::{SimContent, SimulatedContentClient, SwarmConfig};
//!
//! let client = SimulatedContentClient::new(SwarmConfig::default());
//! let id = ContentId::parse("ABCD").unwrap();
//! client.publish(id, SimContent::synthetic("Big Buck Bunny", "bunny.mkv", 8 * 1024 * 1024, 7));
//! ```

pub mod catalog;
pub mod reader;
pub mod swarm;

pub use catalog::{SimContent, demo_catalog};
pub use reader::PieceAwareReader;
pub use swarm::{SimulatedContentClient, SimulatedSource, SwarmConfig};
