//! Synthetic fraud-ring dataset generation and idempotent graph loading.
//!
//! The generation stages write bronze tables; the graph loader merges
//! them into a property graph store.

pub mod bronze;
pub mod config;
pub mod entity_generator;
pub mod error;
pub mod graph_loader;
pub mod graph_schema;
pub mod pipeline;
pub mod reuse_sampler;
pub mod ring_injector;
pub mod rng;
pub mod stage;
pub mod store;
pub mod types;
