//! underpower: Monte Carlo power, exaggeration (type M) and sign-error
//! (type S) analysis of short-term air-pollution health-effect designs.
//!
//! Pipeline, leaves first:
//!   panel → sampler → treatment → outcome → estimate → replicate
//!   → driver (grid, batches, checkpoints) → summary

pub mod config;
pub mod driver;
pub mod error;
pub mod estimate;
pub mod grid;
pub mod illustration;
pub mod model;
pub mod outcome;
pub mod panel;
pub mod replicate;
pub mod rng;
pub mod sampler;
pub mod stats;
pub mod store;
pub mod summary;
pub mod treatment;
pub mod types;
