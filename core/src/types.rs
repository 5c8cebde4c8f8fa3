//! Shared primitive types used across the entire simulation.

/// A city identifier as it appears in the panel (NMMAPS city code).
pub type CityId = String;

/// The canonical run identifier.
pub type RunId = String;

/// Position of a parameter cell inside a run's grid.
/// Stable for the lifetime of a run, used to derive replicate seeds.
pub type CellIndex = u64;

/// Monte Carlo repetition number within a cell, starting at 0.
pub type ReplicateIndex = u64;
