//! Randomness Abstraction for Deterministic Simulation Testing
//!
//! Every random decision made by the simulated store and the DST workload
//! goes through the [`Rng`] trait, so a failing run can be replayed from its
//! seed alone.

pub mod simulation;

pub use simulation::SimulatedRng;

/// Source of randomness used by simulation components
pub trait Rng: Send + 'static {
    fn next_u64(&mut self) -> u64;

    /// Returns true with the given probability (clamped to [0, 1])
    fn gen_bool(&mut self, probability: f64) -> bool;

    /// Uniform value in `[min, max)`; returns `min` when the range is empty
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}
