//! Engine seam: the `AnalysisEngine` trait and its implementations.

pub mod analysis;
pub mod backends;
