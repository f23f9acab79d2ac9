//! Benchmark support crate for streamtree.
//!
//! Provides seeded synthetic scalar fields and the parameter types used by
//! the Criterion benchmarks for streaming merge, split and contour trees.

pub mod error;
pub mod field;
pub mod params;
