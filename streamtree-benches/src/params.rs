//! Benchmark parameter types.

use std::fmt;

use streamtree_core::IntegrationStrategy;

/// Parameters for a tree streaming benchmark run.
#[derive(Clone, Debug)]
pub struct StreamBenchParams {
    /// Side length of the square grid.
    pub side: u64,
    /// Edge integration strategy under test.
    pub strategy: IntegrationStrategy,
}

impl fmt::Display for StreamBenchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n={}x{},{:?}", self.side, self.side, self.strategy)
    }
}

/// Parameters for a contour tree benchmark run.
#[derive(Clone, Debug)]
pub struct ContourBenchParams {
    /// Side length of the square grid.
    pub side: u64,
    /// Whether segmentation entries live in scratch files.
    pub out_of_core: bool,
}

impl fmt::Display for ContourBenchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = if self.out_of_core { "ooc" } else { "mem" };
        write!(f, "n={}x{},{storage}", self.side, self.side)
    }
}
