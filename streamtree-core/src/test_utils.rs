//! Shared test utilities for `streamtree-core`.

use proptest::test_runner::Config as ProptestConfig;
use streamtree_test_support::ci::property_test_profile::ProptestRunProfile;

use crate::{TreeKind, UnionTree, UnionTreeBuilder, order::GlobalId};

/// Builds a proptest configuration from the shared CI profile so every
/// property suite reads `PROGTEST_CASES` and `STREAMTREE_PBT_FORK` the same
/// way.
#[must_use]
pub(crate) fn suite_proptest_config(default_cases: u32) -> ProptestConfig {
    let profile = ProptestRunProfile::load(default_cases, false);
    ProptestConfig {
        cases: profile.cases(),
        fork: profile.fork(),
        ..ProptestConfig::default()
    }
}

/// Streams `values` (indexed by id) and `edges` into a fresh tree of `kind`,
/// finalizing nothing.
pub(crate) fn streamed(kind: TreeKind, values: &[f64], edges: &[(GlobalId, GlobalId)]) -> UnionTree {
    let mut tree = UnionTreeBuilder::new(kind)
        .with_block_bits(2)
        .build()
        .expect("valid configuration");
    for (id, value) in (0..).zip(values) {
        tree.add_vertex(id, *value).expect("fresh vertex");
    }
    for (a, b) in edges {
        tree.add_edge(*a, *b).expect("edge integrates");
    }
    tree
}
