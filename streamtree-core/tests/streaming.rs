//! End-to-end streaming of small meshes through merge and split trees.

mod common;

use common::{Reduced, offline_tree, path_edges, stream_eagerly};
use proptest::prelude::*;
use rstest::rstest;
use streamtree_core::{
    GlobalId, IntegrationStrategy, ParallelUnionTree, TreeKind, UnionTree, UnionTreeBuilder,
    VertexKind,
};
use streamtree_test_support::ci::property_test_profile::ProptestRunProfile;
use test_strategy::Arbitrary;

fn tree(kind: TreeKind, strategy: IntegrationStrategy) -> UnionTree {
    UnionTreeBuilder::new(kind)
        .with_strategy(strategy)
        .with_block_bits(2)
        .build()
        .expect("configuration must be valid")
}

fn proptest_config(default_cases: u32) -> ProptestConfig {
    let profile = ProptestRunProfile::load(default_cases, false);
    ProptestConfig {
        cases: profile.cases(),
        fork: profile.fork(),
        ..ProptestConfig::default()
    }
}

#[rstest]
#[case::forward(&[(0, 1), (0, 2)])]
#[case::reversed(&[(0, 2), (0, 1)])]
fn three_vertex_merge_tree(
    #[case] edges: &[(GlobalId, GlobalId)],
    #[values(IntegrationStrategy::Linear, IntegrationStrategy::Accelerated)]
    strategy: IntegrationStrategy,
) {
    let mut tree = tree(TreeKind::Merge, strategy);
    for (id, value) in [(0, 5.0), (1, 3.0), (2, 8.0)] {
        tree.add_vertex(id, value).expect("vertex");
    }
    for (a, b) in edges {
        tree.add_edge(*a, *b).expect("edge");
    }
    assert_eq!(tree.vertex_kind(2), Some(VertexKind::Leaf));
    assert_eq!(tree.vertex_kind(1), Some(VertexKind::Root));

    for id in 0..3 {
        tree.finalize_vertex(id, false).expect("finalize");
    }
    assert_eq!(
        Reduced::of(&tree),
        Reduced {
            nodes: vec![1, 2],
            arcs: vec![(2, 1)],
        }
    );
    assert_eq!(tree.live_vertices(), 2);
}

#[rstest]
#[case::merge(TreeKind::Merge)]
#[case::split(TreeKind::Split)]
fn single_edge_vertex_finalizes_as_a_leaf_or_root(#[case] kind: TreeKind) {
    let mut tree = tree(kind, IntegrationStrategy::Accelerated);
    tree.add_vertex(0, 2.0).expect("vertex");
    tree.add_vertex(1, 7.0).expect("vertex");
    tree.add_edge(0, 1).expect("edge");
    tree.finalize_vertex(0, false).expect("finalize");
    tree.finalize_vertex(1, false).expect("finalize");

    let (upper, lower) = match kind {
        TreeKind::Merge => (1, 0),
        TreeKind::Split => (0, 1),
    };
    assert_eq!(tree.vertex_kind(upper), Some(VertexKind::Leaf));
    assert_eq!(tree.vertex_kind(lower), Some(VertexKind::Root));
    assert_ne!(tree.vertex_kind(upper), Some(VertexKind::Branch));
    assert_eq!(tree.graph().arcs().collect::<Vec<_>>(), vec![(upper, lower)]);
}

#[rstest]
fn call_order_of_an_edge_does_not_change_branches(
    #[values(IntegrationStrategy::Linear, IntegrationStrategy::Accelerated)]
    strategy: IntegrationStrategy,
) {
    let values = [6.0, 2.0, 9.0, 4.0];
    let build = |flip: bool| {
        let mut tree = tree(TreeKind::Merge, strategy);
        for (id, value) in (0..).zip(values) {
            tree.add_vertex(id, value).expect("vertex");
        }
        tree.add_edge(0, 1).expect("edge");
        tree.add_edge(2, 3).expect("edge");
        if flip {
            tree.add_edge(3, 0).expect("edge");
        } else {
            tree.add_edge(0, 3).expect("edge");
        }
        tree
    };
    let forward = build(false);
    let flipped = build(true);
    for id in 0..4 {
        assert_eq!(forward.branch_of(id), flipped.branch_of(id));
        assert_eq!(forward.vertex_kind(id), flipped.vertex_kind(id));
    }
}

#[rstest]
#[case::merge(TreeKind::Merge)]
#[case::split(TreeKind::Split)]
fn eager_and_deferred_finalization_agree(#[case] kind: TreeKind) {
    let values = [3.0, 8.0, 1.0, 6.0, 2.0, 9.0, 4.0];
    let edges = [(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 6), (1, 5)];

    let mut eager = tree(kind, IntegrationStrategy::Accelerated);
    stream_eagerly(&mut eager, &values, &edges).expect("stream");

    let mut deferred = tree(kind, IntegrationStrategy::Linear);
    for (id, value) in (0..).zip(values) {
        deferred.add_vertex(id, value).expect("vertex");
    }
    for (a, b) in edges {
        deferred.add_edge(a, b).expect("edge");
    }
    deferred.cleanup().expect("cleanup");

    let expected = offline_tree(kind, &values, &edges);
    assert_eq!(Reduced::of(&eager), expected);
    assert_eq!(Reduced::of(&deferred), expected);
    assert!(eager.metrics().vertices_retired() > 0);
}

#[test]
fn front_stays_bounded_on_a_monotone_path() {
    let values: Vec<f64> = (0..64_u32).map(f64::from).collect();
    let edges = path_edges(values.len());
    let mut tree = tree(TreeKind::Merge, IntegrationStrategy::Accelerated);
    let mut peak = 0;
    for (index, &(a, b)) in edges.iter().enumerate() {
        if index == 0 {
            tree.add_vertex(a, values[0]).expect("vertex");
        }
        tree.add_vertex(b, values[index + 1]).expect("vertex");
        tree.add_edge(a, b).expect("edge");
        tree.finalize_vertex(a, false).expect("finalize");
        peak = peak.max(tree.live_vertices());
    }
    tree.cleanup().expect("cleanup");
    assert!(peak <= 3, "front grew to {peak} vertices");
    assert_eq!(tree.graph().node_count(), 2);
}

#[rstest]
#[case::registered_up_front(true)]
#[case::registered_late(false)]
fn shared_boundary_vertex_joins_two_subdomains(#[case] up_front: bool) {
    let values = [4.0, 9.0, 2.0, 6.0, 1.0, 8.0, 3.0];
    let mut tree = UnionTreeBuilder::new(TreeKind::Merge)
        .build_parallel()
        .expect("configuration must be valid");

    // Subdomain A owns 0..=3 and B owns 3..=6; vertex 3 is on the boundary.
    let add_b = |tree: &mut ParallelUnionTree| {
        tree.add_shared_vertex(3, values[3]).expect("boundary");
        for id in 4..=6 {
            tree.add_vertex(id, values[id as usize]).expect("vertex");
        }
    };
    for id in 0..=2 {
        tree.add_vertex(id, values[id as usize]).expect("vertex");
    }
    tree.add_shared_vertex(3, values[3]).expect("boundary");
    if up_front {
        add_b(&mut tree);
    }

    for (a, b) in [(0, 1), (1, 2), (2, 3)] {
        tree.add_edge(a, b).expect("edge");
    }
    for id in 0..=3 {
        tree.finalize_vertex(id, false).expect("finalize");
    }
    assert_eq!(tree.is_finalized(3), Some(false), "B still needs the boundary");

    if !up_front {
        add_b(&mut tree);
    }
    for (a, b) in [(3, 4), (4, 5), (5, 6)] {
        tree.add_edge(a, b).expect("edge");
    }
    for id in 3..=6 {
        tree.finalize_vertex(id, false).expect("finalize");
    }
    tree.mark_unshared(3).expect("demote");
    tree.cleanup().expect("cleanup");

    let whole = offline_tree(TreeKind::Merge, &values, &path_edges(values.len()));
    assert_eq!(Reduced::of(&tree), whole);
    assert_eq!(tree.metrics().forced_finalizations(), 0);
}

/// A path mesh together with the order in which its edges are streamed.
#[derive(Debug, Arbitrary)]
struct ShuffledPath {
    #[strategy(prop::collection::vec(-100.0_f64..100.0, 2..24))]
    values: Vec<f64>,
    #[strategy(Just((0..#values.len() - 1).collect::<Vec<usize>>()).prop_shuffle())]
    order: Vec<usize>,
}

fn random_mesh() -> impl Strategy<Value = (Vec<f64>, Vec<(GlobalId, GlobalId)>)> {
    prop::collection::vec(prop::sample::select(vec![0.0, 1.0, 2.5, 4.0, 7.5, 9.0]), 1..14)
        .prop_flat_map(|values| {
            let count = values.len() as GlobalId;
            let edges = prop::collection::vec((0..count, 0..count), 0..28);
            (Just(values), edges)
        })
}

proptest! {
    #![proptest_config(proptest_config(64))]

    #[test]
    fn path_edges_stream_in_any_order(
        path in any::<ShuffledPath>(),
        kind in prop::sample::select(vec![TreeKind::Merge, TreeKind::Split]),
        strategy in prop::sample::select(vec![
            IntegrationStrategy::Linear,
            IntegrationStrategy::Accelerated,
        ]),
    ) {
        let sorted = path_edges(path.values.len());
        let shuffled: Vec<_> = path.order.iter().map(|&edge| sorted[edge]).collect();

        let mut streamed = tree(kind, strategy);
        stream_eagerly(&mut streamed, &path.values, &shuffled).expect("stream");
        let mut reference = tree(kind, strategy);
        stream_eagerly(&mut reference, &path.values, &sorted).expect("stream");

        prop_assert_eq!(Reduced::of(&streamed), Reduced::of(&reference));
        prop_assert_eq!(
            Reduced::of(&streamed),
            offline_tree(kind, &path.values, &sorted)
        );
    }

    #[test]
    fn arbitrary_meshes_match_the_offline_sweep(
        (values, edges) in random_mesh(),
        kind in prop::sample::select(vec![TreeKind::Merge, TreeKind::Split]),
    ) {
        let mut streamed = tree(kind, IntegrationStrategy::Accelerated);
        stream_eagerly(&mut streamed, &values, &edges).expect("stream");
        prop_assert!(streamed.validate().is_ok());
        prop_assert_eq!(Reduced::of(&streamed), offline_tree(kind, &values, &edges));
    }
}
