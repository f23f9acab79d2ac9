//! Unit tests for augmentation and peeling.

use std::{cmp::Reverse, collections::BTreeSet, mem};

use proptest::prelude::*;
use rstest::rstest;
use streamtree_test_support::tracing::RecordingLayer;

use crate::{
    SegmentationStorage, TreeKind, UnionTree, UnionTreeBuilder,
    graph::{OutputGraph, TreeGraph},
    order::GlobalId,
    test_utils::suite_proptest_config,
};

use super::{ContourError, ContourErrorCode, ContourStats, ContourTreeMerger};

fn merger_for(values: &[f64], edges: &[(GlobalId, GlobalId)]) -> ContourTreeMerger {
    let mut merger = ContourTreeMerger::new().expect("default trees");
    for (id, value) in (0..).zip(values) {
        merger.add_vertex(id, *value).expect("vertex");
    }
    for (a, b) in edges {
        merger.add_edge(*a, *b).expect("edge");
    }
    merger
}

fn contour_arcs(graph: &TreeGraph) -> Vec<(GlobalId, GlobalId)> {
    graph.arcs().collect()
}

#[test]
fn path_contour_is_the_path() {
    let merger = merger_for(&[5.0, 3.0, 8.0, 1.0], &[(0, 1), (1, 2), (2, 3)]);
    let mut out = TreeGraph::new();
    let stats = merger.finish_tree(&mut out).expect("finish");
    assert_eq!(contour_arcs(&out), vec![(0, 1), (1, 2), (2, 3)]);
    assert_eq!(
        stats,
        ContourStats {
            nodes: 4,
            arcs: 3,
            augmented_merge: 0,
            augmented_split: 1,
        }
    );
}

#[test]
fn star_contour_joins_every_extremum_at_the_centre() {
    // Centre 1(5) touches maxima 0(10), 2(9) and minimum 3(1).
    let merger = merger_for(&[10.0, 5.0, 9.0, 1.0], &[(1, 0), (1, 2), (1, 3)]);
    let mut out = TreeGraph::new();
    merger.finish_tree(&mut out).expect("finish");
    assert_eq!(contour_arcs(&out), vec![(0, 1), (1, 3), (2, 1)]);
}

#[test]
fn finalized_stream_matches_cleanup_only_stream() {
    let values = [4.0, 7.0, 2.0, 6.0, 3.0];
    let edges = [(0, 1), (1, 2), (2, 3), (3, 4)];

    let mut eager = merger_for(&values, &edges);
    for id in 0..5 {
        eager.finalize_vertex(id, false).expect("finalize");
    }
    let mut eager_out = TreeGraph::new();
    eager.finish_tree(&mut eager_out).expect("finish");

    let mut lazy_out = TreeGraph::new();
    merger_for(&values, &edges)
        .finish_tree(&mut lazy_out)
        .expect("finish");
    assert_eq!(eager_out, lazy_out);
    assert_eq!(lazy_out.arc_count() + 1, lazy_out.node_count());
}

#[test]
fn isolated_vertex_becomes_a_lone_node() {
    let merger = merger_for(&[2.0], &[]);
    let mut out = TreeGraph::new();
    let stats = merger.finish_tree(&mut out).expect("finish");
    assert_eq!(stats.nodes, 1);
    assert_eq!(stats.arcs, 0);
    assert!(out.contains(0));
}

fn tree(kind: TreeKind, storage: SegmentationStorage) -> UnionTree {
    UnionTreeBuilder::new(kind)
        .with_segmentation(storage)
        .build()
        .expect("valid configuration")
}

#[rstest]
#[case::swapped(
    tree(TreeKind::Split, SegmentationStorage::InMemory),
    tree(TreeKind::Merge, SegmentationStorage::InMemory),
    ContourErrorCode::KindMismatch
)]
#[case::unsegmented(
    tree(TreeKind::Merge, SegmentationStorage::None),
    tree(TreeKind::Split, SegmentationStorage::InMemory),
    ContourErrorCode::MissingSegmentation
)]
fn unusable_tree_pairs_are_rejected(
    #[case] merge: UnionTree,
    #[case] split: UnionTree,
    #[case] expected: ContourErrorCode,
) {
    let err = ContourTreeMerger::from_trees(merge, split).expect_err("rejected");
    assert_eq!(err.code(), expected);
}

#[test]
fn trees_over_different_meshes_are_inconsistent() {
    let mut merge = tree(TreeKind::Merge, SegmentationStorage::InMemory);
    for (id, value) in [(0, 5.0), (1, 3.0), (2, 8.0)] {
        merge.add_vertex(id, value).expect("vertex");
    }
    merge.add_edge(0, 1).expect("edge");
    merge.add_edge(0, 2).expect("edge");

    let mut split = tree(TreeKind::Split, SegmentationStorage::InMemory);
    for (id, value) in [(0, 5.0), (1, 3.0), (3, 8.0)] {
        split.add_vertex(id, value).expect("vertex");
    }
    split.add_edge(0, 1).expect("edge");
    split.add_edge(0, 3).expect("edge");

    let merger = ContourTreeMerger::from_trees(merge, split).expect("kinds match");
    let err = merger
        .finish_tree(&mut TreeGraph::new())
        .expect_err("vertex 3 is unknown to the merge tree");
    assert!(matches!(
        err,
        ContourError::ConsistencyViolation {
            id: 3,
            kind: TreeKind::Merge,
            ..
        }
    ));
}

#[test]
fn finish_tree_is_traced() {
    let layer = RecordingLayer::default();
    let merger = merger_for(&[1.0, 2.0], &[(0, 1)]);
    let mut out = TreeGraph::new();
    layer
        .capture(|| merger.finish_tree(&mut out))
        .expect("finish");
    let names = layer.span_names();
    assert!(names.iter().any(|name| name == "contour.finish_tree"));
    assert!(names.iter().any(|name| name == "segmentation.complete"));
    assert!(out.find_active_node(1).is_some());
}

#[test]
fn mesh_with_a_loop_stalls_peeling() {
    // The cycle 0 - 1 - 3 - 4 - 5 - 0 with a pendant 2 on 5.
    let values = [9.0, 2.0, 5.0, 8.0, 1.0, 6.0];
    let edges = [(0, 1), (0, 5), (1, 3), (2, 5), (3, 4), (4, 5)];
    let err = merger_for(&values, &edges)
        .finish_tree(&mut TreeGraph::new())
        .expect_err("a loop has no contour tree");
    assert_eq!(err.code(), ContourErrorCode::ConsistencyViolation);
    assert!(matches!(
        err,
        ContourError::ConsistencyViolation {
            id: 1,
            detail: "peeling stalled",
            ..
        }
    ));
}

type Contour = (Vec<GlobalId>, Vec<(GlobalId, GlobalId)>);

fn as_id(index: usize) -> GlobalId {
    GlobalId::try_from(index).expect("index fits an id")
}

fn as_index(id: GlobalId) -> usize {
    usize::try_from(id).expect("id fits an index")
}

fn find_root(roots: &mut [usize], mut index: usize) -> usize {
    while roots[index] != index {
        roots[index] = roots[roots[index]];
        index = roots[index];
    }
    index
}

/// Child of every vertex in the unreduced tree of `kind`, by a union-find
/// sweep from the top.
fn augmented_children(
    kind: TreeKind,
    values: &[f64],
    edges: &[(GlobalId, GlobalId)],
) -> Vec<Option<usize>> {
    let count = values.len();
    let mut adjacency = vec![Vec::new(); count];
    for &(a, b) in edges {
        let (a, b) = (as_index(a), as_index(b));
        if a != b {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
    }
    let mut order: Vec<usize> = (0..count).collect();
    order.sort_unstable_by_key(|&index| Reverse(kind.key(as_id(index), values[index])));

    let mut roots: Vec<usize> = (0..count).collect();
    let mut lowest: Vec<usize> = (0..count).collect();
    let mut swept = vec![false; count];
    let mut children = vec![None; count];
    for vertex in order {
        for &neighbour in &adjacency[vertex] {
            if !swept[neighbour] {
                continue;
            }
            let above = find_root(&mut roots, neighbour);
            let here = find_root(&mut roots, vertex);
            if above != here {
                children[lowest[above]] = Some(vertex);
                roots[above] = here;
                lowest[here] = vertex;
            }
        }
        swept[vertex] = true;
    }
    children
}

/// Offline contour tree: peels the unreduced merge and split trees over
/// every vertex, then suppresses vertices with one neighbour above and one
/// below.
fn offline_contour(values: &[f64], edges: &[(GlobalId, GlobalId)]) -> Contour {
    let count = values.len();
    let mut children = [
        augmented_children(TreeKind::Merge, values, edges),
        augmented_children(TreeKind::Split, values, edges),
    ];
    let mut parents = [vec![BTreeSet::new(); count], vec![BTreeSet::new(); count]];
    for (tree, tree_children) in children.iter().enumerate() {
        for (vertex, child) in tree_children.iter().enumerate() {
            if let Some(child) = child {
                parents[tree][*child].insert(vertex);
            }
        }
    }

    let mut alive: BTreeSet<usize> = (0..count).collect();
    let mut adjacency = vec![BTreeSet::new(); count];
    while let Some(leaf) = alive
        .iter()
        .copied()
        .find(|&vertex| parents[0][vertex].len() + parents[1][vertex].len() == 1)
    {
        let tree = usize::from(!parents[0][leaf].is_empty());
        let neighbour = children[tree][leaf].expect("contour leaf has a neighbour");
        adjacency[leaf].insert(neighbour);
        adjacency[neighbour].insert(leaf);
        for side in 0..2 {
            let below = children[side][leaf].take();
            for parent in mem::take(&mut parents[side][leaf]) {
                children[side][parent] = below;
                if let Some(below) = below {
                    parents[side][below].insert(parent);
                }
            }
            if let Some(below) = below {
                parents[side][below].remove(&leaf);
            }
        }
        alive.remove(&leaf);
    }

    let height = |index: usize| TreeKind::Merge.key(as_id(index), values[index]);
    let mut nodes: BTreeSet<usize> = (0..count).collect();
    for vertex in 0..count {
        let around: Vec<usize> = adjacency[vertex].iter().copied().collect();
        let &[a, b] = around.as_slice() else {
            continue;
        };
        if around.iter().filter(|&&u| height(u) > height(vertex)).count() != 1 {
            continue;
        }
        adjacency[a].remove(&vertex);
        adjacency[b].remove(&vertex);
        adjacency[a].insert(b);
        adjacency[b].insert(a);
        adjacency[vertex].clear();
        nodes.remove(&vertex);
    }

    let arcs = nodes
        .iter()
        .flat_map(|&a| adjacency[a].iter().filter(move |&&b| a < b).map(move |&b| (a, b)))
        .map(|(a, b)| (as_id(a), as_id(b)))
        .collect();
    (nodes.into_iter().map(as_id).collect(), arcs)
}

fn streamed_contour(values: &[f64], edges: &[(GlobalId, GlobalId)]) -> Contour {
    let mut out = TreeGraph::new();
    merger_for(values, edges)
        .finish_tree(&mut out)
        .expect("simply connected mesh");
    let nodes = out.nodes().map(|(id, _)| id).collect();
    let mut arcs: Vec<_> = out.arcs().map(|(a, b)| (a.min(b), a.max(b))).collect();
    arcs.sort_unstable();
    (nodes, arcs)
}

fn grid_edges(width: usize, height: usize) -> Vec<(GlobalId, GlobalId)> {
    let id = |x: usize, y: usize| as_id(y * width + x);
    let mut edges = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if x + 1 < width {
                edges.push((id(x, y), id(x + 1, y)));
            }
            if y + 1 < height {
                edges.push((id(x, y), id(x, y + 1)));
                if x + 1 < width {
                    edges.push((id(x, y), id(x + 1, y + 1)));
                }
            }
        }
    }
    edges
}

/// Distinct values `0..count` in random order.
fn ranks(count: usize) -> impl Strategy<Value = Vec<f64>> {
    let count = u32::try_from(count).expect("small mesh");
    Just((0..count).map(f64::from).collect::<Vec<_>>()).prop_shuffle()
}

proptest! {
    #![proptest_config(suite_proptest_config(64))]

    #[test]
    fn triangulated_grids_match_the_offline_contour_tree(
        (width, height, values) in (1_usize..6, 1_usize..6)
            .prop_flat_map(|(width, height)| (Just(width), Just(height), ranks(width * height))),
    ) {
        let edges = grid_edges(width, height);
        prop_assert_eq!(streamed_contour(&values, &edges), offline_contour(&values, &edges));
    }

    #[test]
    fn random_trees_match_the_offline_contour_tree(
        (values, attach) in (1_usize..16).prop_flat_map(|count| {
            (ranks(count), (1..count).map(|index| 0..index).collect::<Vec<_>>())
        }),
    ) {
        let edges: Vec<_> = attach
            .iter()
            .zip(1..)
            .map(|(&parent, index)| (as_id(parent), as_id(index)))
            .collect();
        prop_assert_eq!(streamed_contour(&values, &edges), offline_contour(&values, &edges));
    }
}
