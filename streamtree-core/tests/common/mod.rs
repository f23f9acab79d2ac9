//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use streamtree_core::{
    FunctionValue, GlobalId, Result, TreeKind, UnionTree, graph::OutputGraph,
};

/// Nodes and arcs of a merge or split tree, both sorted by id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reduced {
    pub nodes: Vec<GlobalId>,
    pub arcs: Vec<(GlobalId, GlobalId)>,
}

impl Reduced {
    /// Reads the reduced tree a streamed [`UnionTree`] emitted.
    pub fn of(tree: &UnionTree) -> Self {
        Self {
            nodes: tree.graph().nodes().map(|(id, _)| id).collect(),
            arcs: tree.graph().arcs().collect(),
        }
    }
}

/// Child of every vertex in the unreduced tree, from a union-find sweep of
/// the whole mesh from the top.
fn augmented_children(
    kind: TreeKind,
    values: &[FunctionValue],
    edges: &[(GlobalId, GlobalId)],
) -> Vec<Option<usize>> {
    let count = values.len();
    let mut adjacency = vec![Vec::new(); count];
    for &(a, b) in edges {
        if a != b {
            adjacency[index(a)].push(index(b));
            adjacency[index(b)].push(index(a));
        }
    }

    let mut order: Vec<usize> = (0..count).collect();
    order.sort_by(|&a, &b| kind.key(id(b), values[b]).cmp(&kind.key(id(a), values[a])));

    let mut sets = DisjointSets::new(count);
    let mut processed = vec![false; count];
    let mut lowest: Vec<usize> = (0..count).collect();
    let mut child: Vec<Option<usize>> = vec![None; count];
    for &vertex in &order {
        processed[vertex] = true;
        for &neighbour in &adjacency[vertex] {
            if !processed[neighbour] {
                continue;
            }
            let upper = sets.find(neighbour);
            let own = sets.find(vertex);
            if upper == own {
                continue;
            }
            child[lowest[upper]] = Some(vertex);
            let root = sets.union(upper, own);
            lowest[root] = vertex;
        }
    }
    child
}

/// Marks the vertices that survive reduction: everything except vertices
/// with exactly one parent and a child.
fn node_mask(child: &[Option<usize>]) -> Vec<bool> {
    let mut parents = vec![0_usize; child.len()];
    for next in child.iter().flatten() {
        parents[*next] += 1;
    }
    child
        .iter()
        .zip(&parents)
        .map(|(below, above)| *above != 1 || below.is_none())
        .collect()
}

/// Offline reference: sweeps the whole mesh from the top with a union-find
/// and reduces the resulting augmented tree.
pub fn offline_tree(
    kind: TreeKind,
    values: &[FunctionValue],
    edges: &[(GlobalId, GlobalId)],
) -> Reduced {
    let child = augmented_children(kind, values, edges);
    let is_node = node_mask(&child);

    let nodes: Vec<usize> = (0..child.len()).filter(|&v| is_node[v]).collect();
    let mut arcs = Vec::new();
    for &node in &nodes {
        let mut next = child[node];
        while let Some(candidate) = next {
            if is_node[candidate] {
                arcs.push((id(node), id(candidate)));
                break;
            }
            next = child[candidate];
        }
    }
    arcs.sort_unstable();
    Reduced {
        nodes: nodes.into_iter().map(id).collect(),
        arcs,
    }
}

/// Offline segmentation: every node owns itself and every other vertex is
/// owned by the upper node of the arc it lies on.
pub fn offline_owners(
    kind: TreeKind,
    values: &[FunctionValue],
    edges: &[(GlobalId, GlobalId)],
) -> Vec<GlobalId> {
    let child = augmented_children(kind, values, edges);
    let is_node = node_mask(&child);
    let mut owners: Vec<GlobalId> = (0..child.len()).map(id).collect();
    for node in (0..child.len()).filter(|&v| is_node[v]) {
        let mut next = child[node];
        while let Some(regular) = next.filter(|&v| !is_node[v]) {
            owners[regular] = id(node);
            next = child[regular];
        }
    }
    owners
}

/// Streams a mesh edge by edge, adding each vertex on first contact and
/// finalizing it as soon as its last incident edge has been seen.
pub fn stream_eagerly<G: OutputGraph>(
    tree: &mut UnionTree<G>,
    values: &[FunctionValue],
    edges: &[(GlobalId, GlobalId)],
) -> Result<()> {
    let mut remaining: BTreeMap<GlobalId, usize> = BTreeMap::new();
    for &(a, b) in edges {
        *remaining.entry(a).or_default() += 1;
        if a != b {
            *remaining.entry(b).or_default() += 1;
        }
    }

    let mut added = BTreeSet::new();
    for &(a, b) in edges {
        for end in [a, b] {
            if added.insert(end) {
                tree.add_vertex(end, values[index(end)])?;
            }
        }
        tree.add_edge(a, b)?;
        let ends: &[GlobalId] = if a == b { &[a] } else { &[a, b] };
        for &end in ends {
            let left = remaining.entry(end).or_default();
            *left -= 1;
            if *left == 0 {
                tree.finalize_vertex(end, false)?;
            }
        }
    }

    for (vertex, value) in (0..).zip(values) {
        if !remaining.contains_key(&vertex) {
            tree.add_vertex(vertex, *value)?;
            tree.finalize_vertex(vertex, false)?;
        }
    }
    tree.cleanup()
}

/// Builds a `width` x `height` grid split into triangles along the
/// down-right diagonal, with ids in row-major order.
pub fn grid_edges(width: usize, height: usize) -> Vec<(GlobalId, GlobalId)> {
    let at = |x: usize, y: usize| id(y * width + x);
    let mut edges = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if x + 1 < width {
                edges.push((at(x, y), at(x + 1, y)));
            }
            if y + 1 < height {
                edges.push((at(x, y), at(x, y + 1)));
                if x + 1 < width {
                    edges.push((at(x, y), at(x + 1, y + 1)));
                }
            }
        }
    }
    edges
}

/// Builds a path mesh `0 - 1 - ... - n-1`.
pub fn path_edges(count: usize) -> Vec<(GlobalId, GlobalId)> {
    (1..count).map(|v| (id(v - 1), id(v))).collect()
}

fn index(vertex: GlobalId) -> usize {
    usize::try_from(vertex).expect("test ids fit in usize")
}

fn id(vertex: usize) -> GlobalId {
    GlobalId::try_from(vertex).expect("test indices fit in u64")
}

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(count: usize) -> Self {
        Self {
            parent: (0..count).collect(),
        }
    }

    fn find(&mut self, mut v: usize) -> usize {
        while self.parent[v] != v {
            self.parent[v] = self.parent[self.parent[v]];
            v = self.parent[v];
        }
        v
    }

    fn union(&mut self, a: usize, b: usize) -> usize {
        self.parent[a] = b;
        b
    }
}
