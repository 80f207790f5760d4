//! Union of directed trees over arbitrary node ids.
//!
//! Raw spans form a forest through their parent pointers; reconstructed task
//! dependency graphs reuse the same structure. Acyclicity is the caller's
//! contract and is not verified on construction (see [`DirectedTrees::is_acyclic`]).

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
pub struct DirectedTrees<N> {
    nodes: Vec<N>,
    node_set: HashSet<N>,
    edges: HashSet<(N, N)>,
    children: HashMap<N, Vec<N>>,
    parents: HashMap<N, Vec<N>>,
}

impl<N: Clone + Eq + Hash> Default for DirectedTrees<N> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            node_set: HashSet::new(),
            edges: HashSet::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
        }
    }
}

impl<N: Clone + Eq + Hash> DirectedTrees<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the forest spanned by `(parent, child)` edges.
    pub fn from_edges(edges: impl IntoIterator<Item = (N, N)>) -> Self {
        Self::with_nodes(std::iter::empty(), edges)
    }

    /// Builds a forest that also contains isolated `nodes` (one-node trees).
    pub fn with_nodes(
        nodes: impl IntoIterator<Item = N>,
        edges: impl IntoIterator<Item = (N, N)>,
    ) -> Self {
        let mut trees = Self::new();
        for node in nodes {
            trees.add_node(node);
        }
        for (from, to) in edges {
            trees.add_edge(from, to);
        }
        trees
    }

    pub fn add_node(&mut self, node: N) {
        if self.node_set.insert(node.clone()) {
            self.nodes.push(node);
        }
    }

    pub fn add_edge(&mut self, from: N, to: N) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        if self.edges.insert((from.clone(), to.clone())) {
            self.children.entry(from.clone()).or_default().push(to.clone());
            self.parents.entry(to).or_default().push(from);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: &N) -> bool {
        self.node_set.contains(node)
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.nodes.iter()
    }

    pub fn edges(&self) -> &HashSet<(N, N)> {
        &self.edges
    }

    pub fn has_edge(&self, from: &N, to: &N) -> bool {
        self.edges.contains(&(from.clone(), to.clone()))
    }

    pub fn children(&self, node: &N) -> &[N] {
        self.children.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self, node: &N) -> &[N] {
        self.parents.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes without incoming edges.
    pub fn root_nodes(&self) -> Vec<&N> {
        self.nodes
            .iter()
            .filter(|n| self.parents(n).is_empty())
            .collect()
    }

    /// All nodes reachable from `node`, excluding `node` itself, in BFS order.
    pub fn descendants(&self, node: &N) -> Vec<N> {
        let mut seen: HashSet<&N> = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<&N> = self.children(node).iter().collect();

        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            order.push(next.clone());
            queue.extend(self.children(next).iter());
        }
        order
    }

    /// True if a directed path of length >= 1 leads from `from` to `to`.
    pub fn has_path(&self, from: &N, to: &N) -> bool {
        let mut seen: HashSet<&N> = HashSet::new();
        let mut stack: Vec<&N> = self.children(from).iter().collect();

        while let Some(next) = stack.pop() {
            if next == to {
                return true;
            }
            if seen.insert(next) {
                stack.extend(self.children(next).iter());
            }
        }
        false
    }

    /// True iff every consecutive pair of `nodes` is connected by a directed path.
    pub fn contains_path(&self, nodes: &[N]) -> bool {
        nodes.iter().all(|n| self.contains(n))
            && nodes.windows(2).all(|pair| self.has_path(&pair[0], &pair[1]))
    }

    /// Restricts the forest to the subtree(s) below `node`.
    ///
    /// Inclusive keeps `node` as the single root. Exclusive drops `node` so its
    /// direct children become roots. An unknown node yields an empty forest.
    pub fn bound_by(&self, node: &N, inclusive: bool) -> Self {
        if !self.contains(node) {
            return Self::new();
        }

        let mut keep: HashSet<N> = self.descendants(node).into_iter().collect();
        if inclusive {
            keep.insert(node.clone());
        } else {
            keep.remove(node);
        }

        let nodes = self.nodes.iter().filter(|n| keep.contains(*n)).cloned();
        let edges = self
            .edges
            .iter()
            .filter(|(from, to)| keep.contains(from) && keep.contains(to))
            .cloned()
            .collect::<Vec<_>>();
        Self::with_nodes(nodes, edges)
    }

    /// Kahn's algorithm over the whole node set.
    pub fn is_acyclic(&self) -> bool {
        let mut in_degree: HashMap<&N, usize> =
            self.nodes.iter().map(|n| (n, self.parents(n).len())).collect();
        let mut queue: VecDeque<&N> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0;

        while let Some(node) = queue.pop_front() {
            visited += 1;
            for child in self.children(node) {
                if let Some(d) = in_degree.get_mut(child) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }
        visited == self.nodes.len()
    }
}

impl<N: Clone + Eq + Hash> PartialEq for DirectedTrees<N> {
    fn eq(&self, other: &Self) -> bool {
        self.node_set == other.node_set && self.edges == other.edges
    }
}

impl<N: Clone + Eq + Hash> Eq for DirectedTrees<N> {}

impl<N: Clone + Eq + Hash> FromIterator<(N, N)> for DirectedTrees<N> {
    fn from_iter<I: IntoIterator<Item = (N, N)>>(iter: I) -> Self {
        Self::from_edges(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    //     0
    //    / \
    //   1   2
    //  / \   \
    // 3   4   5
    fn sample() -> DirectedTrees<u32> {
        DirectedTrees::from_edges([(0, 1), (0, 2), (1, 3), (1, 4), (2, 5)])
    }

    #[test]
    fn test_roots_and_membership() {
        let trees = DirectedTrees::with_nodes([9], [(0, 1), (7, 8)]);
        let mut roots: Vec<u32> = trees.root_nodes().into_iter().copied().collect();
        roots.sort();
        assert_eq!(roots, vec![0, 7, 9]);
        assert!(trees.contains(&9));
        assert!(!trees.contains(&3));
        assert_eq!(trees.len(), 5);
    }

    #[test]
    fn test_single_node_is_a_tree() {
        let trees = DirectedTrees::with_nodes(["only"], std::iter::empty());
        assert_eq!(trees.root_nodes(), vec![&"only"]);
        assert!(trees.edges().is_empty());
        assert_eq!(trees.bound_by(&"only", true), trees);
        assert!(trees.bound_by(&"only", false).is_empty());
    }

    #[test]
    fn test_bound_inclusive() {
        let bounded = sample().bound_by(&1, true);
        assert_eq!(bounded, DirectedTrees::from_edges([(1, 3), (1, 4)]));
        assert_eq!(bounded.root_nodes(), vec![&1]);
    }

    #[test]
    fn test_bound_exclusive_promotes_children() {
        let bounded = sample().bound_by(&0, false);
        assert_eq!(bounded, DirectedTrees::from_edges([(1, 3), (1, 4), (2, 5)]));

        let mut roots: Vec<u32> = bounded.root_nodes().into_iter().copied().collect();
        roots.sort();
        assert_eq!(roots, vec![1, 2]);

        let leaf_only = sample().bound_by(&2, false);
        assert_eq!(leaf_only, DirectedTrees::with_nodes([5], std::iter::empty()));
    }

    #[test]
    fn test_bound_unknown_node_is_empty() {
        assert!(sample().bound_by(&42, true).is_empty());
    }

    #[test]
    fn test_contains_path() {
        let trees = sample();
        assert!(trees.contains_path(&[0, 1, 3]));
        assert!(trees.contains_path(&[0, 3]));
        assert!(trees.contains_path(&[0, 5]));
        assert!(!trees.contains_path(&[1, 5]));
        assert!(!trees.contains_path(&[3, 1]));
        assert!(!trees.contains_path(&[0, 0]));
        assert!(trees.contains_path(&[4]));
        assert!(!trees.contains_path(&[99]));
    }

    #[test]
    fn test_multiple_parents_for_dependency_graphs() {
        let deps = DirectedTrees::from_edges([("a", "c"), ("b", "c"), ("c", "d")]);
        assert!(deps.contains_path(&["a", "d"]));
        assert!(deps.contains_path(&["b", "c", "d"]));
        assert_eq!(deps.parents(&"c").len(), 2);
        assert!(deps.is_acyclic());

        let cyclic = DirectedTrees::from_edges([("a", "b"), ("b", "a")]);
        assert!(!cyclic.is_acyclic());
    }

    #[test]
    fn test_structural_equality_ignores_insertion_order() {
        let a = DirectedTrees::from_edges([(1, 2), (1, 3)]);
        let b = DirectedTrees::from_edges([(1, 3), (1, 2)]);
        assert_eq!(a, b);
    }

    /// Random forests: every node `i > 0` optionally hangs below a smaller id.
    fn forest_strategy() -> impl Strategy<Value = DirectedTrees<u32>> {
        prop::collection::vec(prop::option::of(any::<prop::sample::Index>()), 1..40).prop_map(
            |parents| {
                let mut trees = DirectedTrees::new();
                trees.add_node(0);
                for (i, parent) in parents.into_iter().enumerate() {
                    let child = i as u32 + 1;
                    match parent {
                        Some(idx) => trees.add_edge(idx.index(child as usize) as u32, child),
                        None => trees.add_node(child),
                    }
                }
                trees
            },
        )
    }

    proptest! {
        #[test]
        fn prop_bounded_edges_are_a_subset(trees in forest_strategy(), pick in any::<prop::sample::Index>()) {
            let nodes: Vec<u32> = trees.iter().copied().collect();
            let node = nodes[pick.index(nodes.len())];
            for inclusive in [true, false] {
                let bounded = trees.bound_by(&node, inclusive);
                prop_assert!(bounded.edges().is_subset(trees.edges()));
            }
        }

        #[test]
        fn prop_bounding_at_sole_root_is_identity(trees in forest_strategy()) {
            let roots: Vec<u32> = trees.root_nodes().into_iter().copied().collect();
            if roots.len() == 1 {
                prop_assert_eq!(trees.bound_by(&roots[0], true), trees.clone());
            }
        }

        #[test]
        fn prop_direct_edges_imply_paths(trees in forest_strategy()) {
            for (from, to) in trees.edges() {
                prop_assert!(trees.contains_path(&[*from, *to]));
            }
            prop_assert!(trees.is_acyclic());
        }
    }
}
