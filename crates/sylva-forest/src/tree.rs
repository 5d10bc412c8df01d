use std::collections::VecDeque;

use rand::Rng;
use tracing::trace;

use crate::{
    importance::ImportanceTracker,
    matrix::FeatureMatrix,
    node::{Node, NodeIndex, Prediction},
    sampler::Sampler,
    split::{Branch, CategoricalSearch, SplitCandidate, SplitParams, find_split, route},
    target::Target,
};

/// Grows one tree at a time from a row sample.
///
/// Holds everything that stays fixed across the trees of a forest: the
/// matrix, the target, the candidate pool, and the stopping and missing
/// value rules.
#[derive(Debug, Clone)]
pub struct TreeBuilder<'a> {
    matrix: &'a FeatureMatrix,
    target: &'a Target<'a>,
    sampler: &'a Sampler,
    params: SplitParams,
    importance: Option<&'a ImportanceTracker>,
}

impl<'a> TreeBuilder<'a> {
    /// Create a builder.
    ///
    /// `min_leaf_size` values below 1 are treated as 1.
    #[must_use]
    pub fn new(
        matrix: &'a FeatureMatrix,
        target: &'a Target<'a>,
        sampler: &'a Sampler,
        min_leaf_size: usize,
    ) -> Self {
        Self {
            matrix,
            target,
            sampler,
            params: SplitParams {
                min_leaf_size: min_leaf_size.max(1),
                split_missing: false,
                search: CategoricalSearch::default(),
            },
            importance: None,
        }
    }

    /// Route rows missing the split feature to a third branch instead of dropping them.
    #[must_use]
    pub fn with_split_missing(mut self, split_missing: bool) -> Self {
        self.params.split_missing = split_missing;
        self
    }

    /// Set the search used for categorical features with many levels.
    #[must_use]
    pub fn with_categorical_search(mut self, search: CategoricalSearch) -> Self {
        self.params.search = search;
        self
    }

    /// Record every winning split's impurity decrease into `tracker`.
    #[must_use]
    pub fn with_importance(mut self, tracker: &'a ImportanceTracker) -> Self {
        self.importance = Some(tracker);
        self
    }

    /// Grow a tree on `rows`, which may repeat indices.
    ///
    /// Every row must have a present target value.
    pub fn grow(&self, rows: &[usize], rng: &mut impl Rng) -> Tree {
        let mut arena = Vec::new();
        self.build(rows, rng, &mut arena);
        Tree { nodes: arena }
    }

    /// Recursively build the subtree for `rows`, returning its arena index.
    fn build(&self, rows: &[usize], rng: &mut impl Rng, arena: &mut Vec<Node>) -> NodeIndex {
        let n_rows = rows.len();
        let make_leaf = |arena: &mut Vec<Node>| -> NodeIndex {
            let idx = arena.len();
            arena.push(Node::Leaf {
                prediction: self.target.leaf_value(rows),
                n_rows,
            });
            NodeIndex::new(idx)
        };

        if n_rows < 2 * self.params.min_leaf_size || self.target.is_pure(rows) {
            return make_leaf(arena);
        }

        let Some(split) = self.best_split(rows, rng) else {
            return make_leaf(arena);
        };

        let column = self.matrix.column(split.feature.index());
        let mut left_rows = Vec::with_capacity(n_rows / 2);
        let mut right_rows = Vec::with_capacity(n_rows / 2);
        let mut missing_rows = Vec::new();
        for &row in rows {
            match route(column, &split.rule, row) {
                Branch::Left => left_rows.push(row),
                Branch::Right => right_rows.push(row),
                Branch::Missing => missing_rows.push(row),
            }
        }
        if !self.params.split_missing && !missing_rows.is_empty() {
            trace!(
                feature = %split.feature,
                n_dropped = missing_rows.len(),
                "rows missing the split feature leave this subtree"
            );
            missing_rows.clear();
        }

        if let Some(tracker) = self.importance {
            tracker.record(split.feature, split.impurity_decrease);
        }

        // Arena pattern: reserve index, recurse, then overwrite with the split.
        let node_idx = arena.len();
        arena.push(Node::Leaf {
            prediction: Prediction::Numeric(0.0),
            n_rows,
        });

        let left = self.build(&left_rows, rng, arena);
        let right = self.build(&right_rows, rng, arena);
        let missing = (!missing_rows.is_empty()).then(|| self.build(&missing_rows, rng, arena));

        arena[node_idx] = Node::Split {
            feature: split.feature,
            rule: split.rule,
            left,
            right,
            missing,
            n_rows,
            impurity_decrease: split.impurity_decrease,
        };
        NodeIndex::new(node_idx)
    }

    /// Best split over a fresh draw of candidate features.
    ///
    /// Higher decrease wins; equal decreases go to the lower feature index.
    fn best_split(&self, rows: &[usize], rng: &mut impl Rng) -> Option<SplitCandidate> {
        let mut best: Option<SplitCandidate> = None;
        for feature in self.sampler.choose(rng) {
            let column = self.matrix.column(feature.index());
            let Some(candidate) = find_split(column, feature, self.target, rows, &self.params, rng)
            else {
                continue;
            };
            let wins = match &best {
                None => true,
                Some(b) => {
                    candidate.impurity_decrease > b.impurity_decrease
                        || (candidate.impurity_decrease == b.impurity_decrease
                            && candidate.feature < b.feature)
                }
            };
            if wins {
                best = Some(candidate);
            }
        }
        best
    }
}

/// A grown decision tree.
///
/// Stored as an arena-based `Vec<Node>` in depth-first pre-order with the
/// root at index 0.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Tree {
    pub(crate) nodes: Vec<Node>,
}

impl Tree {
    /// Rebuild a tree from a pre-order arena.
    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Return the node arena.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the root node.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    /// Return the total number of nodes in the tree (both splits and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Iterate over the leaves in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Return the maximum depth of the tree; a lone root leaf has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0usize;
        let mut queue = VecDeque::new();
        queue.push_back((0usize, 0usize));

        while let Some((node_idx, d)) = queue.pop_front() {
            match &self.nodes[node_idx] {
                Node::Leaf { .. } => max_depth = max_depth.max(d),
                Node::Split {
                    left,
                    right,
                    missing,
                    ..
                } => {
                    queue.push_back((left.index(), d + 1));
                    queue.push_back((right.index(), d + 1));
                    if let Some(m) = missing {
                        queue.push_back((m.index(), d + 1));
                    }
                }
            }
        }
        max_depth
    }

    /// Route a matrix row from the root to a leaf and return its prediction.
    ///
    /// Returns `None` when the row lacks a split feature at a node that has no
    /// missing branch.
    #[must_use]
    pub fn predict_row(&self, matrix: &FeatureMatrix, row: usize) -> Option<&Prediction> {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { prediction, .. } => return Some(prediction),
                Node::Split {
                    feature,
                    rule,
                    left,
                    right,
                    missing,
                    ..
                } => {
                    idx = match route(matrix.column(feature.index()), rule, row) {
                        Branch::Left => left.index(),
                        Branch::Right => right.index(),
                        Branch::Missing => missing.as_ref()?.index(),
                    };
                }
            }
        }
    }
}
