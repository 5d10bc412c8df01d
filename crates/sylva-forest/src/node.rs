use std::fmt;

/// Zero-based feature column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    /// Create a new feature index from a zero-based column position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based feature column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a `Vec<Node>` arena, identifying a specific node in a tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Create a new node index from a zero-based arena position.
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of categorical level codes sent to the left child.
///
/// Stored as 64-bit words with no trailing zero words, so equal sets
/// compare and serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct LevelSet {
    words: Vec<u64>,
}

impl LevelSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `level` is in the set.
    #[inline]
    #[must_use]
    pub fn contains(&self, level: u32) -> bool {
        let word = (level / 64) as usize;
        self.words
            .get(word)
            .is_some_and(|&w| (w >> (level % 64)) & 1 != 0)
    }

    /// Insert a level.
    pub fn insert(&mut self, level: u32) {
        let word = (level / 64) as usize;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (level % 64);
    }

    /// Number of levels in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Check if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Iterate the levels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64u32)
                .filter(move |bit| (w >> bit) & 1 != 0)
                .map(move |bit| i as u32 * 64 + bit)
        })
    }
}

impl FromIterator<u32> for LevelSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = Self::new();
        for level in iter {
            set.insert(level);
        }
        set
    }
}

/// Predicate of an interior node.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum SplitRule {
    /// Continuous feature: values `<= threshold` go left.
    Threshold(f64),
    /// Categorical feature: levels in the set go left.
    Levels(LevelSet),
}

/// Value predicted by a leaf.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Prediction {
    /// Mean or median of a continuous target.
    Numeric(f64),
    /// Winning level of a categorical target with per-level counts.
    Class {
        /// Predicted level code.
        class: u32,
        /// Row count per level code.
        counts: Vec<usize>,
    },
}

impl Prediction {
    /// Return the predicted level code, `None` for numeric predictions.
    #[must_use]
    pub fn class(&self) -> Option<u32> {
        match self {
            Prediction::Class { class, .. } => Some(*class),
            Prediction::Numeric(_) => None,
        }
    }

    /// Return the predicted value, `None` for class predictions.
    #[must_use]
    pub fn value(&self) -> Option<f64> {
        match self {
            Prediction::Numeric(v) => Some(*v),
            Prediction::Class { .. } => None,
        }
    }
}

/// A node in a tree arena.
///
/// Trees are stored as `Vec<Node>` where children are referenced by
/// [`NodeIndex`] rather than pointers, in depth-first pre-order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Node {
    /// An interior split node.
    Split {
        /// Feature used for the split.
        feature: FeatureIndex,
        /// Routing predicate for present values.
        rule: SplitRule,
        /// Index of the left child node.
        left: NodeIndex,
        /// Index of the right child node.
        right: NodeIndex,
        /// Child for rows missing `feature`, when missing values were split.
        missing: Option<NodeIndex>,
        /// Number of training rows that reached this node.
        n_rows: usize,
        /// Impurity decrease achieved by this split.
        impurity_decrease: f64,
    },
    /// A terminal leaf node.
    Leaf {
        /// Predicted value.
        prediction: Prediction,
        /// Number of training rows in this leaf.
        n_rows: usize,
    },
}

impl Node {
    /// Return the number of training rows that reached this node.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        match self {
            Node::Split { n_rows, .. } | Node::Leaf { n_rows, .. } => *n_rows,
        }
    }

    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}
