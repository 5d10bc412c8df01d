//! Configuration builder for forest growing.

use std::io::Write;

use crate::error::ForestError;
use crate::matrix::FeatureMatrix;
use crate::result::TrainingReport;
use crate::serialize::ForestWriter;
use crate::split::CategoricalSearch;
use crate::target::TargetKind;

/// Leaf size used for categorical targets when none is configured.
pub const DEFAULT_CLASSIFICATION_LEAF_SIZE: usize = 1;

/// Leaf size used for continuous targets when none is configured.
pub const DEFAULT_REGRESSION_LEAF_SIZE: usize = 4;

/// Treatment of rows that lack the value of a split feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Drop such rows from the split's subtree.
    #[default]
    Filter,
    /// Route such rows to a third, missing-value branch.
    SplitMissing,
}

/// Configuration for growing a forest.
///
/// Construct via [`ForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter            | Default                                   |
/// |----------------------|-------------------------------------------|
/// | `sample_size`        | 0 (row count)                             |
/// | `min_leaf_size`      | `None` (1 categorical, 4 continuous)      |
/// | `m_try`              | `None` (`ceil(sqrt(columns))`)            |
/// | `missing_policy`     | `Filter`                                  |
/// | `categorical_search` | `Iterative`                               |
/// | `target_kind`        | `Plain`                                   |
/// | `track_importance`   | `true`                                    |
/// | `seed`               | 42                                        |
/// | `threads`            | `None` (global rayon pool)                |
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub(crate) target_name: String,
    pub(crate) n_trees: usize,
    pub(crate) sample_size: usize,
    pub(crate) min_leaf_size: Option<usize>,
    pub(crate) m_try: Option<usize>,
    pub(crate) missing_policy: MissingPolicy,
    pub(crate) categorical_search: CategoricalSearch,
    pub(crate) target_kind: TargetKind,
    pub(crate) track_importance: bool,
    pub(crate) seed: u64,
    pub(crate) threads: Option<usize>,
}

impl ForestConfig {
    /// Create a new config predicting `target_name` with `n_trees` trees.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidTreeCount`] if `n_trees` is zero.
    pub fn new(target_name: impl Into<String>, n_trees: usize) -> Result<Self, ForestError> {
        if n_trees == 0 {
            return Err(ForestError::InvalidTreeCount { n_trees });
        }
        Ok(Self {
            target_name: target_name.into(),
            n_trees,
            sample_size: 0,
            min_leaf_size: None,
            m_try: None,
            missing_policy: MissingPolicy::Filter,
            categorical_search: CategoricalSearch::Iterative,
            target_kind: TargetKind::Plain,
            track_importance: true,
            seed: 42,
            threads: None,
        })
    }

    // --- Setters ---

    /// Set the number of rows drawn per tree. Zero draws as many rows as the matrix has.
    #[must_use]
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Set the minimum number of rows per leaf. `None` or zero picks the default for the target.
    #[must_use]
    pub fn with_min_leaf_size(mut self, min_leaf_size: Option<usize>) -> Self {
        self.min_leaf_size = min_leaf_size;
        self
    }

    /// Set the number of candidate features drawn at each split.
    #[must_use]
    pub fn with_m_try(mut self, m_try: Option<usize>) -> Self {
        self.m_try = m_try;
        self
    }

    /// Set the missing-value policy.
    #[must_use]
    pub fn with_missing_policy(mut self, missing_policy: MissingPolicy) -> Self {
        self.missing_policy = missing_policy;
        self
    }

    /// Set the search used for categorical features with many levels.
    #[must_use]
    pub fn with_categorical_search(mut self, categorical_search: CategoricalSearch) -> Self {
        self.categorical_search = categorical_search;
        self
    }

    /// Set the target variant.
    #[must_use]
    pub fn with_target_kind(mut self, target_kind: TargetKind) -> Self {
        self.target_kind = target_kind;
        self
    }

    /// Enable or disable per-feature importance tracking.
    #[must_use]
    pub fn with_track_importance(mut self, track_importance: bool) -> Self {
        self.track_importance = track_importance;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Grow trees on a dedicated pool of `threads` workers instead of the global pool.
    #[must_use]
    pub fn with_threads(mut self, threads: Option<usize>) -> Self {
        self.threads = threads;
        self
    }

    // --- Getters ---

    /// Return the target feature name.
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the configured per-tree sample size (0 means row count).
    #[must_use]
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    /// Return the configured minimum leaf size, if any.
    #[must_use]
    pub fn min_leaf_size(&self) -> Option<usize> {
        self.min_leaf_size
    }

    /// Return the configured candidate count, if any.
    #[must_use]
    pub fn m_try(&self) -> Option<usize> {
        self.m_try
    }

    /// Return the missing-value policy.
    #[must_use]
    pub fn missing_policy(&self) -> MissingPolicy {
        self.missing_policy
    }

    /// Return the categorical search strategy.
    #[must_use]
    pub fn categorical_search(&self) -> CategoricalSearch {
        self.categorical_search
    }

    /// Return the target variant.
    #[must_use]
    pub fn target_kind(&self) -> &TargetKind {
        &self.target_kind
    }

    /// Return whether importance is tracked.
    #[must_use]
    pub fn track_importance(&self) -> bool {
        self.track_importance
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the dedicated thread count, if any.
    #[must_use]
    pub fn threads(&self) -> Option<usize> {
        self.threads
    }

    /// Leaf size after applying the per-target default.
    pub(crate) fn resolved_min_leaf_size(&self, classification: bool) -> usize {
        match self.min_leaf_size {
            Some(n) if n > 0 => n,
            _ if classification => DEFAULT_CLASSIFICATION_LEAF_SIZE,
            _ => DEFAULT_REGRESSION_LEAF_SIZE,
        }
    }

    /// Grow the forest on `matrix` and stream every tree into `writer`.
    ///
    /// The writer must be fresh: this writes the header, appends the trees in
    /// index order and finishes the writer.
    ///
    /// # Errors
    ///
    /// | Variant                               | When                                                  |
    /// |---------------------------------------|-------------------------------------------------------|
    /// | [`ForestError::TargetNotFound`]       | `target_name` is not a matrix column                  |
    /// | [`ForestError::TargetKindMismatch`]   | target variant does not fit the target column         |
    /// | [`ForestError::InvalidCost`]          | a cost-weighted target has a negative cost            |
    /// | [`ForestError::NoCandidateFeatures`]  | the target is the only column                         |
    /// | [`ForestError::InvalidMTry`]          | `m_try` exceeds the candidate features                |
    /// | [`ForestError::InvalidLeafSize`]      | the leaf size exceeds the per-tree sample             |
    /// | [`ForestError::TooFewLabelledRows`]   | fewer rows carry a target than one leaf needs         |
    /// | [`ForestError::ThreadPool`]           | the dedicated pool cannot be built                    |
    /// | writer errors                         | the header or a tree cannot be written                |
    pub fn train<W: Write>(
        &self,
        matrix: &FeatureMatrix,
        writer: &mut ForestWriter<W>,
    ) -> Result<TrainingReport, ForestError> {
        crate::forest::train(self, matrix, writer)
    }
}
