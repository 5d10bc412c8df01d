//! Random forest growing over mixed numeric and categorical features.
//!
//! Grows bootstrap-sampled decision trees against a pluggable target
//! (variance or Gini, L1, entropy, cost-weighted), handles missing values by
//! filtering or by a third branch, streams every finished tree to a
//! [`ForestWriter`], and accumulates per-feature importance while growing.

mod config;
mod error;
mod forest;
mod importance;
mod matrix;
mod node;
mod result;
mod sampler;
mod serialize;
mod split;
mod target;
mod tree;

pub use config::{
    DEFAULT_CLASSIFICATION_LEAF_SIZE, DEFAULT_REGRESSION_LEAF_SIZE, ForestConfig, MissingPolicy,
};
pub use error::ForestError;
pub use importance::{ImportanceTracker, RunningMean, write_importance};
pub use matrix::{FeatureColumn, FeatureMatrix, FeatureValue};
pub use node::{FeatureIndex, LevelSet, Node, NodeIndex, Prediction, SplitRule};
pub use result::TrainingReport;
pub use sampler::{Sampler, draw_bootstrap};
pub use serialize::{FORMAT_VERSION, ForestFormat, ForestInfo, ForestReader, ForestWriter};
pub use split::{CategoricalSearch, MAX_EXHAUSTIVE_LEVELS, RANDOM_BIPARTITIONS};
pub use target::{CostMap, Target, TargetKind};
pub use tree::{Tree, TreeBuilder};
