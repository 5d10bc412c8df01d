//! Forest growing with batched parallel tree construction.

use std::io::Write;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info, instrument};

use crate::config::{ForestConfig, MissingPolicy};
use crate::error::ForestError;
use crate::importance::ImportanceTracker;
use crate::matrix::FeatureMatrix;
use crate::result::TrainingReport;
use crate::sampler::{Sampler, draw_bootstrap};
use crate::serialize::ForestWriter;
use crate::target::Target;
use crate::tree::{Tree, TreeBuilder};

/// Grow one tree from its own seed.
///
/// The bootstrap draws `sample_size` positions into `labelled`, so every row
/// that reaches the builder carries a target value.
fn grow_tree(
    builder: &TreeBuilder<'_>,
    labelled: &[usize],
    sample_size: usize,
    index: usize,
    seed: u64,
) -> Tree {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let rows: Vec<usize> = draw_bootstrap(labelled.len(), sample_size, &mut rng)
        .into_iter()
        .map(|position| labelled[position])
        .collect();
    let tree = builder.grow(&rows, &mut rng);
    debug!(
        index,
        n_rows = rows.len(),
        n_nodes = tree.n_nodes(),
        depth = tree.depth(),
        "tree grown"
    );
    tree
}

/// Grow the forest and stream it into `writer`.
#[instrument(skip_all, fields(target = %config.target_name, n_trees = config.n_trees, n_rows = matrix.row_count()))]
pub(crate) fn train<W: Write>(
    config: &ForestConfig,
    matrix: &FeatureMatrix,
    writer: &mut ForestWriter<W>,
) -> Result<TrainingReport, ForestError> {
    // --- Validate config against the matrix ---
    let target_index = matrix.column_by_name(&config.target_name)?;
    let labels = matrix.column(target_index);
    let target = Target::new(labels, &config.target_kind)?;
    let sampler = Sampler::new(matrix.column_count(), target_index, config.m_try)?;

    let row_count = matrix.row_count();
    let sample_size = if config.sample_size == 0 {
        row_count
    } else {
        config.sample_size
    };
    let min_leaf_size = config.resolved_min_leaf_size(target.is_classification());
    if min_leaf_size > sample_size {
        return Err(ForestError::InvalidLeafSize {
            min_leaf_size,
            sample_size,
        });
    }

    let labelled: Vec<usize> = (0..row_count).filter(|&row| !labels.is_missing(row)).collect();
    if labelled.len() < min_leaf_size {
        return Err(ForestError::TooFewLabelledRows {
            labelled: labelled.len(),
            min_leaf_size,
        });
    }

    let pool = config
        .threads
        .map(|n| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|source| ForestError::ThreadPool { source })
        })
        .transpose()?;
    let batch_size = pool
        .as_ref()
        .map_or_else(rayon::current_num_threads, rayon::ThreadPool::current_num_threads)
        .max(1);

    info!(
        n_trees = config.n_trees,
        n_rows = row_count,
        n_unlabelled = labels.missing_count(),
        sample_size,
        m_try = sampler.m_try(),
        min_leaf_size,
        missing_policy = ?config.missing_policy,
        batch_size,
        "growing forest"
    );

    let tracker = ImportanceTracker::new(matrix.column_count());
    let mut builder = TreeBuilder::new(matrix, &target, &sampler, min_leaf_size)
        .with_split_missing(config.missing_policy == MissingPolicy::SplitMissing)
        .with_categorical_search(config.categorical_search);
    if config.track_importance {
        builder = builder.with_importance(&tracker);
    }

    // Per-tree seeds from the master RNG, independent of scheduling.
    let mut master_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let tree_seeds: Vec<u64> = (0..config.n_trees).map(|_| master_rng.r#gen()).collect();

    writer.write_header(&config.target_name, config.n_trees)?;

    for (batch, seeds) in tree_seeds.chunks(batch_size).enumerate() {
        let first = batch * batch_size;
        let grow_batch = || -> Vec<Tree> {
            seeds
                .par_iter()
                .enumerate()
                .map(|(offset, &seed)| {
                    grow_tree(&builder, &labelled, sample_size, first + offset, seed)
                })
                .collect()
        };
        let trees = match &pool {
            Some(pool) => pool.install(grow_batch),
            None => grow_batch(),
        };
        for (offset, tree) in trees.iter().enumerate() {
            writer.append_tree(tree, first + offset)?;
        }
    }

    writer.finish()?;

    let importance = if config.track_importance {
        tracker.snapshot()
    } else {
        Vec::new()
    };
    info!(n_trees = writer.trees_written(), "forest grown");

    Ok(TrainingReport {
        n_trees: config.n_trees,
        n_rows: row_count,
        sample_size,
        m_try: sampler.m_try(),
        min_leaf_size,
        target: config.target_name.clone(),
        importance,
    })
}
