//! Row bootstrap and per-split candidate feature sampling.

use rand::Rng;

use crate::error::ForestError;
use crate::node::FeatureIndex;

/// Draw `sample_size` row indices uniformly from `[0, row_count)` with replacement.
///
/// A `sample_size` of zero draws `row_count` rows.
pub fn draw_bootstrap(row_count: usize, sample_size: usize, rng: &mut impl Rng) -> Vec<usize> {
    let draws = if sample_size == 0 { row_count } else { sample_size };
    (0..draws).map(|_| rng.gen_range(0..row_count)).collect()
}

/// Fixed candidate pool (every non-target feature) plus the per-split draw size.
#[derive(Debug, Clone)]
pub struct Sampler {
    pool: Vec<FeatureIndex>,
    m_try: usize,
}

impl Sampler {
    /// Build the candidate pool for a matrix of `column_count` columns.
    ///
    /// `m_try` of `None` or `Some(0)` defaults to `ceil(sqrt(column_count))`,
    /// clamped to the pool size.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::NoCandidateFeatures`] | the target is the only column |
    /// | [`ForestError::InvalidMTry`] | explicit `m_try` exceeds the pool |
    pub fn new(
        column_count: usize,
        target_index: usize,
        m_try: Option<usize>,
    ) -> Result<Self, ForestError> {
        let pool: Vec<FeatureIndex> = (0..column_count)
            .filter(|&i| i != target_index)
            .map(FeatureIndex::new)
            .collect();
        if pool.is_empty() {
            return Err(ForestError::NoCandidateFeatures);
        }
        let m_try = match m_try {
            Some(m) if m > 0 => {
                if m > pool.len() {
                    return Err(ForestError::InvalidMTry {
                        m_try: m,
                        available: pool.len(),
                    });
                }
                m
            }
            _ => ((column_count as f64).sqrt().ceil() as usize).clamp(1, pool.len()),
        };
        Ok(Self { pool, m_try })
    }

    /// Return the resolved number of candidates per split.
    #[must_use]
    pub fn m_try(&self) -> usize {
        self.m_try
    }

    /// Return the candidate pool.
    #[must_use]
    pub fn pool(&self) -> &[FeatureIndex] {
        &self.pool
    }

    /// Draw `m_try` distinct candidates from the pool.
    pub fn choose(&self, rng: &mut impl Rng) -> Vec<FeatureIndex> {
        let mut order = self.pool.clone();
        let n = order.len();
        // Partial Fisher-Yates: only the first m_try positions are shuffled.
        for i in 0..self.m_try {
            let j = rng.gen_range(i..n);
            order.swap(i, j);
        }
        order.truncate(self.m_try);
        order
    }
}
