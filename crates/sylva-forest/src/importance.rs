//! Per-feature importance accumulation across all trees of a forest.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use crate::error::ForestError;
use crate::matrix::FeatureMatrix;
use crate::node::FeatureIndex;

/// Streaming mean of the impurity decreases attributed to one feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunningMean {
    /// Mean of all recorded values.
    pub mean: f64,
    /// Number of recorded values.
    pub count: usize,
}

impl RunningMean {
    /// Fold one value into the mean.
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.mean += (value - self.mean) / self.count as f64;
    }
}

/// Shared sink for split contributions, one locked slot per feature.
///
/// Scoped to one training run and handed to every tree builder.
#[derive(Debug)]
pub struct ImportanceTracker {
    slots: Vec<Mutex<RunningMean>>,
}

impl ImportanceTracker {
    /// Create a tracker with one empty slot per matrix column.
    #[must_use]
    pub fn new(feature_count: usize) -> Self {
        Self {
            slots: (0..feature_count)
                .map(|_| Mutex::new(RunningMean::default()))
                .collect(),
        }
    }

    /// Record the impurity decrease of one split on `feature`.
    pub fn record(&self, feature: FeatureIndex, impurity_decrease: f64) {
        self.slots[feature.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(impurity_decrease);
    }

    /// Copy out every slot, indexed by feature.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RunningMean> {
        self.slots
            .iter()
            .map(|slot| *slot.lock().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }
}

#[derive(serde::Serialize)]
struct ImportanceRecord<'a> {
    name: &'a str,
    mean: f64,
    count: usize,
}

/// Write one `name<TAB>mean<TAB>count` line per feature.
///
/// # Errors
///
/// Returns [`ForestError::ImportanceUnavailable`] if `importance` does not
/// hold one entry per matrix column (nothing is written), or
/// [`ForestError::WriteImportance`] if a record cannot be written.
pub fn write_importance<W: Write>(
    writer: W,
    matrix: &FeatureMatrix,
    importance: &[RunningMean],
) -> Result<(), ForestError> {
    if importance.len() != matrix.column_count() {
        return Err(ForestError::ImportanceUnavailable {
            expected: matrix.column_count(),
            got: importance.len(),
        });
    }
    let mut out = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);
    for (column, running) in matrix.columns().iter().zip(importance) {
        out.serialize(ImportanceRecord {
            name: column.name(),
            mean: running.mean,
            count: running.count,
        })
        .map_err(|source| ForestError::WriteImportance { source })?;
    }
    out.flush()
        .map_err(|e| ForestError::WriteImportance { source: e.into() })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::matrix::FeatureColumn;

    #[test]
    fn repeated_value_is_idempotent() {
        let mut running = RunningMean::default();
        for _ in 0..1000 {
            running.add(0.37);
        }
        assert_eq!(running.mean, 0.37);
        assert_eq!(running.count, 1000);
    }

    #[test]
    fn mean_of_distinct_values() {
        let mut running = RunningMean::default();
        for v in [1.0, 2.0, 3.0, 6.0] {
            running.add(v);
        }
        assert!((running.mean - 3.0).abs() < 1e-12);
        assert_eq!(running.count, 4);
    }

    #[test]
    fn concurrent_records_are_all_counted() {
        let tracker = Arc::new(ImportanceTracker::new(3));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        tracker.record(FeatureIndex::new(1), 0.25);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot[1].count, 4000);
        assert_eq!(snapshot[1].mean, 0.25);
        assert_eq!(snapshot[0], RunningMean::default());
    }

    #[test]
    fn importance_table_layout() {
        let matrix = FeatureMatrix::new(vec![
            FeatureColumn::numeric("x", vec![Some(1.0)]).unwrap(),
            FeatureColumn::categorical("label", vec![Some("a")]),
        ])
        .unwrap();
        let importance = vec![
            RunningMean {
                mean: 0.5,
                count: 3,
            },
            RunningMean::default(),
        ];
        let mut buf = Vec::new();
        write_importance(&mut buf, &matrix, &importance).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "x\t0.5\t3\nlabel\t0.0\t0\n");
    }

    #[test]
    fn importance_length_must_match_columns() {
        let matrix = FeatureMatrix::new(vec![
            FeatureColumn::numeric("x", vec![Some(1.0)]).unwrap(),
            FeatureColumn::categorical("label", vec![Some("a")]),
        ])
        .unwrap();
        let mut buf = Vec::new();
        let err = write_importance(&mut buf, &matrix, &[]).unwrap_err();
        assert!(matches!(
            err,
            ForestError::ImportanceUnavailable {
                expected: 2,
                got: 0
            }
        ));
        assert!(buf.is_empty());
    }
}
