//! Summary of a finished training run.

use std::io::Write;

use crate::error::ForestError;
use crate::importance::{RunningMean, write_importance};
use crate::matrix::FeatureMatrix;

/// Resolved parameters and importance scores of a training run.
///
/// The trees themselves live in the writer's output stream.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Number of trees written.
    pub n_trees: usize,
    /// Number of matrix rows.
    pub n_rows: usize,
    /// Rows drawn per tree.
    pub sample_size: usize,
    /// Candidate features per split.
    pub m_try: usize,
    /// Minimum rows per leaf.
    pub min_leaf_size: usize,
    /// Name of the target feature.
    pub target: String,
    /// Per-feature importance, indexed by matrix column.
    /// Empty when importance tracking was disabled.
    pub importance: Vec<RunningMean>,
}

impl TrainingReport {
    /// Write the importance table for `matrix`, one line per feature.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::ImportanceUnavailable`] if importance tracking
    /// was disabled for this run, or [`ForestError::WriteImportance`] if the
    /// table cannot be written.
    pub fn write_importance<W: Write>(
        &self,
        writer: W,
        matrix: &FeatureMatrix,
    ) -> Result<(), ForestError> {
        write_importance(writer, matrix, &self.importance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForestConfig;
    use crate::matrix::FeatureColumn;
    use crate::serialize::{ForestFormat, ForestWriter};

    fn matrix() -> FeatureMatrix {
        FeatureMatrix::new(vec![
            FeatureColumn::numeric("x", (0..8).map(|i| Some(f64::from(i))).collect()).unwrap(),
            FeatureColumn::categorical(
                "label",
                ["a", "a", "a", "a", "b", "b", "b", "b"].into_iter().map(Some).collect(),
            ),
        ])
        .unwrap()
    }

    fn report(track_importance: bool) -> TrainingReport {
        let config = ForestConfig::new("label", 2)
            .unwrap()
            .with_min_leaf_size(Some(2))
            .with_track_importance(track_importance);
        let mut writer = ForestWriter::new(Vec::new(), ForestFormat::Binary);
        config.train(&matrix(), &mut writer).unwrap()
    }

    #[test]
    fn untracked_run_refuses_importance_table() {
        let mut buf = Vec::new();
        let err = report(false).write_importance(&mut buf, &matrix()).unwrap_err();
        assert!(matches!(err, ForestError::ImportanceUnavailable { expected: 2, got: 0 }));
        assert!(buf.is_empty());
    }

    #[test]
    fn tracked_run_writes_one_line_per_feature() {
        let mut buf = Vec::new();
        report(true).write_importance(&mut buf, &matrix()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let names: Vec<&str> = text.lines().map(|line| line.split('\t').next().unwrap()).collect();
        assert_eq!(names, vec!["x", "label"]);
    }
}
