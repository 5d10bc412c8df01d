//! In-memory columnar feature matrix consumed by forest growing.
//!
//! Parsing matrix files, injecting contrast columns and imputing missing
//! values all happen upstream; by the time a [`FeatureMatrix`] reaches the
//! grower it is immutable.

use std::collections::HashMap;

use crate::error::ForestError;

/// A single present value of a feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatureValue {
    /// A continuous value.
    Numeric(f64),
    /// A categorical level code.
    Level(u32),
}

#[derive(Debug, Clone)]
enum ColumnValues {
    Numeric(Vec<f64>),
    Categorical { codes: Vec<u32>, levels: Vec<String> },
}

/// One feature across all rows of a matrix.
///
/// Missing cells keep a placeholder in the value vector and are flagged in
/// `missing`, so row indices stay aligned across columns.
#[derive(Debug, Clone)]
pub struct FeatureColumn {
    name: String,
    values: ColumnValues,
    missing: Vec<bool>,
}

impl FeatureColumn {
    /// Build a continuous column. `None` marks a missing cell.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::NonFiniteValue`] if a present value is NaN or infinite.
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Result<Self, ForestError> {
        let name = name.into();
        let mut missing = Vec::with_capacity(values.len());
        let mut dense = Vec::with_capacity(values.len());
        for (row, value) in values.into_iter().enumerate() {
            match value {
                Some(v) if !v.is_finite() => {
                    return Err(ForestError::NonFiniteValue { feature: name, row });
                }
                Some(v) => {
                    dense.push(v);
                    missing.push(false);
                }
                None => {
                    dense.push(0.0);
                    missing.push(true);
                }
            }
        }
        Ok(Self {
            name,
            values: ColumnValues::Numeric(dense),
            missing,
        })
    }

    /// Build a categorical column from level names.
    ///
    /// Levels are assigned codes in first-seen order. `None` marks a missing cell.
    pub fn categorical<S: AsRef<str>>(name: impl Into<String>, values: Vec<Option<S>>) -> Self {
        let mut levels: Vec<String> = Vec::new();
        let mut lookup: HashMap<String, u32> = HashMap::new();
        let mut codes = Vec::with_capacity(values.len());
        let mut missing = Vec::with_capacity(values.len());
        for value in values {
            match value {
                Some(level) => {
                    let level = level.as_ref();
                    let code = match lookup.get(level) {
                        Some(&code) => code,
                        None => {
                            let code = levels.len() as u32;
                            levels.push(level.to_string());
                            lookup.insert(level.to_string(), code);
                            code
                        }
                    };
                    codes.push(code);
                    missing.push(false);
                }
                None => {
                    codes.push(0);
                    missing.push(true);
                }
            }
        }
        Self {
            name: name.into(),
            values: ColumnValues::Categorical { codes, levels },
            missing,
        }
    }

    /// Build a categorical column from pre-coded levels.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidLevelCode`] if a code is `>= levels.len()`.
    pub fn categorical_with_levels(
        name: impl Into<String>,
        levels: Vec<String>,
        values: Vec<Option<u32>>,
    ) -> Result<Self, ForestError> {
        let name = name.into();
        let mut codes = Vec::with_capacity(values.len());
        let mut missing = Vec::with_capacity(values.len());
        for (row, value) in values.into_iter().enumerate() {
            match value {
                Some(code) if code as usize >= levels.len() => {
                    return Err(ForestError::InvalidLevelCode {
                        feature: name,
                        row,
                        code,
                        cardinality: levels.len(),
                    });
                }
                Some(code) => {
                    codes.push(code);
                    missing.push(false);
                }
                None => {
                    codes.push(0);
                    missing.push(true);
                }
            }
        }
        Ok(Self {
            name,
            values: ColumnValues::Categorical { codes, levels },
            missing,
        })
    }

    /// Return the column name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.missing.len()
    }

    /// Return `true` if the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// Return 0 for continuous columns, the number of levels otherwise.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        match &self.values {
            ColumnValues::Numeric(_) => 0,
            ColumnValues::Categorical { levels, .. } => levels.len(),
        }
    }

    /// Return `true` for continuous columns.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self.values, ColumnValues::Numeric(_))
    }

    /// Return `true` if `row` has no value.
    #[must_use]
    pub fn is_missing(&self, row: usize) -> bool {
        self.missing[row]
    }

    /// Return the number of missing cells.
    #[must_use]
    pub fn missing_count(&self) -> usize {
        self.missing.iter().filter(|&&m| m).count()
    }

    /// Return the value at `row`, or `None` if it is missing.
    #[must_use]
    pub fn value_at(&self, row: usize) -> Option<FeatureValue> {
        if self.missing[row] {
            return None;
        }
        Some(match &self.values {
            ColumnValues::Numeric(values) => FeatureValue::Numeric(values[row]),
            ColumnValues::Categorical { codes, .. } => FeatureValue::Level(codes[row]),
        })
    }

    /// Return the continuous value at `row`; `None` if missing or categorical.
    #[inline]
    #[must_use]
    pub fn numeric_at(&self, row: usize) -> Option<f64> {
        match &self.values {
            ColumnValues::Numeric(values) if !self.missing[row] => Some(values[row]),
            _ => None,
        }
    }

    /// Return the level code at `row`; `None` if missing or continuous.
    #[inline]
    #[must_use]
    pub fn level_at(&self, row: usize) -> Option<u32> {
        match &self.values {
            ColumnValues::Categorical { codes, .. } if !self.missing[row] => Some(codes[row]),
            _ => None,
        }
    }

    /// Return the level names, empty for continuous columns.
    #[must_use]
    pub fn levels(&self) -> &[String] {
        match &self.values {
            ColumnValues::Numeric(_) => &[],
            ColumnValues::Categorical { levels, .. } => levels,
        }
    }

    /// Return the name of a level code.
    #[must_use]
    pub fn level_name(&self, code: u32) -> Option<&str> {
        self.levels().get(code as usize).map(String::as_str)
    }

    /// Return the code of a level name.
    #[must_use]
    pub fn level_code(&self, name: &str) -> Option<u32> {
        self.levels()
            .iter()
            .position(|level| level == name)
            .map(|code| code as u32)
    }
}

/// An ordered set of equally long feature columns with unique names.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    columns: Vec<FeatureColumn>,
    index: HashMap<String, usize>,
}

impl FeatureMatrix {
    /// Assemble a matrix from columns.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::EmptyMatrix`] | no columns, or zero rows |
    /// | [`ForestError::RaggedColumns`] | columns differ in length |
    /// | [`ForestError::DuplicateFeatureName`] | two columns share a name |
    pub fn new(columns: Vec<FeatureColumn>) -> Result<Self, ForestError> {
        let Some(first) = columns.first() else {
            return Err(ForestError::EmptyMatrix);
        };
        let expected = first.len();
        if expected == 0 {
            return Err(ForestError::EmptyMatrix);
        }
        let mut index = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if column.len() != expected {
                return Err(ForestError::RaggedColumns {
                    name: column.name().to_string(),
                    expected,
                    got: column.len(),
                });
            }
            if index.insert(column.name().to_string(), i).is_some() {
                return Err(ForestError::DuplicateFeatureName {
                    name: column.name().to_string(),
                });
            }
        }
        Ok(Self { columns, index })
    }

    /// Return the number of rows shared by every column.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.columns[0].len()
    }

    /// Return the number of columns, target included.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Resolve a column name to its index.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::TargetNotFound`] if no column has that name.
    pub fn column_by_name(&self, name: &str) -> Result<usize, ForestError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ForestError::TargetNotFound {
                name: name.to_string(),
            })
    }

    /// Return the column at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= column_count()`.
    #[must_use]
    pub fn column(&self, index: usize) -> &FeatureColumn {
        &self.columns[index]
    }

    /// Return all columns in order.
    #[must_use]
    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorical_codes_in_first_seen_order() {
        let col = FeatureColumn::categorical("c", vec![Some("b"), Some("a"), None, Some("b")]);
        assert_eq!(col.cardinality(), 2);
        assert_eq!(col.levels(), &["b".to_string(), "a".to_string()]);
        assert_eq!(col.level_at(0), Some(0));
        assert_eq!(col.level_at(1), Some(1));
        assert_eq!(col.level_at(2), None);
        assert!(col.is_missing(2));
        assert_eq!(col.missing_count(), 1);
        assert_eq!(col.level_code("a"), Some(1));
        assert_eq!(col.level_name(0), Some("b"));
    }

    #[test]
    fn numeric_rejects_nan() {
        let err = FeatureColumn::numeric("x", vec![Some(1.0), Some(f64::NAN)]).unwrap_err();
        assert!(matches!(err, ForestError::NonFiniteValue { row: 1, .. }));
    }

    #[test]
    fn numeric_value_access() {
        let col = FeatureColumn::numeric("x", vec![Some(1.5), None]).unwrap();
        assert_eq!(col.cardinality(), 0);
        assert_eq!(col.value_at(0), Some(FeatureValue::Numeric(1.5)));
        assert_eq!(col.value_at(1), None);
        assert_eq!(col.level_at(0), None);
    }

    #[test]
    fn level_code_out_of_range() {
        let err = FeatureColumn::categorical_with_levels(
            "c",
            vec!["a".into(), "b".into()],
            vec![Some(0), Some(2)],
        )
        .unwrap_err();
        assert!(matches!(err, ForestError::InvalidLevelCode { code: 2, row: 1, .. }));
    }

    #[test]
    fn ragged_columns_rejected() {
        let a = FeatureColumn::numeric("a", vec![Some(1.0), Some(2.0)]).unwrap();
        let b = FeatureColumn::numeric("b", vec![Some(1.0)]).unwrap();
        let err = FeatureMatrix::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, ForestError::RaggedColumns { expected: 2, got: 1, .. }));
    }

    #[test]
    fn duplicate_names_rejected() {
        let a = FeatureColumn::numeric("a", vec![Some(1.0)]).unwrap();
        let b = FeatureColumn::numeric("a", vec![Some(2.0)]).unwrap();
        let err = FeatureMatrix::new(vec![a, b]).unwrap_err();
        assert!(matches!(err, ForestError::DuplicateFeatureName { .. }));
    }

    #[test]
    fn lookup_by_name() {
        let a = FeatureColumn::numeric("a", vec![Some(1.0)]).unwrap();
        let b = FeatureColumn::categorical("b", vec![Some("x")]);
        let fm = FeatureMatrix::new(vec![a, b]).unwrap();
        assert_eq!(fm.column_by_name("b").unwrap(), 1);
        assert_eq!(fm.row_count(), 1);
        assert_eq!(fm.column_count(), 2);
        assert!(matches!(
            fm.column_by_name("nope"),
            Err(ForestError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn empty_matrix_rejected() {
        assert!(matches!(FeatureMatrix::new(vec![]), Err(ForestError::EmptyMatrix)));
    }
}
