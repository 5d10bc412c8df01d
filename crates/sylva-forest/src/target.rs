//! Split objectives: impurity measures and leaf predictions.
//!
//! A [`Target`] wraps the label column and one objective, chosen once per
//! forest. Split search never touches labels directly; it accumulates
//! [`Tally`] values and asks the target for their impurity.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

use tracing::warn;

use crate::error::ForestError;
use crate::matrix::FeatureColumn;
use crate::node::Prediction;

/// Objective selector for a forest.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TargetKind {
    /// Variance for continuous targets, Gini for categorical ones.
    #[default]
    Plain,
    /// Absolute deviation from the median; continuous targets only.
    L1,
    /// Shannon entropy; categorical targets only.
    Entropy,
    /// Expected misclassification cost; categorical targets only.
    Regret(CostMap),
}

impl TargetKind {
    fn label(&self) -> &'static str {
        match self {
            TargetKind::Plain => "plain",
            TargetKind::L1 => "l1",
            TargetKind::Entropy => "entropy",
            TargetKind::Regret(_) => "cost-weighted",
        }
    }
}

/// Misclassification cost per category name. Unnamed categories cost 1.0.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(transparent)]
pub struct CostMap(BTreeMap<String, f64>);

impl CostMap {
    /// Create an empty cost map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object such as `{"yes": 5.0, "no": 1.0}`.
    ///
    /// # Errors
    ///
    /// Returns [`ForestError::InvalidCostMap`] if the input is not a JSON
    /// object of numbers.
    pub fn from_json(json: &str) -> Result<Self, ForestError> {
        serde_json::from_str(json).map_err(|source| ForestError::InvalidCostMap { source })
    }

    /// Set the cost of one category.
    #[must_use]
    pub fn with_cost(mut self, category: impl Into<String>, cost: f64) -> Self {
        self.0.insert(category.into(), cost);
        self
    }

    /// Return the cost configured for a category, if any.
    #[must_use]
    pub fn get(&self, category: &str) -> Option<f64> {
        self.0.get(category).copied()
    }

    /// Iterate over `(category, cost)` entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, &v)| (k.as_str(), v))
    }
}

#[derive(Debug, Clone)]
enum Objective {
    Variance,
    Gini,
    L1,
    Entropy,
    Regret(Vec<f64>),
}

#[derive(Debug, Clone)]
enum Labels {
    Numeric(Vec<f64>),
    Categorical { codes: Vec<u32>, n_levels: usize },
}

/// Running statistics of the target over a group of rows.
#[derive(Debug, Clone)]
pub(crate) enum Tally {
    Counts { counts: Vec<usize>, n: usize },
    Moments { n: usize, sum: f64, sum_sq: f64 },
    Values(MedianTally),
}

impl Tally {
    pub(crate) fn len(&self) -> usize {
        match self {
            Tally::Counts { n, .. } | Tally::Moments { n, .. } => *n,
            Tally::Values(values) => values.len(),
        }
    }

    /// Fold another tally of the same kind into this one.
    pub(crate) fn absorb(&mut self, other: &Tally) {
        match (self, other) {
            (Tally::Counts { counts, n }, Tally::Counts { counts: oc, n: on }) => {
                for (c, o) in counts.iter_mut().zip(oc) {
                    *c += o;
                }
                *n += on;
            }
            (
                Tally::Moments { n, sum, sum_sq },
                Tally::Moments {
                    n: on,
                    sum: os,
                    sum_sq: oq,
                },
            ) => {
                *n += on;
                *sum += os;
                *sum_sq += oq;
            }
            (Tally::Values(values), Tally::Values(ov)) => {
                for y in ov.iter() {
                    values.push(y);
                }
            }
            _ => unreachable!("tallies of one target share a kind"),
        }
    }
}

/// Total order over finite label values, for heap storage.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ordered(f64);

impl Eq for Ordered {}

impl PartialOrd for Ordered {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ordered {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Running median and mean absolute deviation of a growing multiset.
///
/// `lower` is a max-heap over the smaller half and holds the extra value
/// when the count is odd; `upper` is a min-heap over the rest. Every value
/// in `lower` is at most every value in `upper`.
#[derive(Debug, Clone, Default)]
pub(crate) struct MedianTally {
    lower: BinaryHeap<Ordered>,
    upper: BinaryHeap<Reverse<Ordered>>,
    lower_sum: f64,
    upper_sum: f64,
}

impl MedianTally {
    pub(crate) fn len(&self) -> usize {
        self.lower.len() + self.upper.len()
    }

    pub(crate) fn push(&mut self, y: f64) {
        match self.lower.peek() {
            Some(&Ordered(top)) if y > top => {
                self.upper.push(Reverse(Ordered(y)));
                self.upper_sum += y;
            }
            _ => {
                self.lower.push(Ordered(y));
                self.lower_sum += y;
            }
        }
        if self.lower.len() > self.upper.len() + 1
            && let Some(Ordered(v)) = self.lower.pop()
        {
            self.lower_sum -= v;
            self.upper.push(Reverse(Ordered(v)));
            self.upper_sum += v;
        } else if self.upper.len() > self.lower.len()
            && let Some(Reverse(Ordered(v))) = self.upper.pop()
        {
            self.upper_sum -= v;
            self.lower.push(Ordered(v));
            self.lower_sum += v;
        }
    }

    /// Median; the mean of the two middle values for even counts, 0 when empty.
    pub(crate) fn median(&self) -> f64 {
        match (self.lower.peek(), self.upper.peek()) {
            (None, _) => 0.0,
            (Some(&Ordered(lo)), Some(&Reverse(Ordered(hi))))
                if self.lower.len() == self.upper.len() =>
            {
                (lo + hi) / 2.0
            }
            (Some(&Ordered(lo)), _) => lo,
        }
    }

    /// Mean absolute deviation from the median.
    ///
    /// Upper values sit above the median and lower values below it, so the
    /// deviation sum is `upper_sum - lower_sum`, plus the median itself when
    /// `lower` holds the odd middle value.
    pub(crate) fn mean_deviation(&self) -> f64 {
        let n = self.len();
        if n == 0 {
            return 0.0;
        }
        let mut total = self.upper_sum - self.lower_sum;
        if self.lower.len() > self.upper.len() {
            total += self.median();
        }
        total.max(0.0) / n as f64
    }

    fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.lower
            .iter()
            .map(|o| o.0)
            .chain(self.upper.iter().map(|r| r.0.0))
    }
}

/// The label column paired with its objective.
///
/// Every row handed to a target must have a present label; the forest
/// bootstraps only from labelled rows.
#[derive(Debug, Clone)]
pub struct Target<'a> {
    column: &'a FeatureColumn,
    labels: Labels,
    objective: Objective,
}

impl<'a> Target<'a> {
    /// Pair a label column with an objective.
    ///
    /// Cost entries for categories the column does not have are ignored
    /// with a warning.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`ForestError::TargetKindMismatch`] | L1 on a categorical column, entropy or cost-weighted on a continuous one |
    /// | [`ForestError::InvalidCost`] | a cost is negative or non-finite |
    pub fn new(column: &'a FeatureColumn, kind: &TargetKind) -> Result<Self, ForestError> {
        let numeric = column.is_numeric();
        let mismatch = |expected| ForestError::TargetKindMismatch {
            target: column.name().to_string(),
            variant: kind.label(),
            expected,
        };
        let objective = match kind {
            TargetKind::Plain if numeric => Objective::Variance,
            TargetKind::Plain => Objective::Gini,
            TargetKind::L1 if numeric => Objective::L1,
            TargetKind::L1 => return Err(mismatch("continuous")),
            TargetKind::Entropy if numeric => return Err(mismatch("categorical")),
            TargetKind::Entropy => Objective::Entropy,
            TargetKind::Regret(_) if numeric => return Err(mismatch("categorical")),
            TargetKind::Regret(costs) => Objective::Regret(resolve_costs(column, costs)?),
        };

        let labels = if numeric {
            Labels::Numeric(
                (0..column.len())
                    .map(|row| column.numeric_at(row).unwrap_or(0.0))
                    .collect(),
            )
        } else {
            Labels::Categorical {
                codes: (0..column.len())
                    .map(|row| column.level_at(row).unwrap_or(0))
                    .collect(),
                n_levels: column.cardinality(),
            }
        };

        Ok(Self {
            column,
            labels,
            objective,
        })
    }

    /// Return the wrapped label column.
    #[must_use]
    pub fn column(&self) -> &'a FeatureColumn {
        self.column
    }

    /// Return `true` for categorical targets.
    #[must_use]
    pub fn is_classification(&self) -> bool {
        matches!(self.labels, Labels::Categorical { .. })
    }

    /// Impurity of a set of rows.
    #[must_use]
    pub fn impurity(&self, rows: &[usize]) -> f64 {
        self.impurity_of(&self.tally_of(rows))
    }

    /// Row-weighted impurity of a partition: `Σ n_g I_g / Σ n_g`.
    #[must_use]
    pub fn split_impurity(&self, groups: &[&[usize]]) -> f64 {
        let tallies: Vec<Tally> = groups.iter().map(|g| self.tally_of(g)).collect();
        let refs: Vec<&Tally> = tallies.iter().collect();
        self.weighted_impurity(&refs)
    }

    /// Return `true` when every row has the same label.
    #[must_use]
    pub fn is_pure(&self, rows: &[usize]) -> bool {
        let Some((&first, rest)) = rows.split_first() else {
            return true;
        };
        match &self.labels {
            Labels::Numeric(ys) => rest.iter().all(|&r| ys[r] == ys[first]),
            Labels::Categorical { codes, .. } => rest.iter().all(|&r| codes[r] == codes[first]),
        }
    }

    /// Leaf prediction for a set of rows.
    #[must_use]
    pub fn leaf_value(&self, rows: &[usize]) -> Prediction {
        match self.tally_of(rows) {
            Tally::Counts { counts, .. } => {
                let class = self.winning_class(&counts);
                Prediction::Class { class, counts }
            }
            Tally::Moments { n, sum, .. } => {
                Prediction::Numeric(if n == 0 { 0.0 } else { sum / n as f64 })
            }
            Tally::Values(values) => Prediction::Numeric(values.median()),
        }
    }

    pub(crate) fn empty_tally(&self) -> Tally {
        match (&self.labels, &self.objective) {
            (Labels::Categorical { n_levels, .. }, _) => Tally::Counts {
                counts: vec![0; *n_levels],
                n: 0,
            },
            (Labels::Numeric(_), Objective::L1) => Tally::Values(MedianTally::default()),
            (Labels::Numeric(_), _) => Tally::Moments {
                n: 0,
                sum: 0.0,
                sum_sq: 0.0,
            },
        }
    }

    pub(crate) fn tally_of(&self, rows: &[usize]) -> Tally {
        let mut tally = self.empty_tally();
        for &row in rows {
            self.push(&mut tally, row);
        }
        tally
    }

    pub(crate) fn push(&self, tally: &mut Tally, row: usize) {
        match (tally, &self.labels) {
            (Tally::Counts { counts, n }, Labels::Categorical { codes, .. }) => {
                counts[codes[row] as usize] += 1;
                *n += 1;
            }
            (Tally::Moments { n, sum, sum_sq }, Labels::Numeric(ys)) => {
                let y = ys[row];
                *n += 1;
                *sum += y;
                *sum_sq += y * y;
            }
            (Tally::Values(values), Labels::Numeric(ys)) => values.push(ys[row]),
            _ => unreachable!("tally kind follows the target"),
        }
    }

    pub(crate) fn impurity_of(&self, tally: &Tally) -> f64 {
        if tally.len() == 0 {
            return 0.0;
        }
        match (tally, &self.objective) {
            (Tally::Counts { counts, n }, Objective::Gini) => {
                let n = *n as f64;
                1.0 - counts
                    .iter()
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p
                    })
                    .sum::<f64>()
            }
            (Tally::Counts { counts, n }, Objective::Entropy) => {
                let n = *n as f64;
                -counts
                    .iter()
                    .filter(|&&c| c > 0)
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p.ln()
                    })
                    .sum::<f64>()
            }
            (Tally::Counts { counts, n }, Objective::Regret(costs)) => {
                let winner = self.winning_class(counts) as usize;
                let regret: f64 = counts
                    .iter()
                    .zip(costs)
                    .enumerate()
                    .filter(|&(level, _)| level != winner)
                    .map(|(_, (&c, &cost))| c as f64 * cost)
                    .sum();
                regret / *n as f64
            }
            (Tally::Moments { n, sum, sum_sq }, Objective::Variance) => {
                let n = *n as f64;
                let mean = sum / n;
                (sum_sq / n - mean * mean).max(0.0)
            }
            (Tally::Values(values), Objective::L1) => values.mean_deviation(),
            _ => unreachable!("tally kind follows the objective"),
        }
    }

    pub(crate) fn weighted_impurity(&self, groups: &[&Tally]) -> f64 {
        let total: usize = groups.iter().map(|t| t.len()).sum();
        if total == 0 {
            return 0.0;
        }
        groups
            .iter()
            .map(|t| t.len() as f64 * self.impurity_of(t))
            .sum::<f64>()
            / total as f64
    }

    /// Level with the largest count (cost-weighted for regret), lowest code on ties.
    fn winning_class(&self, counts: &[usize]) -> u32 {
        let weight = |level: usize| match &self.objective {
            Objective::Regret(costs) => counts[level] as f64 * costs[level],
            _ => counts[level] as f64,
        };
        let mut best = 0usize;
        for level in 1..counts.len() {
            if weight(level) > weight(best) {
                best = level;
            }
        }
        best as u32
    }
}

fn resolve_costs(column: &FeatureColumn, costs: &CostMap) -> Result<Vec<f64>, ForestError> {
    let mut resolved = vec![1.0; column.cardinality()];
    for (category, cost) in costs.iter() {
        if !cost.is_finite() || cost < 0.0 {
            return Err(ForestError::InvalidCost {
                category: category.to_string(),
                cost,
            });
        }
        match column.level_code(category) {
            Some(code) => resolved[code as usize] = cost,
            None => warn!(
                category,
                target = column.name(),
                "cost given for unknown category, ignoring"
            ),
        }
    }
    Ok(resolved)
}
