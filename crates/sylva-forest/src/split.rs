use rand::Rng;

use crate::matrix::FeatureColumn;
use crate::node::{FeatureIndex, LevelSet, SplitRule};
use crate::target::{Tally, Target};

/// Categorical features with at most this many present levels are searched exhaustively.
pub const MAX_EXHAUSTIVE_LEVELS: usize = 5;

/// Number of random bipartitions tried by [`CategoricalSearch::Random`].
pub const RANDOM_BIPARTITIONS: usize = 128;

/// Upper bound on improvement passes of [`CategoricalSearch::Iterative`].
const MAX_ITERATIVE_PASSES: usize = 64;

/// A split must beat the parent impurity by this relative margin to count.
const MIN_RELATIVE_DECREASE: f64 = 1e-10;

/// Strategy for categorical features with many levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CategoricalSearch {
    /// Greedy local search moving one level at a time between sides.
    #[default]
    Iterative,
    /// Best of [`RANDOM_BIPARTITIONS`] random bipartitions.
    Random,
}

/// Knobs shared by every split search in a forest.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SplitParams {
    pub(crate) min_leaf_size: usize,
    pub(crate) split_missing: bool,
    pub(crate) search: CategoricalSearch,
}

/// Best split found for one feature.
#[derive(Debug, Clone)]
pub(crate) struct SplitCandidate {
    pub(crate) feature: FeatureIndex,
    pub(crate) rule: SplitRule,
    pub(crate) impurity_decrease: f64,
}

/// Side of a split a row is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Branch {
    Left,
    Right,
    Missing,
}

/// Route one row of `column` through `rule`.
#[inline]
pub(crate) fn route(column: &FeatureColumn, rule: &SplitRule, row: usize) -> Branch {
    let goes_left = match rule {
        SplitRule::Threshold(threshold) => column.numeric_at(row).map(|v| v <= *threshold),
        SplitRule::Levels(levels) => column.level_at(row).map(|l| levels.contains(l)),
    };
    match goes_left {
        Some(true) => Branch::Left,
        Some(false) => Branch::Right,
        None => Branch::Missing,
    }
}

/// Find the best split of `rows` on one feature.
///
/// Returns `None` when the feature is constant on the present rows, when no
/// split leaves `min_leaf_size` rows on each side, or when no split lowers
/// the impurity.
pub(crate) fn find_split(
    column: &FeatureColumn,
    feature: FeatureIndex,
    target: &Target<'_>,
    rows: &[usize],
    params: &SplitParams,
    rng: &mut impl Rng,
) -> Option<SplitCandidate> {
    if column.is_numeric() {
        numeric_split(column, feature, target, rows, params)
    } else {
        categorical_split(column, feature, target, rows, params, rng)
    }
}

fn improves(decrease: f64, parent: f64, best: Option<f64>) -> bool {
    decrease > parent * MIN_RELATIVE_DECREASE && best.is_none_or(|b| decrease > b)
}

fn missing_group_allowed(missing: &Tally, params: &SplitParams) -> bool {
    !params.split_missing || missing.len() == 0 || missing.len() >= params.min_leaf_size
}

/// Impurity of every row taking part in the split.
fn parent_impurity(target: &Target<'_>, present: &Tally, missing: &Tally, params: &SplitParams) -> f64 {
    if params.split_missing {
        let mut all = present.clone();
        all.absorb(missing);
        target.impurity_of(&all)
    } else {
        target.impurity_of(present)
    }
}

fn partition_impurity(
    target: &Target<'_>,
    left: &Tally,
    right: &Tally,
    missing: &Tally,
    params: &SplitParams,
) -> f64 {
    if params.split_missing {
        target.weighted_impurity(&[left, right, missing])
    } else {
        target.weighted_impurity(&[left, right])
    }
}

/// Row-weighted mean impurity of `(rows, impurity)` parts.
fn weighted_parts(parts: &[(usize, f64)]) -> f64 {
    let total: usize = parts.iter().map(|&(n, _)| n).sum();
    if total == 0 {
        return 0.0;
    }
    parts.iter().map(|&(n, impurity)| n as f64 * impurity).sum::<f64>() / total as f64
}

/// Midpoint between two adjacent distinct values that still separates them.
fn threshold_between(lower: f64, upper: f64) -> f64 {
    let mid = lower / 2.0 + upper / 2.0;
    if mid >= lower && mid < upper { mid } else { lower }
}

fn numeric_split(
    column: &FeatureColumn,
    feature: FeatureIndex,
    target: &Target<'_>,
    rows: &[usize],
    params: &SplitParams,
) -> Option<SplitCandidate> {
    let mut present: Vec<(f64, usize)> = Vec::with_capacity(rows.len());
    let mut missing = target.empty_tally();
    for &row in rows {
        match column.numeric_at(row) {
            Some(v) => present.push((v, row)),
            None => target.push(&mut missing, row),
        }
    }
    if present.len() < 2 || !missing_group_allowed(&missing, params) {
        return None;
    }
    present.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    // Right side of every cut, grown from the top: `right_parts[i]` covers
    // `present[i + 1..]`.
    let n = present.len();
    let mut right = target.empty_tally();
    let mut right_parts = vec![(0, 0.0); n];
    for i in (1..n).rev() {
        target.push(&mut right, present[i].1);
        right_parts[i - 1] = (right.len(), target.impurity_of(&right));
    }
    target.push(&mut right, present[0].1);
    let parent = parent_impurity(target, &right, &missing, params);
    let missing_part = (missing.len(), target.impurity_of(&missing));
    let n_parts = if params.split_missing { 3 } else { 2 };

    // Left side grows from empty in the same order.
    let mut left = target.empty_tally();
    let mut best: Option<(f64, f64)> = None;
    for i in 0..(n - 1) {
        let (value, row) = present[i];
        target.push(&mut left, row);

        let next = present[i + 1].0;
        if value == next {
            continue;
        }
        let n_left = i + 1;
        if n_left < params.min_leaf_size || n - n_left < params.min_leaf_size {
            continue;
        }

        let parts = [
            (n_left, target.impurity_of(&left)),
            right_parts[i],
            missing_part,
        ];
        let decrease = parent - weighted_parts(&parts[..n_parts]);
        if improves(decrease, parent, best.map(|b| b.0)) {
            best = Some((decrease, threshold_between(value, next)));
        }
    }

    best.map(|(impurity_decrease, threshold)| SplitCandidate {
        feature,
        rule: SplitRule::Threshold(threshold),
        impurity_decrease,
    })
}

/// Per-level tallies of a categorical feature at one node.
struct LevelTallies<'t, 'a> {
    target: &'t Target<'a>,
    /// Level codes present among the rows, ascending.
    present: Vec<u32>,
    /// Tally per entry of `present`.
    tallies: Vec<Tally>,
    missing: Tally,
    parent: f64,
    params: SplitParams,
}

impl LevelTallies<'_, '_> {
    /// Impurity decrease of sending `present[i]` left wherever `mask[i]` is set.
    fn evaluate(&self, mask: &[bool]) -> Option<f64> {
        let mut left = self.target.empty_tally();
        let mut right = self.target.empty_tally();
        for (tally, &goes_left) in self.tallies.iter().zip(mask) {
            if goes_left {
                left.absorb(tally);
            } else {
                right.absorb(tally);
            }
        }
        let leaf = self.params.min_leaf_size.max(1);
        if left.len() < leaf || right.len() < leaf {
            return None;
        }
        Some(self.parent - partition_impurity(self.target, &left, &right, &self.missing, &self.params))
    }

    fn exhaustive(&self) -> Option<(f64, Vec<bool>)> {
        let k = self.present.len();
        let mut best: Option<(f64, Vec<bool>)> = None;
        // The last present level stays right, so each bipartition is visited once.
        for bits in 1u32..(1 << (k - 1)) {
            let mask: Vec<bool> = (0..k).map(|i| (bits >> i) & 1 == 1).collect();
            self.consider(mask, &mut best);
        }
        best
    }

    fn iterative(&self) -> Option<(f64, Vec<bool>)> {
        let k = self.present.len();
        let mut best: Option<(f64, Vec<bool>)> = None;
        for i in 0..k {
            let mut mask = vec![false; k];
            mask[i] = true;
            self.consider(mask, &mut best);
        }
        let (mut current, mut mask) = best?;

        for _ in 0..MAX_ITERATIVE_PASSES {
            let mut moved = false;
            for i in 0..k {
                mask[i] = !mask[i];
                match self.evaluate(&mask) {
                    Some(decrease) if decrease > current => {
                        current = decrease;
                        moved = true;
                    }
                    _ => mask[i] = !mask[i],
                }
            }
            if !moved {
                break;
            }
        }
        Some((current, mask))
    }

    fn random(&self, rng: &mut impl Rng) -> Option<(f64, Vec<bool>)> {
        let k = self.present.len();
        let mut best: Option<(f64, Vec<bool>)> = None;
        for _ in 0..RANDOM_BIPARTITIONS {
            let mask: Vec<bool> = (0..k).map(|_| rng.r#gen::<bool>()).collect();
            self.consider(mask, &mut best);
        }
        best
    }

    fn consider(&self, mask: Vec<bool>, best: &mut Option<(f64, Vec<bool>)>) {
        if let Some(decrease) = self.evaluate(&mask)
            && improves(decrease, self.parent, best.as_ref().map(|b| b.0))
        {
            *best = Some((decrease, mask));
        }
    }
}

fn categorical_split(
    column: &FeatureColumn,
    feature: FeatureIndex,
    target: &Target<'_>,
    rows: &[usize],
    params: &SplitParams,
    rng: &mut impl Rng,
) -> Option<SplitCandidate> {
    let mut by_level: Vec<Tally> = vec![target.empty_tally(); column.cardinality()];
    let mut missing = target.empty_tally();
    for &row in rows {
        match column.level_at(row) {
            Some(level) => target.push(&mut by_level[level as usize], row),
            None => target.push(&mut missing, row),
        }
    }
    if !missing_group_allowed(&missing, params) {
        return None;
    }

    let mut present = Vec::new();
    let mut tallies = Vec::new();
    let mut all = target.empty_tally();
    for (level, tally) in by_level.into_iter().enumerate() {
        if tally.len() > 0 {
            all.absorb(&tally);
            present.push(level as u32);
            tallies.push(tally);
        }
    }
    if present.len() < 2 {
        return None;
    }

    let parent = parent_impurity(target, &all, &missing, params);
    let levels = LevelTallies {
        target,
        present,
        tallies,
        missing,
        parent,
        params: *params,
    };

    let best = if levels.present.len() <= MAX_EXHAUSTIVE_LEVELS {
        levels.exhaustive()
    } else {
        match params.search {
            CategoricalSearch::Iterative => levels.iterative(),
            CategoricalSearch::Random => levels.random(rng),
        }
    };

    best.map(|(impurity_decrease, mask)| SplitCandidate {
        feature,
        rule: SplitRule::Levels(
            levels
                .present
                .iter()
                .zip(&mask)
                .filter(|&(_, &left)| left)
                .map(|(&level, _)| level)
                .collect::<LevelSet>(),
        ),
        impurity_decrease,
    })
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;
    use crate::target::TargetKind;

    fn params(min_leaf_size: usize, split_missing: bool) -> SplitParams {
        SplitParams {
            min_leaf_size,
            split_missing,
            search: CategoricalSearch::Iterative,
        }
    }

    fn labels(names: &[&str]) -> FeatureColumn {
        FeatureColumn::categorical("y", names.iter().map(|l| Some(*l)).collect())
    }

    fn numeric(values: &[Option<f64>]) -> FeatureColumn {
        FeatureColumn::numeric("x", values.to_vec()).unwrap()
    }

    #[test]
    fn separable_numeric_threshold() {
        let y = labels(&["a", "a", "a", "b", "b", "b"]);
        let x = numeric(&[Some(1.0), Some(2.0), Some(3.0), Some(10.0), Some(11.0), Some(12.0)]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let rows: Vec<usize> = (0..6).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(1, false), &mut rng)
            .expect("should find a split");
        assert_eq!(split.rule, SplitRule::Threshold(6.5));
        assert!((split.impurity_decrease - 0.5).abs() < 1e-12);
    }

    #[test]
    fn constant_feature_has_no_split() {
        let y = labels(&["a", "a", "b", "b"]);
        let x = numeric(&[Some(5.0); 4]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        assert!(find_split(&x, FeatureIndex::new(0), &target, &[0, 1, 2, 3], &params(1, false), &mut rng).is_none());
    }

    #[test]
    fn min_leaf_size_enforced() {
        let y = labels(&["a", "b"]);
        let x = numeric(&[Some(1.0), Some(10.0)]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        assert!(find_split(&x, FeatureIndex::new(0), &target, &[0, 1], &params(2, false), &mut rng).is_none());
    }

    #[test]
    fn duplicate_rows_never_straddle_threshold() {
        let y = labels(&["a", "b", "a", "b"]);
        let x = numeric(&[Some(1.0), Some(2.0), Some(1.0), Some(2.0)]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let rows = [0, 0, 2, 1, 3, 3];
        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(1, false), &mut rng).unwrap();
        assert_eq!(split.rule, SplitRule::Threshold(1.5));
    }

    #[test]
    fn filtered_missing_rows_do_not_count() {
        let y = labels(&["a", "a", "b", "b", "b"]);
        let x = numeric(&[Some(1.0), Some(2.0), Some(8.0), Some(9.0), None]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let rows: Vec<usize> = (0..5).collect();
        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(1, false), &mut rng).unwrap();
        // Parent impurity over the four present rows is 0.5; the split is pure.
        assert!((split.impurity_decrease - 0.5).abs() < 1e-12);
    }

    #[test]
    fn missing_group_counts_when_split() {
        let y = labels(&["a", "a", "b", "b", "b"]);
        let x = numeric(&[Some(1.0), Some(2.0), Some(8.0), Some(9.0), None]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let rows: Vec<usize> = (0..5).collect();
        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(1, true), &mut rng).unwrap();
        // Parent over all five rows: 1 - (0.4² + 0.6²) = 0.48, every group pure.
        assert!((split.impurity_decrease - 0.48).abs() < 1e-12);
    }

    #[test]
    fn small_missing_group_blocks_split() {
        let y = labels(&["a", "a", "b", "b", "b"]);
        let x = numeric(&[Some(1.0), Some(2.0), Some(8.0), Some(9.0), None]);
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let rows: Vec<usize> = (0..5).collect();
        assert!(find_split(&x, FeatureIndex::new(0), &target, &rows, &params(2, true), &mut rng).is_none());
    }

    #[test]
    fn l1_scan_matches_every_cut_scored_directly() {
        let ys = [1.0, 2.0, 1.5, 1.0, 2.0, 9.0, 8.0, 10.0, 9.5, 8.5, 30.0, 31.0, 4.0, 20.0];
        let y = FeatureColumn::numeric("y", ys.iter().map(|&v| Some(v)).collect()).unwrap();
        let mut xs: Vec<Option<f64>> = (0..12).map(|i| Some(f64::from(i))).collect();
        xs.extend([None, None]);
        let x = numeric(&xs);
        let target = Target::new(&y, &TargetKind::L1).unwrap();
        let rows: Vec<usize> = (0..14).collect();
        let present: Vec<usize> = (0..12).collect();
        let missing = [12, 13];

        for split_missing in [false, true] {
            let parent = if split_missing {
                target.impurity(&rows)
            } else {
                target.impurity(&present)
            };
            let mut expected: Option<(f64, f64)> = None;
            for cut in 2..=10 {
                let (left, right) = present.split_at(cut);
                let children = if split_missing {
                    target.split_impurity(&[left, right, &missing[..]])
                } else {
                    target.split_impurity(&[left, right])
                };
                let decrease = parent - children;
                if expected.is_none_or(|(best, _)| decrease > best) {
                    expected = Some((decrease, cut as f64 - 0.5));
                }
            }
            let (decrease, threshold) = expected.unwrap();

            let mut rng = ChaCha8Rng::seed_from_u64(0);
            let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(2, split_missing), &mut rng)
                .unwrap();
            assert_eq!(split.rule, SplitRule::Threshold(threshold), "split_missing {split_missing}");
            assert!((split.impurity_decrease - decrease).abs() < 1e-12);
        }
    }

    #[test]
    fn exhaustive_categorical_grouping() {
        // Levels p and r predict "a", q and s predict "b".
        let y = labels(&["a", "b", "a", "b", "a", "b", "a", "b"]);
        let x = FeatureColumn::categorical(
            "x",
            ["p", "q", "r", "s", "p", "q", "r", "s"].into_iter().map(Some).collect(),
        );
        let target = Target::new(&y, &TargetKind::Entropy).unwrap();
        let rows: Vec<usize> = (0..8).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(1, false), &mut rng).unwrap();
        let SplitRule::Levels(left) = split.rule else {
            panic!("expected a level split");
        };
        let left: Vec<u32> = left.iter().collect();
        assert!(left == vec![0, 2] || left == vec![1, 3], "left = {left:?}");
        assert!((split.impurity_decrease - 2.0_f64.ln()).abs() < 1e-12);
    }

    fn many_level_fixture() -> (FeatureColumn, FeatureColumn) {
        let levels = ["l0", "l1", "l2", "l3", "l4", "l5", "l6", "l7"];
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for round in 0..3 {
            for (i, level) in levels.iter().enumerate() {
                xs.push(Some(*level));
                let class = if i % 3 == 0 { "a" } else { "b" };
                ys.push(Some(if round == 0 && i == 7 { "b" } else { class }));
            }
        }
        (
            FeatureColumn::categorical("x", xs),
            FeatureColumn::categorical("y", ys),
        )
    }

    #[test]
    fn iterative_search_finds_perfect_grouping() {
        let (x, y) = many_level_fixture();
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let rows: Vec<usize> = (0..x.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &params(1, false), &mut rng).unwrap();
        let parent = target.impurity(&rows);
        assert!((split.impurity_decrease - parent).abs() < 1e-12);
    }

    #[test]
    fn random_search_finds_a_valid_split() {
        let (x, y) = many_level_fixture();
        let target = Target::new(&y, &TargetKind::Plain).unwrap();
        let rows: Vec<usize> = (0..x.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let p = SplitParams {
            search: CategoricalSearch::Random,
            ..params(1, false)
        };
        let split = find_split(&x, FeatureIndex::new(0), &target, &rows, &p, &mut rng).unwrap();
        assert!(split.impurity_decrease > 0.0);
        let SplitRule::Levels(left) = split.rule else {
            panic!("expected a level split");
        };
        assert!(!left.is_empty() && left.len() < 8);
    }

    #[test]
    fn routing() {
        let x = numeric(&[Some(1.0), Some(5.0), None]);
        let rule = SplitRule::Threshold(2.0);
        assert_eq!(route(&x, &rule, 0), Branch::Left);
        assert_eq!(route(&x, &rule, 1), Branch::Right);
        assert_eq!(route(&x, &rule, 2), Branch::Missing);

        let c = FeatureColumn::categorical("c", vec![Some("u"), Some("v")]);
        let rule = SplitRule::Levels([1].into_iter().collect());
        assert_eq!(route(&c, &rule, 0), Branch::Right);
        assert_eq!(route(&c, &rule, 1), Branch::Left);
    }

    #[test]
    fn threshold_separates_adjacent_values() {
        assert_eq!(threshold_between(1.0, 2.0), 1.5);
        let lower = 1.0_f64;
        let upper = f64::from_bits(lower.to_bits() + 1);
        let t = threshold_between(lower, upper);
        assert!(lower <= t && t < upper);
    }
}
