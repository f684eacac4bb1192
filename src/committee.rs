//! The committee controller: grows an ensemble of trees over a dataset,
//! one of three ways (bagging, confidence-rated boosting, random
//! forest), all sharing the grower in `tree.rs` and differing only in
//! how examples are reweighted or resampled between trees.

use rand::Rng;

use crate::dataset::Dataset;
use crate::error::ForestError;
use crate::tree::{self, classify_training_walk, GrowConfig, Tree, WalkMode};

const EPS: f32 = f32::EPSILON;

/// Which of the three committee disciplines to grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CommitteeKind {
    Bagging,
    Boosting,
    RandomForest,
}

impl CommitteeKind {
    pub fn code(self) -> i64 {
        match self {
            CommitteeKind::Bagging => 1,
            CommitteeKind::Boosting => 2,
            CommitteeKind::RandomForest => 3,
        }
    }

    pub fn from_code(code: i64) -> Result<Self, ForestError> {
        match code {
            1 => Ok(CommitteeKind::Bagging),
            2 => Ok(CommitteeKind::Boosting),
            3 => Ok(CommitteeKind::RandomForest),
            other => Err(ForestError::UnknownCommittee(other)),
        }
    }

    /// The name used in the model header's `committee: <k> (<Name>)` line.
    pub fn name(self) -> &'static str {
        match self {
            CommitteeKind::Bagging => "Bagging",
            CommitteeKind::Boosting => "Boosting",
            CommitteeKind::RandomForest => "RandomForest",
        }
    }
}

/// The parameters a `learn` run fixes for the whole committee, mirroring
/// the CLI flags in the external-interfaces section: number of trees,
/// max depth, features-per-node, and the relative weight given to
/// negative examples (to correct for class imbalance).
#[derive(Debug, Clone)]
pub struct CommitteeConfig {
    pub kind: CommitteeKind,
    pub ntrees: usize,
    pub maxdepth: usize,
    /// Random-forest feature subsampling factor: `fpn` is
    /// `floor(fpn_factor * sqrt(nfeat))` for random forests, and `nfeat`
    /// (every feature considered) for bagging and boosting.
    pub fpn_factor: f32,
    pub neg_weight: f32,
    pub report_oob: bool,
}

/// A grown ensemble: its discipline, its per-tree models, and the
/// `fpn_factor`/`maxdepth` it was grown with (persisted so the header
/// on disk documents how it was grown).
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ensemble {
    pub kind: CommitteeKind,
    pub maxdepth: usize,
    pub fpn_factor: f32,
    pub nfeat: usize,
    pub trees: Vec<Tree>,
}

impl Ensemble {
    /// Clamps a requested tree count to `[1, trees.len()]`, with `0`
    /// meaning "use every tree grown", per the classifier's `-t` flag.
    fn effective_tree_count(&self, ntrees: usize) -> usize {
        if ntrees == 0 || ntrees > self.trees.len() {
            self.trees.len()
        } else {
            ntrees
        }
    }

    /// Bag/random-forest style prediction over the first `ntrees` trees
    /// (`0` = all): the arithmetic mean of each tree's bag-leaf value.
    pub fn classify_bag_n(&self, example: &[f32], ntrees: usize) -> f32 {
        let n = self.effective_tree_count(ntrees);
        let sum: f32 = self.trees[..n].iter().map(|t| t.classify_bag(example)).sum();
        sum / n as f32
    }

    /// Boosting style prediction over the first `ntrees` trees (`0` =
    /// all): the arithmetic mean of each tree's confidence-rated logit.
    pub fn classify_boost_n(&self, example: &[f32], ntrees: usize) -> f32 {
        let n = self.effective_tree_count(ntrees);
        let sum: f32 = self.trees[..n].iter().map(|t| t.classify_boost(example)).sum();
        sum / n as f32
    }

    /// Dispatches to whichever evaluation mode matches how this ensemble
    /// was grown, using the first `ntrees` trees (`0` = all grown).
    pub fn classify_n(&self, example: &[f32], ntrees: usize) -> f32 {
        match self.kind {
            CommitteeKind::Boosting => self.classify_boost_n(example, ntrees),
            CommitteeKind::Bagging | CommitteeKind::RandomForest => self.classify_bag_n(example, ntrees),
        }
    }

    /// Convenience wrapper over [`Ensemble::classify_n`] using every
    /// grown tree.
    pub fn classify(&self, example: &[f32]) -> f32 {
        self.classify_n(example, 0)
    }
}

/// Out-of-bag error reported for one tree of a bagging or random-forest
/// run: overall error plus the per-class breakdown, all expressed as
/// `1 - accuracy` style percentages.
#[derive(Debug, Clone, Copy)]
pub struct OobReport {
    pub tree_index: usize,
    pub error: f32,
    pub neg_error: f32,
    pub pos_error: f32,
}

/// Grows `config.ntrees` trees over `dataset`, calling `on_oob` after
/// every tree that produces an out-of-bag report (boosting never does;
/// bagging and random forest do whenever `config.report_oob` is set).
pub fn train(
    dataset: &mut Dataset,
    config: &CommitteeConfig,
    rng: &mut impl Rng,
    mut on_oob: impl FnMut(OobReport),
) -> Ensemble {
    let nex = dataset.nex();
    let nfeat = dataset.nfeat();
    let (c0, c1) = dataset.class_counts();
    let wneg = config.neg_weight;
    let w0 = wneg / (wneg * c0 + c1);
    let w1 = 1.0 / (wneg * c0 + c1);
    let class_weight = [w0, w1];

    let mut used = vec![false; nfeat];
    let mut trees = Vec::with_capacity(config.ntrees);

    let fpn = if config.kind == CommitteeKind::RandomForest {
        (config.fpn_factor * (nfeat as f32).sqrt()).floor() as usize
    } else {
        nfeat
    };
    let grow_config = GrowConfig {
        fpn,
        maxdepth: config.maxdepth,
        random_forest: config.kind == CommitteeKind::RandomForest,
    };

    match config.kind {
        CommitteeKind::Boosting => {
            for e in 0..nex {
                dataset.weight[e] = class_weight[dataset.target(e) as usize];
            }
            normalize(&mut dataset.weight);

            for i in 0..config.ntrees {
                let mut valid = vec![1i32; nex];
                let tree = tree::grow(dataset, &mut valid, &mut used, &grow_config, rng);

                let mut pred = vec![0.0f32; nex];
                valid.fill(1);
                classify_training_walk(&tree, dataset, &mut valid, &mut pred, WalkMode::Boosting);

                for e in 0..nex {
                    let sign = 2.0 * dataset.target(e) as f32 - 1.0;
                    dataset.weight[e] *= (-sign * pred[e]).exp();
                }
                normalize(&mut dataset.weight);

                trees.push(tree);
                let _ = i;
            }
        }
        CommitteeKind::Bagging | CommitteeKind::RandomForest => {
            for i in 0..config.ntrees {
                let mut valid = vec![0i32; nex];
                dataset.weight.fill(0.0);
                for _ in 0..nex {
                    let r = rng.gen_range(0..nex);
                    valid[r] = 1;
                    dataset.weight[r] += class_weight[dataset.target(r) as usize];
                }

                let tree = tree::grow(dataset, &mut valid, &mut used, &grow_config, rng);

                if config.report_oob {
                    let mut pred = vec![0.0f32; nex];
                    valid.fill(1);
                    classify_training_walk(&tree, dataset, &mut valid, &mut pred, WalkMode::Oob);
                    tabulate_oob_votes(dataset, &pred);
                    on_oob(compute_oob_report(dataset, &valid, i));
                }

                trees.push(tree);
            }
        }
    }

    Ensemble {
        kind: config.kind,
        maxdepth: config.maxdepth,
        fpn_factor: config.fpn_factor,
        nfeat,
        trees,
    }
}

fn normalize(weight: &mut [f32]) {
    let total: f32 = weight.iter().sum();
    let total = if total <= EPS { EPS } else { total };
    for w in weight.iter_mut() {
        *w /= total;
    }
}

/// Casts this tree's out-of-bag leaf probabilities into `+1`/`-1` votes
/// accumulated on `dataset.oobvotes`, for every example excluded from
/// the tree's bootstrap sample. Out-of-bag is identified by `weight`
/// (examples never drawn into the bootstrap keep a weight of 0), not by
/// `valid`: `valid` is reset to all-1 before the training walk purely to
/// route every example through the tree.
fn tabulate_oob_votes(dataset: &mut Dataset, pred: &[f32]) {
    for e in 0..dataset.nex() {
        if dataset.weight[e] > 0.0 {
            continue;
        }
        dataset.oobvotes[e] += if pred[e] > 0.5 { 1 } else { -1 };
    }
}

/// Confusion-matrix accuracy/specificity/sensitivity over every example
/// that has at least one out-of-bag vote so far, expressed as `1 - rate`
/// percentages the way the external report does.
fn compute_oob_report(dataset: &Dataset, _valid: &[i32], tree_index: usize) -> OobReport {
    let mut true_pos = 0.0f32;
    let mut true_neg = 0.0f32;
    let mut false_pos = 0.0f32;
    let mut false_neg = 0.0f32;

    for e in 0..dataset.nex() {
        let votes = dataset.oobvotes[e];
        if votes == 0 {
            continue;
        }
        let predicted_positive = votes > 0;
        match (dataset.target(e) == 1, predicted_positive) {
            (true, true) => true_pos += 1.0,
            (true, false) => false_neg += 1.0,
            (false, true) => false_pos += 1.0,
            (false, false) => true_neg += 1.0,
        }
    }

    let total = true_pos + true_neg + false_pos + false_neg;
    let accuracy = (true_pos + true_neg) / total;
    let specificity = true_neg / (true_neg + false_pos);
    let sensitivity = true_pos / (true_pos + false_neg);

    OobReport {
        tree_index,
        error: 100.0 * (1.0 - accuracy),
        neg_error: 100.0 * (1.0 - specificity),
        pos_error: 100.0 * (1.0 - sensitivity),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::parse::load;
    use rand::{rngs::StdRng, SeedableRng};

    fn toy_dataset(rng: &mut StdRng) -> Dataset {
        let data = "1 1:1 2:1\n1 1:1 2:0.5\n-1 1:0.1\n-1 1:0.2\n1 1:1\n-1 2:0.05\n";
        load(data.as_bytes(), rng).unwrap()
    }

    #[test]
    fn bagging_grows_requested_tree_count() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut dataset = toy_dataset(&mut rng);
        let config = CommitteeConfig {
            kind: CommitteeKind::Bagging,
            ntrees: 5,
            maxdepth: 4,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: false,
        };
        let ensemble = train(&mut dataset, &config, &mut rng, |_| {});
        assert_eq!(ensemble.trees.len(), 5);
        let score = ensemble.classify(&[1.0, 1.0]);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn random_forest_reports_oob_for_every_tree() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut dataset = toy_dataset(&mut rng);
        let config = CommitteeConfig {
            kind: CommitteeKind::RandomForest,
            ntrees: 4,
            maxdepth: 4,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: true,
        };
        let mut reports = Vec::new();
        let ensemble = train(&mut dataset, &config, &mut rng, |r| reports.push(r));
        assert_eq!(ensemble.trees.len(), 4);
        assert_eq!(reports.len(), 4);
        for r in &reports {
            assert!(r.error >= 0.0 && r.error <= 100.0);
        }
    }

    #[test]
    fn boosting_does_not_invoke_oob_callback() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut dataset = toy_dataset(&mut rng);
        let config = CommitteeConfig {
            kind: CommitteeKind::Boosting,
            ntrees: 3,
            maxdepth: 4,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: true,
        };
        let mut calls = 0;
        let ensemble = train(&mut dataset, &config, &mut rng, |_| calls += 1);
        assert_eq!(ensemble.trees.len(), 3);
        assert_eq!(calls, 0);
        let score = ensemble.classify(&[1.0, 1.0]);
        assert!(score.is_finite());
    }

    #[test]
    fn committee_kind_round_trips_through_code() {
        for kind in [CommitteeKind::Bagging, CommitteeKind::Boosting, CommitteeKind::RandomForest] {
            assert_eq!(CommitteeKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(CommitteeKind::from_code(9).is_err());
    }

    /// S6: bagging on the AND function with `ntrees=100` and OOB
    /// reporting on must, by the last tree, report an error rate under
    /// 20%. This is the property that silently broke when `valid` was
    /// never reset to all-1 before the OOB training walk, leaving every
    /// OOB example unreachable and voting `-1` by default.
    #[test]
    fn s6_oob_error_rate_converges_below_20_percent() {
        let mut rng = StdRng::seed_from_u64(100);
        let data = "-1\n-1 1:1\n-1 2:1\n1 1:1 2:1\n";
        let mut dataset = load(data.as_bytes(), &mut rng).unwrap();
        let config = CommitteeConfig {
            kind: CommitteeKind::Bagging,
            ntrees: 100,
            maxdepth: 3,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: true,
        };
        let mut reports = Vec::new();
        let ensemble = train(&mut dataset, &config, &mut rng, |r| reports.push(r));
        assert_eq!(ensemble.trees.len(), 100);
        assert_eq!(reports.len(), 100);
        for r in &reports {
            assert!((0.0..=100.0).contains(&r.error));
            assert!((0.0..=100.0).contains(&r.neg_error));
            assert!((0.0..=100.0).contains(&r.pos_error));
        }
        let last = reports.last().unwrap();
        assert!(last.error < 20.0, "final OOB error rate {} should be under 20%", last.error);
    }

    /// The AND function over two binary features: a bagging ensemble
    /// large enough to average over bootstrap resampling noise should
    /// score the one positive example at least as high as every
    /// negative one.
    #[test]
    fn and_function_scores_positive_example_highest() {
        let mut rng = StdRng::seed_from_u64(100);
        let data = "-1\n-1 1:1\n-1 2:1\n1 1:1 2:1\n";
        let mut dataset = load(data.as_bytes(), &mut rng).unwrap();
        let config = CommitteeConfig {
            kind: CommitteeKind::Bagging,
            ntrees: 50,
            maxdepth: 3,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: false,
        };
        let ensemble = train(&mut dataset, &config, &mut rng, |_| {});

        let positive = ensemble.classify(&[0.0, 1.0, 1.0]);
        for negative in [[0.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]] {
            assert!(positive >= ensemble.classify(&negative), "{positive} should be >= score of {negative:?}");
        }
    }

    /// A zero-valued example (no features stored at all) must still
    /// score as a valid, deterministic probability — it lands wherever
    /// the implicit-zero mass of the tree's splits puts it.
    #[test]
    fn all_zero_example_classifies_deterministically() {
        let mut rng = StdRng::seed_from_u64(55);
        let data = "-1 1:-1\n1 1:1\n1\n";
        let mut dataset = load(data.as_bytes(), &mut rng).unwrap();
        let config = CommitteeConfig {
            kind: CommitteeKind::Bagging,
            ntrees: 1,
            maxdepth: 2,
            fpn_factor: 1.0,
            neg_weight: 1.0,
            report_oob: false,
        };
        let ensemble = train(&mut dataset, &config, &mut rng, |_| {});
        let probe = [0.0, 0.0];
        let first = ensemble.classify(&probe);
        let second = ensemble.classify(&probe);
        assert_eq!(first, second);
        assert!((0.0..=1.0).contains(&first));
    }
}
