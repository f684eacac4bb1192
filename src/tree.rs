//! Recursive induction of one binary decision tree over a dataset, and
//! the three evaluation modes that walk a grown tree.
//!
//! Trees are stored as an arena (`Vec<NodeData>`) rather than owned
//! `Box` recursion: the root is always at index 0, and every node's
//! children are appended to the same vector. This keeps the preorder
//! codec in `codec.rs` a straight index walk and avoids heap churn on
//! free.

use rand::Rng;

use crate::dataset::Dataset;

/// Smoothing constant shared with the split search; keeps `log` and
/// mass ratios well-defined at the extremes.
const EPS: f32 = f32::EPSILON;
/// Leaf-logit smoothing constant for boosting, distinct from `EPS`.
const BOOST_EPS: f32 = 1e-6;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub(crate) enum NodeData {
    Leaf { pos: f32, neg: f32 },
    Split {
        feature: usize,
        threshold: f32,
        left: u32,
        right: u32,
    },
}

/// One grown decision tree, stored as a flat arena. The root is always
/// `nodes[0]`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tree {
    pub(crate) nodes: Vec<NodeData>,
}

impl Tree {
    fn root(&self) -> usize {
        0
    }

    /// Bag evaluation mode: walk against a dense probed example,
    /// comparing `example[feature]` to the split threshold. At a leaf,
    /// return `pos/(pos+neg)`, clamped to `{0,1}` when either mass is at
    /// or below the smoothing floor.
    pub fn classify_bag(&self, example: &[f32]) -> f32 {
        let mut idx = self.root();
        loop {
            match &self.nodes[idx] {
                NodeData::Leaf { pos, neg } => return bag_leaf_value(*pos, *neg),
                NodeData::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = example.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left as usize } else { *right as usize };
                }
            }
        }
    }

    /// Boost evaluation mode: same traversal, but leaves return the
    /// confidence-rated logit `0.5 * ln((pos+EPS)/(neg+EPS))`.
    pub fn classify_boost(&self, example: &[f32]) -> f32 {
        let mut idx = self.root();
        loop {
            match &self.nodes[idx] {
                NodeData::Leaf { pos, neg } => return boost_leaf_value(*pos, *neg),
                NodeData::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = example.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left as usize } else { *right as usize };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_single_leaf(&self) -> bool {
        self.nodes.len() == 1
    }
}

fn bag_leaf_value(pos: f32, neg: f32) -> f32 {
    if pos <= EPS {
        0.0
    } else if neg <= EPS {
        1.0
    } else {
        pos / (pos + neg)
    }
}

fn boost_leaf_value(pos: f32, neg: f32) -> f32 {
    0.5 * ((pos + BOOST_EPS) / (neg + BOOST_EPS)).ln()
}

fn entropy(p: f32) -> f32 {
    -p * p.ln() - (1.0 - p) * (1.0 - p).ln()
}

/// Locates the first pair whose value strictly exceeds `threshold`, via
/// binary search over the feature's ordered pairs.
fn upper_bound(pairs: &[crate::dataset::EvPair], threshold: f32) -> usize {
    let mut k = 0usize;
    let mut u = pairs.len();
    while k < u {
        let i = (k + u) / 2;
        if pairs[i].value > threshold {
            u = i;
        } else {
            k = i + 1;
        }
    }
    k
}

/// Splits a feature's ordered pairs into the "first"-subtree-range and
/// the complementary `X` range used by the in-place validity-marker
/// recursion below, returning `(x_start, x_end, first_is_left)`.
fn partition_bounds(pairs: &[crate::dataset::EvPair], threshold: f32) -> (usize, usize, bool) {
    let k = upper_bound(pairs, threshold);
    if threshold > 0.0 {
        (k, pairs.len(), true)
    } else {
        (0, k, false)
    }
}

#[derive(Debug, Clone)]
struct Split {
    feature: usize,
    threshold: f32,
    pos_left: f32,
    neg_left: f32,
    pos_right: f32,
    neg_right: f32,
}

struct SplitSearch {
    best_gain: f32,
    best: Option<Split>,
}

impl SplitSearch {
    fn new(parent_pos: f32, parent_neg: f32) -> Self {
        SplitSearch {
            best_gain: -entropy(parent_pos / (parent_pos + parent_neg)),
            best: None,
        }
    }

    fn consider(&mut self, feature: usize, threshold: f32, pos_left: f32, neg_left: f32, parent_pos: f32, parent_neg: f32) {
        let pos_right = (parent_pos - pos_left).max(EPS);
        let neg_right = (parent_neg - neg_left).max(EPS);
        let size_left = pos_left + neg_left;
        let size_right = pos_right + neg_right;
        let total = parent_pos + parent_neg;
        let gain = -(size_left / total * entropy(pos_left / size_left) + size_right / total * entropy(pos_right / size_right));
        if gain > self.best_gain {
            self.best_gain = gain;
            self.best = Some(Split {
                feature,
                threshold,
                pos_left,
                neg_left,
                pos_right,
                neg_right,
            });
        }
    }
}

/// Feature ids not currently marked `used`, with random forests
/// sub-sampling `fpn` of them uniformly without replacement. Bagging and
/// boosting always consider every unused feature (`fpn == nfeat`).
fn candidate_features(nfeat: usize, fpn: usize, used: &[bool], random_forest: bool, rng: &mut impl Rng) -> Vec<usize> {
    let mut unused: Vec<usize> = (0..nfeat).filter(|&f| !used[f]).collect();
    if random_forest && unused.len() > fpn {
        for i in 0..fpn {
            let j = rng.gen_range(i..unused.len());
            unused.swap(i, j);
        }
        unused.truncate(fpn);
    }
    unused
}

fn best_split(dataset: &Dataset, valid: &[i32], used: &[bool], fpn: usize, pos: f32, neg: f32, random_forest: bool, rng: &mut impl Rng) -> Option<Split> {
    let mut search = SplitSearch::new(pos, neg);
    let candidates = candidate_features(dataset.nfeat(), fpn, used, random_forest, rng);

    for feature in candidates {
        let pairs = dataset.feature(feature);
        if dataset.cont(feature) {
            search_continuous(dataset, pairs, valid, pos, neg, feature, &mut search);
        } else {
            search_binary(dataset, pairs, valid, pos, neg, feature, &mut search);
        }
    }
    search.best
}

fn search_binary(dataset: &Dataset, pairs: &[crate::dataset::EvPair], valid: &[i32], pos: f32, neg: f32, feature: usize, search: &mut SplitSearch) {
    let mut pos_right = 0.0f32;
    let mut neg_right = 0.0f32;
    for pair in pairs {
        let ex = pair.example as usize;
        if valid[ex] <= 0 {
            continue;
        }
        if dataset.target(ex) == 1 {
            pos_right += dataset.weight[ex];
        } else {
            neg_right += dataset.weight[ex];
        }
    }
    let pos_left = (pos - pos_right).max(EPS);
    let neg_left = (neg - neg_right).max(EPS);
    search.consider(feature, 0.5, pos_left, neg_left, pos, neg);
}

fn search_continuous(dataset: &Dataset, pairs: &[crate::dataset::EvPair], valid: &[i32], pos: f32, neg: f32, feature: usize, search: &mut SplitSearch) {
    let Some(prev_start) = pairs.iter().position(|p| valid[p.example as usize] > 0) else {
        return;
    };

    let mut pos_nonzero = EPS;
    let mut neg_nonzero = EPS;
    for pair in &pairs[prev_start..] {
        let ex = pair.example as usize;
        if valid[ex] <= 0 {
            continue;
        }
        if dataset.target(ex) == 1 {
            pos_nonzero += dataset.weight[ex];
        } else {
            neg_nonzero += dataset.weight[ex];
        }
    }
    let pos_zero = (pos - pos_nonzero).max(EPS);
    let neg_zero = (neg - neg_nonzero).max(EPS);

    let mut pos_left = EPS;
    let mut neg_left = EPS;
    let mut prev = prev_start;

    if pairs[prev].value > 0.0 {
        pos_left += pos_zero;
        neg_left += neg_zero;
        let threshold = 0.5 * pairs[prev].value;
        search.consider(feature, threshold, pos_left, neg_left, pos, neg);
    }

    for j in (prev_start + 1)..pairs.len() {
        let pair = pairs[j];
        let ex = pair.example as usize;
        if valid[ex] <= 0 {
            continue;
        }
        let prev_ex = pairs[prev].example as usize;
        if dataset.target(prev_ex) == 1 {
            pos_left += dataset.weight[prev_ex];
        } else {
            neg_left += dataset.weight[prev_ex];
        }

        if pairs[prev].value < 0.0 && pair.value > 0.0 {
            let threshold = 0.5 * pairs[prev].value;
            search.consider(feature, threshold, pos_left, neg_left, pos, neg);
            pos_left += pos_zero;
            neg_left += neg_zero;
            let threshold = 0.5 * pair.value;
            search.consider(feature, threshold, pos_left, neg_left, pos, neg);
        }
        if pair.value != pairs[prev].value {
            let threshold = 0.5 * (pair.value + pairs[prev].value);
            search.consider(feature, threshold, pos_left, neg_left, pos, neg);
        }
        prev = j;
    }
}

/// Per-tree grow configuration threaded through one call to `grow`.
pub(crate) struct GrowConfig {
    pub fpn: usize,
    pub maxdepth: usize,
    pub random_forest: bool,
}

/// Grows one tree from the dataset's current `weight`/`valid` state.
/// `valid[e] > 0` marks examples in the current bootstrap sample (or all
/// examples, for boosting); `used[f]` starts all-`false` and is restored
/// to all-`false` on return.
pub(crate) fn grow(dataset: &Dataset, valid: &mut [i32], used: &mut [bool], config: &GrowConfig, rng: &mut impl Rng) -> Tree {
    let mut pos = EPS;
    let mut neg = EPS;
    for e in 0..dataset.nex() {
        if valid[e] <= 0 {
            continue;
        }
        if dataset.target(e) == 1 {
            pos += dataset.weight[e];
        } else {
            neg += dataset.weight[e];
        }
    }
    pos = pos.min(1.0 - EPS);
    neg = neg.min(1.0 - EPS);

    let mut nodes = Vec::new();
    build_node(dataset, valid, used, config, 0, pos, neg, rng, &mut nodes);
    Tree { nodes }
}

#[allow(clippy::too_many_arguments)]
fn build_node(
    dataset: &Dataset,
    valid: &mut [i32],
    used: &mut [bool],
    config: &GrowConfig,
    depth: usize,
    pos: f32,
    neg: f32,
    rng: &mut impl Rng,
    nodes: &mut Vec<NodeData>,
) -> u32 {
    if depth >= config.maxdepth || pos <= EPS || neg <= EPS {
        nodes.push(NodeData::Leaf { pos, neg });
        return (nodes.len() - 1) as u32;
    }

    let best = best_split(dataset, valid, used, config.fpn, pos, neg, config.random_forest, rng);
    let best = match best {
        Some(b)
            if !((b.pos_left <= EPS && b.neg_left <= EPS) || (b.pos_right <= EPS && b.neg_right <= EPS)) =>
        {
            b
        }
        _ => {
            nodes.push(NodeData::Leaf { pos, neg });
            return (nodes.len() - 1) as u32;
        }
    };

    let this_idx = nodes.len();
    nodes.push(NodeData::Leaf { pos: 0.0, neg: 0.0 }); // placeholder, overwritten below

    let feature_is_binary = !dataset.cont(best.feature);
    if feature_is_binary {
        used[best.feature] = true;
    }

    let pairs = dataset.feature(best.feature);
    let (x_start, x_end, first_is_left) = partition_bounds(pairs, best.threshold);
    let (first_pos, first_neg, second_pos, second_neg) = if first_is_left {
        (best.pos_left, best.neg_left, best.pos_right, best.neg_right)
    } else {
        (best.pos_right, best.neg_right, best.pos_left, best.neg_left)
    };

    for i in x_start..x_end {
        valid[pairs[i].example as usize] -= 1;
    }
    let first_idx = build_node(dataset, valid, used, config, depth + 1, first_pos, first_neg, rng, nodes);
    for i in x_start..x_end {
        valid[pairs[i].example as usize] += 2;
    }
    for v in valid.iter_mut() {
        *v -= 1;
    }
    let second_idx = build_node(dataset, valid, used, config, depth + 1, second_pos, second_neg, rng, nodes);
    for i in x_start..x_end {
        valid[pairs[i].example as usize] -= 1;
    }
    for v in valid.iter_mut() {
        *v += 1;
    }

    if feature_is_binary {
        used[best.feature] = false;
    }

    let (left, right) = if first_is_left {
        (first_idx, second_idx)
    } else {
        (second_idx, first_idx)
    };
    nodes[this_idx] = NodeData::Split {
        feature: best.feature,
        threshold: best.threshold,
        left,
        right,
    };
    this_idx as u32
}

/// Which leaf-value function and which assignment gate the training-data
/// walk uses, per the two committee disciplines that need it.
#[derive(Clone, Copy)]
pub(crate) enum WalkMode {
    /// Boosting: every currently valid example gets the tree's boost
    /// logit (used to reweight for the next tree).
    Boosting,
    /// Out-of-bag voting: only examples with `weight <= 0` (i.e. excluded
    /// from this tree's bootstrap sample) get the bag-leaf value.
    Oob,
}

/// Traverses `tree` against the training column store using the same
/// validity-marker scheme as `grow`, writing `pred[e]` at each leaf for
/// every example the mode's gate admits. This single walker replaces
/// what the source kept as two near-identical recursive functions
/// (`classifyTrainingData` and `classifyOOBData`).
pub(crate) fn classify_training_walk(tree: &Tree, dataset: &Dataset, valid: &mut [i32], pred: &mut [f32], mode: WalkMode) {
    walk_training(tree, tree.root(), dataset, valid, pred, mode);
}

fn walk_training(tree: &Tree, node_idx: usize, dataset: &Dataset, valid: &mut [i32], pred: &mut [f32], mode: WalkMode) {
    match &tree.nodes[node_idx] {
        NodeData::Leaf { pos, neg } => {
            let value = match mode {
                WalkMode::Boosting => boost_leaf_value(*pos, *neg),
                WalkMode::Oob => bag_leaf_value(*pos, *neg),
            };
            for e in 0..dataset.nex() {
                if valid[e] <= 0 {
                    continue;
                }
                let admitted = match mode {
                    WalkMode::Boosting => true,
                    WalkMode::Oob => dataset.weight[e] <= 0.0,
                };
                if admitted {
                    pred[e] = value;
                }
            }
        }
        NodeData::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let (feature, threshold, left, right) = (*feature, *threshold, *left, *right);
            let pairs = dataset.feature(feature);
            let (x_start, x_end, first_is_left) = partition_bounds(pairs, threshold);
            let (first, second) = if first_is_left { (left, right) } else { (right, left) };

            for i in x_start..x_end {
                valid[pairs[i].example as usize] -= 1;
            }
            walk_training(tree, first as usize, dataset, valid, pred, mode);
            for i in x_start..x_end {
                valid[pairs[i].example as usize] += 2;
            }
            for v in valid.iter_mut() {
                *v -= 1;
            }
            walk_training(tree, second as usize, dataset, valid, pred, mode);
            for i in x_start..x_end {
                valid[pairs[i].example as usize] -= 1;
            }
            for v in valid.iter_mut() {
                *v += 1;
            }
        }
    }
}
