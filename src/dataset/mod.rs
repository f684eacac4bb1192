//! Immutable column-store representation of a labeled sparse dataset,
//! plus the two mutable per-example vectors the committee controller
//! drives between trees.

use rand::Rng;

use crate::error::ForestError;

pub mod parse;

/// One non-zero occurrence of a feature: which example it belongs to and
/// what value the feature takes there. Zero-valued occurrences are never
/// stored (see invariants in `parse`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvPair {
    pub example: u32,
    pub value: f32,
}

/// Column-store dataset: one sorted vector of `EvPair` per feature, plus
/// per-example target/weight/oobvotes vectors.
///
/// `feature[f]` is ordered ascending by value then (incidentally) by
/// whatever order the sort left same-valued pairs in; ties on value never
/// affect split search correctness, since candidate thresholds are only
/// evaluated between *distinct* adjacent values.
pub struct Dataset {
    nex: usize,
    nfeat: usize,
    feature: Vec<Vec<EvPair>>,
    cont: Vec<bool>,
    target: Vec<u8>,
    pub weight: Vec<f32>,
    pub oobvotes: Vec<i32>,
}

impl Dataset {
    pub fn nex(&self) -> usize {
        self.nex
    }

    pub fn nfeat(&self) -> usize {
        self.nfeat
    }

    pub fn feature(&self, f: usize) -> &[EvPair] {
        &self.feature[f]
    }

    pub fn size(&self, f: usize) -> usize {
        self.feature[f].len()
    }

    pub fn cont(&self, f: usize) -> bool {
        self.cont[f]
    }

    pub fn target(&self, e: usize) -> u8 {
        self.target[e]
    }

    /// Counts of negative and positive examples, as used to derive the
    /// per-class weight factors in the committee controller.
    pub fn class_counts(&self) -> (f32, f32) {
        let mut c0 = 0.0f32;
        let mut c1 = 0.0f32;
        for &t in &self.target {
            if t == 1 {
                c1 += 1.0;
            } else {
                c0 += 1.0;
            }
        }
        (c0, c1)
    }

    /// Builds a dataset from raw (feature, example, value) triples already
    /// collected by the textual parser: sorts lexicographically by
    /// (feature, value), then partitions into per-feature slices.
    pub(crate) fn from_raw_pairs(
        mut pairs: Vec<parse::RawPair>,
        target: Vec<u8>,
        rng: &mut impl Rng,
    ) -> Result<Self, ForestError> {
        let nex = target.len();
        sort_raw_pairs(&mut pairs, rng);

        let nfeat = pairs.last().map(|p| p.feature as usize + 1).unwrap_or(0);

        let mut size = vec![0usize; nfeat];
        let mut cont = vec![false; nfeat];
        for p in &pairs {
            size[p.feature as usize] += 1;
            if p.value != 1.0 {
                cont[p.feature as usize] = true;
            }
        }

        let mut feature: Vec<Vec<EvPair>> = Vec::with_capacity(nfeat);
        let mut idx = 0usize;
        for f in 0..nfeat {
            let mut column = Vec::with_capacity(size[f]);
            for _ in 0..size[f] {
                let p = pairs[idx];
                column.push(EvPair {
                    example: p.example,
                    value: p.value,
                });
                idx += 1;
            }
            feature.push(column);
        }

        Ok(Dataset {
            nex,
            nfeat,
            feature,
            cont,
            target,
            weight: vec![0.0; nex],
            oobvotes: vec![0; nex],
        })
    }
}

fn less(a: &parse::RawPair, b: &parse::RawPair) -> bool {
    if a.feature != b.feature {
        return a.feature < b.feature;
    }
    a.value < b.value
}

/// Randomized quicksort (Lomuto-style pivot, uniform over the active
/// range) that bails out on runs shorter than 8, followed by a final
/// insertion-sort pass that fully sorts the (by then nearly-sorted)
/// buffer. The pivot randomness only affects how much work the insertion
/// pass has left to do, never the final order.
fn sort_raw_pairs(pairs: &mut [parse::RawPair], rng: &mut impl Rng) {
    quicksort_lazy(pairs, rng);
    insertion_sort(pairs);
}

fn quicksort_lazy(a: &mut [parse::RawPair], rng: &mut impl Rng) {
    let n = a.len();
    if n < 8 {
        return;
    }
    let r = rng.gen_range(0..n);
    a.swap(0, r);
    let pivot = a[0];

    let mut i: isize = 0;
    let mut j: isize = n as isize;
    loop {
        loop {
            i += 1;
            if i as usize >= n || !less(&a[i as usize], &pivot) {
                break;
            }
        }
        loop {
            j -= 1;
            if !less(&pivot, &a[j as usize]) {
                break;
            }
        }
        if i > j {
            break;
        }
        a.swap(i as usize, j as usize);
    }
    let j = j as usize;
    a.swap(0, j);

    let (left, rest) = a.split_at_mut(j);
    quicksort_lazy(left, rng);
    quicksort_lazy(&mut rest[1..], rng);
}

fn insertion_sort(a: &mut [parse::RawPair]) {
    for i in 1..a.len() {
        let mut j = i;
        while j > 0 && less(&a[j], &a[j - 1]) {
            a.swap(j, j - 1);
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn raw(feature: u32, example: u32, value: f32) -> parse::RawPair {
        parse::RawPair {
            feature,
            example,
            value,
        }
    }

    #[test]
    fn sort_orders_by_feature_then_value() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut data = vec![
            raw(1, 0, 3.0),
            raw(0, 2, 1.0),
            raw(1, 1, -2.0),
            raw(0, 0, 0.5),
            raw(2, 0, 9.0),
        ];
        sort_raw_pairs(&mut data, &mut rng);
        let keys: Vec<(u32, f32)> = data.iter().map(|p| (p.feature, p.value)).collect();
        let mut sorted = keys.clone();
        sorted.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.partial_cmp(&b.1).unwrap()));
        assert_eq!(keys, sorted);
    }

    #[test]
    fn sort_handles_large_runs() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut data: Vec<parse::RawPair> = (0..500)
            .map(|i| raw((i % 5) as u32, i as u32, ((i * 37) % 101) as f32))
            .collect();
        sort_raw_pairs(&mut data, &mut rng);
        for w in data.windows(2) {
            let a = (w[0].feature, w[0].value);
            let b = (w[1].feature, w[1].value);
            assert!(a <= b || (a.0 == b.0 && a.1 <= b.1));
        }
    }

    #[test]
    fn from_raw_pairs_builds_column_store() {
        let mut rng = StdRng::seed_from_u64(1);
        let pairs = vec![raw(0, 0, 1.0), raw(0, 1, 0.5), raw(2, 0, -1.0)];
        let ds = Dataset::from_raw_pairs(pairs, vec![1, 0], &mut rng).unwrap();
        assert_eq!(ds.nfeat(), 3);
        assert_eq!(ds.size(0), 2);
        assert_eq!(ds.size(1), 0);
        assert!(ds.cont(0)); // feature 0 has a stored value of 0.5, so it is continuous
        assert!(ds.cont(2)); // feature 2's only stored value is -1, which is not 1
    }
}
