//! Ordered bin storage plus the adjacent-gap priority queue.
//!
//! Two backings with identical semantics: a sorted `Vec` (cache-friendly,
//! the default for small bin budgets) and a `BTreeMap` (wins on large ones).
//! Gaps are stored by value carrying the two endpoint means; bins are
//! resolved through the store, so nothing here holds a reference cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::histogram::bin::Bin;

/// Which backing the bin store uses. `Array` is the default up to 256 bins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservoirKind {
    Array,
    Tree,
}

impl ReservoirKind {
    pub(crate) fn default_for(max_bins: usize) -> Self {
        if max_bins <= 256 {
            ReservoirKind::Array
        } else {
            ReservoirKind::Tree
        }
    }
}

/// The scalar separating two adjacent bins. Ordered by `(weight, left_mean)`
/// so the queue pops the narrowest gap with a deterministic tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Gap {
    weight: OrderedFloat<f64>,
    left_mean: OrderedFloat<f64>,
    right_mean: OrderedFloat<f64>,
}

#[derive(Debug, Clone)]
enum BinStore {
    Array(Vec<Bin>),
    Tree(BTreeMap<OrderedFloat<f64>, Bin>),
}

impl BinStore {
    fn new(kind: ReservoirKind) -> Self {
        match kind {
            ReservoirKind::Array => BinStore::Array(Vec::new()),
            ReservoirKind::Tree => BinStore::Tree(BTreeMap::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            BinStore::Array(v) => v.len(),
            BinStore::Tree(m) => m.len(),
        }
    }

    fn get(&self, key: OrderedFloat<f64>) -> Option<&Bin> {
        match self {
            BinStore::Array(v) => v
                .binary_search_by(|b| b.mean_key().cmp(&key))
                .ok()
                .map(|i| &v[i]),
            BinStore::Tree(m) => m.get(&key),
        }
    }

    fn get_mut(&mut self, key: OrderedFloat<f64>) -> Option<&mut Bin> {
        match self {
            BinStore::Array(v) => match v.binary_search_by(|b| b.mean_key().cmp(&key)) {
                Ok(i) => Some(&mut v[i]),
                Err(_) => None,
            },
            BinStore::Tree(m) => m.get_mut(&key),
        }
    }

    /// Inserts a bin whose mean is not already present.
    fn insert_new(&mut self, bin: Bin) {
        match self {
            BinStore::Array(v) => match v.binary_search_by(|b| b.mean_key().cmp(&bin.mean_key())) {
                Ok(_) => debug_assert!(false, "insert_new with an existing mean"),
                Err(i) => v.insert(i, bin),
            },
            BinStore::Tree(m) => {
                let previous = m.insert(bin.mean_key(), bin);
                debug_assert!(previous.is_none(), "insert_new with an existing mean");
            }
        }
    }

    fn remove(&mut self, key: OrderedFloat<f64>) -> Option<Bin> {
        match self {
            BinStore::Array(v) => v
                .binary_search_by(|b| b.mean_key().cmp(&key))
                .ok()
                .map(|i| v.remove(i)),
            BinStore::Tree(m) => m.remove(&key),
        }
    }

    /// Largest mean `<= p`.
    fn floor(&self, p: f64) -> Option<&Bin> {
        let key = OrderedFloat(p);
        match self {
            BinStore::Array(v) => match v.binary_search_by(|b| b.mean_key().cmp(&key)) {
                Ok(i) => Some(&v[i]),
                Err(0) => None,
                Err(i) => Some(&v[i - 1]),
            },
            BinStore::Tree(m) => m.range(..=key).next_back().map(|(_, b)| b),
        }
    }

    /// Smallest mean `>= p`.
    fn ceiling(&self, p: f64) -> Option<&Bin> {
        let key = OrderedFloat(p);
        match self {
            BinStore::Array(v) => match v.binary_search_by(|b| b.mean_key().cmp(&key)) {
                Ok(i) => Some(&v[i]),
                Err(i) => v.get(i),
            },
            BinStore::Tree(m) => m.range(key..).next().map(|(_, b)| b),
        }
    }

    /// Largest mean `< p`.
    fn lower(&self, p: f64) -> Option<&Bin> {
        let key = OrderedFloat(p);
        match self {
            BinStore::Array(v) => match v.binary_search_by(|b| b.mean_key().cmp(&key)) {
                Ok(0) | Err(0) => None,
                Ok(i) | Err(i) => Some(&v[i - 1]),
            },
            BinStore::Tree(m) => m.range(..key).next_back().map(|(_, b)| b),
        }
    }

    /// Smallest mean `> p`.
    fn higher(&self, p: f64) -> Option<&Bin> {
        let key = OrderedFloat(p);
        match self {
            BinStore::Array(v) => match v.binary_search_by(|b| b.mean_key().cmp(&key)) {
                Ok(i) => v.get(i + 1),
                Err(i) => v.get(i),
            },
            BinStore::Tree(m) => m.range((Excluded(key), Unbounded)).next().map(|(_, b)| b),
        }
    }

    fn first(&self) -> Option<&Bin> {
        match self {
            BinStore::Array(v) => v.first(),
            BinStore::Tree(m) => m.values().next(),
        }
    }

    fn last(&self) -> Option<&Bin> {
        match self {
            BinStore::Array(v) => v.last(),
            BinStore::Tree(m) => m.values().next_back(),
        }
    }

    fn iter(&self) -> BinIter<'_> {
        match self {
            BinStore::Array(v) => BinIter::Array(v.iter()),
            BinStore::Tree(m) => BinIter::Tree(m.values()),
        }
    }

    fn iter_mut(&mut self) -> BinIterMut<'_> {
        match self {
            BinStore::Array(v) => BinIterMut::Array(v.iter_mut()),
            BinStore::Tree(m) => BinIterMut::Tree(m.values_mut()),
        }
    }
}

/// Ordered iteration over bins, independent of the backing.
pub enum BinIter<'a> {
    Array(std::slice::Iter<'a, Bin>),
    Tree(std::collections::btree_map::Values<'a, OrderedFloat<f64>, Bin>),
}

impl<'a> Iterator for BinIter<'a> {
    type Item = &'a Bin;

    fn next(&mut self) -> Option<&'a Bin> {
        match self {
            BinIter::Array(it) => it.next(),
            BinIter::Tree(it) => it.next(),
        }
    }
}

enum BinIterMut<'a> {
    Array(std::slice::IterMut<'a, Bin>),
    Tree(std::collections::btree_map::ValuesMut<'a, OrderedFloat<f64>, Bin>),
}

impl<'a> Iterator for BinIterMut<'a> {
    type Item = &'a mut Bin;

    fn next(&mut self) -> Option<&'a mut Bin> {
        match self {
            BinIterMut::Array(it) => it.next(),
            BinIterMut::Tree(it) => it.next(),
        }
    }
}

/// The ordered bin collection plus its gap queue. Invariant: every adjacent
/// pair of bins has exactly one gap, indexed by its left endpoint.
#[derive(Debug, Clone)]
pub(crate) struct Reservoir {
    store: BinStore,
    gaps: BTreeSet<Gap>,
    gap_index: HashMap<OrderedFloat<f64>, Gap>,
    gap_weighted: bool,
    kind: ReservoirKind,
}

impl Reservoir {
    pub(crate) fn new(kind: ReservoirKind, gap_weighted: bool) -> Self {
        Reservoir {
            store: BinStore::new(kind),
            gaps: BTreeSet::new(),
            gap_index: HashMap::new(),
            gap_weighted,
            kind,
        }
    }

    #[inline]
    pub(crate) fn kind(&self) -> ReservoirKind {
        self.kind
    }

    #[inline]
    pub(crate) fn gap_weighted(&self) -> bool {
        self.gap_weighted
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.store.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    #[inline]
    pub(crate) fn get(&self, key: OrderedFloat<f64>) -> Option<&Bin> {
        self.store.get(key)
    }

    #[inline]
    pub(crate) fn floor(&self, p: f64) -> Option<&Bin> {
        self.store.floor(p)
    }

    #[inline]
    pub(crate) fn ceiling(&self, p: f64) -> Option<&Bin> {
        self.store.ceiling(p)
    }

    #[inline]
    pub(crate) fn lower(&self, p: f64) -> Option<&Bin> {
        self.store.lower(p)
    }

    #[inline]
    pub(crate) fn higher(&self, p: f64) -> Option<&Bin> {
        self.store.higher(p)
    }

    #[inline]
    pub(crate) fn first(&self) -> Option<&Bin> {
        self.store.first()
    }

    #[inline]
    pub(crate) fn last(&self) -> Option<&Bin> {
        self.store.last()
    }

    #[inline]
    pub(crate) fn iter(&self) -> BinIter<'_> {
        self.store.iter()
    }

    pub(crate) fn total_bin_count(&self) -> f64 {
        self.iter().map(Bin::count).sum()
    }

    /// Inserts a bin: an exact mean hit accumulates in place (neighbour gaps
    /// only change when they are count-weighted); a new mean lands in the
    /// order and replaces the single gap between its neighbours with two.
    pub(crate) fn insert(&mut self, bin: Bin) {
        let key = bin.mean_key();
        let exact_hit = match self.store.get_mut(key) {
            Some(existing) => {
                existing.absorb(&bin);
                true
            }
            None => false,
        };
        if exact_hit {
            if self.gap_weighted {
                self.update_gaps(key);
            }
        } else {
            self.store.insert_new(bin);
            self.update_gaps(key);
        }
    }

    /// Routes a point into the nearest existing bin: mean unchanged, count
    /// and target absorbed, both touching gaps refreshed. Freeze-mode path.
    pub(crate) fn absorb_at(&mut self, mean: f64, bin: &Bin) {
        let key = OrderedFloat(if mean == 0.0 { 0.0 } else { mean });
        match self.store.get_mut(key) {
            Some(existing) => existing.absorb(bin),
            None => {
                debug_assert!(false, "absorb_at on a vanished bin");
                return;
            }
        }
        self.update_gaps(key);
    }

    /// Mean of the bin nearest to `p` by absolute distance, ties to the
    /// lower neighbour.
    pub(crate) fn nearest(&self, p: f64) -> Option<f64> {
        let floor = self.store.floor(p).map(Bin::mean);
        let ceiling = self.store.ceiling(p).map(Bin::mean);
        match (floor, ceiling) {
            (Some(lo), Some(hi)) => {
                if (p - lo).abs() <= (hi - p).abs() {
                    Some(lo)
                } else {
                    Some(hi)
                }
            }
            (Some(lo), None) => Some(lo),
            (None, Some(hi)) => Some(hi),
            (None, None) => None,
        }
    }

    /// Pops the narrowest gap and combines its two bins until the store fits
    /// `max_bins` again.
    pub(crate) fn merge_down(&mut self, max_bins: usize) {
        while self.store.len() > max_bins {
            let Some(gap) = self.gaps.pop_first() else {
                debug_assert!(false, "over-full reservoir with an empty gap queue");
                break;
            };
            self.gap_index.remove(&gap.left_mean);
            self.remove_gap_by_left(gap.right_mean);

            let left = self.store.remove(gap.left_mean);
            let right = self.store.remove(gap.right_mean);
            let (Some(left), Some(right)) = (left, right) else {
                debug_assert!(false, "gap endpoints out of sync with the bin store");
                continue;
            };
            self.insert(left.combine(&right));
        }
    }

    /// Recomputes the two gaps touching the bin at `key`, replacing whatever
    /// gaps its neighbours held before.
    fn update_gaps(&mut self, key: OrderedFloat<f64>) {
        let Some(center) = self.store.get(key).map(endpoint) else {
            debug_assert!(false, "update_gaps on a missing bin");
            return;
        };
        if let Some(prev) = self.store.lower(key.into_inner()).map(endpoint) {
            self.replace_gap(prev, center);
        }
        if let Some(next) = self.store.higher(key.into_inner()).map(endpoint) {
            self.replace_gap(center, next);
        }
    }

    fn replace_gap(&mut self, left: (OrderedFloat<f64>, f64), right: (OrderedFloat<f64>, f64)) {
        let mut weight = right.0.into_inner() - left.0.into_inner();
        if self.gap_weighted {
            weight *= (std::f64::consts::E + left.1.min(right.1)).ln();
        }
        let gap = Gap {
            weight: OrderedFloat(weight),
            left_mean: left.0,
            right_mean: right.0,
        };
        if let Some(old) = self.gap_index.insert(gap.left_mean, gap) {
            self.gaps.remove(&old);
        }
        self.gaps.insert(gap);
    }

    fn remove_gap_by_left(&mut self, left_mean: OrderedFloat<f64>) {
        if let Some(gap) = self.gap_index.remove(&left_mean) {
            self.gaps.remove(&gap);
        }
    }

    /// Multiplies every bin count by `factor`. Count-weighted gap weights
    /// depend on the counts, so those are rebuilt.
    pub(crate) fn scale_counts(&mut self, factor: f64) {
        for bin in self.store.iter_mut() {
            bin.scale_count(factor);
        }
        if self.gap_weighted {
            self.rebuild_gaps();
        }
    }

    fn rebuild_gaps(&mut self) {
        self.gaps.clear();
        self.gap_index.clear();
        let endpoints: Vec<(OrderedFloat<f64>, f64)> = self.store.iter().map(endpoint).collect();
        for pair in endpoints.windows(2) {
            self.replace_gap(pair[0], pair[1]);
        }
    }

    /// Structural self-check used by tests: ordered unique means, and a gap
    /// queue that mirrors the adjacency exactly.
    pub(crate) fn debug_validate(&self) -> Result<(), String> {
        let bins: Vec<&Bin> = self.iter().collect();
        for pair in bins.windows(2) {
            if pair[0].mean_key() >= pair[1].mean_key() {
                return Err(format!(
                    "bin means not strictly increasing: {} then {}",
                    pair[0].mean(),
                    pair[1].mean()
                ));
            }
        }

        let expected_gaps = bins.len().saturating_sub(1);
        if self.gaps.len() != expected_gaps || self.gap_index.len() != expected_gaps {
            return Err(format!(
                "gap count {} (index {}) for {} bins",
                self.gaps.len(),
                self.gap_index.len(),
                bins.len()
            ));
        }

        for pair in bins.windows(2) {
            let (left, right) = (pair[0], pair[1]);
            let Some(gap) = self.gap_index.get(&left.mean_key()) else {
                return Err(format!("no gap keyed at {}", left.mean()));
            };
            if gap.right_mean != right.mean_key() {
                return Err(format!(
                    "gap at {} points at {}, expected {}",
                    left.mean(),
                    gap.right_mean.into_inner(),
                    right.mean()
                ));
            }
            let mut weight = right.mean() - left.mean();
            if self.gap_weighted {
                weight *= (std::f64::consts::E + left.count().min(right.count())).ln();
            }
            if gap.weight.into_inner() != weight {
                return Err(format!(
                    "stale gap weight at {}: stored {}, recomputed {}",
                    left.mean(),
                    gap.weight.into_inner(),
                    weight
                ));
            }
            if !self.gaps.contains(gap) {
                return Err(format!("indexed gap at {} missing from the queue", left.mean()));
            }
        }
        Ok(())
    }
}

#[inline]
fn endpoint(bin: &Bin) -> (OrderedFloat<f64>, f64) {
    (bin.mean_key(), bin.count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::target::Target;

    fn unit(mean: f64) -> Bin {
        Bin::new(mean, 1.0, Target::None)
    }

    fn reservoir_with(kind: ReservoirKind, means: &[f64]) -> Reservoir {
        let mut r = Reservoir::new(kind, false);
        for &m in means {
            r.insert(unit(m));
        }
        r
    }

    #[test]
    fn store_lookups_agree_across_backings() {
        for kind in [ReservoirKind::Array, ReservoirKind::Tree] {
            let r = reservoir_with(kind, &[1.0, 3.0, 5.0]);

            assert_eq!(r.floor(3.0).map(Bin::mean), Some(3.0));
            assert_eq!(r.floor(2.9).map(Bin::mean), Some(1.0));
            assert_eq!(r.floor(0.5), None);
            assert_eq!(r.ceiling(3.0).map(Bin::mean), Some(3.0));
            assert_eq!(r.ceiling(3.1).map(Bin::mean), Some(5.0));
            assert_eq!(r.ceiling(5.1), None);
            assert_eq!(r.lower(3.0).map(Bin::mean), Some(1.0));
            assert_eq!(r.higher(3.0).map(Bin::mean), Some(5.0));
            assert_eq!(r.first().map(Bin::mean), Some(1.0));
            assert_eq!(r.last().map(Bin::mean), Some(5.0));
        }
    }

    #[test]
    fn gap_queue_tracks_adjacency() {
        let mut r = reservoir_with(ReservoirKind::Array, &[1.0, 5.0]);
        r.debug_validate().unwrap();

        // Splitting the (1, 5) gap replaces it with (1, 2) and (2, 5).
        r.insert(unit(2.0));
        r.debug_validate().unwrap();
        assert_eq!(r.len(), 3);

        // Exact hit leaves structure untouched for unweighted gaps.
        r.insert(unit(2.0));
        r.debug_validate().unwrap();
        assert_eq!(r.len(), 3);
        assert_eq!(r.get(OrderedFloat(2.0)).map(Bin::count), Some(2.0));
    }

    #[test]
    fn merge_down_combines_narrowest_gap() {
        let mut r = reservoir_with(ReservoirKind::Array, &[1.0, 2.0, 3.0, 0.5]);
        r.merge_down(3);
        r.debug_validate().unwrap();

        let means: Vec<f64> = r.iter().map(Bin::mean).collect();
        let counts: Vec<f64> = r.iter().map(Bin::count).collect();
        assert_eq!(means, vec![0.75, 2.0, 3.0]);
        assert_eq!(counts, vec![2.0, 1.0, 1.0]);
    }

    #[test]
    fn weighted_gaps_refresh_on_exact_hit() {
        let mut r = Reservoir::new(ReservoirKind::Array, true);
        for m in [0.0, 1.0, 2.0] {
            r.insert(unit(m));
        }
        r.debug_validate().unwrap();

        // Growing the middle bin's count changes both neighbour weights.
        r.insert(unit(1.0));
        r.insert(unit(1.0));
        r.debug_validate().unwrap();
    }

    #[test]
    fn nearest_prefers_floor_on_ties() {
        let r = reservoir_with(ReservoirKind::Tree, &[1.0, 3.0]);
        assert_eq!(r.nearest(2.0), Some(1.0));
        assert_eq!(r.nearest(2.1), Some(3.0));
        assert_eq!(r.nearest(-4.0), Some(1.0));
        assert_eq!(r.nearest(9.0), Some(3.0));
    }

    #[test]
    fn tie_broken_by_left_mean() {
        // Two equal-width gaps: (0,1) and (1,2). The leftmost merges first.
        let mut r = reservoir_with(ReservoirKind::Array, &[0.0, 1.0, 2.0]);
        r.merge_down(2);
        r.debug_validate().unwrap();
        let means: Vec<f64> = r.iter().map(Bin::mean).collect();
        assert_eq!(means, vec![0.5, 2.0]);
    }
}
