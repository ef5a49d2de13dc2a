// src/histogram/uniform.rs
//
// Inverse of the sum query: locate the point whose cumulative count equals a
// target fraction of the total. Both entry points build one sum-keyed knot
// map per query batch and solve a small quadratic per target.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use ordered_float::OrderedFloat;

use crate::histogram::Histogram;

/// One interpolation knot: a bin (or boundary pseudo-bin) addressed by its
/// cumulative sum.
#[derive(Debug, Clone, Copy)]
struct SumKnot {
    mean: f64,
    count: f64,
}

impl Histogram {
    /// Split points that partition the total weight into `parts`
    /// approximately equal parts; `parts - 1` values, or fewer when the
    /// requested granularity is finer than half the heaviest edge bin.
    /// Empty histograms yield an empty list.
    pub fn uniform(&self, parts: usize) -> Vec<f64> {
        let (Some(first), Some(last)) = (self.reservoir().first(), self.reservoir().last()) else {
            return Vec::new();
        };
        if parts < 1 {
            return Vec::new();
        }
        let total = self.total_count();
        if total <= 0.0 {
            return Vec::new();
        }

        let mut splits = parts;
        let mut step = total / parts as f64;
        let step_floor = first.count().max(last.count()) / 2.0;
        if step < step_floor {
            splits = (total / step_floor) as usize;
            step = total / splits as f64;
        }

        let knots = self.bin_sum_map();
        (1..splits)
            .map(|i| self.point_for_sum(i as f64 * step, &knots))
            .collect()
    }

    /// For each probe `q` in `[0, 1]`, the point whose cumulative count is
    /// `q * total_count`. Probes outside `[0, 1]` clamp to the observed
    /// extremes. Empty histograms yield an empty list.
    pub fn percentiles(&self, probes: &[f64]) -> Vec<(f64, f64)> {
        if self.is_empty() {
            return Vec::new();
        }
        let total = self.total_count();
        let knots = self.bin_sum_map();
        probes
            .iter()
            .map(|&q| (q, self.point_for_sum(q * total, &knots)))
            .collect()
    }

    /// Knots at every bin mean's cumulative sum, with sentinels pinning the
    /// curve to `(0, minimum)` and `(total, maximum)`. Sentinels win ties.
    fn bin_sum_map(&self) -> BTreeMap<OrderedFloat<f64>, SumKnot> {
        let mut knots = BTreeMap::new();
        let endpoints: Vec<(f64, f64)> = self.bins().map(|b| (b.mean(), b.count())).collect();
        for (mean, count) in endpoints {
            if let Ok(sum) = self.sum(mean) {
                knots.insert(OrderedFloat(sum), SumKnot { mean, count });
            }
        }
        if let (Some(minimum), Some(maximum)) = (self.minimum(), self.maximum()) {
            knots.insert(
                OrderedFloat(0.0),
                SumKnot {
                    mean: minimum,
                    count: 0.0,
                },
            );
            knots.insert(
                OrderedFloat(self.total_count()),
                SumKnot {
                    mean: maximum,
                    count: 0.0,
                },
            );
        }
        knots
    }

    fn point_for_sum(&self, s: f64, knots: &BTreeMap<OrderedFloat<f64>, SumKnot>) -> f64 {
        let minimum = self.minimum().unwrap_or(0.0);
        let maximum = self.maximum().unwrap_or(0.0);
        if !s.is_finite() || s <= 0.0 {
            return minimum;
        }
        if s >= self.total_count() {
            return maximum;
        }

        let Some((&s_i, knot_i)) = knots.range(..=OrderedFloat(s)).next_back() else {
            return minimum;
        };
        let (s_i1, knot_i1) = match knots.range((Excluded(s_i), Unbounded)).next() {
            Some((key, knot)) => (key.into_inner(), *knot),
            None => return knot_i.mean,
        };
        debug_assert!(s_i1 > s_i.into_inner());

        let d = s - s_i.into_inner();
        let a = knot_i1.count - knot_i.count;
        let z = if a == 0.0 {
            // Equal counts degenerate the quadratic; interpolate linearly
            // with their average.
            linear_z(d, knot_i.count, knot_i1.count)
        } else {
            let b = 2.0 * knot_i.count;
            let c = -2.0 * d;
            find_z(a, b, c).unwrap_or_else(|| linear_z(d, knot_i.count, knot_i1.count))
        };
        knot_i.mean + z * (knot_i1.mean - knot_i.mean)
    }
}

fn linear_z(d: f64, m_i: f64, m_i1: f64) -> f64 {
    let average = (m_i + m_i1) / 2.0;
    if average == 0.0 {
        0.0
    } else {
        (d / average).clamp(0.0, 1.0)
    }
}

/// First root of `a*z^2 + b*z + c` inside `[0, 1]`.
fn find_z(a: f64, b: f64, c: f64) -> Option<f64> {
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return None;
    }
    let root = discriminant.sqrt();
    [(-b + root) / (2.0 * a), (-b - root) / (2.0 * a)]
        .into_iter()
        .find(|z| (0.0..=1.0).contains(z))
}
