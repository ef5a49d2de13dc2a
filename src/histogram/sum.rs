// src/histogram/sum.rs
use ordered_float::OrderedFloat;

use crate::error::{HistogramError, HistogramResult};
use crate::histogram::target::Target;
use crate::histogram::Histogram;

/// An approximate count paired with the matching target aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct SumResult {
    pub count: f64,
    pub target: Target,
}

impl Histogram {
    /// Approximate number of points `<= p`. Clamps to `0` below the observed
    /// minimum and to `total_count` at or above the observed maximum.
    pub fn sum(&self, p: f64) -> HistogramResult<f64> {
        self.extended_sum(p).map(|r| r.count)
    }

    /// `sum` plus the target aggregate of the counted points, computed with
    /// the same interpolation coefficients applied component-wise.
    pub fn extended_sum(&self, p: f64) -> HistogramResult<SumResult> {
        let (Some(first), Some(last)) = (self.reservoir().first(), self.reservoir().last()) else {
            return Err(HistogramError::Empty { operation: "sum" });
        };
        if p.is_nan() {
            return Err(HistogramError::OutOfRange {
                context: "sum probe is NaN",
            });
        }
        let minimum = self.minimum().unwrap_or_else(|| first.mean());
        let maximum = self.maximum().unwrap_or_else(|| last.mean());

        if p < minimum {
            return Ok(SumResult {
                count: 0.0,
                target: self.init_target(),
            });
        }
        if p >= maximum {
            return Ok(SumResult {
                count: self.total_count(),
                target: self.total_target_sum(),
            });
        }
        if p == minimum {
            return Ok(SumResult {
                count: 0.0,
                target: self.init_target(),
            });
        }
        if p == last.mean() {
            let mut target = self.init_target();
            for bin in self.bins() {
                if bin.mean_key() == last.mean_key() {
                    break;
                }
                target.sum(bin.target());
            }
            let mut half = last.target().clone();
            half.scale(0.5);
            target.sum(&half);
            return Ok(SumResult {
                count: self.total_count() - last.count() / 2.0,
                target,
            });
        }

        // Interior probe. If p lies outside [first mean, last mean] the
        // missing neighbour is a zero-count pseudo-bin at the extreme.
        let (p_i, m_i, t_i) = match self.reservoir().floor(p) {
            Some(bin) => (bin.mean(), bin.count(), Some(bin.target())),
            None => (minimum, 0.0, None),
        };
        let (p_i1, m_i1, t_i1) = match self.reservoir().higher(p) {
            Some(bin) => (bin.mean(), bin.count(), Some(bin.target())),
            None => (maximum, 0.0, None),
        };

        let mut count = 0.0;
        let mut target = self.init_target();
        for bin in self.bins() {
            if bin.mean() >= p_i {
                break;
            }
            count += bin.count();
            target.sum(bin.target());
        }

        // s = prev + (1/2 + r - r^2/2) * m_i + (r^2/2) * m_i1
        let r = (p - p_i) / (p_i1 - p_i);
        let i1_term = 0.5 * r * r;
        let i_term = 0.5 + r - i1_term;
        count += i_term * m_i + i1_term * m_i1;
        if let Some(t) = t_i {
            let mut scaled = t.clone();
            scaled.scale(i_term);
            target.sum(&scaled);
        }
        if let Some(t) = t_i1 {
            let mut scaled = t.clone();
            scaled.scale(i1_term);
            target.sum(&scaled);
        }
        Ok(SumResult { count, target })
    }

    /// Pointwise density estimate: the derivative of `sum`. Zero outside
    /// `[minimum, maximum]` and on empty histograms; never fails.
    pub fn density(&self, p: f64) -> f64 {
        self.extended_density(p).count
    }

    /// `density` plus the target density, interpolated with the same
    /// coefficients. A probe sitting exactly on a bin mean takes the average
    /// of the two adjacent IEEE-754 successors.
    pub fn extended_density(&self, p: f64) -> SumResult {
        if self.is_empty() || p.is_nan() {
            return SumResult {
                count: 0.0,
                target: self.init_target(),
            };
        }
        let key = OrderedFloat(if p == 0.0 { 0.0 } else { p });
        if self.reservoir().get(key).is_some() {
            let below = self.gap_density(p.next_down());
            let above = self.gap_density(p.next_up());
            let count = (below.count + above.count) / 2.0;
            let mut target = below.target;
            target.sum(&above.target);
            target.scale(0.5);
            SumResult { count, target }
        } else {
            self.gap_density(p)
        }
    }

    /// Expected target at `X = p`: target density over count density.
    /// `None` when the count density is zero (outside the support, or an
    /// isolated mean with no neighbours).
    pub fn average_target(&self, p: f64) -> HistogramResult<Option<Target>> {
        if self.is_empty() {
            return Err(HistogramError::Empty {
                operation: "average_target",
            });
        }
        let density = self.extended_density(p);
        if density.count == 0.0 {
            return Ok(None);
        }
        let mut target = density.target;
        target.scale(1.0 / density.count);
        Ok(Some(target))
    }

    /// Density for a probe treated as sitting strictly between means:
    /// linear interpolation of the two neighbouring counts over the gap
    /// width, with zero-count pseudo-bins at the observed extremes.
    fn gap_density(&self, p: f64) -> SumResult {
        let zero = SumResult {
            count: 0.0,
            target: self.init_target(),
        };
        let (Some(first), Some(last)) = (self.reservoir().first(), self.reservoir().last()) else {
            return zero;
        };
        let minimum = self.minimum().unwrap_or_else(|| first.mean());
        let maximum = self.maximum().unwrap_or_else(|| last.mean());
        if p < minimum || p > maximum {
            return zero;
        }

        let (p_l, m_l, t_l) = match self.reservoir().lower(p) {
            Some(bin) => (bin.mean(), bin.count(), Some(bin.target())),
            None => (minimum, 0.0, None),
        };
        let (p_h, m_h, t_h) = match self.reservoir().higher(p) {
            Some(bin) => (bin.mean(), bin.count(), Some(bin.target())),
            None => (maximum, 0.0, None),
        };
        let width = p_h - p_l;
        if width <= 0.0 {
            return zero;
        }

        let r = (p - p_l) / width;
        let count = (m_l + (m_h - m_l) * r) / width;
        let mut target = self.init_target();
        if let Some(t) = t_l {
            let mut scaled = t.clone();
            scaled.scale((1.0 - r) / width);
            target.sum(&scaled);
        }
        if let Some(t) = t_h {
            let mut scaled = t.clone();
            scaled.scale(r / width);
            target.sum(&scaled);
        }
        SumResult { count, target }
    }
}
