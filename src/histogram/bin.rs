use ordered_float::OrderedFloat;

use crate::error::{HistogramError, HistogramResult};
use crate::histogram::target::Target;

/// One (mean, count, target) triple.
///
/// The mean is immutable for a bin instance; the reservoir models a re-keyed
/// bin as a remove plus reinsert. `count` is a real, not an integer, because
/// combining bins produces weighted means of possibly fractional counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Bin {
    mean: OrderedFloat<f64>,
    count: f64,
    target: Target,
}

impl Bin {
    /// Negative zero would otherwise key differently from positive zero.
    pub fn new(mean: f64, count: f64, target: Target) -> Self {
        let mean = if mean == 0.0 { 0.0 } else { mean };
        Bin {
            mean: OrderedFloat(mean),
            count,
            target,
        }
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        self.mean.into_inner()
    }

    #[inline]
    pub(crate) fn mean_key(&self) -> OrderedFloat<f64> {
        self.mean
    }

    #[inline]
    pub fn count(&self) -> f64 {
        self.count
    }

    #[inline]
    pub fn target(&self) -> &Target {
        &self.target
    }

    #[inline]
    pub(crate) fn target_mut(&mut self) -> &mut Target {
        &mut self.target
    }

    /// Weighted-mean merge with `other`; the result sits between the two
    /// means.
    pub fn combine(&self, other: &Bin) -> Bin {
        let count = self.count + other.count;
        let mean = (self.mean() * self.count + other.mean() * other.count) / count;
        let mut target = self.target.init();
        target.sum(&self.target);
        target.sum(&other.target);
        Bin::new(mean, count, target)
    }

    /// Adds `other`'s count and target in place. The means must match.
    pub fn accumulate(&mut self, other: &Bin) -> HistogramResult<()> {
        if self.mean != other.mean {
            return Err(HistogramError::BinUpdate {
                context: "accumulate",
            });
        }
        self.absorb(other);
        Ok(())
    }

    /// Unchecked count/target add that keeps this bin's mean. Used by the
    /// exact-hit path (means already equal) and by freeze routing (means
    /// intentionally differ).
    pub(crate) fn absorb(&mut self, other: &Bin) {
        self.count += other.count;
        self.target.sum(&other.target);
    }

    pub(crate) fn scale_count(&mut self, factor: f64) {
        self.count *= factor;
    }
}
