pub mod bin;
mod reservoir;
mod sum;
pub mod target;
pub mod test_helpers;
mod uniform;
pub mod wire;

use std::sync::Arc;

pub use bin::Bin;
pub use reservoir::{BinIter, ReservoirKind};
pub use sum::SumResult;
pub use target::{
    ArrayCategoricalTarget, CategoryIndex, GroupTarget, GroupValue, HistogramTarget,
    MapCategoricalTarget, NumericTarget, Target, TargetType,
};

use crate::error::{HistogramError, HistogramResult};
use reservoir::Reservoir;
use target::same_index;

/// Streaming histogram after Ben-Haim & Tyree's SPDT construction.
///
/// Consumes points (optionally with a target value) in a single pass and
/// maintains at most `max_bins` bins; when an insert would exceed the budget,
/// the pair of adjacent bins separated by the narrowest gap is combined into
/// their weighted mean. The `sum`, `density`, `uniform` and `percentiles`
/// queries interpolate over the bins and are exact at the observed extremes.
///
/// One instance is single-threaded; for parallel ingest, build one histogram
/// per partition and [`merge`](Histogram::merge) them.
#[derive(Debug, Clone)]
pub struct Histogram {
    max_bins: usize,
    reservoir: Reservoir,
    target_type: Option<TargetType>,
    group_types: Option<Vec<TargetType>>,
    categories: Option<Arc<CategoryIndex>>,
    freeze_threshold: Option<u64>,
    total_count: f64,
    missing_count: f64,
    missing_target: Option<Target>,
    minimum: Option<f64>,
    maximum: Option<f64>,
}

/// Creation options for [`Histogram`]. Defaults: 64 bins, unweighted gaps,
/// open target type, no freeze threshold, backing picked from the bin count.
#[derive(Debug, Clone)]
pub struct HistogramBuilder {
    max_bins: usize,
    gap_weighted: bool,
    categories: Option<Vec<String>>,
    group_types: Option<Vec<TargetType>>,
    freeze: Option<u64>,
    reservoir: Option<ReservoirKind>,
}

impl Default for HistogramBuilder {
    fn default() -> Self {
        HistogramBuilder {
            max_bins: 64,
            gap_weighted: false,
            categories: None,
            group_types: None,
            freeze: None,
            reservoir: None,
        }
    }
}

impl HistogramBuilder {
    pub fn max_bins(mut self, max_bins: usize) -> Self {
        self.max_bins = max_bins;
        self
    }

    /// Weight gaps by `ln(e + min(count))` so dense regions merge last.
    pub fn gap_weighted(mut self, gap_weighted: bool) -> Self {
        self.gap_weighted = gap_weighted;
        self
    }

    /// Declares a closed category vocabulary and latches the target type to
    /// array-backed categorical. An empty list is treated as absent.
    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list: Vec<String> = categories.into_iter().map(Into::into).collect();
        self.categories = if list.is_empty() { None } else { Some(list) };
        self
    }

    /// Declares the per-slot types of group targets and latches the target
    /// type to group. An empty list is treated as absent.
    pub fn group_types(mut self, types: Vec<TargetType>) -> Self {
        self.group_types = if types.is_empty() { None } else { Some(types) };
        self
    }

    /// Past this many inserts, a full reservoir stops opening bins and
    /// routes points into the nearest existing one.
    pub fn freeze(mut self, threshold: u64) -> Self {
        self.freeze = Some(threshold);
        self
    }

    pub fn reservoir(mut self, kind: ReservoirKind) -> Self {
        self.reservoir = Some(kind);
        self
    }

    pub fn build(self) -> Histogram {
        assert!(self.max_bins >= 1, "histogram needs at least one bin");
        let kind = self
            .reservoir
            .unwrap_or_else(|| ReservoirKind::default_for(self.max_bins));
        let categories = self.categories.map(|list| Arc::new(CategoryIndex::new(list)));
        let target_type = if categories.is_some() {
            Some(TargetType::Categorical)
        } else if self.group_types.is_some() {
            Some(TargetType::Group)
        } else {
            None
        };
        Histogram {
            max_bins: self.max_bins,
            reservoir: Reservoir::new(kind, self.gap_weighted),
            target_type,
            group_types: self.group_types,
            categories,
            freeze_threshold: self.freeze,
            total_count: 0.0,
            missing_count: 0.0,
            missing_target: None,
            minimum: None,
            maximum: None,
        }
    }
}

/// Snapshot of the missing-value bookkeeping; present iff any missing point
/// was inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingBin<'a> {
    pub count: f64,
    pub target: Option<&'a Target>,
}

impl Histogram {
    pub fn builder() -> HistogramBuilder {
        HistogramBuilder::default()
    }

    pub fn new(max_bins: usize) -> Self {
        Histogram::builder().max_bins(max_bins).build()
    }

    /* ===========================
     * Inserts
     * =========================== */

    /// Inserts a unit-weight point with no target; `None` feeds the
    /// missing-value bookkeeping instead of a bin.
    pub fn insert(&mut self, point: impl Into<Option<f64>>) -> HistogramResult<()> {
        self.check_type(TargetType::None)?;
        self.insert_point_target(point.into(), Target::None)
    }

    /// Inserts a point with a numeric target; either side may be absent.
    pub fn insert_numeric(
        &mut self,
        point: impl Into<Option<f64>>,
        target: impl Into<Option<f64>>,
    ) -> HistogramResult<()> {
        self.check_type(TargetType::Numeric)?;
        let target = target.into();
        if let Some(v) = target {
            ensure_finite(v, "numeric target")?;
        }
        self.insert_point_target(point.into(), Target::Numeric(NumericTarget::new(target)))
    }

    /// Inserts a point with a categorical target; either side may be absent.
    /// With a declared category list the value must be in it.
    pub fn insert_categorical(
        &mut self,
        point: impl Into<Option<f64>>,
        category: Option<&str>,
    ) -> HistogramResult<()> {
        self.check_type(TargetType::Categorical)?;
        let target = match &self.categories {
            Some(index) => {
                Target::CategoricalArray(ArrayCategoricalTarget::new(index.clone(), category)?)
            }
            None => Target::CategoricalMap(MapCategoricalTarget::new(category)),
        };
        self.insert_point_target(point.into(), target)
    }

    /// Inserts a point with a fixed-arity tuple of targets. The first insert
    /// latches the slot types unless they were declared at creation.
    pub fn insert_group(
        &mut self,
        point: impl Into<Option<f64>>,
        values: &[GroupValue],
    ) -> HistogramResult<()> {
        self.check_type(TargetType::Group)?;
        for value in values {
            if let GroupValue::Numeric(v) = value {
                ensure_finite(*v, "group numeric target")?;
            }
        }
        let group = GroupTarget::from_values(values, self.group_types.as_deref())?;
        if self.group_types.is_none() {
            self.group_types = Some(group.child_types());
        }
        self.insert_point_target(point.into(), Target::Group(group))
    }

    /// Merges an externally constructed bin into the reservoir.
    pub fn insert_bin(&mut self, bin: Bin) -> HistogramResult<()> {
        ensure_finite(bin.mean(), "bin mean")?;
        let mut bin = bin;
        self.admit_bin_target(&mut bin)?;
        self.insert_bin_no_compress(bin);
        self.reservoir.merge_down(self.max_bins);
        Ok(())
    }

    fn insert_point_target(&mut self, point: Option<f64>, target: Target) -> HistogramResult<()> {
        match point {
            None => {
                match &mut self.missing_target {
                    Some(t) => t.sum(&target),
                    slot => *slot = Some(target),
                }
                self.missing_count += 1.0;
                self.total_count += 1.0;
                Ok(())
            }
            Some(p) => {
                ensure_finite(p, "point")?;
                self.insert_bin_no_compress(Bin::new(p, 1.0, target));
                self.reservoir.merge_down(self.max_bins);
                Ok(())
            }
        }
    }

    /// Shared bin-insertion path: bookkeeping, then either freeze routing or
    /// a reservoir insert. Merge-down is the caller's step so that merges
    /// can batch it.
    fn insert_bin_no_compress(&mut self, bin: Bin) {
        self.observe(bin.mean());
        self.total_count += bin.count();
        if self.frozen() {
            if let Some(nearest) = self.reservoir.nearest(bin.mean()) {
                self.reservoir.absorb_at(nearest, &bin);
                return;
            }
        }
        self.reservoir.insert(bin);
    }

    /// Latches the histogram's target type from `bin` and reconciles
    /// category lists and group shapes before the bin enters the reservoir.
    fn admit_bin_target(&mut self, bin: &mut Bin) -> HistogramResult<()> {
        self.check_type(bin.target().target_type())?;

        if let Target::CategoricalArray(t) = bin.target() {
            if let Some(index) = &self.categories {
                if !same_index(index, t.index()) {
                    return Err(HistogramError::TypeMismatch {
                        context: "array-backed category lists differ",
                    });
                }
            } else if self.reservoir.is_empty() && self.missing_target.is_none() {
                self.categories = Some(t.index().clone());
            } else {
                return Err(HistogramError::TypeMismatch {
                    context: "cannot adopt a category list into a non-empty histogram",
                });
            }
        } else if let Target::CategoricalMap(_) = bin.target() {
            if self.categories.is_some() {
                return Err(HistogramError::TypeMismatch {
                    context: "array-backed histogram cannot absorb open-vocabulary targets",
                });
            }
        }
        if let Some(index) = self.categories.clone() {
            bin.target_mut().rebind_categories(&index);
        }

        if let Target::Group(g) = bin.target() {
            if let Some(types) = &self.group_types {
                let matches = types.len() == g.children().len()
                    && types
                        .iter()
                        .zip(g.children())
                        .all(|(t, child)| *t == child.target_type());
                if !matches {
                    return Err(HistogramError::TypeMismatch {
                        context: "group shape does not match the histogram",
                    });
                }
            } else {
                self.group_types = Some(g.child_types());
            }
        }
        Ok(())
    }

    /* ===========================
     * Merge
     * =========================== */

    /// Absorbs `other` into `self`. Compatible operands only: matching
    /// latched target types, and for array-backed categorical histograms
    /// identical category lists, unless the receiver is empty, in which
    /// case it adopts the sender's list. A contentless operand merges with
    /// anything.
    pub fn merge(&mut self, other: &Histogram) -> HistogramResult<()> {
        if let (Some(a), Some(b)) = (&self.categories, &other.categories) {
            if !same_index(a, b) {
                return Err(HistogramError::TypeMismatch {
                    context: "merging histograms with different category lists",
                });
            }
        }
        if other.categories.is_some() && self.categories.is_none() {
            if self.reservoir.is_empty() && self.missing_target.is_none() {
                self.categories = other.categories.clone();
            } else {
                return Err(HistogramError::TypeMismatch {
                    context: "cannot adopt a category list into a non-empty histogram",
                });
            }
        }

        if other.total_count == 0.0 && other.reservoir.is_empty() {
            return Ok(());
        }

        if let Some(tt) = other.target_type {
            self.check_type(tt)?;
        }
        if self.categories.is_some()
            && other.categories.is_none()
            && other.target_type == Some(TargetType::Categorical)
        {
            return Err(HistogramError::TypeMismatch {
                context: "array-backed histogram cannot absorb open-vocabulary targets",
            });
        }
        if let (Some(a), Some(b)) = (&self.group_types, &other.group_types) {
            if a != b {
                return Err(HistogramError::TypeMismatch {
                    context: "merging histograms with different group types",
                });
            }
        }
        if self.group_types.is_none() {
            self.group_types = other.group_types.clone();
        }

        self.merge_content(other);
        Ok(())
    }

    /// The structural half of `merge`: compatibility is the caller's
    /// business. Also the `sum` of nested-histogram targets.
    pub(crate) fn merge_content(&mut self, other: &Histogram) {
        let categories = self.categories.clone();
        for bin in other.reservoir.iter() {
            let mut bin = bin.clone();
            if let Some(index) = &categories {
                bin.target_mut().rebind_categories(index);
            }
            self.insert_bin_no_compress(bin);
        }
        self.reservoir.merge_down(self.max_bins);

        if other.missing_count > 0.0 {
            self.missing_count += other.missing_count;
            if let Some(theirs) = &other.missing_target {
                match &mut self.missing_target {
                    Some(t) => t.sum(theirs),
                    slot => *slot = Some(theirs.clone()),
                }
            }
        }

        self.minimum = merge_bound(self.minimum, other.minimum, f64::min);
        self.maximum = merge_bound(self.maximum, other.maximum, f64::max);
        self.total_count = self.reservoir.total_bin_count() + self.missing_count;
    }

    /// Multiplies every count in the histogram (bins, missing, totals) by
    /// `factor`. Used by the target algebra's `scale` on nested histograms.
    pub(crate) fn scale_counts(&mut self, factor: f64) {
        self.reservoir.scale_counts(factor);
        self.missing_count *= factor;
        if let Some(t) = &mut self.missing_target {
            t.scale(factor);
        }
        self.total_count = self.reservoir.total_bin_count() + self.missing_count;
    }

    /* ===========================
     * Accessors
     * =========================== */

    /// Points plus missing inserts.
    #[inline]
    pub fn total_count(&self) -> f64 {
        self.total_count
    }

    #[inline]
    pub fn missing_count(&self) -> f64 {
        self.missing_count
    }

    #[inline]
    pub fn minimum(&self) -> Option<f64> {
        self.minimum
    }

    #[inline]
    pub fn maximum(&self) -> Option<f64> {
        self.maximum
    }

    #[inline]
    pub fn max_bins(&self) -> usize {
        self.max_bins
    }

    #[inline]
    pub fn gap_weighted(&self) -> bool {
        self.reservoir.gap_weighted()
    }

    #[inline]
    pub fn reservoir_kind(&self) -> ReservoirKind {
        self.reservoir.kind()
    }

    #[inline]
    pub fn freeze_threshold(&self) -> Option<u64> {
        self.freeze_threshold
    }

    /// The latched target type, if any insert (or creation option) fixed it.
    #[inline]
    pub fn target_type(&self) -> Option<TargetType> {
        self.target_type
    }

    #[inline]
    pub fn group_types(&self) -> Option<&[TargetType]> {
        self.group_types.as_deref()
    }

    #[inline]
    pub fn categories(&self) -> Option<&[String]> {
        self.categories.as_ref().map(|i| i.categories())
    }

    /// `true` when the histogram holds no bins. Missing-only histograms are
    /// empty in this sense: there is nothing to interpolate over.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reservoir.is_empty()
    }

    /// Bins in mean order.
    #[inline]
    pub fn bins(&self) -> BinIter<'_> {
        self.reservoir.iter()
    }

    #[inline]
    pub fn bin_count(&self) -> usize {
        self.reservoir.len()
    }

    pub fn missing_bin(&self) -> Option<MissingBin<'_>> {
        (self.missing_count > 0.0).then(|| MissingBin {
            count: self.missing_count,
            target: self.missing_target.as_ref(),
        })
    }

    /// Sum of every bin's target, shaped like the histogram's target type.
    pub fn total_target_sum(&self) -> Target {
        let mut acc = self.init_target();
        for bin in self.reservoir.iter() {
            acc.sum(bin.target());
        }
        acc
    }

    /* ===========================
     * Internals shared by the query modules
     * =========================== */

    #[inline]
    pub(crate) fn reservoir(&self) -> &Reservoir {
        &self.reservoir
    }

    /// An empty target shaped like this histogram's target type.
    pub(crate) fn init_target(&self) -> Target {
        if let Some(bin) = self.reservoir.first() {
            return bin.target().init();
        }
        match self.target_type {
            Some(TargetType::Numeric) => Target::Numeric(NumericTarget::new(Some(0.0))),
            Some(TargetType::Categorical) => match &self.categories {
                Some(index) => {
                    Target::CategoricalArray(ArrayCategoricalTarget::empty(index.clone()))
                }
                None => Target::CategoricalMap(MapCategoricalTarget::from_counts(
                    Default::default(),
                    0.0,
                )),
            },
            Some(TargetType::Group) => match &self.group_types {
                Some(types) => Target::Group(GroupTarget::new(
                    types
                        .iter()
                        .map(|t| match t {
                            TargetType::Numeric => Target::Numeric(NumericTarget::new(Some(0.0))),
                            TargetType::Categorical => Target::CategoricalMap(
                                MapCategoricalTarget::from_counts(Default::default(), 0.0),
                            ),
                            _ => Target::None,
                        })
                        .collect(),
                )),
                None => Target::None,
            },
            Some(TargetType::Histogram) => {
                Target::Histogram(HistogramTarget::new(Histogram::new(self.max_bins)))
            }
            Some(TargetType::None) | None => Target::None,
        }
    }

    pub(crate) fn shared_categories(&self) -> Option<&Arc<CategoryIndex>> {
        self.categories.as_ref()
    }

    fn check_type(&mut self, incoming: TargetType) -> HistogramResult<()> {
        match self.target_type {
            None => {
                self.target_type = Some(incoming);
                Ok(())
            }
            Some(current) if current == incoming => Ok(()),
            Some(_) => Err(HistogramError::TypeMismatch {
                context: "histogram target type is already latched",
            }),
        }
    }

    fn observe(&mut self, mean: f64) {
        self.minimum = Some(match self.minimum {
            Some(m) => m.min(mean),
            None => mean,
        });
        self.maximum = Some(match self.maximum {
            Some(m) => m.max(mean),
            None => mean,
        });
    }

    /// Freeze kicks in only once the reservoir is at capacity and total
    /// inserts exceed the threshold.
    fn frozen(&self) -> bool {
        match self.freeze_threshold {
            Some(threshold) => {
                self.total_count > threshold as f64 && self.reservoir.len() == self.max_bins
            }
            None => false,
        }
    }

    /// Wire decode sets these from the record after reinserting bins; the
    /// recorded extremes are at least as wide as the bin means.
    pub(crate) fn restore_bounds(&mut self, minimum: Option<f64>, maximum: Option<f64>) {
        if minimum.is_some() {
            self.minimum = minimum;
        }
        if maximum.is_some() {
            self.maximum = maximum;
        }
    }

    pub(crate) fn restore_missing(&mut self, count: f64, target: Option<Target>) {
        self.missing_count = count;
        self.total_count += count;
        if self.target_type.is_none() {
            if let Some(t) = &target {
                self.target_type = Some(t.target_type());
            }
        }
        self.missing_target = target;
    }
}

impl PartialEq for Histogram {
    fn eq(&self, other: &Self) -> bool {
        self.max_bins == other.max_bins
            && self.gap_weighted() == other.gap_weighted()
            && self.freeze_threshold == other.freeze_threshold
            && self.target_type == other.target_type
            && self.group_types == other.group_types
            && self.categories.as_deref() == other.categories.as_deref()
            && self.total_count == other.total_count
            && self.missing_count == other.missing_count
            && self.missing_target == other.missing_target
            && self.minimum == other.minimum
            && self.maximum == other.maximum
            && self.reservoir.iter().eq(other.reservoir.iter())
    }
}

#[inline]
fn ensure_finite(value: f64, context: &'static str) -> HistogramResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(HistogramError::NonFiniteInput { context })
    }
}

fn merge_bound(a: Option<f64>, b: Option<f64>, pick: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}
