//! Per-bin target summaries.
//!
//! Every bin carries a `Target`: a summary of the auxiliary variable for the
//! points that landed in the bin. The variants share a small algebra of
//! `init` (empty of the same shape), `sum` (in-place addition) and `scale`
//! (in-place multiplication of every stored aggregate) that the histogram
//! applies component-wise during combines, sums and density queries.
//!
//! One histogram holds exactly one target kind; the kind is either declared
//! at creation (`categories` / `group_types`) or latched on first insert.
//! Cross-variant `sum` is a programming bug, not a recoverable condition.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{HistogramError, HistogramResult};
use crate::histogram::Histogram;

/// The kind of target a histogram holds.
///
/// `Categorical` covers both the open-vocabulary map form and the
/// array-backed form; which one applies is decided by whether the histogram
/// declares a category list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    None,
    Numeric,
    Categorical,
    Group,
    Histogram,
}

/// One element of a group insert.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupValue {
    Missing,
    Numeric(f64),
    Categorical(String),
}

/// Ordered category list with reverse lookup, shared by every array-backed
/// target of one histogram.
#[derive(Debug)]
pub struct CategoryIndex {
    categories: Vec<String>,
    positions: HashMap<String, usize>,
}

impl CategoryIndex {
    /// Builds the index, keeping first occurrence order and dropping
    /// duplicates.
    pub fn new<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<String> = Vec::new();
        let mut positions = HashMap::new();
        for category in categories {
            let category = category.into();
            if !positions.contains_key(&category) {
                positions.insert(category.clone(), list.len());
                list.push(category);
            }
        }
        CategoryIndex {
            categories: list,
            positions,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    #[inline]
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    #[inline]
    pub fn position(&self, category: &str) -> Option<usize> {
        self.positions.get(category).copied()
    }
}

impl PartialEq for CategoryIndex {
    fn eq(&self, other: &Self) -> bool {
        self.categories == other.categories
    }
}

/// `true` when two shared indices describe the same vocabulary.
pub(crate) fn same_index(a: &Arc<CategoryIndex>, b: &Arc<CategoryIndex>) -> bool {
    Arc::ptr_eq(a, b) || a == b
}

/// Sum of targets and sum of squared targets, with a count of points whose
/// target was absent. `sum` stays `None` until the first present value so a
/// missing-only summary round-trips as such.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericTarget {
    sum: Option<f64>,
    sum_squares: Option<f64>,
    missing_count: f64,
}

impl NumericTarget {
    pub fn new(value: Option<f64>) -> Self {
        match value {
            Some(v) => NumericTarget {
                sum: Some(v),
                sum_squares: Some(v * v),
                missing_count: 0.0,
            },
            None => NumericTarget {
                sum: None,
                sum_squares: None,
                missing_count: 1.0,
            },
        }
    }

    pub fn from_parts(sum: Option<f64>, sum_squares: Option<f64>, missing_count: f64) -> Self {
        NumericTarget {
            sum,
            sum_squares,
            missing_count,
        }
    }

    #[inline]
    pub fn sum_value(&self) -> Option<f64> {
        self.sum
    }

    #[inline]
    pub fn sum_squares(&self) -> Option<f64> {
        self.sum_squares
    }

    #[inline]
    pub fn missing_count(&self) -> f64 {
        self.missing_count
    }

    fn empty() -> Self {
        NumericTarget {
            sum: Some(0.0),
            sum_squares: Some(0.0),
            missing_count: 0.0,
        }
    }

    fn add(&mut self, other: &NumericTarget) {
        match (self.sum, other.sum) {
            (None, Some(_)) => {
                self.sum = other.sum;
                self.sum_squares = other.sum_squares;
            }
            (Some(a), Some(b)) => {
                self.sum = Some(a + b);
                self.sum_squares =
                    Some(self.sum_squares.unwrap_or(0.0) + other.sum_squares.unwrap_or(0.0));
            }
            _ => {}
        }
        self.missing_count += other.missing_count;
    }

    fn scale(&mut self, factor: f64) {
        if let Some(s) = self.sum.as_mut() {
            *s *= factor;
        }
        if let Some(s) = self.sum_squares.as_mut() {
            *s *= factor;
        }
        self.missing_count *= factor;
    }
}

/// Open-vocabulary category weights.
#[derive(Debug, Clone, PartialEq)]
pub struct MapCategoricalTarget {
    counts: BTreeMap<String, f64>,
    missing_count: f64,
}

impl MapCategoricalTarget {
    pub fn new(category: Option<&str>) -> Self {
        let mut counts = BTreeMap::new();
        let mut missing_count = 0.0;
        match category {
            Some(c) => {
                counts.insert(c.to_string(), 1.0);
            }
            None => missing_count = 1.0,
        }
        MapCategoricalTarget {
            counts,
            missing_count,
        }
    }

    pub fn from_counts(counts: BTreeMap<String, f64>, missing_count: f64) -> Self {
        MapCategoricalTarget {
            counts,
            missing_count,
        }
    }

    #[inline]
    pub fn counts(&self) -> &BTreeMap<String, f64> {
        &self.counts
    }

    #[inline]
    pub fn missing_count(&self) -> f64 {
        self.missing_count
    }

    fn empty() -> Self {
        MapCategoricalTarget {
            counts: BTreeMap::new(),
            missing_count: 0.0,
        }
    }

    fn add(&mut self, other: &MapCategoricalTarget) {
        for (category, count) in &other.counts {
            *self.counts.entry(category.clone()).or_insert(0.0) += count;
        }
        self.missing_count += other.missing_count;
    }

    fn scale(&mut self, factor: f64) {
        for count in self.counts.values_mut() {
            *count *= factor;
        }
        self.missing_count *= factor;
    }
}

/// Closed-vocabulary category weights over a shared `CategoryIndex`.
/// Merging two of these is a dense vector add when the lists match.
#[derive(Debug, Clone)]
pub struct ArrayCategoricalTarget {
    index: Arc<CategoryIndex>,
    counts: Vec<f64>,
    missing_count: f64,
}

impl ArrayCategoricalTarget {
    pub fn new(index: Arc<CategoryIndex>, category: Option<&str>) -> HistogramResult<Self> {
        let mut target = Self::empty(index);
        match category {
            Some(c) => {
                let position =
                    target
                        .index
                        .position(c)
                        .ok_or_else(|| HistogramError::UnknownCategory {
                            category: c.to_string(),
                        })?;
                target.counts[position] += 1.0;
            }
            None => target.missing_count = 1.0,
        }
        Ok(target)
    }

    pub fn empty(index: Arc<CategoryIndex>) -> Self {
        let counts = vec![0.0; index.len()];
        ArrayCategoricalTarget {
            index,
            counts,
            missing_count: 0.0,
        }
    }

    pub fn from_parts(
        index: Arc<CategoryIndex>,
        counts: Vec<f64>,
        missing_count: f64,
    ) -> HistogramResult<Self> {
        if counts.len() != index.len() {
            return Err(HistogramError::TypeMismatch {
                context: "categorical counts do not match the category list",
            });
        }
        Ok(ArrayCategoricalTarget {
            index,
            counts,
            missing_count,
        })
    }

    #[inline]
    pub fn index(&self) -> &Arc<CategoryIndex> {
        &self.index
    }

    #[inline]
    pub fn dense_counts(&self) -> &[f64] {
        &self.counts
    }

    #[inline]
    pub fn missing_count(&self) -> f64 {
        self.missing_count
    }

    /// Counts keyed by category, in declared order.
    pub fn counts(&self) -> BTreeMap<String, f64> {
        self.index
            .categories()
            .iter()
            .zip(&self.counts)
            .map(|(category, count)| (category.clone(), *count))
            .collect()
    }

    /// Points the target at the receiving histogram's shared index after a
    /// merge. Lists were already checked equal.
    pub(crate) fn set_index(&mut self, index: Arc<CategoryIndex>) {
        debug_assert!(same_index(&self.index, &index));
        self.index = index;
    }

    fn add(&mut self, other: &ArrayCategoricalTarget) {
        debug_assert!(same_index(&self.index, &other.index));
        debug_assert_eq!(self.counts.len(), other.counts.len());
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        self.missing_count += other.missing_count;
    }

    fn scale(&mut self, factor: f64) {
        for count in &mut self.counts {
            *count *= factor;
        }
        self.missing_count *= factor;
    }
}

impl PartialEq for ArrayCategoricalTarget {
    fn eq(&self, other: &Self) -> bool {
        same_index(&self.index, &other.index)
            && self.counts == other.counts
            && self.missing_count == other.missing_count
    }
}

/// Fixed-arity tuple of targets with element-wise algebra.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTarget {
    children: Vec<Target>,
}

impl GroupTarget {
    pub fn new(children: Vec<Target>) -> Self {
        GroupTarget { children }
    }

    /// Builds a group target from raw values. With declared `types`, each
    /// slot is coerced to its type (`none` slots ignore the value); without,
    /// numbers become numeric and everything else map-categorical, and the
    /// caller latches the inferred types.
    pub fn from_values(
        values: &[GroupValue],
        types: Option<&[TargetType]>,
    ) -> HistogramResult<Self> {
        if let Some(types) = types {
            if types.len() != values.len() {
                return Err(HistogramError::TypeMismatch {
                    context: "group arity does not match the declared group types",
                });
            }
            let mut children = Vec::with_capacity(values.len());
            for (value, kind) in values.iter().zip(types) {
                children.push(match (kind, value) {
                    (TargetType::None, _) => Target::None,
                    (TargetType::Numeric, GroupValue::Numeric(v)) => {
                        Target::Numeric(NumericTarget::new(Some(*v)))
                    }
                    (TargetType::Numeric, GroupValue::Missing) => {
                        Target::Numeric(NumericTarget::new(None))
                    }
                    (TargetType::Categorical, GroupValue::Categorical(c)) => {
                        Target::CategoricalMap(MapCategoricalTarget::new(Some(c.as_str())))
                    }
                    (TargetType::Categorical, GroupValue::Missing) => {
                        Target::CategoricalMap(MapCategoricalTarget::new(None))
                    }
                    _ => {
                        return Err(HistogramError::TypeMismatch {
                            context: "group element does not match its declared type",
                        })
                    }
                });
            }
            Ok(GroupTarget { children })
        } else {
            let children = values
                .iter()
                .map(|value| match value {
                    GroupValue::Numeric(v) => Target::Numeric(NumericTarget::new(Some(*v))),
                    GroupValue::Categorical(c) => {
                        Target::CategoricalMap(MapCategoricalTarget::new(Some(c.as_str())))
                    }
                    GroupValue::Missing => Target::CategoricalMap(MapCategoricalTarget::new(None)),
                })
                .collect();
            Ok(GroupTarget { children })
        }
    }

    #[inline]
    pub fn children(&self) -> &[Target] {
        &self.children
    }

    pub fn child_types(&self) -> Vec<TargetType> {
        self.children.iter().map(Target::target_type).collect()
    }
}

/// Nested histogram used as a target by the 2-D composition; the inner
/// histogram carries no targets of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramTarget {
    histogram: Box<Histogram>,
}

impl HistogramTarget {
    pub fn new(histogram: Histogram) -> Self {
        HistogramTarget {
            histogram: Box::new(histogram),
        }
    }

    #[inline]
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }
}

/// Tagged per-bin summary. See the module docs for the algebra.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    None,
    Numeric(NumericTarget),
    CategoricalMap(MapCategoricalTarget),
    CategoricalArray(ArrayCategoricalTarget),
    Group(GroupTarget),
    Histogram(HistogramTarget),
}

impl Target {
    pub fn target_type(&self) -> TargetType {
        match self {
            Target::None => TargetType::None,
            Target::Numeric(_) => TargetType::Numeric,
            Target::CategoricalMap(_) | Target::CategoricalArray(_) => TargetType::Categorical,
            Target::Group(_) => TargetType::Group,
            Target::Histogram(_) => TargetType::Histogram,
        }
    }

    /// An empty summary of the same shape: same variant, same category
    /// index, same group arity.
    pub fn init(&self) -> Target {
        match self {
            Target::None => Target::None,
            Target::Numeric(_) => Target::Numeric(NumericTarget::empty()),
            Target::CategoricalMap(_) => Target::CategoricalMap(MapCategoricalTarget::empty()),
            Target::CategoricalArray(t) => {
                Target::CategoricalArray(ArrayCategoricalTarget::empty(t.index.clone()))
            }
            Target::Group(t) => {
                Target::Group(GroupTarget::new(t.children.iter().map(Target::init).collect()))
            }
            Target::Histogram(t) => Target::Histogram(HistogramTarget::new(
                Histogram::new(t.histogram.max_bins()),
            )),
        }
    }

    /// In-place addition. Both operands must hold the same variant; the
    /// histogram boundary guarantees that, so a mismatch here is a bug.
    pub fn sum(&mut self, other: &Target) {
        match (self, other) {
            (Target::None, Target::None) => {}
            (Target::Numeric(a), Target::Numeric(b)) => a.add(b),
            (Target::CategoricalMap(a), Target::CategoricalMap(b)) => a.add(b),
            (Target::CategoricalArray(a), Target::CategoricalArray(b)) => a.add(b),
            (Target::Group(a), Target::Group(b)) => {
                debug_assert_eq!(a.children.len(), b.children.len());
                for (mine, theirs) in a.children.iter_mut().zip(&b.children) {
                    mine.sum(theirs);
                }
            }
            (Target::Histogram(a), Target::Histogram(b)) => {
                a.histogram.merge_content(&b.histogram);
            }
            _ => unreachable!("mismatched target variants in sum"),
        }
    }

    /// In-place multiplication of every stored aggregate, missing counts
    /// included. For nested histograms this rescales every inner bin count.
    pub fn scale(&mut self, factor: f64) {
        match self {
            Target::None => {}
            Target::Numeric(t) => t.scale(factor),
            Target::CategoricalMap(t) => t.scale(factor),
            Target::CategoricalArray(t) => t.scale(factor),
            Target::Group(t) => {
                for child in &mut t.children {
                    child.scale(factor);
                }
            }
            Target::Histogram(t) => t.histogram.scale_counts(factor),
        }
    }

    /// Count of points whose target value was absent. Group children track
    /// their own.
    pub fn missing_count(&self) -> f64 {
        match self {
            Target::None | Target::Group(_) => 0.0,
            Target::Numeric(t) => t.missing_count,
            Target::CategoricalMap(t) => t.missing_count,
            Target::CategoricalArray(t) => t.missing_count,
            Target::Histogram(t) => t.histogram.missing_count(),
        }
    }

    /// Rebinds array-backed targets onto the receiver's shared index after a
    /// merge.
    pub(crate) fn rebind_categories(&mut self, index: &Arc<CategoryIndex>) {
        if let Target::CategoricalArray(t) = self {
            t.set_index(index.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_adopts_then_adds() {
        let mut acc = NumericTarget::new(None);
        assert_eq!(acc.sum_value(), None);
        assert_eq!(acc.missing_count(), 1.0);

        acc.add(&NumericTarget::new(Some(3.0)));
        assert_eq!(acc.sum_value(), Some(3.0));
        assert_eq!(acc.sum_squares(), Some(9.0));
        assert_eq!(acc.missing_count(), 1.0);

        acc.add(&NumericTarget::new(Some(2.0)));
        assert_eq!(acc.sum_value(), Some(5.0));
        assert_eq!(acc.sum_squares(), Some(13.0));
    }

    #[test]
    fn numeric_scale_includes_missing() {
        let mut t = NumericTarget::from_parts(Some(4.0), Some(16.0), 2.0);
        t.scale(0.5);
        assert_eq!(t.sum_value(), Some(2.0));
        assert_eq!(t.sum_squares(), Some(8.0));
        assert_eq!(t.missing_count(), 1.0);
    }

    #[test]
    fn map_categorical_accumulates_open_vocabulary() {
        let mut t = MapCategoricalTarget::new(Some("red"));
        t.add(&MapCategoricalTarget::new(Some("blue")));
        t.add(&MapCategoricalTarget::new(Some("red")));
        t.add(&MapCategoricalTarget::new(None));

        assert_eq!(t.counts().get("red"), Some(&2.0));
        assert_eq!(t.counts().get("blue"), Some(&1.0));
        assert_eq!(t.missing_count(), 1.0);
    }

    #[test]
    fn array_categorical_rejects_unknown_and_adds_dense() {
        let index = Arc::new(CategoryIndex::new(["foo", "bar"]));

        let err = ArrayCategoricalTarget::new(index.clone(), Some("baz")).unwrap_err();
        assert!(matches!(err, HistogramError::UnknownCategory { .. }));

        let mut t = ArrayCategoricalTarget::new(index.clone(), Some("foo")).unwrap();
        t.add(&ArrayCategoricalTarget::new(index.clone(), Some("bar")).unwrap());
        t.add(&ArrayCategoricalTarget::new(index, None).unwrap());
        assert_eq!(t.dense_counts(), &[1.0, 1.0]);
        assert_eq!(t.missing_count(), 1.0);
    }

    #[test]
    fn category_index_dedups_preserving_order() {
        let index = CategoryIndex::new(["a", "b", "a", "c"]);
        assert_eq!(index.categories(), &["a", "b", "c"]);
        assert_eq!(index.position("c"), Some(2));
        assert_eq!(index.position("z"), None);
    }

    #[test]
    fn group_infers_types_from_values() {
        let group = GroupTarget::from_values(
            &[
                GroupValue::Numeric(1.5),
                GroupValue::Categorical("x".into()),
                GroupValue::Missing,
            ],
            None,
        )
        .unwrap();

        assert_eq!(
            group.child_types(),
            vec![
                TargetType::Numeric,
                TargetType::Categorical,
                TargetType::Categorical
            ]
        );
    }

    #[test]
    fn group_enforces_declared_types_and_arity() {
        let types = [TargetType::Numeric, TargetType::Categorical];

        let err = GroupTarget::from_values(&[GroupValue::Numeric(1.0)], Some(&types)).unwrap_err();
        assert!(matches!(err, HistogramError::TypeMismatch { .. }));

        let err = GroupTarget::from_values(
            &[GroupValue::Categorical("x".into()), GroupValue::Missing],
            Some(&types),
        )
        .unwrap_err();
        assert!(matches!(err, HistogramError::TypeMismatch { .. }));

        let ok = GroupTarget::from_values(
            &[GroupValue::Missing, GroupValue::Categorical("x".into())],
            Some(&types),
        )
        .unwrap();
        assert_eq!(ok.children().len(), 2);
    }

    #[test]
    fn group_sum_is_element_wise() {
        let types = [TargetType::Numeric, TargetType::Categorical];
        let mut a = Target::Group(
            GroupTarget::from_values(
                &[GroupValue::Numeric(2.0), GroupValue::Categorical("x".into())],
                Some(&types),
            )
            .unwrap(),
        );
        let b = Target::Group(
            GroupTarget::from_values(
                &[GroupValue::Numeric(3.0), GroupValue::Categorical("y".into())],
                Some(&types),
            )
            .unwrap(),
        );
        a.sum(&b);

        let Target::Group(group) = &a else {
            panic!("expected group");
        };
        let Target::Numeric(n) = &group.children()[0] else {
            panic!("expected numeric child");
        };
        assert_eq!(n.sum_value(), Some(5.0));
        let Target::CategoricalMap(c) = &group.children()[1] else {
            panic!("expected categorical child");
        };
        assert_eq!(c.counts().len(), 2);
    }

    #[test]
    fn init_preserves_shape() {
        let index = Arc::new(CategoryIndex::new(["foo", "bar"]));
        let t = Target::CategoricalArray(
            ArrayCategoricalTarget::new(index, Some("foo")).unwrap(),
        );
        let empty = t.init();
        let Target::CategoricalArray(e) = &empty else {
            panic!("expected array categorical");
        };
        assert_eq!(e.dense_counts(), &[0.0, 0.0]);
    }
}
