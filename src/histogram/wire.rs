// src/histogram/wire.rs
//
// Canonical record form of a histogram.
//
// Layout (map keys, absent when empty/false):
//
//   max_bins     : integer >= 1
//   gap_weighted : bool, present iff true
//   freeze       : integer threshold
//   group_types  : ["none" | "numeric" | "categorical", ...]
//   categories   : [category, ...] for array-backed categorical targets
//   bins         : [{mean, count, target?}, ...] in mean order
//   missing_bin  : {count, target?}, present iff missing points were seen
//   minimum      : smallest observed finite point
//   maximum      : largest observed finite point
//
// Targets:
//   numeric      -> {sum, sum_squares, missing_count}
//   categorical  -> {counts: {category: count}, missing_count}
//                   (map- and array-backed share this form)
//   group        -> [child | null, ...] (null for a no-target slot)
//   nested hist  -> [{mean, count}, ...] (the inner histogram's bins)
//
// Decoding accepts exactly this record and rebuilds a histogram whose
// queries reproduce the original bitwise.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{HistogramError, HistogramResult};
use crate::histogram::bin::Bin;
use crate::histogram::target::{
    ArrayCategoricalTarget, CategoryIndex, GroupTarget, HistogramTarget, MapCategoricalTarget,
    NumericTarget, Target, TargetType,
};
use crate::histogram::Histogram;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramRecord {
    pub max_bins: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub gap_weighted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_types: Option<Vec<TargetType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    pub bins: Vec<BinRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_bin: Option<MissingRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinRecord {
    pub mean: f64,
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRecord {
    pub count: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRecord>,
}

/// Self-describing wire form of a target. Variant order matters: untagged
/// decoding tries top to bottom, and only `counts` distinguishes the
/// categorical map from a numeric record with absent sums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetRecord {
    Categorical {
        counts: BTreeMap<String, f64>,
        missing_count: f64,
    },
    Numeric {
        #[serde(default)]
        sum: Option<f64>,
        #[serde(default)]
        sum_squares: Option<f64>,
        missing_count: f64,
    },
    Group(Vec<Option<TargetRecord>>),
    Histogram(Vec<BinRecord>),
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Histogram {
    /// The canonical record of this histogram.
    pub fn to_record(&self) -> HistogramRecord {
        HistogramRecord {
            max_bins: self.max_bins(),
            gap_weighted: self.gap_weighted(),
            freeze: self.freeze_threshold(),
            group_types: self.group_types().map(<[TargetType]>::to_vec),
            categories: self.categories().map(<[String]>::to_vec),
            bins: self.bins().map(bin_record).collect(),
            missing_bin: self.missing_bin().map(|missing| MissingRecord {
                count: missing.count,
                target: missing.target.and_then(target_record),
            }),
            minimum: self.minimum(),
            maximum: self.maximum(),
        }
    }

    /// Inverse constructor: accepts exactly the record `to_record` emits.
    pub fn from_record(record: &HistogramRecord) -> HistogramResult<Histogram> {
        if record.max_bins < 1 {
            return Err(HistogramError::OutOfRange {
                context: "max_bins must be at least 1",
            });
        }

        let mut builder = Histogram::builder()
            .max_bins(record.max_bins)
            .gap_weighted(record.gap_weighted);
        if let Some(threshold) = record.freeze {
            builder = builder.freeze(threshold);
        }
        if let Some(categories) = &record.categories {
            builder = builder.categories(categories.iter().cloned());
        }
        if let Some(group_types) = &record.group_types {
            builder = builder.group_types(group_types.clone());
        }
        let mut histogram = builder.build();

        let index = histogram.shared_categories().cloned();
        for bin in &record.bins {
            let target = match &bin.target {
                Some(record_target) => decode_target(
                    record_target,
                    index.as_ref(),
                    record.group_types.as_deref(),
                    record.max_bins,
                )?,
                None => Target::None,
            };
            histogram.insert_bin(Bin::new(bin.mean, bin.count, target))?;
        }

        if let Some(missing) = &record.missing_bin {
            let target = match &missing.target {
                Some(record_target) => decode_target(
                    record_target,
                    index.as_ref(),
                    record.group_types.as_deref(),
                    record.max_bins,
                )?,
                None => histogram.init_target(),
            };
            histogram.restore_missing(missing.count, Some(target));
        }

        histogram.restore_bounds(record.minimum, record.maximum);
        Ok(histogram)
    }
}

fn bin_record(bin: &Bin) -> BinRecord {
    BinRecord {
        mean: bin.mean(),
        count: bin.count(),
        target: target_record(bin.target()),
    }
}

fn target_record(target: &Target) -> Option<TargetRecord> {
    match target {
        Target::None => None,
        Target::Numeric(t) => Some(TargetRecord::Numeric {
            sum: t.sum_value(),
            sum_squares: t.sum_squares(),
            missing_count: t.missing_count(),
        }),
        Target::CategoricalMap(t) => Some(TargetRecord::Categorical {
            counts: t.counts().clone(),
            missing_count: t.missing_count(),
        }),
        Target::CategoricalArray(t) => Some(TargetRecord::Categorical {
            counts: t.counts(),
            missing_count: t.missing_count(),
        }),
        Target::Group(t) => Some(TargetRecord::Group(
            t.children().iter().map(target_record).collect(),
        )),
        Target::Histogram(t) => Some(TargetRecord::Histogram(
            t.histogram().bins().map(bin_record).collect(),
        )),
    }
}

fn decode_target(
    record: &TargetRecord,
    index: Option<&Arc<CategoryIndex>>,
    group_types: Option<&[TargetType]>,
    max_bins: usize,
) -> HistogramResult<Target> {
    match record {
        TargetRecord::Numeric {
            sum,
            sum_squares,
            missing_count,
        } => Ok(Target::Numeric(NumericTarget::from_parts(
            *sum,
            *sum_squares,
            *missing_count,
        ))),
        TargetRecord::Categorical {
            counts,
            missing_count,
        } => match index {
            Some(index) => {
                let mut dense = vec![0.0; index.len()];
                for (category, count) in counts {
                    let Some(position) = index.position(category) else {
                        return Err(HistogramError::UnknownCategory {
                            category: category.clone(),
                        });
                    };
                    dense[position] = *count;
                }
                Ok(Target::CategoricalArray(ArrayCategoricalTarget::from_parts(
                    index.clone(),
                    dense,
                    *missing_count,
                )?))
            }
            None => Ok(Target::CategoricalMap(MapCategoricalTarget::from_counts(
                counts.clone(),
                *missing_count,
            ))),
        },
        TargetRecord::Group(children) => {
            if let Some(types) = group_types {
                if types.len() != children.len() {
                    return Err(HistogramError::TypeMismatch {
                        context: "group record arity does not match group_types",
                    });
                }
            }
            let mut targets = Vec::with_capacity(children.len());
            for (slot, child) in children.iter().enumerate() {
                let target = match child {
                    Some(record_child) => decode_target(record_child, None, None, max_bins)?,
                    None => Target::None,
                };
                if let Some(declared) = group_types.and_then(|types| types.get(slot)) {
                    if *declared != target.target_type() {
                        return Err(HistogramError::TypeMismatch {
                            context: "group record child does not match its declared type",
                        });
                    }
                }
                targets.push(target);
            }
            Ok(Target::Group(GroupTarget::new(targets)))
        }
        TargetRecord::Histogram(bins) => {
            let mut inner = Histogram::new(max_bins);
            for bin in bins {
                if bin.target.is_some() {
                    return Err(HistogramError::TypeMismatch {
                        context: "nested histogram bins carry no targets",
                    });
                }
                inner.insert_bin(Bin::new(bin.mean, bin.count, Target::None))?;
            }
            Ok(Target::Histogram(HistogramTarget::new(inner)))
        }
    }
}

impl Serialize for Histogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Histogram {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = HistogramRecord::deserialize(deserializer)?;
        Histogram::from_record(&record).map_err(serde::de::Error::custom)
    }
}
