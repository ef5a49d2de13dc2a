// src/error.rs
use core::fmt;

/// Library-wide error for streamhist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistogramError {
    /// Insert or merge attempted with an incompatible target type: a second
    /// target kind on a latched histogram, a group arity mismatch, or
    /// array-backed categorical histograms with different category lists.
    TypeMismatch { context: &'static str },

    /// Categorical insert with a value outside the declared category list.
    UnknownCategory { category: String },

    /// `sum` / `extended_sum` / `average_target` on a histogram with no bins.
    Empty { operation: &'static str },

    /// Strict-range violation. The default `sum` clamps at
    /// `[minimum, maximum]`; this kind is raised only for probes that cannot
    /// be clamped (NaN) and for malformed serialized records.
    OutOfRange { context: &'static str },

    /// Attempt to accumulate two bins with different means. Internal; a
    /// correct caller never sees this.
    BinUpdate { context: &'static str },

    /// User tried to insert NaN/±inf as a point or numeric target.
    /// `context` pinpoints where it came from (e.g. "point", "numeric target").
    NonFiniteInput { context: &'static str },
}

impl fmt::Display for HistogramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistogramError::TypeMismatch { context } => write!(
                f,
                "histogram: mixed target types are not allowed ({}). \
hint: one histogram holds one target kind; build a fresh histogram for the other kind",
                context
            ),
            HistogramError::UnknownCategory { category } => write!(
                f,
                "histogram: category {:?} is not in the declared category list. \
hint: declare every category at creation, or omit the list for an open vocabulary",
                category
            ),
            HistogramError::Empty { operation } => {
                write!(f, "histogram: {} requires at least one bin", operation)
            }
            HistogramError::OutOfRange { context } => {
                write!(f, "histogram: probe out of range ({})", context)
            }
            HistogramError::BinUpdate { context } => write!(
                f,
                "histogram: bins must have matching means to accumulate ({})",
                context
            ),
            HistogramError::NonFiniteInput { context } => write!(
                f,
                "histogram: non-finite values are not allowed ({}). \
hint: drop NaN/±inf before inserting, or insert the point as missing",
                context
            ),
        }
    }
}

impl std::error::Error for HistogramError {}

pub type HistogramResult<T> = Result<T, HistogramError>;
