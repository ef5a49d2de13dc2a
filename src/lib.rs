//! Streaming histogram after the Ben-Haim / Tyree "Streaming Parallel
//! Decision Tree" construction: a bounded-memory, single-pass approximation
//! of a one-dimensional distribution, with per-bin target summaries,
//! mergeable across partitions, answering approximate cumulative sums,
//! densities, equi-population split points and percentiles.

pub mod error;
pub mod histogram;

pub use error::{HistogramError, HistogramResult};
pub use histogram::{
    Bin, GroupValue, Histogram, HistogramBuilder, MissingBin, ReservoirKind, SumResult, Target,
    TargetType,
};
