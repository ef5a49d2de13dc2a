use crate::histogram::Histogram;

pub fn assert_exact(label: &str, expected: f64, got: f64) {
    assert!(
        expected == got,
        "{}: expected exactly {:.9}, got {:.9}",
        label,
        expected,
        got
    );
}

pub fn assert_rel_close(label: &str, expected: f64, got: f64, rtol: f64) {
    let denom = expected.abs().max(1e-300);
    let rel = ((expected - got).abs()) / denom;
    assert!(
        rel < rtol,
        "{}: expected ~= {:.9}, got {:.9}, rel_err={:.6e}, rtol={:.6e}",
        label,
        expected,
        got,
        rel,
        rtol
    );
}

pub fn assert_abs_close(label: &str, expected: f64, got: f64, atol: f64) {
    let abs = (expected - got).abs();
    assert!(
        abs <= atol,
        "{}: expected ~= {:.9}, got {:.9}, abs_err={:.6e}, atol={:.6e}",
        label,
        expected,
        got,
        abs,
        atol
    );
}

pub fn assert_monotone_chain(label: &str, values: &[f64]) {
    for i in 1..values.len() {
        assert!(
            values[i] >= values[i - 1],
            "{}: non-monotone at i={}: {} < {}",
            label,
            i,
            values[i],
            values[i - 1]
        );
    }
}

/// Asserts the structural invariants that must hold after every public call:
/// strictly increasing unique means, bin budget respected, counts conserved,
/// gap queue in sync with adjacency, one target type throughout, and
/// extremes bracketing the bin means.
pub fn check_invariants(histogram: &Histogram) {
    if let Err(message) = histogram.reservoir().debug_validate() {
        panic!("reservoir invariant broken: {message}");
    }

    assert!(
        histogram.bin_count() <= histogram.max_bins(),
        "bin count {} exceeds the budget {}",
        histogram.bin_count(),
        histogram.max_bins()
    );

    let bin_total: f64 = histogram.bins().map(|b| b.count()).sum();
    assert_rel_close(
        "count conservation",
        histogram.total_count(),
        bin_total + histogram.missing_count(),
        1e-9,
    );

    if let Some(target_type) = histogram.target_type() {
        for bin in histogram.bins() {
            assert_eq!(
                bin.target().target_type(),
                target_type,
                "bin at {} broke the latched target type",
                bin.mean()
            );
        }
    }

    if let (Some(first), Some(last)) = (histogram.bins().next(), histogram.bins().last()) {
        let minimum = histogram.minimum().expect("bins imply a minimum");
        let maximum = histogram.maximum().expect("bins imply a maximum");
        assert!(
            minimum <= first.mean() && maximum >= last.mean(),
            "extremes [{minimum}, {maximum}] do not bracket the bin means"
        );
    }
}
