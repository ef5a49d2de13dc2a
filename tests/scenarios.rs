//! Distribution-level scenarios and laws, driven by seeded generators.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use streamhist::histogram::test_helpers::{
    assert_abs_close, assert_monotone_chain, assert_rel_close, check_invariants,
};
use streamhist::{Histogram, Target};

fn uniform_values(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.random::<f64>()).collect()
}

fn gaussian_values(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    (0..n).map(|_| normal.sample(&mut rng)).collect()
}

/// Gaussian draws in antithetic pairs: the sample is exactly symmetric
/// about zero, so its median and below-zero mass are pinned.
fn symmetric_gaussian_values(n: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0, 1.0).expect("unit normal");
    let mut out = Vec::with_capacity(n);
    for _ in 0..n / 2 {
        let z: f64 = normal.sample(&mut rng);
        out.push(z);
        out.push(-z);
    }
    out
}

fn histogram_of(values: &[f64], max_bins: usize) -> Histogram {
    let mut h = Histogram::new(max_bins);
    for &v in values {
        h.insert(v).expect("insert");
    }
    h
}

/// S1: half of 100k uniform points sit below 0.5, within 1%.
#[test]
fn uniform_sum_at_the_midpoint() {
    let h = histogram_of(&uniform_values(100_000, 42), 100);
    check_invariants(&h);

    let sum = h.sum(0.5).expect("sum");
    assert!(
        (49_500.0..=50_500.0).contains(&sum),
        "sum(0.5) = {sum} outside [49500, 50500]"
    );
}

/// S2: the two-way uniform split of 100k gaussians is the median, near 0.
#[test]
fn gaussian_median_via_uniform() {
    let h = histogram_of(&symmetric_gaussian_values(100_000, 42), 100);
    check_invariants(&h);

    let splits = h.uniform(2);
    assert_eq!(splits.len(), 1);
    assert!(
        splits[0].abs() < 0.01,
        "median estimate {} strayed from 0",
        splits[0]
    );
}

/// S3: exact density grid for integer inserts.
#[test]
fn integer_density_grid() {
    let h = histogram_of(&[1.0, 2.0, 2.0, 3.0], 64);
    let expected = [
        (0.0, 0.0),
        (0.5, 0.0),
        (1.0, 0.5),
        (1.5, 1.5),
        (2.0, 2.0),
        (2.5, 1.5),
        (3.0, 0.5),
        (3.5, 0.0),
        (4.0, 0.0),
    ];
    for (p, want) in expected {
        assert_abs_close(&format!("density({p})"), want, h.density(p), 1e-10);
    }
}

/// S4: the narrowest gap merges when capacity is exceeded.
#[test]
fn bin_merging_under_capacity() {
    let h = histogram_of(&[1.0, 2.0, 3.0, 0.5], 3);
    let bins: Vec<(f64, f64)> = h.bins().map(|b| (b.mean(), b.count())).collect();
    assert_eq!(bins, vec![(0.75, 2.0), (2.0, 1.0), (3.0, 1.0)]);
}

/// S5: categorical targets with missing values, exact bin contents.
#[test]
fn categorical_with_missing_values() {
    let mut h = Histogram::builder()
        .max_bins(2)
        .categories(["foo", "bar"])
        .build();
    h.insert_categorical(1.0, Some("foo")).expect("insert");
    h.insert_categorical(1.0, None).expect("insert");
    h.insert_categorical(4.0, Some("bar")).expect("insert");
    h.insert_categorical(6.0, None).expect("insert");
    check_invariants(&h);

    let bins: Vec<_> = h.bins().collect();
    assert_eq!(bins.len(), 2);

    assert_eq!(bins[0].mean(), 1.0);
    assert_eq!(bins[0].count(), 2.0);
    let Target::CategoricalArray(t) = bins[0].target() else {
        panic!("expected an array-backed target");
    };
    assert_eq!(t.dense_counts(), &[1.0, 0.0]);
    assert_eq!(t.missing_count(), 1.0);

    assert_eq!(bins[1].mean(), 5.0);
    assert_eq!(bins[1].count(), 2.0);
    let Target::CategoricalArray(t) = bins[1].target() else {
        panic!("expected an array-backed target");
    };
    assert_eq!(t.dense_counts(), &[0.0, 1.0]);
    assert_eq!(t.missing_count(), 1.0);
}

/// S6: count-weighted gaps protect dense regions, so the tail bins end up
/// heavier than in the classic variant.
#[test]
fn gap_weighted_tails_carry_more_count() {
    let values = gaussian_values(10_000, 7);

    let mut classic = Histogram::builder().max_bins(32).build();
    let mut weighted = Histogram::builder().max_bins(32).gap_weighted(true).build();
    for &v in &values {
        classic.insert(v).expect("classic insert");
        weighted.insert(v).expect("weighted insert");
    }
    check_invariants(&classic);
    check_invariants(&weighted);

    let edge_count = |h: &Histogram| {
        let first = h.bins().next().expect("first bin").count();
        let last = h.bins().last().expect("last bin").count();
        first + last
    };
    let classic_edges = edge_count(&classic);
    let weighted_edges = edge_count(&weighted);
    assert!(
        weighted_edges > classic_edges,
        "weighted edges {weighted_edges} not heavier than classic {classic_edges}"
    );
}

/// S7: merging ten partitions conserves totals and keeps the median sum.
#[test]
fn merge_conserves_partition_totals() {
    let mut merged = Histogram::new(64);
    for seed in 0..10 {
        let partition = histogram_of(&symmetric_gaussian_values(1_000, 100 + seed), 64);
        merged.merge(&partition).expect("merge");
    }
    check_invariants(&merged);

    assert_eq!(merged.total_count(), 10_000.0);
    let at_zero = merged.sum(0.0).expect("sum");
    assert!(
        (4_900.0..=5_100.0).contains(&at_zero),
        "sum(0) = {at_zero} outside [4900, 5100]"
    );
}

/// L1: serialization round-trips observationally.
#[test]
fn roundtrip_is_observationally_equal() {
    let mut h = Histogram::builder().max_bins(48).gap_weighted(true).build();
    let values = gaussian_values(5_000, 11);
    for (i, &v) in values.iter().enumerate() {
        h.insert_numeric(v, (i % 13) as f64).expect("insert");
    }
    h.insert_numeric(None, 3.0).expect("missing point");

    let blob = serde_json::to_string(&h).expect("serialize");
    let back: Histogram = serde_json::from_str(&blob).expect("deserialize");

    assert_eq!(back, h);
    assert_eq!(back.minimum(), h.minimum());
    assert_eq!(back.maximum(), h.maximum());
    assert_eq!(back.missing_count(), h.missing_count());
    for p in [-2.0, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0] {
        assert_eq!(back.sum(p).expect("sum"), h.sum(p).expect("sum"));
        assert_eq!(back.density(p), h.density(p));
    }
    assert_eq!(back.uniform(10), h.uniform(10));
    assert_eq!(back.percentiles(&[0.1, 0.5, 0.9]), h.percentiles(&[0.1, 0.5, 0.9]));
}

/// L2: merging with an empty histogram changes nothing, either way.
#[test]
fn merge_identity_with_empty() {
    let h = histogram_of(&gaussian_values(2_000, 13), 32);

    let mut left = h.clone();
    left.merge(&Histogram::new(32)).expect("merge empty");
    assert_eq!(left, h);

    let mut right = Histogram::new(32);
    right.merge(&h).expect("merge into empty");
    assert_eq!(right, h);
}

/// L3 over randomized partition cuts.
#[test]
fn merge_conserves_totals_for_random_cuts() {
    let values = gaussian_values(4_000, 17);
    let mut rng = StdRng::seed_from_u64(18);
    let cut = rng.random_range(1..values.len() - 1);

    let a = histogram_of(&values[..cut], 64);
    let b = histogram_of(&values[cut..], 64);
    let mut merged = a.clone();
    merged.merge(&b).expect("merge");

    assert_abs_close(
        "total conservation",
        a.total_count() + b.total_count(),
        merged.total_count(),
        1e-6,
    );
    let expected_min = a.minimum().expect("a min").min(b.minimum().expect("b min"));
    let expected_max = a.maximum().expect("a max").max(b.maximum().expect("b max"));
    assert_eq!(merged.minimum(), Some(expected_min));
    assert_eq!(merged.maximum(), Some(expected_max));
}

/// L4 + L5: the sum is monotone and clamps at the observed extremes.
#[test]
fn sum_is_monotone_and_clamped() {
    let h = histogram_of(&gaussian_values(20_000, 19), 64);
    let minimum = h.minimum().expect("minimum");
    let maximum = h.maximum().expect("maximum");

    assert_eq!(h.sum(minimum).expect("sum at min"), 0.0);
    assert_eq!(h.sum(maximum).expect("sum at max"), h.total_count());

    let grid: Vec<f64> = (0..=200)
        .map(|i| minimum + (maximum - minimum) * (i as f64 / 200.0))
        .map(|p| h.sum(p).expect("sum"))
        .collect();
    assert_monotone_chain("cumulative sums", &grid);
}

/// L6: the sum difference matches the integrated density to 1%.
#[test]
fn density_integrates_to_the_sum() {
    let h = histogram_of(&gaussian_values(20_000, 23), 64);
    let (p1, p2) = (-1.0, 1.0);

    let steps = 4_000;
    let width = (p2 - p1) / steps as f64;
    let mut integral = 0.0;
    for i in 0..steps {
        let left = p1 + i as f64 * width;
        let right = left + width;
        integral += (h.density(left) + h.density(right)) / 2.0 * width;
    }

    let delta = h.sum(p2).expect("sum") - h.sum(p1).expect("sum");
    assert_rel_close("integrated density", delta, integral, 0.01);
}

/// L7: feeding a histogram's bins into a fresh histogram of the same budget
/// reproduces the bin set.
#[test]
fn bin_reinsertion_is_idempotent() {
    let h = histogram_of(&gaussian_values(3_000, 29), 40);

    let mut rebuilt = Histogram::new(40);
    for bin in h.bins() {
        rebuilt.insert_bin(bin.clone()).expect("insert bin");
    }
    check_invariants(&rebuilt);

    let original: Vec<(f64, f64)> = h.bins().map(|b| (b.mean(), b.count())).collect();
    let again: Vec<(f64, f64)> = rebuilt.bins().map(|b| (b.mean(), b.count())).collect();
    assert_eq!(again, original);
    assert_eq!(rebuilt.total_count(), h.total_count());
}

/// Structural invariants hold through a mixed workload across backings.
#[test]
fn invariants_survive_a_mixed_workload() {
    use streamhist::ReservoirKind;

    let mut rng = StdRng::seed_from_u64(31);
    for kind in [ReservoirKind::Array, ReservoirKind::Tree] {
        for gap_weighted in [false, true] {
            let mut h = Histogram::builder()
                .max_bins(24)
                .gap_weighted(gap_weighted)
                .reservoir(kind)
                .build();
            for _ in 0..2_000 {
                let value: f64 = rng.random::<f64>() * 100.0 - 50.0;
                h.insert(value).expect("insert");
            }
            let other = histogram_of(&uniform_values(500, 37), 24);
            h.merge(&other).expect("merge");
            check_invariants(&h);
            assert_eq!(h.total_count(), 2_500.0);
        }
    }
}
