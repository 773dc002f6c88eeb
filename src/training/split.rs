use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Row indices assigned to each partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub holdout: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and hold out `ceil(n * test_fraction)` rows.
///
/// Both partitions are non-empty whenever `n >= 2`.
pub fn train_test_split(n: usize, test_fraction: f32, seed: u64) -> Split {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let n_holdout = holdout_len(n, test_fraction);
    let train = indices.split_off(n_holdout);
    Split {
        train,
        holdout: indices,
    }
}

fn holdout_len(n: usize, test_fraction: f32) -> usize {
    if n < 2 {
        return 0;
    }
    let raw = (n as f64 * test_fraction as f64).ceil() as usize;
    raw.clamp(1, n - 1)
}
