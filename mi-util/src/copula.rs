use rand::seq::SliceRandom;
use rand::Rng;

/// Indices of `values` sorted by ascending value.
///
/// Within any run of exactly equal values the corresponding slice of
/// indices is shuffled, so ties are broken uniformly at random.
///
/// * `values` - input vector
/// * `rng` - random generator used only for tie breaking
pub fn rank_indices<R: Rng>(values: &[f32], rng: &mut R) -> Vec<usize> {
    let n = values.len();
    let mut idx: Vec<usize> = (0..n).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut r = 0;
    while r < n {
        let mut run = 1;
        while r + run < n && values[idx[r]] == values[idx[r + run]] {
            run += 1;
        }
        if run > 1 {
            idx[r..(r + run)].shuffle(rng);
        }
        r += run;
    }
    idx
}

/// Copula transform: map `values` onto the uniform grid `rank/(N+1)`.
///
/// The output is a permutation of `{1/(N+1), ..., N/(N+1)}`, strictly
/// inside (0, 1), increasing in the input values with ties broken at
/// random.
pub fn copula_transform<R: Rng>(values: &[f32], rng: &mut R) -> Vec<f32> {
    let n = values.len();
    let mut out = vec![0.0_f32; n];
    for (r, &i) in rank_indices(values, rng).iter().enumerate() {
        out[i] = (r + 1) as f32 / (n as f32 + 1.0);
    }
    out
}

/// 1-based ranks of `values` with random tie breaking. Used to build
/// the rank matrix for Spearman correlation.
pub fn rank_vector<R: Rng>(values: &[f32], rng: &mut R) -> Vec<u32> {
    let n = values.len();
    let mut out = vec![0_u32; n];
    for (r, &i) in rank_indices(values, rng).iter().enumerate() {
        out[i] = (r + 1) as u32;
    }
    out
}
