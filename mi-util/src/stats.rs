use statrs::function::gamma::ln_gamma;

/// Spearman correlation from two 1-based rank vectors, using the
/// rank-difference form `1 - 6 * sum(d^2) / (N * (N^2 - 1))`. The sum
/// of squared differences accumulates in f64 to avoid overflow.
pub fn spearman_rho(x_ranks: &[u32], y_ranks: &[u32]) -> f32 {
    assert_eq!(x_ranks.len(), y_ranks.len(), "rank vectors differ in length");
    let n = x_ranks.len() as f64;
    let mut sum_d2 = 0.0_f64;
    for (&rx, &ry) in x_ranks.iter().zip(y_ranks.iter()) {
        let d = rx as f64 - ry as f64;
        sum_d2 += d * d;
    }
    (1.0 - 6.0 * sum_d2 / (n * (n * n - 1.0))) as f32
}

fn ln_choose(n: u64, k: u64) -> f64 {
    ln_gamma(n as f64 + 1.0) - ln_gamma(k as f64 + 1.0) - ln_gamma((n - k) as f64 + 1.0)
}

/// Right-tail binomial probability `P[X >= k]` with `X ~ Binomial(n,
/// theta)`, accumulated in log space with log-sum-exp so small `theta`
/// and large `n` stay finite.
pub fn right_tail_binomial_p(n: u64, k: u64, theta: f64) -> f64 {
    if k == 0 {
        return 1.0;
    }
    if k > n || theta <= 0.0 {
        return 0.0;
    }
    if theta >= 1.0 {
        return 1.0;
    }

    let ln_theta = theta.ln();
    let ln_comp = (1.0 - theta).ln();
    let ln_terms: Vec<f64> = (k..=n)
        .map(|i| ln_choose(n, i) + i as f64 * ln_theta + (n - i) as f64 * ln_comp)
        .collect();

    let max_ln = ln_terms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = ln_terms.iter().map(|&lt| (lt - max_ln).exp()).sum();
    (max_ln + sum.ln()).exp().min(1.0)
}
