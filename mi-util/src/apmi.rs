//! Adaptive-partitioning mutual information (APMI).
//!
//! Both inputs must be copula-transformed, so every coordinate lies in
//! (0, 1) and the unit square supports the whole sample. The recursion
//! splits a square into four quadrants whenever the observed quadrant
//! counts deviate from uniform by more than a chi-square threshold, and
//! each dead-end tile contributes `p * ln(p / w^2)` to the estimate.

/// Chi-square critical value at three degrees of freedom, alpha = 0.05.
pub const DEFAULT_Q_THRESH: f32 = 7.815;

/// Squares with fewer points than this are never split further.
pub const DEFAULT_SIZE_THRESH: usize = 4;

/// Tuning parameters of the estimator.
#[derive(Debug, Clone, Copy)]
pub struct ApmiOptions {
    /// chi-square threshold for refining a square
    pub q_thresh: f32,
    /// minimum number of points worth testing for independence
    pub size_thresh: usize,
}

impl Default for ApmiOptions {
    fn default() -> Self {
        Self {
            q_thresh: DEFAULT_Q_THRESH,
            size_thresh: DEFAULT_SIZE_THRESH,
        }
    }
}

/// Reusable estimator holding the point-index scratch buffer, so a
/// worker can score many pairs without reallocating. Not shared across
/// threads; create one per worker.
pub struct ApmiEstimator {
    opts: ApmiOptions,
    pts: Vec<usize>,
}

impl ApmiEstimator {
    pub fn new(opts: ApmiOptions) -> Self {
        Self { opts, pts: Vec::new() }
    }

    /// Mutual information of `x` and `y` in nats; non-negative.
    pub fn estimate(&mut self, x: &[f32], y: &[f32]) -> f32 {
        assert_eq!(x.len(), y.len(), "APMI inputs must have equal length");
        let n = x.len();

        self.pts.clear();
        self.pts.extend(0..n);

        let ctx = SplitCtx {
            x,
            y,
            q_thresh: self.opts.q_thresh,
            size_thresh: self.opts.size_thresh,
            tot_pts: n,
        };
        tessellate(&ctx, &mut self.pts, 0.0, 0.0, 1.0)
    }
}

impl Default for ApmiEstimator {
    fn default() -> Self {
        Self::new(ApmiOptions::default())
    }
}

/// One-off APMI with the default thresholds.
pub fn apmi(x: &[f32], y: &[f32]) -> f32 {
    ApmiEstimator::default().estimate(x, y)
}

struct SplitCtx<'a> {
    x: &'a [f32],
    y: &'a [f32],
    q_thresh: f32,
    size_thresh: usize,
    tot_pts: usize,
}

/// MI contribution of a dead-end square.
fn tile_mi(num_pts: usize, width: f32, tot_pts: usize) -> f32 {
    let pxy = num_pts as f32 / tot_pts as f32;
    let mi = pxy * (pxy / (width * width)).ln();
    if mi.is_finite() {
        mi
    } else {
        0.0
    }
}

/// Move the indices satisfying `pred` to the front of `pts`; returns
/// the split position. Order within the two groups is irrelevant.
fn partition_in_place<F>(pts: &mut [usize], mut pred: F) -> usize
where
    F: FnMut(usize) -> bool,
{
    let mut at = 0;
    for j in 0..pts.len() {
        if pred(pts[j]) {
            pts.swap(at, j);
            at += 1;
        }
    }
    at
}

fn tessellate(ctx: &SplitCtx<'_>, pts: &mut [usize], x0: f32, y0: f32, width: f32) -> f32 {
    let num_pts = pts.len();
    if num_pts < ctx.size_thresh {
        return tile_mi(num_pts, width, ctx.tot_pts);
    }

    let half = width * 0.5;
    let x_mid = x0 + half;
    let y_mid = y0 + half;

    // ties at the midpoint land right/top
    let num_left = partition_in_place(pts, |p| ctx.x[p] < x_mid);
    let (left, right) = pts.split_at_mut(num_left);
    let num_bl = partition_in_place(left, |p| ctx.y[p] < y_mid);
    let num_br = partition_in_place(right, |p| ctx.y[p] < y_mid);

    let num_tl = left.len() - num_bl;
    let num_tr = right.len() - num_br;

    let expected = num_pts as f32 * 0.25;
    let chisq = [num_bl, num_tl, num_br, num_tr]
        .iter()
        .map(|&nq| {
            let d = nq as f32 - expected;
            d * d
        })
        .sum::<f32>()
        / expected;

    // the root square is refined unconditionally so the estimator never
    // collapses to a single tile on small samples
    if chisq > ctx.q_thresh || num_pts == ctx.tot_pts {
        let (bl, tl) = left.split_at_mut(num_bl);
        let (br, tr) = right.split_at_mut(num_br);
        tessellate(ctx, bl, x0, y0, half)
            + tessellate(ctx, br, x_mid, y0, half)
            + tessellate(ctx, tl, x0, y_mid, half)
            + tessellate(ctx, tr, x_mid, y_mid, half)
    } else {
        tile_mi(num_pts, width, ctx.tot_pts)
    }
}
