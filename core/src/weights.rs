//! Importance weights and weighted summaries.
//!
//! Everything that carries probability mass is kept in log space until it
//! has to be exponentiated, either for resampling or for reporting. Every
//! exponentiation subtracts the running maximum first:
//!
//! $$
//! W^n = \frac{\exp(\ell^n - \max_m \ell^m)}{\sum_k \exp(\ell^k - \max_m \ell^m)}
//! $$
//!
//! The main type is [`Weights`], an immutable set of N log-weights together
//! with the derived normalised weights, effective sample size (ESS) and the
//! log of the mean weight.
use nalgebra::{DMatrix, DVector};

/// Replace NaN entries by `-inf` (zero probability).
fn sanitize(lw: &mut [f64]) {
    for l in lw.iter_mut() {
        if l.is_nan() {
            *l = f64::NEG_INFINITY;
        }
    }
}

fn max_of(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

/// Exponentiate and normalise a vector of log-weights.
///
/// The output sums to one for any input with at least one finite entry.
/// If every entry is `-inf` (or NaN) the output is NaN: callers must make
/// sure at least one log-weight is finite.
pub fn exp_and_normalise(lw: &[f64]) -> Vec<f64> {
    let m = max_of(lw);
    let w: Vec<f64> = lw
        .iter()
        .map(|&l| if l.is_nan() { 0.0 } else { (l - m).exp() })
        .collect();
    let s: f64 = w.iter().sum();
    w.into_iter().map(|wi| wi / s).collect()
}

/// Effective sample size of a vector of log-weights,
/// `(Σ w)² / Σ w²` with `w = exp(lw - max(lw))`.
///
/// Equals N when all log-weights are equal and 1 when a single log-weight
/// is finite.
pub fn ess(lw: &[f64]) -> f64 {
    let m = max_of(lw);
    let (s, s2) = lw
        .iter()
        .filter(|l| !l.is_nan())
        .map(|&l| (l - m).exp())
        .fold((0.0, 0.0), |(s, s2), w| (s + w, s2 + w * w));
    s * s / s2
}

/// `log(Σ exp(v))`, computed without overflow.
pub fn log_sum_exp(v: &[f64]) -> f64 {
    let m = max_of(v);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + v.iter().map(|&x| (x - m).exp()).sum::<f64>().ln()
}

/// `log(exp(a) + exp(b))` for two scalars.
pub fn log_sum_exp_ab(a: f64, b: f64) -> f64 {
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

/// Log of the (weighted) mean of `exp(v)`.
///
/// `weights`, when given, must be normalised weights of the same length as
/// `v`.
pub fn log_mean_exp(v: &[f64], weights: Option<&[f64]>) -> f64 {
    let m = max_of(v);
    if m == f64::NEG_INFINITY {
        return m;
    }
    let mean = match weights {
        None => v.iter().map(|&x| (x - m).exp()).sum::<f64>() / v.len() as f64,
        Some(w) => v
            .iter()
            .zip(w)
            .map(|(&x, &wi)| wi * (x - m).exp())
            .sum::<f64>(),
    };
    m + mean.ln()
}

/// A set of N importance weights, stored as log-weights.
///
/// Objects of this type are immutable: [`Weights::add`] returns a new set.
/// The default value represents "no weighting yet" (every particle has the
/// same weight); its `n()` is zero and adding an increment to it simply
/// adopts the increment.
#[derive(Clone, Debug, Default)]
pub struct Weights {
    lw: Option<Vec<f64>>,
    w: Vec<f64>,
    ess: f64,
    log_mean: f64,
}

impl Weights {
    /// Build a weight set from log-weights. NaN entries are mapped to `-inf`.
    pub fn new(mut lw: Vec<f64>) -> Self {
        sanitize(&mut lw);
        let m = max_of(&lw);
        let w: Vec<f64> = lw.iter().map(|&l| (l - m).exp()).collect();
        let s: f64 = w.iter().sum();
        let s2: f64 = w.iter().map(|wi| wi * wi).sum();
        let n = lw.len() as f64;
        Weights {
            log_mean: m + (s / n).ln(),
            ess: s * s / s2,
            w: w.into_iter().map(|wi| wi / s).collect(),
            lw: Some(lw),
        }
    }

    /// Number of weights (zero for an unweighted set).
    pub fn n(&self) -> usize {
        self.lw.as_ref().map_or(0, Vec::len)
    }

    /// True if no weighting has been applied yet.
    pub fn is_unweighted(&self) -> bool {
        self.lw.is_none()
    }

    /// Log-weights (empty for an unweighted set).
    pub fn lw(&self) -> &[f64] {
        self.lw.as_deref().unwrap_or(&[])
    }

    /// Normalised weights (empty for an unweighted set).
    pub fn w(&self) -> &[f64] {
        &self.w
    }

    /// Effective sample size; `0` for an unweighted set.
    pub fn ess(&self) -> f64 {
        self.ess
    }

    /// Log of the mean of the (unnormalised) weights.
    pub fn log_mean(&self) -> f64 {
        self.log_mean
    }

    /// True when every log-weight is `-inf`, i.e. the normalised weights are
    /// undefined.
    pub fn is_degenerate(&self) -> bool {
        match &self.lw {
            Some(lw) => lw.iter().all(|&l| l == f64::NEG_INFINITY),
            None => false,
        }
    }

    /// Increment the log-weights: returns a new set with `lw + delta`.
    pub fn add(&self, delta: &[f64]) -> Weights {
        match &self.lw {
            None => Weights::new(delta.to_vec()),
            Some(lw) => {
                assert_eq!(lw.len(), delta.len(), "log-weight increment has wrong length");
                Weights::new(lw.iter().zip(delta).map(|(a, b)| a + b).collect())
            }
        }
    }
}

/// Component-wise weighted mean and variance of scalar particles.
pub fn wmean_and_var(w: &[f64], x: &[f64]) -> (f64, f64) {
    let m: f64 = w.iter().zip(x).map(|(wi, xi)| wi * xi).sum();
    let m2: f64 = w.iter().zip(x).map(|(wi, xi)| wi * xi * xi).sum();
    (m, m2 - m * m)
}

/// Weighted mean and covariance matrix of vector particles.
pub fn wmean_and_cov(w: &[f64], x: &[DVector<f64>]) -> (DVector<f64>, DMatrix<f64>) {
    let d = x.first().map_or(0, |xi| xi.len());
    let mut mean = DVector::<f64>::zeros(d);
    for (wi, xi) in w.iter().zip(x) {
        mean += *wi * xi;
    }
    let mut cov = DMatrix::<f64>::zeros(d, d);
    for (wi, xi) in w.iter().zip(x) {
        let diff = xi - &mean;
        cov += *wi * &diff * diff.transpose();
    }
    (mean, cov)
}

/// Quantiles of weighted scalar data, with linear interpolation of the
/// weighted empirical CDF.
pub fn wquantiles(w: &[f64], x: &[f64], alphas: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 1 {
        return vec![x[0]; alphas.len()];
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| x[a].total_cmp(&x[b]));
    let mut cw = Vec::with_capacity(n);
    let mut acc = 0.0;
    for &i in &order {
        acc += w[i];
        cw.push(acc);
    }
    alphas
        .iter()
        .map(|&alpha| {
            let k = cw.partition_point(|&c| c < alpha);
            let prev = k.saturating_sub(1).min(n - 2);
            let (c0, c1) = (cw[prev], cw[prev + 1]);
            let (x0, x1) = (x[order[prev]], x[order[prev + 1]]);
            if alpha <= c0 {
                x0
            } else if alpha >= c1 || c1 == c0 {
                x1
            } else {
                x0 + (alpha - c0) / (c1 - c0) * (x1 - x0)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn normalise_wide_range() {
        let n = 1000;
        let lw: Vec<f64> = (0..n).map(|i| -1e5 * i as f64 / (n - 1) as f64).collect();
        let w = exp_and_normalise(&lw);
        let s: f64 = w.iter().sum();
        assert!((s - 1.0).abs() < 1e-9);
        assert!(w.iter().all(|&wi| wi >= 0.0 && wi.is_finite()));
    }

    #[test]
    fn normalise_huge_values_no_overflow() {
        let w = exp_and_normalise(&[1e6, 1e6 - 1.0, 1e6 - 2.0]);
        let s: f64 = w.iter().sum();
        assert_approx_eq!(s, 1.0, 1e-12);
        assert!(w[0] > w[1] && w[1] > w[2]);
    }

    #[test]
    fn ess_equal_weights_is_n() {
        let lw = vec![-3.7; 250];
        assert_eq!(ess(&lw), 250.0);
        assert_eq!(Weights::new(lw).ess(), 250.0);
    }

    #[test]
    fn ess_single_finite_is_one() {
        let mut lw = vec![f64::NEG_INFINITY; 10];
        lw[4] = 12.0;
        assert_eq!(ess(&lw), 1.0);
        assert_eq!(Weights::new(lw).ess(), 1.0);
    }

    #[test]
    fn nan_is_zero_weight() {
        let wgts = Weights::new(vec![0.0, f64::NAN, 0.0]);
        assert_eq!(wgts.w()[1], 0.0);
        assert_approx_eq!(wgts.w()[0], 0.5);
        assert_eq!(wgts.lw()[1], f64::NEG_INFINITY);
        assert_approx_eq!(wgts.ess(), 2.0);
    }

    #[test]
    fn degenerate_weights_flagged() {
        let wgts = Weights::new(vec![f64::NEG_INFINITY, f64::NAN]);
        assert!(wgts.is_degenerate());
        assert!(wgts.w().iter().all(|w| w.is_nan()));
    }

    #[test]
    fn add_is_functional() {
        let empty = Weights::default();
        assert!(empty.is_unweighted());
        assert_eq!(empty.n(), 0);
        let first = empty.add(&[0.0, 1.0]);
        assert_eq!(first.lw(), &[0.0, 1.0]);
        let second = first.add(&[1.0, 0.0]);
        assert_eq!(second.lw(), &[1.0, 1.0]);
        assert_eq!(first.lw(), &[0.0, 1.0]);
        assert_approx_eq!(second.w()[0], 0.5);
    }

    #[test]
    fn log_mean_matches_direct() {
        let lw = vec![0.0, 2.0_f64.ln(), 3.0_f64.ln()];
        let wgts = Weights::new(lw.clone());
        assert_approx_eq!(wgts.log_mean(), 2.0_f64.ln());
        assert_approx_eq!(log_mean_exp(&lw, None), 2.0_f64.ln());
        let uniform = [1.0 / 3.0; 3];
        assert_approx_eq!(log_mean_exp(&lw, Some(&uniform)), 2.0_f64.ln());
    }

    #[test]
    fn log_sum_exp_helpers() {
        assert_approx_eq!(log_sum_exp(&[0.0, 0.0]), 2.0_f64.ln());
        assert_approx_eq!(log_sum_exp_ab(1000.0, 1000.0), 1000.0 + 2.0_f64.ln());
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn weighted_moments() {
        let (m, v) = wmean_and_var(&[0.5, 0.5], &[1.0, 3.0]);
        assert_approx_eq!(m, 2.0);
        assert_approx_eq!(v, 1.0);
        let x = vec![DVector::from_vec(vec![1.0, 0.0]), DVector::from_vec(vec![3.0, 2.0])];
        let (mean, cov) = wmean_and_cov(&[0.5, 0.5], &x);
        assert_approx_eq!(mean[0], 2.0);
        assert_approx_eq!(mean[1], 1.0);
        assert_approx_eq!(cov[(0, 1)], 1.0);
    }

    #[test]
    fn weighted_median() {
        let q = wquantiles(&[0.25; 4], &[4.0, 1.0, 3.0, 2.0], &[0.5]);
        assert_approx_eq!(q[0], 2.0);
    }
}
