//! Statistical tests of the resampling schemes.
//!
//! Each test uses a seeded generator and enough replicates for the Monte
//! Carlo error to be an order of magnitude below the tolerance.
use rand::SeedableRng;
use rand::rngs::StdRng;

use particles::resampling::{ResamplingScheme, SCHEMES, uniform_spacings};

const W: [f64; 5] = [0.05, 0.15, 0.2, 0.25, 0.35];
const REPS: usize = 20_000;

/// Mean and variance of the offspring counts of each particle.
fn count_moments(scheme: ResamplingScheme, seed: u64) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = W.len();
    let mut sum = vec![0.0; n];
    let mut sum2 = vec![0.0; n];
    for _ in 0..REPS {
        let a = scheme.resample(&W, None, &mut rng).unwrap();
        let mut counts = vec![0.0; n];
        for k in a {
            counts[k] += 1.0;
        }
        for i in 0..n {
            sum[i] += counts[i];
            sum2[i] += counts[i] * counts[i];
        }
    }
    let reps = REPS as f64;
    let mean: Vec<f64> = sum.iter().map(|s| s / reps).collect();
    let var = sum2
        .iter()
        .zip(&mean)
        .map(|(s2, m)| s2 / reps - m * m)
        .collect();
    (mean, var)
}

#[test]
fn every_scheme_is_unbiased() {
    let m = W.len() as f64;
    for (k, (name, scheme)) in SCHEMES.iter().enumerate() {
        let (mean, _) = count_moments(*scheme, 100 + k as u64);
        for (i, mi) in mean.iter().enumerate() {
            assert!(
                (mi - m * W[i]).abs() < 0.05,
                "{name}: mean count of particle {i} is {mi}, expected {}",
                m * W[i]
            );
        }
    }
}

#[test]
fn residual_and_ssp_reduce_variance() {
    let total = |v: Vec<f64>| v.iter().sum::<f64>();
    let multinomial = total(count_moments(ResamplingScheme::Multinomial, 1).1);
    // M W (1 - W) summed over particles
    assert!((multinomial - 3.75).abs() < 0.15, "multinomial variance {multinomial}");
    for scheme in [
        ResamplingScheme::Residual,
        ResamplingScheme::Ssp,
        ResamplingScheme::Systematic,
        ResamplingScheme::Stratified,
    ] {
        let v = total(count_moments(scheme, 2).1);
        assert!(
            v < 0.6 * multinomial,
            "{scheme}: variance {v} not below multinomial {multinomial}"
        );
    }
}

#[test]
fn ssp_offspring_counts_are_bounded() {
    let mut rng = StdRng::seed_from_u64(9);
    let w = [0.4, 0.3, 0.2, 0.1];
    let m = 7;
    for _ in 0..1000 {
        let a = ResamplingScheme::Ssp.resample(&w, Some(m), &mut rng).unwrap();
        assert_eq!(a.len(), m);
        for (i, wi) in w.iter().enumerate() {
            let c = a.iter().filter(|&&k| k == i).count() as f64;
            let target = m as f64 * wi;
            assert!(c >= target.floor() && c <= target.ceil());
        }
    }
}

/// Kolmogorov-Smirnov statistic of sorted points against U(0, 1).
fn ks_statistic(sorted: &[f64]) -> f64 {
    let n = sorted.len() as f64;
    sorted
        .iter()
        .enumerate()
        .map(|(i, &u)| {
            let lo = u - i as f64 / n;
            let hi = (i + 1) as f64 / n - u;
            lo.max(hi)
        })
        .fold(0.0, f64::max)
}

#[test]
fn uniform_spacings_pass_kolmogorov_smirnov() {
    for seed in 0..5 {
        let mut rng = StdRng::seed_from_u64(seed);
        let u = uniform_spacings(1000, &mut rng);
        assert!(u.windows(2).all(|p| p[0] <= p[1]));
        let d = ks_statistic(&u);
        assert!(d < 0.07, "seed {seed}: KS statistic {d}");
    }
}
