//! Resampling schemes.
//!
//! A resampling scheme maps N normalised weights `W` to M ancestor indices
//! in `0..N` such that index n is selected `M * W[n]` times in expectation.
//! The schemes differ by the variance of the number of offspring:
//!
//! - [`multinomial`]: M independent draws; the variance baseline.
//! - [`stratified`]: one uniform per stratum `[k/M, (k+1)/M)`.
//! - [`systematic`]: a single uniform shared by all strata.
//! - [`residual`]: `floor(M W[n])` deterministic copies, multinomial for the rest.
//! - [`ssp`]: Srinivasan sampling process; offspring counts are always
//!   `floor(M W[n])` or `ceil(M W[n])`.
//!
//! The first three are built on [`inverse_cdf`], a single O(N + M) merge of
//! the cumulative weights with sorted uniforms. Schemes are looked up by name
//! through [`SCHEMES`] and [`ResamplingScheme::from_str`].
//!
//! All schemes assume `W` is non-negative and sums to one.
use std::fmt::{self, Display};
use std::str::FromStr;

use rand::Rng;
use rand::seq::SliceRandom;
use rand_distr::{Distribution, Exp1};
use serde::{Deserialize, Serialize};

use crate::error::SmcError;

/// Identifier of a resampling scheme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingScheme {
    Multinomial,
    Residual,
    Stratified,
    #[default]
    Systematic,
    Ssp,
}

/// Lookup table from scheme names to scheme identifiers.
pub const SCHEMES: [(&str, ResamplingScheme); 5] = [
    ("multinomial", ResamplingScheme::Multinomial),
    ("residual", ResamplingScheme::Residual),
    ("stratified", ResamplingScheme::Stratified),
    ("systematic", ResamplingScheme::Systematic),
    ("ssp", ResamplingScheme::Ssp),
];

impl ResamplingScheme {
    /// Name under which the scheme is registered in [`SCHEMES`].
    pub fn name(&self) -> &'static str {
        SCHEMES
            .iter()
            .find(|(_, scheme)| scheme == self)
            .map_or("systematic", |(name, _)| name)
    }

    /// Draw `m` ancestor indices (`m` defaults to `W.len()`).
    pub fn resample<R: Rng + ?Sized>(
        &self,
        w: &[f64],
        m: Option<usize>,
        rng: &mut R,
    ) -> Result<Vec<usize>, SmcError> {
        let m = m.unwrap_or(w.len());
        let a = match self {
            ResamplingScheme::Multinomial => multinomial(w, m, rng),
            ResamplingScheme::Residual => residual(w, m, rng),
            ResamplingScheme::Stratified => stratified(w, m, rng),
            ResamplingScheme::Systematic => systematic(w, m, rng),
            ResamplingScheme::Ssp => ssp(w, m, rng)?,
        };
        if a.len() != m {
            return Err(SmcError::ResamplingFailure {
                expected: m,
                got: a.len(),
            });
        }
        Ok(a)
    }
}

impl FromStr for ResamplingScheme {
    type Err = SmcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SCHEMES
            .iter()
            .find(|(name, _)| *name == s)
            .map(|(_, scheme)| *scheme)
            .ok_or_else(|| SmcError::UnknownResamplingScheme(s.to_string()))
    }
}

impl Display for ResamplingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resample with a scheme given by name.
pub fn resample_by_name<R: Rng + ?Sized>(
    scheme: &str,
    w: &[f64],
    m: Option<usize>,
    rng: &mut R,
) -> Result<Vec<usize>, SmcError> {
    scheme.parse::<ResamplingScheme>()?.resample(w, m, rng)
}

/// Inverse CDF algorithm for a finite distribution.
///
/// `su` must hold M uniforms sorted in ascending order; the output holds
/// M indices in `0..W.len()`. Runs in O(N + M).
pub fn inverse_cdf(su: &[f64], w: &[f64]) -> Vec<usize> {
    let last = w.len() - 1;
    let mut j = 0;
    let mut s = w[0];
    let mut a = Vec::with_capacity(su.len());
    for &u in su {
        while u > s && j < last {
            j += 1;
            s += w[j];
        }
        a.push(j);
    }
    a
}

/// Generate `n` ordered uniform variates in O(n) time.
///
/// Equivalent in distribution to sorting `n` independent uniforms, which
/// would cost O(n log n).
pub fn uniform_spacings<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<f64> {
    let mut z = Vec::with_capacity(n + 1);
    let mut acc = 0.0;
    for _ in 0..=n {
        let e: f64 = Exp1.sample(rng);
        acc += e;
        z.push(acc);
    }
    let total = z[n];
    z.truncate(n);
    z.iter_mut().for_each(|zi| *zi /= total);
    z
}

/// Single draw from the discrete distribution with probabilities `w`.
pub fn multinomial_once<R: Rng + ?Sized>(w: &[f64], rng: &mut R) -> usize {
    let u: f64 = rng.random();
    let mut s = 0.0;
    for (n, &wn) in w.iter().enumerate() {
        s += wn;
        if u < s {
            return n;
        }
    }
    // round-off: u above the last cumulative sum
    w.iter().rposition(|&wn| wn > 0.0).unwrap_or(w.len() - 1)
}

/// Multinomial resampling.
pub fn multinomial<R: Rng + ?Sized>(w: &[f64], m: usize, rng: &mut R) -> Vec<usize> {
    inverse_cdf(&uniform_spacings(m, rng), w)
}

/// Stratified resampling.
pub fn stratified<R: Rng + ?Sized>(w: &[f64], m: usize, rng: &mut R) -> Vec<usize> {
    let su: Vec<f64> = (0..m)
        .map(|k| (rng.random::<f64>() + k as f64) / m as f64)
        .collect();
    inverse_cdf(&su, w)
}

/// Systematic resampling.
pub fn systematic<R: Rng + ?Sized>(w: &[f64], m: usize, rng: &mut R) -> Vec<usize> {
    let u: f64 = rng.random();
    let su: Vec<f64> = (0..m).map(|k| (u + k as f64) / m as f64).collect();
    inverse_cdf(&su, w)
}

/// Residual resampling.
pub fn residual<R: Rng + ?Sized>(w: &[f64], m: usize, rng: &mut R) -> Vec<usize> {
    let mw: Vec<f64> = w.iter().map(|&wn| m as f64 * wn).collect();
    let intpart: Vec<usize> = mw.iter().map(|x| x.floor() as usize).collect();
    let sip: usize = intpart.iter().sum();
    let mut a = Vec::with_capacity(m);
    for (n, &copies) in intpart.iter().enumerate() {
        a.extend(std::iter::repeat_n(n, copies));
    }
    if sip < m {
        let sres = m - sip;
        let res: Vec<f64> = mw
            .iter()
            .zip(&intpart)
            .map(|(x, &k)| (x - k as f64) / sres as f64)
            .collect();
        a.extend(multinomial(&res, sres, rng));
    }
    a
}

/// SSP (Srinivasan sampling process) resampling.
///
/// Two "open" fractional parts are merged at each of the N-1 steps: one of
/// them is topped up to one (and gets an extra offspring) or emptied,
/// with probabilities chosen so that the expected counts are `M W[n]`.
/// See Gerber, Chopin and Whiteley (2019), *Negative association, ordering
/// and convergence of resampling methods*, Ann. Statist. 47(4).
pub fn ssp<R: Rng + ?Sized>(w: &[f64], m: usize, rng: &mut R) -> Result<Vec<usize>, SmcError> {
    let n = w.len();
    let mw: Vec<f64> = w.iter().map(|&wn| m as f64 * wn).collect();
    let mut nr_children: Vec<usize> = mw.iter().map(|x| x.floor() as usize).collect();
    let mut xi: Vec<f64> = mw
        .iter()
        .zip(&nr_children)
        .map(|(x, &k)| x - k as f64)
        .collect();
    let (mut i, mut j) = (0usize, 1usize);
    for k in 0..n.saturating_sub(1) {
        let u: f64 = rng.random();
        let mut delta_i = xi[j].min(1.0 - xi[i]);
        let delta_j = xi[i].min(1.0 - xi[j]);
        let sum_delta = delta_i + delta_j;
        // both fractional parts are zero when sum_delta == 0
        let pj = if sum_delta > 0.0 { delta_i / sum_delta } else { 0.0 };
        if u < pj {
            std::mem::swap(&mut i, &mut j);
            delta_i = delta_j;
        }
        if xi[j] < 1.0 - xi[i] {
            xi[i] += delta_i;
            j = k + 2;
        } else {
            xi[j] -= delta_i;
            nr_children[i] += 1;
            i = k + 2;
        }
    }
    // round-off accumulation may leave one offspring unassigned
    let total: usize = nr_children.iter().sum();
    if n > 1 && total + 1 == m {
        let last = if j == n { i } else { j };
        if xi[last] > 0.99 {
            nr_children[last] += 1;
        }
    }
    let total: usize = nr_children.iter().sum();
    if total != m {
        return Err(SmcError::ResamplingFailure {
            expected: m,
            got: total,
        });
    }
    let mut a = Vec::with_capacity(m);
    for (idx, &copies) in nr_children.iter().enumerate() {
        a.extend(std::iter::repeat_n(idx, copies));
    }
    Ok(a)
}

/// On-the-fly generator of multinomial draws.
///
/// Holds a batch of M multinomial draws in random order and serves them on
/// demand; a fresh batch is generated when the current one is used up. Each
/// draw costs O(1) on average, without knowing in advance how many draws
/// will be needed.
#[derive(Clone, Debug)]
pub struct MultinomialQueue {
    w: Vec<f64>,
    m: usize,
    j: usize,
    a: Vec<usize>,
}

impl MultinomialQueue {
    /// New queue with capacity `m` (defaults to `w.len()`).
    pub fn new<R: Rng + ?Sized>(w: &[f64], m: Option<usize>, rng: &mut R) -> Self {
        let m = m.unwrap_or(w.len());
        let mut queue = MultinomialQueue {
            w: w.to_vec(),
            m,
            j: 0,
            a: Vec::new(),
        };
        queue.enqueue(rng);
        queue
    }

    fn enqueue<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.a = multinomial(&self.w, self.m, rng);
        self.a.shuffle(rng);
        self.j = 0;
    }

    /// Capacity of the queue.
    pub fn capacity(&self) -> usize {
        self.m
    }

    /// Next `k` draws; `k` may not exceed the capacity.
    pub fn dequeue<R: Rng + ?Sized>(&mut self, k: usize, rng: &mut R) -> Result<Vec<usize>, SmcError> {
        if k > self.m {
            return Err(SmcError::QueueCapacity {
                requested: k,
                capacity: self.m,
            });
        }
        if self.j + k <= self.m {
            let out = self.a[self.j..self.j + k].to_vec();
            self.j += k;
            return Ok(out);
        }
        let mut out = self.a[self.j..].to_vec();
        let nextra = k - out.len();
        self.enqueue(rng);
        out.extend_from_slice(&self.a[..nextra]);
        self.j = nextra;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn counts(a: &[usize], n: usize) -> Vec<usize> {
        let mut c = vec![0; n];
        for &i in a {
            c[i] += 1;
        }
        c
    }

    #[test]
    fn inverse_cdf_merge() {
        let w = [0.2, 0.5, 0.3];
        let a = inverse_cdf(&[0.1, 0.2, 0.3, 0.69, 0.71, 0.9999], &w);
        assert_eq!(a, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn inverse_cdf_roundoff_guard() {
        // cumulative sum falls slightly short of the last uniform
        let w = [0.3, 0.3, 0.3999999];
        let a = inverse_cdf(&[0.99999999], &w);
        assert_eq!(a, vec![2]);
    }

    #[test]
    fn uniform_spacings_sorted_in_unit_interval() {
        let mut rng = StdRng::seed_from_u64(1);
        let u = uniform_spacings(500, &mut rng);
        assert_eq!(u.len(), 500);
        assert!(u.windows(2).all(|p| p[0] <= p[1]));
        assert!(u.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }

    #[test]
    fn lookup_by_name() {
        for (name, scheme) in SCHEMES {
            assert_eq!(name.parse::<ResamplingScheme>().unwrap(), scheme);
            assert_eq!(scheme.name(), name);
        }
        let err = "bogus".parse::<ResamplingScheme>().unwrap_err();
        assert_eq!(err, SmcError::UnknownResamplingScheme("bogus".to_string()));
        let mut rng = StdRng::seed_from_u64(2);
        assert!(resample_by_name("killing", &[1.0], None, &mut rng).is_err());
    }

    #[test]
    fn every_scheme_returns_m_indices() {
        let mut rng = StdRng::seed_from_u64(3);
        let w = [0.1, 0.0, 0.6, 0.3];
        for (_, scheme) in SCHEMES {
            for m in [1, 4, 7, 20] {
                let a = scheme.resample(&w, Some(m), &mut rng).unwrap();
                assert_eq!(a.len(), m, "{scheme}");
                assert!(a.iter().all(|&i| i < w.len() && i != 1), "{scheme}");
            }
        }
    }

    #[test]
    fn residual_keeps_integer_part() {
        let mut rng = StdRng::seed_from_u64(4);
        let w = [0.55, 0.25, 0.2];
        for _ in 0..50 {
            let c = counts(&residual(&w, 10, &mut rng), 3);
            assert!(c[0] >= 5 && c[1] >= 2 && c[2] >= 2);
        }
    }

    #[test]
    fn ssp_counts_are_floor_or_ceil() {
        let mut rng = StdRng::seed_from_u64(5);
        let raw: Vec<f64> = (0..13).map(|k| (-(k as f64) / 3.0).exp()).collect();
        let s: f64 = raw.iter().sum();
        let w: Vec<f64> = raw.iter().map(|x| x / s).collect();
        for _ in 0..200 {
            let c = counts(&ssp(&w, 13, &mut rng).unwrap(), 13);
            for (n, &cn) in c.iter().enumerate() {
                let mw = 13.0 * w[n];
                assert!(cn == mw.floor() as usize || cn == mw.ceil() as usize);
            }
        }
    }

    #[test]
    fn ssp_single_particle() {
        let mut rng = StdRng::seed_from_u64(6);
        assert_eq!(ssp(&[1.0], 3, &mut rng).unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn multinomial_queue_serves_across_batches() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut queue = MultinomialQueue::new(&[0.5, 0.5], Some(4), &mut rng);
        let mut served = 0;
        for k in [3, 3, 4, 1] {
            let out = queue.dequeue(k, &mut rng).unwrap();
            assert_eq!(out.len(), k);
            served += out.len();
        }
        assert_eq!(served, 11);
        assert!(matches!(
            queue.dequeue(5, &mut rng),
            Err(SmcError::QueueCapacity { requested: 5, capacity: 4 })
        ));
    }

    #[test]
    fn multinomial_once_never_picks_zero_weight() {
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..1000 {
            assert_ne!(multinomial_once(&[0.5, 0.0, 0.5], &mut rng), 1);
        }
    }
}
