//! Summaries computed at every step of a particle filter.
//!
//! By default [`Summaries`] records, at each time t, the ESS, whether
//! resampling occurred and the running log-likelihood estimate. Extra
//! quantities are added as [`Collector`]s:
//!
//! - [`Moments`]: any function of the current weighted sample, e.g. the
//!   filtering mean and variance;
//! - [`NaiveOnlineSmoother`]: online smoothing of an additive function by
//!   carrying its value along the genealogy (cost O(N), degenerates with t);
//! - [`ON2OnlineSmoother`]: the O(N²) forward-only version, which applies
//!   the backward kernel at every step;
//! - [`ParisOnlineSmoother`]: PaRIS, which replaces the backward kernel by a
//!   few rejection draws per particle (O(N) expected cost).
use std::collections::BTreeMap;

use log::warn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SmcError;
use crate::history::RejectionFallback;
use crate::model::FeynmanKac;
use crate::population::Population;
use crate::resampling::{MultinomialQueue, multinomial_once};
use crate::smc::Smc;
use crate::weights::{exp_and_normalise, wmean_and_var};

/// A quantity computed from the state of a filter after each step.
pub trait Collector<F: FeynmanKac> {
    /// Key under which the values are stored.
    fn name(&self) -> &str;

    /// Compute the value(s) for the current time step.
    fn fetch(&mut self, smc: &Smc<F>) -> Result<Vec<f64>, SmcError>;
}

/// Per-step records of a filter.
pub struct Summaries<F: FeynmanKac> {
    ess: Vec<f64>,
    rs_flags: Vec<bool>,
    log_lts: Vec<f64>,
    collectors: Vec<Box<dyn Collector<F>>>,
    extras: BTreeMap<String, Vec<Vec<f64>>>,
}

impl<F: FeynmanKac> Default for Summaries<F> {
    fn default() -> Self {
        Summaries::new()
    }
}

impl<F: FeynmanKac> Summaries<F> {
    pub fn new() -> Self {
        Summaries {
            ess: Vec::new(),
            rs_flags: Vec::new(),
            log_lts: Vec::new(),
            collectors: Vec::new(),
            extras: BTreeMap::new(),
        }
    }

    pub fn add_collector(&mut self, collector: Box<dyn Collector<F>>) {
        self.extras.insert(collector.name().to_string(), Vec::new());
        self.collectors.push(collector);
    }

    pub(crate) fn collect(&mut self, smc: &Smc<F>) -> Result<(), SmcError> {
        self.ess.push(smc.wgts().ess());
        self.rs_flags.push(smc.rs_flag());
        self.log_lts.push(smc.log_lt());
        for c in self.collectors.iter_mut() {
            let value = c.fetch(smc)?;
            self.extras.entry(c.name().to_string()).or_default().push(value);
        }
        Ok(())
    }

    /// ESS at the end of each step.
    pub fn ess(&self) -> &[f64] {
        &self.ess
    }

    /// Whether resampling occurred at each step.
    pub fn rs_flags(&self) -> &[bool] {
        &self.rs_flags
    }

    /// Log-likelihood estimate up to each step.
    pub fn log_lts(&self) -> &[f64] {
        &self.log_lts
    }

    /// Values of the collector called `name`, one entry per step.
    pub fn get(&self, name: &str) -> Option<&[Vec<f64>]> {
        self.extras.get(name).map(Vec::as_slice)
    }

    /// Names of the registered collectors.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.extras.keys().map(String::as_str)
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.ess.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ess.is_empty()
    }
}

type MomentFn<P> = Box<dyn Fn(&[f64], &P) -> Vec<f64> + Send + Sync>;

/// Weighted moments of the current particles.
pub struct Moments<F: FeynmanKac> {
    name: String,
    func: MomentFn<F::Particles>,
}

impl<F: FeynmanKac> Moments<F> {
    /// `func(W, X)` is called at every step with the normalised weights and
    /// the particles.
    pub fn new<G>(name: &str, func: G) -> Self
    where
        G: Fn(&[f64], &F::Particles) -> Vec<f64> + Send + Sync + 'static,
    {
        Moments {
            name: name.to_string(),
            func: Box::new(func),
        }
    }
}

impl<F: FeynmanKac<Particles = Vec<f64>>> Moments<F> {
    /// Weighted mean and variance of scalar particles, stored as
    /// `[mean, var]` under the name `moments`.
    pub fn mean_and_var() -> Self {
        Moments::new("moments", |w, x: &Vec<f64>| {
            let (m, v) = wmean_and_var(w, x);
            vec![m, v]
        })
    }
}

impl<F: FeynmanKac> Collector<F> for Moments<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&mut self, smc: &Smc<F>) -> Result<Vec<f64>, SmcError> {
        let x = smc
            .x()
            .ok_or_else(|| SmcError::InvalidModel("no particles".to_string()))?;
        Ok((self.func)(smc.w(), x))
    }
}

fn weighted_average(w: &[f64], v: &[f64]) -> f64 {
    w.iter().zip(v).map(|(wi, vi)| wi * vi).sum()
}

/// Online smoothing by genealogy tracking: $\Phi_t^n = \Phi_{t-1}^{A_t^n} +
/// \psi_t(X_{t-1}^{A_t^n}, X_t^n)$. Needs [`crate::model::AdditiveFunction`].
#[derive(Debug, Default)]
pub struct NaiveOnlineSmoother {
    phi: Vec<f64>,
}

impl NaiveOnlineSmoother {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: FeynmanKac> Collector<F> for NaiveOnlineSmoother {
    fn name(&self) -> &str {
        "naive_online_smooth"
    }

    fn fetch(&mut self, smc: &Smc<F>) -> Result<Vec<f64>, SmcError> {
        let af = smc.fk().require_additive_function()?;
        let x = smc
            .x()
            .ok_or_else(|| SmcError::InvalidModel("no particles".to_string()))?;
        let psi = af.add_func(smc.t(), smc.xp(), x);
        self.phi = if smc.t() == 0 {
            psi
        } else {
            smc.a()
                .iter()
                .zip(&psi)
                .map(|(&k, p)| self.phi[k] + p)
                .collect()
        };
        Ok(vec![weighted_average(smc.w(), &self.phi)])
    }
}

/// Forward-only O(N²) online smoothing:
/// $\Phi_t^n = \sum_m W_{t-1}^m p_t(X_t^n | X_{t-1}^m) [\Phi_{t-1}^m + \psi_t(X_{t-1}^m, X_t^n)]
/// / \sum_m W_{t-1}^m p_t(X_t^n | X_{t-1}^m)$.
/// Needs [`crate::model::AdditiveFunction`] and
/// [`crate::model::TransitionDensity`].
pub struct ON2OnlineSmoother<P> {
    phi: Vec<f64>,
    prev_x: Option<P>,
    prev_lw: Vec<f64>,
}

impl<P> Default for ON2OnlineSmoother<P> {
    fn default() -> Self {
        ON2OnlineSmoother {
            phi: Vec::new(),
            prev_x: None,
            prev_lw: Vec::new(),
        }
    }
}

impl<P> ON2OnlineSmoother<P> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<F: FeynmanKac> Collector<F> for ON2OnlineSmoother<F::Particles> {
    fn name(&self) -> &str {
        "on2_online_smooth"
    }

    fn fetch(&mut self, smc: &Smc<F>) -> Result<Vec<f64>, SmcError> {
        let af = smc.fk().require_additive_function()?;
        let x = smc
            .x()
            .ok_or_else(|| SmcError::InvalidModel("no particles".to_string()))?;
        match (smc.t(), self.prev_x.as_ref()) {
            (0, _) | (_, None) => {
                self.phi = af.add_func(0, None, x);
            }
            (t, Some(prev_x)) => {
                let td = smc.fk().require_transition_density()?;
                let mut phi = Vec::with_capacity(x.len());
                for n in 0..x.len() {
                    let xn = x.gather(&[n]);
                    let lp = td.log_pt(t, prev_x, &xn);
                    let lw: Vec<f64> = self.prev_lw.iter().zip(&lp).map(|(a, b)| a + b).collect();
                    let w = exp_and_normalise(&lw);
                    let psi = af.add_func(t, Some(prev_x), &xn);
                    let terms: Vec<f64> = self.phi.iter().zip(&psi).map(|(a, b)| a + b).collect();
                    phi.push(weighted_average(&w, &terms));
                }
                self.phi = phi;
            }
        }
        self.prev_x = Some(x.clone());
        self.prev_lw = smc.wgts().lw().to_vec();
        Ok(vec![weighted_average(smc.w(), &self.phi)])
    }
}

/// PaRIS online smoothing (Olsson and Westerborn, 2017):
/// $\Phi_t^n = \frac{1}{\tilde N} \sum_{m=1}^{\tilde N} [\Phi_{t-1}^{J^{n,m}} + \psi_t(X_{t-1}^{J^{n,m}}, X_t^n)]$,
/// where the $\tilde N$ indices $J^{n,m}$ are drawn from the backward kernel
/// by rejection, with multinomial proposals from $W_{t-1}$.
///
/// Needs [`crate::model::AdditiveFunction`],
/// [`crate::model::TransitionDensity`] and [`crate::model::RejectionBound`].
/// Each step records `[estimate, proposals]`, the second entry being the
/// number of rejection proposals spent at that step. A draw that uses up
/// `max_attempts` proposals is handled by the [`RejectionFallback`] policy.
pub struct ParisOnlineSmoother<P> {
    n_paris: usize,
    max_attempts: usize,
    fallback: RejectionFallback,
    rng: StdRng,
    phi: Vec<f64>,
    prev_x: Option<P>,
    prev_lw: Vec<f64>,
    prev_w: Vec<f64>,
    fallbacks: usize,
}

impl<P> Default for ParisOnlineSmoother<P> {
    fn default() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl<P> ParisOnlineSmoother<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector with its own seeded generator.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        ParisOnlineSmoother {
            n_paris: 2,
            max_attempts: 10_000,
            fallback: RejectionFallback::default(),
            rng,
            phi: Vec::new(),
            prev_x: None,
            prev_lw: Vec::new(),
            prev_w: Vec::new(),
            fallbacks: 0,
        }
    }

    /// Number of backward draws per particle (at least 1).
    pub fn n_paris(mut self, n_paris: usize) -> Self {
        self.n_paris = n_paris.max(1);
        self
    }

    /// Attempts allowed for a single draw, and what happens once they are used up.
    pub fn budget(mut self, max_attempts: usize, fallback: RejectionFallback) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.fallback = fallback;
        self
    }

    /// Draws that fell back to the exact backward kernel so far.
    pub fn fallbacks(&self) -> usize {
        self.fallbacks
    }
}

impl<F: FeynmanKac> Collector<F> for ParisOnlineSmoother<F::Particles> {
    fn name(&self) -> &str {
        "paris_online_smooth"
    }

    fn fetch(&mut self, smc: &Smc<F>) -> Result<Vec<f64>, SmcError> {
        let af = smc.fk().require_additive_function()?;
        let x = smc
            .x()
            .ok_or_else(|| SmcError::InvalidModel("no particles".to_string()))?;
        let mut nprop = 0usize;
        match (smc.t(), self.prev_x.as_ref()) {
            (0, _) | (_, None) => {
                self.phi = af.add_func(0, None, x);
            }
            (t, Some(prev_x)) => {
                let td = smc.fk().require_transition_density()?;
                let log_bound = smc.fk().require_rejection_bound()?.upper_bound_log_pt(t);
                let mut queue = MultinomialQueue::new(&self.prev_w, None, &mut self.rng);
                let mut phi = Vec::with_capacity(x.len());
                let mut step_fallbacks = 0usize;
                for n in 0..x.len() {
                    let xn = x.gather(&[n]);
                    let mut js = Vec::with_capacity(self.n_paris);
                    for _ in 0..self.n_paris {
                        let mut attempts = 0usize;
                        let j = loop {
                            let a = queue.dequeue(1, &mut self.rng)?[0];
                            attempts += 1;
                            let lp = td.log_pt(t, &prev_x.gather(&[a]), &xn)[0];
                            let u: f64 = self.rng.random();
                            if u.ln() < lp - log_bound {
                                break a;
                            }
                            if attempts < self.max_attempts {
                                continue;
                            }
                            match self.fallback {
                                RejectionFallback::Fail => {
                                    return Err(SmcError::RejectionBudgetExhausted { t, attempts });
                                }
                                RejectionFallback::Quadratic => {
                                    let lp = td.log_pt(t, prev_x, &xn);
                                    let lw: Vec<f64> =
                                        self.prev_lw.iter().zip(&lp).map(|(a, b)| a + b).collect();
                                    step_fallbacks += 1;
                                    break multinomial_once(&exp_and_normalise(&lw), &mut self.rng);
                                }
                            }
                        };
                        nprop += attempts;
                        js.push(j);
                    }
                    let psi = af.add_func(t, Some(&prev_x.gather(&js)), &xn);
                    let total: f64 = js.iter().zip(&psi).map(|(&j, p)| self.phi[j] + p).sum();
                    phi.push(total / js.len() as f64);
                }
                if step_fallbacks > 0 {
                    warn!("PaRIS: {step_fallbacks} draws exceeded {} attempts at t={t}", self.max_attempts);
                    self.fallbacks += step_fallbacks;
                }
                self.phi = phi;
            }
        }
        self.prev_x = Some(x.clone());
        self.prev_lw = smc.wgts().lw().to_vec();
        self.prev_w = smc.w().to_vec();
        Ok(vec![weighted_average(smc.w(), &self.phi), nprop as f64])
    }
}
