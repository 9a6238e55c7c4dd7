//! The SMC engine.
//!
//! [`Smc`] runs the generic particle algorithm associated with a
//! [`FeynmanKac`] model. At each time step t it
//!
//! 1. generates particles from $M_0$ (t = 0), or resamples if the ESS of the
//!    (auxiliary) weights dropped below `N * ess_rmin` and moves the particles
//!    through $M_t$ (t > 0);
//! 2. reweights them with the potential $G_t$;
//! 3. updates the estimate of the log normalising constant;
//! 4. optionally saves the particle system and computes summaries.
//!
//! In QMC mode (SQMC) resampling occurs at every step, the particles are
//! ordered along a Hilbert curve, and the uniforms of both the resampling
//! and the move come from a randomised low-discrepancy point set.
//!
//! A filter can be driven one step at a time with [`Smc::step`] or run to
//! completion with [`Smc::run`]; `run` may be called after manual steps.
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::collectors::{Collector, Summaries};
use crate::config::ConfigFile;
use crate::error::SmcError;
use crate::hilbert::hilbert_sort;
use crate::history::{BackwardMode, BackwardPaths, ParticleHistory, Retention};
use crate::model::FeynmanKac;
use crate::population::Population;
use crate::qmc::randomized_halton;
use crate::resampling::{ResamplingScheme, inverse_cdf};
use crate::weights::{Weights, log_mean_exp};

/// Whether and how much of the particle history is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryMode {
    /// No history.
    #[default]
    Off,
    /// Every time step.
    Full,
    /// The last `length` time steps.
    Rolling { length: usize },
}

/// Options of a particle filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmcConfig {
    /// Number of particles.
    pub n: usize,
    /// Resampling scheme.
    pub resampling: ResamplingScheme,
    /// Resampling occurs when ESS < `n * ess_rmin`: 1 means always resample,
    /// 0 never.
    pub ess_rmin: f64,
    /// Run SQMC instead of SMC; the model must be QMC-capable.
    pub qmc: bool,
    /// Print one line per step on stdout.
    pub verbose: bool,
    /// Record the ESS, resampling flags and log-likelihood at every step.
    pub summaries: bool,
    /// Seed of the random number generator; drawn from the OS when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Particle history retention.
    pub store_history: HistoryMode,
}

impl Default for SmcConfig {
    fn default() -> Self {
        SmcConfig {
            n: 100,
            resampling: ResamplingScheme::Systematic,
            ess_rmin: 0.5,
            qmc: false,
            verbose: false,
            summaries: true,
            seed: None,
            store_history: HistoryMode::Off,
        }
    }
}

impl ConfigFile for SmcConfig {}

impl SmcConfig {
    /// Check the options that do not depend on the model.
    pub fn validate(&self) -> Result<(), SmcError> {
        if self.n == 0 {
            return Err(SmcError::InvalidConfig(
                "the number of particles must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.ess_rmin) {
            return Err(SmcError::InvalidConfig(format!(
                "ess_rmin must lie in [0, 1], got {}",
                self.ess_rmin
            )));
        }
        if self.store_history == (HistoryMode::Rolling { length: 0 }) {
            return Err(SmcError::InvalidConfig(
                "a rolling history must keep at least one step".to_string(),
            ));
        }
        Ok(())
    }
}

fn no_particles() -> SmcError {
    SmcError::InvalidModel("no particles to move; step 0 was not performed".to_string())
}

fn no_history() -> SmcError {
    SmcError::IncompleteHistory("the particle history was not stored".to_string())
}

/// A particle filter (or SQMC algorithm) run on a Feynman-Kac model.
pub struct Smc<F: FeynmanKac> {
    fk: F,
    config: SmcConfig,
    rng: StdRng,
    t: usize,
    x: Option<F::Particles>,
    xp: Option<F::Particles>,
    a: Vec<usize>,
    wgts: Weights,
    aux: Option<Weights>,
    logeta: Option<Vec<f64>>,
    rs_flag: bool,
    log_lt: f64,
    loglt: f64,
    log_mean_w: f64,
    hist: Option<ParticleHistory<F::Particles>>,
    summaries: Option<Summaries<F>>,
    cpu_time: Duration,
}

impl<F: FeynmanKac> Smc<F> {
    pub fn new(fk: F, config: SmcConfig) -> Result<Self, SmcError> {
        config.validate()?;
        if config.qmc {
            fk.require_quasi_monte_carlo()?;
        }
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let hist = match config.store_history {
            HistoryMode::Off => None,
            HistoryMode::Full => Some(ParticleHistory::new(config.n, Retention::Full)),
            HistoryMode::Rolling { length } => {
                Some(ParticleHistory::new(config.n, Retention::Rolling(length)))
            }
        };
        let summaries = config.summaries.then(Summaries::new);
        Ok(Smc {
            fk,
            config,
            rng,
            t: 0,
            x: None,
            xp: None,
            a: Vec::new(),
            wgts: Weights::default(),
            aux: None,
            logeta: None,
            rs_flag: false,
            log_lt: 0.0,
            loglt: 0.0,
            log_mean_w: 0.0,
            hist,
            summaries,
            cpu_time: Duration::ZERO,
        })
    }

    /// Keep only the snapshots of the time steps for which `keep(t)` holds.
    /// Replaces the retention set by `store_history`.
    pub fn with_partial_history<K>(mut self, keep: K) -> Self
    where
        K: Fn(usize) -> bool + Send + Sync + 'static,
    {
        self.hist = Some(ParticleHistory::new(
            self.config.n,
            Retention::Partial(Box::new(keep)),
        ));
        self
    }

    /// Register an extra summary, computed after every step. Enables
    /// summaries if they were switched off.
    pub fn with_collector(mut self, collector: Box<dyn Collector<F>>) -> Self {
        self.config.summaries = true;
        self.summaries
            .get_or_insert_with(Summaries::new)
            .add_collector(collector);
        self
    }

    /// Current time step (number of completed steps).
    pub fn t(&self) -> usize {
        self.t
    }

    pub fn n(&self) -> usize {
        self.config.n
    }

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    pub fn fk(&self) -> &F {
        &self.fk
    }

    /// Current particles; `None` before the first step.
    pub fn x(&self) -> Option<&F::Particles> {
        self.x.as_ref()
    }

    /// Ancestors of the current particles; `None` at time 0.
    pub fn xp(&self) -> Option<&F::Particles> {
        self.xp.as_ref()
    }

    /// Current normalised weights.
    pub fn w(&self) -> &[f64] {
        self.wgts.w()
    }

    pub fn wgts(&self) -> &Weights {
        &self.wgts
    }

    /// Weights that drove the last resampling decision: the auxiliary
    /// weights of an APF, the plain weights otherwise.
    pub fn aux(&self) -> &Weights {
        self.aux.as_ref().unwrap_or(&self.wgts)
    }

    /// Ancestor indices of the current particles.
    pub fn a(&self) -> &[usize] {
        &self.a
    }

    /// Whether resampling occurred at the last step.
    pub fn rs_flag(&self) -> bool {
        self.rs_flag
    }

    /// Estimate of the log normalising constant up to the current time.
    pub fn log_lt(&self) -> f64 {
        self.log_lt
    }

    /// Log-likelihood increment of the last step.
    pub fn loglt(&self) -> f64 {
        self.loglt
    }

    pub fn hist(&self) -> Option<&ParticleHistory<F::Particles>> {
        self.hist.as_ref()
    }

    pub fn summaries(&self) -> Option<&Summaries<F>> {
        self.summaries.as_ref()
    }

    /// Wall-clock time of the last call to [`Smc::run`].
    pub fn cpu_time(&self) -> Duration {
        self.cpu_time
    }

    /// True once the model says the algorithm is over.
    pub fn is_done(&self) -> bool {
        self.fk.done(self.t)
    }

    /// Perform one step of the algorithm. Returns `Ok(false)` without doing
    /// anything once the model is done.
    pub fn step(&mut self) -> Result<bool, SmcError> {
        if self.fk.done(self.t) {
            return Ok(false);
        }
        if self.t == 0 {
            self.generate_particles();
        } else {
            self.setup_auxiliary_weights()?;
            if self.config.qmc {
                self.resample_move_qmc()?;
            } else {
                self.resample_move()?;
            }
        }
        self.reweight_particles()?;
        self.compute_log_lt();
        if self.config.verbose {
            println!(
                "t={}: resample:{}, ESS (end of iter)={:.2}",
                self.t,
                self.rs_flag,
                self.wgts.ess()
            );
        }
        debug!(
            "t={} resampled={} ess={:.2} loglt={:.4} logLt={:.4}",
            self.t,
            self.rs_flag,
            self.wgts.ess(),
            self.loglt,
            self.log_lt
        );
        self.save_history();
        self.compute_summaries()?;
        self.t += 1;
        Ok(true)
    }

    /// Run the algorithm until the model is done.
    pub fn run(&mut self) -> Result<(), SmcError> {
        let start = Instant::now();
        while self.step()? {}
        self.cpu_time = start.elapsed();
        info!(
            "{} done: T={} N={} logLt={:.4} in {:.3}s",
            if self.config.qmc { "SQMC" } else { "SMC" },
            self.t,
            self.config.n,
            self.log_lt,
            self.cpu_time.as_secs_f64()
        );
        Ok(())
    }

    fn identity(&self) -> Vec<usize> {
        (0..self.config.n).collect()
    }

    fn generate_particles(&mut self) {
        let x = match self.fk.quasi_monte_carlo().filter(|_| self.config.qmc) {
            Some(qmc) => {
                let u = randomized_halton(self.config.n, qmc.dim(), &mut self.rng);
                qmc.gamma0(&u)
            }
            None => self.fk.m0(self.config.n, &mut self.rng),
        };
        self.x = Some(x);
        self.xp = None;
        self.a = self.identity();
        self.rs_flag = false;
    }

    fn setup_auxiliary_weights(&mut self) -> Result<(), SmcError> {
        match (self.fk.auxiliary(), self.x.as_ref()) {
            (Some(apf), Some(x)) => {
                let logeta = apf.log_eta(self.t - 1, x);
                if logeta.len() != self.config.n {
                    return Err(SmcError::InvalidModel(format!(
                        "log-eta returned {} values at t={}, expected {}",
                        logeta.len(),
                        self.t - 1,
                        self.config.n
                    )));
                }
                self.aux = Some(self.wgts.add(&logeta));
                self.logeta = Some(logeta);
            }
            _ => {
                self.aux = None;
                self.logeta = None;
            }
        }
        Ok(())
    }

    fn current(&self) -> Result<&F::Particles, SmcError> {
        self.x.as_ref().ok_or_else(no_particles)
    }

    fn resample_move(&mut self) -> Result<(), SmcError> {
        let n = self.config.n;
        let aux = self.aux.as_ref().unwrap_or(&self.wgts);
        self.rs_flag = aux.ess() < n as f64 * self.config.ess_rmin;
        let x = self.x.as_ref().ok_or_else(no_particles)?;
        let xp = if self.rs_flag {
            let a = self
                .config
                .resampling
                .resample(aux.w(), Some(n), &mut self.rng)?;
            let xp = x.gather(&a);
            self.a = a;
            self.reset_weights();
            xp
        } else {
            let xp = x.clone();
            self.a = self.identity();
            xp
        };
        let moved = if !self.rs_flag && self.fk.mutate_only_after_resampling() {
            xp.clone()
        } else {
            self.fk.m(self.t, &xp, &mut self.rng)
        };
        self.check_size(&moved)?;
        self.xp = Some(xp);
        self.x = Some(moved);
        Ok(())
    }

    fn resample_move_qmc(&mut self) -> Result<(), SmcError> {
        let qmc = self.fk.require_quasi_monte_carlo()?;
        let n = self.config.n;
        self.rs_flag = true;
        let x = self.x.as_ref().ok_or_else(no_particles)?;
        let du = qmc.dim();
        let mut u = randomized_halton(n, du + 1, &mut self.rng);
        // sort the point set on its first coordinate
        let mut tau: Vec<usize> = (0..n).collect();
        tau.sort_by(|&i, &j| u[(i, 0)].total_cmp(&u[(j, 0)]));
        u = u.select_rows(tau.iter());
        let h_order = hilbert_sort(&qmc.coordinates(x))?;
        let aux_w = self.aux.as_ref().unwrap_or(&self.wgts).w();
        let sorted_w: Vec<f64> = h_order.iter().map(|&k| aux_w[k]).collect();
        let su: Vec<f64> = u.column(0).iter().copied().collect();
        let a: Vec<usize> = inverse_cdf(&su, &sorted_w)
            .into_iter()
            .map(|k| h_order[k])
            .collect();
        let xp = x.gather(&a);
        let v = u.columns(1, du).into_owned();
        let moved = qmc.gamma(self.t, &xp, &v);
        self.check_size(&moved)?;
        if let Some(hist) = self.hist.as_mut() {
            hist.set_hilbert_order(self.t - 1, h_order);
        }
        self.a = a;
        self.reset_weights();
        self.xp = Some(xp);
        self.x = Some(moved);
        Ok(())
    }

    /// Weights right after resampling: uniform, or for an APF
    /// $\log \sum_m W^m \eta(x^m) - \log \eta(x^{A^n})$.
    fn reset_weights(&mut self) {
        self.wgts = match self.logeta.as_ref() {
            Some(logeta) => {
                let lme = log_mean_exp(logeta, Some(self.wgts.w()));
                Weights::new(self.a.iter().map(|&k| lme - logeta[k]).collect())
            }
            None => Weights::default(),
        };
    }

    fn check_size(&self, x: &F::Particles) -> Result<(), SmcError> {
        if x.len() != self.config.n {
            return Err(SmcError::InvalidModel(format!(
                "{} returned {} particles at t={}, expected {}",
                self.fk.model_name(),
                x.len(),
                self.t,
                self.config.n
            )));
        }
        Ok(())
    }

    fn reweight_particles(&mut self) -> Result<(), SmcError> {
        let x = self.current()?;
        self.check_size(x)?;
        let lg = self.fk.log_g(self.t, self.xp.as_ref(), x);
        if lg.len() != self.config.n {
            return Err(SmcError::InvalidModel(format!(
                "log-potential returned {} values at t={}, expected {}",
                lg.len(),
                self.t,
                self.config.n
            )));
        }
        self.wgts = self.wgts.add(&lg);
        if self.wgts.is_degenerate() {
            return Err(SmcError::DegenerateWeights { t: self.t });
        }
        Ok(())
    }

    fn compute_log_lt(&mut self) {
        let log_mean_w = self.wgts.log_mean();
        self.loglt = if self.t == 0 || self.rs_flag {
            log_mean_w
        } else {
            log_mean_w - self.log_mean_w
        };
        self.log_mean_w = log_mean_w;
        self.log_lt += self.loglt;
    }

    fn save_history(&mut self) {
        if let (Some(hist), Some(x)) = (self.hist.as_mut(), self.x.as_ref()) {
            hist.save(self.t, x, &self.wgts, &self.a);
        }
    }

    fn compute_summaries(&mut self) -> Result<(), SmcError> {
        let Some(mut summaries) = self.summaries.take() else {
            return Ok(());
        };
        let res = summaries.collect(self);
        self.summaries = Some(summaries);
        res
    }

    /// Draw one trajectory from the genealogy of the stored history.
    pub fn extract_one_trajectory(&mut self) -> Result<F::Particles, SmcError> {
        let hist = self.hist.as_ref().ok_or_else(no_history)?;
        hist.extract_one_trajectory(&mut self.rng)
    }

    /// FFBS on the stored history, using the filter's own generator.
    pub fn backward_sampling(
        &mut self,
        m: usize,
        mode: BackwardMode,
    ) -> Result<BackwardPaths<F::Particles>, SmcError> {
        let hist = self.hist.as_ref().ok_or_else(no_history)?;
        hist.backward_sampling(&self.fk, m, mode, &mut self.rng)
    }

    /// QMC FFBS on the stored history of an SQMC run.
    pub fn backward_sampling_qmc(&mut self, m: usize) -> Result<Vec<F::Particles>, SmcError> {
        let hist = self.hist.as_ref().ok_or_else(no_history)?;
        hist.backward_sampling_qmc(&self.fk, m, &mut self.rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuxiliaryWeighting;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;
    use rand_distr::StandardNormal;

    /// Random walk observed with noise, with constant data 0.
    struct Walk {
        horizon: usize,
    }

    impl FeynmanKac for Walk {
        type Particles = Vec<f64>;

        fn m0(&self, n: usize, rng: &mut StdRng) -> Vec<f64> {
            (0..n).map(|_| rng.sample(StandardNormal)).collect()
        }

        fn m(&self, _t: usize, xp: &Vec<f64>, rng: &mut StdRng) -> Vec<f64> {
            xp.iter()
                .map(|x| x + rng.sample::<f64, _>(StandardNormal))
                .collect()
        }

        fn log_g(&self, _t: usize, _xp: Option<&Vec<f64>>, x: &Vec<f64>) -> Vec<f64> {
            x.iter().map(|x| -0.5 * x * x).collect()
        }

        fn done(&self, t: usize) -> bool {
            t >= self.horizon
        }
    }

    /// Model whose potential is zero everywhere after t = 1.
    struct Vanishing;

    impl FeynmanKac for Vanishing {
        type Particles = Vec<f64>;

        fn m0(&self, n: usize, _rng: &mut StdRng) -> Vec<f64> {
            vec![0.0; n]
        }

        fn m(&self, _t: usize, xp: &Vec<f64>, _rng: &mut StdRng) -> Vec<f64> {
            xp.clone()
        }

        fn log_g(&self, t: usize, _xp: Option<&Vec<f64>>, x: &Vec<f64>) -> Vec<f64> {
            let v = if t >= 1 { f64::NEG_INFINITY } else { 0.0 };
            vec![v; x.len()]
        }

        fn done(&self, t: usize) -> bool {
            t >= 3
        }
    }

    /// Potential moving with t; particles are only moved after resampling.
    struct Gated;

    impl FeynmanKac for Gated {
        type Particles = Vec<f64>;

        fn m0(&self, n: usize, rng: &mut StdRng) -> Vec<f64> {
            (0..n).map(|_| rng.sample(StandardNormal)).collect()
        }

        fn m(&self, _t: usize, xp: &Vec<f64>, rng: &mut StdRng) -> Vec<f64> {
            xp.iter()
                .map(|x| x + rng.sample::<f64, _>(StandardNormal))
                .collect()
        }

        fn log_g(&self, t: usize, _xp: Option<&Vec<f64>>, x: &Vec<f64>) -> Vec<f64> {
            x.iter().map(|x| -0.5 * (x - t as f64).powi(2)).collect()
        }

        fn done(&self, t: usize) -> bool {
            t >= 5
        }

        fn mutate_only_after_resampling(&self) -> bool {
            true
        }
    }

    /// Auxiliary weighting that drops a particle.
    struct ShortEta;

    impl FeynmanKac for ShortEta {
        type Particles = Vec<f64>;

        fn m0(&self, n: usize, _rng: &mut StdRng) -> Vec<f64> {
            vec![0.0; n]
        }

        fn m(&self, _t: usize, xp: &Vec<f64>, _rng: &mut StdRng) -> Vec<f64> {
            xp.clone()
        }

        fn log_g(&self, _t: usize, _xp: Option<&Vec<f64>>, x: &Vec<f64>) -> Vec<f64> {
            vec![0.0; x.len()]
        }

        fn done(&self, t: usize) -> bool {
            t >= 3
        }

        fn auxiliary(&self) -> Option<&dyn AuxiliaryWeighting<Vec<f64>>> {
            Some(self)
        }
    }

    impl AuxiliaryWeighting<Vec<f64>> for ShortEta {
        fn log_eta(&self, _t: usize, x: &Vec<f64>) -> Vec<f64> {
            vec![0.0; x.len() - 1]
        }
    }

    fn config(n: usize, seed: u64) -> SmcConfig {
        SmcConfig {
            n,
            seed: Some(seed),
            ..SmcConfig::default()
        }
    }

    #[test]
    fn run_reaches_horizon() {
        let mut smc = Smc::new(Walk { horizon: 10 }, config(200, 1)).unwrap();
        smc.run().unwrap();
        assert_eq!(smc.t(), 10);
        assert!(smc.is_done());
        assert!(smc.log_lt().is_finite());
        let summaries = smc.summaries().unwrap();
        assert_eq!(summaries.ess().len(), 10);
        assert_eq!(summaries.rs_flags().len(), 10);
        assert_approx_eq!(*summaries.log_lts().last().unwrap(), smc.log_lt());
        assert!(!summaries.rs_flags()[0]);
    }

    #[test]
    fn run_after_manual_steps_matches_single_run() {
        let mut a = Smc::new(Walk { horizon: 8 }, config(100, 7)).unwrap();
        a.run().unwrap();
        let mut b = Smc::new(Walk { horizon: 8 }, config(100, 7)).unwrap();
        assert!(b.step().unwrap());
        assert!(b.step().unwrap());
        b.run().unwrap();
        assert_eq!(a.log_lt(), b.log_lt());
        assert!(!b.step().unwrap());
        assert_eq!(b.t(), 8);
    }

    #[test]
    fn ancestors_are_identity_without_resampling() {
        let cfg = SmcConfig {
            ess_rmin: 0.0,
            ..config(50, 3)
        };
        let mut smc = Smc::new(Walk { horizon: 4 }, cfg).unwrap();
        smc.run().unwrap();
        assert!(!smc.rs_flag());
        assert_eq!(smc.a(), (0..50).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn always_resample_with_ess_rmin_one() {
        let cfg = SmcConfig {
            ess_rmin: 1.0,
            ..config(50, 3)
        };
        let mut smc = Smc::new(Walk { horizon: 4 }, cfg).unwrap();
        smc.run().unwrap();
        let flags = smc.summaries().unwrap().rs_flags();
        assert_eq!(flags, &[false, true, true, true]);
    }

    #[test]
    fn log_likelihood_is_sum_of_increments() {
        let mut smc = Smc::new(Walk { horizon: 6 }, config(100, 5)).unwrap();
        let mut total = 0.0;
        while smc.step().unwrap() {
            total += smc.loglt();
        }
        assert_approx_eq!(total, smc.log_lt(), 1e-10);
    }

    #[test]
    fn invalid_options_are_rejected() {
        assert!(matches!(
            Smc::new(Walk { horizon: 1 }, config(0, 0)),
            Err(SmcError::InvalidConfig(_))
        ));
        let cfg = SmcConfig {
            ess_rmin: 1.5,
            ..config(10, 0)
        };
        assert!(matches!(
            Smc::new(Walk { horizon: 1 }, cfg),
            Err(SmcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn qmc_requires_capability() {
        let cfg = SmcConfig {
            qmc: true,
            ..config(10, 0)
        };
        match Smc::new(Walk { horizon: 1 }, cfg) {
            Err(SmcError::MissingCapability { capability, .. }) => {
                assert_eq!(capability, "Gamma0/Gamma")
            }
            _ => panic!("expected a missing capability error"),
        }
    }

    #[test]
    fn degenerate_weights_are_reported() {
        let mut smc = Smc::new(Vanishing, config(10, 0)).unwrap();
        assert!(smc.step().unwrap());
        assert_eq!(smc.step(), Err(SmcError::DegenerateWeights { t: 1 }));
    }

    #[test]
    fn smoothing_needs_a_history() {
        let mut smc = Smc::new(Walk { horizon: 3 }, config(10, 0)).unwrap();
        smc.run().unwrap();
        assert!(matches!(
            smc.extract_one_trajectory(),
            Err(SmcError::IncompleteHistory(_))
        ));
    }

    #[test]
    fn partial_history_keeps_requested_times() {
        let smc = Smc::new(Walk { horizon: 6 }, config(10, 0)).unwrap();
        let mut smc = smc.with_partial_history(|t| t % 2 == 1);
        smc.run().unwrap();
        assert_eq!(smc.hist().unwrap().times(), vec![1, 3, 5]);
    }

    #[test]
    fn particles_stay_put_until_resampling() {
        let cfg = SmcConfig {
            ess_rmin: 0.0,
            ..config(100, 9)
        };
        let mut smc = Smc::new(Gated, cfg).unwrap();
        assert!(smc.step().unwrap());
        let x0 = smc.x().unwrap().clone();
        smc.run().unwrap();
        assert!(!smc.summaries().unwrap().rs_flags().iter().any(|&f| f));
        assert_eq!(smc.x().unwrap(), &x0);
        // without resampling the increments telescope to the final weights
        let total: Vec<f64> = x0
            .iter()
            .map(|x| (0..5).map(|t| -0.5 * (x - t as f64).powi(2)).sum())
            .collect();
        assert_approx_eq!(smc.log_lt(), log_mean_exp(&total, None), 1e-9);
    }

    #[test]
    fn short_log_eta_is_rejected() {
        let mut smc = Smc::new(ShortEta, config(10, 0)).unwrap();
        assert!(smc.step().unwrap());
        assert!(matches!(smc.step(), Err(SmcError::InvalidModel(_))));
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SmcConfig {
            store_history: HistoryMode::Rolling { length: 5 },
            resampling: ResamplingScheme::Ssp,
            ..config(250, 42)
        };
        for name in ["smc.json", "smc.yaml", "smc.toml"] {
            let path = dir.path().join(name);
            cfg.to_file(&path).unwrap();
            assert_eq!(SmcConfig::from_file(&path).unwrap(), cfg);
        }
        assert!(cfg.to_file(dir.path().join("smc.txt")).is_err());
    }
}
