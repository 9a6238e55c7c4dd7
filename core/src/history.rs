//! Particle history and off-line smoothing.
//!
//! Off-line smoothing approximates the law of a complete trajectory
//! $X_{0:T}$ given $Y_{0:T}$. It takes two passes:
//!
//! 1. run a particle filter forward with history recording enabled, so that
//!    at every time t the particles, their weights and their ancestor
//!    indices are kept;
//! 2. work backward through that history.
//!
//! [`ParticleHistory`] stores the snapshots and implements the backward
//! algorithms:
//!
//! - genealogy tracing ([`ParticleHistory::compute_trajectories`],
//!   [`ParticleHistory::extract_one_trajectory`]);
//! - forward filtering backward sampling (FFBS), either the exact O(N²)
//!   version or the O(N) rejection version
//!   ([`ParticleHistory::backward_sampling`]), and its QMC variant
//!   ([`ParticleHistory::backward_sampling_qmc`]);
//! - two-filter smoothing ([`ParticleHistory::twofilter_smoothing`]).
//!
//! Keeping the full history of a filter may take a lot of memory; a rolling
//! window ([`Retention::Rolling`]) keeps only the last k snapshots.
use std::collections::VecDeque;
use std::fmt::{self, Debug};

use log::{debug, info, warn};
use rand::Rng;

use crate::error::SmcError;
use crate::hilbert::hilbert_sort;
use crate::model::{FeynmanKac, TransitionDensity};
use crate::population::Population;
use crate::qmc::randomized_halton;
use crate::resampling::{MultinomialQueue, multinomial, multinomial_once};
use crate::weights::{Weights, exp_and_normalise};

/// Which snapshots a [`ParticleHistory`] keeps.
pub enum Retention {
    /// Every time step.
    Full,
    /// The last k time steps.
    Rolling(usize),
    /// Only the time steps for which the predicate holds.
    Partial(Box<dyn Fn(usize) -> bool + Send + Sync>),
}

impl Debug for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retention::Full => f.write_str("Full"),
            Retention::Rolling(k) => f.debug_tuple("Rolling").field(k).finish(),
            Retention::Partial(_) => f.write_str("Partial(<predicate>)"),
        }
    }
}

/// How ancestors are redrawn in backward sampling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackwardMode {
    /// Exact retrospective weights against all N particles: O(N) per draw.
    Quadratic,
    /// Rejection sampling with multinomial proposals: O(1) expected per draw
    /// when the bound on the transition density is tight.
    Rejection {
        /// Attempts allowed for a single draw.
        max_attempts: usize,
        /// What to do once the attempts are used up.
        fallback: RejectionFallback,
    },
}

/// Policy applied when a rejection draw uses up its attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RejectionFallback {
    /// Return [`SmcError::RejectionBudgetExhausted`].
    Fail,
    /// Redraw that ancestor with the exact O(N) weights.
    #[default]
    Quadratic,
}

/// Output of [`ParticleHistory::backward_sampling`].
#[derive(Clone, Debug)]
pub struct BackwardPaths<P> {
    /// `paths[t]` holds component t of the M trajectories.
    pub paths: Vec<P>,
    /// Overall acceptance rate of the rejection steps (rejection mode only).
    pub acceptance_rate: Option<f64>,
    /// Number of draws that fell back to the exact weights.
    pub fallbacks: usize,
}

/// Options of [`ParticleHistory::twofilter_smoothing`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TwoFilterOptions<'a> {
    /// Use the O(N) importance sampling version instead of the O(N²) sum.
    pub linear_cost: bool,
    /// Log-modification of the forward weights (O(N) version only).
    pub modif_forward: Option<&'a [f64]>,
    /// Log-modification of the information filter weights (O(N) version only).
    pub modif_info: Option<&'a [f64]>,
}

/// Output of [`ParticleHistory::twofilter_smoothing`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TwoFilterEstimate {
    pub estimate: f64,
    /// ESS of the importance weights (O(N) version only).
    pub ess: Option<f64>,
}

/// Snapshots of a particle system: at each recorded time t, the N
/// particles, their weights and their ancestor indices.
///
/// Snapshots are addressed by position: `0` is the oldest retained
/// snapshot and negative positions count from the end (`-1` is the latest).
/// [`ParticleHistory::time`] maps a position to its absolute time step.
pub struct ParticleHistory<P> {
    n: usize,
    retention: Retention,
    times: VecDeque<usize>,
    x: VecDeque<P>,
    wgts: VecDeque<Weights>,
    a: VecDeque<Vec<usize>>,
    h_orders: VecDeque<Option<Vec<usize>>>,
}

impl<P> Debug for ParticleHistory<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticleHistory")
            .field("n", &self.n)
            .field("retention", &self.retention)
            .field("len", &self.times.len())
            .field("times", &format_args!("{:?}..{:?}", self.times.front(), self.times.back()))
            .finish()
    }
}

fn cumsum(w: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    w.iter()
        .map(|wi| {
            acc += wi;
            acc
        })
        .collect()
}

/// First index `i` with `cw[i] >= u`, clamped to the last index.
fn search_sorted(cw: &[f64], u: f64) -> usize {
    cw.partition_point(|&c| c < u).min(cw.len() - 1)
}

impl<P: Population> ParticleHistory<P> {
    pub fn new(n: usize, retention: Retention) -> Self {
        ParticleHistory {
            n,
            retention,
            times: VecDeque::new(),
            x: VecDeque::new(),
            wgts: VecDeque::new(),
            a: VecDeque::new(),
            h_orders: VecDeque::new(),
        }
    }

    /// Save one snapshot, subject to the retention policy.
    pub fn save(&mut self, t: usize, x: &P, wgts: &Weights, a: &[usize]) {
        match &self.retention {
            Retention::Full => {}
            Retention::Rolling(k) => {
                if *k == 0 {
                    return;
                }
                if self.times.len() == *k {
                    self.times.pop_front();
                    self.x.pop_front();
                    self.wgts.pop_front();
                    self.a.pop_front();
                    self.h_orders.pop_front();
                }
            }
            Retention::Partial(keep) => {
                if !keep(t) {
                    return;
                }
            }
        }
        self.times.push_back(t);
        self.x.push_back(x.clone());
        self.wgts.push_back(wgts.clone());
        self.a.push_back(a.to_vec());
        self.h_orders.push_back(None);
    }

    /// Attach the Hilbert order of the particles of time `t` (computed by
    /// SQMC at time t+1) to the corresponding snapshot, if retained.
    pub fn set_hilbert_order(&mut self, t: usize, order: Vec<usize>) {
        if let Some(pos) = self.times.iter().rposition(|&s| s == t) {
            self.h_orders[pos] = Some(order);
        }
    }

    /// Number of snapshots held.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Number of particles per snapshot.
    pub fn n(&self) -> usize {
        self.n
    }

    pub fn retention(&self) -> &Retention {
        &self.retention
    }

    /// Absolute time steps of the retained snapshots.
    pub fn times(&self) -> Vec<usize> {
        self.times.iter().copied().collect()
    }

    fn resolve(&self, pos: isize) -> Option<usize> {
        let len = self.times.len() as isize;
        let p = if pos < 0 { len + pos } else { pos };
        (0..len).contains(&p).then_some(p as usize)
    }

    /// Time step of the snapshot at position `pos`.
    pub fn time(&self, pos: isize) -> Option<usize> {
        self.resolve(pos).map(|p| self.times[p])
    }

    /// Particles at position `pos`.
    pub fn x(&self, pos: isize) -> Option<&P> {
        self.resolve(pos).map(|p| &self.x[p])
    }

    /// Weights at position `pos`.
    pub fn wgts(&self, pos: isize) -> Option<&Weights> {
        self.resolve(pos).map(|p| &self.wgts[p])
    }

    /// Ancestor indices at position `pos`.
    pub fn a(&self, pos: isize) -> Option<&[usize]> {
        self.resolve(pos).map(|p| self.a[p].as_slice())
    }

    /// Hilbert order recorded at position `pos`, if any.
    pub fn hilbert_order(&self, pos: isize) -> Option<&[usize]> {
        self.resolve(pos).and_then(|p| self.h_orders[p].as_deref())
    }

    /// Backward algorithms need consecutive time steps.
    fn require_contiguous(&self) -> Result<(), SmcError> {
        if self.times.is_empty() {
            return Err(SmcError::IncompleteHistory("history is empty".to_string()));
        }
        let contiguous = self
            .times
            .iter()
            .zip(self.times.iter().skip(1))
            .all(|(a, b)| b == &(a + 1));
        if contiguous {
            Ok(())
        } else {
            Err(SmcError::IncompleteHistory(
                "snapshots are not consecutive in time".to_string(),
            ))
        }
    }

    /// Genealogy of the current particles: `b[t][n]` is the position, in the
    /// snapshot at position t, of the ancestor of the latest particle n.
    pub fn compute_trajectories(&self) -> Result<Vec<Vec<usize>>, SmcError> {
        self.require_contiguous()?;
        let len = self.len();
        let mut b = vec![Vec::new(); len];
        b[len - 1] = (0..self.n).collect();
        for t in (0..len - 1).rev() {
            b[t] = b[t + 1].iter().map(|&k| self.a[t + 1][k]).collect();
        }
        Ok(b)
    }

    /// One trajectory: the final particle is drawn from the final weights,
    /// then its ancestors are followed back to the first snapshot.
    pub fn extract_one_trajectory<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<P, SmcError> {
        self.require_contiguous()?;
        let len = self.len();
        let mut n = multinomial_once(self.wgts[len - 1].w(), rng);
        let mut parts = Vec::with_capacity(len);
        for t in (0..len).rev() {
            parts.push(self.x[t].gather(&[n]));
            n = self.a[t][n];
        }
        parts.reverse();
        Ok(P::concat(&parts))
    }

    /// Exact ancestor draw at position `pos` for the descendant `xd`
    /// (a single particle at position `pos + 1`).
    fn exact_ancestor<R: Rng + ?Sized>(
        &self,
        td: &dyn TransitionDensity<P>,
        pos: usize,
        xd: &P,
        rng: &mut R,
    ) -> usize {
        let lp = td.log_pt(self.times[pos + 1], &self.x[pos], xd);
        let lwm: Vec<f64> = self.wgts[pos].lw().iter().zip(&lp).map(|(l, p)| l + p).collect();
        multinomial_once(&exp_and_normalise(&lwm), rng)
    }

    /// Forward filtering backward sampling: generate `m` trajectories from
    /// the smoothing distribution.
    ///
    /// The final components are drawn from the final weights; then, going
    /// backward, the ancestor at time t of a trajectory whose component at
    /// t+1 is $x_{t+1}$ is drawn with probability
    /// $\propto W_t^n p_{t+1}(x_{t+1} | X_t^n)$.
    ///
    /// - [`BackwardMode::Quadratic`] evaluates these weights for all N
    ///   particles: cost O(T M N).
    /// - [`BackwardMode::Rejection`] proposes $n \sim W_t$ and accepts with
    ///   probability $p_{t+1}(x_{t+1} | X_t^n) / C_{t+1}$, where
    ///   $\log C_t$ is [`crate::model::RejectionBound::upper_bound_log_pt`]:
    ///   expected cost O(T (M + N)) when the bound is tight, unbounded
    ///   otherwise, hence the attempt budget. The overall acceptance rate is
    ///   reported in the output.
    pub fn backward_sampling<F, R>(
        &self,
        fk: &F,
        m: usize,
        mode: BackwardMode,
        rng: &mut R,
    ) -> Result<BackwardPaths<P>, SmcError>
    where
        F: FeynmanKac<Particles = P> + ?Sized,
        R: Rng + ?Sized,
    {
        self.require_contiguous()?;
        let td = fk.require_transition_density()?;
        let len = self.len();
        let mut idx = vec![vec![0usize; m]; len];
        idx[len - 1] = multinomial(self.wgts[len - 1].w(), m, rng);
        let (acceptance_rate, fallbacks) = match mode {
            BackwardMode::Quadratic => {
                self.backward_sampling_on2(td, m, &mut idx, rng);
                (None, 0)
            }
            BackwardMode::Rejection { max_attempts, fallback } => {
                let bound = fk.require_rejection_bound()?;
                let bounds: Vec<f64> = (1..len).map(|pos| bound.upper_bound_log_pt(self.times[pos])).collect();
                let (rate, fallbacks) =
                    self.backward_sampling_on(td, &bounds, m, max_attempts, fallback, &mut idx, rng)?;
                (Some(rate), fallbacks)
            }
        };
        if let Some(rate) = acceptance_rate {
            info!("FFBS (rejection): acceptance rate {rate:.3}, {fallbacks} exact fallbacks");
        }
        let paths = (0..len).map(|t| self.x[t].gather(&idx[t])).collect();
        Ok(BackwardPaths {
            paths,
            acceptance_rate,
            fallbacks,
        })
    }

    fn backward_sampling_on2<R: Rng + ?Sized>(
        &self,
        td: &dyn TransitionDensity<P>,
        m: usize,
        idx: &mut [Vec<usize>],
        rng: &mut R,
    ) {
        let len = self.len();
        for traj in 0..m {
            for t in (0..len - 1).rev() {
                let xd = self.x[t + 1].gather(&[idx[t + 1][traj]]);
                idx[t][traj] = self.exact_ancestor(td, t, &xd, rng);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn backward_sampling_on<R: Rng + ?Sized>(
        &self,
        td: &dyn TransitionDensity<P>,
        bounds: &[f64],
        m: usize,
        max_attempts: usize,
        fallback: RejectionFallback,
        idx: &mut [Vec<usize>],
        rng: &mut R,
    ) -> Result<(f64, usize), SmcError> {
        let len = self.len();
        let mut nattempts = 0usize;
        let mut fallbacks = 0usize;
        for t in (0..len - 1).rev() {
            let mut queue = MultinomialQueue::new(self.wgts[t].w(), Some(m), rng);
            let mut pending: Vec<usize> = (0..m).collect();
            let mut attempts = vec![0usize; m];
            while !pending.is_empty() {
                nattempts += pending.len();
                let proposals = queue.dequeue(pending.len(), rng)?;
                let descendants: Vec<usize> = pending.iter().map(|&traj| idx[t + 1][traj]).collect();
                let lp = td.log_pt(
                    self.times[t + 1],
                    &self.x[t].gather(&proposals),
                    &self.x[t + 1].gather(&descendants),
                );
                let mut still_pending = Vec::new();
                for (k, &traj) in pending.iter().enumerate() {
                    let u: f64 = rng.random();
                    if u.ln() < lp[k] - bounds[t] {
                        idx[t][traj] = proposals[k];
                        continue;
                    }
                    attempts[traj] += 1;
                    if attempts[traj] < max_attempts {
                        still_pending.push(traj);
                        continue;
                    }
                    match fallback {
                        RejectionFallback::Fail => {
                            return Err(SmcError::RejectionBudgetExhausted {
                                t: self.times[t],
                                attempts: attempts[traj],
                            });
                        }
                        RejectionFallback::Quadratic => {
                            let xd = self.x[t + 1].gather(&[descendants[k]]);
                            idx[t][traj] = self.exact_ancestor(td, t, &xd, rng);
                            fallbacks += 1;
                        }
                    }
                }
                pending = still_pending;
            }
        }
        if fallbacks > 0 {
            warn!("FFBS (rejection): {fallbacks} draws exceeded {max_attempts} attempts");
        }
        let accepted = m * (len - 1) - fallbacks;
        let rate = if nattempts > 0 {
            accepted as f64 / nattempts as f64
        } else {
            1.0
        };
        Ok((rate, fallbacks))
    }

    /// QMC version of backward sampling, for the history of an SQMC filter.
    ///
    /// Each ancestor is obtained by inverting the CDF of the retrospective
    /// weights, taken along the Hilbert order recorded in the forward pass,
    /// at one coordinate of a randomised low-discrepancy `(m, T)` point set.
    pub fn backward_sampling_qmc<F, R>(&self, fk: &F, m: usize, rng: &mut R) -> Result<Vec<P>, SmcError>
    where
        F: FeynmanKac<Particles = P> + ?Sized,
        R: Rng + ?Sized,
    {
        self.require_contiguous()?;
        let td = fk.require_transition_density()?;
        let qmc = fk.require_quasi_monte_carlo()?;
        let len = self.len();
        let mut orders = Vec::with_capacity(len - 1);
        for pos in 0..len - 1 {
            let order = self.h_orders[pos].as_ref().ok_or_else(|| {
                SmcError::IncompleteHistory(
                    "QMC backward sampling requires particles Hilbert-ordered during the forward pass"
                        .to_string(),
                )
            })?;
            orders.push(order);
        }
        let u = randomized_halton(m, len, rng);
        // the final particles have not been sorted yet
        let h_last = hilbert_sort(&qmc.coordinates(&self.x[len - 1]))?;
        let w_last = self.wgts[len - 1].w();
        let cw = cumsum(&h_last.iter().map(|&k| w_last[k]).collect::<Vec<_>>());
        let chosen: Vec<usize> = (0..m)
            .map(|i| h_last[search_sorted(&cw, u[(i, len - 1)])])
            .collect();
        let mut current = self.x[len - 1].gather(&chosen);
        let mut paths = vec![current.clone()];
        for pos in (0..len - 1).rev() {
            let order = orders[pos];
            let lw = self.wgts[pos].lw();
            let mut chosen = Vec::with_capacity(m);
            for i in 0..m {
                let lp = td.log_pt(self.times[pos + 1], &self.x[pos], &current.gather(&[i]));
                let lwm: Vec<f64> = order.iter().map(|&k| lw[k] + lp[k]).collect();
                let cw = cumsum(&exp_and_normalise(&lwm));
                chosen.push(order[search_sorted(&cw, u[(i, pos)])]);
            }
            current = self.x[pos].gather(&chosen);
            paths.push(current.clone());
        }
        paths.reverse();
        Ok(paths)
    }

    /// Two-filter estimate of the smoothing expectation of
    /// $\varphi(X_t, X_{t+1})$.
    ///
    /// `t` is an absolute time; both t and t+1 must be held by this history,
    /// whose last snapshot is taken as time T-1. `info` is the history of an
    /// information filter run on the reversed data, so that its time
    /// `T - 2 - t` corresponds to time t+1; `log_gamma` is the log of the
    /// artificial initial density of that filter. `phi` is evaluated
    /// pairwise (with broadcasting of a single particle).
    #[allow(clippy::too_many_arguments)]
    pub fn twofilter_smoothing<F, Phi, LogGamma, R>(
        &self,
        fk: &F,
        t: usize,
        info: &ParticleHistory<P>,
        phi: Phi,
        log_gamma: LogGamma,
        options: TwoFilterOptions<'_>,
        rng: &mut R,
    ) -> Result<TwoFilterEstimate, SmcError>
    where
        F: FeynmanKac<Particles = P> + ?Sized,
        Phi: Fn(&P, &P) -> Vec<f64>,
        LogGamma: Fn(&P) -> Vec<f64>,
        R: Rng + ?Sized,
    {
        self.require_contiguous()?;
        info.require_contiguous()?;
        let len = self.len();
        let horizon = self.times[len - 1] + 1;
        let pos = match self.times.iter().position(|&s| s == t) {
            Some(pos) if pos + 1 < len => pos,
            _ => return Err(SmcError::InvalidTimeIndex { t, len }),
        };
        let target = horizon - 2 - t;
        let ti = info
            .times
            .iter()
            .position(|&s| s == target)
            .ok_or(SmcError::InvalidTimeIndex {
                t: target,
                len: info.len(),
            })?;
        let td = fk.require_transition_density()?;
        let x_info = &info.x[ti];
        let lwinfo: Vec<f64> = info.wgts[ti]
            .lw()
            .iter()
            .zip(log_gamma(x_info))
            .map(|(l, g)| l - g)
            .collect();
        let time = t + 1;
        let estimate = if options.linear_cost {
            self.twofilter_on(td, pos, time, x_info, lwinfo, &phi, options, rng)
        } else {
            let bound = fk.rejection_bound().map(|b| b.upper_bound_log_pt(time));
            TwoFilterEstimate {
                estimate: self.twofilter_on2(td, pos, time, x_info, &lwinfo, bound, &phi),
                ess: None,
            }
        };
        debug!("two-filter smoothing at t={t}: {:?}", estimate);
        Ok(estimate)
    }

    #[allow(clippy::too_many_arguments)]
    fn twofilter_on2<Phi>(
        &self,
        td: &dyn TransitionDensity<P>,
        pos: usize,
        time: usize,
        x_info: &P,
        lwinfo: &[f64],
        bound: Option<f64>,
        phi: &Phi,
    ) -> f64
    where
        Phi: Fn(&P, &P) -> Vec<f64>,
    {
        let lw = self.wgts[pos].lw();
        let max = |v: &[f64]| v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let upb = max(lwinfo) + max(lw) + bound.unwrap_or(0.0);
        let (mut sp, mut sw) = (0.0, 0.0);
        // one forward particle at a time, to avoid an N x N matrix
        for n in 0..self.n {
            let xn = self.x[pos].gather(&[n]);
            let lp = td.log_pt(time, &xn, x_info);
            let values = phi(&xn, x_info);
            for (k, (&li, &lpk)) in lwinfo.iter().zip(&lp).enumerate() {
                let omega = (li + lw[n] - upb + lpk).exp();
                sp += omega * values[k];
                sw += omega;
            }
        }
        sp / sw
    }

    #[allow(clippy::too_many_arguments)]
    fn twofilter_on<Phi, R>(
        &self,
        td: &dyn TransitionDensity<P>,
        pos: usize,
        time: usize,
        x_info: &P,
        mut lwinfo: Vec<f64>,
        phi: &Phi,
        options: TwoFilterOptions<'_>,
        rng: &mut R,
    ) -> TwoFilterEstimate
    where
        Phi: Fn(&P, &P) -> Vec<f64>,
        R: Rng + ?Sized,
    {
        if let Some(mi) = options.modif_info {
            lwinfo.iter_mut().zip(mi).for_each(|(l, d)| *l += d);
        }
        let info_idx = multinomial(&exp_and_normalise(&lwinfo), self.n, rng);
        let w = match options.modif_forward {
            Some(mf) => {
                let lw: Vec<f64> = self.wgts[pos].lw().iter().zip(mf).map(|(l, d)| l + d).collect();
                exp_and_normalise(&lw)
            }
            None => self.wgts[pos].w().to_vec(),
        };
        let fwd_idx = multinomial(&w, self.n, rng);
        let xj = self.x[pos].gather(&fwd_idx);
        let xi = x_info.gather(&info_idx);
        let mut log_omega = td.log_pt(time, &xj, &xi);
        for (k, lo) in log_omega.iter_mut().enumerate() {
            if let Some(mf) = options.modif_forward {
                *lo -= mf[fwd_idx[k]];
            }
            if let Some(mi) = options.modif_info {
                *lo -= mi[info_idx[k]];
            }
        }
        let omega = exp_and_normalise(&log_omega);
        let values = phi(&xj, &xi);
        let estimate = omega.iter().zip(&values).map(|(o, v)| o * v).sum();
        let ess = 1.0 / omega.iter().map(|o| o * o).sum::<f64>();
        TwoFilterEstimate {
            estimate,
            ess: Some(ess),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn toy_history(retention: Retention) -> ParticleHistory<Vec<f64>> {
        let mut hist = ParticleHistory::new(3, retention);
        let w = Weights::new(vec![0.0, 0.0, 0.0]);
        hist.save(0, &vec![0.0, 1.0, 2.0], &w, &[0, 1, 2]);
        hist.save(1, &vec![10.0, 11.0, 12.0], &w, &[2, 2, 0]);
        hist.save(2, &vec![20.0, 21.0, 22.0], &w, &[1, 0, 0]);
        hist
    }

    #[test]
    fn negative_positions() {
        let hist = toy_history(Retention::Full);
        assert_eq!(hist.len(), 3);
        assert_eq!(hist.x(-1), Some(&vec![20.0, 21.0, 22.0]));
        assert_eq!(hist.a(-2), Some(&[2usize, 2, 0][..]));
        assert_eq!(hist.time(0), Some(0));
        assert!(hist.x(3).is_none());
        assert!(hist.x(-4).is_none());
    }

    #[test]
    fn genealogy() {
        let hist = toy_history(Retention::Full);
        let b = hist.compute_trajectories().unwrap();
        assert_eq!(b[2], vec![0, 1, 2]);
        assert_eq!(b[1], vec![1, 0, 0]);
        assert_eq!(b[0], vec![2, 2, 2]);
    }

    #[test]
    fn rolling_window_drops_oldest() {
        let hist = toy_history(Retention::Rolling(2));
        assert_eq!(hist.len(), 2);
        assert_eq!(hist.times(), vec![1, 2]);
        let b = hist.compute_trajectories().unwrap();
        assert_eq!(b[0], vec![1, 0, 0]);
    }

    #[test]
    fn partial_history_keeps_selected_times() {
        let hist = toy_history(Retention::Partial(Box::new(|t| t % 2 == 0)));
        assert_eq!(hist.times(), vec![0, 2]);
        assert!(matches!(
            hist.compute_trajectories(),
            Err(SmcError::IncompleteHistory(_))
        ));
    }

    #[test]
    fn one_trajectory_follows_ancestors() {
        let hist = toy_history(Retention::Full);
        let mut rng = StdRng::seed_from_u64(0);
        for _ in 0..20 {
            let traj = hist.extract_one_trajectory(&mut rng).unwrap();
            assert_eq!(traj.len(), 3);
            let last = (traj[2] - 20.0) as usize;
            let mid = [1usize, 0, 0][last];
            assert_eq!(traj[1], 10.0 + mid as f64);
            let first = [2usize, 2, 0][mid];
            assert_eq!(traj[0], first as f64);
        }
    }
}
