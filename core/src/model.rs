//! Feynman-Kac models.
//!
//! A Feynman-Kac model is the mathematical description of what a particle
//! filter does:
//!
//! - the distribution $M_0(dx_0)$ from which particles are drawn at time 0;
//! - the Markov kernels $M_t(x_{t-1}, dx_t)$ that move particles at time t;
//! - the potential functions $G_t(x_{t-1}, x_t)$ that reweight them.
//!
//! The sequence of distributions it defines is
//!
//! $$
//! \mathbb{Q}_t(dx_{0:t}) \propto M_0(dx_0) G_0(x_0) \prod_{s=1}^t M_s(x_{s-1}, dx_s) G_s(x_{s-1}, x_s)
//! $$
//!
//! and the filter estimates its normalising constants along the way.
//!
//! [`FeynmanKac`] holds the mandatory operations. Extra algorithms need extra
//! operations, grouped in capability traits that a model exposes through the
//! `Option`-returning accessors of [`FeynmanKac`]:
//!
//! | Capability | Needed by |
//! |------------|-----------|
//! | [`AuxiliaryWeighting`] | auxiliary particle filter |
//! | [`QuasiMonteCarloTransform`] | SQMC (`qmc = true`), QMC backward sampling |
//! | [`TransitionDensity`] | every smoothing algorithm, ON2 online smoothing |
//! | [`RejectionBound`] | O(N) rejection backward sampling |
//! | [`AdditiveFunction`] | online smoothing collectors |
use nalgebra::DMatrix;
use rand::rngs::StdRng;

use crate::error::SmcError;
use crate::population::Population;

/// Mandatory operations of a Feynman-Kac model.
pub trait FeynmanKac {
    /// Container of the N particles.
    type Particles: Population;

    /// Sample N particles from the initial distribution $M_0$.
    fn m0(&self, n: usize, rng: &mut StdRng) -> Self::Particles;

    /// Move particles at time `t`, given their ancestors `xp`.
    fn m(&self, t: usize, xp: &Self::Particles, rng: &mut StdRng) -> Self::Particles;

    /// Log-potential $\log G_t(x_{t-1}, x_t)$, one value per particle.
    /// `xp` is `None` at time 0.
    fn log_g(&self, t: usize, xp: Option<&Self::Particles>, x: &Self::Particles) -> Vec<f64>;

    /// True once the algorithm should stop, typically `t >= T`.
    fn done(&self, t: usize) -> bool;

    /// When true, particles are only moved at steps where resampling
    /// occurred (SMC samplers); otherwise they move at every step.
    fn mutate_only_after_resampling(&self) -> bool {
        false
    }

    /// Name used in error messages.
    fn model_name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    fn auxiliary(&self) -> Option<&dyn AuxiliaryWeighting<Self::Particles>> {
        None
    }

    fn quasi_monte_carlo(&self) -> Option<&dyn QuasiMonteCarloTransform<Self::Particles>> {
        None
    }

    fn transition_density(&self) -> Option<&dyn TransitionDensity<Self::Particles>> {
        None
    }

    fn rejection_bound(&self) -> Option<&dyn RejectionBound> {
        None
    }

    fn additive_function(&self) -> Option<&dyn AdditiveFunction<Self::Particles>> {
        None
    }

    /// True if the model defines an auxiliary particle filter.
    fn is_apf(&self) -> bool {
        self.auxiliary().is_some()
    }

    /// The transition density, or a [`SmcError::MissingCapability`] naming
    /// `logpt`.
    fn require_transition_density(&self) -> Result<&dyn TransitionDensity<Self::Particles>, SmcError> {
        self.transition_density().ok_or_else(|| SmcError::MissingCapability {
            capability: "logpt",
            model: self.model_name(),
        })
    }

    fn require_quasi_monte_carlo(&self) -> Result<&dyn QuasiMonteCarloTransform<Self::Particles>, SmcError> {
        self.quasi_monte_carlo().ok_or_else(|| SmcError::MissingCapability {
            capability: "Gamma0/Gamma",
            model: self.model_name(),
        })
    }

    fn require_rejection_bound(&self) -> Result<&dyn RejectionBound, SmcError> {
        self.rejection_bound().ok_or_else(|| SmcError::MissingCapability {
            capability: "upper_bound_log_pt",
            model: self.model_name(),
        })
    }

    fn require_additive_function(&self) -> Result<&dyn AdditiveFunction<Self::Particles>, SmcError> {
        self.additive_function().ok_or_else(|| SmcError::MissingCapability {
            capability: "add_func",
            model: self.model_name(),
        })
    }
}

/// Look-ahead weighting of an auxiliary particle filter.
///
/// Resampling at time t is driven by the weights $w_{t-1}^n \eta_{t-1}(x_{t-1}^n)$;
/// the engine compensates with the weight correction
/// $\sum_m W^m \eta(x^m) / \eta(x^{A^n})$ after resampling.
pub trait AuxiliaryWeighting<P> {
    /// $\log \eta_t(x_t)$, one value per particle.
    fn log_eta(&self, t: usize, x: &P) -> Vec<f64>;
}

/// Inverse-CDF versions of the kernels, used by sequential quasi-Monte Carlo.
pub trait QuasiMonteCarloTransform<P> {
    /// Dimension $d_u$ of the uniforms consumed per particle.
    fn dim(&self) -> usize;

    /// Deterministic map such that `gamma0(U)` is distributed as $M_0$ when
    /// the rows of `u` (N x `dim`) are uniform on $[0,1]^{d_u}$.
    fn gamma0(&self, u: &DMatrix<f64>) -> P;

    /// Deterministic map such that row n of `gamma(t, xp, U)` is distributed
    /// as $M_t(x_p^n, \cdot)$.
    fn gamma(&self, t: usize, xp: &P, u: &DMatrix<f64>) -> P;

    /// Particles as points of $\mathbb{R}^d$ (one row per particle), used to
    /// order them along a Hilbert curve.
    fn coordinates(&self, x: &P) -> DMatrix<f64>;
}

/// Log-density of the Markov transition $X_t | X_{t-1}$.
pub trait TransitionDensity<P> {
    /// $\log p_t(x_t | x_{t-1})$, computed pairwise for `xp` and `x` of equal
    /// length, or broadcast when one of them holds a single particle.
    fn log_pt(&self, t: usize, xp: &P, x: &P) -> Vec<f64>;
}

/// Upper bound of the transition density.
pub trait RejectionBound {
    /// $\log C_t$ such that $p_t(x_t | x_{t-1}) \le C_t$ for all arguments.
    fn upper_bound_log_pt(&self, t: usize) -> f64;
}

/// Additive function $\psi_t(x_{t-1}, x_t)$ whose smoothing expectation
/// $\mathbb{E}[\sum_{s \le t} \psi_s | Y_{0:t}]$ is tracked online.
pub trait AdditiveFunction<P> {
    /// One value per particle; `xp` is `None` at time 0 and follows the
    /// broadcasting rule of [`TransitionDensity::log_pt`] otherwise.
    fn add_func(&self, t: usize, xp: Option<&P>, x: &P) -> Vec<f64>;
}
