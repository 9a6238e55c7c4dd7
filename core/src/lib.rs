//! Sequential Monte Carlo toolbox
//!
//! This crate implements particle filters and the associated smoothing algorithms for generic Feynman-Kac models.
//! A particle filter approximates a sequence of probability distributions by a population of N weighted
//! particles which are moved, reweighted and resampled at every time step. Along the way it produces an
//! estimate of the normalising constant of each distribution, i.e. the marginal likelihood of the data in a
//! state-space model.
//!
//! The crate is built on three dependencies:
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): random
//!   number generation for every stochastic step. Each filter owns a seeded [`rand::rngs::StdRng`], so that
//!   runs are reproducible and independent filters share no state.
//! - [`nalgebra`](https://crates.io/crates/nalgebra): point sets of quasi-Monte Carlo, weighted covariances and
//!   the reference linear-Gaussian model.
//! - [`thiserror`](https://crates.io/crates/thiserror): the [`error::SmcError`] type returned by every fallible
//!   operation.
//!
//! ## Crate overview
//!
//! - [model]: the [`model::FeynmanKac`] trait and the optional capability traits (auxiliary weights, QMC
//!   transforms, transition density, rejection bound, additive function).
//! - [smc]: the [`smc::Smc`] engine and its configuration.
//! - [weights]: log-space importance weights, ESS and weighted summaries.
//! - [resampling]: multinomial, residual, stratified, systematic and SSP resampling, plus a multinomial queue.
//! - [history]: particle history, genealogy tracking, FFBS (O(N²), rejection O(N), QMC) and two-filter
//!   smoothing.
//! - [collectors]: per-step summaries and online smoothing.
//! - [hilbert] and [qmc]: Hilbert curve ordering and randomised Halton point sets used by SQMC.
//! - [population]: the contract a particle container must satisfy.
//! - [ssm]: linear-Gaussian state-space model with bootstrap and auxiliary filters, and its exact Kalman
//!   filter and RTS smoother.
//! - [config]: JSON/YAML/TOML configuration files.
//!
//! ## Feynman-Kac formalism
//!
//! A Feynman-Kac model is defined by an initial distribution $M_0$, Markov kernels $M_t$ and potential functions
//! $G_t$. The particle filter associated with it runs, for t = 0, 1, ...:
//!
//! $$
//! A_t^n \sim \mathcal{M}(W_{t-1}^{1:N}), \quad X_t^n \sim M_t(X_{t-1}^{A_t^n}, dx_t), \quad
//! w_t^n = G_t(X_{t-1}^{A_t^n}, X_t^n)
//! $$
//!
//! where resampling (the first step) only occurs when the effective sample size drops below a threshold. The
//! log-likelihood estimate is the sum over t of the log of the mean weight (corrected for the weights carried
//! over when no resampling occurred).
//!
//! ## Example
//!
//! ```
//! use nalgebra::DVector;
//! use particles::smc::{Smc, SmcConfig};
//! use particles::ssm::{Bootstrap, LinearGauss, LinearGaussConfig};
//! use rand::SeedableRng;
//!
//! let ssm = LinearGauss::from_config(&LinearGaussConfig::default()).unwrap();
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let (_, data): (Vec<DVector<f64>>, _) = ssm.simulate(20, &mut rng);
//! let fk = Bootstrap::new(ssm, data).unwrap();
//! let config = SmcConfig { n: 200, seed: Some(1), ..SmcConfig::default() };
//! let mut pf = Smc::new(fk, config).unwrap();
//! pf.run().unwrap();
//! assert!(pf.log_lt().is_finite());
//! ```
pub mod collectors;
pub mod config;
pub mod error;
pub mod hilbert;
pub mod history;
pub mod model;
pub mod population;
pub mod qmc;
pub mod resampling;
pub mod smc;
pub mod ssm;
pub mod weights;

pub use error::SmcError;
pub use model::FeynmanKac;
pub use smc::{Smc, SmcConfig};
