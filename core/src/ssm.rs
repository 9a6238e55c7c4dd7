//! Linear-Gaussian state-space model.
//!
//! $$
//! X_0 \sim N(\mu_0, \Sigma_0), \quad
//! X_t = F X_{t-1} + U_t, \quad U_t \sim N(0, Q), \\
//! Y_t = H X_t + V_t, \quad V_t \sim N(0, R).
//! $$
//!
//! The model serves as the reference for the engine: [`Bootstrap`] and
//! [`AuxiliaryBootstrap`] turn it into Feynman-Kac models exposing every
//! optional capability, [`LinearGauss::simulate`] generates data, and
//! [`LinearGauss::kalman_filter`] / [`LinearGauss::rts_smoother`] give the
//! exact filtering and smoothing quantities to validate particle estimates
//! against.
use std::f64::consts::{PI, SQRT_2};

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erf_inv;

use crate::config::ConfigFile;
use crate::error::SmcError;
use crate::model::{
    AdditiveFunction, AuxiliaryWeighting, FeynmanKac, QuasiMonteCarloTransform, RejectionBound,
    TransitionDensity,
};
use crate::population::broadcast;

/// Quantile function of the standard normal distribution.
pub fn probit(u: f64) -> f64 {
    SQRT_2 * erf_inv(2.0 * u - 1.0)
}

/// Multivariate normal N(0, Σ), through the Cholesky factor of Σ.
#[derive(Clone, Debug)]
struct MvNormal {
    chol: DMatrix<f64>,
    log_norm: f64,
}

impl MvNormal {
    fn new(cov: &DMatrix<f64>, what: &str) -> Result<Self, SmcError> {
        let chol = cov
            .clone()
            .cholesky()
            .ok_or_else(|| SmcError::InvalidModel(format!("{what} is not positive definite")))?
            .l();
        let d = cov.nrows() as f64;
        let log_det_half: f64 = chol.diagonal().iter().map(|l| l.ln()).sum();
        Ok(MvNormal {
            chol,
            log_norm: -0.5 * d * (2.0 * PI).ln() - log_det_half,
        })
    }

    /// Log-density of the residual `z`.
    fn log_pdf(&self, z: &DVector<f64>) -> f64 {
        self.chol
            .solve_lower_triangular(z)
            .map_or(f64::NEG_INFINITY, |e| self.log_norm - 0.5 * e.norm_squared())
    }

    /// Map standard normal noise to N(0, Σ).
    fn scale(&self, z: &DVector<f64>) -> DVector<f64> {
        &self.chol * z
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_fn(self.chol.nrows(), |_, _| rng.sample(StandardNormal));
        self.scale(&z)
    }
}

/// Isotropic parameterisation of a [`LinearGauss`] model:
/// `F = rho I`, `Q = sigma_x² I`, `H = I`, `R = sigma_y² I`, `mu0 = 0`,
/// `cov0 = sigma0² I` (stationary variance when `sigma0` is absent).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearGaussConfig {
    pub dim: usize,
    pub rho: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sigma0: Option<f64>,
    /// Number of observations.
    pub horizon: usize,
}

impl Default for LinearGaussConfig {
    fn default() -> Self {
        LinearGaussConfig {
            dim: 1,
            rho: 0.9,
            sigma_x: 1.0,
            sigma_y: 0.2,
            sigma0: None,
            horizon: 100,
        }
    }
}

impl ConfigFile for LinearGaussConfig {}

/// Linear-Gaussian state-space model.
#[derive(Clone, Debug)]
pub struct LinearGauss {
    f: DMatrix<f64>,
    q: DMatrix<f64>,
    h: DMatrix<f64>,
    r: DMatrix<f64>,
    mu0: DVector<f64>,
    cov0: DMatrix<f64>,
    noise_x: MvNormal,
    noise_y: MvNormal,
    noise_0: MvNormal,
}

/// Output of [`LinearGauss::kalman_filter`].
#[derive(Clone, Debug)]
pub struct KalmanOutput {
    pub pred_means: Vec<DVector<f64>>,
    pub pred_covs: Vec<DMatrix<f64>>,
    pub filt_means: Vec<DVector<f64>>,
    pub filt_covs: Vec<DMatrix<f64>>,
    /// Cumulative log-likelihood $\log p(y_{0:t})$ for each t.
    pub log_lts: Vec<f64>,
}

impl KalmanOutput {
    /// Log-likelihood of the whole data set.
    pub fn log_likelihood(&self) -> f64 {
        self.log_lts.last().copied().unwrap_or(0.0)
    }
}

impl LinearGauss {
    pub fn new(
        f: DMatrix<f64>,
        q: DMatrix<f64>,
        h: DMatrix<f64>,
        r: DMatrix<f64>,
        mu0: DVector<f64>,
        cov0: DMatrix<f64>,
    ) -> Result<Self, SmcError> {
        let dx = f.nrows();
        let dy = h.nrows();
        let shapes_ok = f.is_square()
            && q.shape() == (dx, dx)
            && h.ncols() == dx
            && r.shape() == (dy, dy)
            && mu0.len() == dx
            && cov0.shape() == (dx, dx);
        if !shapes_ok {
            return Err(SmcError::InvalidModel(
                "inconsistent dimensions of F, Q, H, R, mu0, cov0".to_string(),
            ));
        }
        Ok(LinearGauss {
            noise_x: MvNormal::new(&q, "Q")?,
            noise_y: MvNormal::new(&r, "R")?,
            noise_0: MvNormal::new(&cov0, "cov0")?,
            f,
            q,
            h,
            r,
            mu0,
            cov0,
        })
    }

    pub fn from_config(cfg: &LinearGaussConfig) -> Result<Self, SmcError> {
        if cfg.dim == 0 {
            return Err(SmcError::InvalidConfig("dim must be positive".to_string()));
        }
        let sigma0 = match cfg.sigma0 {
            Some(s) => s,
            None if cfg.rho.abs() < 1.0 => cfg.sigma_x / (1.0 - cfg.rho * cfg.rho).sqrt(),
            None => {
                return Err(SmcError::InvalidConfig(
                    "sigma0 is required when |rho| >= 1".to_string(),
                ));
            }
        };
        let eye = DMatrix::<f64>::identity(cfg.dim, cfg.dim);
        LinearGauss::new(
            &eye * cfg.rho,
            &eye * cfg.sigma_x.powi(2),
            eye.clone(),
            &eye * cfg.sigma_y.powi(2),
            DVector::zeros(cfg.dim),
            &eye * sigma0.powi(2),
        )
    }

    /// Dimension of the state.
    pub fn dim_x(&self) -> usize {
        self.f.nrows()
    }

    /// Dimension of the observations.
    pub fn dim_y(&self) -> usize {
        self.h.nrows()
    }

    /// Log-density of the initial distribution.
    pub fn log_m0(&self, x: &DVector<f64>) -> f64 {
        self.noise_0.log_pdf(&(x - &self.mu0))
    }

    /// $\log p(x_t | x_{t-1})$.
    pub fn log_transition(&self, xp: &DVector<f64>, x: &DVector<f64>) -> f64 {
        self.noise_x.log_pdf(&(x - &self.f * xp))
    }

    /// $\log p(y_t | x_t)$.
    pub fn log_observation(&self, x: &DVector<f64>, y: &DVector<f64>) -> f64 {
        self.noise_y.log_pdf(&(y - &self.h * x))
    }

    /// Simulate states and observations for times `0..horizon`.
    pub fn simulate<R: Rng + ?Sized>(
        &self,
        horizon: usize,
        rng: &mut R,
    ) -> (Vec<DVector<f64>>, Vec<DVector<f64>>) {
        let mut xs: Vec<DVector<f64>> = Vec::with_capacity(horizon);
        let mut ys = Vec::with_capacity(horizon);
        for t in 0..horizon {
            let x = match t {
                0 => &self.mu0 + self.noise_0.sample(rng),
                _ => &self.f * &xs[t - 1] + self.noise_x.sample(rng),
            };
            ys.push(&self.h * &x + self.noise_y.sample(rng));
            xs.push(x);
        }
        (xs, ys)
    }

    /// Exact filter: predictive and filtering moments, and the
    /// log-likelihood of the data.
    pub fn kalman_filter(&self, data: &[DVector<f64>]) -> Result<KalmanOutput, SmcError> {
        let mut out = KalmanOutput {
            pred_means: Vec::with_capacity(data.len()),
            pred_covs: Vec::with_capacity(data.len()),
            filt_means: Vec::with_capacity(data.len()),
            filt_covs: Vec::with_capacity(data.len()),
            log_lts: Vec::with_capacity(data.len()),
        };
        let mut log_lt = 0.0;
        for (t, y) in data.iter().enumerate() {
            let (mu_p, p_p) = match t {
                0 => (self.mu0.clone(), self.cov0.clone()),
                _ => (
                    &self.f * &out.filt_means[t - 1],
                    &self.f * &out.filt_covs[t - 1] * self.f.transpose() + &self.q,
                ),
            };
            let s = &self.h * &p_p * self.h.transpose() + &self.r;
            let resid = y - &self.h * &mu_p;
            log_lt += MvNormal::new(&s, "innovation covariance")?.log_pdf(&resid);
            let s_inv = s
                .cholesky()
                .ok_or_else(|| SmcError::InvalidModel("singular innovation covariance".to_string()))?
                .inverse();
            let gain = &p_p * self.h.transpose() * s_inv;
            let mu_f = &mu_p + &gain * resid;
            let p_f = &p_p - &gain * &self.h * &p_p;
            out.pred_means.push(mu_p);
            out.pred_covs.push(p_p);
            out.filt_means.push(mu_f);
            out.filt_covs.push(p_f);
            out.log_lts.push(log_lt);
        }
        Ok(out)
    }

    /// Rauch-Tung-Striebel smoother: smoothing means and covariances.
    pub fn rts_smoother(
        &self,
        kf: &KalmanOutput,
    ) -> Result<(Vec<DVector<f64>>, Vec<DMatrix<f64>>), SmcError> {
        let len = kf.filt_means.len();
        if len == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let mut means = kf.filt_means.clone();
        let mut covs = kf.filt_covs.clone();
        for t in (0..len - 1).rev() {
            let p_pred_inv = kf.pred_covs[t + 1].clone().try_inverse().ok_or_else(|| {
                SmcError::InvalidModel("singular predictive covariance".to_string())
            })?;
            let gain = &kf.filt_covs[t] * self.f.transpose() * p_pred_inv;
            means[t] = &kf.filt_means[t] + &gain * (&means[t + 1] - &kf.pred_means[t + 1]);
            covs[t] = &kf.filt_covs[t] + &gain * (&covs[t + 1] - &kf.pred_covs[t + 1]) * gain.transpose();
        }
        Ok((means, covs))
    }
}

/// Bootstrap filter of a [`LinearGauss`] model: particles move according
/// to the state dynamics and are weighted by the observation density.
#[derive(Clone, Debug)]
pub struct Bootstrap {
    ssm: LinearGauss,
    data: Vec<DVector<f64>>,
}

impl Bootstrap {
    pub fn new(ssm: LinearGauss, data: Vec<DVector<f64>>) -> Result<Self, SmcError> {
        if let Some(y) = data.iter().find(|y| y.len() != ssm.dim_y()) {
            return Err(SmcError::InvalidModel(format!(
                "observation of dimension {}, expected {}",
                y.len(),
                ssm.dim_y()
            )));
        }
        Ok(Bootstrap { ssm, data })
    }

    pub fn ssm(&self) -> &LinearGauss {
        &self.ssm
    }

    pub fn data(&self) -> &[DVector<f64>] {
        &self.data
    }

    fn row_noise(u: &DMatrix<f64>, i: usize) -> DVector<f64> {
        DVector::from_fn(u.ncols(), |j, _| probit(u[(i, j)]))
    }
}

impl FeynmanKac for Bootstrap {
    type Particles = Vec<DVector<f64>>;

    fn m0(&self, n: usize, rng: &mut StdRng) -> Self::Particles {
        (0..n)
            .map(|_| &self.ssm.mu0 + self.ssm.noise_0.sample(rng))
            .collect()
    }

    fn m(&self, _t: usize, xp: &Self::Particles, rng: &mut StdRng) -> Self::Particles {
        xp.iter()
            .map(|x| &self.ssm.f * x + self.ssm.noise_x.sample(rng))
            .collect()
    }

    fn log_g(&self, t: usize, _xp: Option<&Self::Particles>, x: &Self::Particles) -> Vec<f64> {
        x.iter()
            .map(|xn| self.ssm.log_observation(xn, &self.data[t]))
            .collect()
    }

    fn done(&self, t: usize) -> bool {
        t >= self.data.len()
    }

    fn model_name(&self) -> String {
        "Bootstrap".to_string()
    }

    fn quasi_monte_carlo(&self) -> Option<&dyn QuasiMonteCarloTransform<Self::Particles>> {
        Some(self)
    }

    fn transition_density(&self) -> Option<&dyn TransitionDensity<Self::Particles>> {
        Some(self)
    }

    fn rejection_bound(&self) -> Option<&dyn RejectionBound> {
        Some(self)
    }

    fn additive_function(&self) -> Option<&dyn AdditiveFunction<Self::Particles>> {
        Some(self)
    }
}

impl QuasiMonteCarloTransform<Vec<DVector<f64>>> for Bootstrap {
    fn dim(&self) -> usize {
        self.ssm.dim_x()
    }

    fn gamma0(&self, u: &DMatrix<f64>) -> Vec<DVector<f64>> {
        (0..u.nrows())
            .map(|i| &self.ssm.mu0 + self.ssm.noise_0.scale(&Self::row_noise(u, i)))
            .collect()
    }

    fn gamma(&self, _t: usize, xp: &Vec<DVector<f64>>, u: &DMatrix<f64>) -> Vec<DVector<f64>> {
        xp.iter()
            .enumerate()
            .map(|(i, x)| &self.ssm.f * x + self.ssm.noise_x.scale(&Self::row_noise(u, i)))
            .collect()
    }

    fn coordinates(&self, x: &Vec<DVector<f64>>) -> DMatrix<f64> {
        DMatrix::from_fn(x.len(), self.ssm.dim_x(), |i, j| x[i][j])
    }
}

impl TransitionDensity<Vec<DVector<f64>>> for Bootstrap {
    fn log_pt(&self, _t: usize, xp: &Vec<DVector<f64>>, x: &Vec<DVector<f64>>) -> Vec<f64> {
        broadcast(xp, x)
            .map(|(a, b)| self.ssm.log_transition(a, b))
            .collect()
    }
}

impl RejectionBound for Bootstrap {
    fn upper_bound_log_pt(&self, _t: usize) -> f64 {
        self.ssm.noise_x.log_norm
    }
}

impl AdditiveFunction<Vec<DVector<f64>>> for Bootstrap {
    /// First component of the state: its smoothing expectation summed over
    /// time.
    fn add_func(&self, _t: usize, xp: Option<&Vec<DVector<f64>>>, x: &Vec<DVector<f64>>) -> Vec<f64> {
        match xp {
            Some(xp) => broadcast(xp, x).map(|(_, b)| b[0]).collect(),
            None => x.iter().map(|b| b[0]).collect(),
        }
    }
}

/// Auxiliary particle filter of a [`LinearGauss`] model, with the exact
/// predictive density of the next observation as look-ahead:
/// $\eta_t(x_t) = p(y_{t+1} | x_t) = N(y_{t+1}; H F x_t, H Q H' + R)$.
#[derive(Clone, Debug)]
pub struct AuxiliaryBootstrap {
    inner: Bootstrap,
    predictive: MvNormal,
    hf: DMatrix<f64>,
}

impl AuxiliaryBootstrap {
    pub fn new(ssm: LinearGauss, data: Vec<DVector<f64>>) -> Result<Self, SmcError> {
        let cov = &ssm.h * &ssm.q * ssm.h.transpose() + &ssm.r;
        let predictive = MvNormal::new(&cov, "predictive covariance")?;
        let hf = &ssm.h * &ssm.f;
        Ok(AuxiliaryBootstrap {
            inner: Bootstrap::new(ssm, data)?,
            predictive,
            hf,
        })
    }
}

impl FeynmanKac for AuxiliaryBootstrap {
    type Particles = Vec<DVector<f64>>;

    fn m0(&self, n: usize, rng: &mut StdRng) -> Self::Particles {
        self.inner.m0(n, rng)
    }

    fn m(&self, t: usize, xp: &Self::Particles, rng: &mut StdRng) -> Self::Particles {
        self.inner.m(t, xp, rng)
    }

    fn log_g(&self, t: usize, xp: Option<&Self::Particles>, x: &Self::Particles) -> Vec<f64> {
        self.inner.log_g(t, xp, x)
    }

    fn done(&self, t: usize) -> bool {
        self.inner.done(t)
    }

    fn model_name(&self) -> String {
        "AuxiliaryBootstrap".to_string()
    }

    fn auxiliary(&self) -> Option<&dyn AuxiliaryWeighting<Self::Particles>> {
        Some(self)
    }

    fn transition_density(&self) -> Option<&dyn TransitionDensity<Self::Particles>> {
        Some(&self.inner)
    }

    fn rejection_bound(&self) -> Option<&dyn RejectionBound> {
        Some(&self.inner)
    }

    fn additive_function(&self) -> Option<&dyn AdditiveFunction<Self::Particles>> {
        Some(&self.inner)
    }
}

impl AuxiliaryWeighting<Vec<DVector<f64>>> for AuxiliaryBootstrap {
    fn log_eta(&self, t: usize, x: &Vec<DVector<f64>>) -> Vec<f64> {
        match self.inner.data.get(t + 1) {
            Some(y) => x
                .iter()
                .map(|xn| self.predictive.log_pdf(&(y - &self.hf * xn)))
                .collect(),
            None => vec![0.0; x.len()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;

    fn scalar_model() -> LinearGauss {
        LinearGauss::from_config(&LinearGaussConfig::default()).unwrap()
    }

    #[test]
    fn probit_quantiles() {
        assert_approx_eq!(probit(0.5), 0.0, 1e-12);
        assert_approx_eq!(probit(0.975), 1.959964, 1e-5);
        assert_approx_eq!(probit(0.025), -1.959964, 1e-5);
    }

    #[test]
    fn gaussian_log_density() {
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let g = MvNormal::new(&cov, "cov").unwrap();
        let z = DVector::from_vec(vec![0.3, -0.7]);
        let inv = cov.clone().try_inverse().unwrap();
        let expected = -0.5 * (z.transpose() * &inv * &z)[(0, 0)]
            - 0.5 * (2.0 * PI).ln() * 2.0
            - 0.5 * cov.determinant().ln();
        assert_approx_eq!(g.log_pdf(&z), expected, 1e-12);
    }

    #[test]
    fn not_positive_definite_is_rejected() {
        let cfg = LinearGaussConfig {
            sigma_y: 0.0,
            ..LinearGaussConfig::default()
        };
        assert!(matches!(
            LinearGauss::from_config(&cfg),
            Err(SmcError::InvalidModel(_))
        ));
    }

    #[test]
    fn scalar_kalman_filter_first_step() {
        let ssm = scalar_model();
        let y = vec![DVector::from_vec(vec![0.4])];
        let kf = ssm.kalman_filter(&y).unwrap();
        // X0 ~ N(0, 1/(1-0.81)), Y0 = X0 + N(0, 0.04)
        let v0 = 1.0 / (1.0 - 0.81);
        let s = v0 + 0.04;
        let expected = -0.5 * (2.0 * PI * s).ln() - 0.5 * 0.16 / s;
        assert_approx_eq!(kf.log_likelihood(), expected, 1e-12);
        assert_approx_eq!(kf.filt_means[0][0], v0 / s * 0.4, 1e-12);
    }

    #[test]
    fn smoother_matches_filter_at_final_time() {
        let ssm = scalar_model();
        let mut rng = StdRng::seed_from_u64(3);
        let (_, ys) = ssm.simulate(20, &mut rng);
        let kf = ssm.kalman_filter(&ys).unwrap();
        let (means, covs) = ssm.rts_smoother(&kf).unwrap();
        assert_eq!(means.len(), 20);
        assert_approx_eq!(means[19][0], kf.filt_means[19][0], 1e-12);
        for t in 0..19 {
            assert!(covs[t][(0, 0)] <= kf.filt_covs[t][(0, 0)] + 1e-12);
        }
    }

    #[test]
    fn qmc_transforms_match_dimensions() {
        let ssm = LinearGauss::from_config(&LinearGaussConfig {
            dim: 3,
            ..LinearGaussConfig::default()
        })
        .unwrap();
        let fk = Bootstrap::new(ssm, vec![DVector::zeros(3); 5]).unwrap();
        let u = DMatrix::from_element(4, 3, 0.5);
        let x = fk.gamma0(&u);
        assert_eq!(x.len(), 4);
        assert!(x.iter().all(|xi| xi.norm() < 1e-12));
        let moved = fk.gamma(1, &x, &u);
        assert_eq!(fk.coordinates(&moved).shape(), (4, 3));
    }

    #[test]
    fn transition_density_is_bounded() {
        let fk = Bootstrap::new(scalar_model(), vec![DVector::zeros(1); 3]).unwrap();
        let xp = vec![DVector::from_vec(vec![1.0])];
        let x: Vec<DVector<f64>> = (-5..=5).map(|k| DVector::from_vec(vec![k as f64 * 0.3])).collect();
        let bound = fk.upper_bound_log_pt(1);
        for lp in fk.log_pt(1, &xp, &x) {
            assert!(lp <= bound + 1e-12);
        }
        // the bound is attained at x = F xp
        let mode = vec![DVector::from_vec(vec![0.9])];
        assert_approx_eq!(fk.log_pt(1, &xp, &mode)[0], bound, 1e-12);
    }

    #[test]
    fn look_ahead_is_neutral_after_last_observation() {
        let fk = AuxiliaryBootstrap::new(scalar_model(), vec![DVector::zeros(1); 2]).unwrap();
        let x = vec![DVector::from_vec(vec![0.1]); 3];
        assert_eq!(fk.log_eta(1, &x), vec![0.0; 3]);
        assert!(fk.log_eta(0, &x).iter().all(|v| v.is_finite()));
    }
}
