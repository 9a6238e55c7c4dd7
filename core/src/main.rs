//! PARTICLES: run particle filters and smoothers on a simulated linear-Gaussian model.
//!
//! Data are simulated from the model described by the configuration, then
//!
//! - `run` executes one or several independent particle filters (bootstrap,
//!   auxiliary, or SQMC) and compares their log-likelihood estimates with the
//!   exact Kalman value;
//! - `smooth` runs a filter with full history and forward filtering backward
//!   sampling, and compares the smoothed means with the RTS smoother;
//! - `config` writes a template configuration file.
//!
//! Parameters come from a configuration file (TOML/JSON/YAML) given with
//! `--config`, overridden by any command-line flag.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn};
use nalgebra::DVector;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use particles::collectors::Moments;
use particles::config::ConfigFile;
use particles::history::{BackwardMode, RejectionFallback};
use particles::model::FeynmanKac;
use particles::resampling::ResamplingScheme;
use particles::smc::{HistoryMode, Smc, SmcConfig};
use particles::ssm::{AuxiliaryBootstrap, Bootstrap, LinearGauss, LinearGaussConfig};
use particles::weights::wmean_and_var;

type Particles = Vec<DVector<f64>>;

/// Complete configuration of a command.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
struct RunConfig {
    /// Use the auxiliary particle filter with exact look-ahead.
    apf: bool,
    /// Number of independent filters.
    runs: usize,
    /// Seed used to simulate the data.
    data_seed: u64,
    model: LinearGaussConfig,
    filter: SmcConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            apf: false,
            runs: 1,
            data_seed: 0,
            model: LinearGaussConfig::default(),
            filter: SmcConfig {
                n: 1000,
                seed: Some(1),
                ..SmcConfig::default()
            },
        }
    }
}

impl ConfigFile for RunConfig {}

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Particle filtering and smoothing of a linear-Gaussian state-space model.")]
struct Cli {
    /// Configuration file (TOML/JSON/YAML); command-line flags override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Run particle filters and compare with the exact log-likelihood")]
    Run(RunArgs),
    #[command(about = "Run forward filtering backward sampling and compare with the RTS smoother")]
    Smooth(SmoothArgs),
    #[command(about = "Generate a template configuration file")]
    Config(ConfigArgs),
}

/// Model overrides
#[derive(Args, Clone, Debug, Default)]
struct ModelArgs {
    /// State dimension
    #[arg(long)]
    dim: Option<usize>,
    /// Autoregressive coefficient
    #[arg(long)]
    rho: Option<f64>,
    /// State noise standard deviation
    #[arg(long)]
    sigma_x: Option<f64>,
    /// Observation noise standard deviation
    #[arg(long)]
    sigma_y: Option<f64>,
    /// Number of observations
    #[arg(short = 'T', long)]
    horizon: Option<usize>,
    /// Seed of the data simulation
    #[arg(long)]
    data_seed: Option<u64>,
}

/// Filter overrides
#[derive(Args, Clone, Debug, Default)]
struct FilterArgs {
    /// Number of particles
    #[arg(short = 'N', long)]
    particles: Option<usize>,
    /// Resampling scheme
    #[arg(long, value_enum)]
    resampling: Option<ResamplingScheme>,
    /// Resample when ESS < N * ess_rmin
    #[arg(long)]
    ess_rmin: Option<f64>,
    /// Run SQMC
    #[arg(long)]
    qmc: bool,
    /// Run the auxiliary particle filter
    #[arg(long)]
    apf: bool,
    /// Seed of the filter
    #[arg(long)]
    seed: Option<u64>,
    /// Print one line per step
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    filter: FilterArgs,
    /// Number of independent runs
    #[arg(long)]
    runs: Option<usize>,
    /// Write the per-step summaries of the first run to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SmoothMethod {
    Quadratic,
    Rejection,
    Qmc,
}

#[derive(Args, Clone, Debug)]
struct SmoothArgs {
    #[command(flatten)]
    model: ModelArgs,
    #[command(flatten)]
    filter: FilterArgs,
    /// Backward sampling algorithm
    #[arg(long, value_enum, default_value_t = SmoothMethod::Quadratic)]
    method: SmoothMethod,
    /// Number of trajectories
    #[arg(short = 'M', long, default_value_t = 100)]
    paths: usize,
    /// Attempts per draw of the rejection sampler before the exact fallback
    #[arg(long, default_value_t = 1000)]
    max_attempts: usize,
    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Output file; the format follows the extension
    #[arg(short, long, default_value = "particles.toml")]
    output: PathBuf,
}

#[derive(Serialize)]
struct SummaryRecord {
    t: usize,
    ess: f64,
    resampled: bool,
    log_lt: f64,
    mean: f64,
    var: f64,
}

#[derive(Serialize)]
struct SmoothingRecord {
    t: usize,
    state: f64,
    smoothed_mean: f64,
    rts_mean: f64,
    rts_std: f64,
}

/// Initialise `env_logger` with a timestamped format, logging to stderr or
/// appending to `log_file`.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(OpenOptions::new().create(true).append(true).open(log_path)?);
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Configuration file (or defaults) with command-line overrides applied.
fn resolve_config(path: Option<&PathBuf>, model: &ModelArgs, filter: &FilterArgs) -> Result<RunConfig> {
    let mut cfg = match path {
        Some(p) => RunConfig::from_file(p)
            .with_context(|| format!("cannot read configuration file {}", p.display()))?,
        None => RunConfig::default(),
    };
    if let Some(v) = model.dim {
        cfg.model.dim = v;
    }
    if let Some(v) = model.rho {
        cfg.model.rho = v;
    }
    if let Some(v) = model.sigma_x {
        cfg.model.sigma_x = v;
    }
    if let Some(v) = model.sigma_y {
        cfg.model.sigma_y = v;
    }
    if let Some(v) = model.horizon {
        cfg.model.horizon = v;
    }
    if let Some(v) = model.data_seed {
        cfg.data_seed = v;
    }
    if let Some(v) = filter.particles {
        cfg.filter.n = v;
    }
    if let Some(v) = filter.resampling {
        cfg.filter.resampling = v;
    }
    if let Some(v) = filter.ess_rmin {
        cfg.filter.ess_rmin = v;
    }
    if let Some(v) = filter.seed {
        cfg.filter.seed = Some(v);
    }
    cfg.filter.qmc |= filter.qmc;
    cfg.filter.verbose |= filter.verbose;
    cfg.apf |= filter.apf;
    cfg.filter.validate()?;
    Ok(cfg)
}

fn simulate(cfg: &RunConfig) -> Result<(LinearGauss, Particles, Particles)> {
    let ssm = LinearGauss::from_config(&cfg.model)?;
    let mut rng = StdRng::seed_from_u64(cfg.data_seed);
    let (xs, ys) = ssm.simulate(cfg.model.horizon, &mut rng);
    info!(
        "Simulated T={} observations of a {}-dimensional linear-Gaussian model",
        cfg.model.horizon, cfg.model.dim
    );
    Ok((ssm, xs, ys))
}

/// Filtering mean and variance of the first state component.
fn first_component_moments<F: FeynmanKac<Particles = Particles>>() -> Moments<F> {
    Moments::new("moments", |w, x: &Particles| {
        let first: Vec<f64> = x.iter().map(|xi| xi[0]).collect();
        let (m, v) = wmean_and_var(w, &first);
        vec![m, v]
    })
}

fn run_filter<F>(fk: F, cfg: SmcConfig) -> Result<Smc<F>>
where
    F: FeynmanKac<Particles = Particles> + 'static,
{
    let mut smc = Smc::new(fk, cfg)?.with_collector(Box::new(first_component_moments::<F>()));
    smc.run()?;
    Ok(smc)
}

fn write_summaries<F: FeynmanKac>(smc: &Smc<F>, output: &Path) -> Result<()> {
    let Some(summaries) = smc.summaries() else {
        bail!("summaries were not recorded");
    };
    let moments = summaries.get("moments").unwrap_or(&[]);
    let mut writer = csv::Writer::from_path(output)?;
    for t in 0..summaries.len() {
        let (mean, var) = match moments.get(t) {
            Some(m) if m.len() == 2 => (m[0], m[1]),
            _ => (f64::NAN, f64::NAN),
        };
        writer.serialize(SummaryRecord {
            t,
            ess: summaries.ess()[t],
            resampled: summaries.rs_flags()[t],
            log_lt: summaries.log_lts()[t],
            mean,
            var,
        })?;
    }
    writer.flush()?;
    info!("Summaries written to {}", output.display());
    Ok(())
}

fn run(cfg: &RunConfig, output: Option<&PathBuf>) -> Result<()> {
    let (ssm, _, ys) = simulate(cfg)?;
    let exact = ssm.kalman_filter(&ys)?.log_likelihood();
    let mut estimates = Vec::with_capacity(cfg.runs);
    for r in 0..cfg.runs {
        let mut smc_cfg = cfg.filter.clone();
        smc_cfg.seed = cfg.filter.seed.map(|s| s.wrapping_add(r as u64));
        let (log_lt, secs) = if cfg.apf {
            let smc = run_filter(AuxiliaryBootstrap::new(ssm.clone(), ys.clone())?, smc_cfg)?;
            if r == 0
                && let Some(path) = output
            {
                write_summaries(&smc, path)?;
            }
            (smc.log_lt(), smc.cpu_time().as_secs_f64())
        } else {
            let smc = run_filter(Bootstrap::new(ssm.clone(), ys.clone())?, smc_cfg)?;
            if r == 0
                && let Some(path) = output
            {
                write_summaries(&smc, path)?;
            }
            (smc.log_lt(), smc.cpu_time().as_secs_f64())
        };
        info!("run {}: logLt={:.4} ({:.3}s)", r, log_lt, secs);
        estimates.push(log_lt);
    }
    let k = estimates.len() as f64;
    let mean = estimates.iter().sum::<f64>() / k;
    let std = (estimates.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / k).sqrt();
    println!(
        "{} runs, N={}: logLt mean={:.4} std={:.4}, Kalman logLt={:.4}, error={:.4}",
        cfg.runs,
        cfg.filter.n,
        mean,
        std,
        exact,
        mean - exact
    );
    Ok(())
}

fn smooth(cfg: &RunConfig, args: &SmoothArgs) -> Result<()> {
    let (ssm, xs, ys) = simulate(cfg)?;
    let kf = ssm.kalman_filter(&ys)?;
    let (rts_means, rts_covs) = ssm.rts_smoother(&kf)?;
    let mut smc_cfg = cfg.filter.clone();
    smc_cfg.store_history = HistoryMode::Full;
    smc_cfg.qmc = args.method == SmoothMethod::Qmc;
    if cfg.apf {
        warn!("smoothing runs the bootstrap filter; --apf is ignored");
    }
    let mut smc = Smc::new(Bootstrap::new(ssm, ys)?, smc_cfg)?;
    smc.run()?;
    let paths = match args.method {
        SmoothMethod::Quadratic => smc.backward_sampling(args.paths, BackwardMode::Quadratic)?.paths,
        SmoothMethod::Rejection => {
            let out = smc.backward_sampling(
                args.paths,
                BackwardMode::Rejection {
                    max_attempts: args.max_attempts,
                    fallback: RejectionFallback::Quadratic,
                },
            )?;
            if let Some(rate) = out.acceptance_rate {
                info!("Rejection sampler acceptance rate: {:.3}", rate);
            }
            out.paths
        }
        SmoothMethod::Qmc => smc.backward_sampling_qmc(args.paths)?,
    };
    let mut writer = csv::Writer::from_path(&args.output)?;
    let mut sq_err = 0.0;
    for (t, xt) in paths.iter().enumerate() {
        let smoothed_mean = xt.iter().map(|x| x[0]).sum::<f64>() / xt.len() as f64;
        sq_err += (smoothed_mean - rts_means[t][0]).powi(2);
        writer.serialize(SmoothingRecord {
            t,
            state: xs[t][0],
            smoothed_mean,
            rts_mean: rts_means[t][0],
            rts_std: rts_covs[t][(0, 0)].sqrt(),
        })?;
    }
    writer.flush()?;
    let rmse = (sq_err / paths.len().max(1) as f64).sqrt();
    println!(
        "{:?} backward sampling, M={} trajectories: RMSE against RTS means={:.4}",
        args.method, args.paths, rmse
    );
    info!("Smoothing output written to {}", args.output.display());
    Ok(())
}

fn create_config_file(args: &ConfigArgs) -> Result<()> {
    RunConfig::default()
        .to_file(&args.output)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    println!("Template configuration written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match &cli.command {
        Command::Run(args) => {
            let mut cfg = resolve_config(cli.config.as_ref(), &args.model, &args.filter)?;
            if let Some(runs) = args.runs {
                cfg.runs = runs;
            }
            if cfg.runs == 0 {
                bail!("--runs must be positive");
            }
            run(&cfg, args.output.as_ref())
        }
        Command::Smooth(args) => {
            let cfg = resolve_config(cli.config.as_ref(), &args.model, &args.filter)?;
            smooth(&cfg, args)
        }
        Command::Config(args) => create_config_file(args),
    }
}
