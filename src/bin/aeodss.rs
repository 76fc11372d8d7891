//! Command-line driver (§6, §14): loads configuration, installs logging, builds a [`Simulation`],
//! and runs its control loop to completion. The original flag surface used single-dash,
//! multi-letter switches (`-tp`, `-g0`/`-g1`, `-shm0`/`-shm1`); `clap`'s derive API only emits
//! double-dash long flags, so those are kept as short/long pairs with equivalent meaning
//! (`-t`/`--tp`, `-g`/`-G` for graphics, `--shm0`/`--shm1`) rather than hand-rolling a parser.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use aeodss_sim::config::Config;
use aeodss_sim::error::ConfigError;
use aeodss_sim::motion::parse_tle;
use aeodss_sim::sim::Simulation;

/// Discrete-time simulator of cooperating Earth-observation satellites.
#[derive(Debug, Parser)]
#[command(name = "aeodss", version, about)]
struct Cli {
    /// Run with a randomly seeded constellation instead of the config's fixed seed.
    #[arg(long)]
    random: bool,

    /// Run in throughput-probe mode: one short warmup run to estimate step cost, then exit.
    #[arg(short = 't', long = "tp")]
    throughput_probe: bool,

    /// Parses initial orbital elements from a TLE file instead of `agent.motion.*` (real SGP4
    /// propagation is out of scope; only the initial elements are read).
    #[arg(long = "parse-tle", value_name = "FILE")]
    parse_tle: Option<PathBuf>,

    /// Configuration document (§6 `-f <config>`).
    #[arg(short = 'f', long = "config", value_name = "FILE")]
    config: PathBuf,

    /// Output directory for CSV reporters (§6 `-d <outdir>`).
    #[arg(short = 'd', long = "outdir", value_name = "DIR")]
    outdir: Option<PathBuf>,

    /// System-level override document, round-tripped via `Config::save`/`Config::load` (§6
    /// `-l <system.yml>`); its `system.num_agents` must match the loaded config's.
    #[arg(short = 'l', long = "system", value_name = "FILE")]
    system: Option<PathBuf>,

    /// Disables graphics regardless of `graphics.enabled` in the config document.
    #[arg(short = 'g', long = "no-graphics", conflicts_with = "graphics")]
    no_graphics: bool,

    /// Forces graphics on regardless of `graphics.enabled` in the config document.
    #[arg(short = 'G', long = "graphics")]
    graphics: bool,

    /// Disables the shared geo lookup table, giving every agent a private replica (`-shm0`).
    #[arg(long = "shm0", conflicts_with = "shm1")]
    shm0: bool,

    /// Forces the shared geo lookup table on (`-shm1`, the default).
    #[arg(long = "shm1")]
    shm1: bool,

    /// Plain, non-ANSI, no-timestamp log formatting instead of the default structured output.
    #[arg(long = "simple-log")]
    simple_log: bool,

    /// Root directory for ad hoc debug artifacts, unrelated to `-d`'s CSV reporters.
    #[arg(long = "dbg-rootdir", value_name = "DIR")]
    dbg_rootdir: Option<PathBuf>,
}

fn init_logging(cli: &Cli, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if cli.simple_log {
        subscriber.without_time().with_ansi(false).with_target(false).init();
    } else {
        subscriber.init();
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(&cli.config).with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    if let Some(system_path) = &cli.system {
        let overrides = Config::load(system_path).with_context(|| format!("loading system overrides from {}", system_path.display()))?;
        if overrides.system.num_agents != config.system.num_agents {
            return Err(ConfigError::AgentCountMismatch {
                declared: overrides.system.num_agents,
                found: config.system.num_agents,
            }
            .into());
        }
        config.system = overrides.system;
    }

    if cli.no_graphics {
        config.graphics.enabled = false;
    }
    if cli.graphics {
        config.graphics.enabled = true;
    }

    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli, "info");

    let mut config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            if e.downcast_ref::<ConfigError>().map(|c| matches!(c, ConfigError::AgentCountMismatch { .. })).unwrap_or(false) {
                tracing::error!(error = %e, "configuration error");
                std::process::exit(3);
            }
            tracing::error!(error = %e, "fatal: could not load configuration");
            std::process::exit(1);
        }
    };

    if let Some(tle_path) = &cli.parse_tle {
        let text = std::fs::read_to_string(tle_path).with_context(|| format!("reading TLE file {}", tle_path.display()))?;
        let elements = parse_tle(&text).with_context(|| format!("parsing TLE file {}", tle_path.display()))?;
        tracing::info!(
            path = %tle_path.display(),
            altitude_km = elements.altitude_km,
            inclination_deg = elements.inclination_deg,
            "TLE parsed; seeding the kinematic stand-in motion model's initial elements (real SGP4 propagation is out of scope)"
        );
        config.agent.motion.altitude = elements.altitude_km;
        config.agent.motion.max_ecc = elements.eccentricity;
        config.agent.motion.inc = elements.inclination_deg;
        config.agent.motion.argp = elements.argp_deg;
        config.agent.motion.raan = elements.raan_deg;
        config.agent.motion.init_ma = elements.init_mean_anomaly_deg;
        config.agent.motion.speed = elements.speed;
    }

    let seed = if cli.random { rand::random::<u64>() } else { 0 };

    let outdir = cli.outdir.as_deref();
    let shared_lut = !cli.shm0;
    let mut sim = match Simulation::new_with_lut_sharing(config, seed, outdir, shared_lut) {
        Ok(sim) => sim,
        Err(e) => {
            tracing::error!(error = %e, "fatal: could not construct simulation");
            std::process::exit(1);
        }
    };

    if cli.throughput_probe {
        let start = std::time::Instant::now();
        sim.step().context("throughput probe step failed")?;
        tracing::info!(elapsed_ms = start.elapsed().as_secs_f64() * 1000.0, "throughput probe step completed");
        return Ok(());
    }

    sim.run().context("simulation run failed")?;
    Ok(())
}
