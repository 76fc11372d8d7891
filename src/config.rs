//! Configuration (§6, §12): one `#[derive(Deserialize)]`/`Serialize` struct per document
//! section, composed into one root [`Config`], loaded via `serde_yaml` from the file named by
//! `-f <config>` and round-tripped via `-l <system.yml>` for per-agent overrides.

use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clock::TimeType;
use crate::error::ConfigError;
use crate::motion::KeplerianElements;
use crate::payoff::{PayoffAggregation, PayoffParams};
use crate::scheduler::operators::{CrossoverType, EnvironSelType, ParentSelType};
use crate::scheduler::GaParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub graphics: GraphicsConfig,
    pub agent: AgentConfig,
    pub environment: EnvironmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub name: String,
    pub num_agents: usize,
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
    pub interpos: usize,
    pub duration: f64,
    pub dt: f64,
    pub time: TimeConfig,
}

fn default_verbosity() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(rename = "type")]
    pub kind: TimeType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    pub planners: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig { planners: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphicsConfig {
    pub enabled: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub font_size: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        GraphicsConfig {
            enabled: false,
            window_width: 1280,
            window_height: 720,
            font_size: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// In time-steps (§6).
    pub planning_window: usize,
    pub replanning_window: usize,
    pub confirm_window: usize,
    pub max_task_duration: f64,
    pub max_tasks: usize,
    /// Minimum aggregated cell payoff a Δt step must clear to be included in a generated
    /// sub-task run (§4.5 `generate_activities`).
    pub min_payoff: f64,
    /// Purge/exchange horizon, in the clock's time unit (§4.6): activities whose end-time falls
    /// more than this far behind `now` are dropped from both own and others' collections.
    pub goal_target: f64,
    /// Fraction of resource capacity that must remain, on every tracked resource, for `plan()`
    /// to run at all (§4.9 step 3).
    #[serde(default = "default_replan_resource_threshold")]
    pub replan_resource_threshold: f64,
    pub instrument: InstrumentConfig,
    pub link: LinkConfig,
    pub motion: MotionConfig,
    pub ga_scheduler: GaConfigDoc,
}

fn default_replan_resource_threshold() -> f64 {
    0.25
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub aperture_deg: f64,
    /// Resource consumption rate (per resource, per time unit) while the instrument is capturing.
    pub power_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    pub range_km: f64,
    pub datarate_bps: f64,
    pub tx_energy_rate: f64,
    pub rx_energy_rate: f64,
}

/// Keplerian element ranges (§6 `agent.motion.*`). `type` is kept as a raw string here (rather
/// than an enum) so an unrecognised value produces the dedicated [`ConfigError::UnknownMotionModel`]
/// rather than a generic parse failure, per §12's worked example.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub altitude: f64,
    pub max_ecc: f64,
    pub inc: f64,
    pub argp: f64,
    pub raan: f64,
    pub init_ma: f64,
    pub speed: f64,
}

/// Wire shape of `agent.ga_scheduler.*`; resolved into [`GaParams`] by [`Config::resolve_ga`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaConfigDoc {
    pub generations: usize,
    pub timeout: usize,
    pub min_improvement_rate: f64,
    pub population_size: usize,
    pub mutation_rate: f64,
    pub crossover: CrossoverConfig,
    pub parent_sel: ParentSelConfig,
    pub environ_sel: EnvironSelConfig,
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    #[serde(default = "default_payoff_aggregation")]
    pub payoff_aggregation: PayoffAggregation,
}

fn default_payoff_aggregation() -> PayoffAggregation {
    PayoffAggregation::Mean
}

fn default_lambda() -> f64 {
    1.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossoverConfig {
    #[serde(rename = "type")]
    pub kind: CrossoverType,
    #[serde(default = "default_n_points")]
    pub n_points: usize,
}

fn default_n_points() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentSelConfig {
    #[serde(rename = "type")]
    pub kind: ParentSelType,
    #[serde(default = "default_tournament_k")]
    pub k: usize,
}

fn default_tournament_k() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironSelConfig {
    #[serde(rename = "type")]
    pub kind: EnvironSelType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub width: i32,
    pub height: i32,
    pub ratio_w: f64,
    pub ratio_h: f64,
    pub payoff: PayoffParams,
}

impl Config {
    /// Loads and validates a configuration document from `path` (§6 `-f <config>`).
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks beyond what `serde` already enforces: unrecognised enum-valued strings
    /// and internally inconsistent tunables (§7 category 1, fatal at load).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.motion_kind_known() {
            return Err(ConfigError::UnknownMotionModel(self.agent.motion.kind.clone()));
        }
        if self.agent.ga_scheduler.population_size < 2 {
            return Err(ConfigError::InvalidValue {
                field: "agent.ga_scheduler.population_size".to_string(),
                msg: "must be at least 2".to_string(),
            });
        }
        if self.agent.ga_scheduler.generations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.ga_scheduler.generations".to_string(),
                msg: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.agent.ga_scheduler.mutation_rate) {
            return Err(ConfigError::InvalidValue {
                field: "agent.ga_scheduler.mutation_rate".to_string(),
                msg: "must be within [0,1]".to_string(),
            });
        }
        if self.environment.width <= 0 || self.environment.height <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "environment.{width,height}".to_string(),
                msg: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    fn motion_kind_known(&self) -> bool {
        matches!(self.agent.motion.kind.to_ascii_lowercase().as_str(), "keplerian")
    }

    /// Resolves `agent.motion` into a concrete [`KeplerianElements`], sampling an eccentricity
    /// uniformly in `[0, max_ecc]` per the §6 "Keplerian element ranges" wording (a fixed config
    /// document seeds a constellation of agents with varied, not identical, orbits).
    pub fn resolve_motion(&self, rng: &mut impl Rng) -> Result<KeplerianElements, ConfigError> {
        if !self.motion_kind_known() {
            return Err(ConfigError::UnknownMotionModel(self.agent.motion.kind.clone()));
        }
        let m = &self.agent.motion;
        let eccentricity = if m.max_ecc > 0.0 { rng.random_range(0.0..=m.max_ecc) } else { 0.0 };
        Ok(KeplerianElements {
            altitude_km: m.altitude,
            eccentricity,
            inclination_deg: m.inc,
            argp_deg: m.argp,
            raan_deg: m.raan,
            init_mean_anomaly_deg: m.init_ma,
            speed: m.speed,
        })
    }

    pub fn resolve_ga(&self) -> GaParams {
        let doc = &self.agent.ga_scheduler;
        GaParams {
            population_size: doc.population_size,
            ga_generations: doc.generations,
            ga_timeout: doc.timeout,
            ga_min_improvement_rate: doc.min_improvement_rate,
            ga_mutation_rate: doc.mutation_rate,
            crossover: doc.crossover.kind,
            crossover_points: doc.crossover.n_points,
            parent_sel: doc.parent_sel.kind,
            tournament_k: doc.parent_sel.k,
            environ_sel: doc.environ_sel.kind,
            lambda: doc.lambda,
        }
    }

    /// Resolves the tunables [`crate::environment::GenerationParams`] needs out of `agent.*`.
    pub fn resolve_generation(&self, dt: f64) -> crate::environment::GenerationParams {
        crate::environment::GenerationParams {
            dt,
            min_payoff: self.agent.min_payoff,
            max_task_duration: self.agent.max_task_duration,
            max_tasks: self.agent.max_tasks,
            aggregation: self.agent.ga_scheduler.payoff_aggregation,
        }
    }

    /// Serialises this configuration to `path` (§6 `-l <system.yml>` load/save round-trip).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path.as_ref(), text).map_err(|source| ConfigError::Write {
            path: path.as_ref().display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payoff::PayoffModelType;

    fn sample() -> Config {
        Config {
            system: SystemConfig {
                name: "test-run".to_string(),
                num_agents: 2,
                verbosity: "info".to_string(),
                interpos: 4,
                duration: 1000.0,
                dt: 10.0,
                time: TimeConfig { kind: TimeType::Arbitrary },
            },
            parallel: ParallelConfig { planners: 2 },
            graphics: GraphicsConfig::default(),
            agent: AgentConfig {
                planning_window: 50,
                replanning_window: 10,
                confirm_window: 5,
                max_task_duration: 30.0,
                max_tasks: 8,
                min_payoff: 0.1,
                goal_target: 100.0,
                replan_resource_threshold: 0.25,
                instrument: InstrumentConfig { aperture_deg: 20.0, power_rate: 2.0 },
                link: LinkConfig {
                    range_km: 1500.0,
                    datarate_bps: 1_000_000.0,
                    tx_energy_rate: 0.2,
                    rx_energy_rate: 0.1,
                },
                motion: MotionConfig {
                    kind: "keplerian".to_string(),
                    altitude: 650.0,
                    max_ecc: 0.01,
                    inc: 97.5,
                    argp: 0.0,
                    raan: 0.0,
                    init_ma: 0.0,
                    speed: 0.001,
                },
                ga_scheduler: GaConfigDoc {
                    generations: 50,
                    timeout: 10,
                    min_improvement_rate: 1e-4,
                    population_size: 20,
                    mutation_rate: 0.05,
                    crossover: CrossoverConfig {
                        kind: CrossoverType::Uniform,
                        n_points: 2,
                    },
                    parent_sel: ParentSelConfig {
                        kind: ParentSelType::Tournament,
                        k: 3,
                    },
                    environ_sel: EnvironSelConfig {
                        kind: EnvironSelType::Elitist,
                    },
                    lambda: 1.5,
                    payoff_aggregation: PayoffAggregation::Mean,
                },
            },
            environment: EnvironmentConfig {
                width: 64,
                height: 32,
                ratio_w: 1.0,
                ratio_h: 1.0,
                payoff: PayoffParams {
                    model: PayoffModelType::Linear,
                    goal_min: 0.0,
                    goal_max: 1.0,
                    steepness: 1.0,
                    payoff_mid: 0.5,
                    slope: 1.0,
                },
            },
        }
    }

    #[test]
    fn validate_accepts_sample() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn unknown_motion_model_rejected() {
        let mut c = sample();
        c.agent.motion.kind = "sgp4".to_string();
        assert!(matches!(c.validate(), Err(ConfigError::UnknownMotionModel(_))));
    }

    #[test]
    fn round_trips_through_yaml() {
        let c = sample();
        let text = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.system.name, c.system.name);
        assert_eq!(back.agent.ga_scheduler.generations, c.agent.ga_scheduler.generations);
    }

    #[test]
    fn rejects_undersized_population() {
        let mut c = sample();
        c.agent.ga_scheduler.population_size = 1;
        assert!(c.validate().is_err());
    }
}
