use aeodss_sim::clock::TimeType;
use aeodss_sim::config::{
    AgentConfig, Config, CrossoverConfig, EnvironSelConfig, EnvironmentConfig, GaConfigDoc, GraphicsConfig,
    InstrumentConfig, LinkConfig, MotionConfig, ParallelConfig, ParentSelConfig, SystemConfig, TimeConfig,
};
use aeodss_sim::payoff::{PayoffAggregation, PayoffModelType, PayoffParams};
use aeodss_sim::scheduler::operators::{CrossoverType, EnvironSelType, ParentSelType};

/// A small but complete configuration, tuned for fast-converging tests rather than realism: a
/// short planning window, a small GA population, and a dense environment grid.
pub fn sample_config(num_agents: usize) -> Config {
    Config {
        system: SystemConfig {
            name: "it-run".to_string(),
            num_agents,
            verbosity: "info".to_string(),
            interpos: 2,
            duration: 400.0,
            dt: 1.0,
            time: TimeConfig { kind: TimeType::Arbitrary },
        },
        parallel: ParallelConfig { planners: 1 },
        graphics: GraphicsConfig::default(),
        agent: AgentConfig {
            planning_window: 10,
            replanning_window: 10,
            confirm_window: 2,
            max_task_duration: 3.0,
            max_tasks: 4,
            min_payoff: 0.0,
            goal_target: 60.0,
            replan_resource_threshold: 0.1,
            instrument: InstrumentConfig { aperture_deg: 20.0, power_rate: 1.0 },
            link: LinkConfig {
                range_km: 2000.0,
                datarate_bps: 1_000_000.0,
                tx_energy_rate: 0.1,
                rx_energy_rate: 0.05,
            },
            motion: MotionConfig {
                kind: "keplerian".to_string(),
                altitude: 650.0,
                max_ecc: 0.0,
                inc: 97.5,
                argp: 0.0,
                raan: 0.0,
                init_ma: 0.0,
                speed: 0.002,
            },
            ga_scheduler: GaConfigDoc {
                generations: 15,
                timeout: 8,
                min_improvement_rate: 0.0,
                population_size: 12,
                mutation_rate: 0.05,
                crossover: CrossoverConfig { kind: CrossoverType::Uniform, n_points: 2 },
                parent_sel: ParentSelConfig { kind: ParentSelType::Tournament, k: 3 },
                environ_sel: EnvironSelConfig { kind: EnvironSelType::Elitist },
                lambda: 1.5,
                payoff_aggregation: PayoffAggregation::Mean,
            },
        },
        environment: EnvironmentConfig {
            width: 32,
            height: 16,
            ratio_w: 1.0,
            ratio_h: 1.0,
            payoff: PayoffParams {
                model: PayoffModelType::Linear,
                goal_min: 0.0,
                goal_max: 40.0,
                steepness: 1.0,
                payoff_mid: 20.0,
                slope: 1.0,
            },
        },
    }
}
