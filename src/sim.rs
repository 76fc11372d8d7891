//! Simulation control loop (§5, §9): owns the [`VirtualClock`], the per-agent satellites, the
//! truth-side [`World`], and the CSV reporters. Each step splits into a parallel per-agent
//! planning phase (`step_parallel`, sized by `parallel.planners` via a dedicated `rayon` pool) and
//! a single-threaded merge phase (`step_sequential`) that performs every piece of cross-agent
//! mutation — link encounter/acceptance, gossip delivery, world observation. Workers in the
//! parallel phase only ever read state installed at the start of the step; nothing written by one
//! agent's worker is visible to another's until the sequential phase runs, so the observable
//! outcome of a step does not depend on the planner worker count (§5 ordering guarantees).
//!
//! `SimContext` bundles the read-only handles (`config`, the shared [`GeoLut`]) that every agent's
//! subcomponents are constructed from, in place of the process-wide singletons the source used
//! (§9 Design Notes).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{info, instrument, warn};

use crate::agent::{Agent, AgentParams};
use crate::clock::VirtualClock;
use crate::config::Config;
use crate::environment::cell::NoOpClean;
use crate::environment::{EnvironmentModel, GeoLut};
use crate::error::{IoError, SimError};
use crate::instrument::Instrument;
use crate::link::LinkEvent;
use crate::motion::{KeplerianElements, MotionModel};
use crate::payoff::RevisitTimeBackwards;
use crate::report::{KnowledgebaseReporter, KnowledgebaseRow, WorldMetricsReporter};
use crate::resource::{Resource, ResourceKind, ResourceLedger};
use crate::view::{AgentSnapshot, FrameSnapshot, NullView, View};
use crate::world::World;
use crate::AgentId;

/// Read-only handles shared across every agent's subcomponents at construction time (§9).
pub struct SimContext {
    pub config: Arc<Config>,
    pub lut: Arc<GeoLut>,
    pub time_unit_seconds: f64,
}

fn build_resources(ctx: &SimContext) -> ResourceLedger {
    let power_rate = ctx.config.agent.instrument.power_rate;
    let max_capacity = (ctx.config.system.duration * power_rate * 0.5).max(1.0);
    let reserved_margin = max_capacity * ctx.config.agent.replan_resource_threshold;
    let mut ledger = ResourceLedger::new();
    ledger.insert("battery".to_string(), Resource::new(ResourceKind::Depletable, "battery", max_capacity, reserved_margin));
    ledger
}

fn build_agent(ctx: &SimContext, index: usize, rng: &mut StdRng) -> Result<Agent, SimError> {
    let id: AgentId = format!("sat-{index}");
    let mut elements: KeplerianElements = ctx.config.resolve_motion(rng)?;
    // Spreads the constellation around the orbital plane; the config document alone would
    // otherwise seed every agent at an identical mean anomaly.
    let n = ctx.config.system.num_agents.max(1) as f64;
    elements.init_mean_anomaly_deg += 360.0 * (index as f64) / n;
    let motion = MotionModel::new(elements);

    let ic = &ctx.config.agent.instrument;
    let instrument = Instrument::new(ic.aperture_deg, ctx.config.agent.motion.altitude, ctx.config.system.interpos);

    let lc = &ctx.config.agent.link;
    let link = crate::link::AgentLink::new(id.clone(), lc.range_km, lc.datarate_bps, lc.tx_energy_rate, lc.rx_energy_rate);

    let payoff_fn = Arc::new(RevisitTimeBackwards { params: ctx.config.environment.payoff.clone() });
    let environment = EnvironmentModel::new(id.clone(), ctx.lut.clone(), payoff_fn, Arc::new(NoOpClean));

    let resources = build_resources(ctx);
    let ga_params = ctx.config.resolve_ga();
    let gen_params = ctx.config.resolve_generation(ctx.config.system.dt);
    let params = AgentParams {
        planning_window: ctx.config.agent.planning_window,
        replanning_window: ctx.config.agent.replanning_window,
        confirm_window: ctx.config.agent.confirm_window,
        replan_resource_threshold: ctx.config.agent.replan_resource_threshold,
        goal_target: ctx.config.agent.goal_target,
        time_unit_seconds: ctx.time_unit_seconds,
        power_rate: ic.power_rate,
    };

    Ok(Agent::new(id, motion, instrument, link, resources, environment, ga_params, gen_params, params))
}

/// Owns the whole run: the clock, every agent, the truth-side observer, and (optionally) the CSV
/// reporters and a render boundary. Constructed once per `-f <config>` via [`Simulation::new`].
pub struct Simulation {
    ctx: SimContext,
    clock: VirtualClock,
    agents: Vec<Agent>,
    rngs: Vec<StdRng>,
    world: World,
    pool: rayon::ThreadPool,
    world_reporter: Option<WorldMetricsReporter>,
    kb_reporters: Vec<KnowledgebaseReporter>,
    view: Box<dyn View>,
    /// Guards the frame snapshot a view thread would read; taken for the duration of building and
    /// handing off one [`FrameSnapshot`] per step (§5 `mutex_draw`).
    mutex_draw: Mutex<()>,
    /// Cooperative cancellation flag for the control loop (§5 `exit_control_loop`); checked once
    /// per step rather than interrupting mid-step.
    exit_control_loop: Arc<AtomicBool>,
}

impl Simulation {
    /// Builds a simulation from a loaded, already-[`Config::validate`]d configuration, seeding one
    /// agent per `system.num_agents`. Returns [`crate::error::ConfigError::AgentCountMismatch`]
    /// (surfaced through [`SimError`]) if `seeds.len()` doesn't match, matching the CLI's exit
    /// code 3 contract (§6).
    pub fn new(config: Config, seed: u64, outdir: Option<&Path>) -> Result<Self, SimError> {
        Self::new_with_lut_sharing(config, seed, outdir, true)
    }

    /// As [`Simulation::new`], but `shared_lut = false` gives every agent its own `GeoLut`
    /// replica instead of one `Arc`-shared table (§6 `-shm0`/`-shm1`) — the per-agent geo math is
    /// identical either way, since `GeoLut` is immutable once built; this only changes whether the
    /// table's memory is shared or duplicated.
    pub fn new_with_lut_sharing(config: Config, seed: u64, outdir: Option<&Path>, shared_lut: bool) -> Result<Self, SimError> {
        config.validate()?;
        let num_agents = config.system.num_agents;

        let build_lut = || {
            Arc::new(GeoLut::build(
                config.environment.width,
                config.environment.height,
                config.environment.ratio_w,
                config.environment.ratio_h,
            ))
        };
        let lut = build_lut();
        let config = Arc::new(config);
        let time_unit_seconds = match config.system.time.kind {
            crate::clock::TimeType::Seconds => 1.0,
            crate::clock::TimeType::JulianDate => 86_400.0,
            crate::clock::TimeType::Arbitrary => 1.0,
        };
        let ctx = SimContext { config: config.clone(), lut: lut.clone(), time_unit_seconds };

        let mut clock = VirtualClock::new(config.system.time.kind);
        clock.init(0.0, config.system.dt, config.system.duration);

        let mut agents = Vec::with_capacity(num_agents);
        let mut rngs = Vec::with_capacity(num_agents);
        for i in 0..num_agents {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            let agent_ctx = if shared_lut {
                SimContext { config: ctx.config.clone(), lut: ctx.lut.clone(), time_unit_seconds }
            } else {
                SimContext { config: ctx.config.clone(), lut: build_lut(), time_unit_seconds }
            };
            agents.push(build_agent(&agent_ctx, i, &mut rng)?);
            rngs.push(rng);
        }
        if agents.len() != num_agents {
            return Err(crate::error::ConfigError::AgentCountMismatch { declared: num_agents, found: agents.len() }.into());
        }

        let planners = config.parallel.planners.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(planners)
            .build()
            .map_err(|e| SimError::System(crate::error::SystemError::InvariantViolation(e.to_string())))?;

        let (world_reporter, kb_reporters) = match outdir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|_| IoError::CreateDir(dir.display().to_string()))?;
                let world_reporter = WorldMetricsReporter::create(dir)?;
                let mut kb = Vec::with_capacity(num_agents);
                for agent in &agents {
                    kb.push(KnowledgebaseReporter::create(dir, agent.id())?);
                }
                (Some(world_reporter), kb)
            }
            None => (None, Vec::new()),
        };

        Ok(Simulation {
            ctx,
            clock,
            agents,
            rngs,
            world: World::new(lut),
            pool,
            world_reporter,
            kb_reporters,
            view: Box::new(NullView),
            mutex_draw: Mutex::new(()),
            exit_control_loop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Swaps in a real renderer; `NullView` otherwise.
    pub fn set_view(&mut self, view: Box<dyn View>) {
        self.view = view;
    }

    /// A clone-able handle the CLI installs a Ctrl-C handler against, matching §5's cooperative
    /// (not thread-interrupting) cancellation contract.
    pub fn exit_handle(&self) -> Arc<AtomicBool> {
        self.exit_control_loop.clone()
    }

    /// Runs until the clock is exhausted or the exit flag is set, checked once per step. Reports
    /// progress against the configured duration on a step-count progress bar; a non-terminal
    /// stderr (redirected to a file, as `--simple-log` assumes) falls back to indicatif's own
    /// hidden-draw-target behavior with no special-casing here.
    pub fn run(&mut self) -> Result<(), SimError> {
        let total_steps = (self.ctx.config.system.duration / self.clock.dt()).ceil().max(1.0) as u64;
        let bar = ProgressBar::new(total_steps);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} steps ({eta} left)")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        while !self.clock.finished() && !self.exit_control_loop.load(Ordering::Relaxed) {
            self.step()?;
            bar.inc(1);
        }
        bar.finish_and_clear();
        self.flush_reporters()
    }

    /// One simulation step: parallel per-agent work, then the single-threaded merge (§5, §9).
    #[instrument(skip(self), fields(now = self.clock.now()))]
    pub fn step(&mut self) -> Result<(), SimError> {
        let now = self.clock.now();
        let dt = self.clock.dt();

        self.step_parallel(now, dt);
        self.step_sequential(now, dt)?;

        self.draw_frame(now);
        self.clock.step();
        Ok(())
    }

    /// Each worker mutates only its own agent's activity handler and environment model; peer
    /// reads during `plan()` see whatever gossip/link delivery installed at the *previous* step's
    /// merge, never a sibling worker's in-flight writes (§5).
    fn step_parallel(&mut self, now: f64, dt: f64) {
        let agents = &mut self.agents;
        let rngs = &mut self.rngs;
        self.pool.install(|| {
            agents.par_iter_mut().zip(rngs.par_iter_mut()).for_each(|(agent, rng)| {
                if let Err(e) = agent.update_position(now) {
                    warn!(agent = %agent.id(), error = %e, "update_position failed");
                    return;
                }
                agent.listen();
                if let Err(e) = agent.plan(now, dt, rng) {
                    warn!(agent = %agent.id(), error = %e, "plan failed, skipping this step's replan");
                }
                agent.execute(now, dt);
                agent.consume(dt);
            });
        });
    }

    /// Cross-agent mutation: link state machine per ordered pair, gossip delivery, environment
    /// purge, and truth-side observation. Single-threaded, so insertion order is deterministic
    /// regardless of the planner pool size (§5).
    fn step_sequential(&mut self, now: f64, dt: f64) -> Result<(), SimError> {
        let n = self.agents.len();
        let range_km = self.ctx.config.agent.link.range_km;
        let positions: Vec<Option<crate::geo::Vec3>> = self.agents.iter().map(|a| a.position()).collect();

        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (Some(own_pos), Some(peer_pos)) = (positions[i], positions[j]) else {
                    continue;
                };
                let peer_id = self.agents[j].id().clone();
                let events = self.agents[i].link_step(now, dt, &peer_id, peer_pos, range_km);
                for event in events {
                    match event {
                        LinkEvent::Encountered(peer) => {
                            if let Some(LinkEvent::Connected(_)) = self.agents[i].accept_connection(&peer) {
                                info!(agent = %self.agents[i].id(), peer = %peer, "link connected");
                            }
                        }
                        LinkEvent::Deliver { peer, transfer } => {
                            let sender = self.agents[i].id().clone();
                            if let Some(k) = self.agents.iter().position(|a| a.id() == &peer) {
                                if let Err(e) = self.agents[k].receive_transfer(&sender, transfer, now) {
                                    warn!(agent = %peer, from = %sender, error = %e, "dropped transfer");
                                }
                            }
                        }
                        LinkEvent::TransferFailed { peer, transfer_id } => {
                            warn!(agent = %self.agents[i].id(), peer = %peer, transfer_id, "transfer failed");
                        }
                        LinkEvent::Disconnected(_) | LinkEvent::TransferCompleted { .. } => {}
                    }
                }
            }
        }

        for agent in &mut self.agents {
            agent.gossip(now);
        }
        for agent in &mut self.agents {
            agent.purge(now);
        }

        for agent in &self.agents {
            for (coord, intervals) in agent.handler().owned().iter().flat_map(|a| a.active_cells()) {
                if intervals.iter().any(|iv| iv.contains(now)) {
                    let confirmed = agent.handler().owned().iter().any(|a| a.active_cells().contains_key(coord) && a.confirmed());
                    self.world.observe(*coord, now, confirmed);
                }
            }
        }

        self.report(now)
    }

    fn report(&mut self, now: f64) -> Result<(), SimError> {
        if let Some(reporter) = &mut self.world_reporter {
            self.world.report(now, reporter)?;
        }
        for (agent, reporter) in self.agents.iter().zip(self.kb_reporters.iter_mut()) {
            let (own_facts, own_undecided, peer_facts, peer_undecided) = agent.handler().knowledge_counts();
            reporter.record(KnowledgebaseRow {
                t: now,
                agent: agent.id().clone(),
                own_facts,
                own_undecided,
                peer_facts,
                peer_undecided,
            })?;
        }
        Ok(())
    }

    fn flush_reporters(&mut self) -> Result<(), SimError> {
        if let Some(reporter) = &mut self.world_reporter {
            reporter.flush()?;
        }
        for reporter in &mut self.kb_reporters {
            reporter.flush()?;
        }
        Ok(())
    }

    /// Hands a frame snapshot to the installed view, holding `mutex_draw` for the duration so a
    /// real renderer's draw thread never observes a half-built frame (§5).
    fn draw_frame(&mut self, now: f64) {
        let _guard = self.mutex_draw.lock();
        let agents = self
            .agents
            .iter()
            .map(|a| AgentSnapshot { id: a.id().clone(), position: a.position(), capturing: a.handler().is_capturing(now) })
            .collect();
        self.view.draw(&FrameSnapshot { now, agents });
    }
}

/// Where the CLI should write reporter output for a run named `name` under `-d <outdir>`.
pub fn run_output_dir(outdir: &Path, name: &str) -> PathBuf {
    outdir.join(name)
}
