//! The per-agent pipeline (§4.9): one simulated satellite, stepped in six ordered stages —
//! `update_position`, `listen`, `plan`, `execute`, `consume`, `gossip`. Cross-agent wiring (routing
//! a sender's `LinkEvent::Deliver` into the receiving peer's link) is deliberately not here; per
//! [`crate::link`]'s own module doc that belongs to the simulation's sequential merge stage.

use std::collections::HashMap;

use rand::Rng;
use smallvec::SmallVec;
use tracing::{debug, instrument, warn};

use crate::activity::{ActivityHandle, CellCoord, Interval, TrajectorySample};
use crate::environment::{EnvironmentModel, GenerationParams};
use crate::error::{HandlerError, LinkError, SchedulerError, SystemError};
use crate::geo::Vec3;
use crate::handler::ActivityHandler;
use crate::instrument::{self, Instrument};
use crate::link::{AgentLink, LinkEvent, TransferRecord};
use crate::motion::MotionModel;
use crate::resource::{RateKey, ResourceLedger};
use crate::scheduler::{Candidate, GAScheduler, GaParams};
use crate::AgentId;

/// Tunables resolved out of `agent.*` configuration that aren't already owned by one of the
/// subcomponents (§6).
#[derive(Debug, Clone, Copy)]
pub struct AgentParams {
    /// Length, in time-steps, of the synthetic candidate the planner samples ahead (§4.9 step 3).
    pub planning_window: usize,
    /// `plan()` only runs once the agent's queue of still-pending owned activities has drained to
    /// at most this many (§4.9 step 3).
    pub replanning_window: usize,
    pub confirm_window: usize,
    /// Fraction of headroom every resource must retain for `plan()` to run at all.
    pub replan_resource_threshold: f64,
    /// Purge / gossip-exchange horizon, in the clock's time unit (§4.6).
    pub goal_target: f64,
    pub time_unit_seconds: f64,
    /// Flat per-resource consumption rate while the instrument is capturing (§4.9 step 4).
    pub power_rate: f64,
}

/// One simulated Earth-observation satellite.
pub struct Agent {
    id: AgentId,
    motion: MotionModel,
    instrument: Instrument,
    handler: ActivityHandler,
    environment: EnvironmentModel,
    link: AgentLink,
    resources: ResourceLedger,
    ga_params: GaParams,
    gen_params: GenerationParams,
    params: AgentParams,
    active_rate_key: Option<RateKey>,
}

impl Agent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AgentId,
        motion: MotionModel,
        instrument: Instrument,
        link: AgentLink,
        resources: ResourceLedger,
        environment: EnvironmentModel,
        ga_params: GaParams,
        gen_params: GenerationParams,
        params: AgentParams,
    ) -> Self {
        let handler = ActivityHandler::new(id.clone());
        Agent {
            id,
            motion,
            instrument,
            handler,
            environment,
            link,
            resources,
            ga_params,
            gen_params,
            params,
            active_rate_key: None,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn handler(&self) -> &ActivityHandler {
        &self.handler
    }

    pub fn resources(&self) -> &ResourceLedger {
        &self.resources
    }

    pub fn position(&self) -> Option<Vec3> {
        self.motion.last_position()
    }

    pub fn motion(&self) -> &MotionModel {
        &self.motion
    }

    /// Stage 1: advances this agent's position to `now` (§4.9 step 1).
    #[instrument(skip(self), fields(agent = %self.id, now))]
    pub fn update_position(&mut self, now: f64) -> Result<Vec3, SystemError> {
        self.motion.step(now)
    }

    /// Stage 2: drains this agent's already-populated link RX queue and merges finished transfers
    /// into the knowledge base and the environment model (§4.9 step 2).
    #[instrument(skip(self), fields(agent = %self.id))]
    pub fn listen(&mut self) {
        for transfer in self.link.drain_rx() {
            if self.handler.add_peer(transfer.activity.clone()) {
                self.environment.add_activity(transfer.activity);
            }
        }
    }

    fn resources_ready(&self) -> bool {
        self.resources.values().all(|r| {
            let max = r.max_capacity().max(1e-9);
            r.available_margin() / max >= self.params.replan_resource_threshold
        })
    }

    fn pending_count(&self, now: f64) -> usize {
        self.handler.owned().iter().filter(|a| a.end() > now).count()
    }

    /// Samples the motion model at `dt`-spaced steps over `[now, now + window*dt)` and merges
    /// per-segment visible cells into a non-overlapping per-cell interval timeline, producing one
    /// synthetic long candidate to hand to the payoff/generation pipeline.
    fn sample_trajectory(
        &self,
        now: f64,
        dt: f64,
        window: usize,
    ) -> (Vec<TrajectorySample>, HashMap<CellCoord, SmallVec<[Interval; 4]>>) {
        let n = window.max(1);
        let mut trajectory = Vec::with_capacity(n + 1);
        for i in 0..=n {
            let t = now + i as f64 * dt;
            trajectory.push(TrajectorySample { t, position: self.motion.position_at(t) });
        }

        let arc_km = instrument::swath_arc(self.motion.elements().altitude_km, self.instrument.aperture()).unwrap_or(0.0);

        let mut active_cells: HashMap<CellCoord, SmallVec<[Interval; 4]>> = HashMap::new();
        for w in trajectory.windows(2) {
            let sub0 = crate::geo::ecef_to_latlon(w[0].position);
            let sub1 = crate::geo::ecef_to_latlon(w[1].position);
            let visible = self.environment.visible_cells(sub0, sub1, arc_km, self.instrument.interpos());
            for cell in visible {
                let entry = active_cells.entry(cell).or_default();
                match entry.last_mut() {
                    Some(last) if (last.t1 - w[0].t).abs() < 1e-9 => last.t1 = w[1].t,
                    _ => entry.push(Interval::new(w[0].t, w[1].t)),
                }
            }
        }
        (trajectory, active_cells)
    }

    fn clip_active_cells(
        active_cells: &HashMap<CellCoord, SmallVec<[Interval; 4]>>,
        window: Interval,
    ) -> HashMap<CellCoord, SmallVec<[Interval; 4]>> {
        let mut out = HashMap::new();
        for (coord, intervals) in active_cells {
            let clipped: SmallVec<[Interval; 4]> = intervals
                .iter()
                .filter_map(|iv| {
                    let t0 = iv.t0.max(window.t0);
                    let t1 = iv.t1.min(window.t1);
                    (t0 < t1).then(|| Interval::new(t0, t1))
                })
                .collect();
            if !clipped.is_empty() {
                out.insert(*coord, clipped);
            }
        }
        out
    }

    /// Stage 3 (§4.9 step 3): gated on both the pending-activity count and resource headroom.
    /// Builds a synthetic candidate over the planning window, scores and cuts it into sub-tasks,
    /// runs the GA scheduler over those sub-tasks against the still-pending owned activities, then
    /// installs the winning spans as new owned activities and retracts any previous-solution
    /// activity the scheduler discarded.
    #[instrument(skip(self, rng), fields(agent = %self.id, now))]
    pub fn plan(&mut self, now: f64, dt: f64, rng: &mut impl Rng) -> Result<(), SchedulerError> {
        if self.pending_count(now) > self.params.replanning_window || !self.resources_ready() {
            return Ok(());
        }

        let (trajectory, active_cells) = self.sample_trajectory(now, dt, self.params.planning_window);
        let end = trajectory.last().map(|s| s.t).unwrap_or(now);
        if !(now < end) {
            return Ok(());
        }

        let candidate = match crate::activity::Activity::new(
            self.id.clone(),
            0,
            now,
            end,
            trajectory.clone(),
            active_cells.clone(),
            0.0,
            false,
            false,
            now,
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(agent = %self.id, error = %e, "could not build planning candidate");
                return Ok(());
            }
        };

        if let Err(e) = self.environment.compute_payoff(&candidate) {
            warn!(agent = %self.id, error = %e, "payoff computation failed during planning");
            return Ok(());
        }
        let generated = self.environment.generate_activities(&candidate, &self.gen_params);
        if generated.is_empty() {
            return Ok(());
        }

        let prev_activities: Vec<ActivityHandle> =
            self.handler.owned().iter().filter(|a| a.end() > now).cloned().collect();

        let candidates: Vec<Candidate> = generated
            .iter()
            .map(|gc| {
                let overlap = prev_activities.iter().position(|a| a.interval().overlaps(&gc.interval));
                let resource_rates = self.resources.keys().map(|k| (k.clone(), self.params.power_rate)).collect();
                Candidate {
                    t0: gc.interval.t0,
                    t1: gc.interval.t1,
                    payoff: gc.payoff,
                    resource_rates,
                    prev_solution: overlap,
                    prev_confirmed: overlap.map(|i| prev_activities[i].confirmed()).unwrap_or(false),
                }
            })
            .collect();

        let scheduler = GAScheduler::new(&candidates, &self.ga_params, &self.resources)?;
        let outcome = scheduler.run(rng);
        debug!(
            agent = %self.id,
            best_fitness = outcome.best_fitness,
            n_spans = outcome.new_spans.len(),
            "plan produced outcome"
        );

        for idx in outcome.discard {
            if let Some(prev) = prev_activities.get(idx) {
                if let Some(updated) = self.handler.discard_owned(prev.seq(), now) {
                    self.environment.update_activity(updated);
                }
            }
        }

        for (t0, t1) in outcome.new_spans {
            let window = Interval::new(t0, t1);
            let span_trajectory: Vec<TrajectorySample> =
                trajectory.iter().filter(|s| window.contains(s.t) || s.t == t1).cloned().collect();
            let span_cells = Self::clip_active_cells(&active_cells, window);
            match self.handler.create_owned(t0, t1, span_trajectory, span_cells, 0.5, false, now) {
                Ok(handle) => self.environment.add_activity(handle),
                Err(HandlerError::OverlappingOwned { .. }) => {
                    debug!(agent = %self.id, t0, t1, "skipped GA span overlapping an existing owned activity");
                }
                Err(e) => warn!(agent = %self.id, error = %e, "failed to install planned activity"),
            }
        }

        Ok(())
    }

    /// Stage 4 (§4.9 step 4): toggles the instrument's resource rate on/off as the current owned
    /// activity starts or finishes being captured, and resynchronises the handler's cached
    /// current-activity index against `now`.
    #[instrument(skip(self), fields(agent = %self.id, now))]
    pub fn execute(&mut self, now: f64, dt: f64) {
        self.handler.update(now, dt);
        let capturing = self.handler.is_capturing(now);
        match (capturing, self.active_rate_key.clone()) {
            (true, None) => {
                if let Some(activity) = self.handler.current_activity() {
                    let key = RateKey::new(self.id.clone(), activity.seq());
                    for resource in self.resources.values_mut() {
                        if let Err(e) = resource.add_rate(key.clone(), self.params.power_rate) {
                            warn!(agent = %self.id, error = %e, "failed to install instrument rate");
                        }
                    }
                    self.active_rate_key = Some(key);
                }
            }
            (false, Some(key)) => {
                for resource in self.resources.values_mut() {
                    if let Err(e) = resource.remove_rate(&key) {
                        warn!(agent = %self.id, error = %e, "failed to remove instrument rate");
                    }
                }
                self.active_rate_key = None;
            }
            _ => {}
        }
    }

    /// Stage 5 (§4.9 step 5): advances every tracked resource by `dt`, logging and swallowing
    /// overrun/margin errors rather than propagating them (§7 category 3).
    #[instrument(skip(self), fields(agent = %self.id, dt))]
    pub fn consume(&mut self, dt: f64) {
        for resource in self.resources.values_mut() {
            if let Err(e) = resource.step(dt) {
                warn!(agent = %self.id, resource = resource.name(), error = %e, "resource step failed");
            }
        }
    }

    /// Stage 6 (§4.9 step 6): for every connected peer, schedules the highest-priority activities
    /// due for exchange.
    #[instrument(skip(self), fields(agent = %self.id, now))]
    pub fn gossip(&mut self, now: f64) {
        let peers: Vec<AgentId> = self.link.connected_peers().cloned().collect();
        for peer in peers {
            let to_send = self.handler.get_activities_to_exchange(&peer, now, self.params.goal_target);
            for activity in to_send {
                if let Err(e) = self.link.schedule_send(&peer, activity) {
                    warn!(agent = %self.id, peer = %peer, error = %e, "failed to schedule gossip send");
                }
            }
        }
    }

    /// Removes activities (own and others') past the purge horizon (§4.6).
    pub fn purge(&mut self, now: f64) {
        self.handler.purge(now, self.params.goal_target);
    }

    /// Drives the link state machine against one peer's observed position. Exposed for the
    /// simulation's sequential merge stage, which owns cross-agent wiring this agent cannot see.
    pub fn link_step(&mut self, now: f64, dt: f64, peer: &AgentId, peer_pos: Vec3, peer_range_km: f64) -> Vec<LinkEvent> {
        let own_pos = self.motion.last_position().unwrap_or_else(|| self.motion.position_at(now));
        self.link.step(now, dt, self.params.time_unit_seconds, peer, own_pos, peer_pos, peer_range_km)
    }

    pub fn accept_connection(&mut self, peer: &AgentId) -> Option<LinkEvent> {
        self.link.accept_connection(peer)
    }

    pub fn receive_transfer(&mut self, peer: &AgentId, transfer: TransferRecord, now: f64) -> Result<(), LinkError> {
        self.link.receive(peer, transfer, now)
    }
}
