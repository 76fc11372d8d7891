//! Per-agent environment model (§4.5): a 2D grid of [`cell::EnvCell`]s over a shared, precomputed
//! world geo lookup table.

pub mod cell;

use std::collections::HashMap;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::instrument;

use crate::activity::{ActivityHandle, CellCoord, Interval};
use crate::error::SystemError;
use crate::geo::{self, LatLon};
use crate::payoff::PayoffAggregation;
use crate::AgentId;

use cell::{CleanFunction, EnvCell};

/// Fixed, world-frame lookup table mapping every grid cell to its ECEF/lat-lon position. Built
/// once and shared (via `Arc`) across every agent's [`EnvironmentModel`] unless `-shm0` (§6)
/// requests a per-agent replica.
pub struct GeoLut {
    width: i32,
    height: i32,
    ratio_w: f64,
    ratio_h: f64,
    positions: HashMap<CellCoord, LatLon>,
}

impl GeoLut {
    pub fn build(width: i32, height: i32, ratio_w: f64, ratio_h: f64) -> Self {
        let mut positions = HashMap::with_capacity((width * height) as usize);
        let world_w = width as f64 * ratio_w;
        let world_h = height as f64 * ratio_h;
        for y in 0..height {
            for x in 0..width {
                let px = (x as f64 + 0.5) * ratio_w;
                let py = (y as f64 + 0.5) * ratio_h;
                let lon = px / world_w * 360.0 - 180.0;
                let lat = 90.0 - py / world_h * 180.0;
                positions.insert((x, y), LatLon::new(lat, lon));
            }
        }
        GeoLut {
            width,
            height,
            ratio_w,
            ratio_h,
            positions,
        }
    }

    pub fn bounds(&self) -> (i32, i32) {
        (self.width, self.height)
    }

    pub fn world_dims(&self) -> (f64, f64) {
        (self.width as f64 * self.ratio_w, self.height as f64 * self.ratio_h)
    }

    pub fn latlon(&self, coord: CellCoord) -> Option<LatLon> {
        self.positions.get(&coord).copied()
    }

    /// Nearest grid cell to a lat/lon, via equirectangular projection.
    pub fn coord_for(&self, ll: LatLon) -> CellCoord {
        let (world_w, world_h) = self.world_dims();
        let (px, py) = geo::equirectangular(ll, world_w, world_h);
        let x = ((px / self.ratio_w) as i32).clamp(0, self.width - 1);
        let y = ((py / self.ratio_h) as i32).clamp(0, self.height - 1);
        (x, y)
    }
}

/// A single planner-ready output of [`EnvironmentModel::generate_activities`]: a candidate
/// sub-task interval, the cells it would touch and what each is worth, and the aggregated payoff
/// for the whole interval.
#[derive(Debug, Clone)]
pub struct GeneratedCandidate {
    pub interval: Interval,
    pub cells: Vec<(CellCoord, f64)>,
    pub payoff: f64,
}

/// Tunables consumed by [`EnvironmentModel::generate_activities`] (`agent.*` config, §6).
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub dt: f64,
    pub min_payoff: f64,
    pub max_task_duration: f64,
    pub max_tasks: usize,
    pub aggregation: PayoffAggregation,
}

/// A per-agent 2D tessellation of the Earth (§3, §4.5).
pub struct EnvironmentModel {
    owner: AgentId,
    lut: Arc<GeoLut>,
    cells: HashMap<CellCoord, EnvCell>,
}

impl EnvironmentModel {
    pub fn new(
        owner: AgentId,
        lut: Arc<GeoLut>,
        payoff_fn: Arc<dyn crate::payoff::PayoffFunction>,
        clean_fn: Arc<dyn CleanFunction>,
    ) -> Self {
        let (w, h) = lut.bounds();
        let mut cells = HashMap::with_capacity((w * h) as usize);
        for y in 0..h {
            for x in 0..w {
                cells.insert((x, y), EnvCell::new((x, y), payoff_fn.clone(), clean_fn.clone()));
            }
        }
        EnvironmentModel { owner, lut, cells }
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn lut(&self) -> &Arc<GeoLut> {
        &self.lut
    }

    pub fn add_activity(&mut self, activity: ActivityHandle) {
        for (coord, intervals) in activity.active_cells() {
            if let Some(cell) = self.cells.get_mut(coord) {
                cell.add_activity(activity.clone(), intervals.clone());
            }
        }
    }

    pub fn remove_activity(&mut self, owner: &AgentId, seq: u64, touched: &[CellCoord]) {
        for coord in touched {
            if let Some(cell) = self.cells.get_mut(coord) {
                cell.remove_activity(owner, seq);
            }
        }
    }

    pub fn update_activity(&mut self, activity: ActivityHandle) {
        for (coord, intervals) in activity.active_cells() {
            if let Some(cell) = self.cells.get_mut(coord) {
                cell.update_activity(activity.clone(), intervals.clone());
            }
        }
    }

    /// Lets every cell run its clean function; returns the union of discarded `(owner, seq)`
    /// pairs so the caller can retract them from the activity handler too.
    pub fn clean_activities(&mut self, now: f64) -> Vec<(AgentId, u64)> {
        let mut removed = Vec::new();
        for cell in self.cells.values_mut() {
            removed.extend(cell.clean(now));
        }
        removed
    }

    /// For every active cell of `candidate`, for every interval in its cell-interval timeline,
    /// invokes the cell's payoff function and stores the result, keyed by that interval's start.
    #[instrument(skip(self, candidate), fields(agent = %self.owner))]
    pub fn compute_payoff(&mut self, candidate: &crate::activity::Activity) -> Result<(), SystemError> {
        for (coord, intervals) in candidate.active_cells() {
            let cell = self.cells.get_mut(coord).ok_or_else(|| {
                SystemError::IndexOutOfBounds(format!("cell {coord:?} not present in environment model"))
            })?;
            for interval in intervals {
                cell.compute_payoff_at(interval.t0, *interval);
            }
        }
        Ok(())
    }

    /// Walks `candidate`'s Δt timeline, finds contiguous runs where the aggregated per-step
    /// payoff across that step's active cells clears `params.min_payoff`, cuts them into
    /// sub-tasks no longer than `params.max_task_duration`, and returns at most
    /// `params.max_tasks`, highest-payoff first.
    pub fn generate_activities(&self, candidate: &crate::activity::Activity, params: &GenerationParams) -> Vec<GeneratedCandidate> {
        let start = candidate.start();
        let end = candidate.end();
        let dt = params.dt.max(1e-9);
        let steps = ((end - start) / dt).ceil().max(1.0) as usize;

        let mut per_step_cells: Vec<Vec<(CellCoord, f64)>> = Vec::with_capacity(steps);
        for i in 0..steps {
            let t = start + i as f64 * dt;
            let mut active = Vec::new();
            for (coord, intervals) in candidate.active_cells() {
                if intervals.iter().any(|iv| iv.contains(t)) {
                    if let Some(cell) = self.cells.get(coord) {
                        if let Some((payoff, _)) = cell.payoff_at(t) {
                            active.push((*coord, payoff));
                        }
                    }
                }
            }
            per_step_cells.push(active);
        }

        let min_of = |cells: &[(CellCoord, f64)]| -> Option<f64> {
            cells.iter().map(|(_, p)| *p).fold(None, |acc, p| Some(acc.map_or(p, |a: f64| a.min(p))))
        };

        let mut runs: Vec<(usize, usize)> = Vec::new();
        let mut run_start: Option<usize> = None;
        for i in 0..steps {
            let eligible = min_of(&per_step_cells[i]).map(|m| m >= params.min_payoff).unwrap_or(false);
            match (eligible, run_start) {
                (true, None) => run_start = Some(i),
                (false, Some(s)) => {
                    runs.push((s, i));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = run_start {
            runs.push((s, steps));
        }

        let max_steps_per_task = (params.max_task_duration / dt).floor().max(1.0) as usize;
        let mut candidates: Vec<GeneratedCandidate> = Vec::new();
        for (s, e) in runs {
            let mut i = s;
            while i < e {
                let j = (i + max_steps_per_task).min(e);
                let mut cell_payoffs: HashMap<CellCoord, Vec<f64>> = HashMap::new();
                for step in per_step_cells.iter().take(j).skip(i) {
                    for (coord, payoff) in step {
                        cell_payoffs.entry(*coord).or_default().push(*payoff);
                    }
                }
                let cells: Vec<(CellCoord, f64)> = cell_payoffs
                    .into_iter()
                    .map(|(coord, vals)| (coord, vals.iter().sum::<f64>() / vals.len() as f64))
                    .collect();
                let values: Vec<f64> = cells.iter().map(|(_, p)| *p).collect();
                let payoff = params.aggregation.aggregate(&values);
                candidates.push(GeneratedCandidate {
                    interval: Interval::new(start + i as f64 * dt, start + j as f64 * dt),
                    cells,
                    payoff,
                });
                i = j;
            }
        }

        candidates.sort_by(|a, b| b.payoff.partial_cmp(&a.payoff).unwrap());
        candidates.truncate(params.max_tasks);
        candidates
    }

    /// Active cells visible for a motion segment, via the instrument's 4-quadrant scan.
    pub fn visible_cells(
        &self,
        sub0: LatLon,
        sub1: LatLon,
        arc_km: f64,
        interpos: usize,
    ) -> std::collections::HashSet<CellCoord> {
        let start = self.lut.coord_for(sub0);
        crate::instrument::visible_cells_for_segment(
            start,
            sub0,
            sub1,
            arc_km,
            self.lut.bounds(),
            interpos,
            |c| self.lut.latlon(c),
        )
    }
}
