//! A single environment-model grid cell (§3): the activities currently touching it, the most
//! recent payoff pass over it, and the pluggable payoff/clean functions it uses.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use crate::activity::{ActivityHandle, CellCoord, Interval};
use crate::payoff::{PayoffFunction, TouchingActivity};
use crate::AgentId;

/// Decides which activities a cell may permanently discard, independent of the purge-by-horizon
/// path in the activity handler (§4.6). The source installs one per cell but, per the §9 Design
/// Notes decision, the default never removes anything.
pub trait CleanFunction: Send + Sync {
    fn clean(&self, touching: &HashMap<(AgentId, u64), TouchingActivity>, now: f64) -> Vec<(AgentId, u64)>;
}

/// The default clean function: never removes anything. Purge-by-horizon (§4.6) is the sole
/// removal path in this implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpClean;

impl CleanFunction for NoOpClean {
    fn clean(&self, _touching: &HashMap<(AgentId, u64), TouchingActivity>, _now: f64) -> Vec<(AgentId, u64)> {
        Vec::new()
    }
}

/// One per-agent tessellation unit. Created once at agent construction and never destroyed.
pub struct EnvCell {
    coord: CellCoord,
    touching: HashMap<(AgentId, u64), TouchingActivity>,
    /// query-time -> (payoff, utility-average), from the most recent payoff pass.
    history: BTreeMap<OrderedFloat<f64>, (f64, f64)>,
    payoff_fn: Arc<dyn PayoffFunction>,
    clean_fn: Arc<dyn CleanFunction>,
}

impl EnvCell {
    pub fn new(coord: CellCoord, payoff_fn: Arc<dyn PayoffFunction>, clean_fn: Arc<dyn CleanFunction>) -> Self {
        EnvCell {
            coord,
            touching: HashMap::new(),
            history: BTreeMap::new(),
            payoff_fn,
            clean_fn,
        }
    }

    pub fn coord(&self) -> CellCoord {
        self.coord
    }

    pub fn add_activity(&mut self, activity: ActivityHandle, intervals: SmallVec<[Interval; 4]>) {
        self.touching.insert(activity.id(), TouchingActivity { activity, intervals });
    }

    pub fn remove_activity(&mut self, owner: &AgentId, seq: u64) {
        self.touching.remove(&(owner.clone(), seq));
    }

    /// Replaces the touching entry wholesale: activities are immutable, so "updating" one here
    /// is indexing the newer handle in place of the old.
    pub fn update_activity(&mut self, activity: ActivityHandle, intervals: SmallVec<[Interval; 4]>) {
        self.add_activity(activity, intervals);
    }

    pub fn touching(&self) -> impl Iterator<Item = &TouchingActivity> {
        self.touching.values()
    }

    /// Invokes the cell's payoff function for `candidate` at query time `t`, stores the result,
    /// and returns it.
    pub fn compute_payoff_at(&mut self, t: f64, candidate: Interval) -> (f64, f64) {
        let touching: Vec<TouchingActivity> = self.touching.values().cloned().collect();
        let result = self.payoff_fn.compute(candidate, &touching);
        self.history.insert(OrderedFloat(t), result);
        result
    }

    pub fn payoff_at(&self, t: f64) -> Option<(f64, f64)> {
        self.history.get(&OrderedFloat(t)).copied()
    }

    /// Lets the cell's clean function identify activities it deems permanently irrelevant, and
    /// removes them from this cell's touching set.
    pub fn clean(&mut self, now: f64) -> Vec<(AgentId, u64)> {
        let stale = self.clean_fn.clean(&self.touching, now);
        for (owner, seq) in &stale {
            self.touching.remove(&(owner.clone(), *seq));
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use crate::payoff::{PayoffParams, RevisitTimeBackwards};
    use std::collections::HashMap as StdHashMap;

    #[test]
    fn payoff_history_keyed_by_query_time() {
        let pf = Arc::new(RevisitTimeBackwards { params: PayoffParams::default() });
        let clean = Arc::new(NoOpClean);
        let mut cell = EnvCell::new((0, 0), pf, clean);
        let (p, u) = cell.compute_payoff_at(5.0, Interval::new(5.0, 6.0));
        assert_eq!(cell.payoff_at(5.0), Some((p, u)));
        assert_eq!(cell.payoff_at(999.0), None);
    }

    #[test]
    fn noop_clean_removes_nothing() {
        let touching: StdHashMap<(AgentId, u64), TouchingActivity> = StdHashMap::new();
        let removed = NoOpClean.clean(&touching, 0.0);
        assert!(removed.is_empty());
        let _ = Activity::new;
    }
}
