//! Activity data model (§3, §4.9 step 3 consumer): an immutable spatio-temporal observation
//! record, identified by (owner, sequence-number), propagated by value through gossip and handed
//! out to cells and the knowledge base as shared [`ActivityHandle`]s.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::SystemError;
use crate::geo::Vec3;
use crate::AgentId;

/// Integer grid coordinates of one environment cell.
pub type CellCoord = (i32, i32);

/// A shared, reference-counted handle to an immutable [`Activity`]. "Mutation" of an activity is
/// always replacement of the table entry that owns it (§9 Design Notes); cells and the handler
/// hold clones of this handle rather than a back-pointer into a shared arena.
pub type ActivityHandle = Arc<Activity>;

/// A half-open time interval `[t0, t1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub t0: f64,
    pub t1: f64,
}

impl Interval {
    pub fn new(t0: f64, t1: f64) -> Self {
        Interval { t0, t1 }
    }

    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.t0 && t < self.t1
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.t0 < other.t1 && other.t0 < self.t1
    }
}

/// One sampled point of an activity's trajectory: virtual time plus 3D position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub t: f64,
    pub position: Vec3,
}

/// An immutable spatio-temporal observation record, identified by `(owner, seq)`.
///
/// Invariants enforced at construction: `start < end`; per-cell interval lists are internally
/// non-overlapping; `confirmed` implies `confidence == 1.0` and `!discarded`; `discarded` implies
/// `confidence == 0.0` and `!confirmed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    owner: AgentId,
    seq: u64,
    start: f64,
    end: f64,
    trajectory: Vec<TrajectorySample>,
    active_cells: HashMap<CellCoord, SmallVec<[Interval; 4]>>,
    confidence: f64,
    confirmed: bool,
    discarded: bool,
    last_update: f64,
    created: f64,
}

impl Activity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: AgentId,
        seq: u64,
        start: f64,
        end: f64,
        trajectory: Vec<TrajectorySample>,
        active_cells: HashMap<CellCoord, SmallVec<[Interval; 4]>>,
        confidence: f64,
        confirmed: bool,
        discarded: bool,
        created: f64,
    ) -> Result<Self, SystemError> {
        if !(start < end) {
            return Err(SystemError::InvariantViolation(format!(
                "activity ({owner}, {seq}): start {start} is not before end {end}"
            )));
        }
        for (cell, intervals) in &active_cells {
            let mut sorted: Vec<Interval> = intervals.to_vec();
            sorted.sort_by(|a, b| a.t0.partial_cmp(&b.t0).unwrap());
            for w in sorted.windows(2) {
                if w[0].overlaps(&w[1]) {
                    return Err(SystemError::InvariantViolation(format!(
                        "activity ({owner}, {seq}): overlapping intervals at cell {cell:?}"
                    )));
                }
            }
        }
        if confirmed && (confidence != 1.0 || discarded) {
            return Err(SystemError::InvariantViolation(format!(
                "activity ({owner}, {seq}): confirmed requires confidence=1.0 and !discarded"
            )));
        }
        if discarded && (confidence != 0.0 || confirmed) {
            return Err(SystemError::InvariantViolation(format!(
                "activity ({owner}, {seq}): discarded requires confidence=0.0 and !confirmed"
            )));
        }
        Ok(Activity {
            owner,
            seq,
            start,
            end,
            trajectory,
            active_cells,
            confidence,
            confirmed,
            discarded,
            last_update: created,
            created,
        })
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn id(&self) -> (AgentId, u64) {
        (self.owner.clone(), self.seq)
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }

    pub fn trajectory(&self) -> &[TrajectorySample] {
        &self.trajectory
    }

    pub fn active_cells(&self) -> &HashMap<CellCoord, SmallVec<[Interval; 4]>> {
        &self.active_cells
    }

    pub fn touches_cell(&self, cell: CellCoord) -> bool {
        self.active_cells.contains_key(&cell)
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn discarded(&self) -> bool {
        self.discarded
    }

    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    pub fn created(&self) -> f64 {
        self.created
    }

    /// A fact is a resolved activity: confirmed XOR discarded.
    pub fn is_fact(&self) -> bool {
        self.confirmed ^ self.discarded
    }

    pub fn overlaps(&self, other: &Activity) -> bool {
        self.interval().overlaps(&other.interval())
    }

    /// Returns a replacement with `confirmed = true`, bumping `last_update` to `t`.
    pub fn with_confirmed(&self, t: f64) -> Activity {
        Activity {
            confidence: 1.0,
            confirmed: true,
            discarded: false,
            last_update: t,
            ..self.clone()
        }
    }

    /// Returns a replacement with `discarded = true`, bumping `last_update` to `t`.
    pub fn with_discarded(&self, t: f64) -> Activity {
        Activity {
            confidence: 0.0,
            confirmed: false,
            discarded: true,
            last_update: t,
            ..self.clone()
        }
    }

    /// Returns a replacement with `confidence` updated and `last_update` bumped to `t`. Rejected
    /// (clamped to `[0,1]`) rather than erroring: confidence updates come from internal payoff
    /// recomputation, never from untrusted input.
    pub fn with_confidence(&self, confidence: f64, t: f64) -> Activity {
        Activity {
            confidence: confidence.clamp(0.0, 1.0),
            last_update: t,
            ..self.clone()
        }
    }
}
