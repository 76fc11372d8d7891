//! Activity handler (§4.6): the per-agent knowledge base of owned and peer activities, gossip
//! priority ranking, and horizon-based purging.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::activity::{Activity, ActivityHandle, CellCoord, Interval, TrajectorySample};
use crate::error::HandlerError;
use crate::AgentId;

/// Fixed gossip priority weights (§4.6): `(age, time-since-update, start-proximity, reserved)`.
/// The fourth slot carries zero weight; it mirrors a fourth term present in the source's priority
/// formula that this implementation does not otherwise use (kept for parity with the documented
/// weight tuple rather than silently dropped).
const PRIORITY_WEIGHTS: (f64, f64, f64, f64) = (0.3, 0.4, 0.0, 0.3);

/// Per-agent knowledge base (§3, §4.6): an owned list kept sorted and non-overlapping by
/// start-time, and an others map keyed by peer then by peer's sequence-number.
pub struct ActivityHandler {
    owner: AgentId,
    next_seq: u64,
    owned: Vec<ActivityHandle>,
    current_idx: Option<usize>,
    others: HashMap<AgentId, HashMap<u64, ActivityHandle>>,
}

impl ActivityHandler {
    pub fn new(owner: AgentId) -> Self {
        ActivityHandler {
            owner,
            next_seq: 0,
            owned: Vec::new(),
            current_idx: None,
            others: HashMap::new(),
        }
    }

    pub fn owner(&self) -> &AgentId {
        &self.owner
    }

    pub fn owned(&self) -> &[ActivityHandle] {
        &self.owned
    }

    /// Assigns the next sequence-number, builds the activity, and inserts it in start-time order.
    /// Rejects an interval that overlaps an existing owned activity.
    #[allow(clippy::too_many_arguments)]
    pub fn create_owned(
        &mut self,
        start: f64,
        end: f64,
        trajectory: Vec<TrajectorySample>,
        active_cells: HashMap<CellCoord, smallvec::SmallVec<[Interval; 4]>>,
        confidence: f64,
        confirmed: bool,
        now: f64,
    ) -> Result<ActivityHandle, HandlerError> {
        let insert_at = self.owned.partition_point(|a| a.start() < start);
        if let Some(prev) = insert_at.checked_sub(1).and_then(|i| self.owned.get(i)) {
            if prev.end() > start {
                return Err(HandlerError::OverlappingOwned {
                    new_start: start,
                    new_end: end,
                    existing_start: prev.start(),
                    existing_end: prev.end(),
                });
            }
        }
        if let Some(next) = self.owned.get(insert_at) {
            if next.start() < end {
                return Err(HandlerError::OverlappingOwned {
                    new_start: start,
                    new_end: end,
                    existing_start: next.start(),
                    existing_end: next.end(),
                });
            }
        }

        if !(start < end) {
            return Err(HandlerError::OverlappingOwned {
                new_start: start,
                new_end: end,
                existing_start: start,
                existing_end: end,
            });
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let confidence = if confirmed { 1.0 } else { confidence.clamp(0.0, 1.0) };
        let activity = Arc::new(
            Activity::new(
                self.owner.clone(),
                seq,
                start,
                end,
                trajectory,
                active_cells,
                confidence,
                confirmed,
                false,
                now,
            )
            .expect("create_owned normalises confidence against the confirmed flag above"),
        );
        self.owned.insert(insert_at, activity.clone());
        if let Some(idx) = &mut self.current_idx {
            if insert_at <= *idx {
                *idx += 1;
            }
        }
        Ok(activity)
    }

    /// Marks an owned activity discarded in place (replacement, not removal — a discarded
    /// activity is still a resolved fact per §3). Used by the planner (§4.9 step 3) to retract
    /// previous-solution activities the GA scheduler cleared.
    pub fn discard_owned(&mut self, seq: u64, now: f64) -> Option<ActivityHandle> {
        let idx = self.owned.iter().position(|a| a.seq() == seq)?;
        let discarded = Arc::new(self.owned[idx].with_discarded(now));
        self.owned[idx] = discarded.clone();
        Some(discarded)
    }

    /// Accepts a peer activity iff it is new, or strictly newer than the existing copy.
    /// Returns `true` if the knowledge base changed.
    pub fn add_peer(&mut self, activity: ActivityHandle) -> bool {
        let bucket = self.others.entry(activity.owner().clone()).or_default();
        match bucket.get(&activity.seq()) {
            Some(existing) if existing.last_update() >= activity.last_update() => false,
            _ => {
                bucket.insert(activity.seq(), activity);
                true
            }
        }
    }

    pub fn peer_activity(&self, owner: &AgentId, seq: u64) -> Option<&ActivityHandle> {
        self.others.get(owner)?.get(&seq)
    }

    pub fn known_peer_count(&self) -> usize {
        self.others.values().map(|m| m.len()).sum()
    }

    /// Counts owned/peer activities by resolution state, for `knowledgebase.csv` (§6): `(own
    /// facts, own undecided, peer facts, peer undecided)`.
    pub fn knowledge_counts(&self) -> (usize, usize, usize, usize) {
        let (own_facts, own_undecided) = self
            .owned
            .iter()
            .fold((0, 0), |(f, u), a| if a.is_fact() { (f + 1, u) } else { (f, u + 1) });
        let (peer_facts, peer_undecided) = self.others.values().flat_map(|bucket| bucket.values()).fold(
            (0, 0),
            |(f, u), a| if a.is_fact() { (f + 1, u) } else { (f, u + 1) },
        );
        (own_facts, own_undecided, peer_facts, peer_undecided)
    }

    /// `O(1)` via the cached current-activity index.
    pub fn is_capturing(&self, now: f64) -> bool {
        self.current_idx
            .and_then(|i| self.owned.get(i))
            .map(|a| a.interval().contains(now))
            .unwrap_or(false)
    }

    pub fn current_activity(&self) -> Option<&ActivityHandle> {
        self.current_idx.and_then(|i| self.owned.get(i))
    }

    pub fn next_activity(&self, now: f64) -> Option<&ActivityHandle> {
        let idx = self.owned.partition_point(|a| a.start() <= now);
        self.owned.get(idx)
    }

    pub fn last_activity(&self) -> Option<&ActivityHandle> {
        self.owned.last()
    }

    /// Re-synchronises the current-activity index against `now` (falling back to a binary
    /// search when the cached index no longer matches) and confirms the activity being executed;
    /// if `now` is within `dt` of that activity's end, also confirms the immediately following
    /// one so its resources and instrument state are ready to take over next step.
    pub fn update(&mut self, now: f64, dt: f64) {
        let idx = match self.current_idx.filter(|&i| self.owned.get(i).map(|a| a.interval().contains(now)).unwrap_or(false)) {
            Some(i) => Some(i),
            None => {
                let candidate = self.owned.partition_point(|a| a.start() <= now).checked_sub(1);
                candidate.filter(|&i| self.owned[i].interval().contains(now))
            }
        };
        self.current_idx = idx;

        if let Some(i) = idx {
            let activity = &self.owned[i];
            if !activity.confirmed() {
                self.owned[i] = Arc::new(activity.with_confirmed(now));
            }
            let near_end = self.owned[i].end() - now <= dt;
            if near_end {
                if let Some(next) = self.owned.get(i + 1) {
                    if next.start() - self.owned[i].end() <= dt && !next.confirmed() {
                        self.owned[i + 1] = Arc::new(next.with_confirmed(now));
                    }
                }
            }
        }
    }

    /// Removes activities (own and others') whose end-time is older than `now - goal_target`.
    pub fn purge(&mut self, now: f64, goal_target: f64) {
        let horizon = now - goal_target;
        let before = self.owned.len();
        self.owned.retain(|a| a.end() >= horizon);
        let removed_from_front = before - self.owned.len();
        if removed_from_front > 0 {
            debug!(agent = %self.owner, removed_from_front, horizon, "purged owned activities past horizon");
        }
        self.current_idx = self.current_idx.and_then(|i| i.checked_sub(removed_from_front));

        for bucket in self.others.values_mut() {
            bucket.retain(|_, a| a.end() >= horizon);
        }
        self.others.retain(|_, bucket| !bucket.is_empty());
    }

    /// Dynamic gossip priority (§4.6): weighted sum of normalised age, time-since-update, and
    /// start-time proximity to `now`, each normalised against `goal_target`.
    pub fn priority(&self, activity: &Activity, now: f64, goal_target: f64) -> f64 {
        let horizon = goal_target.max(1e-9);
        let age_norm = (1.0 - (now - activity.created()) / horizon).clamp(0.0, 1.0);
        let update_norm = (1.0 - (now - activity.last_update()) / horizon).clamp(0.0, 1.0);
        let start_proximity = (1.0 - (activity.start() - now).abs() / horizon).clamp(0.0, 1.0);
        let (w_age, w_update, w_reserved, w_start) = PRIORITY_WEIGHTS;
        w_age * age_norm + w_update * update_norm + w_reserved * 0.0 + w_start * start_proximity
    }

    /// Up to 20 activities to send to `peer_id`, ranked by descending priority, excluding
    /// activities owned by `peer_id` itself and anything older than the purge horizon.
    pub fn get_activities_to_exchange(&self, peer_id: &AgentId, now: f64, goal_target: f64) -> Vec<ActivityHandle> {
        let horizon = now - goal_target;
        let mut candidates: Vec<(f64, ActivityHandle)> = self
            .owned
            .iter()
            .filter(|a| a.end() >= horizon)
            .map(|a| (self.priority(a, now, goal_target), a.clone()))
            .collect();

        for bucket in self.others.values() {
            for a in bucket.values() {
                if a.owner() != peer_id && a.end() >= horizon {
                    candidates.push((self.priority(a, now, goal_target), a.clone()));
                }
            }
        }

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
        candidates.truncate(20);
        candidates.into_iter().map(|(_, a)| a).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn handler() -> ActivityHandler {
        ActivityHandler::new("sat-1".to_string())
    }

    #[test]
    fn owned_stays_sorted_and_non_overlapping() {
        let mut h = handler();
        h.create_owned(10.0, 20.0, vec![], StdHashMap::new(), 0.5, false, 0.0).unwrap();
        h.create_owned(0.0, 5.0, vec![], StdHashMap::new(), 0.5, false, 0.0).unwrap();
        let starts: Vec<f64> = h.owned().iter().map(|a| a.start()).collect();
        assert_eq!(starts, vec![0.0, 10.0]);
    }

    #[test]
    fn overlapping_owned_rejected() {
        let mut h = handler();
        h.create_owned(0.0, 10.0, vec![], StdHashMap::new(), 0.5, false, 0.0).unwrap();
        let result = h.create_owned(5.0, 15.0, vec![], StdHashMap::new(), 0.5, false, 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn peer_monotonicity() {
        let mut h = handler();
        let a1 = Arc::new(
            Activity::new("peer-1".to_string(), 1, 0.0, 1.0, vec![], StdHashMap::new(), 0.5, false, false, 5.0)
                .unwrap(),
        );
        assert!(h.add_peer(a1.clone()));
        let stale = Arc::new(
            Activity::new("peer-1".to_string(), 1, 0.0, 1.0, vec![], StdHashMap::new(), 0.3, false, false, 2.0)
                .unwrap(),
        );
        assert!(!h.add_peer(stale));
        assert_eq!(h.peer_activity(&"peer-1".to_string(), 1).unwrap().last_update(), 5.0);
        let newer = Arc::new(
            Activity::new("peer-1".to_string(), 1, 0.0, 1.0, vec![], StdHashMap::new(), 0.9, false, false, 9.0)
                .unwrap(),
        );
        assert!(h.add_peer(newer));
        assert_eq!(h.peer_activity(&"peer-1".to_string(), 1).unwrap().last_update(), 9.0);
    }

    #[test]
    fn purge_removes_before_horizon() {
        let mut h = handler();
        h.create_owned(0.0, 1.0, vec![], StdHashMap::new(), 0.5, false, 0.0).unwrap();
        h.purge(100.0, 10.0);
        assert!(h.owned().is_empty());
    }

    #[test]
    fn exchange_excludes_peer_owned() {
        let mut h = handler();
        h.create_owned(0.0, 1.0, vec![], StdHashMap::new(), 0.5, false, 0.0).unwrap();
        let peer_owned = Arc::new(
            Activity::new("peer-1".to_string(), 1, 2.0, 3.0, vec![], StdHashMap::new(), 0.5, false, false, 0.0)
                .unwrap(),
        );
        h.add_peer(peer_owned);
        let out = h.get_activities_to_exchange(&"peer-1".to_string(), 5.0, 100.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].owner(), "sat-1");
    }

    #[test]
    fn knowledge_counts_splits_facts_from_undecided() {
        let mut h = handler();
        h.create_owned(0.0, 1.0, vec![], StdHashMap::new(), 0.4, false, 0.0).unwrap();
        h.create_owned(2.0, 3.0, vec![], StdHashMap::new(), 1.0, true, 0.0).unwrap();
        let peer_fact = Arc::new(
            Activity::new("peer-1".to_string(), 1, 0.0, 1.0, vec![], StdHashMap::new(), 1.0, true, false, 0.0)
                .unwrap(),
        );
        h.add_peer(peer_fact);
        assert_eq!(h.knowledge_counts(), (1, 1, 1, 0));
    }
}
