//! Resource ledger (§4.2): per-agent tracked quantities (battery charge, onboard storage, ...)
//! that either deplete from a full capacity or accumulate from empty, driven by named
//! consumption/production rates plus one-shot pulses.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::error::ResourceError;

/// Whether a resource starts full and drains (a battery), or starts empty and fills up towards a
/// cap (onboard storage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Depletable,
    Cumulative,
}

/// Identifies the activity-scoped rate registration that produced a given contribution to the
/// ledger, so it can be looked up and removed independently of any other rate on the same
/// resource. Mirrors the `"agentId:activityId"` composite keys used by the source ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateKey {
    pub owner: String,
    pub activity_id: u64,
}

impl RateKey {
    pub fn new(owner: impl Into<String>, activity_id: u64) -> Self {
        RateKey {
            owner: owner.into(),
            activity_id,
        }
    }
}

/// A single tracked quantity with a bounded capacity, a reserved safety margin, a set of active
/// per-activity rates, and a queue of one-shot pulses applied on the next [`Resource::step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    kind: ResourceKind,
    name: String,
    max_capacity: f64,
    capacity: f64,
    reserved_margin: f64,
    rates: HashMap<RateKey, f64>,
    #[serde(skip)]
    pending_pulses: Vec<f64>,
}

impl Resource {
    /// Depletable resources start full; cumulative resources start empty.
    pub fn new(kind: ResourceKind, name: impl Into<String>, max_capacity: f64, reserved_margin: f64) -> Self {
        let capacity = match kind {
            ResourceKind::Depletable => max_capacity,
            ResourceKind::Cumulative => 0.0,
        };
        Resource {
            kind,
            name: name.into(),
            max_capacity,
            capacity,
            reserved_margin,
            rates: HashMap::new(),
            pending_pulses: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn max_capacity(&self) -> f64 {
        self.max_capacity
    }

    /// Headroom before the reserved margin is touched: for a depletable resource, how much more
    /// can still be drained; for a cumulative resource, how much more can still be filled.
    pub fn available_margin(&self) -> f64 {
        match self.kind {
            ResourceKind::Depletable => (self.capacity - self.reserved_margin).max(0.0),
            ResourceKind::Cumulative => (self.max_capacity - self.reserved_margin - self.capacity).max(0.0),
        }
    }

    /// Registers an ongoing rate of consumption (depletable, positive) or production
    /// (cumulative, positive) attributed to `key`. Rejects negative rates; use
    /// [`Resource::remove_rate`] to retract a contribution instead of negating it.
    pub fn add_rate(&mut self, key: RateKey, rate: f64) -> Result<(), ResourceError> {
        if rate < 0.0 {
            return Err(ResourceError::NegativeRate(rate, self.name.clone()));
        }
        self.rates.insert(key, rate);
        Ok(())
    }

    pub fn remove_rate(&mut self, key: &RateKey) -> Result<(), ResourceError> {
        self.rates
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ResourceError::RateNotFound(key.owner.clone(), self.name.clone()))
    }

    fn signed_delta(&self, magnitude: f64) -> f64 {
        match self.kind {
            ResourceKind::Depletable => -magnitude,
            ResourceKind::Cumulative => magnitude,
        }
    }

    /// Checks whether `amount` could be applied right now without breaching the reserved margin,
    /// without mutating the ledger. Used by the scheduler to test chromosome feasibility.
    pub fn try_apply_once(&self, amount: f64) -> Result<(), ResourceError> {
        if amount > self.available_margin() {
            return Err(ResourceError::MarginExceeded {
                name: self.name.clone(),
                capacity: self.capacity,
                reserved: self.reserved_margin,
                requested: amount,
            });
        }
        Ok(())
    }

    /// Queues an instantaneous delta, applied on the next [`Resource::step`] alongside the
    /// rate-based flow rather than multiplied by `dt` (§4.2 "apply_once(c) — add a one-step
    /// pulse").
    pub fn apply_once(&mut self, amount: f64) {
        self.pending_pulses.push(amount);
    }

    /// Applies a one-shot `amount` immediately, outside the rate/step bookkeeping and without
    /// queuing a pulse. This is `apply_for`'s predictive-debit primitive, not itself a named §4.2
    /// operation — the public queue/check surface is [`Resource::apply_once`]/
    /// [`Resource::try_apply_once`]. On a margin breach `capacity` is clamped to the reserved-
    /// margin boundary rather than left untouched (§4.2 `apply_for`).
    #[instrument(skip(self), fields(resource = %self.name))]
    fn apply_immediate(&mut self, amount: f64) -> Result<(), ResourceError> {
        if let Err(err) = self.try_apply_once(amount) {
            self.capacity = match self.kind {
                ResourceKind::Depletable => self.reserved_margin,
                ResourceKind::Cumulative => self.max_capacity - self.reserved_margin,
            };
            return Err(err);
        }
        self.capacity += self.signed_delta(amount);
        Ok(())
    }

    /// Predictively debits `rate * duration` immediately, as a single lump amount, without
    /// registering an ongoing rate. Returns an error without applying the debit if the reserved
    /// margin would be crossed, clamping `capacity` to the margin boundary instead (§4.2).
    pub fn apply_for(&mut self, rate: f64, duration: f64) -> Result<(), ResourceError> {
        if rate < 0.0 {
            return Err(ResourceError::NegativeRate(rate, self.name.clone()));
        }
        self.apply_immediate(rate * duration)
    }

    /// Advances the ledger by `dt`: sums all registered rates times `dt`, adds any pending
    /// pulses, and applies the total. Errors (and clamps to the limit) if the combined flow would
    /// overrun the resource's hard maximum/zero bound; pending pulses are drained regardless.
    #[instrument(skip(self), fields(resource = %self.name, dt))]
    pub fn step(&mut self, dt: f64) -> Result<(), ResourceError> {
        let rate_total: f64 = self.rates.values().sum::<f64>() * dt;
        let pulse_total: f64 = self.pending_pulses.drain(..).sum();
        let total = rate_total + pulse_total;
        let delta = self.signed_delta(total);
        let next = self.capacity + delta;

        match self.kind {
            ResourceKind::Depletable => {
                if next < 0.0 {
                    self.capacity = 0.0;
                    return Err(ResourceError::Overrun {
                        name: self.name.clone(),
                        consumed: total,
                        max: self.max_capacity,
                    });
                }
            }
            ResourceKind::Cumulative => {
                if next > self.max_capacity {
                    self.capacity = self.max_capacity;
                    return Err(ResourceError::Overrun {
                        name: self.name.clone(),
                        consumed: total,
                        max: self.max_capacity,
                    });
                }
            }
        }
        self.capacity = next;
        Ok(())
    }
}

/// Named collection of an agent's resources (e.g. `"battery"`, `"storage"`), looked up by name
/// from configuration and fitness evaluation alike.
pub type ResourceLedger = HashMap<String, Resource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depletable_drains_with_rate() {
        let mut r = Resource::new(ResourceKind::Depletable, "battery", 100.0, 5.0);
        r.add_rate(RateKey::new("sat-1", 1), 2.0).unwrap();
        r.step(10.0).unwrap();
        assert_eq!(r.capacity(), 80.0);
    }

    #[test]
    fn cumulative_fills_with_rate() {
        let mut r = Resource::new(ResourceKind::Cumulative, "storage", 50.0, 0.0);
        r.add_rate(RateKey::new("sat-1", 1), 1.0).unwrap();
        r.step(10.0).unwrap();
        assert_eq!(r.capacity(), 10.0);
    }

    #[test]
    fn depletable_overrun_clamps_and_errors() {
        let mut r = Resource::new(ResourceKind::Depletable, "battery", 10.0, 0.0);
        r.add_rate(RateKey::new("sat-1", 1), 5.0).unwrap();
        let err = r.step(10.0).unwrap_err();
        assert!(matches!(err, ResourceError::Overrun { .. }));
        assert_eq!(r.capacity(), 0.0);
    }

    #[test]
    fn margin_rejects_apply_for_and_clamps_to_reserve() {
        let mut r = Resource::new(ResourceKind::Depletable, "battery", 100.0, 20.0);
        assert!(r.try_apply_once(85.0).is_err());
        assert!(r.apply_for(85.0, 1.0).is_err());
        assert_eq!(r.capacity(), 20.0);
    }

    #[test]
    fn margin_rejects_apply_for_and_clamps_cumulative_to_reserve() {
        let mut r = Resource::new(ResourceKind::Cumulative, "storage", 100.0, 20.0);
        assert!(r.apply_for(85.0, 1.0).is_err());
        assert_eq!(r.capacity(), 80.0);
    }

    #[test]
    fn apply_once_queues_a_pulse_applied_on_next_step_not_scaled_by_dt() {
        let mut r = Resource::new(ResourceKind::Depletable, "battery", 100.0, 0.0);
        r.apply_once(15.0);
        r.step(1000.0).unwrap();
        assert_eq!(r.capacity(), 85.0);
    }

    #[test]
    fn remove_rate_stops_future_flow() {
        let mut r = Resource::new(ResourceKind::Depletable, "battery", 100.0, 0.0);
        let key = RateKey::new("sat-1", 1);
        r.add_rate(key.clone(), 3.0).unwrap();
        r.step(1.0).unwrap();
        r.remove_rate(&key).unwrap();
        r.step(1.0).unwrap();
        assert_eq!(r.capacity(), 97.0);
    }
}
