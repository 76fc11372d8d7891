//! Payoff functions (§4.4): revisit-time normalisation models and the backward-revisit-time cell
//! scoring algorithm used by the environment model.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::activity::{ActivityHandle, Interval};

/// One of the four configured revisit-time normalisation curves (`environment.payoff.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoffModelType {
    Sigmoid,
    Linear,
    ConstantSlope,
    Quadratic,
}

/// Parameters for the configured revisit-time normalisation curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PayoffParams {
    #[serde(rename = "type")]
    pub model: PayoffModelType,
    pub goal_min: f64,
    pub goal_max: f64,
    /// Sigmoid steepness; unused by the other models.
    pub steepness: f64,
    /// Sigmoid midpoint (`payoff_mid`); unused by the other models.
    pub payoff_mid: f64,
    /// Constant-slope ramp rate; unused by the other models.
    pub slope: f64,
}

impl Default for PayoffParams {
    fn default() -> Self {
        PayoffParams {
            model: PayoffModelType::Linear,
            goal_min: 0.0,
            goal_max: 1.0,
            steepness: 1.0,
            payoff_mid: 0.5,
            slope: 1.0,
        }
    }
}

/// Maps a revisit-time gap to a normalised payoff in `[0,1]`, non-decreasing in the gap.
///
/// A negative `gap` is the "no prior fact" sentinel (§9 Design Notes decision) and always yields
/// the maximum payoff, regardless of model.
pub fn revisit_time_norm(params: &PayoffParams, gap: f64) -> f64 {
    if gap < 0.0 {
        return 1.0;
    }
    let span = (params.goal_max - params.goal_min).max(1e-12);
    match params.model {
        PayoffModelType::Linear => ((gap - params.goal_min) / span).clamp(0.0, 1.0),
        PayoffModelType::Quadratic => (((gap - params.goal_min) / span).clamp(0.0, 1.0)).powi(2),
        PayoffModelType::ConstantSlope => (params.slope * (gap - params.goal_min)).clamp(0.0, 1.0),
        PayoffModelType::Sigmoid => {
            let sigmoid = |t: f64| 1.0 / (1.0 + (-params.steepness * (t - params.payoff_mid)).exp());
            let lo = sigmoid(params.goal_min);
            let hi = sigmoid(params.goal_max);
            let raw = sigmoid(gap);
            if (hi - lo).abs() < 1e-12 {
                raw
            } else {
                ((raw - lo) / (hi - lo)).clamp(0.0, 1.0)
            }
        }
    }
}

/// An existing activity's footprint over one cell, aligned with its owning [`ActivityHandle`].
#[derive(Debug, Clone)]
pub struct TouchingActivity {
    pub activity: ActivityHandle,
    pub intervals: SmallVec<[Interval; 4]>,
}

impl TouchingActivity {
    fn overlaps(&self, candidate: Interval) -> bool {
        self.intervals.iter().any(|iv| iv.overlaps(&candidate))
    }

    fn latest_end_before(&self, t: f64) -> Option<f64> {
        self.intervals.iter().map(|iv| iv.t1).filter(|&e| e <= t).fold(None, |acc, e| {
            Some(acc.map_or(e, |a: f64| a.max(e)))
        })
    }
}

/// A payoff function: invoked per cell with the candidate interval and the activities that touch
/// that cell, returns `(payoff, utility_average)`.
pub trait PayoffFunction: Send + Sync {
    fn compute(&self, candidate: Interval, touching: &[TouchingActivity]) -> (f64, f64);
}

/// The primary payoff function (§4.4): blends the best confirmed backward fact with the
/// confidence-weighted influence of undecided candidates nearer to the candidate interval.
#[derive(Debug, Clone)]
pub struct RevisitTimeBackwards {
    pub params: PayoffParams,
}

impl PayoffFunction for RevisitTimeBackwards {
    fn compute(&self, candidate: Interval, touching: &[TouchingActivity]) -> (f64, f64) {
        if touching.iter().any(|t| t.overlaps(candidate)) {
            return (0.0, 0.0);
        }

        let mut best_fact_end: Option<f64> = None;
        for t in touching {
            if !t.activity.is_fact() {
                continue;
            }
            if let Some(end) = t.latest_end_before(candidate.t0) {
                best_fact_end = Some(best_fact_end.map_or(end, |b: f64| b.max(end)));
            }
        }

        let gap = best_fact_end.map(|end| candidate.t0 - end).unwrap_or(-1.0);
        let mut payoff = revisit_time_norm(&self.params, gap);

        let lower_bound = best_fact_end.unwrap_or(f64::NEG_INFINITY);
        let mut undecided: Vec<(f64, f64)> = touching
            .iter()
            .filter(|t| !t.activity.is_fact())
            .filter_map(|t| {
                let end = t.latest_end_before(candidate.t0)?;
                if end > lower_bound {
                    let gap_i = candidate.t0 - end;
                    Some((revisit_time_norm(&self.params, gap_i), t.activity.confidence()))
                } else {
                    None
                }
            })
            .collect();
        undecided.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        for (payoff_i, confidence_i) in &undecided {
            payoff -= (payoff - payoff_i) * confidence_i;
        }

        let utility_avg = if touching.is_empty() {
            1.0
        } else {
            touching.iter().map(|t| t.activity.confidence()).sum::<f64>() / touching.len() as f64
        };

        (payoff, utility_avg)
    }
}

/// Reduces a set of per-cell payoffs into one aggregated candidate payoff, per
/// `agent.ga_scheduler.payoff_aggregation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoffAggregation {
    Sum,
    Mean,
    Min,
    Max,
}

impl PayoffAggregation {
    pub fn aggregate(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            PayoffAggregation::Sum => values.iter().sum(),
            PayoffAggregation::Mean => values.iter().sum::<f64>() / values.len() as f64,
            PayoffAggregation::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            PayoffAggregation::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn linear_params(goal_min: f64, goal_max: f64) -> PayoffParams {
        PayoffParams {
            model: PayoffModelType::Linear,
            goal_min,
            goal_max,
            ..Default::default()
        }
    }

    #[test]
    fn s1_linear_payoff_curve() {
        let p = linear_params(0.0, 2.0);
        assert_eq!(revisit_time_norm(&p, 0.0), 0.0);
        assert_eq!(revisit_time_norm(&p, 1.0), 0.5);
        assert_eq!(revisit_time_norm(&p, 2.0), 1.0);
        assert_eq!(revisit_time_norm(&p, 3.0), 1.0);
    }

    #[test]
    fn no_prior_fact_yields_max_payoff() {
        let p = linear_params(0.0, 2.0);
        assert_eq!(revisit_time_norm(&p, -1.0), 1.0);
    }

    #[test]
    fn payoff_non_decreasing_for_all_models() {
        for model in [
            PayoffModelType::Sigmoid,
            PayoffModelType::Linear,
            PayoffModelType::ConstantSlope,
            PayoffModelType::Quadratic,
        ] {
            let params = PayoffParams {
                model,
                goal_min: 0.0,
                goal_max: 10.0,
                steepness: 1.0,
                payoff_mid: 5.0,
                slope: 0.1,
            };
            let mut prev = revisit_time_norm(&params, 0.0);
            for t in 1..=20 {
                let v = revisit_time_norm(&params, t as f64);
                assert!(v >= prev - 1e-9, "model {model:?} not monotonic at t={t}");
                assert!((0.0..=1.0).contains(&v));
                prev = v;
            }
        }
    }

    fn fact_at(owner: &str, seq: u64, start: f64, end: f64) -> ActivityHandle {
        let mut cells = HashMap::new();
        let mut iv: SmallVec<[Interval; 4]> = SmallVec::new();
        iv.push(Interval::new(start, end));
        cells.insert((0, 0), iv);
        Arc::new(
            crate::activity::Activity::new(owner.to_string(), seq, start, end, vec![], cells, 1.0, true, false, start)
                .unwrap(),
        )
    }

    #[test]
    fn s2_backward_single_fact() {
        let params = linear_params(0.0, 2.0);
        let pf = RevisitTimeBackwards { params };
        let fact = fact_at("a", 1, 0.0, 0.5);
        let touching = vec![TouchingActivity {
            activity: fact.clone(),
            intervals: {
                let mut iv: SmallVec<[Interval; 4]> = SmallVec::new();
                iv.push(Interval::new(0.0, 0.5));
                iv
            },
        }];
        let (payoff, _) = pf.compute(Interval::new(1.0, 1.5), &touching);
        assert!((payoff - 0.5).abs() < 1e-9);
    }

    #[test]
    fn s3_backward_overlap_is_zero() {
        let params = linear_params(0.0, 2.0);
        let pf = RevisitTimeBackwards { params };
        let fact = fact_at("a", 1, 0.0, 10.0);
        let touching = vec![TouchingActivity {
            activity: fact,
            intervals: {
                let mut iv: SmallVec<[Interval; 4]> = SmallVec::new();
                iv.push(Interval::new(0.0, 10.0));
                iv
            },
        }];
        let (payoff, _) = pf.compute(Interval::new(5.0, 9.0), &touching);
        assert_eq!(payoff, 0.0);
    }
}
