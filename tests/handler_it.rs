//! Activity-ordering and handler-monotonicity invariants (1, 2) and the purge-horizon scenario
//! (S6) against the public `ActivityHandler` API.

use std::collections::HashMap;
use std::sync::Arc;

use aeodss_sim::activity::Activity;
use aeodss_sim::handler::ActivityHandler;

fn peer_activity(owner: &str, seq: u64, start: f64, end: f64, last_update: f64) -> aeodss_sim::activity::ActivityHandle {
    Arc::new(Activity::new(owner.to_string(), seq, start, end, vec![], HashMap::new(), 0.5, false, false, last_update).unwrap())
}

/// Invariant 1: after a run of out-of-order, non-overlapping inserts, `owned()` is sorted strictly
/// by start-time with no two entries overlapping.
#[test]
fn invariant1_activity_ordering_it() {
    let mut h = ActivityHandler::new("sat-1".to_string());
    let spans = [(50.0, 60.0), (0.0, 10.0), (30.0, 40.0), (10.0, 20.0), (70.0, 80.0)];
    for &(t0, t1) in &spans {
        h.create_owned(t0, t1, vec![], HashMap::new(), 0.5, false, 0.0).unwrap();
    }
    let starts: Vec<f64> = h.owned().iter().map(|a| a.start()).collect();
    let mut sorted = starts.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(starts, sorted, "owned() is not sorted by start-time");

    for w in h.owned().windows(2) {
        assert!(w[0].end() <= w[1].start(), "owned activities overlap: {:?} vs {:?}", w[0].interval(), w[1].interval());
    }
}

/// Invariant 2: an older `last_update` is a no-op, a strictly newer one replaces, and the known
/// peer-activity count tracks the number of distinct (peer, seq) pairs actually retained.
#[test]
fn invariant2_handler_monotonicity_it() {
    let mut h = ActivityHandler::new("sat-1".to_string());

    assert!(h.add_peer(peer_activity("sat-2", 1, 0.0, 1.0, 10.0)));
    assert_eq!(h.known_peer_count(), 1);

    // Older last_update: no-op.
    assert!(!h.add_peer(peer_activity("sat-2", 1, 0.0, 1.0, 5.0)));
    assert_eq!(h.known_peer_count(), 1);
    assert_eq!(h.peer_activity(&"sat-2".to_string(), 1).unwrap().last_update(), 10.0);

    // Strictly newer: replaces.
    assert!(h.add_peer(peer_activity("sat-2", 1, 0.0, 1.0, 20.0)));
    assert_eq!(h.known_peer_count(), 1);
    assert_eq!(h.peer_activity(&"sat-2".to_string(), 1).unwrap().last_update(), 20.0);

    // A distinct (peer, seq) pair grows the count.
    assert!(h.add_peer(peer_activity("sat-2", 2, 2.0, 3.0, 1.0)));
    assert!(h.add_peer(peer_activity("sat-3", 1, 0.0, 1.0, 1.0)));
    assert_eq!(h.known_peer_count(), 3);
}

/// S6: a fact whose end-time is exactly one past the purge horizon is gone from both the owned
/// list and the peer map after `purge()`.
#[test]
fn s6_purge_horizon_it() {
    let mut h = ActivityHandler::new("sat-1".to_string());
    let goal_target = 60.0;
    let now = 1000.0;
    let horizon = now - goal_target;

    h.create_owned(horizon - 5.0, horizon - 1.0, vec![], HashMap::new(), 1.0, true, 0.0).unwrap();
    h.create_owned(now - 5.0, now - 1.0, vec![], HashMap::new(), 1.0, true, 0.0).unwrap();
    h.add_peer(peer_activity("sat-2", 1, horizon - 5.0, horizon - 1.0, 0.0));
    h.add_peer(peer_activity("sat-2", 2, now - 5.0, now - 1.0, 0.0));

    h.purge(now, goal_target);

    let remaining_starts: Vec<f64> = h.owned().iter().map(|a| a.start()).collect();
    assert_eq!(remaining_starts, vec![now - 5.0], "the stale owned fact survived purge");
    assert!(h.peer_activity(&"sat-2".to_string(), 1).is_none(), "the stale peer fact survived purge");
    assert!(h.peer_activity(&"sat-2".to_string(), 2).is_some(), "the still-fresh peer fact was wrongly purged");
}
