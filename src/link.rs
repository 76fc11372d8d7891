//! Inter-satellite link (§4.7): per-peer connection state machine, queued epidemic transfers,
//! and energy accounting. Positions and mutual-connection acceptance are driven by the caller
//! (the agent pipeline / simulation loop); this module owns only the state machine, the queues,
//! and the arithmetic.
//!
//! Encounter/connected "callbacks" in the source are modelled here as return-value events
//! ([`LinkEvent`]) rather than stored closures: `step` reports what happened, and the caller
//! decides whether to accept an encounter (`accept_connection`) or veto it (simply not calling
//! it), matching the "return an explicit result instead of callback/exception control flow"
//! decision in §9 Design Notes.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::activity::ActivityHandle;
use crate::error::LinkError;
use crate::geo::{segment_intersects_earth, Vec3, EARTH_RADIUS_KM};
use crate::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    LineOfSight,
    Connected,
}

/// One queued transfer: a full activity payload plus its scheduling state.
#[derive(Debug, Clone)]
pub struct TransferRecord {
    pub transfer_id: u64,
    pub activity: ActivityHandle,
    pub planned_start: Option<f64>,
    pub planned_end: Option<f64>,
    pub started: bool,
    pub finished: bool,
}

/// Fixed per-activity transfer overhead, in bytes, plus 12 bytes per trajectory sample (§4.7).
const BASE_TRANSFER_BYTES: f64 = 256.0;
const BYTES_PER_TRAJECTORY_SAMPLE: f64 = 12.0;

fn transfer_size_bytes(activity: &ActivityHandle) -> f64 {
    BASE_TRANSFER_BYTES + activity.trajectory().len() as f64 * BYTES_PER_TRAJECTORY_SAMPLE
}

/// Outcome of a step or of scheduling a send; consumed by the agent pipeline to drive downstream
/// effects (enqueuing an initial gossip batch on `Connected`, crediting resources on
/// `TransferCompleted`, retrying on `TransferFailed`).
#[derive(Debug, Clone)]
pub enum LinkEvent {
    Encountered(AgentId),
    Connected(AgentId),
    Disconnected(AgentId),
    /// Emitted by the sender; the simulation's sequential merge stage is responsible for routing
    /// the payload into the receiving peer's link via [`AgentLink::receive`].
    Deliver { peer: AgentId, transfer: TransferRecord },
    TransferCompleted { peer: AgentId, transfer_id: u64 },
    TransferFailed { peer: AgentId, transfer_id: u64 },
}

struct PeerLink {
    state: LinkState,
    tx_queue: VecDeque<TransferRecord>,
    rx_queue: VecDeque<TransferRecord>,
    tx_cursor: f64,
}

impl PeerLink {
    fn new() -> Self {
        PeerLink {
            state: LinkState::Disconnected,
            tx_queue: VecDeque::new(),
            rx_queue: VecDeque::new(),
            tx_cursor: f64::NEG_INFINITY,
        }
    }
}

/// Per-agent communications endpoint (§4.7).
pub struct AgentLink {
    owner: AgentId,
    range_km: f64,
    datarate_bps: f64,
    tx_energy_rate: f64,
    rx_energy_rate: f64,
    peers: std::collections::HashMap<AgentId, PeerLink>,
    next_transfer_id: u64,
    cumulative_tx_energy: f64,
    cumulative_rx_energy: f64,
}

impl AgentLink {
    pub fn new(owner: AgentId, range_km: f64, datarate_bps: f64, tx_energy_rate: f64, rx_energy_rate: f64) -> Self {
        AgentLink {
            owner,
            range_km,
            datarate_bps,
            tx_energy_rate,
            rx_energy_rate,
            peers: std::collections::HashMap::new(),
            next_transfer_id: 0,
            cumulative_tx_energy: 0.0,
            cumulative_rx_energy: 0.0,
        }
    }

    /// Total TX energy debited across every `step` call so far (§4.7, §8 Invariant 7): the rate
    /// times the sum of in-flight transfer time actually overlapping each step's `[now, now+dt)`.
    pub fn tx_energy_debited(&self) -> f64 {
        self.cumulative_tx_energy
    }

    pub fn rx_energy_debited(&self) -> f64 {
        self.cumulative_rx_energy
    }

    pub fn state_of(&self, peer: &AgentId) -> LinkState {
        self.peers.get(peer).map(|p| p.state).unwrap_or(LinkState::Disconnected)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = &AgentId> {
        self.peers.iter().filter(|(_, p)| p.state == LinkState::Connected).map(|(id, _)| id)
    }

    /// Updates range/line-of-sight for one peer and runs the TX/RX state machine for a step of
    /// length `dt` (in the clock's time unit). `time_unit_seconds` converts that unit into
    /// wall-clock seconds for the `bytes / datarate` transfer-duration computation.
    pub fn step(
        &mut self,
        now: f64,
        dt: f64,
        time_unit_seconds: f64,
        peer: &AgentId,
        own_pos: Vec3,
        peer_pos: Vec3,
        peer_range_km: f64,
    ) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        let los = !segment_intersects_earth(own_pos, peer_pos, EARTH_RADIUS_KM);
        let dist = own_pos.sub(peer_pos).norm();
        let in_range = dist < self.range_km && dist < peer_range_km;

        let link = self.peers.entry(peer.clone()).or_insert_with(PeerLink::new);

        if los && in_range {
            if link.state == LinkState::Disconnected {
                link.state = LinkState::LineOfSight;
                events.push(LinkEvent::Encountered(peer.clone()));
            }
        } else if link.state != LinkState::Disconnected {
            link.state = LinkState::Disconnected;
            for t in link.tx_queue.drain(..) {
                if !t.finished {
                    events.push(LinkEvent::TransferFailed { peer: peer.clone(), transfer_id: t.transfer_id });
                }
            }
            events.push(LinkEvent::Disconnected(peer.clone()));
        }

        if link.state == LinkState::Connected {
            let datarate = self.datarate_bps.max(1e-9);
            let mut tx_energy = 0.0;
            let mut finished_ids = Vec::new();

            for t in link.tx_queue.iter_mut() {
                if t.finished {
                    continue;
                }
                if t.planned_start.is_none() {
                    let start = now.max(link.tx_cursor);
                    let bytes = transfer_size_bytes(&t.activity);
                    let duration_s = bytes * 8.0 / datarate;
                    let duration = duration_s / time_unit_seconds.max(1e-9);
                    t.planned_start = Some(start);
                    t.planned_end = Some(start + duration);
                    link.tx_cursor = start + duration;
                }
                let start = t.planned_start.unwrap();
                let end = t.planned_end.unwrap();

                let overlap = (end.min(now + dt) - start.max(now)).max(0.0);
                tx_energy += overlap * self.tx_energy_rate;

                if start <= now && now <= end && !t.started {
                    t.started = true;
                    events.push(LinkEvent::Deliver {
                        peer: peer.clone(),
                        transfer: TransferRecord {
                            transfer_id: t.transfer_id,
                            activity: t.activity.clone(),
                            planned_start: t.planned_start,
                            planned_end: t.planned_end,
                            started: true,
                            finished: false,
                        },
                    });
                }
                if now >= end {
                    t.finished = true;
                    finished_ids.push(t.transfer_id);
                    events.push(LinkEvent::TransferCompleted { peer: peer.clone(), transfer_id: t.transfer_id });
                }
            }
            link.tx_queue.retain(|t| !t.finished);
            if tx_energy > 0.0 {
                self.cumulative_tx_energy += tx_energy;
                debug!(agent = %self.owner, peer = %peer, tx_energy, "link tx energy debited");
            }

            let rx_energy = link
                .rx_queue
                .iter()
                .filter(|t| t.started && !t.finished)
                .count() as f64
                * self.rx_energy_rate
                * dt;
            if rx_energy > 0.0 {
                self.cumulative_rx_energy += rx_energy;
                debug!(agent = %self.owner, peer = %peer, rx_energy, "link rx energy debited");
            }

            // The sender's planned_end travels with the transfer record, so the receiver can
            // finish it on the same clock rather than needing a second event from the sender.
            for t in link.rx_queue.iter_mut() {
                if t.started && !t.finished && t.planned_end.map(|end| now + dt >= end).unwrap_or(true) {
                    t.finished = true;
                }
            }
        }

        events
    }

    /// Accepts a pending encounter, transitioning `LineOfSight -> Connected` and emitting the
    /// connected-peer event the agent pipeline uses to seed the initial gossip batch.
    pub fn accept_connection(&mut self, peer: &AgentId) -> Option<LinkEvent> {
        let link = self.peers.get_mut(peer)?;
        if link.state == LinkState::LineOfSight {
            link.state = LinkState::Connected;
            Some(LinkEvent::Connected(peer.clone()))
        } else {
            None
        }
    }

    /// Schedules an outbound send of `activity` to `peer`. Drops silently if an equivalent
    /// unfinished transfer is already queued; re-queues over a completed one only if `activity`
    /// is strictly newer.
    pub fn schedule_send(&mut self, peer: &AgentId, activity: ActivityHandle) -> Result<(), LinkError> {
        let link = self
            .peers
            .get_mut(peer)
            .ok_or_else(|| LinkError::UnknownPeer(peer.clone()))?;
        if link.state != LinkState::Connected {
            return Err(LinkError::NotConnected(self.next_transfer_id));
        }

        if let Some(existing) = link.tx_queue.iter().find(|t| t.activity.id() == activity.id()) {
            if !existing.finished {
                return Ok(());
            }
            if existing.activity.last_update() >= activity.last_update() {
                return Ok(());
            }
        }
        link.tx_queue.retain(|t| t.activity.id() != activity.id() || !t.finished);

        let transfer_id = self.next_transfer_id;
        self.next_transfer_id += 1;
        link.tx_queue.push_back(TransferRecord {
            transfer_id,
            activity,
            planned_start: None,
            planned_end: None,
            started: false,
            finished: false,
        });
        Ok(())
    }

    /// Receives a transfer pushed by a peer's `step` (routed by the simulation's sequential merge
    /// stage). Rejects one whose start-time is already in the future relative to `now`.
    pub fn receive(&mut self, peer: &AgentId, transfer: TransferRecord, now: f64) -> Result<(), LinkError> {
        if let Some(start) = transfer.planned_start {
            if start > now {
                warn!(agent = %self.owner, peer = %peer, start, now, "rejected premature transfer");
                return Err(LinkError::PrematureTransfer {
                    transfer_id: transfer.transfer_id,
                    start,
                    now,
                });
            }
        }
        let link = self.peers.entry(peer.clone()).or_insert_with(PeerLink::new);
        link.rx_queue.push_back(transfer);
        Ok(())
    }

    /// Drains finished RX transfers for this agent's `listen()` stage to merge into the
    /// knowledge base and environment model.
    pub fn drain_rx(&mut self) -> Vec<TransferRecord> {
        let mut out = Vec::new();
        for link in self.peers.values_mut() {
            let (done, pending): (VecDeque<_>, VecDeque<_>) = link.rx_queue.drain(..).partition(|t| t.finished);
            out.extend(done);
            link.rx_queue = pending;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Activity;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn activity(seq: u64) -> ActivityHandle {
        Arc::new(Activity::new("sat-a".to_string(), seq, 0.0, 1.0, vec![], HashMap::new(), 0.5, false, false, 0.0).unwrap())
    }

    #[test]
    fn encounter_then_accept_connects() {
        let mut link = AgentLink::new("sat-a".to_string(), 1000.0, 1_000_000.0, 0.1, 0.05);
        let own = Vec3::new(EARTH_RADIUS_KM + 500.0, 0.0, 0.0);
        let peer = Vec3::new(EARTH_RADIUS_KM + 500.0, 50.0, 0.0);
        let events = link.step(0.0, 1.0, 1.0, &"sat-b".to_string(), own, peer, 1000.0);
        assert!(matches!(events[0], LinkEvent::Encountered(_)));
        let connected = link.accept_connection(&"sat-b".to_string());
        assert!(matches!(connected, Some(LinkEvent::Connected(_))));
    }

    #[test]
    fn out_of_range_never_connects() {
        let mut link = AgentLink::new("sat-a".to_string(), 10.0, 1_000_000.0, 0.1, 0.05);
        let own = Vec3::new(EARTH_RADIUS_KM + 500.0, 0.0, 0.0);
        let peer = Vec3::new(EARTH_RADIUS_KM + 500.0, 5000.0, 0.0);
        let events = link.step(0.0, 1.0, 1.0, &"sat-b".to_string(), own, peer, 10.0);
        assert!(events.is_empty());
        assert_eq!(link.state_of(&"sat-b".to_string()), LinkState::Disconnected);
    }

    #[test]
    fn schedule_send_requires_connected() {
        let mut link = AgentLink::new("sat-a".to_string(), 1000.0, 1_000_000.0, 0.1, 0.05);
        let result = link.schedule_send(&"sat-b".to_string(), activity(1));
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_unfinished_send_is_noop() {
        let mut link = AgentLink::new("sat-a".to_string(), 1000.0, 1_000_000.0, 0.1, 0.05);
        let own = Vec3::new(EARTH_RADIUS_KM + 500.0, 0.0, 0.0);
        let peer = Vec3::new(EARTH_RADIUS_KM + 500.0, 50.0, 0.0);
        link.step(0.0, 1.0, 1.0, &"sat-b".to_string(), own, peer, 1000.0);
        link.accept_connection(&"sat-b".to_string());
        link.schedule_send(&"sat-b".to_string(), activity(1)).unwrap();
        link.schedule_send(&"sat-b".to_string(), activity(1)).unwrap();
        let link_state = link.peers.get(&"sat-b".to_string()).unwrap();
        assert_eq!(link_state.tx_queue.len(), 1);
    }
}
