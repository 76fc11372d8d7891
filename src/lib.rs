//! Discrete-time simulator for a constellation of cooperating Earth-observation satellites:
//! geospatial payoff modelling, a per-agent genetic-algorithm scheduler, and an epidemic
//! inter-satellite gossip protocol.

pub mod activity;
pub mod agent;
pub mod clock;
pub mod config;
pub mod environment;
pub mod error;
pub mod geo;
pub mod handler;
pub mod instrument;
pub mod link;
pub mod motion;
pub mod payoff;
pub mod report;
pub mod resource;
pub mod scheduler;
pub mod sim;
pub mod view;
pub mod world;

/// Identifies one simulated satellite. A plain string rather than a newtype-wrapped integer:
/// agent ids come from configuration (`agent.id` in the system document) and are compared,
/// hashed, and logged far more often than arithmetic'd on.
pub type AgentId = String;

pub use error::{SimError, SimResult};
