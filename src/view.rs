//! View boundary (§1 Non-goals: no renderer). A `View` trait is defined so the control loop has
//! somewhere to hand a draw-time snapshot, the way `graphics.enabled` in configuration implies a
//! real UI exists in the system this was distilled from; [`NullView`] is the only implementation
//! shipped here.

use crate::AgentId;

/// One agent's position and a coarse status string, the minimum a renderer would need per frame.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub position: Option<crate::geo::Vec3>,
    pub capturing: bool,
}

/// A full-frame snapshot handed to a [`View`] at the end of a step.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub now: f64,
    pub agents: Vec<AgentSnapshot>,
}

/// Rendering boundary. The control loop calls `draw` once per step (or once per `g` frames, per
/// `-g0`/`-g1`); a real implementation would own a window and a draw thread synchronised against
/// `mutex_draw`.
pub trait View: Send {
    fn draw(&mut self, frame: &FrameSnapshot);
}

/// Ships with every build; used whenever `graphics.enabled` is false or no renderer is linked in.
#[derive(Debug, Default)]
pub struct NullView;

impl View for NullView {
    fn draw(&mut self, _frame: &FrameSnapshot) {}
}
