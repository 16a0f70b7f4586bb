//! # Collaborator Contracts
//!
//! The coordination core never owns the scene. Everything it needs from the
//! host simulation comes through these narrow traits, so a headless test table
//! and a full engine integration can be swapped freely.

use crate::structs::{AgentId, AgentSnapshot, LayerMask, Point, SteerTarget};
use std::cell::RefCell;
use std::rc::Rc;

/// Answers "is this world point free of obstacles within `radius` on `mask`?".
pub trait ClearanceOracle {
    fn is_clean(&self, point: Point, radius: f64, mask: LayerMask) -> bool;
}

/// Steering target slot exposed by every follower's motion controller.
pub trait SteerableTargets {
    fn target(&self, agent: AgentId) -> Option<SteerTarget>;

    fn set_target(&mut self, agent: AgentId, target: SteerTarget);

    fn clear_target(&mut self, agent: AgentId);
}

/// Read access to the current tick's kinematic state of any agent.
///
/// Returns `None` once an agent has been destroyed.
pub trait AgentDirectory {
    fn snapshot(&self, agent: AgentId) -> Option<AgentSnapshot>;
}

/// Instantiates formation members. `local_position` is expressed in the
/// owning formation's local frame.
pub trait MemberFactory {
    fn spawn(&mut self, slot: usize, local_position: Point) -> AgentId;

    fn despawn(&mut self, agent: AgentId);
}

/// Lets a host keep using a factory (typically its agent table) after handing
/// it to a formation that spawns members on its own.
impl<F: MemberFactory + ?Sized> MemberFactory for Rc<RefCell<F>> {
    fn spawn(&mut self, slot: usize, local_position: Point) -> AgentId {
        self.borrow_mut().spawn(slot, local_position)
    }

    fn despawn(&mut self, agent: AgentId) {
        self.borrow_mut().despawn(agent)
    }
}

/// Supplies the hiding points valid for the current threat and obstacle
/// layout. The list is transient and recomputed externally.
pub trait HidingPointSupply {
    fn hiding_points(&self) -> Vec<Point>;
}
