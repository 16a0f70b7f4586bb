//! # Potential Collision Prediction
//!
//! Early warning for free-moving agents. Each observing agent keeps a
//! candidate set fed by proximity enter/exit events; every tick it predicts
//! the closest approach with each candidate under constant velocities and
//! publishes at most one threat: the candidate that gets within combined
//! radius soonest.
//!
//! With `p = other - self` and `v = other_vel - self_vel`, closest approach
//! happens at `t = -(p . v) / |v|^2`. Pairs with `v = 0` never converge,
//! pairs with `t < 0` are diverging; both are skipped.

use crate::collaborators::AgentDirectory;
use crate::config::CollisionConfig;
use crate::structs::{AgentId, AgentSnapshot, Vector2D};
use ordered_float::OrderedFloat;
use tracing::{debug, trace};

/// Closest approach of two constant-velocity bodies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosestApproach {
    /// Time until closest approach, `>= 0`.
    pub time: f64,
    /// Relative position at that time.
    pub relative_position: Vector2D,
    pub separation: f64,
}

/// `None` when the pair is not converging.
pub fn closest_approach(relative_position: Vector2D, relative_velocity: Vector2D) -> Option<ClosestApproach> {
    let speed_squared = relative_velocity.magnitude_squared();
    if speed_squared == 0.0 {
        return None;
    }
    let time = -relative_position.dot(&relative_velocity) / speed_squared;
    if time < 0.0 {
        return None;
    }
    let at_closest = relative_position + relative_velocity * time;
    Some(ClosestApproach {
        time,
        relative_position: at_closest,
        separation: at_closest.magnitude(),
    })
}

/// Closest approach between two snapshots, if the pair actually overlaps.
pub fn predict_pair(observer: &AgentSnapshot, other: &AgentSnapshot) -> Option<ClosestApproach> {
    let approach = closest_approach(
        other.position() - observer.position(),
        other.velocity - observer.velocity,
    )?;
    (approach.separation <= observer.radius + other.radius).then_some(approach)
}

/// The single most urgent collision an agent is heading for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PotentialCollision {
    pub agent: AgentId,
    pub time: f64,
    pub relative_position: Vector2D,
    pub min_separation: f64,
}

#[derive(Debug, Clone)]
pub struct PotentialCollisionPredictor {
    agent: AgentId,
    config: CollisionConfig,
    candidates: Vec<AgentId>,
    latest: Option<PotentialCollision>,
}

impl PotentialCollisionPredictor {
    pub fn new(agent: AgentId, config: CollisionConfig) -> Self {
        PotentialCollisionPredictor {
            agent,
            config,
            candidates: Vec::new(),
            latest: None,
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn candidates(&self) -> &[AgentId] {
        &self.candidates
    }

    /// Result of the last tick.
    pub fn latest(&self) -> Option<PotentialCollision> {
        self.latest
    }

    /// Proximity-enter event. The other agent becomes a candidate if it is on
    /// a watched layer, within range, and inside the forward cone right now.
    pub fn on_enter(&mut self, other: AgentId, agents: &dyn AgentDirectory) -> bool {
        if other == self.agent || self.candidates.contains(&other) {
            return false;
        }
        let (Some(me), Some(them)) = (agents.snapshot(self.agent), agents.snapshot(other)) else {
            return false;
        };
        if !them.layer.intersects(self.config.agent_mask) {
            return false;
        }

        let offset = them.position() - me.position();
        let distance = offset.magnitude();
        if distance > self.config.detection_range {
            return false;
        }
        if distance > 0.0 {
            let cos = me.pose.forward().dot(&offset) / distance;
            if cos.clamp(-1.0, 1.0).acos() > self.config.cone_half_angle {
                return false;
            }
        }

        trace!(agent = %self.agent, candidate = %other, "collision candidate added");
        self.candidates.push(other);
        true
    }

    pub fn on_exit(&mut self, other: AgentId) {
        self.candidates.retain(|&c| c != other);
    }

    pub fn on_destroyed(&mut self, other: AgentId) {
        self.on_exit(other);
        if self.latest.is_some_and(|c| c.agent == other) {
            self.latest = None;
        }
    }

    pub fn tick(&mut self, agents: &dyn AgentDirectory) -> Option<PotentialCollision> {
        self.latest = None;
        let me = agents.snapshot(self.agent)?;

        let mut approaches = Vec::with_capacity(self.candidates.len());
        self.candidates.retain(|&other| {
            let Some(them) = agents.snapshot(other) else {
                debug!(candidate = %other, "pruning vanished collision candidate");
                return false;
            };
            if let Some(approach) = predict_pair(&me, &them) {
                approaches.push((other, approach));
            }
            true
        });

        // Soonest first; the lower id wins ties.
        let (agent, approach) = approaches
            .into_iter()
            .min_by_key(|(id, approach)| (OrderedFloat(approach.time), *id))?;
        let collision = PotentialCollision {
            agent,
            time: approach.time,
            relative_position: approach.relative_position,
            min_separation: approach.separation,
        };
        trace!(agent = %self.agent, other = %agent, time = collision.time, "potential collision");
        self.latest = Some(collision);
        self.latest
    }
}
