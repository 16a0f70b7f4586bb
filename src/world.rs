//! # Reference Collaborators
//!
//! Small in-memory implementations of the collaborator traits. They let the
//! coordination core run headless (tests, Python bindings, offline tuning)
//! without a host engine.

use crate::collaborators::{
    AgentDirectory, ClearanceOracle, HidingPointSupply, MemberFactory, SteerableTargets,
};
use crate::structs::{AgentId, AgentSnapshot, LayerMask, Point, Pose, SteerTarget, Vector2D};
use std::collections::{BTreeMap, HashMap};

/// A circular obstacle living on one or more physics layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleObstacle {
    pub center: Point,
    pub radius: f64,
    pub layer: LayerMask,
}

impl CircleObstacle {
    pub fn new(center: Point, radius: f64, layer: LayerMask) -> Self {
        CircleObstacle {
            center,
            radius,
            layer,
        }
    }
}

/// Static obstacle set answering clearance queries by disc overlap.
#[derive(Debug, Clone, Default)]
pub struct CircleObstacleField {
    obstacles: Vec<CircleObstacle>,
}

impl CircleObstacleField {
    pub fn new() -> Self {
        CircleObstacleField::default()
    }

    pub fn with_obstacles(obstacles: Vec<CircleObstacle>) -> Self {
        CircleObstacleField { obstacles }
    }

    pub fn add(&mut self, obstacle: CircleObstacle) {
        self.obstacles.push(obstacle);
    }

    pub fn obstacles(&self) -> &[CircleObstacle] {
        &self.obstacles
    }

    pub fn clear(&mut self) {
        self.obstacles.clear();
    }
}

impl ClearanceOracle for CircleObstacleField {
    fn is_clean(&self, point: Point, radius: f64, mask: LayerMask) -> bool {
        self.obstacles.iter().all(|obstacle| {
            if !obstacle.layer.intersects(mask) {
                return true;
            }
            let reach = obstacle.radius + radius;
            obstacle.center.distance_squared(&point) > reach * reach
        })
    }
}

/// Hiding points on the far side of each obstacle as seen from a threat.
///
/// Each point sits on the ray threat → obstacle, `gap` beyond the obstacle's
/// rim. Obstacles coincident with the threat cast no shadow.
#[derive(Debug, Clone)]
pub struct ShadowHidingPoints {
    threat: Option<Point>,
    obstacles: Vec<(Point, f64)>,
    gap: f64,
}

impl ShadowHidingPoints {
    pub fn new(gap: f64) -> Self {
        ShadowHidingPoints {
            threat: None,
            obstacles: Vec::new(),
            gap,
        }
    }

    pub fn set_threat(&mut self, threat: Option<Point>) {
        self.threat = threat;
    }

    /// Registers an obstacle reference point with its bounding radius.
    pub fn add_obstacle(&mut self, center: Point, radius: f64) {
        self.obstacles.push((center, radius));
    }
}

impl HidingPointSupply for ShadowHidingPoints {
    fn hiding_points(&self) -> Vec<Point> {
        let Some(threat) = self.threat else {
            return Vec::new();
        };
        self.obstacles
            .iter()
            .filter_map(|&(center, radius)| {
                let away = center - threat;
                if away.is_zero() {
                    return None;
                }
                Some(center + away.normalize() * (radius + self.gap))
            })
            .collect()
    }
}

/// Fixed list of hiding points, for callers that compute them elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticHidingPoints(pub Vec<Point>);

impl HidingPointSupply for StaticHidingPoints {
    fn hiding_points(&self) -> Vec<Point> {
        self.0.clone()
    }
}

/// In-memory agent registry: kinematic snapshots, steering targets and a
/// member factory that places spawned agents relative to a formation pose.
#[derive(Debug, Clone)]
pub struct AgentTable {
    agents: BTreeMap<AgentId, AgentSnapshot>,
    targets: HashMap<AgentId, SteerTarget>,
    next_id: u64,
    spawn_pose: Pose,
    spawn_radius: f64,
    spawn_layer: LayerMask,
}

impl Default for AgentTable {
    fn default() -> Self {
        AgentTable::new()
    }
}

impl AgentTable {
    pub fn new() -> Self {
        AgentTable {
            agents: BTreeMap::new(),
            targets: HashMap::new(),
            next_id: 0,
            spawn_pose: Pose::default(),
            spawn_radius: 0.5,
            spawn_layer: LayerMask::layer(0),
        }
    }

    /// Pose and physical defaults applied to members created via
    /// [`MemberFactory::spawn`].
    pub fn set_spawn_defaults(&mut self, pose: Pose, radius: f64, layer: LayerMask) {
        self.spawn_pose = pose;
        self.spawn_radius = radius;
        self.spawn_layer = layer;
    }

    pub fn insert(&mut self, snapshot: AgentSnapshot) -> AgentId {
        let id = AgentId(self.next_id);
        self.next_id += 1;
        self.agents.insert(id, snapshot);
        id
    }

    pub fn update(&mut self, agent: AgentId, snapshot: AgentSnapshot) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            *entry = snapshot;
        }
    }

    pub fn set_position(&mut self, agent: AgentId, position: Point) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.pose.position = position;
        }
    }

    pub fn set_velocity(&mut self, agent: AgentId, velocity: Vector2D) {
        if let Some(entry) = self.agents.get_mut(&agent) {
            entry.velocity = velocity;
        }
    }

    pub fn remove(&mut self, agent: AgentId) -> Option<AgentSnapshot> {
        self.targets.remove(&agent);
        self.agents.remove(&agent)
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.agents.contains_key(&agent)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl AgentDirectory for AgentTable {
    fn snapshot(&self, agent: AgentId) -> Option<AgentSnapshot> {
        self.agents.get(&agent).copied()
    }
}

impl SteerableTargets for AgentTable {
    fn target(&self, agent: AgentId) -> Option<SteerTarget> {
        self.targets.get(&agent).copied()
    }

    fn set_target(&mut self, agent: AgentId, target: SteerTarget) {
        self.targets.insert(agent, target);
    }

    fn clear_target(&mut self, agent: AgentId) {
        self.targets.remove(&agent);
    }
}

impl MemberFactory for AgentTable {
    fn spawn(&mut self, _slot: usize, local_position: Point) -> AgentId {
        let pose = Pose::new(self.spawn_pose.to_world(local_position), self.spawn_pose.heading);
        let snapshot = AgentSnapshot::new(pose, Vector2D::ZERO, self.spawn_radius, self.spawn_layer);
        self.insert(snapshot)
    }

    fn despawn(&mut self, agent: AgentId) {
        self.remove(agent);
    }
}
