//! # Core Data Structures
//!
//! This module defines the fundamental data types shared by every coordination
//! component:
//!
//! - **Point**: 2D position in continuous space
//! - **Vector2D**: 2D offset/velocity vector with arithmetic operations
//! - **Pose**: position plus heading, maps local offsets into world space
//! - **AgentId / LayerMask**: opaque agent handle and physics layer bits
//! - **Tick / Cooldown**: deterministic simulation clock and deadlines
//! - **SteerTarget**: what a follower's motion controller pursues
//! - **AgentSnapshot**: per-tick kinematic state of one agent

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Point { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn distance_squared(&self, other: &Point) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }

    /// Offset of this point from the origin.
    pub fn to_vector(self) -> Vector2D {
        Vector2D::new(self.x, self.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({:.2}, {:.2})", self.x, self.y)
    }
}

impl Sub for Point {
    type Output = Vector2D;

    fn sub(self, other: Point) -> Vector2D {
        Vector2D {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl Add<Vector2D> for Point {
    type Output = Point;

    fn add(self, other: Vector2D) -> Point {
        Point {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2D {
    pub x: f64,
    pub y: f64,
}

impl Vector2D {
    pub const ZERO: Vector2D = Vector2D { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Vector2D { x, y }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn magnitude_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn normalize(&self) -> Vector2D {
        let mag = self.magnitude();
        if mag > 0.0 {
            Vector2D {
                x: self.x / mag,
                y: self.y / mag,
            }
        } else {
            Vector2D { x: 0.0, y: 0.0 }
        }
    }

    pub fn dot(&self, other: &Vector2D) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn perpendicular(&self) -> Vector2D {
        Vector2D {
            x: -self.y,
            y: self.x,
        }
    }

    /// Counter-clockwise rotation by `angle` radians.
    pub fn rotate(&self, angle: f64) -> Vector2D {
        let (sin, cos) = angle.sin_cos();
        Vector2D {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

impl fmt::Display for Vector2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector2D({:.2}, {:.2})", self.x, self.y)
    }
}

impl Add for Vector2D {
    type Output = Vector2D;

    fn add(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }
}

impl Sub for Vector2D {
    type Output = Vector2D;

    fn sub(self, other: Vector2D) -> Vector2D {
        Vector2D {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }
}

impl Mul<f64> for Vector2D {
    type Output = Vector2D;

    fn mul(self, scalar: f64) -> Vector2D {
        Vector2D {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }
}

impl Neg for Vector2D {
    type Output = Vector2D;

    fn neg(self) -> Vector2D {
        Vector2D {
            x: -self.x,
            y: -self.y,
        }
    }
}

/// World placement of an agent or a formation.
///
/// `heading` is measured in radians counter-clockwise from the +y axis, so a
/// zero heading faces "up" and local offsets are used unrotated.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub heading: f64,
}

impl Pose {
    pub fn new(position: Point, heading: f64) -> Self {
        Pose { position, heading }
    }

    pub fn at(position: Point) -> Self {
        Pose { position, heading: 0.0 }
    }

    /// Maps a point expressed in this pose's local frame into world space.
    pub fn to_world(&self, local: Point) -> Point {
        self.position + local.to_vector().rotate(self.heading)
    }

    /// Unit vector the pose is facing.
    pub fn forward(&self) -> Vector2D {
        Vector2D::new(0.0, 1.0).rotate(self.heading)
    }
}

/// Opaque handle of a simulated agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent#{}", self.0)
    }
}

/// Physics layer bits. An agent or obstacle lives on one or more layers and a
/// query matches it when the masks share at least one bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const NONE: LayerMask = LayerMask(0);
    pub const ALL: LayerMask = LayerMask(u32::MAX);

    pub fn layer(index: u32) -> Self {
        LayerMask(1 << index)
    }

    pub fn intersects(&self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl Default for LayerMask {
    fn default() -> Self {
        LayerMask::ALL
    }
}

/// Simulation clock, one unit per fixed time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Tick(pub u64);

impl Tick {
    pub fn after(&self, ticks: u64) -> Tick {
        Tick(self.0.saturating_add(ticks))
    }

    pub fn next(&self) -> Tick {
        self.after(1)
    }
}

/// Next-eligible-tick deadline. A fresh cooldown is ready immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cooldown {
    ready_at: Tick,
}

impl Cooldown {
    pub fn new() -> Self {
        Cooldown::default()
    }

    pub fn arm(&mut self, now: Tick, ticks: u64) {
        self.ready_at = now.after(ticks);
    }

    pub fn is_ready(&self, now: Tick) -> bool {
        now >= self.ready_at
    }

    pub fn ready_at(&self) -> Tick {
        self.ready_at
    }

    pub fn reset(&mut self) {
        self.ready_at = Tick::default();
    }
}

/// What a follower's motion controller steers toward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SteerTarget {
    /// Track another agent (usher, formation goal, ...).
    Agent(AgentId),
    /// A fixed placeholder point in world space.
    Point(Point),
    /// A point held at `offset` in `anchor`'s local frame.
    Offset { anchor: AgentId, offset: Vector2D },
}

/// Kinematic state of one agent as seen during the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub pose: Pose,
    pub velocity: Vector2D,
    pub radius: f64,
    pub layer: LayerMask,
}

impl AgentSnapshot {
    pub fn new(pose: Pose, velocity: Vector2D, radius: f64, layer: LayerMask) -> Self {
        AgentSnapshot {
            pose,
            velocity,
            radius,
            layer,
        }
    }

    pub fn position(&self) -> Point {
        self.pose.position
    }
}
