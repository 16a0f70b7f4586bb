//! Configuration types for the coordination components.
//!
//! Every struct is serde-deserializable with per-field defaults, so a partial
//! JSON document only overrides what it names.

use crate::scalable::DistributionMode;
use crate::structs::{LayerMask, Vector2D};
use serde::{Deserialize, Serialize};

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, format!("expected a finite value >= 0, got {value}")))
    }
}

// ---------------------------------------------------------------------------
// Scalable formation
// ---------------------------------------------------------------------------

/// Initial inputs of a scalable formation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalableConfig {
    pub mode: DistributionMode,
    pub member_radius: f64,
    /// Floor for the distance between adjacent members on each axis.
    pub min_spacing: Vector2D,
    pub footprint: Vector2D,
    pub density: Vector2D,
    pub quantity: usize,
}

impl Default for ScalableConfig {
    fn default() -> Self {
        Self {
            mode: DistributionMode::QuantityAndFootprint,
            member_radius: 0.5,
            min_spacing: Vector2D::new(0.3, 0.3),
            footprint: Vector2D::new(4.0, 2.0),
            density: Vector2D::new(1.0, 1.0),
            quantity: 8,
        }
    }
}

impl ScalableConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("scalable.member_radius", self.member_radius)?;
        non_negative("scalable.min_spacing.x", self.min_spacing.x)?;
        non_negative("scalable.min_spacing.y", self.min_spacing.y)?;
        non_negative("scalable.footprint.x", self.footprint.x)?;
        non_negative("scalable.footprint.y", self.footprint.y)?;
        if !(self.density.x > 0.0 && self.density.y > 0.0) {
            return Err(invalid("scalable.density", "both axes must be > 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Emergent negotiation
// ---------------------------------------------------------------------------

/// Tuning for the decentralized partner search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Radius of the clearance query around a candidate offset point.
    pub clearance_radius: f64,
    pub obstacle_mask: LayerMask,
    /// Consecutive fruitless search ticks before backing off.
    pub max_search_ticks: u32,
    /// Back-off length after the search budget is exhausted.
    pub retry_cooldown_ticks: u64,
    /// How long a loop-detection verdict stays cached.
    pub loop_check_cooldown_ticks: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            clearance_radius: 0.5,
            obstacle_mask: LayerMask::ALL,
            max_search_ticks: 10,
            retry_cooldown_ticks: 30,
            loop_check_cooldown_ticks: 15,
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("negotiation.clearance_radius", self.clearance_radius)?;
        if self.max_search_ticks == 0 {
            return Err(invalid("negotiation.max_search_ticks", "must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Redirectors
// ---------------------------------------------------------------------------

/// Tuning for the obstacle hysteresis redirector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleRedirectConfig {
    pub clearance_radius: f64,
    pub obstacle_mask: LayerMask,
    /// Ticks between occupancy scans; 0 scans every tick.
    pub scan_interval_ticks: u64,
}

impl Default for ObstacleRedirectConfig {
    fn default() -> Self {
        Self {
            clearance_radius: 0.5,
            obstacle_mask: LayerMask::ALL,
            scan_interval_ticks: 0,
        }
    }
}

impl ObstacleRedirectConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("obstacle_redirect.clearance_radius", self.clearance_radius)
    }
}

/// Tuning for hiding-point assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TacticalConfig {
    /// Hiding points farther than this from an usher slot are ignored.
    pub max_hiding_distance: f64,
    pub rescan_interval_ticks: u64,
}

impl Default for TacticalConfig {
    fn default() -> Self {
        Self {
            max_hiding_distance: 8.0,
            rescan_interval_ticks: 20,
        }
    }
}

impl TacticalConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("tactical.max_hiding_distance", self.max_hiding_distance)
    }
}

// ---------------------------------------------------------------------------
// Collision prediction
// ---------------------------------------------------------------------------

/// Entry filter for the potential-collision candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub agent_mask: LayerMask,
    pub detection_range: f64,
    /// Half angle of the forward cone, radians.
    pub cone_half_angle: f64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            agent_mask: LayerMask::ALL,
            detection_range: 10.0,
            cone_half_angle: std::f64::consts::FRAC_PI_2,
        }
    }
}

impl CollisionConfig {
    pub fn validate(&self) -> Result<()> {
        non_negative("collision.detection_range", self.detection_range)?;
        if !(self.cone_half_angle > 0.0 && self.cone_half_angle <= std::f64::consts::PI) {
            return Err(invalid(
                "collision.cone_half_angle",
                format!("expected (0, pi], got {}", self.cone_half_angle),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// All coordination tuning in one document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub scalable: ScalableConfig,
    pub negotiation: NegotiationConfig,
    pub obstacle_redirect: ObstacleRedirectConfig,
    pub tactical: TacticalConfig,
    pub collision: CollisionConfig,
}

impl CoordinationConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CoordinationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scalable.validate()?;
        self.negotiation.validate()?;
        self.obstacle_redirect.validate()?;
        self.tactical.validate()?;
        self.collision.validate()
    }
}
