//! # Formation Core
//!
//! Coordination layer for 2D multi-agent simulations. Every tick it decides
//! which aim point each agent's motion controller pursues, so that groups keep
//! a geometric arrangement while navigating, and it warns agents about
//! collisions before they happen.
//!
//! ## Components
//!
//! - **Formations** ([`formation`], [`scalable`]): fixed offset sets, a
//!   parametric grid solver with three distribution modes, and a two-level
//!   composer where followers shadow an inner "usher" formation.
//! - **Emergent negotiation** ([`emergent`]): decentralized partner choice
//!   with loop detection and search back-off.
//! - **Redirectors** ([`obstacle_redirect`], [`tactical_redirect`]): per-slot
//!   retargeting of followers around obstacles and toward hiding points.
//! - **Collision prediction** ([`collision`]): closest-approach early warning.
//!
//! The host engine is reached only through the traits in [`collaborators`];
//! [`world`] has in-memory implementations for headless use.
//!
//! ## Tick order
//!
//! Layout first, then redirects, then collision prediction. All components
//! are single-threaded and deterministic; cooldowns compare against a [`Tick`]
//! counter.
//!
//! ## Usage
//!
//! Used as a Rust library. With the `python` feature the layout solver and
//! the closest-approach math are exported through PyO3:
//! `solve_layout_py`, `closest_approach_py`, `predict_collision_py`.

pub mod collaborators;
pub mod collision;
pub mod config;
pub mod emergent;
pub mod formation;
pub mod obstacle_redirect;
pub mod scalable;
pub mod structs;
pub mod tactical_redirect;
pub mod world;

pub use collaborators::{AgentDirectory, ClearanceOracle, HidingPointSupply, MemberFactory, SteerableTargets};
pub use collision::{closest_approach, ClosestApproach, PotentialCollision, PotentialCollisionPredictor};
pub use config::{ConfigError, CoordinationConfig};
pub use emergent::{EmergentGroup, EmergentNegotiator, NegotiationOutcome, PartnerBoard};
pub use formation::{
    FixedFormation, Formation, FormationError, LayoutChanged, OffsetSet, SubscriptionId, TwoLevelFormation,
};
pub use obstacle_redirect::FormationObstacleRedirector;
pub use scalable::{solve_layout, DistributionMode, LayoutRequest, LayoutSolution, ScalableFormation};
pub use structs::*;
pub use tactical_redirect::FormationTacticalRedirector;

#[cfg(feature = "python")]
mod python {
    use crate::collision::{closest_approach, predict_pair};
    use crate::scalable::{solve_layout, DistributionMode, LayoutRequest};
    use crate::structs::{AgentSnapshot, LayerMask, Point, Pose, Vector2D};
    use pyo3::exceptions::PyValueError;
    use pyo3::prelude::*;

    type Pair = (f64, f64);

    fn vector(pair: Pair) -> Vector2D {
        Vector2D::new(pair.0, pair.1)
    }

    fn pair(v: Vector2D) -> Pair {
        (v.x, v.y)
    }

    /// Returns `(positions, spacing, footprint, quantity, corrected)`.
    #[pyfunction]
    fn solve_layout_py(
        mode: &str,
        member_radius: f64,
        min_spacing: Pair,
        footprint: Pair,
        density: Pair,
        quantity: usize,
    ) -> PyResult<(Vec<Pair>, Pair, Pair, usize, bool)> {
        let mode: DistributionMode = mode.parse().map_err(|e| PyValueError::new_err(format!("{e}")))?;
        let request = LayoutRequest {
            mode,
            member_radius,
            min_spacing: vector(min_spacing),
            footprint: vector(footprint),
            density: vector(density),
            quantity,
            proportions: vector(footprint),
        };
        let solution = solve_layout(&request);
        let positions = solution.positions.iter().map(|p| (p.x, p.y)).collect();
        Ok((
            positions,
            pair(solution.spacing),
            pair(solution.footprint),
            solution.quantity,
            solution.corrected,
        ))
    }

    /// Returns `(time, relative_position, separation)` or `None` when the
    /// pair is not converging.
    #[pyfunction]
    fn closest_approach_py(relative_position: Pair, relative_velocity: Pair) -> Option<(f64, Pair, f64)> {
        closest_approach(vector(relative_position), vector(relative_velocity))
            .map(|a| (a.time, pair(a.relative_position), a.separation))
    }

    /// Returns `(time, min_separation)` when the two discs will overlap.
    #[pyfunction]
    fn predict_collision_py(
        position: Pair,
        velocity: Pair,
        radius: f64,
        other_position: Pair,
        other_velocity: Pair,
        other_radius: f64,
    ) -> Option<(f64, f64)> {
        let snapshot = |p: Pair, v: Pair, r: f64| {
            AgentSnapshot::new(Pose::at(Point::new(p.0, p.1)), vector(v), r, LayerMask::ALL)
        };
        let observer = snapshot(position, velocity, radius);
        let other = snapshot(other_position, other_velocity, other_radius);
        predict_pair(&observer, &other).map(|a| (a.time, a.separation))
    }

    #[pymodule]
    fn formation_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(solve_layout_py, m)?)?;
        m.add_function(wrap_pyfunction!(closest_approach_py, m)?)?;
        m.add_function(wrap_pyfunction!(predict_collision_py, m)?)?;
        Ok(())
    }
}
