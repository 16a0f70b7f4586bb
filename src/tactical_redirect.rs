//! # Tactical Redirect
//!
//! Sends each follower to cover: for every usher slot the nearest hiding
//! point within `max_hiding_distance` becomes that follower's target. Slots
//! without a hiding point in range fall back to their usher.
//!
//! Slots are served independently in slot order, so two slots may pick the
//! same hiding point. The scan is throttled by `rescan_interval_ticks` but
//! runs immediately when the threat or the usher layout changes.

use crate::collaborators::{HidingPointSupply, SteerableTargets};
use crate::config::TacticalConfig;
use crate::formation::{Formation, SubscriptionId};
use crate::structs::{AgentId, Cooldown, Point, SteerTarget, Tick};
use ordered_float::OrderedFloat;
use std::cell::Cell;
use std::rc::Rc;
use tracing::debug;

/// Where one slot's follower was sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlotAssignment {
    Hiding(Point),
    Usher(AgentId),
}

/// Nearest point to `from` no farther than `max_distance`.
pub fn nearest_within(from: Point, points: &[Point], max_distance: f64) -> Option<Point> {
    let limit = max_distance * max_distance;
    points
        .iter()
        .copied()
        .map(|p| (p, from.distance_squared(&p)))
        .filter(|&(_, d2)| d2 <= limit)
        .min_by_key(|&(_, d2)| OrderedFloat(d2))
        .map(|(p, _)| p)
}

#[derive(Debug)]
pub struct FormationTacticalRedirector {
    config: TacticalConfig,
    threat: Option<AgentId>,
    force: bool,
    rescan: Cooldown,
    assignments: Vec<SlotAssignment>,
    layout_dirty: Rc<Cell<bool>>,
    subscription: Option<SubscriptionId>,
}

impl FormationTacticalRedirector {
    pub fn new(config: TacticalConfig) -> Self {
        FormationTacticalRedirector {
            config,
            threat: None,
            force: false,
            rescan: Cooldown::new(),
            assignments: Vec::new(),
            layout_dirty: Rc::new(Cell::new(false)),
            subscription: None,
        }
    }

    pub fn threat(&self) -> Option<AgentId> {
        self.threat
    }

    /// Changing the threat forces a scan on the next tick.
    pub fn set_threat(&mut self, threat: Option<AgentId>) {
        if threat != self.threat {
            debug!(?threat, "tactical threat changed");
            self.threat = threat;
            self.force = true;
        }
    }

    /// Assignments from the most recent scan, by slot.
    pub fn assignments(&self) -> &[SlotAssignment] {
        &self.assignments
    }

    pub fn attach(&mut self, ushers: &mut dyn Formation) {
        self.detach(ushers);
        let dirty = Rc::clone(&self.layout_dirty);
        self.subscription = Some(ushers.subscribe(Box::new(move |_| dirty.set(true))));
    }

    pub fn detach(&mut self, ushers: &mut dyn Formation) {
        if let Some(id) = self.subscription.take() {
            ushers.unsubscribe(id);
        }
    }

    /// Returns `true` when a scan ran this tick.
    pub fn tick(
        &mut self,
        now: Tick,
        ushers: &dyn Formation,
        followers: &dyn Formation,
        supply: &dyn HidingPointSupply,
        targets: &mut dyn SteerableTargets,
    ) -> bool {
        let forced = std::mem::take(&mut self.force) | self.layout_dirty.replace(false);
        if !forced && !self.rescan.is_ready(now) {
            return false;
        }
        self.rescan.arm(now, self.config.rescan_interval_ticks);

        let hiding_points = supply.hiding_points();
        let usher_ids = ushers.members();
        let follower_ids = followers.members();

        self.assignments = ushers
            .world_positions()
            .into_iter()
            .zip(usher_ids.iter().zip(follower_ids))
            .map(|(slot_position, (&usher, &follower))| {
                let assignment =
                    match nearest_within(slot_position, &hiding_points, self.config.max_hiding_distance) {
                        Some(point) => SlotAssignment::Hiding(point),
                        None => SlotAssignment::Usher(usher),
                    };
                let target = match assignment {
                    SlotAssignment::Hiding(point) => SteerTarget::Point(point),
                    SlotAssignment::Usher(usher) => SteerTarget::Agent(usher),
                };
                targets.set_target(follower, target);
                assignment
            })
            .collect();

        debug!(
            forced,
            hiding_points = hiding_points.len(),
            covered = self
                .assignments
                .iter()
                .filter(|a| matches!(a, SlotAssignment::Hiding(_)))
                .count(),
            "tactical scan"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formation::{FixedFormation, OffsetSet};
    use crate::structs::{Pose, Vector2D};
    use crate::world::{AgentTable, ShadowHidingPoints, StaticHidingPoints};
    use std::sync::Arc;

    fn line() -> Arc<OffsetSet> {
        Arc::new(OffsetSet::new(
            "line",
            vec![Vector2D::new(-2.0, 0.0), Vector2D::new(0.0, 0.0), Vector2D::new(2.0, 0.0)],
        ))
    }

    fn rig() -> (AgentTable, FixedFormation, FixedFormation) {
        let mut agents = AgentTable::new();
        let mut ushers = FixedFormation::new(line(), 0.5);
        let mut followers = FixedFormation::new(line(), 0.5);
        ushers.generate_members(&mut agents);
        followers.generate_members(&mut agents);
        (AgentTable::new(), ushers, followers)
    }

    fn config(max_hiding_distance: f64) -> TacticalConfig {
        TacticalConfig {
            max_hiding_distance,
            rescan_interval_ticks: 10,
        }
    }

    // ==================== nearest_within ====================

    #[test]
    fn test_nearest_within_picks_closest() {
        let points = [Point::new(3.0, 0.0), Point::new(1.0, 1.0), Point::new(-1.5, 0.0)];
        assert_eq!(nearest_within(Point::ORIGIN, &points, 5.0), Some(Point::new(1.0, 1.0)));
    }

    #[test]
    fn test_nearest_within_respects_limit() {
        let points = [Point::new(3.0, 0.0)];
        assert_eq!(nearest_within(Point::ORIGIN, &points, 2.9), None);
        assert_eq!(nearest_within(Point::ORIGIN, &points, 3.0), Some(Point::new(3.0, 0.0)));
        assert_eq!(nearest_within(Point::ORIGIN, &[], 3.0), None);
    }

    // ==================== Redirector Tests ====================

    #[test]
    fn test_slots_take_nearest_hiding_point() {
        let (mut targets, ushers, followers) = rig();
        let supply = StaticHidingPoints(vec![Point::new(-2.0, 1.0), Point::new(2.5, 0.5)]);
        let mut redirector = FormationTacticalRedirector::new(config(1.5));

        assert!(redirector.tick(Tick(0), &ushers, &followers, &supply, &mut targets));

        let f = followers.members();
        assert_eq!(targets.target(f[0]), Some(SteerTarget::Point(Point::new(-2.0, 1.0))));
        assert_eq!(targets.target(f[1]), Some(SteerTarget::Agent(ushers.members()[1])));
        assert_eq!(targets.target(f[2]), Some(SteerTarget::Point(Point::new(2.5, 0.5))));
    }

    #[test]
    fn test_no_point_in_range_falls_back_to_usher() {
        let (mut targets, ushers, followers) = rig();
        let supply = StaticHidingPoints(vec![Point::new(50.0, 50.0)]);
        let mut redirector = FormationTacticalRedirector::new(config(5.0));
        redirector.tick(Tick(0), &ushers, &followers, &supply, &mut targets);

        for (&follower, &usher) in followers.members().iter().zip(ushers.members()) {
            assert_eq!(targets.target(follower), Some(SteerTarget::Agent(usher)));
        }
        assert!(redirector
            .assignments()
            .iter()
            .all(|a| matches!(a, SlotAssignment::Usher(_))));
    }

    #[test]
    fn test_slots_may_share_a_point() {
        let (mut targets, ushers, followers) = rig();
        let supply = StaticHidingPoints(vec![Point::new(0.0, 3.0)]);
        let mut redirector = FormationTacticalRedirector::new(config(10.0));
        redirector.tick(Tick(0), &ushers, &followers, &supply, &mut targets);

        assert_eq!(
            redirector.assignments(),
            &[SlotAssignment::Hiding(Point::new(0.0, 3.0)); 3]
        );
    }

    #[test]
    fn test_rescan_is_throttled() {
        let (mut targets, ushers, followers) = rig();
        let supply = StaticHidingPoints(Vec::new());
        let mut redirector = FormationTacticalRedirector::new(config(5.0));

        assert!(redirector.tick(Tick(0), &ushers, &followers, &supply, &mut targets));
        assert!(!redirector.tick(Tick(5), &ushers, &followers, &supply, &mut targets));
        assert!(redirector.tick(Tick(10), &ushers, &followers, &supply, &mut targets));
    }

    #[test]
    fn test_threat_change_forces_scan() {
        let (mut targets, mut ushers, followers) = rig();
        let mut supply = ShadowHidingPoints::new(0.5);
        supply.add_obstacle(Point::new(0.0, 3.0), 1.0);
        let mut redirector = FormationTacticalRedirector::new(config(5.0));
        ushers.set_pose(Pose::at(Point::new(0.0, 2.0)));

        redirector.tick(Tick(0), &ushers, &followers, &supply, &mut targets);
        assert_eq!(
            targets.target(followers.members()[1]),
            Some(SteerTarget::Agent(ushers.members()[1]))
        );

        // Threat south of the obstacle casts a hiding point at (0, 4.5).
        supply.set_threat(Some(Point::new(0.0, -10.0)));
        redirector.set_threat(Some(AgentId(99)));
        assert!(redirector.tick(Tick(1), &ushers, &followers, &supply, &mut targets));
        assert_eq!(
            targets.target(followers.members()[1]),
            Some(SteerTarget::Point(Point::new(0.0, 4.5)))
        );

        // Same threat again does not force.
        redirector.set_threat(Some(AgentId(99)));
        assert!(!redirector.tick(Tick(2), &ushers, &followers, &supply, &mut targets));
    }

    #[test]
    fn test_layout_change_forces_scan() {
        let (mut targets, mut ushers, followers) = rig();
        let supply = StaticHidingPoints(Vec::new());
        let mut redirector = FormationTacticalRedirector::new(config(5.0));
        redirector.attach(&mut ushers);

        redirector.tick(Tick(0), &ushers, &followers, &supply, &mut targets);
        assert!(!redirector.tick(Tick(1), &ushers, &followers, &supply, &mut targets));
        ushers.set_member_radius(1.0);
        assert!(redirector.tick(Tick(2), &ushers, &followers, &supply, &mut targets));
    }
}
