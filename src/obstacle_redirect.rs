//! # Obstacle Redirect
//!
//! Followers normally steer toward their usher. When an usher slot lands
//! inside an obstacle, the follower of that slot is sent straight to the
//! formation's overall goal instead, and handed back to its usher once the
//! slot clears.
//!
//! Redirects are edge-triggered: a target is written only when a slot's
//! occupancy flips, never while it stays inside or outside.

use crate::collaborators::{ClearanceOracle, SteerableTargets};
use crate::config::ObstacleRedirectConfig;
use crate::formation::{Formation, SubscriptionId};
use crate::structs::{AgentId, Cooldown, SteerTarget, Tick};
use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::{debug, trace};

/// Slots whose occupancy flipped during one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectReport {
    pub entered: Vec<usize>,
    pub left: Vec<usize>,
}

impl RedirectReport {
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.left.is_empty()
    }
}

#[derive(Debug)]
pub struct FormationObstacleRedirector {
    config: ObstacleRedirectConfig,
    goal: AgentId,
    goal_changed: bool,
    inside: BTreeSet<usize>,
    scan: Cooldown,
    layout_dirty: Rc<Cell<bool>>,
    subscription: Option<SubscriptionId>,
}

impl FormationObstacleRedirector {
    pub fn new(config: ObstacleRedirectConfig, goal: AgentId) -> Self {
        FormationObstacleRedirector {
            config,
            goal,
            goal_changed: false,
            inside: BTreeSet::new(),
            scan: Cooldown::new(),
            layout_dirty: Rc::new(Cell::new(false)),
            subscription: None,
        }
    }

    pub fn goal(&self) -> AgentId {
        self.goal
    }

    /// Changes the overall target. Followers already redirected are moved
    /// to the new goal on the next scan.
    pub fn set_goal(&mut self, goal: AgentId) {
        if goal != self.goal {
            self.goal = goal;
            self.goal_changed = true;
        }
    }

    /// Slots currently considered inside an obstacle.
    pub fn inside(&self) -> impl Iterator<Item = usize> + '_ {
        self.inside.iter().copied()
    }

    /// Listens for layout changes of the usher formation. A change resets
    /// occupancy memory on the next tick.
    pub fn attach(&mut self, ushers: &mut dyn Formation) {
        self.detach(ushers);
        let dirty = Rc::clone(&self.layout_dirty);
        let id = ushers.subscribe(Box::new(move |_| dirty.set(true)));
        self.subscription = Some(id);
    }

    pub fn detach(&mut self, ushers: &mut dyn Formation) {
        if let Some(id) = self.subscription.take() {
            ushers.unsubscribe(id);
        }
    }

    pub fn tick(
        &mut self,
        now: Tick,
        ushers: &dyn Formation,
        followers: &dyn Formation,
        oracle: &dyn ClearanceOracle,
        targets: &mut dyn SteerableTargets,
    ) -> RedirectReport {
        let layout_changed = self.layout_dirty.replace(false);
        if !layout_changed && !self.scan.is_ready(now) {
            return RedirectReport::default();
        }
        self.scan.arm(now, self.config.scan_interval_ticks);

        let usher_ids = ushers.members();
        let follower_ids = followers.members();
        let slots = usher_ids.len().min(follower_ids.len());

        if layout_changed {
            debug!(slots, "usher layout changed; resetting obstacle redirects");
            for slot in 0..slots {
                targets.set_target(follower_ids[slot], SteerTarget::Agent(usher_ids[slot]));
            }
            self.inside.clear();
        }

        let current: BTreeSet<usize> = ushers
            .world_positions()
            .into_iter()
            .take(slots)
            .enumerate()
            .filter(|(_, point)| {
                !oracle.is_clean(*point, self.config.clearance_radius, self.config.obstacle_mask)
            })
            .map(|(slot, _)| slot)
            .collect();

        let report = RedirectReport {
            entered: current.difference(&self.inside).copied().collect(),
            left: self
                .inside
                .difference(&current)
                .copied()
                .filter(|&slot| slot < slots)
                .collect(),
        };

        for &slot in &report.entered {
            trace!(slot, goal = %self.goal, "slot entered obstacle");
            targets.set_target(follower_ids[slot], SteerTarget::Agent(self.goal));
        }
        for &slot in &report.left {
            trace!(slot, usher = %usher_ids[slot], "slot left obstacle");
            targets.set_target(follower_ids[slot], SteerTarget::Agent(usher_ids[slot]));
        }
        if std::mem::take(&mut self.goal_changed) {
            for &slot in current.intersection(&self.inside) {
                targets.set_target(follower_ids[slot], SteerTarget::Agent(self.goal));
            }
        }

        self.inside = current;
        report
    }
}
