//! # Formations
//!
//! The [`Formation`] trait is the contract binding the coordination core
//! together: an ordered member list, ordered local slot positions, a member
//! radius and a [`LayoutChanged`] notification. Consumers must re-read
//! `member_positions()` in full on every notification since a recompute may
//! renumber slots.
//!
//! Implementations in this module:
//!
//! - [`FixedFormation`]: members placed once at a static [`OffsetSet`].
//! - [`TwoLevelFormation`]: one follower per slot of an inner "usher"
//!   formation, each follower steering toward its usher.
//!
//! The scalable grid formation lives in [`crate::scalable`].

use crate::collaborators::{MemberFactory, SteerableTargets};
use crate::structs::{AgentId, Point, Pose, SteerTarget, Vector2D};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Errors raised while wiring formations together.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FormationError {
    #[error("no usher formation attached")]
    MissingUshers,
    #[error("usher formation has {members} members for {positions} slots")]
    UshersNotGenerated { members: usize, positions: usize },
    #[error("unknown distribution mode `{0}`")]
    UnknownMode(String),
}

/// Ordered, named list of 2D offsets relative to an origin. Index order is
/// slot identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetSet {
    name: String,
    offsets: Vec<Vector2D>,
}

impl OffsetSet {
    pub fn new(name: impl Into<String>, offsets: Vec<Vector2D>) -> Self {
        OffsetSet {
            name: name.into(),
            offsets,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn offsets(&self) -> &[Vector2D] {
        &self.offsets
    }

    pub fn get(&self, index: usize) -> Option<Vector2D> {
        self.offsets.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Vector2D> + '_ {
        self.offsets.iter().copied()
    }
}

/// Payload of a layout notification: the full recomputed slot list.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutChanged {
    pub positions: Vec<Point>,
    pub radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub type LayoutListener = Box<dyn FnMut(&LayoutChanged)>;

/// Callback list dispatching [`LayoutChanged`] to subscribers in
/// subscription order.
#[derive(Default)]
pub struct LayoutEvents {
    listeners: Vec<(SubscriptionId, LayoutListener)>,
    next_id: u64,
}

impl LayoutEvents {
    pub fn new() -> Self {
        LayoutEvents::default()
    }

    pub fn subscribe(&mut self, listener: LayoutListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    pub fn emit(&mut self, event: &LayoutChanged) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for LayoutEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayoutEvents")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Capability set shared by every formation type.
pub trait Formation {
    /// Member handles, index-aligned with `member_positions()` once generated.
    fn members(&self) -> &[AgentId];

    /// Slot positions in the formation's local frame.
    fn member_positions(&self) -> &[Point];

    fn member_radius(&self) -> f64;

    fn pose(&self) -> Pose;

    fn set_pose(&mut self, pose: Pose);

    fn subscribe(&mut self, listener: LayoutListener) -> SubscriptionId;

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;

    /// World-space position of `slot` under the current pose.
    fn world_position(&self, slot: usize) -> Option<Point> {
        let local = *self.member_positions().get(slot)?;
        Some(self.pose().to_world(local))
    }

    fn world_positions(&self) -> Vec<Point> {
        let pose = self.pose();
        self.member_positions()
            .iter()
            .map(|&local| pose.to_world(local))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Fixed formation
// ---------------------------------------------------------------------------

/// Members placed once at the offsets of a shared [`OffsetSet`].
#[derive(Debug)]
pub struct FixedFormation {
    offsets: Arc<OffsetSet>,
    positions: Vec<Point>,
    members: Vec<AgentId>,
    member_radius: f64,
    pose: Pose,
    events: LayoutEvents,
}

impl FixedFormation {
    pub fn new(offsets: Arc<OffsetSet>, member_radius: f64) -> Self {
        let positions = offsets.iter().map(|offset| Point::ORIGIN + offset).collect();
        FixedFormation {
            offsets,
            positions,
            members: Vec::new(),
            member_radius,
            pose: Pose::default(),
            events: LayoutEvents::new(),
        }
    }

    pub fn offsets(&self) -> &OffsetSet {
        &self.offsets
    }

    /// Spawns one member per offset. Only the first call has an effect.
    pub fn generate_members(&mut self, factory: &mut dyn MemberFactory) {
        if !self.members.is_empty() {
            return;
        }
        self.members = self
            .positions
            .iter()
            .enumerate()
            .map(|(slot, &local)| factory.spawn(slot, local))
            .collect();
        debug!(
            offsets = self.offsets.name(),
            members = self.members.len(),
            "fixed formation members generated"
        );
    }

    pub fn set_member_radius(&mut self, radius: f64) {
        self.member_radius = radius;
        let event = LayoutChanged {
            positions: self.positions.clone(),
            radius,
        };
        self.events.emit(&event);
    }
}

impl Formation for FixedFormation {
    fn members(&self) -> &[AgentId] {
        &self.members
    }

    fn member_positions(&self) -> &[Point] {
        &self.positions
    }

    fn member_radius(&self) -> f64 {
        self.member_radius
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    fn subscribe(&mut self, listener: LayoutListener) -> SubscriptionId {
        self.events.subscribe(listener)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

// ---------------------------------------------------------------------------
// Two-level formation
// ---------------------------------------------------------------------------

/// Followers shadowing an inner usher formation slot by slot.
///
/// The usher formation stays the positional source of truth: slot positions,
/// radius, pose and layout notifications are all delegated to it. When the
/// ushers are resized through [`TwoLevelFormation::ushers_mut`], call
/// [`TwoLevelFormation::reconcile`] to bring the followers back in line.
pub struct TwoLevelFormation<F: Formation> {
    ushers: Option<F>,
    followers: Vec<AgentId>,
    // Usher each follower currently steers toward, by slot.
    bound_ushers: Vec<AgentId>,
    inert: bool,
    // Holds subscriptions while no usher formation exists; never fires.
    detached_events: LayoutEvents,
}

impl<F: Formation> fmt::Debug for TwoLevelFormation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoLevelFormation")
            .field("has_ushers", &self.ushers.is_some())
            .field("followers", &self.followers)
            .field("inert", &self.inert)
            .finish()
    }
}

fn check_generated(ushers: &dyn Formation) -> Result<(), FormationError> {
    let members = ushers.members().len();
    let positions = ushers.member_positions().len();
    if members != positions {
        return Err(FormationError::UshersNotGenerated { members, positions });
    }
    Ok(())
}

impl<F: Formation> TwoLevelFormation<F> {
    pub fn new(ushers: Option<F>) -> Self {
        TwoLevelFormation {
            ushers,
            followers: Vec::new(),
            bound_ushers: Vec::new(),
            inert: false,
            detached_events: LayoutEvents::new(),
        }
    }

    pub fn ushers(&self) -> Option<&F> {
        self.ushers.as_ref()
    }

    pub fn ushers_mut(&mut self) -> Option<&mut F> {
        self.ushers.as_mut()
    }

    /// True once initialization failed; the formation then skips all work.
    pub fn is_inert(&self) -> bool {
        self.inert
    }

    /// True when the usher members differ from the ones the followers were
    /// last bound to.
    pub fn needs_reconcile(&self) -> bool {
        self.ushers
            .as_ref()
            .is_some_and(|ushers| ushers.members() != self.bound_ushers.as_slice())
    }

    /// Spawns one follower per usher slot and points it at that usher.
    ///
    /// Requires the usher formation to have generated its members. A failure
    /// is logged once and leaves the formation inert.
    pub fn initialize(
        &mut self,
        factory: &mut dyn MemberFactory,
        targets: &mut dyn SteerableTargets,
    ) -> Result<(), FormationError> {
        if self.inert {
            return Err(FormationError::MissingUshers);
        }
        if !self.followers.is_empty() {
            return Ok(());
        }

        let Some(ushers) = self.ushers.as_ref() else {
            error!("two-level formation has no usher formation; disabling");
            self.inert = true;
            return Err(FormationError::MissingUshers);
        };
        if let Err(err) = check_generated(ushers) {
            error!(%err, "two-level formation cannot align followers; disabling");
            self.inert = true;
            return Err(err);
        }

        self.sync_followers(factory, targets);
        debug!(followers = self.followers.len(), "two-level formation initialized");
        Ok(())
    }

    /// Matches the followers to the current usher members: surplus followers
    /// are despawned from the back, missing slots get a new follower, and
    /// followers whose usher changed are re-targeted.
    pub fn reconcile(
        &mut self,
        factory: &mut dyn MemberFactory,
        targets: &mut dyn SteerableTargets,
    ) -> Result<(), FormationError> {
        if self.inert {
            return Err(FormationError::MissingUshers);
        }
        let Some(ushers) = self.ushers.as_ref() else {
            return Err(FormationError::MissingUshers);
        };
        check_generated(ushers)?;

        let before = self.followers.len();
        self.sync_followers(factory, targets);
        debug!(before, after = self.followers.len(), "two-level followers reconciled");
        Ok(())
    }

    fn sync_followers(&mut self, factory: &mut dyn MemberFactory, targets: &mut dyn SteerableTargets) {
        let Some(ushers) = self.ushers.as_ref() else {
            return;
        };
        let usher_ids = ushers.members();
        let positions = ushers.member_positions();

        while self.followers.len() > usher_ids.len() {
            if let Some(surplus) = self.followers.pop() {
                factory.despawn(surplus);
            }
        }
        self.bound_ushers.truncate(self.followers.len());

        for (slot, &usher) in usher_ids.iter().enumerate() {
            match self.followers.get(slot) {
                Some(&follower) => {
                    if self.bound_ushers[slot] != usher {
                        targets.set_target(follower, SteerTarget::Agent(usher));
                        self.bound_ushers[slot] = usher;
                    }
                }
                None => {
                    let follower = factory.spawn(slot, positions[slot]);
                    targets.set_target(follower, SteerTarget::Agent(usher));
                    self.followers.push(follower);
                    self.bound_ushers.push(usher);
                }
            }
        }
    }
}

impl<F: Formation> Formation for TwoLevelFormation<F> {
    fn members(&self) -> &[AgentId] {
        &self.followers
    }

    fn member_positions(&self) -> &[Point] {
        match self.ushers.as_ref() {
            Some(ushers) => ushers.member_positions(),
            None => &[],
        }
    }

    fn member_radius(&self) -> f64 {
        self.ushers.as_ref().map_or(0.0, |u| u.member_radius())
    }

    fn pose(&self) -> Pose {
        self.ushers.as_ref().map_or_else(Pose::default, |u| u.pose())
    }

    fn set_pose(&mut self, pose: Pose) {
        if let Some(ushers) = self.ushers.as_mut() {
            ushers.set_pose(pose);
        }
    }

    fn subscribe(&mut self, listener: LayoutListener) -> SubscriptionId {
        match self.ushers.as_mut() {
            Some(ushers) => ushers.subscribe(listener),
            None => self.detached_events.subscribe(listener),
        }
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self.ushers.as_mut() {
            Some(ushers) => ushers.unsubscribe(id),
            None => self.detached_events.unsubscribe(id),
        }
    }
}
