//! # Emergent Formation Negotiation
//!
//! Fully decentralized formation keeping: every follower picks one other
//! agent of its group (its *partner*) and holds a private offset from it. No
//! agent assigns positions to another.
//!
//! ## Per tick, per agent
//!
//! - **Unpartnered**: scan peers in group order (skipping itself, any peer
//!   already partnered to it, and members of its last detected loop) and try
//!   every offset of the shared [`OffsetSet`]; the first clearance-clean
//!   `(peer, offset)` wins. After `max_search_ticks` fruitless ticks the
//!   agent backs off for `retry_cooldown_ticks`.
//! - **Partnered**: re-check the offset point (skipped when the agent already
//!   stands within two clearance radii of it) and check for partner loops;
//!   either failure drops the partner and the search resumes next tick.
//!
//! ## Loop detection
//!
//! "Follow one other agent" can produce rings detached from the leader.
//! [`walk_partner_chain`] follows partner links until it reaches an agent
//! without a partner (the leader) or exceeds `group_size - 1` hops, which
//! counts as a loop. The verdict is cached for `loop_check_cooldown_ticks`.

use crate::collaborators::{AgentDirectory, ClearanceOracle, SteerableTargets};
use crate::config::NegotiationConfig;
use crate::formation::OffsetSet;
use crate::structs::{AgentId, Cooldown, Point, SteerTarget, Tick, Vector2D};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Partner choice of every agent in a group as published so far this tick.
///
/// Each agent writes only its own entry; everyone may read all entries.
#[derive(Debug, Clone, Default)]
pub struct PartnerBoard {
    partners: HashMap<AgentId, Option<AgentId>>,
}

impl PartnerBoard {
    pub fn new() -> Self {
        PartnerBoard::default()
    }

    pub fn publish(&mut self, agent: AgentId, partner: Option<AgentId>) {
        self.partners.insert(agent, partner);
    }

    pub fn withdraw(&mut self, agent: AgentId) {
        self.partners.remove(&agent);
    }

    pub fn partner_of(&self, agent: AgentId) -> Option<AgentId> {
        self.partners.get(&agent).copied().flatten()
    }
}

/// One agent's chosen partner and offset (local to the partner).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partnership {
    pub partner: AgentId,
    pub offset: Vector2D,
}

/// Result of a partner-chain walk. `visited` lists every agent reached,
/// in walk order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopWalk {
    pub in_loop: bool,
    pub visited: Vec<AgentId>,
}

/// Follows partner links starting at `origin`'s partner `first`.
///
/// Terminates within `group_size` hops: reaching an agent without a partner
/// means no loop; revisiting an agent or exceeding `group_size - 1` hops
/// means a loop.
pub fn walk_partner_chain(
    origin: AgentId,
    first: AgentId,
    board: &PartnerBoard,
    group_size: usize,
) -> LoopWalk {
    let max_hops = group_size.saturating_sub(1);
    let mut visited = Vec::new();
    let mut current = first;
    let mut hops = 1;

    loop {
        visited.push(current);
        let Some(next) = board.partner_of(current) else {
            return LoopWalk {
                in_loop: false,
                visited,
            };
        };
        hops += 1;
        if hops > max_hops || next == origin || visited.contains(&next) {
            return LoopWalk {
                in_loop: true,
                visited,
            };
        }
        current = next;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PartnerLost,
    OffsetBlocked,
    LoopDetected,
}

/// What one negotiator did during a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NegotiationOutcome {
    Accepted(Partnership),
    Holding(Partnership),
    Dropped(DropReason),
    Searching,
    /// Search budget spent; backing off.
    Exhausted,
    CoolingDown,
    /// The agent itself has no snapshot this tick.
    Inactive,
}

/// Partner search and upkeep for a single agent.
#[derive(Debug, Clone)]
pub struct EmergentNegotiator {
    agent: AgentId,
    offsets: Arc<OffsetSet>,
    config: NegotiationConfig,
    partnership: Option<Partnership>,
    search_ticks: u32,
    retry: Cooldown,
    loop_check: Cooldown,
    cached_loop: bool,
    loop_members: Vec<AgentId>,
}

impl EmergentNegotiator {
    pub fn new(agent: AgentId, offsets: Arc<OffsetSet>, config: NegotiationConfig) -> Self {
        EmergentNegotiator {
            agent,
            offsets,
            config,
            partnership: None,
            search_ticks: 0,
            retry: Cooldown::new(),
            loop_check: Cooldown::new(),
            cached_loop: false,
            loop_members: Vec::new(),
        }
    }

    pub fn agent(&self) -> AgentId {
        self.agent
    }

    pub fn partnership(&self) -> Option<Partnership> {
        self.partnership
    }

    pub fn partner(&self) -> Option<AgentId> {
        self.partnership.map(|p| p.partner)
    }

    /// Members of the last detected loop, excluded from the next search.
    pub fn loop_members(&self) -> &[AgentId] {
        &self.loop_members
    }

    /// Forces a partnership (scripted setups, restored sessions). It is
    /// validated on the next tick like any negotiated one.
    pub fn assign_partner(&mut self, partner: AgentId, offset: Vector2D) {
        self.partnership = Some(Partnership { partner, offset });
        self.forget_loop_verdict();
    }

    pub fn tick(
        &mut self,
        now: Tick,
        group: &[AgentId],
        board: &PartnerBoard,
        agents: &dyn AgentDirectory,
        oracle: &dyn ClearanceOracle,
    ) -> NegotiationOutcome {
        match self.partnership {
            Some(partnership) => self.revalidate(now, partnership, group.len(), board, agents, oracle),
            None => self.search(now, group, board, agents, oracle),
        }
    }

    fn search(
        &mut self,
        now: Tick,
        group: &[AgentId],
        board: &PartnerBoard,
        agents: &dyn AgentDirectory,
        oracle: &dyn ClearanceOracle,
    ) -> NegotiationOutcome {
        if !self.retry.is_ready(now) {
            return NegotiationOutcome::CoolingDown;
        }
        if agents.snapshot(self.agent).is_none() {
            return NegotiationOutcome::Inactive;
        }

        if let Some(partnership) = self.find_partner(group, board, agents, oracle) {
            debug!(
                agent = %self.agent,
                partner = %partnership.partner,
                offset = %partnership.offset,
                "partner accepted"
            );
            self.partnership = Some(partnership);
            self.search_ticks = 0;
            self.loop_members.clear();
            self.forget_loop_verdict();
            return NegotiationOutcome::Accepted(partnership);
        }

        self.search_ticks += 1;
        if self.search_ticks >= self.config.max_search_ticks {
            warn!(
                agent = %self.agent,
                attempts = self.search_ticks,
                cooldown = self.config.retry_cooldown_ticks,
                "no usable partner found; backing off"
            );
            self.search_ticks = 0;
            self.retry.arm(now, self.config.retry_cooldown_ticks);
            return NegotiationOutcome::Exhausted;
        }
        NegotiationOutcome::Searching
    }

    fn find_partner(
        &self,
        group: &[AgentId],
        board: &PartnerBoard,
        agents: &dyn AgentDirectory,
        oracle: &dyn ClearanceOracle,
    ) -> Option<Partnership> {
        for &candidate in group {
            if candidate == self.agent
                || board.partner_of(candidate) == Some(self.agent)
                || self.loop_members.contains(&candidate)
            {
                continue;
            }
            let Some(snapshot) = agents.snapshot(candidate) else {
                continue;
            };
            for offset in self.offsets.iter() {
                let point = snapshot.pose.to_world(Point::ORIGIN + offset);
                if oracle.is_clean(point, self.config.clearance_radius, self.config.obstacle_mask) {
                    return Some(Partnership {
                        partner: candidate,
                        offset,
                    });
                }
            }
        }
        None
    }

    fn revalidate(
        &mut self,
        now: Tick,
        partnership: Partnership,
        group_size: usize,
        board: &PartnerBoard,
        agents: &dyn AgentDirectory,
        oracle: &dyn ClearanceOracle,
    ) -> NegotiationOutcome {
        let Some(partner) = agents.snapshot(partnership.partner) else {
            return self.drop_partner(DropReason::PartnerLost);
        };
        let target = partner.pose.to_world(Point::ORIGIN + partnership.offset);

        let radius = self.config.clearance_radius;
        let close_enough = agents
            .snapshot(self.agent)
            .is_some_and(|me| me.position().distance(&target) <= 2.0 * radius);
        if !close_enough && !oracle.is_clean(target, radius, self.config.obstacle_mask) {
            return self.drop_partner(DropReason::OffsetBlocked);
        }

        if self.detect_loop(now, partnership.partner, board, group_size) {
            return self.drop_partner(DropReason::LoopDetected);
        }
        trace!(agent = %self.agent, partner = %partnership.partner, "partner kept");
        NegotiationOutcome::Holding(partnership)
    }

    fn detect_loop(&mut self, now: Tick, partner: AgentId, board: &PartnerBoard, group_size: usize) -> bool {
        if !self.loop_check.is_ready(now) {
            return self.cached_loop;
        }
        let walk = walk_partner_chain(self.agent, partner, board, group_size);
        self.loop_check.arm(now, self.config.loop_check_cooldown_ticks);
        self.cached_loop = walk.in_loop;
        if walk.in_loop {
            debug!(agent = %self.agent, members = ?walk.visited, "partner loop detected");
            self.loop_members = walk.visited;
        }
        self.cached_loop
    }

    fn drop_partner(&mut self, reason: DropReason) -> NegotiationOutcome {
        debug!(agent = %self.agent, ?reason, "partner dropped");
        self.partnership = None;
        self.forget_loop_verdict();
        NegotiationOutcome::Dropped(reason)
    }

    fn forget_loop_verdict(&mut self) {
        self.cached_loop = false;
        self.loop_check.reset();
    }
}

/// A leader plus the negotiators of its followers, stepped in a fixed order.
///
/// Each follower publishes its partner to the shared board right after its
/// own step, so later followers in the same tick see the update.
#[derive(Debug, Clone)]
pub struct EmergentGroup {
    leader: AgentId,
    negotiators: Vec<EmergentNegotiator>,
    board: PartnerBoard,
}

impl EmergentGroup {
    pub fn new(
        leader: AgentId,
        followers: &[AgentId],
        offsets: Arc<OffsetSet>,
        config: &NegotiationConfig,
    ) -> Self {
        let mut board = PartnerBoard::new();
        board.publish(leader, None);
        let negotiators = followers
            .iter()
            .map(|&agent| {
                board.publish(agent, None);
                EmergentNegotiator::new(agent, Arc::clone(&offsets), config.clone())
            })
            .collect();
        EmergentGroup {
            leader,
            negotiators,
            board,
        }
    }

    pub fn leader(&self) -> AgentId {
        self.leader
    }

    /// Leader first, then followers in insertion order.
    pub fn roster(&self) -> Vec<AgentId> {
        std::iter::once(self.leader)
            .chain(self.negotiators.iter().map(|n| n.agent()))
            .collect()
    }

    pub fn board(&self) -> &PartnerBoard {
        &self.board
    }

    pub fn negotiator(&self, agent: AgentId) -> Option<&EmergentNegotiator> {
        self.negotiators.iter().find(|n| n.agent() == agent)
    }

    pub fn partner_of(&self, agent: AgentId) -> Option<AgentId> {
        self.board.partner_of(agent)
    }

    /// Forces a partnership, publishes it and steers `agent` to its slot
    /// next to `partner`. Unknown agents are ignored.
    pub fn assign_partner(
        &mut self,
        agent: AgentId,
        partner: AgentId,
        offset: Vector2D,
        targets: &mut dyn SteerableTargets,
    ) -> bool {
        let Some(negotiator) = self.negotiators.iter_mut().find(|n| n.agent() == agent) else {
            return false;
        };
        negotiator.assign_partner(partner, offset);
        self.board.publish(agent, Some(partner));
        targets.set_target(agent, SteerTarget::Offset { anchor: partner, offset });
        true
    }

    /// Removes a destroyed follower. Peers partnered to it drop it on their
    /// next tick.
    pub fn remove(&mut self, agent: AgentId) {
        self.negotiators.retain(|n| n.agent() != agent);
        self.board.withdraw(agent);
    }

    /// Steps every follower once and mirrors partnerships into steering
    /// targets.
    pub fn tick(
        &mut self,
        now: Tick,
        agents: &dyn AgentDirectory,
        oracle: &dyn ClearanceOracle,
        targets: &mut dyn SteerableTargets,
    ) -> Vec<(AgentId, NegotiationOutcome)> {
        let roster = self.roster();
        let mut outcomes = Vec::with_capacity(self.negotiators.len());

        for negotiator in self.negotiators.iter_mut() {
            let outcome = negotiator.tick(now, &roster, &self.board, agents, oracle);
            let agent = negotiator.agent();
            self.board.publish(agent, negotiator.partner());

            match outcome {
                NegotiationOutcome::Accepted(p) => targets.set_target(
                    agent,
                    SteerTarget::Offset {
                        anchor: p.partner,
                        offset: p.offset,
                    },
                ),
                NegotiationOutcome::Dropped(_) => targets.clear_target(agent),
                _ => {}
            }
            outcomes.push((agent, outcome));
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{AgentSnapshot, LayerMask, Pose};
    use crate::world::{AgentTable, CircleObstacle, CircleObstacleField};
    use std::cell::Cell;

    fn offsets() -> Arc<OffsetSet> {
        Arc::new(OffsetSet::new(
            "pair",
            vec![Vector2D::new(-1.0, -1.0), Vector2D::new(1.0, -1.0)],
        ))
    }

    fn config() -> NegotiationConfig {
        NegotiationConfig {
            clearance_radius: 0.25,
            obstacle_mask: LayerMask::ALL,
            max_search_ticks: 3,
            retry_cooldown_ticks: 10,
            loop_check_cooldown_ticks: 5,
        }
    }

    fn agent_at(table: &mut AgentTable, x: f64, y: f64) -> AgentId {
        table.insert(AgentSnapshot::new(
            Pose::at(Point::new(x, y)),
            Vector2D::ZERO,
            0.25,
            LayerMask::layer(0),
        ))
    }

    fn blocker(x: f64, y: f64) -> CircleObstacle {
        CircleObstacle::new(Point::new(x, y), 0.5, LayerMask::layer(1))
    }

    /// Oracle wrapper counting clearance queries.
    struct CountingOracle<'a> {
        inner: &'a CircleObstacleField,
        calls: Cell<usize>,
    }

    impl ClearanceOracle for CountingOracle<'_> {
        fn is_clean(&self, point: Point, radius: f64, mask: LayerMask) -> bool {
            self.calls.set(self.calls.get() + 1);
            self.inner.is_clean(point, radius, mask)
        }
    }

    fn board_of(links: &[(AgentId, Option<AgentId>)]) -> PartnerBoard {
        let mut board = PartnerBoard::new();
        for &(agent, partner) in links {
            board.publish(agent, partner);
        }
        board
    }

    // ==================== walk_partner_chain ====================

    #[test]
    fn test_walk_reaches_leader() {
        let (leader, a, b, c) = (AgentId(0), AgentId(1), AgentId(2), AgentId(3));
        let board = board_of(&[(leader, None), (a, Some(leader)), (b, Some(a)), (c, Some(b))]);

        let walk = walk_partner_chain(c, b, &board, 4);
        assert!(!walk.in_loop);
        assert_eq!(walk.visited, vec![b, a, leader]);
    }

    #[test]
    fn test_walk_detects_ring() {
        let (leader, a, b, c) = (AgentId(0), AgentId(1), AgentId(2), AgentId(3));
        let board = board_of(&[(leader, None), (a, Some(b)), (b, Some(c)), (c, Some(a))]);

        let walk = walk_partner_chain(a, b, &board, 4);
        assert!(walk.in_loop);
        assert_eq!(walk.visited, vec![b, c]);
    }

    #[test]
    fn test_walk_detects_ring_not_containing_origin() {
        let (leader, a, b, c) = (AgentId(0), AgentId(1), AgentId(2), AgentId(3));
        let board = board_of(&[(leader, None), (a, Some(b)), (b, Some(c)), (c, Some(b))]);

        let walk = walk_partner_chain(a, b, &board, 4);
        assert!(walk.in_loop);
        assert_eq!(walk.visited, vec![b, c]);
    }

    #[test]
    fn test_walk_hop_bound_is_fail_safe() {
        // A legitimate chain longer than the declared group is treated as a loop.
        let ids: Vec<AgentId> = (0..6).map(AgentId).collect();
        let mut links = vec![(ids[0], None)];
        for pair in ids.windows(2) {
            links.push((pair[1], Some(pair[0])));
        }
        let board = board_of(&links);

        let walk = walk_partner_chain(ids[5], ids[4], &board, 3);
        assert!(walk.in_loop);
        assert!(walk.visited.len() <= 3);
    }

    #[test]
    fn test_walk_terminates_on_whole_group_ring() {
        let ids: Vec<AgentId> = (0..50).map(AgentId).collect();
        let mut links = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            links.push((id, Some(ids[(i + 1) % ids.len()])));
        }
        let board = board_of(&links);

        let walk = walk_partner_chain(ids[0], ids[1], &board, ids.len());
        assert!(walk.in_loop);
        assert!(walk.visited.len() < ids.len());
    }

    // ==================== Search ====================

    #[test]
    fn test_first_clean_pair_accepted() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -5.0);
        let field = CircleObstacleField::new();

        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        let board = board_of(&[(leader, None), (a, None)]);
        let outcome = negotiator.tick(Tick(0), &[leader, a], &board, &table, &field);

        let expected = Partnership {
            partner: leader,
            offset: Vector2D::new(-1.0, -1.0),
        };
        assert_eq!(outcome, NegotiationOutcome::Accepted(expected));
        assert_eq!(negotiator.partnership(), Some(expected));
    }

    #[test]
    fn test_blocked_offset_skipped() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -5.0);
        let field = CircleObstacleField::with_obstacles(vec![blocker(-1.0, -1.0)]);

        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        let board = board_of(&[(leader, None), (a, None)]);
        negotiator.tick(Tick(0), &[leader, a], &board, &table, &field);

        assert_eq!(negotiator.partnership().unwrap().offset, Vector2D::new(1.0, -1.0));
    }

    #[test]
    fn test_never_selects_self_or_its_follower() {
        let mut table = AgentTable::new();
        let a = agent_at(&mut table, 0.0, 0.0);
        let b = agent_at(&mut table, 3.0, 0.0);
        let field = CircleObstacleField::new();

        // b already follows a, and a is the only other candidate.
        let board = board_of(&[(a, None), (b, Some(a))]);
        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        let outcome = negotiator.tick(Tick(0), &[a, b], &board, &table, &field);

        assert_eq!(outcome, NegotiationOutcome::Searching);
        assert!(negotiator.partner().is_none());
    }

    #[test]
    fn test_exhaustion_enters_cooldown() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -5.0);
        let field = CircleObstacleField::with_obstacles(vec![blocker(-1.0, -1.0), blocker(1.0, -1.0)]);
        let board = board_of(&[(leader, None), (a, None)]);
        let group = [leader, a];

        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        assert_eq!(negotiator.tick(Tick(0), &group, &board, &table, &field), NegotiationOutcome::Searching);
        assert_eq!(negotiator.tick(Tick(1), &group, &board, &table, &field), NegotiationOutcome::Searching);
        assert_eq!(negotiator.tick(Tick(2), &group, &board, &table, &field), NegotiationOutcome::Exhausted);

        for t in 3..12 {
            assert_eq!(
                negotiator.tick(Tick(t), &group, &board, &table, &field),
                NegotiationOutcome::CoolingDown
            );
        }

        // Obstacle gone once the back-off expires.
        let clear = CircleObstacleField::new();
        let outcome = negotiator.tick(Tick(12), &group, &board, &table, &clear);
        assert!(matches!(outcome, NegotiationOutcome::Accepted(_)));
    }

    #[test]
    fn test_missing_self_is_inactive() {
        let table = AgentTable::new();
        let field = CircleObstacleField::new();
        let mut negotiator = EmergentNegotiator::new(AgentId(9), offsets(), config());
        let outcome = negotiator.tick(Tick(0), &[AgentId(9)], &PartnerBoard::new(), &table, &field);
        assert_eq!(outcome, NegotiationOutcome::Inactive);
    }

    // ==================== Revalidation ====================

    #[test]
    fn test_near_offset_skips_clearance_query() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, -1.0, -1.0);
        let field = CircleObstacleField::with_obstacles(vec![blocker(-1.0, -1.0)]);
        let oracle = CountingOracle {
            inner: &field,
            calls: Cell::new(0),
        };
        let board = board_of(&[(leader, None), (a, Some(leader))]);

        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        negotiator.assign_partner(leader, Vector2D::new(-1.0, -1.0));
        let outcome = negotiator.tick(Tick(0), &[leader, a], &board, &table, &oracle);

        assert!(matches!(outcome, NegotiationOutcome::Holding(_)));
        assert_eq!(oracle.calls.get(), 0);
    }

    #[test]
    fn test_blocked_offset_drops_partner() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -6.0);
        let field = CircleObstacleField::with_obstacles(vec![blocker(-1.0, -1.0)]);
        let board = board_of(&[(leader, None), (a, Some(leader))]);

        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        negotiator.assign_partner(leader, Vector2D::new(-1.0, -1.0));
        let outcome = negotiator.tick(Tick(0), &[leader, a], &board, &table, &field);

        assert_eq!(outcome, NegotiationOutcome::Dropped(DropReason::OffsetBlocked));
        assert!(negotiator.partnership().is_none());

        // Search resumes on the following tick and avoids the blocked slot.
        let board = board_of(&[(leader, None), (a, None)]);
        let outcome = negotiator.tick(Tick(1), &[leader, a], &board, &table, &field);
        assert_eq!(
            outcome,
            NegotiationOutcome::Accepted(Partnership {
                partner: leader,
                offset: Vector2D::new(1.0, -1.0)
            })
        );
    }

    #[test]
    fn test_destroyed_partner_dropped() {
        let mut table = AgentTable::new();
        let a = agent_at(&mut table, 0.0, 0.0);
        let field = CircleObstacleField::new();
        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        negotiator.assign_partner(AgentId(77), Vector2D::ZERO);

        let outcome = negotiator.tick(Tick(0), &[a], &PartnerBoard::new(), &table, &field);
        assert_eq!(outcome, NegotiationOutcome::Dropped(DropReason::PartnerLost));
    }

    #[test]
    fn test_loop_verdict_cached_until_cooldown() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -2.0);
        let b = agent_at(&mut table, 0.0, -1.0);
        let field = CircleObstacleField::new();
        let group = [leader, a, b];

        let mut negotiator = EmergentNegotiator::new(a, offsets(), config());
        negotiator.assign_partner(b, Vector2D::new(0.0, -1.0));

        let healthy = board_of(&[(leader, None), (a, Some(b)), (b, Some(leader))]);
        let ring = board_of(&[(leader, None), (a, Some(b)), (b, Some(a))]);

        assert!(matches!(
            negotiator.tick(Tick(0), &group, &healthy, &table, &field),
            NegotiationOutcome::Holding(_)
        ));
        // Ring formed, but the cached verdict holds until tick 5.
        for t in 1..5 {
            assert!(matches!(
                negotiator.tick(Tick(t), &group, &ring, &table, &field),
                NegotiationOutcome::Holding(_)
            ));
        }
        assert_eq!(
            negotiator.tick(Tick(5), &group, &ring, &table, &field),
            NegotiationOutcome::Dropped(DropReason::LoopDetected)
        );
        assert_eq!(negotiator.loop_members(), &[b]);
    }

    // ==================== EmergentGroup ====================

    #[test]
    fn test_group_forms_and_sets_targets() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, -1.0, -1.0);
        let b = agent_at(&mut table, 1.0, -1.0);
        let field = CircleObstacleField::new();
        let mut targets = AgentTable::new();

        let mut group = EmergentGroup::new(leader, &[a, b], offsets(), &config());
        assert_eq!(group.roster(), vec![leader, a, b]);
        group.tick(Tick(0), &table, &field, &mut targets);

        assert_eq!(group.partner_of(a), Some(leader));
        assert_eq!(
            targets.target(a),
            Some(SteerTarget::Offset {
                anchor: leader,
                offset: Vector2D::new(-1.0, -1.0)
            })
        );
        assert!(group.partner_of(b).is_some());
        assert_ne!(group.partner_of(b), Some(b));
    }

    #[test]
    fn test_group_pairing_invariants_hold_over_time() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let followers: Vec<AgentId> = (0..6).map(|i| agent_at(&mut table, i as f64, -3.0)).collect();
        // Leader's own offsets are blocked so followers must chain off each other.
        let field = CircleObstacleField::with_obstacles(vec![blocker(-1.0, -1.0), blocker(1.0, -1.0)]);
        let mut targets = AgentTable::new();
        let mut group = EmergentGroup::new(leader, &followers, offsets(), &config());

        for t in 0..40 {
            group.tick(Tick(t), &table, &field, &mut targets);
            for &agent in &followers {
                if let Some(partner) = group.partner_of(agent) {
                    assert_ne!(partner, agent, "self partnership at tick {t}");
                    assert_ne!(group.partner_of(partner), Some(agent), "mutual pair at tick {t}");
                }
            }
        }
    }

    #[test]
    fn test_group_breaks_loop_and_steers_away() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 10.0, 0.0);
        let b = agent_at(&mut table, 12.0, 0.0);
        let c = agent_at(&mut table, 14.0, 0.0);
        let field = CircleObstacleField::new();
        let mut targets = AgentTable::new();

        let mut group = EmergentGroup::new(leader, &[a, b, c], offsets(), &config());
        group.assign_partner(a, b, Vector2D::new(-1.0, -1.0), &mut targets);
        group.assign_partner(b, c, Vector2D::new(-1.0, -1.0), &mut targets);
        group.assign_partner(c, a, Vector2D::new(-1.0, -1.0), &mut targets);

        let outcomes = group.tick(Tick(0), &table, &field, &mut targets);
        assert_eq!(outcomes[0], (a, NegotiationOutcome::Dropped(DropReason::LoopDetected)));
        assert_eq!(group.negotiator(a).unwrap().loop_members(), &[b, c]);
        assert!(targets.target(a).is_none());

        group.tick(Tick(1), &table, &field, &mut targets);
        assert_eq!(group.partner_of(a), Some(leader));
    }

    #[test]
    fn test_group_assigned_partner_gets_steering_target() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -2.0);
        let mut targets = AgentTable::new();
        let mut group = EmergentGroup::new(leader, &[a], offsets(), &config());

        assert!(group.assign_partner(a, leader, Vector2D::new(1.0, -1.0), &mut targets));
        assert_eq!(group.partner_of(a), Some(leader));
        assert_eq!(
            targets.target(a),
            Some(SteerTarget::Offset {
                anchor: leader,
                offset: Vector2D::new(1.0, -1.0)
            })
        );

        assert!(!group.assign_partner(AgentId(404), leader, Vector2D::ZERO, &mut targets));
        assert!(targets.target(AgentId(404)).is_none());
    }

    #[test]
    fn test_group_remove_member() {
        let mut table = AgentTable::new();
        let leader = agent_at(&mut table, 0.0, 0.0);
        let a = agent_at(&mut table, 0.0, -2.0);
        let b = agent_at(&mut table, 0.0, -4.0);
        let field = CircleObstacleField::new();
        let mut targets = AgentTable::new();

        let mut group = EmergentGroup::new(leader, &[a, b], offsets(), &config());
        group.assign_partner(b, a, Vector2D::new(-1.0, -1.0), &mut targets);
        group.remove(a);
        table.remove(a);

        let outcomes = group.tick(Tick(0), &table, &field, &mut targets);
        assert_eq!(outcomes, vec![(b, NegotiationOutcome::Dropped(DropReason::PartnerLost))]);
        assert_eq!(group.roster(), vec![leader, b]);
    }
}
