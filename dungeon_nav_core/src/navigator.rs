use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::AgentConfig,
    geometry::Vec2,
    graph::NodeId,
    physics::{CollisionQuery, Layer, LayerFilter},
    planner::{Path, PathPlanner},
};

/// Position, facing and collision radius of a moving agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub position: Vec2,
    /// Unit facing direction.
    pub heading: Vec2,
    pub radius: f32,
}

impl Body {
    pub fn new(position: Vec2, radius: f32) -> Self {
        Self {
            position,
            heading: Vec2::UP,
            radius,
        }
    }

    /// Faces `direction`; zero directions leave the heading unchanged.
    pub fn face(&mut self, direction: Vec2) {
        let direction = direction.normalized();
        if direction != Vec2::ZERO {
            self.heading = direction;
        }
    }

    pub fn rotate(&mut self, degrees: f32) {
        self.heading = self.heading.rotated_degrees(degrees).normalized();
    }

    /// Turns towards `direction` by at most `max_degrees`. Returns `true`
    /// once the heading is within a degree of it.
    pub fn turn_towards(&mut self, direction: Vec2, max_degrees: f32) -> bool {
        let delta = self.heading.signed_angle_to_degrees(direction.normalized());
        if delta.abs() <= max_degrees {
            self.face(direction);
            return true;
        }
        self.rotate(delta.signum() * max_degrees);
        false
    }

    /// Moves towards `target` by at most `max_distance`. The move is refused
    /// if it would push a body that is currently clear into obstacle geometry.
    /// Returns the distance actually travelled.
    pub fn step_towards<C>(&mut self, target: Vec2, max_distance: f32, collisions: &C) -> f32
    where
        C: CollisionQuery + ?Sized,
    {
        let next = self.position.move_towards(target, max_distance);
        let obstacles = LayerFilter::Only(Layer::Obstacle);
        if collisions.touches(next, self.radius, obstacles)
            && !collisions.touches(self.position, self.radius, obstacles)
        {
            return 0.0;
        }
        let travelled = self.position.distance(next);
        self.position = next;
        travelled
    }
}

/// Follower tuning, taken from [`AgentConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowSettings {
    pub move_speed: f32,
    pub replan_interval_ticks: u32,
    pub reorient_interval_ticks: u32,
    pub arrival_epsilon: f32,
    pub stuck_threshold: f32,
    pub stuck_duration: f32,
}

impl From<&AgentConfig> for FollowSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            move_speed: config.move_speed,
            replan_interval_ticks: config.replan_interval_ticks.max(1),
            reorient_interval_ticks: config.reorient_interval_ticks,
            arrival_epsilon: config.arrival_epsilon,
            stuck_threshold: config.stuck_threshold,
            stuck_duration: config.stuck_duration,
        }
    }
}

/// What the follower is currently doing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Route {
    #[default]
    Idle,
    /// Walking a planned path; `index` is the node currently being approached.
    Path { path: Path, index: usize },
    /// No path was found, heading straight for the target.
    Direct { target: Vec2 },
}

/// Result of a target request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    /// The replan interval has not elapsed; the current route is kept.
    Throttled,
    PathFound,
    /// The planner found nothing; moving straight at the target instead.
    Direct,
}

/// Result of one follow tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowStatus {
    Idle,
    Following,
    Arrived,
    /// Stuck detection fired and a new route was planned.
    Replanned,
}

/// Consumes planner output tick by tick: throttled replans, node-by-node
/// movement, periodic reorientation and stuck recovery.
#[derive(Debug, Clone)]
pub struct PathFollower {
    settings: FollowSettings,
    route: Route,
    target: Option<Vec2>,
    ticks_since_plan: u32,
    reorient_counter: u32,
    stuck_time: f32,
    /// Distance to the current node when progress was last registered.
    progress_anchor: Option<f32>,
    plans: u64,
    forced_replans: u64,
}

impl PathFollower {
    pub fn new(settings: FollowSettings) -> Self {
        Self {
            settings,
            route: Route::Idle,
            target: None,
            ticks_since_plan: settings.replan_interval_ticks.saturating_sub(1),
            reorient_counter: 0,
            stuck_time: 0.0,
            progress_anchor: None,
            plans: 0,
            forced_replans: 0,
        }
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn target(&self) -> Option<Vec2> {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.route != Route::Idle
    }

    pub fn stuck_time(&self) -> f32 {
        self.stuck_time
    }

    /// Total plans made, forced ones included.
    pub fn plans(&self) -> u64 {
        self.plans
    }

    pub fn forced_replans(&self) -> u64 {
        self.forced_replans
    }

    /// The node currently being approached, if following a path.
    pub fn current_node(&self) -> Option<NodeId> {
        match &self.route {
            Route::Path { path, index } => path.get(*index),
            _ => None,
        }
    }

    /// Drops the route and target. The next request plans immediately.
    pub fn clear(&mut self) {
        self.route = Route::Idle;
        self.target = None;
        self.ticks_since_plan = self.settings.replan_interval_ticks.saturating_sub(1);
        self.reset_progress();
    }

    /// Asks to move towards `target`. Plans at most once every
    /// `replan_interval_ticks` calls; in between the current route is kept.
    pub fn request_target<C>(
        &mut self,
        target: Vec2,
        body: &Body,
        planner: &PathPlanner<'_>,
        collisions: &C,
    ) -> PlanOutcome
    where
        C: CollisionQuery + ?Sized,
    {
        self.target = Some(target);
        self.ticks_since_plan = self.ticks_since_plan.saturating_add(1);
        if self.ticks_since_plan < self.settings.replan_interval_ticks {
            return PlanOutcome::Throttled;
        }
        self.replan(target, body, planner, collisions)
    }

    fn replan<C>(
        &mut self,
        target: Vec2,
        body: &Body,
        planner: &PathPlanner<'_>,
        collisions: &C,
    ) -> PlanOutcome
    where
        C: CollisionQuery + ?Sized,
    {
        self.ticks_since_plan = 0;
        self.plans += 1;
        self.reset_progress();

        let start = planner.find_closest_node_in_front(body.position, body.heading, collisions);
        let goal = planner.find_closest_node(target);
        let path = match (start, goal) {
            (Some(start), Some(goal)) => planner.find_shortest_path(start, goal),
            _ => Path::empty(),
        };

        if path.is_empty() {
            debug!(?start, ?goal, "no path found, moving directly");
            self.route = Route::Direct { target };
            PlanOutcome::Direct
        } else {
            debug!(nodes = path.len(), cost = path.cost(), "path planned");
            self.route = Route::Path { path, index: 0 };
            PlanOutcome::PathFound
        }
    }

    /// Advances along the current route by one tick.
    ///
    /// With `hold_facing` set the body keeps its heading (the caller is aiming
    /// it elsewhere, e.g. at a visible target).
    pub fn follow<C>(
        &mut self,
        body: &mut Body,
        planner: &PathPlanner<'_>,
        collisions: &C,
        dt: f32,
        hold_facing: bool,
    ) -> FollowStatus
    where
        C: CollisionQuery + ?Sized,
    {
        let (index, node_id) = match &self.route {
            Route::Idle => return FollowStatus::Idle,
            Route::Direct { target } => {
                let target = *target;
                return self.follow_direct(target, body, collisions, dt, hold_facing);
            }
            Route::Path { path, index } => match path.get(*index) {
                Some(node_id) => (*index, node_id),
                None => {
                    self.route = Route::Idle;
                    return FollowStatus::Arrived;
                }
            },
        };

        let Some(node) = planner.graph().node(node_id) else {
            warn!(?node_id, "path references a missing node");
            self.route = Route::Idle;
            return FollowStatus::Idle;
        };
        let node_position = node.position;

        self.reorient_counter += 1;
        if index > 0 && self.reorient_counter >= self.settings.reorient_interval_ticks {
            if !hold_facing {
                body.face(node_position - body.position);
            }
            self.reorient_counter = 0;
        }

        body.step_towards(node_position, self.settings.move_speed * dt, collisions);
        let distance = body.position.distance(node_position);

        match self.progress_anchor {
            Some(anchor) if anchor - distance < self.settings.stuck_threshold => {
                self.stuck_time += dt;
            }
            _ => {
                self.progress_anchor = Some(distance);
                self.stuck_time = 0.0;
            }
        }

        if self.stuck_time > self.settings.stuck_duration {
            self.forced_replans += 1;
            debug!(
                stuck_for = self.stuck_time,
                forced_replans = self.forced_replans,
                "stuck, forcing replan"
            );
            self.stuck_time = 0.0;
            let target = self.target.unwrap_or(node_position);
            self.replan(target, body, planner, collisions);
            return FollowStatus::Replanned;
        }

        if distance < self.settings.arrival_epsilon {
            self.reset_progress();
            if let Route::Path { path, index } = &mut self.route {
                *index += 1;
                if *index >= path.len() {
                    self.route = Route::Idle;
                    return FollowStatus::Arrived;
                }
            }
        }

        FollowStatus::Following
    }

    fn follow_direct<C>(
        &mut self,
        target: Vec2,
        body: &mut Body,
        collisions: &C,
        dt: f32,
        hold_facing: bool,
    ) -> FollowStatus
    where
        C: CollisionQuery + ?Sized,
    {
        if !hold_facing {
            body.face(target - body.position);
        }
        body.step_towards(target, self.settings.move_speed * dt, collisions);
        if body.position.distance(target) < self.settings.arrival_epsilon {
            self.route = Route::Idle;
            return FollowStatus::Arrived;
        }
        FollowStatus::Following
    }

    fn reset_progress(&mut self) {
        self.progress_anchor = None;
        self.stuck_time = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{graph::NodeGraph, physics::ColliderId};

    struct OpenSpace;

    impl CollisionQuery for OpenSpace {
        fn overlap_circle(&self, _: Vec2, _: f32, _: LayerFilter) -> Vec<ColliderId> {
            Vec::new()
        }

        fn linecast(&self, _: Vec2, _: Vec2, _: LayerFilter) -> bool {
            false
        }
    }

    /// Solid everywhere right of `x`; invisible to line casts.
    struct InvisibleWall {
        x: f32,
    }

    impl CollisionQuery for InvisibleWall {
        fn overlap_circle(&self, center: Vec2, radius: f32, _: LayerFilter) -> Vec<ColliderId> {
            if center.x + radius > self.x {
                vec![ColliderId(0)]
            } else {
                Vec::new()
            }
        }

        fn linecast(&self, _: Vec2, _: Vec2, _: LayerFilter) -> bool {
            false
        }
    }

    fn settings(replan_interval_ticks: u32) -> FollowSettings {
        FollowSettings {
            replan_interval_ticks,
            ..FollowSettings::from(&AgentConfig::default())
        }
    }

    fn line_graph() -> NodeGraph {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(Vec2::new(0.0, 0.0), true, 0.5);
        let b = graph.add_node(Vec2::new(5.0, 0.0), true, 0.5);
        let c = graph.add_node(Vec2::new(10.0, 0.0), true, 0.5);
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();
        graph
    }

    #[test]
    fn first_request_plans_then_throttles() {
        let graph = line_graph();
        let planner = PathPlanner::new(&graph);
        let mut body = Body::new(Vec2::new(-1.0, 0.0), 0.5);
        body.face(Vec2::new(1.0, 0.0));
        let mut follower = PathFollower::new(settings(5));
        let target = Vec2::new(10.0, 0.0);

        assert_eq!(
            follower.request_target(target, &body, &planner, &OpenSpace),
            PlanOutcome::PathFound
        );
        for _ in 0..4 {
            assert_eq!(
                follower.request_target(target, &body, &planner, &OpenSpace),
                PlanOutcome::Throttled
            );
        }
        assert_eq!(
            follower.request_target(target, &body, &planner, &OpenSpace),
            PlanOutcome::PathFound
        );
        assert_eq!(follower.plans(), 2);
    }

    #[test]
    fn follows_path_to_the_last_node() {
        let graph = line_graph();
        let planner = PathPlanner::new(&graph);
        let mut body = Body::new(Vec2::new(-1.0, 0.0), 0.5);
        body.face(Vec2::new(1.0, 0.0));
        let mut follower = PathFollower::new(settings(50));

        follower.request_target(Vec2::new(10.0, 0.0), &body, &planner, &OpenSpace);
        assert_eq!(follower.current_node(), Some(NodeId(0)));

        let mut status = FollowStatus::Following;
        for _ in 0..100 {
            status = follower.follow(&mut body, &planner, &OpenSpace, 0.1, false);
            if status == FollowStatus::Arrived {
                break;
            }
        }
        assert_eq!(status, FollowStatus::Arrived);
        assert_eq!(body.position, Vec2::new(10.0, 0.0));
        assert!(!follower.is_active());
        assert_eq!(follower.forced_replans(), 0);
    }

    #[test]
    fn stuck_body_forces_exactly_one_replan() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(Vec2::new(0.0, 0.0), true, 0.5);
        let b = graph.add_node(Vec2::new(10.0, 0.0), true, 0.5);
        graph.connect(a, b).unwrap();
        let planner = PathPlanner::new(&graph);
        let wall = InvisibleWall { x: 1.0 };

        let mut body = Body::new(Vec2::ZERO, 0.5);
        body.face(Vec2::new(1.0, 0.0));
        let mut follower = PathFollower::new(settings(50));
        follower.request_target(Vec2::new(10.0, 0.0), &body, &planner, &wall);
        assert_eq!(follower.plans(), 1);

        // dt = 0.25 and stuck_duration = 2.0: the first tick anchors progress,
        // the next nine accumulate 2.25 s without moving.
        for _ in 0..9 {
            assert_eq!(
                follower.follow(&mut body, &planner, &wall, 0.25, false),
                FollowStatus::Following
            );
        }
        assert_eq!(body.position, Vec2::ZERO);
        assert_eq!(follower.forced_replans(), 0);

        assert_eq!(
            follower.follow(&mut body, &planner, &wall, 0.25, false),
            FollowStatus::Replanned
        );
        assert_eq!(follower.forced_replans(), 1);
        assert_eq!(follower.plans(), 2);
        assert_eq!(follower.stuck_time(), 0.0);

        follower.follow(&mut body, &planner, &wall, 0.25, false);
        assert_eq!(follower.forced_replans(), 1);
    }

    #[test]
    fn no_path_falls_back_to_direct_movement() {
        let graph = NodeGraph::new();
        let planner = PathPlanner::new(&graph);
        let mut body = Body::new(Vec2::ZERO, 0.5);
        let mut follower = PathFollower::new(settings(50));
        let target = Vec2::new(0.0, 3.0);

        assert_eq!(
            follower.request_target(target, &body, &planner, &OpenSpace),
            PlanOutcome::Direct
        );
        assert_eq!(follower.route(), &Route::Direct { target });

        let mut arrived = false;
        for _ in 0..10 {
            if follower.follow(&mut body, &planner, &OpenSpace, 0.1, false) == FollowStatus::Arrived {
                arrived = true;
                break;
            }
        }
        assert!(arrived);
        assert_eq!(body.position, target);
    }

    #[test]
    fn clear_resets_throttle() {
        let graph = line_graph();
        let planner = PathPlanner::new(&graph);
        let body = Body::new(Vec2::new(-1.0, 0.0), 0.5);
        let mut follower = PathFollower::new(settings(50));
        let target = Vec2::new(10.0, 0.0);

        follower.request_target(target, &body, &planner, &OpenSpace);
        follower.clear();
        assert!(!follower.is_active());
        assert_eq!(
            follower.request_target(target, &body, &planner, &OpenSpace),
            PlanOutcome::PathFound
        );
    }

    #[test]
    fn reorients_only_every_interval_ticks() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(Vec2::new(0.0, 0.0), true, 0.5);
        let b = graph.add_node(Vec2::new(0.0, 3.0), true, 0.5);
        let c = graph.add_node(Vec2::new(30.0, 3.0), true, 0.5);
        graph.connect(a, b).unwrap();
        graph.connect(b, c).unwrap();
        let planner = PathPlanner::new(&graph);

        let mut body = Body::new(Vec2::new(0.0, -1.0), 0.5);
        let mut follower = PathFollower::new(FollowSettings {
            reorient_interval_ticks: 2,
            ..settings(50)
        });
        follower.request_target(Vec2::new(30.0, 3.0), &body, &planner, &OpenSpace);

        // 1.2 units per tick: a on tick 1, the corner at b on tick 4.
        let mut changed = Vec::new();
        for tick in 1..=9 {
            let before = body.heading;
            follower.follow(&mut body, &planner, &OpenSpace, 0.1, false);
            if tick == 4 {
                assert_eq!(body.position, Vec2::new(0.0, 3.0));
            }
            if body.heading != before {
                changed.push(tick);
            }
        }
        // Ticks 2, 4, 6 and 8 reorient; only tick 6 faces a new direction.
        assert_eq!(changed, vec![6]);
        assert_eq!(body.heading, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn held_facing_is_never_reoriented() {
        let graph = line_graph();
        let planner = PathPlanner::new(&graph);
        let mut body = Body::new(Vec2::new(-1.0, 0.0), 0.5);
        let mut follower = PathFollower::new(FollowSettings {
            reorient_interval_ticks: 1,
            ..settings(50)
        });
        follower.request_target(Vec2::new(10.0, 0.0), &body, &planner, &OpenSpace);
        body.face(Vec2::new(0.0, -1.0));

        for _ in 0..5 {
            follower.follow(&mut body, &planner, &OpenSpace, 0.1, true);
        }
        assert_eq!(body.heading, Vec2::new(0.0, -1.0));
        assert!(body.position.x > 0.0);
    }

    #[test]
    fn body_turns_at_limited_rate() {
        let mut body = Body::new(Vec2::ZERO, 0.5);
        assert!(!body.turn_towards(Vec2::new(1.0, 0.0), 45.0));
        assert!(body.turn_towards(Vec2::new(1.0, 0.0), 45.0));
        assert!((body.heading.x - 1.0).abs() < 1e-5);
    }
}
