use rand::{SeedableRng, rngs::StdRng};
use tracing::debug;

use crate::{
    EntityId,
    behavior::{AgentState, BehaviorMachine, Intent},
    config::AgentConfig,
    geometry::Vec2,
    graph::NodeGraph,
    navigator::{Body, FollowSettings, PathFollower},
    perception::{TargetSensor, ViewCone},
    physics::CollisionQuery,
    planner::PathPlanner,
};

/// Read-only view of the world handed to an agent each tick.
pub struct TickView<'a> {
    pub graph: &'a NodeGraph,
    pub collisions: &'a dyn CollisionQuery,
    pub sensor: &'a dyn TargetSensor,
    /// Seconds simulated by this tick.
    pub dt: f32,
}

/// Trait defining the behavior of an agent.
/// Agents sense, decide and move in a single `tick` call.
pub trait Agent {
    /// Returns the unique ID of this agent.
    fn id(&self) -> EntityId;

    fn body(&self) -> &Body;

    fn state(&self) -> AgentState;

    /// Advances the agent by one tick. `&mut self` lets the agent keep its
    /// behaviour timers and route between ticks.
    fn tick(&mut self, view: &TickView<'_>);
}

/// An agent that wanders the level, chases the target through the node graph
/// when it sees it, and after losing it walks to where it was last seen and
/// searches there.
#[derive(Debug)]
pub struct NavigatingAgent {
    id: EntityId,
    body: Body,
    cone: ViewCone,
    behavior: BehaviorMachine,
    follower: PathFollower,
    rotation_speed: f32,
    wander_speed: f32,
    rng: StdRng,
}

impl NavigatingAgent {
    pub fn new(id: EntityId, position: Vec2, config: AgentConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut body = Body::new(position, config.body_radius);
        let cone = ViewCone::new(config.fov_degrees, config.view_distance);
        let follower = PathFollower::new(FollowSettings::from(&config));
        let behavior = BehaviorMachine::new(config.clone(), &mut rng);
        body.face(behavior.direction());

        let mut agent = Self {
            id,
            body,
            cone,
            behavior,
            follower,
            rotation_speed: config.rotation_speed,
            wander_speed: config.wander_speed,
            rng,
        };
        agent.cone.set_aim_direction(agent.body.heading);
        agent
    }

    /// Turns the body and the view cone to `direction`.
    pub fn face(&mut self, direction: Vec2) {
        self.body.face(direction);
        self.cone.set_aim_direction(self.body.heading);
    }

    pub fn cone(&self) -> &ViewCone {
        &self.cone
    }

    pub fn follower(&self) -> &PathFollower {
        &self.follower
    }

    pub fn behavior(&self) -> &BehaviorMachine {
        &self.behavior
    }

    fn chase(&mut self, target: Vec2, view: &TickView<'_>) {
        let planner = PathPlanner::new(view.graph);
        self.body.face(target - self.body.position);
        self.follower
            .request_target(target, &self.body, &planner, view.collisions);
        self.follower
            .follow(&mut self.body, &planner, view.collisions, view.dt, true);
        self.cone.set_aim_direction(target - self.body.position);
    }

    /// Keeps following the chase route to the last sighting, facing the way
    /// it walks.
    fn investigate(&mut self, target: Vec2, view: &TickView<'_>) {
        let planner = PathPlanner::new(view.graph);
        self.follower
            .request_target(target, &self.body, &planner, view.collisions);
        self.follower
            .follow(&mut self.body, &planner, view.collisions, view.dt, false);
    }

    fn wander(&mut self, direction: Vec2, view: &TickView<'_>) {
        let aligned = self
            .body
            .turn_towards(direction, self.rotation_speed * view.dt);
        if aligned {
            let step = self.wander_speed * view.dt;
            let destination = self.body.position + direction * step;
            self.body
                .step_towards(destination, step, view.collisions);
        }
    }
}

impl Agent for NavigatingAgent {
    fn id(&self) -> EntityId {
        self.id
    }

    fn body(&self) -> &Body {
        &self.body
    }

    fn state(&self) -> AgentState {
        self.behavior.state()
    }

    fn tick(&mut self, view: &TickView<'_>) {
        let sighting = view.sensor.is_target_in_fov(self.body.position, &self.cone);
        let before = self.behavior.state();
        let intent = self.behavior.update(
            sighting,
            self.body.position,
            &mut self.cone,
            view.dt,
            &mut self.rng,
        );
        if self.behavior.state() != before {
            debug!(agent = self.id, from = ?before, to = ?self.behavior.state(), "state change");
        }

        match intent {
            Intent::Chase { target } => {
                self.chase(target, view);
                return;
            }
            Intent::Investigate { target } => self.investigate(target, view),
            Intent::Wander { direction } => {
                self.follower.clear();
                self.wander(direction, view);
            }
            Intent::Turn { degrees } => {
                self.follower.clear();
                self.body.rotate(degrees);
            }
            Intent::Hold => self.follower.clear(),
        }
        self.cone.set_aim_direction(self.body.heading);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        perception::Sighting,
        physics::{ColliderId, LayerFilter},
    };

    struct OpenSpace;

    impl CollisionQuery for OpenSpace {
        fn overlap_circle(&self, _: Vec2, _: f32, _: LayerFilter) -> Vec<ColliderId> {
            Vec::new()
        }

        fn linecast(&self, _: Vec2, _: Vec2, _: LayerFilter) -> bool {
            false
        }
    }

    struct FixedSensor(Option<Vec2>);

    impl TargetSensor for FixedSensor {
        fn is_target_in_fov(&self, _: Vec2, _: &ViewCone) -> Option<Sighting> {
            self.0.map(|position| Sighting { position })
        }
    }

    fn view<'a>(graph: &'a NodeGraph, sensor: &'a FixedSensor) -> TickView<'a> {
        TickView {
            graph,
            collisions: &OpenSpace,
            sensor,
            dt: 0.1,
        }
    }

    #[test]
    fn wandering_agent_moves_along_its_direction() {
        let graph = NodeGraph::new();
        let sensor = FixedSensor(None);
        let mut agent = NavigatingAgent::new(0, Vec2::ZERO, AgentConfig::default(), 7);
        let direction = agent.behavior().direction();

        agent.tick(&view(&graph, &sensor));
        assert_eq!(agent.state(), AgentState::Wandering);
        let moved = agent.body().position;
        assert!(moved.length() > 0.0);
        assert!(moved.normalized().dot(direction) > 0.99);
        assert!(agent.cone().aim().dot(agent.body().heading) > 0.999);
    }

    #[test]
    fn sighting_starts_chase_and_narrows_cone() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(Vec2::new(0.0, 1.0), true, 0.5);
        let b = graph.add_node(Vec2::new(0.0, 20.0), true, 0.5);
        graph.connect(a, b).unwrap();

        let target = Vec2::new(0.0, 20.0);
        let sensor = FixedSensor(Some(target));
        let config = AgentConfig::default();
        let mut agent = NavigatingAgent::new(3, Vec2::ZERO, config.clone(), 1);

        agent.tick(&view(&graph, &sensor));
        assert_eq!(agent.state(), AgentState::Attack);
        assert!(agent.cone().attack_mode());
        assert_eq!(agent.cone().fov_degrees(), config.attack_fov_degrees);
        assert!(agent.follower().is_active());
        assert_eq!(agent.body().heading, Vec2::UP);

        for _ in 0..30 {
            agent.tick(&view(&graph, &sensor));
        }
        assert!(agent.body().position.distance(target) < 1.0);
    }

    #[test]
    fn lost_target_is_followed_to_last_sighting() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(Vec2::new(0.0, 1.0), true, 0.5);
        let b = graph.add_node(Vec2::new(0.0, 20.0), true, 0.5);
        graph.connect(a, b).unwrap();
        let last_seen = Vec2::new(0.0, 20.0);
        let seen = FixedSensor(Some(last_seen));
        let unseen = FixedSensor(None);
        let mut agent = NavigatingAgent::new(0, Vec2::ZERO, AgentConfig::default(), 3);

        agent.tick(&view(&graph, &seen));
        let at_loss = agent.body().position;

        for _ in 0..15 {
            agent.tick(&view(&graph, &unseen));
        }
        assert_eq!(agent.state(), AgentState::WaitingToSearch);
        assert!(agent.follower().is_active());
        assert!(agent.body().position.distance(last_seen) < at_loss.distance(last_seen) - 10.0);
        assert!(agent.body().position.distance(last_seen) < 2.0);
        assert_eq!(agent.body().heading, Vec2::UP);

        let mut ticks = 0;
        while agent.state() == AgentState::WaitingToSearch {
            agent.tick(&view(&graph, &unseen));
            ticks += 1;
            assert!(ticks < 30, "wait never ended");
        }
        assert_eq!(agent.state(), AgentState::Searching);
        assert!(!agent.follower().is_active());
    }
}
