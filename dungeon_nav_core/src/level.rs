use std::collections::HashMap;

use rand::Rng;
use tracing::{debug, info};

use crate::{
    EntityId, Position,
    agent::{Agent, NavigatingAgent, TickView},
    config::{AgentConfig, LevelConfig},
    generator::{Cell, GenerateError, GeneratedLayout, GridGenerator},
    geometry::Vec2,
    graph::{NodeGraph, NodeGraphBuilder, SampleArea},
    perception::LineOfSightSensor,
    physics::{CollisionQuery, Layer, LayerFilter, TileColliders},
    planner::PathPlanner,
};

/// Collision radius of the player.
pub const PLAYER_RADIUS: f32 = 1.0;

/// Agents are not spawned closer than this many cells (Chebyshev) to the
/// entrance when a farther room exists.
const SPAWN_CLEARANCE: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum LevelError {
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("Position {0:?} is outside the level.")]
    OutOfBounds(Vec2),
    #[error("Cannot place agent inside a wall at {0:?}.")]
    InsideWall(Vec2),
    #[error("Agent ID {0} is already in use.")]
    DuplicateId(EntityId),
    #[error("The level has no room to spawn agents in.")]
    NoRooms,
}

/// A generated dungeon with its collision geometry and navigation graph.
/// Everything here is immutable once built.
#[derive(Debug, Clone)]
pub struct Level {
    layout: GeneratedLayout,
    colliders: TileColliders,
    graph: NodeGraph,
}

impl Level {
    pub fn generate<R: Rng>(config: &LevelConfig, rng: &mut R) -> Result<Self, LevelError> {
        let generator = GridGenerator::new(
            config.grid_dimension,
            config.tile_size,
            config.max_generation_attempts,
        );
        let layout = generator.generate(config.target_path_length, rng)?;
        Ok(Self::from_layout(layout, config))
    }

    /// Builds colliders and the node graph for an existing layout.
    pub fn from_layout(layout: GeneratedLayout, config: &LevelConfig) -> Self {
        let colliders = TileColliders::from_layout(&layout.grid, layout.tile_size);
        let tile = layout.tile_size;
        let area = SampleArea {
            min: Vec2::new(-tile / 2.0, -tile / 2.0),
            width: layout.grid.width() as f32 * tile,
            height: layout.grid.height() as f32 * tile,
        };
        let graph = NodeGraphBuilder::new(
            config.node_spacing,
            config.connection_distance,
            config.node_check_radius,
        )
        .build(area, &colliders);

        info!(
            path_length = layout.path_length,
            attempts = layout.attempts,
            nodes = graph.len(),
            usable = graph.usable_count(),
            edges = graph.edge_count(),
            "level built"
        );

        Self {
            layout,
            colliders,
            graph,
        }
    }

    pub fn layout(&self) -> &GeneratedLayout {
        &self.layout
    }

    pub fn colliders(&self) -> &TileColliders {
        &self.colliders
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    pub fn planner(&self) -> PathPlanner<'_> {
        PathPlanner::new(&self.graph)
    }

    pub fn cell_at(&self, point: Vec2) -> Option<Cell> {
        let cell = self.layout.world_to_cell(point)?;
        self.layout.grid.get(cell.x, cell.y).copied()
    }

    /// Walkable cells other than the entrance.
    pub fn room_cells(&self) -> Vec<Position> {
        self.layout
            .grid
            .positions_where(|cell| cell.is_room() && *cell != Cell::Entrance)
    }
}

/// Outcome of a simulation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    /// The player stands on the exit cell.
    Escaped,
}

/// Ticks every agent against a shared, read-only [`Level`].
pub struct Simulation {
    level: Level,
    tick_seconds: f32,
    player: Option<Vec2>,
    agents: HashMap<EntityId, Box<dyn Agent>>,
    next_entity_id: EntityId,
    ticks: u64,
}

impl Simulation {
    /// Starts a simulation with the player on the entrance.
    pub fn new(level: Level, tick_seconds: f32) -> Self {
        let player = Some(level.layout().spawn_position());
        Simulation {
            level,
            tick_seconds,
            player,
            agents: HashMap::new(),
            next_entity_id: 0,
            ticks: 0,
        }
    }

    pub fn level(&self) -> &Level {
        &self.level
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn player(&self) -> Option<Vec2> {
        self.player
    }

    /// Sets or removes the target agents look for.
    pub fn set_player(&mut self, position: Option<Vec2>) {
        self.player = position;
    }

    /// Moves the player by `offset` unless that would put it inside a wall.
    /// Returns whether the move happened.
    pub fn move_player(&mut self, offset: Vec2) -> bool {
        let Some(current) = self.player else {
            return false;
        };
        let next = current + offset;
        if self.level.cell_at(next).is_none()
            || self
                .level
                .colliders()
                .touches(next, PLAYER_RADIUS, LayerFilter::Only(Layer::Obstacle))
        {
            return false;
        }
        self.player = Some(next);
        true
    }

    /// Generates a unique entity ID for agents.
    pub fn reserve_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    /// Adds an agent at the position its body already holds, which must be
    /// inside the carved dungeon.
    pub fn add_agent(&mut self, agent: Box<dyn Agent>) -> Result<EntityId, SimulationError> {
        let id = agent.id();
        let position = agent.body().position;

        match self.level.cell_at(position) {
            None | Some(Cell::Empty) => return Err(SimulationError::OutOfBounds(position)),
            Some(Cell::Wall) => return Err(SimulationError::InsideWall(position)),
            Some(_) => {}
        }
        if self.agents.contains_key(&id) {
            return Err(SimulationError::DuplicateId(id));
        }

        self.agents.insert(id, agent);
        self.next_entity_id = self.next_entity_id.max(id + 1);
        Ok(id)
    }

    /// Spawns `count` navigating agents in random rooms, preferring rooms away
    /// from the entrance. Each agent gets its own seed drawn from `rng`.
    pub fn spawn_agents<R: Rng>(
        &mut self,
        count: usize,
        config: &AgentConfig,
        rng: &mut R,
    ) -> Result<Vec<EntityId>, SimulationError> {
        let entrance = self.level.layout().entrance;
        let rooms = self.level.room_cells();
        let far: Vec<Position> = rooms
            .iter()
            .copied()
            .filter(|cell| {
                cell.x.abs_diff(entrance.x).max(cell.y.abs_diff(entrance.y)) >= SPAWN_CLEARANCE
            })
            .collect();
        let candidates = if far.is_empty() { rooms } else { far };
        if candidates.is_empty() {
            return Err(SimulationError::NoRooms);
        }

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let cell = candidates[rng.random_range(0..candidates.len())];
            let position = self.level.layout().cell_to_world(cell);
            let id = self.reserve_entity_id();
            let agent = NavigatingAgent::new(id, position, config.clone(), rng.random());
            ids.push(self.add_agent(Box::new(agent))?);
            debug!(agent = id, ?cell, "agent spawned");
        }
        Ok(ids)
    }

    pub fn agent(&self, id: EntityId) -> Option<&dyn Agent> {
        self.agents.get(&id).map(|agent| &**agent)
    }

    /// Agents in ascending ID order.
    pub fn agents(&self) -> Vec<&dyn Agent> {
        let mut agents: Vec<&dyn Agent> = self.agents.values().map(|agent| &**agent).collect();
        agents.sort_by_key(|agent| agent.id());
        agents
    }

    /// Processes one tick for all agents, in ascending ID order.
    pub fn process_tick(&mut self) -> TickOutcome {
        self.ticks += 1;

        let mut agent_ids: Vec<EntityId> = self.agents.keys().copied().collect();
        agent_ids.sort_unstable();

        let sensor = LineOfSightSensor::new(self.level.colliders(), self.player);
        let view = TickView {
            graph: self.level.graph(),
            collisions: self.level.colliders(),
            sensor: &sensor,
            dt: self.tick_seconds,
        };
        for agent_id in agent_ids {
            if let Some(agent) = self.agents.get_mut(&agent_id) {
                agent.tick(&view);
            }
        }

        let escaped = self
            .player
            .and_then(|player| self.level.layout().world_to_cell(player))
            .is_some_and(|cell| cell == self.level.layout().exit);
        if escaped {
            info!(ticks = self.ticks, "player reached the exit");
            TickOutcome::Escaped
        } else {
            TickOutcome::Running
        }
    }
}
