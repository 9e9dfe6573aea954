use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    Position,
    geometry::Vec2,
    map::{Grid, NEIGHBOR_OFFSETS_8},
};

/// Smallest grid that leaves an interior ring around the entrance.
pub const MIN_GRID_SIZE: usize = 5;
/// Shortest walk that can place entrance, VIP room and exit on distinct cells.
pub const MIN_PATH_LENGTH: usize = 2;
/// Consecutive rejected attempts before the walk is shortened by one step.
pub const SHRINK_AFTER_FAILURES: usize = 3;

/// The static type of a cell in the dungeon layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Empty,
    Entrance,
    Exit,
    Wall,
    OpenRoom,
    VipRoom,
}

impl Cell {
    /// Whether the cell was carved by the walk (walls never overwrite these).
    pub fn is_room(self) -> bool {
        matches!(
            self,
            Cell::Entrance | Cell::Exit | Cell::OpenRoom | Cell::VipRoom
        )
    }
}

/// One unit move of the carving walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    Up,
    Down,
    Left,
    Right,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Up, Step::Down, Step::Left, Step::Right];

    /// Grid offset of the step. `Up` increases `y`.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Step::Up => (0, 1),
            Step::Down => (0, -1),
            Step::Left => (-1, 0),
            Step::Right => (1, 0),
        }
    }

    pub fn opposite(self) -> Step {
        match self {
            Step::Up => Step::Down,
            Step::Down => Step::Up,
            Step::Left => Step::Right,
            Step::Right => Step::Left,
        }
    }

    pub fn from_token(token: char) -> Option<Step> {
        match token.to_ascii_lowercase() {
            'u' => Some(Step::Up),
            'd' => Some(Step::Down),
            'l' => Some(Step::Left),
            'r' => Some(Step::Right),
            _ => None,
        }
    }

    /// Parses a string of `u`/`d`/`l`/`r` tokens. Whitespace is ignored and
    /// any other token is logged and skipped.
    pub fn parse_tokens(tokens: &str) -> Vec<Step> {
        tokens
            .chars()
            .filter(|c| !c.is_whitespace())
            .filter_map(|c| {
                let step = Step::from_token(c);
                if step.is_none() {
                    warn!(token = %c, "skipping invalid direction token");
                }
                step
            })
            .collect()
    }
}

/// Produces `length` random steps, never directly reversing the previous one.
pub fn random_steps<R: Rng>(length: usize, rng: &mut R) -> Vec<Step> {
    let mut steps = Vec::with_capacity(length);
    let mut previous: Option<Step> = None;

    while steps.len() < length {
        let step = Step::ALL[rng.random_range(0..Step::ALL.len())];
        if previous.is_some_and(|prev| prev.opposite() == step) {
            continue;
        }
        steps.push(step);
        previous = Some(step);
    }

    steps
}

/// Why a single carving attempt was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarveFailure {
    /// Step `step` would leave the interior of the grid.
    OutOfBounds { step: usize },
    /// Step `step` would walk back onto the entrance.
    EntranceRevisited { step: usize },
    /// The VIP room, entrance and exit are not three distinct cells.
    Coincident,
    /// The grid cannot hold a walled walk at all.
    GridTooSmall { size: usize },
}

/// Errors surfaced by [`GridGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerateError {
    #[error("Grid dimension {size} is too small, need at least {min}")]
    GridTooSmall { size: usize, min: usize },
    #[error("Target path length {length} is below the minimum of {min}")]
    InvalidPathLength { length: usize, min: usize },
    #[error("Layout generation failed after {attempts} attempts (last path length {path_length})")]
    GenerationFailed { attempts: usize, path_length: usize },
}

/// A finished dungeon layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedLayout {
    pub grid: Grid<Cell>,
    pub entrance: Position,
    pub exit: Position,
    pub vip_room: Position,
    /// Cells visited by the walk, in order (entrance excluded, exit last).
    pub path: Vec<Position>,
    /// Walk length that finally succeeded; may be shorter than requested.
    pub path_length: usize,
    /// Number of attempts it took, including the successful one.
    pub attempts: usize,
    pub tile_size: f32,
}

impl GeneratedLayout {
    /// World-space centre of a cell.
    pub fn cell_to_world(&self, cell: Position) -> Vec2 {
        cell_to_world(cell, self.tile_size)
    }

    /// Cell containing a world-space point, if it lies on the grid.
    pub fn world_to_cell(&self, point: Vec2) -> Option<Position> {
        let x = (point.x / self.tile_size).round();
        let y = (point.y / self.tile_size).round();
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x as usize, y as usize);
        self.grid.is_valid(x, y).then_some(Position { x, y })
    }

    /// Where the player (and the node sampler) start.
    pub fn spawn_position(&self) -> Vec2 {
        self.cell_to_world(self.entrance)
    }
}

/// World-space centre of `cell` for square tiles of side `tile_size`.
pub fn cell_to_world(cell: Position, tile_size: f32) -> Vec2 {
    Vec2::new(cell.x as f32 * tile_size, cell.y as f32 * tile_size)
}

/// Carves dungeon layouts with a self-correcting random walk.
#[derive(Debug, Clone)]
pub struct GridGenerator {
    size: usize,
    tile_size: f32,
    max_attempts: usize,
}

impl GridGenerator {
    pub fn new(size: usize, tile_size: f32, max_attempts: usize) -> Self {
        Self {
            size,
            tile_size,
            max_attempts,
        }
    }

    /// The entrance always sits on the centre cell.
    pub fn entrance(&self) -> Position {
        Position {
            x: self.size / 2,
            y: self.size / 2,
        }
    }

    /// Generates a layout, restarting with a fresh walk whenever an attempt is
    /// rejected and shortening the walk after repeated rejections.
    pub fn generate<R: Rng>(
        &self,
        target_path_length: usize,
        rng: &mut R,
    ) -> Result<GeneratedLayout, GenerateError> {
        if self.size < MIN_GRID_SIZE {
            return Err(GenerateError::GridTooSmall {
                size: self.size,
                min: MIN_GRID_SIZE,
            });
        }
        if target_path_length < MIN_PATH_LENGTH {
            return Err(GenerateError::InvalidPathLength {
                length: target_path_length,
                min: MIN_PATH_LENGTH,
            });
        }

        let mut path_length = target_path_length;
        let mut consecutive_failures = 0;

        for attempt in 1..=self.max_attempts {
            let steps = random_steps(path_length, rng);
            match self.carve(&steps) {
                Ok(mut layout) => {
                    layout.attempts = attempt;
                    debug!(attempt, path_length, "layout accepted");
                    return Ok(layout);
                }
                Err(failure) => {
                    debug!(attempt, path_length, ?failure, "layout rejected");
                    consecutive_failures += 1;
                    if consecutive_failures >= SHRINK_AFTER_FAILURES
                        && path_length > MIN_PATH_LENGTH
                    {
                        path_length -= 1;
                        consecutive_failures = 0;
                    }
                }
            }
        }

        Err(GenerateError::GenerationFailed {
            attempts: self.max_attempts,
            path_length,
        })
    }

    /// Runs a single carving attempt over a fixed step sequence.
    pub fn carve(&self, steps: &[Step]) -> Result<GeneratedLayout, CarveFailure> {
        if self.size < MIN_GRID_SIZE {
            return Err(CarveFailure::GridTooSmall { size: self.size });
        }
        let mut grid: Grid<Cell> = Grid::square(self.size);
        let entrance = self.entrance();
        grid[entrance] = Cell::Entrance;

        let vip_step = steps.len() * 3 / 4;
        let mut current = entrance;
        let mut vip_room = entrance;
        let mut path = Vec::with_capacity(steps.len());

        for (index, step) in steps.iter().enumerate() {
            let (dx, dy) = step.delta();
            let next = self
                .interior_offset(current, dx, dy)
                .ok_or(CarveFailure::OutOfBounds { step: index })?;
            if next == entrance {
                return Err(CarveFailure::EntranceRevisited { step: index });
            }

            grid[next] = Cell::OpenRoom;
            stamp_walls(&mut grid, next);
            current = next;
            path.push(next);

            if index + 1 == vip_step {
                vip_room = next;
            }
        }

        if vip_room == entrance || current == entrance || current == vip_room {
            return Err(CarveFailure::Coincident);
        }

        grid[current] = Cell::Exit;
        grid[vip_room] = Cell::VipRoom;
        stamp_walls(&mut grid, vip_room);
        stamp_walls(&mut grid, entrance);

        Ok(GeneratedLayout {
            grid,
            entrance,
            exit: current,
            vip_room,
            path,
            path_length: steps.len(),
            attempts: 1,
            tile_size: self.tile_size,
        })
    }

    // The outer ring is reserved for walls.
    fn interior_offset(&self, from: Position, dx: isize, dy: isize) -> Option<Position> {
        let x = from.x.checked_add_signed(dx)?;
        let y = from.y.checked_add_signed(dy)?;
        let inside = 1..self.size - 1;
        (inside.contains(&x) && inside.contains(&y)).then_some(Position { x, y })
    }
}

fn stamp_walls(grid: &mut Grid<Cell>, around: Position) {
    for (dx, dy) in NEIGHBOR_OFFSETS_8 {
        if let Some(neighbor) = grid.offset(around, dx, dy) {
            if !grid[neighbor].is_room() {
                grid[neighbor] = Cell::Wall;
            }
        }
    }
}
