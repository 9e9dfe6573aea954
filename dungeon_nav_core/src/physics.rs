//! Collision queries consumed by graph construction, planning and perception.
//!
//! The core never owns a physics engine; it only asks two questions of one:
//! which colliders overlap a circle, and whether a segment is blocked.
//! [`TileColliders`] answers both from a generated layout, with one square
//! collider per non-empty cell.

use serde::{Deserialize, Serialize};

use crate::{
    generator::{Cell, cell_to_world},
    geometry::Vec2,
    map::Grid,
};

/// Collision layer of a collider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    /// Walkable geometry (room floors). Used for the "is anything here" touch test.
    Floor,
    /// Geometry that blocks movement and sight.
    Obstacle,
}

/// Which layers a query considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFilter {
    All,
    Only(Layer),
}

impl LayerFilter {
    #[inline]
    pub fn accepts(self, layer: Layer) -> bool {
        match self {
            LayerFilter::All => true,
            LayerFilter::Only(only) => only == layer,
        }
    }
}

/// Handle of a collider returned by overlap queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderId(pub usize);

/// The query contract a physics backend must satisfy.
pub trait CollisionQuery {
    /// All colliders on `filter` layers touching the circle.
    fn overlap_circle(&self, center: Vec2, radius: f32, filter: LayerFilter) -> Vec<ColliderId>;

    /// Returns `true` if the segment `from -> to` hits a collider on `filter` layers.
    fn linecast(&self, from: Vec2, to: Vec2, filter: LayerFilter) -> bool;

    /// Convenience wrapper over [`CollisionQuery::overlap_circle`].
    fn touches(&self, center: Vec2, radius: f32, filter: LayerFilter) -> bool {
        !self.overlap_circle(center, radius, filter).is_empty()
    }
}

/// An axis-aligned box collider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub id: ColliderId,
    pub min: Vec2,
    pub max: Vec2,
    pub layer: Layer,
}

impl Collider {
    /// Circle/box overlap; touching the boundary counts.
    pub fn overlaps_circle(&self, center: Vec2, radius: f32) -> bool {
        let closest = Vec2::new(
            center.x.clamp(self.min.x, self.max.x),
            center.y.clamp(self.min.y, self.max.y),
        );
        let offset = center - closest;
        offset.dot(offset) <= radius * radius
    }

    /// Segment/box intersection using the slab method.
    pub fn intersects_segment(&self, from: Vec2, to: Vec2) -> bool {
        let delta = to - from;
        let mut t_enter = 0.0_f32;
        let mut t_exit = 1.0_f32;

        for (origin, dir, lo, hi) in [
            (from.x, delta.x, self.min.x, self.max.x),
            (from.y, delta.y, self.min.y, self.max.y),
        ] {
            if dir.abs() <= f32::EPSILON {
                if origin < lo || origin > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / dir;
            let mut near = (lo - origin) * inv;
            let mut far = (hi - origin) * inv;
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            t_enter = t_enter.max(near);
            t_exit = t_exit.min(far);
            if t_enter > t_exit {
                return false;
            }
        }

        true
    }
}

/// Grid-backed collision world: walls are obstacles, carved rooms are floor.
#[derive(Debug, Clone)]
pub struct TileColliders {
    tile_size: f32,
    cells: Grid<Option<Collider>>,
}

impl TileColliders {
    pub fn from_layout(layout: &Grid<Cell>, tile_size: f32) -> Self {
        let half = tile_size / 2.0;
        let mut cells: Grid<Option<Collider>> = Grid::new(layout.width(), layout.height());
        let mut next_id = 0;

        for (pos, cell) in layout.enumerate() {
            let layer = match cell {
                Cell::Empty => continue,
                Cell::Wall => Layer::Obstacle,
                _ => Layer::Floor,
            };
            let centre = cell_to_world(pos, tile_size);
            cells[pos] = Some(Collider {
                id: ColliderId(next_id),
                min: centre - Vec2::new(half, half),
                max: centre + Vec2::new(half, half),
                layer,
            });
            next_id += 1;
        }

        Self { tile_size, cells }
    }

    /// Colliders whose cells intersect the world-space box `min..=max`.
    fn colliders_within(&self, min: Vec2, max: Vec2) -> impl Iterator<Item = &Collider> {
        let x_range = self.cell_span(min.x, max.x, self.cells.width());
        let y_range = self.cell_span(min.y, max.y, self.cells.height());
        y_range
            .flat_map(move |y| x_range.clone().map(move |x| (x, y)))
            .filter_map(|(x, y)| self.cells.get(x, y).and_then(Option::as_ref))
    }

    fn cell_span(&self, lo: f32, hi: f32, len: usize) -> std::ops::Range<usize> {
        let half = self.tile_size / 2.0;
        let first = ((lo + half) / self.tile_size).floor();
        let last = ((hi + half) / self.tile_size).floor();
        if len == 0 || last < 0.0 || first > (len - 1) as f32 {
            return 0..0;
        }
        let first = first.max(0.0) as usize;
        let last = (last as usize).min(len - 1);
        first..last + 1
    }
}

impl CollisionQuery for TileColliders {
    fn overlap_circle(&self, center: Vec2, radius: f32, filter: LayerFilter) -> Vec<ColliderId> {
        let reach = Vec2::new(radius, radius);
        self.colliders_within(center - reach, center + reach)
            .filter(|c| filter.accepts(c.layer) && c.overlaps_circle(center, radius))
            .map(|c| c.id)
            .collect()
    }

    fn linecast(&self, from: Vec2, to: Vec2, filter: LayerFilter) -> bool {
        let min = Vec2::new(from.x.min(to.x), from.y.min(to.y));
        let max = Vec2::new(from.x.max(to.x), from.y.max(to.y));
        self.colliders_within(min, max)
            .any(|c| filter.accepts(c.layer) && c.intersects_segment(from, to))
    }
}
