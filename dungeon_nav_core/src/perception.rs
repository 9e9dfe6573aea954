use serde::{Deserialize, Serialize};

use crate::{
    geometry::Vec2,
    physics::{CollisionQuery, Layer, LayerFilter},
};

/// An agent's field of view: the control surface the behaviour layer drives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewCone {
    aim: Vec2,
    fov_degrees: f32,
    view_distance: f32,
    default_fov_degrees: f32,
    default_view_distance: f32,
    attack_mode: bool,
}

impl ViewCone {
    /// A cone aimed up the y axis. The given values become the defaults
    /// restored by [`ViewCone::reset_to_default`].
    pub fn new(fov_degrees: f32, view_distance: f32) -> Self {
        Self {
            aim: Vec2::UP,
            fov_degrees,
            view_distance,
            default_fov_degrees: fov_degrees,
            default_view_distance: view_distance,
            attack_mode: false,
        }
    }

    pub fn aim(&self) -> Vec2 {
        self.aim
    }

    pub fn fov_degrees(&self) -> f32 {
        self.fov_degrees
    }

    pub fn view_distance(&self) -> f32 {
        self.view_distance
    }

    pub fn attack_mode(&self) -> bool {
        self.attack_mode
    }

    /// Zero directions are ignored so the cone never loses its heading.
    pub fn set_aim_direction(&mut self, direction: Vec2) {
        let direction = direction.normalized();
        if direction != Vec2::ZERO {
            self.aim = direction;
        }
    }

    pub fn set_fov(&mut self, degrees: f32) {
        self.fov_degrees = degrees;
    }

    pub fn set_view_distance(&mut self, distance: f32) {
        self.view_distance = distance;
    }

    pub fn set_attack_mode(&mut self, attack: bool) {
        self.attack_mode = attack;
    }

    pub fn reset_to_default(&mut self) {
        self.fov_degrees = self.default_fov_degrees;
        self.view_distance = self.default_view_distance;
        self.attack_mode = false;
    }

    /// Whether `point` lies inside the cone seen from `origin`, ignoring occlusion.
    pub fn contains(&self, origin: Vec2, point: Vec2) -> bool {
        let offset = point - origin;
        let distance = offset.length();
        if distance >= self.view_distance {
            return false;
        }
        if distance <= f32::EPSILON {
            return true;
        }
        self.aim.angle_between_degrees(offset) < self.fov_degrees / 2.0
    }
}

/// A positive perception result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sighting {
    pub position: Vec2,
}

/// The perception oracle: reports the tracked target when it is visible.
pub trait TargetSensor {
    fn is_target_in_fov(&self, origin: Vec2, cone: &ViewCone) -> Option<Sighting>;
}

/// Sees a single target point when it is inside the cone and no obstacle
/// blocks the line between them. With no target set it never sees anything.
pub struct LineOfSightSensor<'a, C: ?Sized> {
    collisions: &'a C,
    target: Option<Vec2>,
}

impl<'a, C: CollisionQuery + ?Sized> LineOfSightSensor<'a, C> {
    pub fn new(collisions: &'a C, target: Option<Vec2>) -> Self {
        Self { collisions, target }
    }
}

impl<C: CollisionQuery + ?Sized> TargetSensor for LineOfSightSensor<'_, C> {
    fn is_target_in_fov(&self, origin: Vec2, cone: &ViewCone) -> Option<Sighting> {
        let target = self.target?;
        if !cone.contains(origin, target) {
            return None;
        }
        if self
            .collisions
            .linecast(origin, target, LayerFilter::Only(Layer::Obstacle))
        {
            return None;
        }
        Some(Sighting { position: target })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generator::Cell, map::Grid, physics::TileColliders};

    #[test]
    fn cone_checks_distance_and_angle() {
        let mut cone = ViewCone::new(90.0, 10.0);
        let origin = Vec2::ZERO;
        assert!(cone.contains(origin, Vec2::new(0.0, 5.0)));
        assert!(cone.contains(origin, Vec2::new(3.0, 5.0)));
        assert!(!cone.contains(origin, Vec2::new(5.0, 1.0)));
        assert!(!cone.contains(origin, Vec2::new(0.0, 10.0)));
        assert!(!cone.contains(origin, Vec2::new(0.0, -5.0)));

        cone.set_aim_direction(Vec2::new(1.0, 0.0));
        assert!(cone.contains(origin, Vec2::new(5.0, 1.0)));
        cone.set_aim_direction(Vec2::ZERO);
        assert_eq!(cone.aim(), Vec2::new(1.0, 0.0));
    }

    #[test]
    fn attack_overrides_reset_to_defaults() {
        let mut cone = ViewCone::new(90.0, 7.0);
        cone.set_fov(45.0);
        cone.set_view_distance(17.0);
        cone.set_attack_mode(true);
        assert_eq!(cone.fov_degrees(), 45.0);
        assert!(cone.attack_mode());

        cone.reset_to_default();
        assert_eq!(cone.fov_degrees(), 90.0);
        assert_eq!(cone.view_distance(), 7.0);
        assert!(!cone.attack_mode());
    }

    #[test]
    fn walls_hide_the_target() {
        let mut grid: Grid<Cell> = Grid::new(3, 3);
        grid[(1, 1)] = Cell::Wall;
        let world = TileColliders::from_layout(&grid, 10.0);
        let cone = ViewCone::new(120.0, 50.0);

        let hidden = LineOfSightSensor::new(&world, Some(Vec2::new(10.0, 20.0)));
        assert_eq!(hidden.is_target_in_fov(Vec2::new(10.0, 0.0), &cone), None);

        let visible = LineOfSightSensor::new(&world, Some(Vec2::new(0.0, 20.0)));
        assert_eq!(
            visible.is_target_in_fov(Vec2::new(0.0, 0.0), &cone),
            Some(Sighting {
                position: Vec2::new(0.0, 20.0)
            })
        );
    }

    #[test]
    fn missing_target_is_never_seen() {
        let grid: Grid<Cell> = Grid::square(3);
        let world = TileColliders::from_layout(&grid, 10.0);
        let sensor = LineOfSightSensor::new(&world, None);
        assert_eq!(sensor.is_target_in_fov(Vec2::ZERO, &ViewCone::new(360.0, 1e6)), None);
    }
}
