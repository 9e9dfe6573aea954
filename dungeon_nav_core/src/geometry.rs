use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// A point or direction in continuous world space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };
    pub const UP: Vec2 = Vec2 { x: 0.0, y: 1.0 };

    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    #[inline]
    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    #[inline]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    #[inline]
    pub fn distance(self, other: Vec2) -> f32 {
        (other - self).length()
    }

    /// Returns the unit vector pointing the same way, or zero for a zero vector.
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len > f32::EPSILON {
            Vec2::new(self.x / len, self.y / len)
        } else {
            Vec2::ZERO
        }
    }

    /// Unit vector for an angle measured counter-clockwise from the +x axis.
    pub fn from_angle_degrees(degrees: f32) -> Vec2 {
        let radians = degrees.to_radians();
        Vec2::new(radians.cos(), radians.sin())
    }

    /// Angle of this vector counter-clockwise from the +x axis, in degrees.
    pub fn angle_degrees(self) -> f32 {
        self.y.atan2(self.x).to_degrees()
    }

    /// Rotates counter-clockwise by `degrees`.
    pub fn rotated_degrees(self, degrees: f32) -> Vec2 {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Vec2::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }

    /// Unsigned angle between two directions in `[0, 180]` degrees.
    ///
    /// Returns 0 if either vector is zero.
    pub fn angle_between_degrees(self, other: Vec2) -> f32 {
        let a = self.normalized();
        let b = other.normalized();
        if a == Vec2::ZERO || b == Vec2::ZERO {
            return 0.0;
        }
        a.dot(b).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Signed angle from `self` to `other` in `(-180, 180]` degrees,
    /// positive when `other` is counter-clockwise of `self`.
    pub fn signed_angle_to_degrees(self, other: Vec2) -> f32 {
        let cross = self.x * other.y - self.y * other.x;
        cross.atan2(self.dot(other)).to_degrees()
    }

    /// Moves from `self` towards `target` by at most `max_delta`, never overshooting.
    pub fn move_towards(self, target: Vec2, max_delta: f32) -> Vec2 {
        let offset = target - self;
        let dist = offset.length();
        if dist <= max_delta || dist <= f32::EPSILON {
            target
        } else {
            self + offset * (max_delta / dist)
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    #[inline]
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    #[inline]
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    #[inline]
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;

    #[inline]
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}
