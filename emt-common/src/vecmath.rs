use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Squared length below which a vector is treated as degenerate.
const DEGENERATE_LENGTH_SQ: f64 = 1e-24;

/// An immutable 2D vector.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    /// Unit vector pointing "up", the normal of a flat membrane.
    pub const UP: Vec2 = Vec2 { x: 0.0, y: 1.0 };

    /// Creates a new Vec2.
    #[inline(always)]
    pub const fn new(x: f64, y: f64) -> Self {
        Vec2 { x, y }
    }

    /// Creates a zero vector.
    #[inline(always)]
    pub const fn zero() -> Self {
        Vec2 { x: 0.0, y: 0.0 }
    }

    #[inline(always)]
    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    #[inline(always)]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Returns a unit vector, or `(1, 0)` when the length is (nearly) zero.
    ///
    /// Used where some direction is required, e.g. separating two nuclei
    /// that sit on top of each other.
    #[inline(always)]
    pub fn normalize(self) -> Self {
        let len_sq = self.length_squared();
        if len_sq > DEGENERATE_LENGTH_SQ {
            self * (1.0 / len_sq.sqrt())
        } else {
            Vec2::new(1.0, 0.0)
        }
    }

    /// Returns a normalized version of the vector (unit vector).
    /// Returns a zero vector if the original vector's length is zero.
    #[inline(always)]
    pub fn normalize_or_zero(self) -> Self {
        let len_sq = self.length_squared();
        if len_sq > DEGENERATE_LENGTH_SQ {
            self * (1.0 / len_sq.sqrt())
        } else {
            Vec2::zero()
        }
    }

    #[inline(always)]
    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// z-component of the 3D cross product.
    #[inline(always)]
    pub fn cross(self, other: Vec2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    #[inline(always)]
    pub fn distance_squared(self, other: Vec2) -> f64 {
        (self - other).length_squared()
    }

    #[inline(always)]
    pub fn distance(self, other: Vec2) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Rotates by -90 degrees. For the upward normal this yields `(1, 0)`,
    /// the direction of increasing arc length.
    #[inline(always)]
    pub fn perp_cw(self) -> Self {
        Vec2::new(self.y, -self.x)
    }

    /// Linear interpolation, `t = 0` gives `self`.
    #[inline(always)]
    pub fn lerp(self, other: Vec2, t: f64) -> Self {
        self + (other - self) * t
    }

    #[inline(always)]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y }
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self { x: self.x - other.x, y: self.y - other.y }
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, other: Self) {
        self.x -= other.x;
        self.y -= other.y;
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar }
    }
}

impl Div<f64> for Vec2 {
    type Output = Self;
    fn div(self, scalar: f64) -> Self {
        Self { x: self.x / scalar, y: self.y / scalar }
    }
}

impl Neg for Vec2 {
    type Output = Self;
    fn neg(self) -> Self {
        Self { x: -self.x, y: -self.y }
    }
}
