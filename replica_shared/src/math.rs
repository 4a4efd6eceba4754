//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics. Y is up.

use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const UP: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Builds a vector from a wire array. Returns `None` on wrong arity or
    /// non-finite components.
    pub fn from_slice(v: &[f32]) -> Option<Self> {
        match v {
            [x, y, z] if v.iter().all(|c| c.is_finite()) => Some(Self::new(*x, *y, *z)),
            _ => None,
        }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn length(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    /// Same vector with the vertical component zeroed.
    pub fn horizontal(self) -> Self {
        Self::new(self.x, 0.0, self.z)
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

/// Unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Builds a quaternion from a wire array `[x, y, z, w]`.
    ///
    /// Values already of unit length are kept bit-exact; others are
    /// normalized. Returns `None` on wrong arity, non-finite components or
    /// zero length.
    pub fn from_slice(v: &[f32]) -> Option<Self> {
        match v {
            [x, y, z, w] if v.iter().all(|c| c.is_finite()) => {
                let q = Self::new(*x, *y, *z, *w);
                if (q.dot(q) - 1.0).abs() <= 1e-4 {
                    Some(q)
                } else {
                    q.try_normalize()
                }
            }
            _ => None,
        }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Rotation of `angle` radians about the world up axis.
    pub fn from_yaw(angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self::new(0.0, s, 0.0, c)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn try_normalize(self) -> Option<Self> {
        let len = self.dot(self).sqrt();
        if len <= f32::EPSILON || !len.is_finite() {
            return None;
        }
        Some(Self::new(self.x / len, self.y / len, self.z / len, self.w / len))
    }

    pub fn normalize(self) -> Self {
        self.try_normalize().unwrap_or(Self::IDENTITY)
    }

    /// Angle in radians of the rotation taking `self` to `other`, in `[0, PI]`.
    ///
    /// Uses the chord/sum form, which stays exact (zero) for identical inputs
    /// where `acos` of the dot product would not.
    pub fn angle_to(self, other: Self) -> f32 {
        let other = if self.dot(other) < 0.0 { -other } else { other };
        let diff = Self::new(self.x - other.x, self.y - other.y, self.z - other.z, self.w - other.w);
        let sum = Self::new(self.x + other.x, self.y + other.y, self.z + other.z, self.w + other.w);
        4.0 * diff.dot(diff).sqrt().atan2(sum.dot(sum).sqrt())
    }

    /// Shortest-path spherical interpolation.
    ///
    /// Falls back to normalized lerp when the inputs are nearly parallel.
    pub fn slerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mut to = to;
        let mut cos = self.dot(to);
        if cos < 0.0 {
            to = -to;
            cos = -cos;
        }

        if cos > 0.9995 {
            return Self::new(
                self.x + (to.x - self.x) * t,
                self.y + (to.y - self.y) * t,
                self.z + (to.z - self.z) * t,
                self.w + (to.w - self.w) * t,
            )
            .normalize();
        }

        let theta = cos.acos();
        let sin = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin;
        let b = (t * theta).sin() / sin;
        Self::new(
            self.x * a + to.x * b,
            self.y * a + to.y * b,
            self.z * a + to.z * b,
            self.w * a + to.w * b,
        )
    }

    /// Rotates a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let uv = cross(u, v);
        let uuv = cross(u, uv);
        v + (uv * self.w + uuv) * 2.0
    }
}

impl Neg for Quat {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, -self.w)
    }
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn wire_arrays_reject_wrong_arity() {
        assert!(Vec3::from_slice(&[1.0, 2.0]).is_none());
        assert!(Vec3::from_slice(&[1.0, f32::NAN, 3.0]).is_none());
        assert!(Quat::from_slice(&[0.0, 0.0, 1.0]).is_none());
        assert!(Quat::from_slice(&[0.0, 0.0, 0.0, 0.0]).is_none());
        assert_eq!(Quat::from_slice(&[0.0, 0.0, 0.0, 2.0]), Some(Quat::IDENTITY));
    }

    #[test]
    fn slerp_takes_shortest_path() {
        let a = Quat::from_yaw(0.1);
        // Same rotation as yaw(-0.1) but in the opposite hemisphere.
        let b = -Quat::from_yaw(-0.1);
        let mid = a.slerp(b, 0.5);
        assert!(mid.angle_to(Quat::IDENTITY) < 1e-3);
    }

    #[test]
    fn slerp_endpoints() {
        let a = Quat::from_yaw(0.0);
        let b = Quat::from_yaw(std::f32::consts::FRAC_PI_2);
        assert!(a.slerp(b, 0.0).angle_to(a) < 1e-4);
        assert!(a.slerp(b, 1.0).angle_to(b) < 1e-4);
        let half = a.slerp(b, 0.5);
        assert!((half.angle_to(a) - std::f32::consts::FRAC_PI_4).abs() < 1e-3);
    }

    #[test]
    fn yaw_rotates_forward_vector() {
        let q = Quat::from_yaw(std::f32::consts::FRAC_PI_2);
        let v = q.rotate(Vec3::new(0.0, 0.0, -1.0));
        assert!((v.x + 1.0).abs() < 1e-5);
        assert!(v.z.abs() < 1e-5);
    }
}
