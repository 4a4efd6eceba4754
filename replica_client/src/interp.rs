//! Interpolation.
//!
//! The relay forwards discrete entity updates at the network rate.
//! The client renders at its own rate and eases each displayed value toward
//! the latest received target with exponential decay:
//!
//! `alpha = clamp(1 - exp(-dt / rate), 0, 1)`
//!
//! `rate` is the network send interval, not the frame time, so convergence
//! keeps pace with the sender regardless of frame rate.

use replica_shared::math::{Quat, Vec3};

/// Residual distance below which a buffer settles exactly on its target.
const SETTLE_EPSILON: f32 = 1e-5;

/// A value that can be blended toward another.
pub trait Interpolate: Copy + PartialEq {
    /// Blends `self` toward `to` by `t` in `[0, 1]`.
    fn blend(self, to: Self, t: f32) -> Self;
    /// Non-negative distance between two values.
    fn distance(self, other: Self) -> f32;
}

impl Interpolate for Vec3 {
    fn blend(self, to: Self, t: f32) -> Self {
        self.lerp(to, t)
    }

    fn distance(self, other: Self) -> f32 {
        Vec3::distance(self, other)
    }
}

impl Interpolate for Quat {
    fn blend(self, to: Self, t: f32) -> Self {
        self.slerp(to, t)
    }

    fn distance(self, other: Self) -> f32 {
        self.angle_to(other)
    }
}

/// Current/target pair converging at a fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct InterpBuffer<T> {
    current: T,
    target: T,
    rate: f32,
}

/// Position buffer.
pub type LerpVec3 = InterpBuffer<Vec3>;
/// Orientation buffer.
pub type LerpQuat = InterpBuffer<Quat>;

impl<T: Interpolate> InterpBuffer<T> {
    /// Creates a settled buffer. `rate` is the time constant in seconds.
    pub fn new(value: T, rate: f32) -> Self {
        Self {
            current: value,
            target: value,
            rate: rate.max(f32::EPSILON),
        }
    }

    /// Sets a new target without moving the current value.
    pub fn push(&mut self, target: T) {
        self.target = target;
    }

    /// Sets current and target at once. Only used when an entity first
    /// materializes.
    pub fn snap(&mut self, value: T) {
        self.current = value;
        self.target = value;
    }

    /// Advances toward the target by `dt` seconds and returns the new value.
    pub fn advance(&mut self, dt: f32) -> T {
        if dt.is_nan() || dt <= 0.0 || self.current == self.target {
            return self.current;
        }
        let alpha = self.alpha(dt);
        if alpha >= 1.0 {
            self.current = self.target;
            return self.current;
        }
        let next = self.current.blend(self.target, alpha);
        // A step that rounds to no movement would stall a few ulps short.
        self.current = if next == self.current || next.distance(self.target) <= SETTLE_EPSILON {
            self.target
        } else {
            next
        };
        self.current
    }

    fn alpha(&self, dt: f32) -> f32 {
        let alpha = 1.0 - (-dt / self.rate).exp();
        if alpha.is_nan() {
            1.0
        } else {
            alpha.clamp(0.0, 1.0)
        }
    }

    pub fn current(&self) -> T {
        self.current
    }

    pub fn target(&self) -> T {
        self.target
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// True once current equals target.
    pub fn is_settled(&self) -> bool {
        self.current == self.target
    }
}
