//! Physics abstraction.
//!
//! Gameplay systems only touch a controlled body through [`CharacterBody`].
//! [`KinematicCapsule`] is a deterministic stand-in used by the headless
//! client and tests: gravity, horizontal drive and a flat ground plane.

use crate::math::Vec3;

/// Physics parameters.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsConfig {
    pub gravity: Vec3,
    /// Height of the ground plane.
    pub ground_height: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            ground_height: 0.0,
        }
    }
}

/// A physics-driven character as seen by gameplay code.
///
/// All methods must be called from the fixed tick.
pub trait CharacterBody: Send {
    fn position(&self) -> Vec3;
    fn linear_velocity(&self) -> Vec3;
    fn set_linear_velocity(&mut self, v: Vec3);
    /// True while the body rests on ground.
    fn is_grounded(&self) -> bool;
    /// Moves the body instantly, clearing its velocity.
    fn teleport(&mut self, position: Vec3);
    /// Advances the body by one fixed step.
    fn step(&mut self, dt_sec: f32);
}

/// Capsule with no collision other than the ground plane.
#[derive(Debug, Clone)]
pub struct KinematicCapsule {
    config: PhysicsConfig,
    position: Vec3,
    velocity: Vec3,
    grounded: bool,
}

impl KinematicCapsule {
    pub fn new(config: PhysicsConfig, position: Vec3) -> Self {
        let grounded = position.y <= config.ground_height;
        Self {
            config,
            position,
            velocity: Vec3::ZERO,
            grounded,
        }
    }

    /// Sets the horizontal velocity, keeping the vertical component.
    pub fn drive(&mut self, horizontal: Vec3) {
        self.velocity = Vec3::new(horizontal.x, self.velocity.y, horizontal.z);
    }
}

impl CharacterBody for KinematicCapsule {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn linear_velocity(&self) -> Vec3 {
        self.velocity
    }

    fn set_linear_velocity(&mut self, v: Vec3) {
        self.velocity = v;
        if v.y > 0.0 {
            self.grounded = false;
        }
    }

    fn is_grounded(&self) -> bool {
        self.grounded
    }

    fn teleport(&mut self, position: Vec3) {
        self.position = position;
        self.velocity = Vec3::ZERO;
        self.grounded = position.y <= self.config.ground_height;
    }

    fn step(&mut self, dt_sec: f32) {
        if dt_sec <= 0.0 {
            return;
        }
        if !self.grounded {
            self.velocity = self.velocity + self.config.gravity * dt_sec;
        }
        self.position = self.position + self.velocity * dt_sec;

        if self.position.y <= self.config.ground_height {
            self.position.y = self.config.ground_height;
            if self.velocity.y < 0.0 {
                self.velocity.y = 0.0;
            }
            self.grounded = self.velocity.y <= 0.0;
        } else {
            self.grounded = false;
        }
    }
}
