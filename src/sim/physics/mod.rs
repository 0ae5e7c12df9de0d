//! Physics engine seam
//!
//! The simulation treats the physics engine as an opaque stepper behind
//! [`PhysicsWorld`]. A [`PhysicsBackend`] builds fresh worlds, one per reset.
//!
//! Backends:
//! - [`RapierBackend`]: Rapier 2D rigid bodies
//! - [`ScriptedBackend`]: kinematic integrator with scripted collisions and
//!   velocities, for tests that must not depend on solver numerics

pub mod rapier;
pub mod scripted;

use glam::Vec2;
use serde::{Deserialize, Serialize};

pub use self::rapier::{RapierBackend, RapierWorld};
pub use scripted::{Script, ScriptedBackend, ScriptedWorld};
use crate::error::PhysicsError;

/// Opaque rigid body key, valid within one world instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodyHandle(pub u64);

/// Opaque collider key, valid within one world instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColliderHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Moved by gravity and contacts
    Dynamic,
    /// Never moves
    Fixed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySpec {
    pub kind: BodyKind,
    pub position: Vec2,
    pub rotation: f32,
}

impl BodySpec {
    pub fn dynamic(position: Vec2) -> Self {
        Self {
            kind: BodyKind::Dynamic,
            position,
            rotation: 0.0,
        }
    }

    pub fn fixed(position: Vec2, rotation: f32) -> Self {
        Self {
            kind: BodyKind::Fixed,
            position,
            rotation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColliderShape {
    Ball { radius: f32 },
    Cuboid { half_width: f32, half_height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColliderSpec {
    pub shape: ColliderShape,
    /// World placement; ignored for colliders attached to a body
    pub position: Vec2,
    pub rotation: f32,
    pub restitution: f32,
    /// Report collision start/end events for this collider
    pub active_events: bool,
}

impl ColliderSpec {
    pub fn ball(radius: f32) -> Self {
        Self {
            shape: ColliderShape::Ball { radius },
            position: Vec2::ZERO,
            rotation: 0.0,
            restitution: 0.0,
            active_events: true,
        }
    }

    pub fn cuboid(width: f32, height: f32) -> Self {
        Self {
            shape: ColliderShape::Cuboid {
                half_width: width / 2.0,
                half_height: height / 2.0,
            },
            position: Vec2::ZERO,
            rotation: 0.0,
            restitution: 0.0,
            active_events: true,
        }
    }

    pub fn at(mut self, position: Vec2, rotation: f32) -> Self {
        self.position = position;
        self.rotation = rotation;
        self
    }

    pub fn restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }
}

/// Contact start/stop between two colliders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionEvent {
    pub collider1: ColliderHandle,
    pub collider2: ColliderHandle,
    /// true when contact began, false when it ended
    pub started: bool,
}

impl CollisionEvent {
    pub fn started(collider1: ColliderHandle, collider2: ColliderHandle) -> Self {
        Self {
            collider1,
            collider2,
            started: true,
        }
    }

    pub fn stopped(collider1: ColliderHandle, collider2: ColliderHandle) -> Self {
        Self {
            collider1,
            collider2,
            started: false,
        }
    }
}

/// One live physics world.
///
/// Callers [`release`](PhysicsWorld::release) a world before replacing it.
pub trait PhysicsWorld {
    fn create_body(&mut self, spec: &BodySpec) -> BodyHandle;

    /// Create a collider, attached to `parent` when given (the body then
    /// drives its transform) or placed in the world at `spec.position`.
    fn create_collider(&mut self, spec: &ColliderSpec, parent: Option<BodyHandle>)
    -> ColliderHandle;

    /// Returns false when the collider was already gone.
    fn remove_collider(&mut self, collider: ColliderHandle) -> bool;

    /// Remove a body and every collider attached to it.
    fn remove_body(&mut self, body: BodyHandle) -> bool;

    /// Free every body, collider and pending event. The world stays usable
    /// but empty.
    fn release(&mut self);

    /// Advance one fixed step.
    fn step(&mut self) -> Result<(), PhysicsError>;

    /// Collision events produced since the last drain, in emission order.
    fn drain_collision_events(&mut self) -> Vec<CollisionEvent>;

    fn contains_collider(&self, collider: ColliderHandle) -> bool;

    /// Body a collider is attached to
    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle>;

    fn body_translation(&self, body: BodyHandle) -> Option<Vec2>;

    fn body_rotation(&self, body: BodyHandle) -> Option<f32>;

    fn body_linvel(&self, body: BodyHandle) -> Option<Vec2>;

    /// Number of steps taken by this world
    fn steps(&self) -> u64;
}

/// Factory for physics worlds.
pub trait PhysicsBackend {
    type World: PhysicsWorld;

    fn create_world(&self, gravity: Vec2, timestep: f32) -> Self::World;
}
