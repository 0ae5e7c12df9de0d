//! Simulation core
//!
//! Everything that decides what the world looks like after N ticks lives
//! here. The module must stay deterministic:
//! - Fixed timestep only
//! - Seeded RNG only (reseeded on every reset)
//! - Stable iteration order (store slot order == spawn order)
//! - Rendering and audio only through their trait seams

pub mod collision;
pub mod physics;
pub mod scene;
pub mod simulation;
pub mod store;

pub use collision::CollisionBridge;
pub use physics::{
    BodyHandle, BodyKind, BodySpec, ColliderHandle, ColliderShape, ColliderSpec, CollisionEvent,
    PhysicsBackend, PhysicsWorld, RapierBackend, RapierWorld, Script, ScriptedBackend,
    ScriptedWorld,
};
pub use scene::{BallDescriptor, BlockDescriptor, EntityDescriptor, Scene, UnknownDescriptor};
pub use simulation::Simulation;
pub use store::{Entity, EntityHandle, EntityStore, ListenerId, StoreEvent};
