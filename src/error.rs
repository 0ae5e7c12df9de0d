//! Error and warning types
//!
//! Fatal conditions are typed errors propagated with `?`. The two expected
//! non-fatal conditions (unknown descriptor tags, missing colliders during
//! event resolution) never surface as errors: unknown tags become a
//! [`Warning`], missing colliders are skipped by the collision bridge.

use crate::render::VisualHandle;
use crate::sim::physics::ColliderHandle;
use crate::sim::store::EntityHandle;

/// Malformed persisted scene text.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("scene is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("entity {index} is malformed: {reason}")]
    InvalidEntity { index: usize, reason: String },
}

/// Invariant violations in the entity store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("collider {0:?} is already tracked by another entity")]
    DuplicateCollider(ColliderHandle),
    #[error("visual {0:?} is already tracked by another entity")]
    DuplicateVisual(VisualHandle),
    #[error("entity {0:?} is not in the store")]
    MissingEntity(EntityHandle),
}

/// Physics engine failures. The world is not trusted after one of these.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PhysicsError {
    #[error("physics step {step} failed: {reason}")]
    StepFailed { step: u64, reason: String },
}

/// Errors surfaced by the simulation engine.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Scene file I/O failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Audio engine failures (instrument loading only; note playback is
/// fire-and-forget).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    #[error("audio output unavailable: {0}")]
    Unavailable(String),
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),
}

/// Non-fatal conditions recorded while parsing or spawning a scene.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Warning {
    /// Descriptor tag not recognized; the entity is kept in the scene but
    /// never spawned.
    #[error("entity {index}: unknown entity type {kind:?}")]
    UnknownEntityType { index: usize, kind: String },
}
