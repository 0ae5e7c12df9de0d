//! Marble Machine - a 2D sandbox where falling balls play pitched blocks
//!
//! Core modules:
//! - `sim`: Entity store, scene descriptors, physics seam, collision bridge
//!   and the simulation engine that ties them together
//! - `sandbox`: Scene editing (place/undo/load/save) over a simulation
//! - `audio`: Note playback engines
//! - `render`: Visual nodes and the rendering surface seam
//! - `persistence`: Scene files on disk
//! - `settings`: Data-driven simulation and audio configuration

pub mod audio;
pub mod error;
pub mod persistence;
pub mod render;
pub mod sandbox;
pub mod settings;
pub mod sim;

#[cfg(target_arch = "wasm32")]
pub mod web;

pub use audio::{AudioEngine, NoteEvent, NoteLog, SharedAudio, SilentAudio};
pub use error::{AudioError, PersistError, PhysicsError, SceneError, SimError, StoreError, Warning};
pub use render::{NodeTable, RenderSurface, SharedSurface, Visual, VisualHandle, VisualShape};
pub use sandbox::Sandbox;
pub use settings::Settings;
pub use sim::{
    BallDescriptor, BlockDescriptor, CollisionBridge, Entity, EntityDescriptor, EntityHandle,
    EntityStore, RapierBackend, Scene, ScriptedBackend, Simulation,
};

/// Simulation configuration constants
pub mod consts {
    /// Fixed simulation timestep (60 Hz, one step per rendered frame)
    pub const SIM_DT: f32 = 1.0 / 60.0;
    /// Maximum substeps per frame to prevent spiral of death
    pub const MAX_SUBSTEPS: u32 = 8;

    /// World gravity (pixels/s², +y is down)
    pub const GRAVITY: [f32; 2] = [0.0, 100.0];

    /// Impacts at or below this body speed are silent
    pub const MIN_VELOCITY_THRESHOLD: f32 = 2.0;
    /// Note velocity band for collision strikes (inclusive)
    pub const NOTE_VELOCITY_MIN: u8 = 80;
    pub const NOTE_VELOCITY_MAX: u8 = 99;
    /// Collision note length in seconds
    pub const NOTE_DURATION: f32 = 0.2;

    /// Ball defaults
    pub const BALL_RADIUS: f32 = 20.0;

    /// Block defaults
    pub const BLOCK_WIDTH: f32 = 100.0;
    pub const BLOCK_HEIGHT: f32 = 20.0;
    /// Middle C
    pub const BLOCK_PITCH: u8 = 60;
    /// Blocks bounce balls back at full speed
    pub const BLOCK_RESTITUTION: f32 = 1.0;

    /// Highest MIDI note number
    pub const MAX_PITCH: u8 = 127;

    pub const DEFAULT_SCENE_NAME: &str = "Untitled Scene";
    pub const SCENE_FILE_NAME: &str = "scene.json";
}
