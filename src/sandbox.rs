//! Scene editing over a running simulation
//!
//! The sandbox owns the authoritative [`Scene`]. Every edit goes through the
//! scene first and then reloads the simulation from it, so the world on
//! screen is always `load_scene(scene, tick)`:
//! - place: append, reload at the current tick
//! - undo: drop the last entity, reload at tick 0
//! - stop: pause, reload at tick 0
//!
//! Frame time is turned into fixed steps with an accumulator, capped at
//! `MAX_SUBSTEPS` per frame.

use std::path::Path;

use crate::audio::SharedAudio;
use crate::consts::MAX_SUBSTEPS;
use crate::error::{SimError, Warning};
use crate::persistence;
use crate::render::SharedSurface;
use crate::settings::Settings;
use crate::sim::{EntityDescriptor, PhysicsBackend, RapierBackend, Scene, Simulation};

/// Largest frame delta accepted by [`Sandbox::update`] (seconds)
const MAX_FRAME_DT: f32 = 0.1;

pub struct Sandbox<B: PhysicsBackend = RapierBackend> {
    scene: Scene,
    sim: Simulation<B>,
    playing: bool,
    accumulator: f32,
}

impl Sandbox<RapierBackend> {
    pub fn new(
        settings: Settings,
        surface: SharedSurface,
        audio: SharedAudio,
        scene: Scene,
    ) -> Result<Self, SimError> {
        Self::with_backend(RapierBackend, settings, surface, audio, scene)
    }
}

impl<B: PhysicsBackend> Sandbox<B> {
    /// Paused sandbox showing `scene` at tick 0
    pub fn with_backend(
        backend: B,
        settings: Settings,
        surface: SharedSurface,
        audio: SharedAudio,
        scene: Scene,
    ) -> Result<Self, SimError> {
        let sim = Simulation::init(backend, settings, surface, audio, &scene)?;
        Ok(Self {
            scene,
            sim,
            playing: false,
            accumulator: 0.0,
        })
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn simulation(&self) -> &Simulation<B> {
        &self.sim
    }

    pub fn current_tick(&self) -> u64 {
        self.sim.current_tick()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Add an entity and rebuild the world at the current tick. Invalid
    /// descriptors are rejected before the scene changes.
    pub fn place(&mut self, descriptor: impl Into<EntityDescriptor>) -> Result<(), SimError> {
        self.scene.append(descriptor)?;
        let tick = self.sim.current_tick();
        self.sim.load_scene(&self.scene, tick)
    }

    /// Remove the last placed entity and rewind to tick 0. No-op on an empty
    /// scene.
    pub fn undo(&mut self) -> Result<Option<EntityDescriptor>, SimError> {
        let Some(removed) = self.scene.truncate() else {
            return Ok(None);
        };
        self.sim.load_scene(&self.scene, 0)?;
        Ok(Some(removed))
    }

    pub fn play(&mut self) {
        if !self.playing {
            log::info!("Play from tick {}", self.sim.current_tick());
        }
        self.playing = true;
    }

    pub fn pause(&mut self) {
        if self.playing {
            log::info!("Paused at tick {}", self.sim.current_tick());
        }
        self.playing = false;
    }

    /// Pause and rewind to tick 0.
    pub fn stop(&mut self) -> Result<(), SimError> {
        self.playing = false;
        self.accumulator = 0.0;
        self.sim.load_scene(&self.scene, 0)
    }

    /// Run fixed steps for `dt` seconds of frame time. Returns the number of
    /// steps taken. A physics failure pauses the sandbox.
    pub fn update(&mut self, dt: f32) -> Result<u32, SimError> {
        if !self.playing {
            return Ok(0);
        }
        let step = self.sim.settings().timestep;
        self.accumulator += dt.min(MAX_FRAME_DT);

        let mut substeps = 0;
        while self.accumulator >= step && substeps < MAX_SUBSTEPS {
            if let Err(e) = self.sim.tick(1) {
                self.playing = false;
                return Err(e);
            }
            self.accumulator -= step;
            substeps += 1;
        }
        if substeps == MAX_SUBSTEPS {
            // Drop the backlog we can never catch up on
            self.accumulator = self.accumulator.min(step * MAX_SUBSTEPS as f32);
        }
        Ok(substeps)
    }

    /// Current scene as pretty JSON
    pub fn save_text(&self) -> String {
        self.scene.serialize()
    }

    /// Replace the scene with parsed `text` and rewind. On a parse error the
    /// current scene and world are left untouched.
    pub fn load_text(&mut self, text: &str) -> Result<Vec<Warning>, SimError> {
        let (scene, warnings) = Scene::deserialize_with_warnings(text)?;
        self.replace_scene(scene)?;
        Ok(warnings)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        persistence::save_scene(path, &self.scene)?;
        Ok(())
    }

    /// Load a scene file. Same failure guarantees as [`Sandbox::load_text`].
    pub fn load_from(&mut self, path: impl AsRef<Path>) -> Result<Vec<Warning>, SimError> {
        let (scene, warnings) = persistence::load_scene(path)?;
        self.replace_scene(scene)?;
        Ok(warnings)
    }

    fn replace_scene(&mut self, scene: Scene) -> Result<(), SimError> {
        self.scene = scene;
        self.playing = false;
        self.accumulator = 0.0;
        self.sim.load_scene(&self.scene, 0)
    }
}
