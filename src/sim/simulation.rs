//! Simulation engine
//!
//! Owns the physics world, the entity store and the collision bridge, and
//! drives them at a fixed timestep. Scene edits never patch a running world:
//! the caller hands a scene and a tick to [`Simulation::load_scene`], which
//! throws the world away, respawns the scene and steps forward to that tick.
//! The world is therefore a pure function of `(scene, tick, settings)`.
//!
//! Per step, strictly in this order:
//! 1. physics step
//! 2. body transforms copied into entities, entity transforms into visuals
//! 3. collision events drained and handed to the bridge

use glam::Vec2;

use super::collision::CollisionBridge;
use super::physics::{BodySpec, ColliderSpec, PhysicsBackend, PhysicsWorld, RapierBackend};
use super::scene::{BallDescriptor, BlockDescriptor, EntityDescriptor, Scene};
use super::store::{Entity, EntityHandle, EntityStore, StoreEvent};
use crate::audio::{SharedAudio, SilentAudio};
use crate::consts::BLOCK_RESTITUTION;
use crate::error::{SimError, Warning};
use crate::render::{BALL_COLOUR, SharedSurface, Visual, VisualHandle, VisualShape, pitch_to_colour};
use crate::settings::Settings;

pub struct Simulation<B: PhysicsBackend = RapierBackend> {
    backend: B,
    settings: Settings,
    physics: B::World,
    store: EntityStore,
    bridge: CollisionBridge,
    audio: SharedAudio,
    surface: SharedSurface,
    current_tick: u64,
    next_visual: u64,
    /// Non-fatal problems from the last spawn
    warnings: Vec<Warning>,
}

impl Simulation<RapierBackend> {
    /// Rapier-backed simulation
    pub fn with_rapier(
        settings: Settings,
        surface: SharedSurface,
        audio: SharedAudio,
        scene: &Scene,
    ) -> Result<Self, SimError> {
        Self::init(RapierBackend, settings, surface, audio, scene)
    }
}

impl<B: PhysicsBackend> Simulation<B> {
    /// Build a fresh world, wire the store to the render surface and spawn
    /// `scene` at tick 0.
    pub fn init(
        backend: B,
        settings: Settings,
        surface: SharedSurface,
        audio: SharedAudio,
        scene: &Scene,
    ) -> Result<Self, SimError> {
        if let Err(e) = audio.borrow_mut().load(&settings.instrument) {
            log::warn!("Audio engine: {e}");
        }

        let mut store = EntityStore::new();
        let sink = surface.clone();
        store.subscribe(move |event, _, entity| {
            let Some(visual) = &entity.visual else {
                return;
            };
            let mut surface = sink.borrow_mut();
            match event {
                StoreEvent::Added => surface.add_node(visual, entity.position, entity.rotation),
                StoreEvent::Removed => surface.remove_node(visual.handle),
            }
        });

        let physics = backend.create_world(settings.gravity, settings.timestep);
        let bridge = CollisionBridge::new(&settings);

        let mut sim = Self {
            backend,
            settings,
            physics,
            store,
            bridge,
            audio,
            surface,
            current_tick: 0,
            next_visual: 0,
            warnings: Vec::new(),
        };
        sim.spawn_scene(scene)?;
        log::info!(
            "Simulation ready: {:?} with {} entities",
            scene.name,
            sim.store.len()
        );
        Ok(sim)
    }

    /// Rebuild the world from `scene` and fast-forward to `target_tick`.
    ///
    /// Catch-up steps are silent unless `Settings::replay_audio` is set; the
    /// note velocity stream still advances so later notes match a live run.
    pub fn load_scene(&mut self, scene: &Scene, target_tick: u64) -> Result<(), SimError> {
        log::info!(
            "Loading {:?} ({} entities) at tick {target_tick}",
            scene.name,
            scene.len()
        );
        self.reset();
        self.spawn_scene(scene)?;
        self.advance(target_tick, self.settings.replay_audio)
    }

    /// Advance `n` fixed steps.
    pub fn tick(&mut self, n: u64) -> Result<(), SimError> {
        self.advance(n, true)
    }

    fn reset(&mut self) {
        log::debug!("Reset at tick {}", self.current_tick);
        // Detach every entity while the old handles are still meaningful
        self.store.clear();
        self.physics.release();
        self.physics = self
            .backend
            .create_world(self.settings.gravity, self.settings.timestep);
        self.bridge.reset();
        self.current_tick = 0;
        self.next_visual = 0;
        self.warnings.clear();
    }

    fn spawn_scene(&mut self, scene: &Scene) -> Result<(), SimError> {
        for (index, descriptor) in scene.entities().iter().enumerate() {
            self.spawn(index, descriptor)?;
        }
        Ok(())
    }

    /// Spawn one descriptor. Unknown kinds are skipped with a warning.
    pub fn spawn(
        &mut self,
        index: usize,
        descriptor: &EntityDescriptor,
    ) -> Result<Option<EntityHandle>, SimError> {
        match descriptor {
            EntityDescriptor::Ball(ball) => self.spawn_ball(ball).map(Some),
            EntityDescriptor::Block(block) => self.spawn_block(block).map(Some),
            EntityDescriptor::Unknown(unknown) => {
                let warning = Warning::UnknownEntityType {
                    index,
                    kind: unknown.kind.clone(),
                };
                log::warn!("Skipping entity: {warning}");
                self.warnings.push(warning);
                Ok(None)
            }
        }
    }

    /// Dynamic body + ball collider + white circle
    pub fn spawn_ball(&mut self, ball: &BallDescriptor) -> Result<EntityHandle, SimError> {
        let body = self.physics.create_body(&BodySpec::dynamic(ball.position));
        let collider = self
            .physics
            .create_collider(&ColliderSpec::ball(ball.radius), Some(body));
        let visual = Visual {
            handle: self.next_visual_handle(),
            shape: VisualShape::Circle {
                radius: ball.radius,
            },
            colour: BALL_COLOUR,
        };

        self.track(Entity {
            position: ball.position,
            rotation: 0.0,
            visual: Some(visual),
            body: Some(body),
            collider: Some(collider),
            pitch: None,
        })
    }

    /// Parentless fixed cuboid collider + pitch-coloured rectangle
    pub fn spawn_block(&mut self, block: &BlockDescriptor) -> Result<EntityHandle, SimError> {
        let spec = ColliderSpec::cuboid(block.width, block.height)
            .at(block.position, block.rotation)
            .restitution(BLOCK_RESTITUTION);
        let collider = self.physics.create_collider(&spec, None);
        let visual = Visual {
            handle: self.next_visual_handle(),
            shape: VisualShape::Rect {
                width: block.width,
                height: block.height,
            },
            colour: pitch_to_colour(block.pitch),
        };

        self.track(Entity {
            position: block.position,
            rotation: block.rotation,
            visual: Some(visual),
            body: None,
            collider: Some(collider),
            pitch: Some(block.pitch),
        })
    }

    /// Register a freshly spawned entity. A rejected entity takes its
    /// physics objects with it.
    fn track(&mut self, entity: Entity) -> Result<EntityHandle, SimError> {
        let (body, collider) = (entity.body, entity.collider);
        match self.store.add(entity) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                // A duplicate key belongs to the entity already stored
                let owned = collider.filter(|c| self.store.entity_by_collider(*c).is_none());
                if let Some(collider) = owned {
                    self.physics.remove_collider(collider);
                }
                if let Some(body) = body {
                    self.physics.remove_body(body);
                }
                log::warn!("Spawn rolled back: {e}");
                Err(e.into())
            }
        }
    }

    fn next_visual_handle(&mut self) -> VisualHandle {
        let handle = VisualHandle(self.next_visual);
        self.next_visual += 1;
        handle
    }

    fn advance(&mut self, steps: u64, audible: bool) -> Result<(), SimError> {
        for _ in 0..steps {
            self.physics.step()?;
            self.current_tick += 1;
            self.sync_transforms();

            let events = self.physics.drain_collision_events();
            if events.is_empty() {
                continue;
            }
            if audible {
                let mut audio = self.audio.borrow_mut();
                self.bridge
                    .process(&events, &self.physics, &self.store, &mut *audio);
            } else {
                self.bridge
                    .process(&events, &self.physics, &self.store, &mut SilentAudio);
            }
        }
        Ok(())
    }

    /// Body -> entity -> visual
    fn sync_transforms(&mut self) {
        let mut surface = self.surface.borrow_mut();
        for (_, entity) in self.store.iter_mut() {
            if let Some(body) = entity.body {
                if let Some(position) = self.physics.body_translation(body) {
                    entity.position = position;
                }
                if let Some(rotation) = self.physics.body_rotation(body) {
                    entity.rotation = rotation;
                }
            }
            if let Some(visual) = &entity.visual {
                surface.set_transform(visual.handle, entity.position, entity.rotation);
            }
        }
    }

    pub fn current_tick(&self) -> u64 {
        self.current_tick
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn entity_count(&self) -> usize {
        self.store.len()
    }

    /// Entity positions in spawn order
    pub fn positions(&self) -> Vec<Vec2> {
        self.store.iter().map(|(_, entity)| entity.position).collect()
    }

    /// Warnings from the most recent spawn
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn physics(&self) -> &B::World {
        &self.physics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use serde_json::Map;

    use crate::audio::NoteLog;
    use crate::error::{PhysicsError, StoreError};
    use crate::render::NodeTable;
    use crate::sim::physics::{
        BodyHandle, ColliderHandle, CollisionEvent, Script, ScriptedBackend, ScriptedWorld,
    };
    use crate::sim::scene::UnknownDescriptor;

    struct Harness {
        nodes: Rc<RefCell<NodeTable>>,
        notes: NoteLog,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                nodes: NodeTable::shared(),
                notes: NoteLog::new(),
            }
        }

        fn surface(&self) -> SharedSurface {
            self.nodes.clone()
        }

        fn audio(&self) -> SharedAudio {
            Rc::new(RefCell::new(self.notes.clone()))
        }

        fn scripted(&self, settings: Settings, script: Script, scene: &Scene) -> Simulation<ScriptedBackend> {
            Simulation::init(
                ScriptedBackend::new(script),
                settings,
                self.surface(),
                self.audio(),
                scene,
            )
            .unwrap()
        }

        fn rapier(&self, scene: &Scene) -> Simulation {
            Simulation::with_rapier(Settings::default(), self.surface(), self.audio(), scene).unwrap()
        }
    }

    /// Ball above a pitch-67 block: ball is body 0 / collider 0, block is
    /// collider 1 in every fresh world
    fn ball_over_block() -> Scene {
        let mut scene = Scene::new("drop");
        scene.append(BallDescriptor::new(Vec2::new(0.0, 0.0), 15.0)).unwrap();
        scene.append(BlockDescriptor::new(Vec2::new(0.0, 120.0), 67)).unwrap();
        scene
    }

    fn velocities(log: &NoteLog) -> Vec<u8> {
        log.notes().iter().map(|n| n.velocity).collect()
    }

    #[test]
    fn test_ball_falls_straight_down() {
        let h = Harness::new();
        let mut scene = Scene::default();
        scene.append(BallDescriptor::new(Vec2::new(100.0, 100.0), 15.0)).unwrap();
        let mut sim = h.rapier(&scene);

        sim.tick(1).unwrap();

        let pos = sim.positions()[0];
        assert!(pos.y > 100.0);
        assert_eq!(pos.x, 100.0);
        // Visual follows the body
        let node = *h.nodes.borrow().get(VisualHandle(0)).unwrap();
        assert_eq!(node.position, pos);
    }

    #[test]
    fn test_load_scene_is_deterministic() {
        let mut scene = ball_over_block();
        scene.append(BallDescriptor::new(Vec2::new(30.0, -60.0), 10.0)).unwrap();
        scene
            .append(BlockDescriptor::new(Vec2::new(60.0, 200.0), 40).rotated(0.4))
            .unwrap();

        let a = Harness::new();
        let b = Harness::new();
        let mut first = a.rapier(&Scene::default());
        let mut second = b.rapier(&scene);
        first.load_scene(&scene, 180).unwrap();
        second.tick(25).unwrap();
        second.load_scene(&scene, 180).unwrap();

        let bits = |sim: &Simulation| -> Vec<(u32, u32)> {
            sim.positions()
                .iter()
                .map(|p| (p.x.to_bits(), p.y.to_bits()))
                .collect()
        };
        assert_eq!(bits(&first), bits(&second));
        assert_eq!(first.current_tick(), 180);
    }

    #[test]
    fn test_tick_is_monotonic() {
        let h = Harness::new();
        let mut sim = h.scripted(Settings::default(), Script::new(), &ball_over_block());
        assert_eq!(sim.current_tick(), 0);

        sim.tick(1).unwrap();
        sim.tick(4).unwrap();
        assert_eq!(sim.current_tick(), 5);
        sim.tick(0).unwrap();
        assert_eq!(sim.current_tick(), 5);

        sim.load_scene(&ball_over_block(), 12).unwrap();
        assert_eq!(sim.current_tick(), 12);
        assert_eq!(sim.physics().steps(), 12);
    }

    #[test]
    fn test_block_impact_plays_once() {
        // Fast impact at step 30 (speed 50), resting contact at step 40
        let script = Script::new()
            .collision_at(30, ColliderHandle(0), ColliderHandle(1))
            .velocity_at(40, BodyHandle(0), Vec2::ZERO)
            .collision_at(40, ColliderHandle(0), ColliderHandle(1));
        let h = Harness::new();
        let mut sim = h.scripted(Settings::default(), script, &ball_over_block());

        sim.tick(60).unwrap();

        let notes = h.notes.notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch, 67);
        assert!((80..=99).contains(&notes[0].velocity));
        assert_eq!(notes[0].duration, 0.2);
    }

    #[test]
    fn test_threshold_boundary() {
        let settings = Settings {
            gravity: Vec2::ZERO,
            ..Settings::default()
        };
        let at = settings.velocity_threshold;
        let script = Script::new()
            .velocity_at(1, BodyHandle(0), Vec2::new(0.0, at))
            .collision_at(1, ColliderHandle(0), ColliderHandle(1))
            .velocity_at(2, BodyHandle(0), Vec2::new(0.0, at + 0.5))
            .collision_at(2, ColliderHandle(0), ColliderHandle(1));
        let h = Harness::new();
        let mut sim = h.scripted(settings, script, &ball_over_block());

        sim.tick(1).unwrap();
        assert!(h.notes.is_empty());
        sim.tick(1).unwrap();
        assert_eq!(h.notes.len(), 1);
    }

    #[test]
    fn test_unpitched_balls_are_silent() {
        let mut scene = Scene::default();
        scene.append(BallDescriptor::new(Vec2::ZERO, 10.0)).unwrap();
        scene.append(BallDescriptor::new(Vec2::new(0.0, 50.0), 10.0)).unwrap();
        let script = Script::new()
            .velocity_at(3, BodyHandle(0), Vec2::new(0.0, 500.0))
            .velocity_at(3, BodyHandle(1), Vec2::new(0.0, -500.0))
            .collision_at(3, ColliderHandle(0), ColliderHandle(1));
        let h = Harness::new();
        let mut sim = h.scripted(Settings::default(), script, &scene);

        sim.tick(10).unwrap();
        assert!(h.notes.is_empty());
    }

    #[test]
    fn test_destroyed_collider_is_skipped() {
        let script = Script::new()
            .collision_at(5, ColliderHandle(0), ColliderHandle(1))
            .remove_collider_at(5, ColliderHandle(1));
        let h = Harness::new();
        let mut sim = h.scripted(Settings::default(), script, &ball_over_block());

        sim.tick(10).unwrap();
        assert!(h.notes.is_empty());
    }

    #[test]
    fn test_step_failure_propagates() {
        let h = Harness::new();
        let mut sim = h.scripted(Settings::default(), Script::new().fail_at(3), &ball_over_block());

        let err = sim.tick(5).unwrap_err();
        assert!(matches!(
            err,
            SimError::Physics(PhysicsError::StepFailed { step: 3, .. })
        ));
        assert_eq!(sim.current_tick(), 2);

        // A failing replay surfaces the same way
        assert!(sim.load_scene(&ball_over_block(), 4).is_err());
    }

    #[test]
    fn test_visuals_attach_and_detach_once() {
        let h = Harness::new();
        let scene = ball_over_block();
        let mut sim = h.scripted(Settings::default(), Script::new(), &scene);
        assert_eq!(h.nodes.borrow().len(), 2);
        assert_eq!(h.nodes.borrow().added_count(), 2);

        sim.load_scene(&scene, 3).unwrap();
        let nodes = h.nodes.borrow();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.added_count(), 4);
        assert_eq!(nodes.removed_count(), 2);

        let block = nodes.get(VisualHandle(1)).unwrap();
        assert_eq!(block.colour, pitch_to_colour(67));
        assert_eq!(block.position, Vec2::new(0.0, 120.0));
    }

    #[test]
    fn test_unknown_entity_is_skipped_with_warning() {
        let mut fields = Map::new();
        fields.insert("type".to_string(), "spring".into());
        let mut scene = ball_over_block();
        scene
            .append(EntityDescriptor::Unknown(UnknownDescriptor {
                kind: "spring".to_string(),
                fields,
            }))
            .unwrap();

        let h = Harness::new();
        let sim = h.scripted(Settings::default(), Script::new(), &scene);

        assert_eq!(sim.entity_count(), 2);
        assert_eq!(
            sim.warnings(),
            &[Warning::UnknownEntityType {
                index: 2,
                kind: "spring".to_string()
            }]
        );
    }

    #[test]
    fn test_replay_is_silent_and_keeps_velocity_stream() {
        let script = Script::new()
            .collision_at(3, ColliderHandle(0), ColliderHandle(1))
            .collision_at(7, ColliderHandle(0), ColliderHandle(1));
        let scene = ball_over_block();

        let live = Harness::new();
        let mut sim = live.scripted(Settings::default(), script.clone(), &scene);
        sim.tick(10).unwrap();
        assert_eq!(live.notes.len(), 2);

        let replayed = Harness::new();
        let mut sim = replayed.scripted(Settings::default(), script, &scene);
        sim.load_scene(&scene, 5).unwrap();
        assert!(replayed.notes.is_empty());
        sim.tick(5).unwrap();

        assert_eq!(velocities(&replayed.notes), velocities(&live.notes)[1..].to_vec());
    }

    #[test]
    fn test_replay_audio_setting() {
        let settings = Settings {
            replay_audio: true,
            ..Settings::default()
        };
        let script = Script::new().collision_at(3, ColliderHandle(0), ColliderHandle(1));
        let h = Harness::new();
        let mut sim = h.scripted(settings, script, &ball_over_block());

        sim.load_scene(&ball_over_block(), 5).unwrap();
        assert_eq!(h.notes.len(), 1);
    }

    /// Scripted world that records lifecycle calls and can hand out the
    /// same collider key every time
    struct LoggedWorld {
        inner: ScriptedWorld,
        log: Log,
        repeat_collider: bool,
    }

    struct LoggedBackend {
        log: Log,
        repeat_collider: bool,
    }

    impl PhysicsBackend for LoggedBackend {
        type World = LoggedWorld;

        fn create_world(&self, gravity: Vec2, timestep: f32) -> LoggedWorld {
            self.log.borrow_mut().push("create world".to_string());
            LoggedWorld {
                inner: ScriptedWorld::new(gravity, timestep, Script::new()),
                log: self.log.clone(),
                repeat_collider: self.repeat_collider,
            }
        }
    }

    impl PhysicsWorld for LoggedWorld {
        fn create_body(&mut self, spec: &BodySpec) -> BodyHandle {
            self.inner.create_body(spec)
        }

        fn create_collider(
            &mut self,
            spec: &ColliderSpec,
            parent: Option<BodyHandle>,
        ) -> ColliderHandle {
            let handle = self.inner.create_collider(spec, parent);
            if self.repeat_collider {
                ColliderHandle(0)
            } else {
                handle
            }
        }

        fn remove_collider(&mut self, collider: ColliderHandle) -> bool {
            self.log.borrow_mut().push(format!("remove collider {}", collider.0));
            self.inner.remove_collider(collider)
        }

        fn remove_body(&mut self, body: BodyHandle) -> bool {
            self.log.borrow_mut().push(format!("remove body {}", body.0));
            self.inner.remove_body(body)
        }

        fn release(&mut self) {
            self.log.borrow_mut().push("release".to_string());
            self.inner.release();
        }

        fn step(&mut self) -> Result<(), PhysicsError> {
            self.inner.step()
        }

        fn drain_collision_events(&mut self) -> Vec<CollisionEvent> {
            self.inner.drain_collision_events()
        }

        fn contains_collider(&self, collider: ColliderHandle) -> bool {
            self.inner.contains_collider(collider)
        }

        fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle> {
            self.inner.collider_parent(collider)
        }

        fn body_translation(&self, body: BodyHandle) -> Option<Vec2> {
            self.inner.body_translation(body)
        }

        fn body_rotation(&self, body: BodyHandle) -> Option<f32> {
            self.inner.body_rotation(body)
        }

        fn body_linvel(&self, body: BodyHandle) -> Option<Vec2> {
            self.inner.body_linvel(body)
        }

        fn steps(&self) -> u64 {
            self.inner.steps()
        }
    }

    type Log = Rc<RefCell<Vec<String>>>;

    fn logged(h: &Harness, repeat_collider: bool, scene: &Scene) -> (Simulation<LoggedBackend>, Log) {
        let log = Log::default();
        let backend = LoggedBackend {
            log: log.clone(),
            repeat_collider,
        };
        let sim = Simulation::init(backend, Settings::default(), h.surface(), h.audio(), scene)
            .unwrap();
        (sim, log)
    }

    #[test]
    fn test_reset_releases_old_world_first() {
        let h = Harness::new();
        let (mut sim, log) = logged(&h, false, &ball_over_block());
        sim.tick(3).unwrap();

        sim.load_scene(&ball_over_block(), 2).unwrap();
        assert_eq!(*log.borrow(), ["create world", "release", "create world"]);
        assert_eq!(sim.entity_count(), 2);
        assert_eq!(sim.current_tick(), 2);
    }

    #[test]
    fn test_rejected_spawn_leaves_no_physics_behind() {
        let h = Harness::new();
        let (mut sim, log) = logged(&h, true, &Scene::new("empty"));
        let ball = BallDescriptor::new(Vec2::ZERO, 10.0);

        sim.spawn_ball(&ball).unwrap();
        let err = sim.spawn_ball(&ball).unwrap_err();
        assert!(matches!(
            err,
            SimError::Store(StoreError::DuplicateCollider(ColliderHandle(0)))
        ));

        // The stored entity keeps collider 0; the rejected body goes
        assert_eq!(*log.borrow(), ["create world", "remove body 1"]);
        assert_eq!(sim.physics().inner.body_translation(BodyHandle(1)), None);
        assert!(sim.physics().inner.body_translation(BodyHandle(0)).is_some());
        assert!(sim.physics().inner.contains_collider(ColliderHandle(0)));
        assert!(!sim.physics().inner.contains_collider(ColliderHandle(1)));
        assert_eq!(sim.entity_count(), 1);
        assert_eq!(h.nodes.borrow().len(), 1);
    }
}
