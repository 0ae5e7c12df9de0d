//! Scripted physics backend
//!
//! Dynamic bodies integrate gravity with semi-implicit Euler and never
//! collide on their own. Collisions, velocity overrides, collider removal and
//! step failures come from a [`Script`] keyed by world step number (the first
//! step is 1). Every world built by a [`ScriptedBackend`] replays the same
//! script, so reset + replay sees the same events.

use std::collections::BTreeMap;

use glam::Vec2;

use super::{
    BodyHandle, BodyKind, BodySpec, ColliderHandle, ColliderSpec, CollisionEvent, PhysicsBackend,
    PhysicsWorld,
};
use crate::error::PhysicsError;

/// Things that happen at the end of a given step
#[derive(Debug, Clone, Default)]
pub struct Script {
    collisions: BTreeMap<u64, Vec<CollisionEvent>>,
    velocities: BTreeMap<u64, Vec<(BodyHandle, Vec2)>>,
    removals: BTreeMap<u64, Vec<ColliderHandle>>,
    fail_at: Option<u64>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a collision start after `step`
    pub fn collision_at(mut self, step: u64, a: ColliderHandle, b: ColliderHandle) -> Self {
        self.collisions
            .entry(step)
            .or_default()
            .push(CollisionEvent::started(a, b));
        self
    }

    /// Emit a collision end after `step`
    pub fn separation_at(mut self, step: u64, a: ColliderHandle, b: ColliderHandle) -> Self {
        self.collisions
            .entry(step)
            .or_default()
            .push(CollisionEvent::stopped(a, b));
        self
    }

    /// Overwrite a body's velocity after `step` (integration continues from
    /// the new value on the next step)
    pub fn velocity_at(mut self, step: u64, body: BodyHandle, velocity: Vec2) -> Self {
        self.velocities
            .entry(step)
            .or_default()
            .push((body, velocity));
        self
    }

    /// Destroy a collider after `step`, before events are drained
    pub fn remove_collider_at(mut self, step: u64, collider: ColliderHandle) -> Self {
        self.removals.entry(step).or_default().push(collider);
        self
    }

    /// Fail `step`
    pub fn fail_at(mut self, step: u64) -> Self {
        self.fail_at = Some(step);
        self
    }
}

/// Builds [`ScriptedWorld`]s that all replay the same script
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    script: Script,
}

impl ScriptedBackend {
    pub fn new(script: Script) -> Self {
        Self { script }
    }
}

impl PhysicsBackend for ScriptedBackend {
    type World = ScriptedWorld;

    fn create_world(&self, gravity: Vec2, timestep: f32) -> ScriptedWorld {
        ScriptedWorld::new(gravity, timestep, self.script.clone())
    }
}

#[derive(Debug, Clone)]
struct Body {
    kind: BodyKind,
    position: Vec2,
    rotation: f32,
    linvel: Vec2,
    alive: bool,
}

#[derive(Debug, Clone)]
struct Collider {
    parent: Option<BodyHandle>,
    alive: bool,
}

/// Kinematic world driven by a [`Script`]
#[derive(Debug, Clone)]
pub struct ScriptedWorld {
    gravity: Vec2,
    timestep: f32,
    script: Script,
    bodies: Vec<Body>,
    colliders: Vec<Collider>,
    pending: Vec<CollisionEvent>,
    steps: u64,
}

impl ScriptedWorld {
    pub fn new(gravity: Vec2, timestep: f32, script: Script) -> Self {
        Self {
            gravity,
            timestep,
            script,
            bodies: Vec::new(),
            colliders: Vec::new(),
            pending: Vec::new(),
            steps: 0,
        }
    }

    fn body(&self, handle: BodyHandle) -> Option<&Body> {
        self.bodies.get(handle.0 as usize).filter(|body| body.alive)
    }

    fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders
            .get(handle.0 as usize)
            .filter(|collider| collider.alive)
    }
}

impl PhysicsWorld for ScriptedWorld {
    fn create_body(&mut self, spec: &BodySpec) -> BodyHandle {
        self.bodies.push(Body {
            kind: spec.kind,
            position: spec.position,
            rotation: spec.rotation,
            linvel: Vec2::ZERO,
            alive: true,
        });
        BodyHandle(self.bodies.len() as u64 - 1)
    }

    fn create_collider(
        &mut self,
        _spec: &ColliderSpec,
        parent: Option<BodyHandle>,
    ) -> ColliderHandle {
        let parent = parent.filter(|handle| self.body(*handle).is_some());
        self.colliders.push(Collider {
            parent,
            alive: true,
        });
        ColliderHandle(self.colliders.len() as u64 - 1)
    }

    fn remove_collider(&mut self, collider: ColliderHandle) -> bool {
        match self.colliders.get_mut(collider.0 as usize) {
            Some(c) if c.alive => {
                c.alive = false;
                true
            }
            _ => false,
        }
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        match self.bodies.get_mut(body.0 as usize) {
            Some(b) if b.alive => b.alive = false,
            _ => return false,
        }
        for collider in &mut self.colliders {
            if collider.parent == Some(body) {
                collider.alive = false;
            }
        }
        true
    }

    fn release(&mut self) {
        self.bodies.clear();
        self.colliders.clear();
        self.pending.clear();
    }

    fn step(&mut self) -> Result<(), PhysicsError> {
        let step = self.steps + 1;
        if self.script.fail_at == Some(step) {
            return Err(PhysicsError::StepFailed {
                step,
                reason: "scripted failure".to_string(),
            });
        }
        self.steps = step;

        let dt = self.timestep;
        for body in self
            .bodies
            .iter_mut()
            .filter(|b| b.alive && b.kind == BodyKind::Dynamic)
        {
            body.linvel += self.gravity * dt;
            body.position += body.linvel * dt;
        }

        if let Some(overrides) = self.script.velocities.get(&step) {
            for (handle, velocity) in overrides {
                if let Some(body) = self.bodies.get_mut(handle.0 as usize).filter(|b| b.alive) {
                    body.linvel = *velocity;
                }
            }
        }

        if let Some(events) = self.script.collisions.get(&step) {
            self.pending.extend(events.iter().copied());
        }

        if let Some(removals) = self.script.removals.get(&step) {
            for handle in removals {
                if let Some(collider) = self.colliders.get_mut(handle.0 as usize) {
                    collider.alive = false;
                }
            }
        }

        Ok(())
    }

    fn drain_collision_events(&mut self) -> Vec<CollisionEvent> {
        std::mem::take(&mut self.pending)
    }

    fn contains_collider(&self, collider: ColliderHandle) -> bool {
        self.collider(collider).is_some()
    }

    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        self.collider(collider)?.parent
    }

    fn body_translation(&self, body: BodyHandle) -> Option<Vec2> {
        self.body(body).map(|b| b.position)
    }

    fn body_rotation(&self, body: BodyHandle) -> Option<f32> {
        self.body(body).map(|b| b.rotation)
    }

    fn body_linvel(&self, body: BodyHandle) -> Option<Vec2> {
        self.body(body).map(|b| b.linvel)
    }

    fn steps(&self) -> u64 {
        self.steps
    }
}
