//! Rapier 2D physics backend
//!
//! Rapier handles are generational arena indices; they are packed into the
//! opaque `u64` handles as `generation << 32 | index`.

use std::sync::Mutex;

use glam::Vec2;
use rapier2d::geometry::CollisionEvent as RapierCollisionEvent;
use rapier2d::math::{Real, Vector};
use rapier2d::prelude::{
    ActiveEvents, CCDSolver, ColliderBuilder, ColliderHandle as RapierColliderHandle, ColliderSet,
    ContactPair, DefaultBroadPhase, EventHandler, ImpulseJointSet, IntegrationParameters,
    IslandManager, MultibodyJointSet, NarrowPhase, PhysicsPipeline, QueryPipeline,
    RigidBodyBuilder, RigidBodyHandle, RigidBodySet,
};

use super::{
    BodyHandle, BodyKind, BodySpec, ColliderHandle, ColliderShape, ColliderSpec, CollisionEvent,
    PhysicsBackend, PhysicsWorld,
};
use crate::error::PhysicsError;

fn pack(index: u32, generation: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

fn unpack(raw: u64) -> (u32, u32) {
    (raw as u32, (raw >> 32) as u32)
}

fn body_key(handle: RigidBodyHandle) -> BodyHandle {
    let (index, generation) = handle.into_raw_parts();
    BodyHandle(pack(index, generation))
}

fn rapier_body(handle: BodyHandle) -> RigidBodyHandle {
    let (index, generation) = unpack(handle.0);
    RigidBodyHandle::from_raw_parts(index, generation)
}

fn collider_key(handle: RapierColliderHandle) -> ColliderHandle {
    let (index, generation) = handle.into_raw_parts();
    ColliderHandle(pack(index, generation))
}

fn rapier_collider(handle: ColliderHandle) -> RapierColliderHandle {
    let (index, generation) = unpack(handle.0);
    RapierColliderHandle::from_raw_parts(index, generation)
}

fn to_vector(v: Vec2) -> Vector<Real> {
    Vector::new(v.x, v.y)
}

fn to_vec2(v: &Vector<Real>) -> Vec2 {
    Vec2::new(v.x, v.y)
}

/// Collects collision events emitted during a step
#[derive(Default)]
struct EventQueue {
    events: Mutex<Vec<CollisionEvent>>,
}

impl EventQueue {
    fn drain(&self) -> Vec<CollisionEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *events)
    }
}

impl EventHandler for EventQueue {
    fn handle_collision_event(
        &self,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        event: RapierCollisionEvent,
        _contact_pair: Option<&ContactPair>,
    ) {
        let event = CollisionEvent {
            collider1: collider_key(event.collider1()),
            collider2: collider_key(event.collider2()),
            started: event.started(),
        };
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    fn handle_contact_force_event(
        &self,
        _dt: Real,
        _bodies: &RigidBodySet,
        _colliders: &ColliderSet,
        _contact_pair: &ContactPair,
        _total_force_magnitude: Real,
    ) {
    }
}

/// Builds [`RapierWorld`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct RapierBackend;

impl PhysicsBackend for RapierBackend {
    type World = RapierWorld;

    fn create_world(&self, gravity: Vec2, timestep: f32) -> RapierWorld {
        RapierWorld::new(gravity, timestep)
    }
}

/// A Rapier pipeline plus all of its sets
pub struct RapierWorld {
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
    events: EventQueue,
    steps: u64,
}

impl RapierWorld {
    pub fn new(gravity: Vec2, timestep: f32) -> Self {
        let mut integration_parameters = IntegrationParameters::default();
        integration_parameters.dt = timestep;

        Self {
            gravity: to_vector(gravity),
            integration_parameters,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            events: EventQueue::default(),
            steps: 0,
        }
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }
}

impl PhysicsWorld for RapierWorld {
    fn create_body(&mut self, spec: &BodySpec) -> BodyHandle {
        let builder = match spec.kind {
            BodyKind::Dynamic => RigidBodyBuilder::dynamic(),
            BodyKind::Fixed => RigidBodyBuilder::fixed(),
        };
        let body = builder
            .translation(to_vector(spec.position))
            .rotation(spec.rotation)
            .build();
        body_key(self.bodies.insert(body))
    }

    fn create_collider(
        &mut self,
        spec: &ColliderSpec,
        parent: Option<BodyHandle>,
    ) -> ColliderHandle {
        let builder = match spec.shape {
            ColliderShape::Ball { radius } => ColliderBuilder::ball(radius),
            ColliderShape::Cuboid {
                half_width,
                half_height,
            } => ColliderBuilder::cuboid(half_width, half_height),
        };
        let events = if spec.active_events {
            ActiveEvents::COLLISION_EVENTS
        } else {
            ActiveEvents::empty()
        };
        let builder = builder.restitution(spec.restitution).active_events(events);

        let parent = parent
            .map(rapier_body)
            .filter(|handle| self.bodies.contains(*handle));
        let handle = match parent {
            Some(parent) => {
                self.colliders
                    .insert_with_parent(builder.build(), parent, &mut self.bodies)
            }
            None => {
                let collider = builder
                    .translation(to_vector(spec.position))
                    .rotation(spec.rotation)
                    .build();
                self.colliders.insert(collider)
            }
        };
        collider_key(handle)
    }

    fn remove_collider(&mut self, collider: ColliderHandle) -> bool {
        self.colliders
            .remove(
                rapier_collider(collider),
                &mut self.islands,
                &mut self.bodies,
                true,
            )
            .is_some()
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        self.bodies
            .remove(
                rapier_body(body),
                &mut self.islands,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    fn release(&mut self) {
        log::trace!(
            "Releasing rapier world ({} bodies, {} colliders)",
            self.bodies.len(),
            self.colliders.len()
        );
        self.pipeline = PhysicsPipeline::new();
        self.islands = IslandManager::new();
        self.broad_phase = DefaultBroadPhase::new();
        self.narrow_phase = NarrowPhase::new();
        self.bodies = RigidBodySet::new();
        self.colliders = ColliderSet::new();
        self.impulse_joints = ImpulseJointSet::new();
        self.multibody_joints = MultibodyJointSet::new();
        self.ccd_solver = CCDSolver::new();
        self.query_pipeline = QueryPipeline::new();
        self.events.drain();
    }

    fn step(&mut self) -> Result<(), PhysicsError> {
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &(),
            &self.events,
        );
        self.steps += 1;

        // A diverged solver leaves NaN/inf behind; nothing downstream can
        // recover from that
        let diverged = self.bodies.iter().any(|(_, body)| {
            let t = body.translation();
            !(t.x.is_finite() && t.y.is_finite())
        });
        if diverged {
            return Err(PhysicsError::StepFailed {
                step: self.steps,
                reason: "non-finite body translation".to_string(),
            });
        }
        Ok(())
    }

    fn drain_collision_events(&mut self) -> Vec<CollisionEvent> {
        self.events.drain()
    }

    fn contains_collider(&self, collider: ColliderHandle) -> bool {
        self.colliders.get(rapier_collider(collider)).is_some()
    }

    fn collider_parent(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        self.colliders
            .get(rapier_collider(collider))?
            .parent()
            .map(body_key)
    }

    fn body_translation(&self, body: BodyHandle) -> Option<Vec2> {
        self.bodies
            .get(rapier_body(body))
            .map(|b| to_vec2(b.translation()))
    }

    fn body_rotation(&self, body: BodyHandle) -> Option<f32> {
        self.bodies.get(rapier_body(body)).map(|b| b.rotation().angle())
    }

    fn body_linvel(&self, body: BodyHandle) -> Option<Vec2> {
        self.bodies.get(rapier_body(body)).map(|b| to_vec2(b.linvel()))
    }

    fn steps(&self) -> u64 {
        self.steps
    }
}
