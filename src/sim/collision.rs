//! Collision-to-sound bridge
//!
//! Turns physics contact starts into notes. For each started contact:
//! - both colliders must still be known to the physics world, otherwise the
//!   event is dropped
//! - speed of each side is its parent body's linear speed (0 when the
//!   collider has no parent, e.g. blocks)
//! - if either side is strictly faster than the threshold, every side whose
//!   entity carries a pitch plays it, collider 1 first
//!
//! Strike velocity is drawn from a seeded PCG stream so a replay from tick 0
//! produces the same notes.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

use super::physics::{ColliderHandle, CollisionEvent, PhysicsWorld};
use super::store::EntityStore;
use crate::audio::AudioEngine;
use crate::settings::Settings;

pub struct CollisionBridge {
    threshold: f32,
    velocity_range: (u8, u8),
    duration: f32,
    seed: u64,
    rng: Pcg32,
}

impl CollisionBridge {
    pub fn new(settings: &Settings) -> Self {
        Self {
            threshold: settings.velocity_threshold,
            velocity_range: settings.note_velocity_range(),
            duration: settings.note_duration,
            seed: settings.seed,
            rng: Pcg32::seed_from_u64(settings.seed),
        }
    }

    /// Rewind the velocity stream to its seed
    pub fn reset(&mut self) {
        self.rng = Pcg32::seed_from_u64(self.seed);
    }

    /// Play notes for a batch of events. Returns the number of notes played.
    pub fn process<W: PhysicsWorld + ?Sized>(
        &mut self,
        events: &[CollisionEvent],
        physics: &W,
        store: &EntityStore,
        audio: &mut dyn AudioEngine,
    ) -> usize {
        let mut played = 0;
        for event in events.iter().filter(|e| e.started) {
            played += self.on_contact(event.collider1, event.collider2, physics, store, audio);
        }
        played
    }

    fn on_contact<W: PhysicsWorld + ?Sized>(
        &mut self,
        collider1: ColliderHandle,
        collider2: ColliderHandle,
        physics: &W,
        store: &EntityStore,
        audio: &mut dyn AudioEngine,
    ) -> usize {
        // Destroyed between emission and processing
        if !physics.contains_collider(collider1) || !physics.contains_collider(collider2) {
            log::trace!("Dropping contact {collider1:?}/{collider2:?}: collider gone");
            return 0;
        }

        let speed1 = body_speed(physics, collider1);
        let speed2 = body_speed(physics, collider2);
        if speed1 <= self.threshold && speed2 <= self.threshold {
            return 0;
        }

        let mut played = 0;
        for collider in [collider1, collider2] {
            let pitch = store
                .entity_by_collider(collider)
                .and_then(|(_, entity)| entity.pitch);
            if let Some(pitch) = pitch {
                let (lo, hi) = self.velocity_range;
                let velocity = self.rng.random_range(lo..=hi);
                audio.play_note(pitch, velocity, self.duration);
                played += 1;
            }
        }
        played
    }
}

fn body_speed<W: PhysicsWorld + ?Sized>(physics: &W, collider: ColliderHandle) -> f32 {
    physics
        .collider_parent(collider)
        .and_then(|body| physics.body_linvel(body))
        .map_or(0.0, |v| v.length())
}
