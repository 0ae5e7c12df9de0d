//! Entity store
//!
//! Entities are bags of optional components. Capability queries ("has a
//! body", "has a visual") replace type hierarchies.
//!
//! # Invariants
//! - Subscribers see exactly one `Added` and one `Removed` per entity.
//! - `Removed` fires while the entity (and its handles) are still readable.
//! - A collider or visual handle belongs to at most one entity.
//! - Iteration is in slot order; after [`EntityStore::clear`] slots are
//!   handed out from 0 again, so respawning the same scene reproduces the
//!   same order.

use std::collections::{HashMap, HashSet};

use glam::Vec2;

use super::physics::{BodyHandle, ColliderHandle};
use crate::error::StoreError;
use crate::render::{Visual, VisualHandle};

/// Store-assigned entity identity. Stale handles never alias new entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityHandle {
    index: u32,
    generation: u32,
}

impl EntityHandle {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Component bag. Only `position` is mandatory.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    /// Authoritative world position
    pub position: Vec2,
    /// Radians
    pub rotation: f32,
    pub visual: Option<Visual>,
    /// Dynamic bodies only
    pub body: Option<BodyHandle>,
    pub collider: Option<ColliderHandle>,
    /// MIDI note emitted on qualifying impacts
    pub pitch: Option<u8>,
}

impl Entity {
    pub fn at(position: Vec2) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn has_visual(&self) -> bool {
        self.visual.is_some()
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

/// Store mutation kinds delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    Added,
    Removed,
}

/// Subscription token returned by [`EntityStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

type Listener = Box<dyn FnMut(StoreEvent, EntityHandle, &Entity)>;

struct Slot {
    generation: u32,
    entity: Option<Entity>,
}

/// Handle-addressed entity storage with synchronous add/remove notifications.
#[derive(Default)]
pub struct EntityStore {
    slots: Vec<Slot>,
    /// Free slot indices; popped from the back
    free: Vec<u32>,
    len: usize,
    by_collider: HashMap<ColliderHandle, EntityHandle>,
    visuals: HashSet<VisualHandle>,
    listeners: Vec<Option<Listener>>,
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .field("listeners", &self.listeners.iter().flatten().count())
            .finish()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback fired on every add and remove.
    pub fn subscribe(
        &mut self,
        listener: impl FnMut(StoreEvent, EntityHandle, &Entity) + 'static,
    ) -> ListenerId {
        self.listeners.push(Some(Box::new(listener)));
        ListenerId(self.listeners.len() - 1)
    }

    /// Drop a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners
            .get_mut(id.0)
            .and_then(|slot| slot.take())
            .is_some()
    }

    /// Insert an entity. Fails without mutating anything if its collider or
    /// visual is already tracked.
    pub fn add(&mut self, entity: Entity) -> Result<EntityHandle, StoreError> {
        if let Some(collider) = entity.collider {
            if self.by_collider.contains_key(&collider) {
                return Err(StoreError::DuplicateCollider(collider));
            }
        }
        if let Some(visual) = &entity.visual {
            if self.visuals.contains(&visual.handle) {
                return Err(StoreError::DuplicateVisual(visual.handle));
            }
        }

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entity: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let handle = EntityHandle {
            index,
            generation: slot.generation,
        };

        if let Some(collider) = entity.collider {
            self.by_collider.insert(collider, handle);
        }
        if let Some(visual) = &entity.visual {
            self.visuals.insert(visual.handle);
        }
        let entity: &Entity = slot.entity.insert(entity);
        self.len += 1;

        for listener in self.listeners.iter_mut().flatten() {
            listener(StoreEvent::Added, handle, entity);
        }

        Ok(handle)
    }

    /// Remove an entity, notifying subscribers before its handles are
    /// released.
    pub fn remove(&mut self, handle: EntityHandle) -> Result<Entity, StoreError> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(StoreError::MissingEntity(handle))?;
        let entity = slot.entity.as_ref().ok_or(StoreError::MissingEntity(handle))?;

        for listener in self.listeners.iter_mut().flatten() {
            listener(StoreEvent::Removed, handle, entity);
        }

        let entity = slot
            .entity
            .take()
            .ok_or(StoreError::MissingEntity(handle))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;

        if let Some(collider) = entity.collider {
            self.by_collider.remove(&collider);
        }
        if let Some(visual) = &entity.visual {
            self.visuals.remove(&visual.handle);
        }

        Ok(entity)
    }

    /// Remove every entity (in slot order), notifying subscribers for each.
    /// Slot allocation restarts at index 0.
    pub fn clear(&mut self) {
        let live: Vec<EntityHandle> = self.iter().map(|(handle, _)| handle).collect();
        for handle in live {
            // Handles came from a live iteration, removal cannot miss
            let _ = self.remove(handle);
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
    }

    pub fn get(&self, handle: EntityHandle) -> Option<&Entity> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entity.as_ref())
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Option<&mut Entity> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.entity.as_mut())
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Entity owning a collider
    pub fn entity_by_collider(&self, collider: ColliderHandle) -> Option<(EntityHandle, &Entity)> {
        let handle = *self.by_collider.get(&collider)?;
        self.get(handle).map(|entity| (handle, entity))
    }

    /// All entities in slot order
    pub fn iter(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entity.as_ref().map(|entity| {
                (
                    EntityHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    entity,
                )
            })
        })
    }

    /// All entities in slot order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityHandle, &mut Entity)> {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.entity.as_mut().map(|entity| {
                (
                    EntityHandle {
                        index: index as u32,
                        generation,
                    },
                    entity,
                )
            })
        })
    }

    /// Entities matching a predicate
    pub fn query<'a>(
        &'a self,
        mut predicate: impl FnMut(&Entity) -> bool + 'a,
    ) -> impl Iterator<Item = (EntityHandle, &'a Entity)> + 'a {
        self.iter().filter(move |(_, entity)| predicate(*entity))
    }

    /// Entities that are drawn
    pub fn with_visual(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.query(Entity::has_visual)
    }

    /// Entities driven by a dynamic body
    pub fn with_body(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.query(Entity::has_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::render::VisualShape;

    fn visual(handle: u64) -> Visual {
        Visual {
            handle: VisualHandle(handle),
            shape: VisualShape::Circle { radius: 1.0 },
            colour: 0,
        }
    }

    fn recorder(store: &mut EntityStore) -> Rc<RefCell<Vec<(StoreEvent, EntityHandle)>>> {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        store.subscribe(move |event, handle, _| sink.borrow_mut().push((event, handle)));
        events
    }

    #[test]
    fn test_add_remove_notifies_once() {
        let mut store = EntityStore::new();
        let events = recorder(&mut store);

        let handle = store.add(Entity::at(Vec2::new(1.0, 2.0))).unwrap();
        assert_eq!(store.len(), 1);
        store.remove(handle).unwrap();
        assert!(store.is_empty());

        assert_eq!(
            *events.borrow(),
            vec![(StoreEvent::Added, handle), (StoreEvent::Removed, handle)]
        );
    }

    #[test]
    fn test_remove_missing_entity() {
        let mut store = EntityStore::new();
        let events = recorder(&mut store);
        let handle = store.add(Entity::default()).unwrap();
        store.remove(handle).unwrap();

        // Stale handle: same slot, old generation
        assert_eq!(store.remove(handle), Err(StoreError::MissingEntity(handle)));
        assert_eq!(events.borrow().len(), 2);
    }

    #[test]
    fn test_stale_handle_does_not_alias() {
        let mut store = EntityStore::new();
        let old = store.add(Entity::at(Vec2::X)).unwrap();
        store.remove(old).unwrap();
        let new = store.add(Entity::at(Vec2::Y)).unwrap();

        assert_eq!(old.index(), new.index());
        assert!(store.get(old).is_none());
        assert_eq!(store.get(new).unwrap().position, Vec2::Y);
    }

    #[test]
    fn test_duplicate_collider_rejected() {
        let mut store = EntityStore::new();
        let events = recorder(&mut store);
        let entity = Entity {
            collider: Some(ColliderHandle(7)),
            ..Default::default()
        };
        store.add(entity.clone()).unwrap();

        assert_eq!(
            store.add(entity),
            Err(StoreError::DuplicateCollider(ColliderHandle(7)))
        );
        assert_eq!(store.len(), 1);
        assert_eq!(events.borrow().len(), 1);
    }

    #[test]
    fn test_duplicate_visual_rejected() {
        let mut store = EntityStore::new();
        store
            .add(Entity {
                visual: Some(visual(3)),
                ..Default::default()
            })
            .unwrap();

        let result = store.add(Entity {
            visual: Some(visual(3)),
            ..Default::default()
        });
        assert_eq!(result, Err(StoreError::DuplicateVisual(VisualHandle(3))));
    }

    #[test]
    fn test_removal_sees_entity_before_release() {
        let mut store = EntityStore::new();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        store.subscribe(move |event, _, entity| {
            if event == StoreEvent::Removed {
                *sink.borrow_mut() = entity.collider;
            }
        });

        let handle = store
            .add(Entity {
                collider: Some(ColliderHandle(11)),
                ..Default::default()
            })
            .unwrap();
        store.remove(handle).unwrap();

        assert_eq!(*seen.borrow(), Some(ColliderHandle(11)));
        // Index released after notification
        assert!(store.entity_by_collider(ColliderHandle(11)).is_none());
    }

    #[test]
    fn test_collider_index_lookup() {
        let mut store = EntityStore::new();
        store.add(Entity::default()).unwrap();
        let block = store
            .add(Entity {
                collider: Some(ColliderHandle(4)),
                pitch: Some(67),
                ..Default::default()
            })
            .unwrap();

        let (handle, entity) = store.entity_by_collider(ColliderHandle(4)).unwrap();
        assert_eq!(handle, block);
        assert_eq!(entity.pitch, Some(67));
        assert!(store.entity_by_collider(ColliderHandle(5)).is_none());
    }

    #[test]
    fn test_capability_queries() {
        let mut store = EntityStore::new();
        store
            .add(Entity {
                visual: Some(visual(1)),
                body: Some(BodyHandle(0)),
                collider: Some(ColliderHandle(0)),
                ..Default::default()
            })
            .unwrap();
        store
            .add(Entity {
                visual: Some(visual(2)),
                collider: Some(ColliderHandle(1)),
                pitch: Some(60),
                ..Default::default()
            })
            .unwrap();
        store.add(Entity::default()).unwrap();

        assert_eq!(store.with_visual().count(), 2);
        assert_eq!(store.with_body().count(), 1);
        assert_eq!(store.query(|e| e.pitch.is_some()).count(), 1);
    }

    #[test]
    fn test_clear_notifies_and_restarts_slots() {
        let mut store = EntityStore::new();
        let events = recorder(&mut store);
        let a = store.add(Entity::default()).unwrap();
        let b = store.add(Entity::default()).unwrap();
        store.remove(a).unwrap();
        store.add(Entity::default()).unwrap();

        store.clear();
        assert!(store.is_empty());
        let removed = events
            .borrow()
            .iter()
            .filter(|(event, _)| *event == StoreEvent::Removed)
            .count();
        assert_eq!(removed, 3);

        let first = store.add(Entity::default()).unwrap();
        let second = store.add(Entity::default()).unwrap();
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert!(store.get(b).is_none());
    }

    #[test]
    fn test_unsubscribe() {
        let mut store = EntityStore::new();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let id = store.subscribe(move |_, _, _| *sink.borrow_mut() += 1);

        store.add(Entity::default()).unwrap();
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.add(Entity::default()).unwrap();

        assert_eq!(*count.borrow(), 1);
    }
}
