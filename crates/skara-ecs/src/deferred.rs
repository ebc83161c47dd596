//! Deferred structural mutation.
//!
//! Structural changes (create, destroy, component/tag add and remove) must
//! not run while a range traversal holds the registry. A
//! [`DeferredBuffer`] records the desired changes as commands during the
//! traversal and [`DeferredBuffer::apply`] replays them afterwards, in
//! recording (FIFO) order.
//!
//! Commands targeting an entity that died between recording and apply are
//! skipped with a warning; a frame that destroys an entity and also queued
//! changes against it is common and not an error.

use tracing::warn;

use crate::handle_pool::Entity;
use crate::registry::{ComponentList, EntityRegistry, TagList};
use crate::type_registry::{Component, Tag};

type ApplyFn = Box<dyn FnOnce(&mut EntityRegistry)>;

/// A recorded queue of structural changes; see the module docs.
#[derive(Default)]
pub struct DeferredBuffer {
    commands: Vec<ApplyFn>,
}

impl DeferredBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues creation of `count` entities holding the component tuple `L`.
    pub fn create<L: ComponentList>(&mut self, count: u32) {
        self.create_tagged::<L, ()>(count);
    }

    /// Queues creation with an additional static tag tuple.
    pub fn create_tagged<L: ComponentList, G: TagList>(&mut self, count: u32) {
        self.commands.push(Box::new(move |registry| {
            registry.create_tagged::<L, G>(count);
        }));
    }

    /// Queues destruction of `entity`.
    pub fn destroy(&mut self, entity: Entity) {
        self.commands.push(Box::new(move |registry| {
            if !registry.destroy(entity) {
                warn!(?entity, "deferred destroy targeted a dead entity");
            }
        }));
    }

    /// Queues attaching `value` to `entity`.
    pub fn add<T: Component>(&mut self, entity: Entity, value: T) {
        self.commands.push(Box::new(move |registry| {
            if !registry.add(entity, value) {
                warn!(?entity, "deferred component add targeted a dead entity");
            }
        }));
    }

    /// Queues detaching component `T` from `entity`. A missing component at
    /// apply time is a silent no-op; only a dead entity warns.
    pub fn remove<T: Component>(&mut self, entity: Entity) {
        self.commands.push(Box::new(move |registry| {
            if !registry.contains(entity) {
                warn!(?entity, "deferred component remove targeted a dead entity");
                return;
            }
            registry.remove::<T>(entity);
        }));
    }

    /// Queues attaching tag `T` to `entity`.
    pub fn add_tag<T: Tag>(&mut self, entity: Entity) {
        self.commands.push(Box::new(move |registry| {
            if !registry.add_tag::<T>(entity) {
                warn!(?entity, "deferred tag add targeted a dead entity");
            }
        }));
    }

    /// Queues detaching tag `T` from `entity`.
    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) {
        self.commands.push(Box::new(move |registry| {
            if !registry.contains(entity) {
                warn!(?entity, "deferred tag remove targeted a dead entity");
                return;
            }
            registry.remove_tag::<T>(entity);
        }));
    }

    /// Replays every recorded command against `registry` in recording
    /// order, leaving the buffer empty.
    pub fn apply(&mut self, registry: &mut EntityRegistry) {
        for command in self.commands.drain(..) {
            command(registry);
        }
    }

    /// Discards all recorded commands without applying them.
    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl std::fmt::Debug for DeferredBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredBuffer")
            .field("commands", &self.commands.len())
            .finish()
    }
}
