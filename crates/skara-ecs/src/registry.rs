//! The entity registry: the façade binding handles, types, and storage.
//!
//! [`EntityRegistry`] owns the type registry, the handle pool, every
//! archetype, and the per-entity location map. All structural operations go
//! through it: creation resolves (or creates) the archetype for the
//! requested signature, destruction compacts storage and repairs the
//! relocated entity's location, and component/tag add/remove migrate the
//! entity's row between archetypes.
//!
//! Structural mutation must not happen while a range traversal over the
//! same registry is active; the borrow checker enforces this, and
//! [`DeferredBuffer`](crate::deferred::DeferredBuffer) is the sanctioned
//! way to queue changes from inside an iteration.
//!
//! # Safety
//!
//! The unsafe blocks here reinterpret raw column pointers as `&T`/`&mut T`.
//! Every pointer comes from the entity's own archetype at its current
//! location, the column was selected by `T`'s registered handle, and the
//! borrow inherits this method's receiver borrow of the whole registry.

use std::collections::HashMap;

use tracing::debug;

use crate::archetype::{Archetype, ArchetypeId};
use crate::handle_pool::{Entity, HandlePool};
use crate::type_registry::{Component, ComponentType, Tag, TypeRegistry};
use crate::type_set::ComponentAndTagSets;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Static type lists
// ---------------------------------------------------------------------------

/// A static tuple of component types, resolvable to the component plane of
/// a signature. Implemented for tuples up to arity 8.
pub trait ComponentList: 'static {
    fn build(types: &mut TypeRegistry, sets: &mut ComponentAndTagSets);
}

/// A static tuple of tag types, resolvable to the tag plane of a signature.
pub trait TagList: 'static {
    fn build(types: &mut TypeRegistry, sets: &mut ComponentAndTagSets);
}

impl ComponentList for () {
    fn build(_: &mut TypeRegistry, _: &mut ComponentAndTagSets) {}
}

impl TagList for () {
    fn build(_: &mut TypeRegistry, _: &mut ComponentAndTagSets) {}
}

macro_rules! impl_component_list {
    ($($t:ident),+) => {
        impl<$($t: Component),+> ComponentList for ($($t,)+) {
            fn build(types: &mut TypeRegistry, sets: &mut ComponentAndTagSets) {
                $( sets.add_component(types.get_or_register::<$t>()); )+
            }
        }
    };
}

macro_rules! impl_tag_list {
    ($($t:ident),+) => {
        impl<$($t: Tag),+> TagList for ($($t,)+) {
            fn build(types: &mut TypeRegistry, sets: &mut ComponentAndTagSets) {
                $( sets.add_tag(types.get_or_register_tag::<$t>()); )+
            }
        }
    };
}

impl_component_list!(A);
impl_component_list!(A, B);
impl_component_list!(A, B, C);
impl_component_list!(A, B, C, D);
impl_component_list!(A, B, C, D, E);
impl_component_list!(A, B, C, D, E, F);
impl_component_list!(A, B, C, D, E, F, G);
impl_component_list!(A, B, C, D, E, F, G, H);

impl_tag_list!(A);
impl_tag_list!(A, B);
impl_tag_list!(A, B, C);
impl_tag_list!(A, B, C, D);

// ---------------------------------------------------------------------------
// EntityLocation
// ---------------------------------------------------------------------------

/// Where an entity's row lives. `index` is the row index within the
/// archetype; the chunk index and in-chunk offset derive from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub index: u32,
}

impl EntityLocation {
    /// Splits the row index into `(chunk, offset)` for the given per-chunk
    /// capacity.
    pub fn chunk_and_offset(&self, entities_per_chunk: usize) -> (usize, usize) {
        (
            self.index as usize / entities_per_chunk,
            self.index as usize % entities_per_chunk,
        )
    }
}

// ---------------------------------------------------------------------------
// EntityRegistry
// ---------------------------------------------------------------------------

/// Owner of all entity state; see the module docs.
pub struct EntityRegistry {
    types: TypeRegistry,
    pool: HandlePool,
    archetypes: Vec<Archetype>,
    archetype_ids: HashMap<ComponentAndTagSets, ArchetypeId>,
    locations: HashMap<Entity, EntityLocation>,
    modification_counter: u64,
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            types: TypeRegistry::new(),
            pool: HandlePool::new(),
            archetypes: Vec::new(),
            archetype_ids: HashMap::new(),
            locations: HashMap::new(),
            modification_counter: 0,
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    // -- creation & destruction ---------------------------------------------

    /// Creates `count` entities holding the component tuple `L`, all slots
    /// default-constructed. Returns the first handle; entities created
    /// together occupy index-contiguous handles. Falsy when the handle
    /// space is exhausted.
    pub fn create<L: ComponentList>(&mut self, count: u32) -> Entity {
        self.create_tagged::<L, ()>(count)
    }

    /// Like [`Self::create`] with an additional static tag tuple.
    pub fn create_tagged<L: ComponentList, G: TagList>(&mut self, count: u32) -> Entity {
        let mut sets = ComponentAndTagSets::EMPTY;
        L::build(&mut self.types, &mut sets);
        G::build(&mut self.types, &mut sets);
        self.create_with_sets(sets, count)
    }

    /// Untyped creation from an already-built signature. Every component in
    /// `sets` must be registered.
    pub fn create_with_sets(&mut self, sets: ComponentAndTagSets, count: u32) -> Entity {
        debug_assert!(count > 0);
        let first = self.pool.acquire_contiguous(count);
        if !first.is_valid() {
            return first;
        }

        let entities: Vec<Entity> = if count == 1 {
            vec![first]
        } else {
            // Contiguous batches come from fresh index space at generation 0.
            (0..count).map(|i| Entity::new(first.index() + i, 0)).collect()
        };

        let archetype = self.find_or_create_archetype(sets);
        let storage = &mut self.archetypes[archetype.index()];
        let start = storage.len();
        storage.push_entities(&entities);

        for (i, &entity) in entities.iter().enumerate() {
            self.locations.insert(
                entity,
                EntityLocation {
                    archetype,
                    index: (start + i) as u32,
                },
            );
        }
        debug!(count, archetype = ?archetype, "created entities");
        first
    }

    /// Destroys an entity: removes its row (compacting the archetype),
    /// repairs the relocated entity's location, and releases the handle.
    /// Returns `false` for a stale or invalid handle.
    pub fn destroy(&mut self, entity: Entity) -> bool {
        let Some(location) = self.locations.remove(&entity) else {
            return false;
        };
        let storage = &mut self.archetypes[location.archetype.index()];
        if let Some(relocated) = storage.swap_remove(location.index as usize) {
            if let Some(slot) = self.locations.get_mut(&relocated) {
                slot.index = location.index;
            }
        }
        self.pool.release(entity);
        true
    }

    // -- liveness & lookup --------------------------------------------------

    pub fn contains(&self, entity: Entity) -> bool {
        self.locations.contains_key(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.locations.len()
    }

    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.locations.get(&entity).copied()
    }

    /// Shared access to a component. Calling this for an entity that is
    /// dead or lacks the component is a contract violation and panics; use
    /// [`Self::try_get`] when either is uncertain.
    pub fn get<T: Component>(&self, entity: Entity) -> &T {
        match self.try_get(entity) {
            Some(value) => value,
            None => contract_violation::<T>(entity),
        }
    }

    /// Mutable access; same contract as [`Self::get`].
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> &mut T {
        match self.try_get_mut(entity) {
            Some(value) => value,
            None => contract_violation::<T>(entity),
        }
    }

    pub fn try_get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let ptr = self.component_ptr_of::<T>(entity)?;
        // SAFETY: see the module docs; shared borrow via `&self`.
        Some(unsafe { &*ptr.cast::<T>() })
    }

    pub fn try_get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let ptr = self.component_ptr_of::<T>(entity)?;
        // SAFETY: see the module docs; exclusive borrow via `&mut self`.
        Some(unsafe { &mut *ptr.cast::<T>() })
    }

    /// Result-returning lookup distinguishing the failure cause.
    pub fn get_checked<T: Component>(&self, entity: Entity) -> Result<&T, EcsError> {
        if !self.contains(entity) {
            return Err(EcsError::StaleEntity { entity });
        }
        if !self.types.find::<T>().is_valid() {
            return Err(EcsError::UnknownComponent {
                name: std::any::type_name::<T>(),
            });
        }
        self.try_get(entity).ok_or(EcsError::MissingComponent {
            entity,
            name: std::any::type_name::<T>(),
        })
    }

    pub fn has_component<T: Component>(&self, entity: Entity) -> bool {
        self.component_ptr_of::<T>(entity).is_some()
    }

    pub fn has_tag<T: Tag>(&self, entity: Entity) -> bool {
        let tag = self.types.find_tag_type::<T>();
        if !tag.is_valid() {
            return false;
        }
        self.locations.get(&entity).is_some_and(|location| {
            self.archetypes[location.archetype.index()]
                .signature()
                .tags
                .contains(tag.id())
        })
    }

    // -- component & tag mutation -------------------------------------------

    /// Attaches a component, migrating the entity to the widened archetype.
    /// If the entity already holds `T` the value is overwritten in place.
    /// Returns `false` for a dead entity.
    pub fn add<T: Component>(&mut self, entity: Entity, value: T) -> bool {
        let component = self.types.get_or_register::<T>();
        let Some(location) = self.location(entity) else {
            return false;
        };

        let storage = &self.archetypes[location.archetype.index()];
        if !storage.has_component(component) {
            let destination = storage.signature().with_component(component);
            self.migrate(entity, location, destination);
        }
        // The slot holds either the previous value or the migration's
        // default-constructed one; plain assignment drops it.
        *self.get_mut::<T>(entity) = value;
        true
    }

    /// Detaches a component, migrating to the narrowed archetype. Returns
    /// `false` when the entity is dead or does not hold `T`.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> bool {
        let component = self.types.find::<T>();
        if !component.is_valid() {
            return false;
        }
        let Some(location) = self.location(entity) else {
            return false;
        };
        let storage = &self.archetypes[location.archetype.index()];
        if !storage.has_component(component) {
            return false;
        }
        let mut destination = *storage.signature();
        destination.remove_component(component);
        self.migrate(entity, location, destination);
        true
    }

    /// Attaches a tag. Tags live only in the signature, so this is purely
    /// an archetype migration; a no-op when already present.
    pub fn add_tag<T: Tag>(&mut self, entity: Entity) -> bool {
        let tag = self.types.get_or_register_tag::<T>();
        let Some(location) = self.location(entity) else {
            return false;
        };
        let signature = self.archetypes[location.archetype.index()].signature();
        if signature.tags.contains(tag.id()) {
            return true;
        }
        let destination = signature.with_tag(tag);
        self.migrate(entity, location, destination);
        true
    }

    pub fn remove_tag<T: Tag>(&mut self, entity: Entity) -> bool {
        let tag = self.types.find_tag_type::<T>();
        if !tag.is_valid() {
            return false;
        }
        let Some(location) = self.location(entity) else {
            return false;
        };
        let signature = self.archetypes[location.archetype.index()].signature();
        if !signature.tags.contains(tag.id()) {
            return false;
        }
        let mut destination = *signature;
        destination.remove_tag(tag);
        self.migrate(entity, location, destination);
        true
    }

    // -- change notification ------------------------------------------------

    /// Flags an entity as externally mutated by stamping its archetype with
    /// a fresh modification id. Returns `false` for a dead entity.
    pub fn notify(&mut self, entity: Entity) -> bool {
        let Some(location) = self.location(entity) else {
            return false;
        };
        self.modification_counter += 1;
        self.archetypes[location.archetype.index()].touch(self.modification_counter);
        true
    }

    /// The modification id last stamped on the entity's archetype; 0 means
    /// never notified.
    pub fn modification_id(&self, entity: Entity) -> Option<u64> {
        let location = self.location(entity)?;
        Some(self.archetypes[location.archetype.index()].modification_id())
    }

    /// The most recent modification id handed out by [`Self::notify`].
    /// Ranges filtered with `notified(last + 1)` see only archetypes
    /// stamped after this point.
    pub fn last_modification_id(&self) -> u64 {
        self.modification_counter
    }

    // -- internals ----------------------------------------------------------

    pub(crate) fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    fn component_ptr_of<T: Component>(&self, entity: Entity) -> Option<*mut u8> {
        let component = self.types.find::<T>();
        if !component.is_valid() {
            return None;
        }
        let location = self.locations.get(&entity)?;
        self.archetypes[location.archetype.index()]
            .component_ptr(component, location.index as usize)
    }

    fn find_or_create_archetype(&mut self, sets: ComponentAndTagSets) -> ArchetypeId {
        if let Some(&id) = self.archetype_ids.get(&sets) {
            return id;
        }
        let id = ArchetypeId(self.archetypes.len() as u32);
        self.archetypes.push(Archetype::new(sets, &self.types));
        self.archetype_ids.insert(sets, id);
        debug!(archetype = ?id, signature = ?sets, "created archetype");
        id
    }

    /// Moves one entity's row to the archetype for `destination`: shared
    /// columns transfer bytewise (a Rust move), source-only columns are
    /// destructed, destination-only columns are default-constructed, and
    /// both the migrated and the swap-relocated entity's locations are
    /// updated.
    fn migrate(&mut self, entity: Entity, from: EntityLocation, destination: ComponentAndTagSets) {
        let destination_id = self.find_or_create_archetype(destination);
        if destination_id == from.archetype {
            return;
        }
        let (source, target) = two_mut(
            &mut self.archetypes,
            from.archetype.index(),
            destination_id.index(),
        );

        let target_index = target.push_uninitialized(entity);
        let source_index = from.index as usize;

        // Column lists are snapshotted: the loops below take `&mut` to the
        // archetypes they were read from.
        let target_components: Vec<ComponentType> = target.components().to_vec();
        let source_components: Vec<ComponentType> = source.components().to_vec();

        for component in target_components {
            match source.component_ptr(component, source_index) {
                Some(src) => {
                    let size = self.types.component_desc(component).size;
                    if size != 0 {
                        let dst = target
                            .component_ptr(component, target_index)
                            .unwrap_or_else(|| unreachable!("column exists in target"));
                        // SAFETY: distinct archetypes, so the ranges cannot
                        // overlap; the move leaves the source slot raw.
                        unsafe { std::ptr::copy_nonoverlapping(src, dst, size) };
                    }
                }
                None => target.construct_in_place(component, target_index),
            }
        }
        for component in source_components {
            if !target.has_component(component) {
                source.destroy_in_place(component, source_index);
            }
        }

        if let Some(relocated) = source.swap_remove_moved_out(source_index) {
            if let Some(slot) = self.locations.get_mut(&relocated) {
                slot.index = from.index;
            }
        }
        self.locations.insert(
            entity,
            EntityLocation {
                archetype: destination_id,
                index: target_index as u32,
            },
        );
    }
}

impl std::fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.entity_count())
            .field("archetypes", &self.archetypes.len())
            .finish()
    }
}

fn two_mut<T>(slice: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert!(a != b);
    if a < b {
        let (left, right) = slice.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = slice.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

#[cold]
fn contract_violation<T>(entity: Entity) -> ! {
    panic!(
        "entity {entity:?} is dead or has no '{}' component",
        std::any::type_name::<T>()
    );
}
