//! Query ranges: filtered, chunk-granular iteration over entity storage.
//!
//! A range is a builder, not a live cursor: [`EntityRegistry::range`] /
//! [`EntityRegistry::range_mut`] capture a requested item tuple (`&T` or
//! `&mut T` per component), the builder methods widen the include/exclude
//! filter or restrict the sweep to recently notified archetypes, and only
//! [`Range::for_each_chunk`] touches storage. Each matching
//! archetype is visited chunk by chunk; the callback receives the chunk's
//! entity handles plus one typed column slice per requested item, bounded by
//! the chunk's live row count.
//!
//! No ordering is guaranteed across archetypes; within an archetype the
//! order is storage order, which only changes under swap-remove deletions.
//! The registry borrow held by the range makes structural mutation from
//! inside a callback impossible; queue such changes in a
//! [`DeferredBuffer`](crate::deferred::DeferredBuffer) instead.
//!
//! # Safety
//!
//! Column slices are reinterpreted from raw chunk pointers. Bounds come
//! from the archetype's own layout, the element type is pinned by the
//! registered component handle, and mutable slices are only ever produced
//! under the exclusive registry borrow of [`RangeMut`]. Tuple items are
//! checked against duplicate mutable access to the same component type.

use std::any::TypeId;
use std::marker::PhantomData;

use crate::archetype::Archetype;
use crate::handle_pool::Entity;
use crate::registry::EntityRegistry;
use crate::type_registry::{Component, Tag, TypeRegistry};
use crate::type_set::ComponentAndTagSets;

// ---------------------------------------------------------------------------
// Query items
// ---------------------------------------------------------------------------

/// One requested column view: `&T` for shared or `&mut T` for mutable
/// access.
pub trait RangeItem {
    type Target: Component;
    type Slice<'w>;
    type Row<'w>;
    const MUTABLE: bool;

    /// # Safety
    /// `ptr` must address `len` initialized values of `Target`, and the
    /// caller must uphold the aliasing rules for the produced borrow.
    unsafe fn make_slice<'w>(ptr: *mut u8, len: usize) -> Self::Slice<'w>;

    /// # Safety
    /// As [`Self::make_slice`], with `index` within the live column.
    unsafe fn make_row<'w>(ptr: *mut u8, index: usize) -> Self::Row<'w>;
}

impl<'q, T: Component> RangeItem for &'q T {
    type Target = T;
    type Slice<'w> = &'w [T];
    type Row<'w> = &'w T;
    const MUTABLE: bool = false;

    unsafe fn make_slice<'w>(ptr: *mut u8, len: usize) -> &'w [T] {
        // SAFETY: per the trait contract.
        unsafe { std::slice::from_raw_parts(ptr.cast::<T>(), len) }
    }

    unsafe fn make_row<'w>(ptr: *mut u8, index: usize) -> &'w T {
        // SAFETY: per the trait contract.
        unsafe { &*ptr.cast::<T>().add(index) }
    }
}

impl<'q, T: Component> RangeItem for &'q mut T {
    type Target = T;
    type Slice<'w> = &'w mut [T];
    type Row<'w> = &'w mut T;
    const MUTABLE: bool = true;

    unsafe fn make_slice<'w>(ptr: *mut u8, len: usize) -> &'w mut [T] {
        // SAFETY: per the trait contract; exclusivity is guaranteed by the
        // `RangeMut` registry borrow plus the duplicate-access check.
        unsafe { std::slice::from_raw_parts_mut(ptr.cast::<T>(), len) }
    }

    unsafe fn make_row<'w>(ptr: *mut u8, index: usize) -> &'w mut T {
        // SAFETY: as `make_slice`.
        unsafe { &mut *ptr.cast::<T>().add(index) }
    }
}

// ---------------------------------------------------------------------------
// Query tuples
// ---------------------------------------------------------------------------

/// A tuple of [`RangeItem`]s (arities 1 through 4).
pub trait RangeQuery {
    type Slices<'w>;
    type Rows<'w>;
    const HAS_MUTABLE: bool;

    /// Adds every requested component to `sets`; `false` when one is not
    /// registered, in which case nothing can match.
    fn add_include(types: &TypeRegistry, sets: &mut ComponentAndTagSets) -> bool;

    /// Rejects the same component type requested mutably more than once.
    fn validate_access();

    /// # Safety
    /// `archetype` must store every requested component and `chunk` must be
    /// a live chunk; the caller upholds the aliasing rules for the borrows.
    unsafe fn chunk_slices<'w>(
        types: &TypeRegistry,
        archetype: &Archetype,
        chunk: usize,
    ) -> Self::Slices<'w>;

    /// # Safety
    /// As [`Self::chunk_slices`], with `index` a live row of `chunk`.
    unsafe fn chunk_row<'w>(
        types: &TypeRegistry,
        archetype: &Archetype,
        chunk: usize,
        index: usize,
    ) -> Self::Rows<'w>;
}

macro_rules! impl_range_query {
    ($($item:ident),+) => {
        impl<$($item: RangeItem),+> RangeQuery for ($($item,)+) {
            type Slices<'w> = ($(<$item as RangeItem>::Slice<'w>,)+);
            type Rows<'w> = ($(<$item as RangeItem>::Row<'w>,)+);
            const HAS_MUTABLE: bool = $(<$item as RangeItem>::MUTABLE)||+;

            fn add_include(types: &TypeRegistry, sets: &mut ComponentAndTagSets) -> bool {
                $(
                    let handle = types.find::<<$item as RangeItem>::Target>();
                    if !handle.is_valid() {
                        return false;
                    }
                    sets.add_component(handle);
                )+
                true
            }

            fn validate_access() {
                let items = [$((
                    TypeId::of::<<$item as RangeItem>::Target>(),
                    <$item as RangeItem>::MUTABLE,
                )),+];
                for i in 0..items.len() {
                    for j in (i + 1)..items.len() {
                        debug_assert!(
                            !(items[i].0 == items[j].0 && (items[i].1 || items[j].1)),
                            "component type requested twice with mutable access"
                        );
                    }
                }
            }

            unsafe fn chunk_slices<'w>(
                types: &TypeRegistry,
                archetype: &Archetype,
                chunk: usize,
            ) -> Self::Slices<'w> {
                ($({
                    let handle = types.find::<<$item as RangeItem>::Target>();
                    let (ptr, len) = archetype.column_in_chunk(handle, chunk);
                    // SAFETY: forwarded caller contract.
                    unsafe { <$item as RangeItem>::make_slice(ptr, len) }
                },)+)
            }

            unsafe fn chunk_row<'w>(
                types: &TypeRegistry,
                archetype: &Archetype,
                chunk: usize,
                index: usize,
            ) -> Self::Rows<'w> {
                ($({
                    let handle = types.find::<<$item as RangeItem>::Target>();
                    let (ptr, len) = archetype.column_in_chunk(handle, chunk);
                    debug_assert!(index < len);
                    // SAFETY: forwarded caller contract.
                    unsafe { <$item as RangeItem>::make_row(ptr, index) }
                },)+)
            }
        }
    };
}

impl_range_query!(A);
impl_range_query!(A, B);
impl_range_query!(A, B, C);
impl_range_query!(A, B, C, D);

// ---------------------------------------------------------------------------
// Range / RangeMut
// ---------------------------------------------------------------------------

/// Filter state shared by [`Range`] and [`RangeMut`].
#[derive(Debug, Clone, Copy)]
struct Filter {
    include: ComponentAndTagSets,
    exclude: ComponentAndTagSets,
    // Archetypes stamped with a modification id below this are skipped.
    notified_since: u64,
    // Cleared when an include refers to an unregistered type: nothing can
    // match then.
    satisfiable: bool,
}

impl Filter {
    fn new<Q: RangeQuery>(types: &TypeRegistry) -> Self {
        Q::validate_access();
        let mut include = ComponentAndTagSets::EMPTY;
        let satisfiable = Q::add_include(types, &mut include);
        Self {
            include,
            exclude: ComponentAndTagSets::EMPTY,
            notified_since: 0,
            satisfiable,
        }
    }

    fn with_component<C: Component>(mut self, types: &TypeRegistry) -> Self {
        let handle = types.find::<C>();
        if handle.is_valid() {
            self.include.add_component(handle);
        } else {
            self.satisfiable = false;
        }
        self
    }

    fn with_tag<T: Tag>(mut self, types: &TypeRegistry) -> Self {
        let handle = types.find_tag_type::<T>();
        if handle.is_valid() {
            self.include.add_tag(handle);
        } else {
            self.satisfiable = false;
        }
        self
    }

    // Excluding an unregistered type is a no-op: no entity can hold it.
    fn exclude_component<C: Component>(mut self, types: &TypeRegistry) -> Self {
        let handle = types.find::<C>();
        if handle.is_valid() {
            self.exclude.add_component(handle);
        }
        self
    }

    fn exclude_tag<T: Tag>(mut self, types: &TypeRegistry) -> Self {
        let handle = types.find_tag_type::<T>();
        if handle.is_valid() {
            self.exclude.add_tag(handle);
        }
        self
    }

    fn matches(&self, archetype: &Archetype) -> bool {
        self.satisfiable
            && !archetype.is_empty()
            && archetype.modification_id() >= self.notified_since
            && archetype.signature().matches(&self.include, &self.exclude)
    }
}

/// A shared-access range over the registry. Produced by
/// [`EntityRegistry::range`]; see the module docs.
pub struct Range<'r, Q: RangeQuery> {
    registry: &'r EntityRegistry,
    filter: Filter,
    _marker: PhantomData<Q>,
}

/// A mutable-access range; the exclusive registry borrow makes the mutable
/// column slices sound. Produced by [`EntityRegistry::range_mut`].
pub struct RangeMut<'r, Q: RangeQuery> {
    registry: &'r mut EntityRegistry,
    filter: Filter,
    _marker: PhantomData<Q>,
}

macro_rules! impl_range_body {
    () => {
        /// Also requires component `C` (without yielding a view of it).
        pub fn with_component<C: Component>(mut self) -> Self {
            self.filter = self.filter.with_component::<C>(self.registry.types());
            self
        }

        /// Also requires tag `T`.
        pub fn with_tag<T: Tag>(mut self) -> Self {
            self.filter = self.filter.with_tag::<T>(self.registry.types());
            self
        }

        /// Rejects entities holding component `C`.
        pub fn exclude_component<C: Component>(mut self) -> Self {
            self.filter = self.filter.exclude_component::<C>(self.registry.types());
            self
        }

        /// Rejects entities holding tag `T`.
        pub fn exclude_tag<T: Tag>(mut self) -> Self {
            self.filter = self.filter.exclude_tag::<T>(self.registry.types());
            self
        }

        /// Only visits archetypes stamped with a modification id at or above
        /// `since` (see [`EntityRegistry::notify`]). Callers typically
        /// remember [`EntityRegistry::last_modification_id`] plus one from
        /// the previous sweep.
        pub fn notified(mut self, since: u64) -> Self {
            self.filter.notified_since = since;
            self
        }

        /// Number of matching entities.
        pub fn count(self) -> usize {
            self.registry
                .archetypes()
                .iter()
                .filter(|archetype| self.filter.matches(archetype))
                .map(Archetype::len)
                .sum()
        }
    };
}

impl<'r, Q: RangeQuery> Range<'r, Q> {
    pub(crate) fn new(registry: &'r EntityRegistry) -> Self {
        assert!(
            !Q::HAS_MUTABLE,
            "mutable range items require EntityRegistry::range_mut"
        );
        let filter = Filter::new::<Q>(registry.types());
        Self {
            registry,
            filter,
            _marker: PhantomData,
        }
    }

    impl_range_body!();

    /// Visits every matching chunk with its entity handles and column
    /// slices.
    pub fn for_each_chunk(self, mut f: impl FnMut(&[Entity], Q::Slices<'_>)) {
        for archetype in self.registry.archetypes() {
            if !self.filter.matches(archetype) {
                continue;
            }
            for chunk in 0..archetype.live_chunk_count() {
                let entities = archetype.entities_in_chunk(chunk);
                // SAFETY: the signature matched the include set, so every
                // requested component is stored; shared borrows only.
                let slices =
                    unsafe { Q::chunk_slices(self.registry.types(), archetype, chunk) };
                f(entities, slices);
            }
        }
    }

    /// Per-entity convenience over [`Self::for_each_chunk`].
    pub fn for_each(self, mut f: impl FnMut(Entity, Q::Rows<'_>)) {
        for archetype in self.registry.archetypes() {
            if !self.filter.matches(archetype) {
                continue;
            }
            for chunk in 0..archetype.live_chunk_count() {
                let entities = archetype.entities_in_chunk(chunk);
                for (index, &entity) in entities.iter().enumerate() {
                    // SAFETY: as in `for_each_chunk`, row-granular.
                    let rows = unsafe {
                        Q::chunk_row(self.registry.types(), archetype, chunk, index)
                    };
                    f(entity, rows);
                }
            }
        }
    }
}

impl<'r, Q: RangeQuery> RangeMut<'r, Q> {
    pub(crate) fn new(registry: &'r mut EntityRegistry) -> Self {
        let filter = Filter::new::<Q>(registry.types());
        Self {
            registry,
            filter,
            _marker: PhantomData,
        }
    }

    impl_range_body!();

    /// Visits every matching chunk; see [`Range::for_each_chunk`].
    pub fn for_each_chunk(self, mut f: impl FnMut(&[Entity], Q::Slices<'_>)) {
        for archetype in self.registry.archetypes() {
            if !self.filter.matches(archetype) {
                continue;
            }
            for chunk in 0..archetype.live_chunk_count() {
                let entities = archetype.entities_in_chunk(chunk);
                // SAFETY: every requested component is stored; mutable
                // borrows are sound because this range holds the registry
                // exclusively and duplicate mutable access was rejected.
                let slices =
                    unsafe { Q::chunk_slices(self.registry.types(), archetype, chunk) };
                f(entities, slices);
            }
        }
    }

    /// Per-entity convenience over [`Self::for_each_chunk`].
    pub fn for_each(self, mut f: impl FnMut(Entity, Q::Rows<'_>)) {
        for archetype in self.registry.archetypes() {
            if !self.filter.matches(archetype) {
                continue;
            }
            for chunk in 0..archetype.live_chunk_count() {
                let entities = archetype.entities_in_chunk(chunk);
                for index in 0..entities.len() {
                    let entity = entities[index];
                    // SAFETY: as in `for_each_chunk`, and consecutive rows
                    // never alias.
                    let rows = unsafe {
                        Q::chunk_row(self.registry.types(), archetype, chunk, index)
                    };
                    f(entity, rows);
                }
            }
        }
    }
}

impl EntityRegistry {
    /// Starts a shared-access range; `Q` must contain only `&T` items.
    pub fn range<Q: RangeQuery>(&self) -> Range<'_, Q> {
        Range::new(self)
    }

    /// Starts a range that may request `&mut T` items.
    pub fn range_mut<Q: RangeQuery>(&mut self) -> RangeMut<'_, Q> {
        RangeMut::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }
    impl Component for Position {}

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Velocity {
        dx: f32,
        dy: f32,
    }
    impl Component for Velocity {}

    #[derive(Debug, Default, Clone, Copy, PartialEq)]
    struct Health(u32);
    impl Component for Health {}

    struct Frozen;
    impl Tag for Frozen {}

    #[test]
    fn visits_matching_entities_exactly_once() {
        let mut registry = EntityRegistry::new();
        let entity = registry.create::<(Position, Velocity)>(1);
        registry.create::<(Position,)>(1);
        *registry.get_mut::<Position>(entity) = Position { x: 1.0, y: 2.0 };

        let mut seen = Vec::new();
        registry
            .range::<(&Position, &Velocity)>()
            .for_each(|e, (pos, _vel)| seen.push((e, *pos)));

        assert_eq!(seen, vec![(entity, Position { x: 1.0, y: 2.0 })]);
    }

    #[test]
    fn excluded_tag_filters_the_archetype() {
        let mut registry = EntityRegistry::new();
        let plain = registry.create::<(Position,)>(1);
        let tagged = registry.create_tagged::<(Position,), (Frozen,)>(1);

        let without: Vec<Entity> = {
            let mut out = Vec::new();
            registry
                .range::<(&Position,)>()
                .exclude_tag::<Frozen>()
                .for_each(|e, _| out.push(e));
            out
        };
        assert_eq!(without, vec![plain]);

        let mut all = Vec::new();
        registry.range::<(&Position,)>().for_each(|e, _| all.push(e));
        assert_eq!(all.len(), 2);
        assert!(all.contains(&tagged));
    }

    #[test]
    fn with_tag_requires_membership() {
        let mut registry = EntityRegistry::new();
        registry.create::<(Position,)>(2);
        let tagged = registry.create_tagged::<(Position,), (Frozen,)>(1);

        let mut seen = Vec::new();
        registry
            .range::<(&Position,)>()
            .with_tag::<Frozen>()
            .for_each(|e, _| seen.push(e));
        assert_eq!(seen, vec![tagged]);
    }

    #[test]
    fn with_component_narrows_without_yielding_it() {
        let mut registry = EntityRegistry::new();
        registry.create::<(Position,)>(2);
        let both = registry.create::<(Position, Health)>(1);

        let mut seen = Vec::new();
        registry
            .range::<(&Position,)>()
            .with_component::<Health>()
            .for_each(|e, _| seen.push(e));
        assert_eq!(seen, vec![both]);
    }

    #[test]
    fn chunk_counts_sum_to_the_entity_count() {
        let mut registry = EntityRegistry::new();
        registry.create::<(Position, Velocity)>(100);

        let mut total = 0;
        let mut chunks = 0;
        registry
            .range::<(&Position, &Velocity)>()
            .for_each_chunk(|entities, (positions, velocities)| {
                assert_eq!(entities.len(), positions.len());
                assert_eq!(entities.len(), velocities.len());
                total += entities.len();
                chunks += 1;
            });
        assert_eq!(total, 100);
        assert!(chunks >= 1);
        assert_eq!(registry.range::<(&Position,)>().count(), 100);
    }

    #[test]
    fn mutations_through_range_mut_are_visible() {
        let mut registry = EntityRegistry::new();
        let entity = registry.create::<(Position, Velocity)>(1);
        *registry.get_mut::<Velocity>(entity) = Velocity { dx: 2.0, dy: -1.0 };

        registry
            .range_mut::<(&mut Position, &Velocity)>()
            .for_each(|_e, (pos, vel)| {
                pos.x += vel.dx;
                pos.y += vel.dy;
            });

        assert_eq!(registry.get::<Position>(entity), &Position { x: 2.0, y: -1.0 });
    }

    #[test]
    fn unregistered_include_matches_nothing() {
        let mut registry = EntityRegistry::new();
        registry.create::<(Position,)>(3);

        // Health was never registered.
        assert_eq!(registry.range::<(&Position,)>().with_component::<Health>().count(), 0);
        let mut visited = 0;
        registry
            .range::<(&Health,)>()
            .for_each_chunk(|_, _| visited += 1);
        assert_eq!(visited, 0);
    }

    #[test]
    fn notified_skips_unstamped_archetypes() {
        let mut registry = EntityRegistry::new();
        let moving = registry.create::<(Position, Velocity)>(1);
        let idle = registry.create::<(Position,)>(1);

        let mark = registry.last_modification_id() + 1;
        assert!(registry.notify(moving));

        let mut seen = Vec::new();
        registry
            .range::<(&Position,)>()
            .notified(mark)
            .for_each(|e, _| seen.push(e));
        assert_eq!(seen, vec![moving]);

        // A later sweep from a fresh mark sees nothing until re-notified.
        let mark = registry.last_modification_id() + 1;
        assert_eq!(registry.range::<(&Position,)>().notified(mark).count(), 0);
        assert!(registry.notify(idle));
        let mut seen = Vec::new();
        registry
            .range::<(&Position,)>()
            .notified(mark)
            .for_each(|e, _| seen.push(e));
        assert_eq!(seen, vec![idle]);
    }

    #[test]
    #[should_panic(expected = "range_mut")]
    fn shared_range_rejects_mutable_items() {
        let mut registry = EntityRegistry::new();
        registry.create::<(Position,)>(1);
        let _ = registry.range::<(&mut Position,)>();
    }

    #[test]
    fn multi_chunk_iteration_touches_every_row() {
        let mut registry = EntityRegistry::new();
        let first = registry.create::<(Health,)>(1);
        let per_chunk = registry
            .location(first)
            .map(|l| {
                registry.archetypes()[l.archetype.index()].entities_per_chunk()
            })
            .unwrap();
        let extra = per_chunk as u32 + 10;
        registry.create::<(Health,)>(extra);

        let mut total = 0usize;
        registry
            .range_mut::<(&mut Health,)>()
            .for_each_chunk(|entities, (healths,)| {
                for h in healths.iter_mut() {
                    h.0 += 1;
                }
                total += entities.len();
            });
        assert_eq!(total, per_chunk + 11);
        assert_eq!(registry.get::<Health>(first).0, 1);
    }
}
