//! Fixed-width bitsets over dense type ids.
//!
//! A [`TypeSet`] is a plain value: copyable, comparable, hashable, sized at
//! compile time from the global type-count limits, with no allocation
//! anywhere. [`ComponentAndTagSets`] pairs one set per id space and is the
//! *signature* type used for archetype identity and query filters.

use crate::limits::{MAX_COMPONENT_TYPES, MAX_TAG_TYPES};
use crate::type_registry::{ComponentType, TagType};

const _: () = assert!(MAX_COMPONENT_TYPES == MAX_TAG_TYPES, "one bitset width serves both planes");

const WORDS: usize = (MAX_COMPONENT_TYPES + 63) / 64;

// ---------------------------------------------------------------------------
// TypeSet
// ---------------------------------------------------------------------------

/// Bitset over dense type ids (component or tag plane, caller's choice).
/// Bit 0 is never set: id 0 is the invalid handle.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TypeSet {
    words: [u64; WORDS],
}

impl TypeSet {
    pub const EMPTY: Self = Self { words: [0; WORDS] };

    #[inline]
    pub fn add(&mut self, id: u32) {
        debug_assert!(id != 0 && (id as usize) < MAX_COMPONENT_TYPES);
        self.words[(id / 64) as usize] |= 1u64 << (id % 64);
    }

    #[inline]
    pub fn remove(&mut self, id: u32) {
        self.words[(id / 64) as usize] &= !(1u64 << (id % 64));
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.words[(id / 64) as usize] & (1u64 << (id % 64)) != 0
    }

    /// Builder-style single-id insertion.
    #[inline]
    pub fn with(mut self, id: u32) -> Self {
        self.add(id);
        self
    }

    /// Bitwise union with a whole set.
    pub fn add_set(&mut self, other: &TypeSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
    }

    /// Bitwise difference with a whole set.
    pub fn remove_set(&mut self, other: &TypeSet) {
        for (w, o) in self.words.iter_mut().zip(other.words.iter()) {
            *w &= !o;
        }
    }

    pub fn union(&self, other: &TypeSet) -> TypeSet {
        let mut out = *self;
        out.add_set(other);
        out
    }

    pub fn intersection(&self, other: &TypeSet) -> TypeSet {
        let mut out = *self;
        for (w, o) in out.words.iter_mut().zip(other.words.iter()) {
            *w &= o;
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn is_superset_of(&self, other: &TypeSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(w, o)| w & o == *o)
    }

    pub fn is_disjoint_with(&self, other: &TypeSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .all(|(w, o)| w & o == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Set ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros();
                bits &= bits - 1;
                Some(wi as u32 * 64 + bit)
            })
        })
    }
}

impl std::fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentAndTagSets
// ---------------------------------------------------------------------------

/// One bitset per id space; the signature of an archetype or the
/// include/exclude half of a query filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ComponentAndTagSets {
    pub components: TypeSet,
    pub tags: TypeSet,
}

impl ComponentAndTagSets {
    pub const EMPTY: Self = Self {
        components: TypeSet::EMPTY,
        tags: TypeSet::EMPTY,
    };

    #[inline]
    pub fn add_component(&mut self, component: ComponentType) {
        debug_assert!(component.is_valid());
        self.components.add(component.id());
    }

    #[inline]
    pub fn add_tag(&mut self, tag: TagType) {
        debug_assert!(tag.is_valid());
        self.tags.add(tag.id());
    }

    pub fn with_component(mut self, component: ComponentType) -> Self {
        self.add_component(component);
        self
    }

    pub fn with_tag(mut self, tag: TagType) -> Self {
        self.add_tag(tag);
        self
    }

    pub fn remove_component(&mut self, component: ComponentType) {
        self.components.remove(component.id());
    }

    pub fn remove_tag(&mut self, tag: TagType) {
        self.tags.remove(tag.id());
    }

    pub fn add_sets(&mut self, other: &ComponentAndTagSets) {
        self.components.add_set(&other.components);
        self.tags.add_set(&other.tags);
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty() && self.tags.is_empty()
    }

    /// Filter semantics: a signature matches iff it is a superset of the
    /// include sets on both planes and disjoint from the exclude sets on
    /// both planes.
    pub fn matches(&self, include: &ComponentAndTagSets, exclude: &ComponentAndTagSets) -> bool {
        self.components.is_superset_of(&include.components)
            && self.tags.is_superset_of(&include.tags)
            && self.components.is_disjoint_with(&exclude.components)
            && self.tags.is_disjoint_with(&exclude.tags)
    }
}
