//! Build-time configuration constants.
//!
//! These are compile-time knobs, not runtime configuration: bitset widths,
//! chunk layout math, and handle packing all derive from them.

/// Bound on the component-descriptor table, reserved dummy slot included.
/// Dense component ids live in `1..MAX_COMPONENT_TYPES` (0 is the invalid
/// handle), so 127 real types are registrable.
pub const MAX_COMPONENT_TYPES: usize = 128;

/// Maximum number of distinct tag types, tracked in a disjoint id space.
pub const MAX_TAG_TYPES: usize = 128;

/// Size in bytes of one archetype storage chunk.
pub const CHUNK_SIZE: usize = 1 << 14;

/// Alignment of chunk allocations. An upper bound on any component's
/// alignment; types over-aligned past this are rejected at registration.
pub const CHUNK_ALIGN: usize = 64;

/// Bits of an entity handle devoted to the generation counter. The
/// remaining bits of the packed `u32` hold the index, so this trades the
/// stale-handle detection window against the addressable entity count.
pub const ENTITY_GENERATION_BITS: u32 = 8;

/// Bits of an entity handle devoted to the index.
pub const ENTITY_INDEX_BITS: u32 = 32 - ENTITY_GENERATION_BITS;
