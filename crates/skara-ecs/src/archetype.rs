//! Chunked, type-erased columnar storage for one archetype.
//!
//! An archetype owns every entity whose exact component+tag signature equals
//! its own. Storage is a list of fixed-size chunks
//! ([`CHUNK_SIZE`](crate::limits::CHUNK_SIZE) bytes each); inside a chunk
//! each component type gets one contiguous sub-array (SoA), preceded by a
//! parallel array of entity handles at offset 0. Column offsets and the
//! per-chunk entity capacity are computed once at archetype creation from
//! the registered sizes and alignments, so creation cannot partially fail.
//!
//! Rows are dense: live entities occupy indices `0..len` with no gaps, and
//! removal compacts by moving the logically-last row into the vacated slot.
//!
//! # Safety
//!
//! All raw-pointer arithmetic in this module stays inside chunk allocations
//! whose layout was derived from the same descriptors used to index them.
//! Non-trivial slots are constructed and dropped through the function table
//! captured at type registration; trivial columns are plain bytes. The
//! registry upholds the remaining contract: a row pushed uninitialized has
//! every column initialized before any read, removal, or drop of the
//! archetype.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use tracing::debug;

use crate::handle_pool::Entity;
use crate::limits::{CHUNK_ALIGN, CHUNK_SIZE};
use crate::type_registry::{ComponentType, CreateFn, DestroyFn, TypeRegistry};
use crate::type_set::ComponentAndTagSets;

/// Index of an archetype within the registry's archetype table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(pub(crate) u32);

impl ArchetypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[inline]
fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One fixed-size storage block. The chunk itself knows nothing about its
/// contents; the owning archetype interprets it through its column layout.
struct Chunk {
    data: NonNull<u8>,
}

impl Chunk {
    fn layout() -> Layout {
        // CHUNK_SIZE and CHUNK_ALIGN are compile-time valid.
        Layout::from_size_align(CHUNK_SIZE, CHUNK_ALIGN)
            .unwrap_or_else(|_| unreachable!("chunk layout constants are valid"))
    }

    fn alloc() -> Self {
        let layout = Self::layout();
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        let Some(data) = NonNull::new(ptr) else {
            alloc::handle_alloc_error(layout);
        };
        Self { data }
    }

    #[inline]
    fn base(&self) -> *mut u8 {
        self.data.as_ptr()
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: allocated with the identical layout in `alloc`.
        unsafe { alloc::dealloc(self.data.as_ptr(), Self::layout()) };
    }
}

// ---------------------------------------------------------------------------
// Archetype
// ---------------------------------------------------------------------------

/// Storage for all entities sharing one exact signature.
pub struct Archetype {
    signature: ComponentAndTagSets,
    /// Dense component handles in ascending id order; parallel to the
    /// layout and function-table vectors below.
    components: Vec<ComponentType>,
    offsets: Vec<usize>,
    sizes: Vec<usize>,
    creates: Vec<Option<CreateFn>>,
    destroys: Vec<Option<DestroyFn>>,
    chunks: Vec<Chunk>,
    entities_per_chunk: usize,
    len: usize,
    modification_id: u64,
}

impl Archetype {
    /// Computes the chunk layout for `signature` and creates empty storage.
    /// Every component of the signature must already be registered.
    pub(crate) fn new(signature: ComponentAndTagSets, types: &TypeRegistry) -> Self {
        let components: Vec<ComponentType> = signature
            .components
            .iter()
            .map(ComponentType::from_id)
            .collect();

        let mut sizes = Vec::with_capacity(components.len());
        let mut aligns = Vec::with_capacity(components.len());
        let mut creates = Vec::with_capacity(components.len());
        let mut destroys = Vec::with_capacity(components.len());
        for &component in &components {
            let desc = types.component_desc(component);
            sizes.push(desc.size);
            aligns.push(desc.align);
            creates.push(desc.create);
            destroys.push(desc.destroy);
        }

        // Worst-case padding lost to alignment, assuming every column lands
        // maximally misaligned. Conservative, so the real layout always
        // fits.
        let padding_worst_case: usize = aligns.iter().map(|a| a - 1).sum();
        let row_size: usize = std::mem::size_of::<Entity>() + sizes.iter().sum::<usize>();
        let entities_per_chunk = (CHUNK_SIZE - padding_worst_case) / row_size;
        debug_assert!(
            entities_per_chunk > 0,
            "signature row size {row_size} exceeds the chunk budget"
        );

        // Entity handles at offset 0, then each column at its aligned
        // offset.
        let mut offsets = Vec::with_capacity(components.len());
        let mut cursor = std::mem::size_of::<Entity>() * entities_per_chunk;
        for (&size, &align) in sizes.iter().zip(aligns.iter()) {
            cursor = align_up(cursor, align);
            offsets.push(cursor);
            cursor += size * entities_per_chunk;
        }
        debug_assert!(cursor <= CHUNK_SIZE);

        Self {
            signature,
            components,
            offsets,
            sizes,
            creates,
            destroys,
            chunks: Vec::new(),
            entities_per_chunk,
            len: 0,
            modification_id: 0,
        }
    }

    // -- introspection ------------------------------------------------------

    #[inline]
    pub fn signature(&self) -> &ComponentAndTagSets {
        &self.signature
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn entities_per_chunk(&self) -> usize {
        self.entities_per_chunk
    }

    /// Number of chunks currently holding at least one live row.
    pub fn live_chunk_count(&self) -> usize {
        self.len.div_ceil(self.entities_per_chunk)
    }

    /// Live rows in chunk `chunk`.
    pub fn chunk_len(&self, chunk: usize) -> usize {
        let start = chunk * self.entities_per_chunk;
        self.len.saturating_sub(start).min(self.entities_per_chunk)
    }

    pub fn modification_id(&self) -> u64 {
        self.modification_id
    }

    pub(crate) fn touch(&mut self, id: u64) {
        self.modification_id = id;
    }

    /// Component handles stored by this archetype, ascending by id.
    #[inline]
    pub(crate) fn components(&self) -> &[ComponentType] {
        &self.components
    }

    /// Column index for `component`, if this archetype stores it.
    #[inline]
    pub(crate) fn column_of(&self, component: ComponentType) -> Option<usize> {
        self.components.binary_search(&component).ok()
    }

    #[inline]
    pub(crate) fn has_component(&self, component: ComponentType) -> bool {
        self.column_of(component).is_some()
    }

    /// Entity handles of chunk `chunk`, bounded by its live count.
    pub fn entities_in_chunk(&self, chunk: usize) -> &[Entity] {
        let len = self.chunk_len(chunk);
        // SAFETY: offset 0 of every chunk is the entity-handle column;
        // `len` rows of it are initialized.
        unsafe { std::slice::from_raw_parts(self.chunks[chunk].base().cast::<Entity>(), len) }
    }

    pub fn entity_at(&self, index: usize) -> Entity {
        debug_assert!(index < self.len);
        let (chunk, offset) = self.locate(index);
        // SAFETY: `index < len`, so the slot is initialized.
        unsafe { *self.chunks[chunk].base().cast::<Entity>().add(offset) }
    }

    /// Raw pointer to `component` of row `index`. O(1) modulo the column
    /// binary search.
    pub(crate) fn component_ptr(&self, component: ComponentType, index: usize) -> Option<*mut u8> {
        debug_assert!(index < self.len);
        let col = self.column_of(component)?;
        Some(self.raw_ptr(col, index))
    }

    /// Base pointer and live length of `component`'s column in `chunk`;
    /// the range module reinterprets this as a typed slice.
    pub(crate) fn column_in_chunk(&self, component: ComponentType, chunk: usize) -> (*mut u8, usize) {
        debug_assert!(chunk < self.live_chunk_count());
        match self.column_of(component) {
            Some(col) => {
                // SAFETY: `chunk` is live and the offset stays inside it.
                let ptr = unsafe { self.chunks[chunk].base().add(self.offsets[col]) };
                (ptr, self.chunk_len(chunk))
            }
            None => {
                debug_assert!(false, "component {component:?} not stored by this archetype");
                (std::ptr::null_mut(), 0)
            }
        }
    }

    // -- mutation -----------------------------------------------------------

    /// Appends `entities` as new rows, default-constructing every column
    /// slot through the registered function table.
    pub(crate) fn push_entities(&mut self, entities: &[Entity]) {
        let start = self.len;
        let total = entities.len();
        self.reserve_rows(start + total);

        let mut done = 0;
        while done < total {
            let index = start + done;
            let chunk = index / self.entities_per_chunk;
            let offset = index % self.entities_per_chunk;
            let segment = (self.entities_per_chunk - offset).min(total - done);

            // SAFETY: the segment stays within one chunk and addresses
            // uninitialized slots past the current length.
            unsafe {
                let handles = self.chunks[chunk].base().cast::<Entity>().add(offset);
                std::ptr::copy_nonoverlapping(entities.as_ptr().add(done), handles, segment);

                for col in 0..self.components.len() {
                    if let Some(create) = self.creates[col] {
                        let base = self.chunks[chunk].base();
                        create(
                            base.add(self.offsets[col] + offset * self.sizes[col]),
                            segment,
                        );
                    }
                }
            }
            done += segment;
        }
        self.len = start + total;
    }

    /// Appends one row writing only the entity handle; every column of the
    /// new row is uninitialized and must be written before anything reads,
    /// removes, or drops it. Used by archetype migration, which fills each
    /// column from the source row or constructs it.
    pub(crate) fn push_uninitialized(&mut self, entity: Entity) -> usize {
        let index = self.len;
        self.reserve_rows(index + 1);
        let (chunk, offset) = self.locate(index);
        // SAFETY: slot `index` is within the freshly reserved chunk.
        unsafe {
            self.chunks[chunk]
                .base()
                .cast::<Entity>()
                .add(offset)
                .write(entity);
        }
        self.len = index + 1;
        index
    }

    /// Default-constructs `component` of row `index` in place.
    pub(crate) fn construct_in_place(&mut self, component: ComponentType, index: usize) {
        if let Some(col) = self.column_of(component) {
            if let Some(create) = self.creates[col] {
                // SAFETY: the slot belongs to row `index` and holds no live
                // value.
                unsafe { create(self.raw_ptr(col, index), 1) };
            }
        }
    }

    /// Drops `component` of row `index` in place, leaving raw memory.
    pub(crate) fn destroy_in_place(&mut self, component: ComponentType, index: usize) {
        if let Some(col) = self.column_of(component) {
            if let Some(destroy) = self.destroys[col] {
                // SAFETY: row `index` is live, so the slot holds a value.
                unsafe { destroy(self.raw_ptr(col, index), 1) };
            }
        }
    }

    /// Removes row `index`: destructs its column slots, then compacts by
    /// byte-moving the logically-last row into the vacated slot. Returns the
    /// handle of the relocated entity so the caller can repair its location,
    /// or `None` when the removed row was the last one.
    pub(crate) fn swap_remove(&mut self, index: usize) -> Option<Entity> {
        debug_assert!(index < self.len);
        for col in 0..self.components.len() {
            if let Some(destroy) = self.destroys[col] {
                // SAFETY: row `index` is live.
                unsafe { destroy(self.raw_ptr(col, index), 1) };
            }
        }
        self.swap_remove_moved_out(index)
    }

    /// Like [`Self::swap_remove`] but the removed row's values are already
    /// gone (moved out to another archetype or destructed by the caller), so
    /// only the compaction happens.
    pub(crate) fn swap_remove_moved_out(&mut self, index: usize) -> Option<Entity> {
        debug_assert!(index < self.len);
        let last = self.len - 1;
        let relocated = if index != last {
            let entity = self.entity_at(last);
            // SAFETY: both rows are within live storage; a Rust move is a
            // byte copy, so the last row's values transfer wholesale and
            // its old slots become raw memory.
            unsafe {
                for col in 0..self.components.len() {
                    let size = self.sizes[col];
                    if size != 0 {
                        std::ptr::copy_nonoverlapping(
                            self.raw_ptr(col, last),
                            self.raw_ptr(col, index),
                            size,
                        );
                    }
                }
                let (chunk, offset) = self.locate(index);
                self.chunks[chunk]
                    .base()
                    .cast::<Entity>()
                    .add(offset)
                    .write(entity);
            }
            Some(entity)
        } else {
            None
        };
        self.len = last;
        relocated
    }

    // -- internals ----------------------------------------------------------

    #[inline]
    fn locate(&self, index: usize) -> (usize, usize) {
        (
            index / self.entities_per_chunk,
            index % self.entities_per_chunk,
        )
    }

    #[inline]
    fn raw_ptr(&self, col: usize, index: usize) -> *mut u8 {
        let (chunk, offset) = self.locate(index);
        // SAFETY: the offset was computed from this archetype's layout and
        // stays inside the chunk allocation.
        unsafe {
            self.chunks[chunk]
                .base()
                .add(self.offsets[col] + offset * self.sizes[col])
        }
    }

    fn reserve_rows(&mut self, rows: usize) {
        let needed = rows.div_ceil(self.entities_per_chunk);
        while self.chunks.len() < needed {
            self.chunks.push(Chunk::alloc());
            debug!(
                chunks = self.chunks.len(),
                entities_per_chunk = self.entities_per_chunk,
                "allocated archetype chunk"
            );
        }
    }
}

impl Drop for Archetype {
    fn drop(&mut self) {
        for col in 0..self.components.len() {
            let Some(destroy) = self.destroys[col] else {
                continue;
            };
            let mut remaining = self.len;
            let mut chunk = 0;
            while remaining > 0 {
                let segment = remaining.min(self.entities_per_chunk);
                // SAFETY: the first `segment` slots of this column in this
                // chunk are live values.
                unsafe { destroy(self.chunks[chunk].base().add(self.offsets[col]), segment) };
                remaining -= segment;
                chunk += 1;
            }
        }
    }
}

impl std::fmt::Debug for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archetype")
            .field("signature", &self.signature)
            .field("len", &self.len)
            .field("entities_per_chunk", &self.entities_per_chunk)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}
