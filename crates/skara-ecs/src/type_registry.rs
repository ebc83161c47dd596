//! Component and tag type registration.
//!
//! Every component and tag type used by the runtime is registered once,
//! up front, and assigned a dense numeric handle: components and tags live
//! in disjoint id spaces, each with its own fixed capacity. Handle value 0
//! is reserved as the invalid (falsy) handle in both spaces; the registry
//! keeps a dummy descriptor at index 0 so a handle's value doubles as its
//! table index.
//!
//! Per-component metadata carries the size, alignment, and the function
//! table the type-erased column storage dispatches through. Moves in Rust
//! are bitwise, so the table holds only the two operations that can be
//! non-trivial: default construction and drop. A `None` entry marks the
//! operation trivial and the column is treated as raw bytes.
//!
//! # Safety
//!
//! The function pointers in [`ComponentTypeDesc`] are monomorphized from the
//! registered Rust type and are only ever invoked by archetype storage on
//! pointers it derived from that same descriptor's size and alignment.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::handle_pool::Entity;
use crate::limits::{CHUNK_ALIGN, CHUNK_SIZE, MAX_COMPONENT_TYPES, MAX_TAG_TYPES};

/// A data type attachable to entities. Implement this marker for every type
/// registered as a component. `Default` supplies the construct operation
/// used when a column slot is created without an explicit value.
pub trait Component: Default + 'static {}

/// A zero-sized marker type used only for signature and filter membership.
pub trait Tag: 'static {}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Dense handle for a registered component type. Value 0 is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentType(u32);

/// Dense handle for a registered tag type. Value 0 is invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagType(u32);

macro_rules! impl_type_handle {
    ($name:ident) => {
        impl $name {
            pub const INVALID: Self = Self(0);

            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != 0
            }

            /// Dense id, also the descriptor table index.
            #[inline]
            pub fn id(self) -> u32 {
                self.0
            }

            #[inline]
            pub(crate) fn from_id(id: u32) -> Self {
                Self(id)
            }
        }
    };
}

impl_type_handle!(ComponentType);
impl_type_handle!(TagType);

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Default-constructs `count` contiguous slots starting at `ptr`.
pub type CreateFn = unsafe fn(*mut u8, usize);
/// Drops `count` contiguous live values starting at `ptr`.
pub type DestroyFn = unsafe fn(*mut u8, usize);

/// Metadata describing one registered component type.
#[derive(Clone)]
pub struct ComponentTypeDesc {
    pub type_id: TypeId,
    pub name: &'static str,
    pub size: usize,
    pub align: usize,
    /// Default-constructs new slots; `None` marks construction trivial and
    /// slots are left as raw bytes.
    pub create: Option<CreateFn>,
    /// `None` when the type has no drop glue.
    pub destroy: Option<DestroyFn>,
}

impl ComponentTypeDesc {
    /// Builds the descriptor for a concrete component type, monomorphizing
    /// its construct/drop entries.
    pub fn of<T: Component>() -> Self {
        unsafe fn create_slots<T: Default>(ptr: *mut u8, count: usize) {
            let ptr = ptr.cast::<T>();
            for i in 0..count {
                // SAFETY: caller guarantees `ptr` addresses `count` properly
                // aligned, uninitialized slots of `T`.
                unsafe { ptr.add(i).write(T::default()) };
            }
        }
        unsafe fn destroy_slots<T>(ptr: *mut u8, count: usize) {
            // SAFETY: caller guarantees `count` live values of `T` at `ptr`.
            unsafe {
                std::ptr::drop_in_place(std::ptr::slice_from_raw_parts_mut(ptr.cast::<T>(), count))
            };
        }

        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            create: Some(create_slots::<T>),
            destroy: if std::mem::needs_drop::<T>() {
                Some(destroy_slots::<T>)
            } else {
                None
            },
        }
    }
}

impl std::fmt::Debug for ComponentTypeDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentTypeDesc")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .finish()
    }
}

/// Metadata describing one registered tag type.
#[derive(Debug, Clone)]
pub struct TagTypeDesc {
    pub type_id: TypeId,
    pub name: &'static str,
}

impl TagTypeDesc {
    pub fn of<T: Tag>() -> Self {
        debug_assert!(
            std::mem::size_of::<T>() == 0,
            "tag type {} must be zero-sized",
            std::any::type_name::<T>()
        );
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Registry of component and tag types with dense, disjoint id spaces.
///
/// Registration failures (duplicate type, capacity exhausted, a layout no
/// storage chunk can hold) surface as [`ComponentType::INVALID`] /
/// [`TagType::INVALID`], never as panics: callers test truthiness during
/// startup.
pub struct TypeRegistry {
    // Index 0 of each table is a reserved dummy so id == index.
    components: Vec<ComponentTypeDesc>,
    tags: Vec<TagTypeDesc>,
    component_ids: HashMap<TypeId, ComponentType>,
    tag_ids: HashMap<TypeId, TagType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let dummy_component = ComponentTypeDesc {
            type_id: TypeId::of::<()>(),
            name: "",
            size: 0,
            align: 1,
            create: None,
            destroy: None,
        };
        let dummy_tag = TagTypeDesc {
            type_id: TypeId::of::<()>(),
            name: "",
        };
        Self {
            components: vec![dummy_component],
            tags: vec![dummy_tag],
            component_ids: HashMap::new(),
            tag_ids: HashMap::new(),
        }
    }

    // -- components ---------------------------------------------------------

    /// Registers a component type. Returns the invalid handle if the type is
    /// already registered, the capacity is exhausted, or the type's layout
    /// can never fit a storage chunk. Archetype storage relies on every
    /// registered type passing the layout check, so it is enforced here, not
    /// at archetype creation.
    pub fn register_component(&mut self, desc: ComponentTypeDesc) -> ComponentType {
        // A row holding this component alone must fit one chunk after
        // worst-case alignment padding.
        if desc.align > CHUNK_ALIGN
            || std::mem::size_of::<Entity>() + desc.size > CHUNK_SIZE - (desc.align - 1)
        {
            warn!(
                name = desc.name,
                size = desc.size,
                align = desc.align,
                "rejected component type: layout does not fit chunk storage"
            );
            return ComponentType::INVALID;
        }
        if self.component_ids.contains_key(&desc.type_id)
            || self.components.len() >= MAX_COMPONENT_TYPES
        {
            return ComponentType::INVALID;
        }
        let handle = ComponentType(self.components.len() as u32);
        debug!(name = desc.name, id = handle.id(), size = desc.size, "registered component type");
        self.component_ids.insert(desc.type_id, handle);
        self.components.push(desc);
        handle
    }

    /// Idempotent registration: returns the existing handle when the type is
    /// already known.
    pub fn get_or_register_component(&mut self, desc: ComponentTypeDesc) -> ComponentType {
        match self.component_ids.get(&desc.type_id) {
            Some(&handle) => handle,
            None => self.register_component(desc),
        }
    }

    /// Looks up a component type; invalid handle if unknown.
    pub fn find_component(&self, type_id: TypeId) -> ComponentType {
        self.component_ids
            .get(&type_id)
            .copied()
            .unwrap_or(ComponentType::INVALID)
    }

    /// Descriptor for a previously-registered component type.
    ///
    /// Passing an invalid or out-of-range handle is a contract violation.
    pub fn component_desc(&self, component: ComponentType) -> &ComponentTypeDesc {
        debug_assert!(component.is_valid() && (component.id() as usize) < self.components.len());
        &self.components[component.id() as usize]
    }

    pub fn component_count(&self) -> usize {
        self.components.len() - 1
    }

    // -- tags ---------------------------------------------------------------

    /// Registers a tag type in its own id space; same failure contract as
    /// [`Self::register_component`].
    pub fn register_tag_type(&mut self, desc: TagTypeDesc) -> TagType {
        if self.tag_ids.contains_key(&desc.type_id) || self.tags.len() >= MAX_TAG_TYPES {
            return TagType::INVALID;
        }
        let handle = TagType(self.tags.len() as u32);
        debug!(name = desc.name, id = handle.id(), "registered tag type");
        self.tag_ids.insert(desc.type_id, handle);
        self.tags.push(desc);
        handle
    }

    pub fn get_or_register_tag_type(&mut self, desc: TagTypeDesc) -> TagType {
        match self.tag_ids.get(&desc.type_id) {
            Some(&handle) => handle,
            None => self.register_tag_type(desc),
        }
    }

    pub fn find_tag(&self, type_id: TypeId) -> TagType {
        self.tag_ids
            .get(&type_id)
            .copied()
            .unwrap_or(TagType::INVALID)
    }

    pub fn tag_desc(&self, tag: TagType) -> &TagTypeDesc {
        debug_assert!(tag.is_valid() && (tag.id() as usize) < self.tags.len());
        &self.tags[tag.id() as usize]
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len() - 1
    }

    // -- typed conveniences -------------------------------------------------

    pub fn register<T: Component>(&mut self) -> ComponentType {
        self.register_component(ComponentTypeDesc::of::<T>())
    }

    pub fn get_or_register<T: Component>(&mut self) -> ComponentType {
        self.get_or_register_component(ComponentTypeDesc::of::<T>())
    }

    pub fn find<T: Component>(&self) -> ComponentType {
        self.find_component(TypeId::of::<T>())
    }

    pub fn register_tag<T: Tag>(&mut self) -> TagType {
        self.register_tag_type(TagTypeDesc::of::<T>())
    }

    pub fn get_or_register_tag<T: Tag>(&mut self) -> TagType {
        self.get_or_register_tag_type(TagTypeDesc::of::<T>())
    }

    pub fn find_tag_type<T: Tag>(&self) -> TagType {
        self.find_tag(TypeId::of::<T>())
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("components", &self.component_count())
            .field("tags", &self.tag_count())
            .finish()
    }
}
