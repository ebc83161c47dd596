//! Skara ECS -- archetype-based entity storage and system scheduling.
//!
//! Entities are grouped by their exact set of component and tag types into
//! *archetypes*. Each archetype stores its entities in fixed-size chunks
//! using a Structure-of-Arrays (SoA) layout, so iterating one component type
//! walks contiguous memory. Generational entity handles keep references
//! stable across structural changes and make stale handles detectable.
//!
//! Per-frame update routines ("systems") declare ordering constraints against
//! named barriers; [`system::SystemGraphBuilder`] turns those declarations
//! into a dependency graph which is validated and linearized once at startup.
//!
//! # Quick Start
//!
//! ```
//! use skara_ecs::prelude::*;
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//! impl Component for Position {}
//!
//! #[derive(Debug, Default, Clone, PartialEq)]
//! struct Velocity { dx: f32, dy: f32 }
//! impl Component for Velocity {}
//!
//! let mut registry = EntityRegistry::new();
//! let entity = registry.create::<(Position, Velocity)>(1);
//! assert!(entity.is_valid());
//!
//! *registry.get_mut::<Velocity>(entity) = Velocity { dx: 1.0, dy: 0.0 };
//!
//! registry.range_mut::<(&mut Position, &Velocity)>().for_each(|_e, (pos, vel)| {
//!     pos.x += vel.dx;
//!     pos.y += vel.dy;
//! });
//!
//! assert_eq!(registry.get::<Position>(entity).x, 1.0);
//! ```

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod archetype;
pub mod deferred;
pub mod handle_pool;
pub mod limits;
#[allow(unsafe_code)]
pub mod range;
#[allow(unsafe_code)]
pub mod registry;
pub mod system;
#[allow(unsafe_code)]
pub mod type_registry;
pub mod type_set;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by fallible registry operations.
///
/// Capacity exhaustion and duplicate registration are *not* errors: those
/// surface as invalid (falsy) handles so they can be tested for truthiness
/// during startup registration. Contract violations (stale handle passed to
/// an infallible accessor, missing component in [`registry::EntityRegistry::get`])
/// are debug assertions, not error values.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: handle_pool::Entity },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' is not registered")]
    UnknownComponent { name: &'static str },

    /// The entity is alive but its archetype does not store the component.
    #[error("entity {entity:?} has no '{name}' component")]
    MissingComponent {
        entity: handle_pool::Entity,
        name: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::deferred::DeferredBuffer;
    pub use crate::handle_pool::Entity;
    pub use crate::registry::EntityRegistry;
    pub use crate::system::{
        ScheduleError, SystemDescriptor, SystemGraph, SystemGraphBuilder, UpdateContext,
    };
    pub use crate::type_registry::{Component, ComponentType, Tag, TagType};
    pub use crate::type_set::{ComponentAndTagSets, TypeSet};
    pub use crate::EcsError;
}
