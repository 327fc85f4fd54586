//! # archetable
//!
//! Archetype-based columnar entity/component storage engine: a columnar
//! database for simulation-style object state, optimized for bulk,
//! type-filtered scans rather than single-record lookup.
//!
//! ## Design
//! - Entities are opaque 64-bit handles with generation-tagged indices
//! - Entities sharing an identical component signature live in one shared
//!   columnar table, so iteration over any component combination is a set
//!   of contiguous-memory scans
//! - Signatures deduplicate through a fixed-width bit-set key
//! - Column backing memory recycles through a shared buffer pool
//! - Queries resolve once, rebuild lazily when new tables appear, and
//!   offer both sequential iteration and a work-split parallel transform
//!
//! ## Example
//! ```
//! use archetable::{Query, World};
//! use std::any::TypeId;
//!
//! #[derive(Clone, Copy, Default, PartialEq, Debug)]
//! struct Position { x: i32 }
//!
//! #[derive(Clone, Copy, Default, PartialEq, Debug)]
//! struct Velocity { x: i32 }
//!
//! let mut world = World::new();
//! world.register_component::<Position>().unwrap();
//! world.register_component::<Velocity>().unwrap();
//!
//! let entity = world.create_entity();
//! world.set_component(entity, Position { x: 1 }).unwrap();
//! world.set_component(entity, Velocity { x: 2 }).unwrap();
//!
//! let mut query = Query::new(
//!     &world,
//!     &[TypeId::of::<Position>(), TypeId::of::<Velocity>()],
//! )
//! .unwrap();
//!
//! query
//!     .each2::<Position, Velocity, _>(&mut world, |_entity, position, velocity| {
//!         position.x += velocity.x;
//!     })
//!     .unwrap();
//!
//! assert_eq!(world.get_component::<Position>(entity).unwrap(), Some(Position { x: 3 }));
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod engine;

// Re-exports (public API)

pub use engine::component::{
    component_id_of, register_component, register_component_with_removal_hook, ComponentDesc,
};

pub use engine::error::{EcsError, EcsResult, RegistryError, StorageError};

pub use engine::query::{Query, SingleTypeIter};

pub use engine::storage::{Column, ColumnStorage};

pub use engine::table::{OccupiedSlots, Table};

pub use engine::types::{ComponentID, EntityID, SignatureKey, SlotID, TableID, COMPONENT_CAP};

pub use engine::world::{EntityRecord, World, EMPTY_TABLE};
