//! # Component registry
//!
//! This module provides a process-wide registry that assigns stable
//! `ComponentID` values to Rust component types and exposes type-erased
//! column factories for table construction.
//!
//! ## Purpose
//! The registry decouples component type information (`TypeId`, name, size,
//! tag classification) from runtime storage, enabling tables to allocate
//! heterogeneous component columns behind [`ColumnStorage`] without knowing
//! the concrete element type.
//!
//! ## Design
//! - Components are registered once and assigned a compact `ComponentID`
//!   in `[0, COMPONENT_CAP)`; registration is idempotent.
//! - A per-component factory function (the buffer prototype) is stored for
//!   constructing empty column storage.
//! - Zero-size types are classified as **tags**: their presence matters but
//!   they never receive a column.
//! - A component may carry an optional pre-removal hook, fired on the
//!   outgoing column when the component is removed from an entity.
//!
//! ## Invariants
//! - `ComponentID` values are unique and stable for the lifetime of the
//!   process.
//! - A registered component always has a corresponding storage factory.
//!
//! ## Concurrency
//! The registry is protected by `RwLock` for concurrent reads and
//! serialized writes. Factories and hooks are stored in side tables behind
//! their own locks and are only written during registration.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    mem::size_of,
    sync::{OnceLock, RwLock},
};

use crate::engine::error::RegistryError;
use crate::engine::storage::{Column, ColumnStorage, RemovalHook};
use crate::engine::types::{ComponentID, COMPONENT_CAP};

/// Factory function constructing an empty type-erased column for one
/// component type.
pub type ColumnFactory = fn() -> Box<dyn ColumnStorage>;

/// Global table of column factories indexed by `ComponentID`.
///
/// ## Invariants
/// - `factories[id]` is `Some` if and only if component `id` is registered
///   and is not a tag.
/// - The table length is always `COMPONENT_CAP`.
static COLUMN_FACTORIES: OnceLock<RwLock<Vec<Option<ColumnFactory>>>> = OnceLock::new();

fn column_factories() -> &'static RwLock<Vec<Option<ColumnFactory>>> {
    COLUMN_FACTORIES.get_or_init(|| RwLock::new(vec![None; COMPONENT_CAP]))
}

/// Global table of pre-removal hooks indexed by `ComponentID`.
///
/// Each entry holds a type-erased [`RemovalHook<T>`] for the component's
/// concrete type; the column factory downcasts it back at construction.
static REMOVAL_HOOKS: OnceLock<RwLock<Vec<Option<Box<dyn Any + Send + Sync>>>>> = OnceLock::new();

fn removal_hooks() -> &'static RwLock<Vec<Option<Box<dyn Any + Send + Sync>>>> {
    REMOVAL_HOOKS.get_or_init(|| {
        RwLock::new((0..COMPONENT_CAP).map(|_| None).collect())
    })
}

fn new_column_storage<T: 'static + Send + Sync + Default + Clone>() -> Box<dyn ColumnStorage> {
    Box::new(Column::<T>::with_hook(removal_hook_of::<T>()))
}

fn removal_hook_of<T: 'static + Send + Sync>() -> Option<RemovalHook<T>> {
    let component_id = component_id_of::<T>().ok()?;
    let hooks = removal_hooks().read().unwrap();
    hooks[component_id as usize]
        .as_ref()
        .and_then(|hook| hook.downcast_ref::<RemovalHook<T>>())
        .cloned()
}

/// Global mapping between Rust component types and compact `ComponentID`
/// values.
///
/// ## Design
/// - `by_type` maps `TypeId -> ComponentID`.
/// - `by_id` stores `ComponentDesc` indexed by `ComponentID`.
/// - `next_id` assigns new IDs sequentially until `COMPONENT_CAP`.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]`.
/// - IDs are always in bounds of `COMPONENT_CAP`.
pub struct ComponentRegistry {
    next_id: ComponentID,
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<Option<ComponentDesc>>,
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(ComponentRegistry {
            next_id: 0,
            by_type: HashMap::new(),
            by_id: vec![None; COMPONENT_CAP],
        })
    })
}

impl ComponentRegistry {
    fn alloc_id(&mut self) -> Result<ComponentID, RegistryError> {
        let component_id = self.next_id;
        if (component_id as usize) >= COMPONENT_CAP {
            return Err(RegistryError::CapacityExceeded { capacity: COMPONENT_CAP });
        }
        self.next_id = component_id.wrapping_add(1);
        Ok(component_id)
    }

    /// Registers component type `T` and returns its assigned `ComponentID`.
    ///
    /// ## Behavior
    /// - If `T` is already registered, returns the existing ID.
    /// - Otherwise allocates a new ID, stores a `ComponentDesc`, and
    ///   installs the column factory for non-tag types.
    ///
    /// ## Errors
    /// `CapacityExceeded` once `COMPONENT_CAP` distinct types exist.
    pub fn register<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
    ) -> Result<ComponentID, RegistryError> {
        let type_id = TypeId::of::<T>();
        if let Some(&existing) = self.by_type.get(&type_id) {
            return Ok(existing);
        }

        let id = self.alloc_id()?;
        let desc = ComponentDesc::of::<T>().with_id(id);
        self.by_type.insert(type_id, id);
        self.by_id[id as usize] = Some(desc);

        if !desc.is_tag {
            column_factories().write().unwrap()[id as usize] = Some(new_column_storage::<T>);
        }
        Ok(id)
    }

    /// Returns the `ComponentID` associated with a `TypeId`, if registered.
    pub fn id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the component descriptor for a `ComponentID`, if registered.
    pub fn description(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize).and_then(|d| d.as_ref())
    }

    /// Returns the number of component types registered so far.
    pub fn registered_count(&self) -> usize {
        self.next_id as usize
    }
}

/// Registers component type `T` in the global registry.
///
/// Idempotent: registering an already-known type returns its existing ID.
///
/// ## Errors
/// `CapacityExceeded` if the fixed component ID space is exhausted.
///
/// ## Panics
/// Panics if the registry lock is poisoned.
pub fn register_component<T: 'static + Send + Sync + Default + Clone>(
) -> Result<ComponentID, RegistryError> {
    let mut registry = component_registry().write().unwrap();
    registry.register::<T>()
}

/// Registers component type `T` and installs a pre-removal hook.
///
/// The hook fires on the outgoing column, with the entity and the value
/// about to be discarded, whenever `T` is removed from an entity. It does
/// not fire on entity destruction. Registering a hook for an
/// already-hooked type replaces the previous hook; columns created before
/// the change keep the hook they were built with.
pub fn register_component_with_removal_hook<T, F>(
    hook: F,
) -> Result<ComponentID, RegistryError>
where
    T: 'static + Send + Sync + Default + Clone,
    F: Fn(crate::engine::types::EntityID, &T) + Send + Sync + 'static,
{
    let id = register_component::<T>()?;
    let hook: RemovalHook<T> = std::sync::Arc::new(hook);
    removal_hooks().write().unwrap()[id as usize] = Some(Box::new(hook));
    Ok(id)
}

/// Returns the registered `ComponentID` for type `T`.
///
/// ## Errors
/// `NotRegistered` if `T` was never registered.
pub fn component_id_of<T: 'static>() -> Result<ComponentID, RegistryError> {
    let registry = component_registry().read().unwrap();
    registry
        .id_of_type_id(TypeId::of::<T>())
        .ok_or(RegistryError::NotRegistered { name: type_name::<T>() })
}

/// Returns the `ComponentID` associated with a runtime `TypeId`.
///
/// ## Errors
/// `NotRegistered` if no component with this `TypeId` was registered.
pub fn component_id_of_type_id(type_id: TypeId) -> Result<ComponentID, RegistryError> {
    let registry = component_registry().read().unwrap();
    registry
        .id_of_type_id(type_id)
        .ok_or(RegistryError::NotRegistered { name: "<unregistered TypeId>" })
}

/// Returns a copy of the descriptor for `component_id`, if registered.
pub fn component_description(component_id: ComponentID) -> Option<ComponentDesc> {
    let registry = component_registry().read().unwrap();
    registry.description(component_id).copied()
}

/// Returns `true` if `component_id` names a zero-size tag component.
///
/// Unregistered IDs report `false`.
pub fn is_tag(component_id: ComponentID) -> bool {
    component_description(component_id).map(|d| d.is_tag).unwrap_or(false)
}

/// Returns the number of component types registered so far.
pub fn registered_component_count() -> usize {
    component_registry().read().unwrap().registered_count()
}

/// Creates an empty type-erased column for `component_id`.
///
/// ## Errors
/// `NotRegistered` if the ID has no factory (never registered, or a tag
/// component, which stores no values).
pub fn make_empty_column(component_id: ComponentID) -> Result<Box<dyn ColumnStorage>, RegistryError> {
    let factory = column_factories().read().unwrap()[component_id as usize];
    match factory {
        Some(factory) => Ok(factory()),
        None => Err(RegistryError::NotRegistered {
            name: component_description(component_id)
                .map(|d| d.name)
                .unwrap_or("<unregistered component id>"),
        }),
    }
}

/// Describes a registered component type.
///
/// `ComponentDesc` is `Copy` and safe to clone freely for reporting and
/// diagnostics.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the component type in bytes.
    pub size: usize,

    /// Whether the component is a zero-size tag with no stored values.
    pub is_tag: bool,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T` from its compile-time metadata.
    ///
    /// The returned descriptor uses `component_id = 0` and is finalized via
    /// `with_id`.
    #[inline]
    pub fn of<T: 'static>() -> Self {
        Self {
            component_id: 0,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            is_tag: size_of::<T>() == 0,
        }
    }

    /// Returns a copy of this descriptor with `component_id` set.
    #[inline]
    pub fn with_id(mut self, component_id: ComponentID) -> Self {
        self.component_id = component_id;
        self
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, tag: {} }}",
            self.component_id, self.name, self.size, self.is_tag
        )
    }
}
