//! Pooled columnar storage and type-erased column access.
//!
//! This module implements the column layer of the store: [`Column<T>`], a
//! growable buffer holding one component's values for one table, and
//! [`ColumnStorage`], the dynamically-typed interface tables use to manage
//! heterogeneous columns uniformly.
//!
//! # What this module provides
//!
//! - **`Column<T>`**: dense storage for a single component type, with
//!   doubling growth, constant-time slot access, default-reset removal, and
//!   cross-buffer element moves for table migration.
//! - **`ColumnStorage`**: the closed set of type-erased operations a table
//!   needs (grow, remove, clear, move-between-buffers, removal
//!   notification) plus downcasting hooks back to the concrete column.
//! - **A process-wide buffer pool**: tables are created and destroyed
//!   frequently as new signatures appear, so column backing memory is drawn
//!   from and returned to a shared pool keyed by element type instead of
//!   being allocated fresh each time.
//!
//! # Storage model
//!
//! A column's backing `Vec<T>` length is its grown capacity; the logical
//! occupancy of each slot is owned by the table (its slot array and
//! free-slot set). Every grown slot always holds a well-defined value:
//! growth fills with `T::default()`, and removal resets the slot back to
//! `T::default()` so no stale values or owned resources linger.
//!
//! # Pool discipline
//!
//! Buffers move by ownership: `acquire_buffer` transfers a spare buffer out
//! of the pool (or allocates a fresh one) and `release_buffer` clears and
//! returns it. A pooled buffer therefore can never back two live columns.
//! Columns release their buffer on drop, which is the only return-to-pool
//! point, so disposal of a table (or world teardown) recycles all of its
//! column memory.
//!
//! # Type erasure
//!
//! Cross-buffer operations go through [`ColumnStorage`] and downcast via
//! `as_any` / `as_any_mut`. A move between columns of different element
//! types is a checked [`StorageError::TypeMismatch`], never a silent
//! reinterpretation. This is a fixed vtable built once per registered type;
//! there is no reflection-style dispatch.

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock},
};

use crate::engine::error::StorageError;
use crate::engine::types::{EntityID, SlotID};

/// Minimum number of slots a column grows to on first use.
const MIN_COLUMN_ROOM: usize = 64;

/// Pre-removal notification hook for one component type.
///
/// Invoked with the entity and the outgoing value just before the value is
/// discarded by a component removal.
pub type RemovalHook<T> = Arc<dyn Fn(EntityID, &T) + Send + Sync>;

type PoolMap = HashMap<TypeId, Vec<Box<dyn Any + Send>>>;

static BUFFER_POOL: OnceLock<Mutex<PoolMap>> = OnceLock::new();

fn buffer_pool() -> &'static Mutex<PoolMap> {
    BUFFER_POOL.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Takes a spare buffer for element type `T` out of the shared pool, or
/// allocates a fresh one if none is available.
///
/// The returned buffer is empty (length zero) but may carry reusable
/// capacity from a previous owner.
///
/// ## Panics
/// Panics if the pool lock is poisoned.
pub fn acquire_buffer<T: 'static + Send>() -> Vec<T> {
    let mut pool = buffer_pool().lock().unwrap();
    if let Some(spares) = pool.get_mut(&TypeId::of::<T>()) {
        while let Some(spare) = spares.pop() {
            if let Ok(buffer) = spare.downcast::<Vec<T>>() {
                return *buffer;
            }
        }
    }
    Vec::new()
}

/// Clears `buffer` and returns it to the shared pool for element type `T`.
///
/// Buffers with no allocated capacity are dropped instead of pooled.
///
/// ## Panics
/// Panics if the pool lock is poisoned.
pub fn release_buffer<T: 'static + Send>(mut buffer: Vec<T>) {
    if buffer.capacity() == 0 {
        return;
    }
    buffer.clear();
    let mut pool = buffer_pool().lock().unwrap();
    pool.entry(TypeId::of::<T>())
        .or_default()
        .push(Box::new(buffer));
}

/// Returns how many spare buffers the pool currently holds for element
/// type `T`. Diagnostic accessor used by tests and tooling.
pub fn pooled_buffer_count<T: 'static>() -> usize {
    let pool = buffer_pool().lock().unwrap();
    pool.get(&TypeId::of::<T>()).map(|spares| spares.len()).unwrap_or(0)
}

/// A type-erased interface over one table's component column.
///
/// Tables hold their columns as `Box<dyn ColumnStorage>` and drive them
/// through this closed operation set. Implementations must keep every slot
/// in `[0, capacity)` holding a well-defined value at all times.
///
/// # Downcasting
/// Implementers return `self` cast to `&dyn Any` / `&mut dyn Any` so
/// callers can attempt a `downcast` to the concrete [`Column<T>`] for typed
/// slice access.
pub trait ColumnStorage: Any + Send + Sync {
    /// Returns the number of grown (addressable) slots.
    fn capacity(&self) -> usize;

    /// Returns the `TypeId` of the element type stored by this column.
    fn element_type_id(&self) -> TypeId;

    /// Returns the human-readable name of the element type stored.
    fn element_type_name(&self) -> &'static str;

    /// Returns an immutable type-erased reference for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns a mutable type-erased reference for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Grows the column so that slots `[0, slots)` are addressable.
    ///
    /// Growth doubles capacity and fills new slots with the element type's
    /// default value; the column never shrinks here.
    fn ensure_capacity(&mut self, slots: usize);

    /// Resets the value at `slot` to the element type's default.
    ///
    /// This prevents removed slots from retaining stale values or owned
    /// resources; it is not a deallocation.
    fn remove(&mut self, slot: SlotID) -> Result<(), StorageError>;

    /// Resets the whole column back to zero grown slots.
    fn clear(&mut self);

    /// Moves (copies) the element at `src_slot` into `target` at
    /// `dst_slot`.
    ///
    /// Used exclusively during table migration; the target column must
    /// already have room for `dst_slot`.
    ///
    /// ## Errors
    /// - `TypeMismatch` if `target` stores a different element type.
    /// - `SlotOutOfBounds` if either slot is outside its column's capacity.
    fn move_to(
        &self,
        src_slot: SlotID,
        target: &mut dyn ColumnStorage,
        dst_slot: SlotID,
    ) -> Result<(), StorageError>;

    /// Returns `true` if a pre-removal hook is installed on this column.
    fn has_removal_hook(&self) -> bool;

    /// Fires the pre-removal hook for the value at `slot`, if one is
    /// installed and the slot is within capacity.
    fn notify_removal(&self, entity: EntityID, slot: SlotID);
}

/// Dense storage for one component type in one table.
///
/// ## Invariants
/// - `data.len()` is the grown capacity; every index below it holds a
///   well-defined value.
/// - Vacated slots and freshly grown slots hold `T::default()`.
/// - The backing buffer comes from the shared pool and returns to it on
///   drop.
pub struct Column<T: 'static + Send + Sync + Default + Clone> {
    data: Vec<T>,
    on_remove: Option<RemovalHook<T>>,
}

impl<T: 'static + Send + Sync + Default + Clone> Column<T> {
    /// Creates an empty column, optionally carrying a pre-removal hook.
    ///
    /// Backing memory is acquired from the shared buffer pool.
    pub fn with_hook(on_remove: Option<RemovalHook<T>>) -> Self {
        Self { data: acquire_buffer(), on_remove }
    }

    /// Returns a view of the first `len` slots (clamped to capacity).
    #[inline]
    pub fn slice(&self, len: usize) -> &[T] {
        &self.data[..len.min(self.data.len())]
    }

    /// Returns a mutable view of the first `len` slots (clamped to
    /// capacity).
    #[inline]
    pub fn slice_mut(&mut self, len: usize) -> &mut [T] {
        let len = len.min(self.data.len());
        &mut self.data[..len]
    }

    /// Returns the value at `slot`, if within capacity.
    #[inline]
    pub fn value(&self, slot: SlotID) -> Option<&T> {
        self.data.get(slot as usize)
    }

    /// Returns a mutable reference to the value at `slot`, if within
    /// capacity.
    #[inline]
    pub fn value_mut(&mut self, slot: SlotID) -> Option<&mut T> {
        self.data.get_mut(slot as usize)
    }

    /// Writes `value` into `slot`.
    ///
    /// ## Errors
    /// `SlotOutOfBounds` if the slot was never grown.
    pub fn write(&mut self, slot: SlotID, value: T) -> Result<(), StorageError> {
        let capacity = self.data.len();
        match self.data.get_mut(slot as usize) {
            Some(target) => {
                *target = value;
                Ok(())
            }
            None => Err(StorageError::SlotOutOfBounds { slot, capacity }),
        }
    }
}

impl<T: 'static + Send + Sync + Default + Clone> Default for Column<T> {
    fn default() -> Self {
        Self::with_hook(None)
    }
}

impl<T: 'static + Send + Sync + Default + Clone> Drop for Column<T> {
    fn drop(&mut self) {
        release_buffer(std::mem::take(&mut self.data));
    }
}

impl<T: 'static + Send + Sync + Default + Clone> ColumnStorage for Column<T> {
    fn capacity(&self) -> usize { self.data.len() }

    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }

    fn element_type_name(&self) -> &'static str { type_name::<T>() }

    fn as_any(&self) -> &dyn Any { self }

    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn ensure_capacity(&mut self, slots: usize) {
        if slots > self.data.len() {
            let target = (slots * 2).max(MIN_COLUMN_ROOM);
            self.data.resize(target, T::default());
        }
    }

    fn remove(&mut self, slot: SlotID) -> Result<(), StorageError> {
        let capacity = self.data.len();
        match self.data.get_mut(slot as usize) {
            Some(target) => {
                *target = T::default();
                Ok(())
            }
            None => Err(StorageError::SlotOutOfBounds { slot, capacity }),
        }
    }

    fn clear(&mut self) {
        self.data.clear();
    }

    fn move_to(
        &self,
        src_slot: SlotID,
        target: &mut dyn ColumnStorage,
        dst_slot: SlotID,
    ) -> Result<(), StorageError> {
        // Capture immutable info first; the downcast takes the mutable
        // borrow of `target`.
        let actual = target.element_type_name();
        let target_capacity = target.capacity();

        let Some(typed_target) = target.as_any_mut().downcast_mut::<Column<T>>() else {
            return Err(StorageError::TypeMismatch { expected: type_name::<T>(), actual });
        };

        let value = self
            .data
            .get(src_slot as usize)
            .ok_or(StorageError::SlotOutOfBounds { slot: src_slot, capacity: self.data.len() })?
            .clone();

        match typed_target.data.get_mut(dst_slot as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StorageError::SlotOutOfBounds { slot: dst_slot, capacity: target_capacity }),
        }
    }

    fn has_removal_hook(&self) -> bool {
        self.on_remove.is_some()
    }

    fn notify_removal(&self, entity: EntityID, slot: SlotID) {
        if let Some(hook) = &self.on_remove {
            if let Some(value) = self.data.get(slot as usize) {
                hook(entity, value);
            }
        }
    }
}
