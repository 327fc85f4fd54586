//! Archetype tables: dense storage for entities sharing one signature.
//!
//! A [`Table`] stores every entity whose component signature is exactly the
//! table's signature, one pooled column per non-tag component, laid out
//! column-major so queries scan contiguous memory.
//!
//! ## Slot lifecycle
//!
//! - `add_slot` reuses the **lowest** free slot index first, keeping the
//!   occupied range compact and bounding iteration cost; only when no free
//!   slot exists does it append, growing every column.
//! - `remove_slot` tombstones: the slot's column values are reset to their
//!   defaults and the index joins the sorted free set. Later slots keep
//!   their indices; nothing is compacted.
//! - Iteration walks slot indices in order and skips free slots by merging
//!   against the sorted free set, so randomized deletion cost is paid once
//!   per skip, not per entity.
//!
//! ## Invariants
//!
//! - `real_count() == slot_count() - free count`.
//! - Every occupied slot stores a non-zero entity ID that resolves, through
//!   the world directory, back to this table and slot.
//! - All columns have identical grown capacity covering `slot_count()`.
//! - Tables are only ever created through the world's signature index, so
//!   at most one table exists per distinct signature key.

use std::collections::{BTreeSet, HashMap};

use crate::engine::component::{is_tag, make_empty_column};
use crate::engine::error::{EcsError, EcsResult};
use crate::engine::storage::{Column, ColumnStorage};
use crate::engine::types::{ComponentID, EntityID, SignatureKey, SlotID, TableID};

/// The set of entities sharing one exact component signature, stored
/// column-per-component.
pub struct Table {
    table_id: TableID,
    key: SignatureKey,
    /// All component IDs in the signature, sorted ascending (tags included).
    component_ids: Vec<ComponentID>,
    /// Non-tag component IDs, sorted ascending, parallel to `columns`.
    column_ids: Vec<ComponentID>,
    columns: Vec<Box<dyn ColumnStorage>>,
    column_lookup: HashMap<ComponentID, usize>,
    /// Slot index to entity ID; zero marks a vacant slot.
    slots: Vec<EntityID>,
    /// Sorted set of tombstoned slot indices.
    free_slots: BTreeSet<SlotID>,
}

impl Table {
    /// Creates an empty table for the given sorted component ID set.
    ///
    /// One column is manufactured (via the registry's factories) for every
    /// non-tag component; an all-tag signature yields zero columns.
    ///
    /// ## Errors
    /// `NotRegistered` if any non-tag component has no factory.
    pub(crate) fn new(table_id: TableID, component_ids: Vec<ComponentID>) -> EcsResult<Self> {
        debug_assert!(component_ids.windows(2).all(|w| w[0] < w[1]));

        let key = SignatureKey::from_ids(&component_ids);
        let mut column_ids = Vec::new();
        let mut columns: Vec<Box<dyn ColumnStorage>> = Vec::new();
        let mut column_lookup = HashMap::new();

        for &component_id in &component_ids {
            if is_tag(component_id) {
                continue;
            }
            column_lookup.insert(component_id, columns.len());
            column_ids.push(component_id);
            columns.push(make_empty_column(component_id)?);
        }

        Ok(Self {
            table_id,
            key,
            component_ids,
            column_ids,
            columns,
            column_lookup,
            slots: Vec::new(),
            free_slots: BTreeSet::new(),
        })
    }

    /// Returns this table's identifier.
    #[inline]
    pub fn table_id(&self) -> TableID {
        self.table_id
    }

    /// Returns this table's canonical signature key.
    #[inline]
    pub fn key(&self) -> &SignatureKey {
        &self.key
    }

    /// Returns the sorted component IDs of this table's signature.
    #[inline]
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.component_ids
    }

    /// Returns the number of slots ever grown (occupied plus tombstoned).
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of columnar buffers this table owns.
    ///
    /// Tag components store no values, so an all-tag signature yields zero.
    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the number of occupied slots.
    #[inline]
    pub fn real_count(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    /// Returns `true` if the signature contains `component_id`.
    #[inline]
    pub fn has_component(&self, component_id: ComponentID) -> bool {
        self.key.has(component_id)
    }

    /// Returns the column index backing `component_id`, or `None` for tags
    /// and absent components.
    #[inline]
    pub fn column_index(&self, component_id: ComponentID) -> Option<usize> {
        self.column_lookup.get(&component_id).copied()
    }

    /// Returns the entity stored at `slot` (zero if vacant or out of
    /// range).
    #[inline]
    pub fn entity_at(&self, slot: SlotID) -> EntityID {
        self.slots.get(slot as usize).copied().unwrap_or(0)
    }

    /// Assigns a slot to `entity` and records its ID there.
    ///
    /// Reuses the lowest tombstoned slot when one exists; otherwise appends
    /// a fresh slot and grows every column to cover it.
    pub(crate) fn add_slot(&mut self, entity: EntityID) -> SlotID {
        let slot = match self.free_slots.iter().next().copied() {
            Some(lowest) => {
                self.free_slots.remove(&lowest);
                lowest
            }
            None => {
                let slot = self.slots.len() as SlotID;
                self.slots.push(0);
                for column in &mut self.columns {
                    column.ensure_capacity(slot as usize + 1);
                }
                slot
            }
        };

        self.slots[slot as usize] = entity;
        slot
    }

    /// Releases `slot`: resets every column's value there, zeroes the
    /// stored entity ID, and marks the slot free.
    ///
    /// Later slots keep their indices; the table never compacts.
    pub(crate) fn remove_slot(&mut self, slot: SlotID) -> EcsResult<()> {
        if (slot as usize) >= self.slots.len() {
            return Err(EcsError::Internal("remove_slot: slot outside grown range"));
        }
        for column in &mut self.columns {
            column.remove(slot)?;
        }
        self.slots[slot as usize] = 0;
        self.free_slots.insert(slot);
        Ok(())
    }

    /// Moves every component present in **both** signatures from `slot`
    /// here into `other` at `other_slot`.
    ///
    /// Used exclusively by entity migration; the destination slot must
    /// already exist.
    pub(crate) fn copy_components_to(
        &self,
        slot: SlotID,
        other: &mut Table,
        other_slot: SlotID,
    ) -> EcsResult<()> {
        for (index, component_id) in self.column_ids.iter().enumerate() {
            if let Some(other_index) = other.column_lookup.get(component_id).copied() {
                self.columns[index].move_to(slot, other.columns[other_index].as_mut(), other_slot)?;
            }
        }
        Ok(())
    }

    /// Drops all slots and resets every column; the signature and pooled
    /// column buffers survive for reuse.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        for column in &mut self.columns {
            column.clear();
        }
    }

    /// Iterates `(slot, entity)` over occupied slots in index order.
    pub fn occupied(&self) -> OccupiedSlots<'_> {
        OccupiedSlots::new(&self.slots, &self.free_slots, 0, self.slots.len() as SlotID)
    }

    /// Iterates `(slot, entity)` over occupied slots within
    /// `[start, end)`.
    pub fn occupied_range(&self, start: SlotID, end: SlotID) -> OccupiedSlots<'_> {
        let end = end.min(self.slots.len() as SlotID);
        OccupiedSlots::new(&self.slots, &self.free_slots, start.min(end), end)
    }

    /// Returns the type-erased column at `index`.
    #[inline]
    pub(crate) fn column_storage(&self, index: usize) -> &dyn ColumnStorage {
        self.columns[index].as_ref()
    }

    /// Returns the concrete column at `index`, if it stores `T`.
    #[inline]
    pub fn column_ref<T: 'static + Send + Sync + Default + Clone>(
        &self,
        index: usize,
    ) -> Option<&Column<T>> {
        self.columns.get(index)?.as_any().downcast_ref::<Column<T>>()
    }

    /// Returns the concrete mutable column at `index`, if it stores `T`.
    #[inline]
    pub fn column_mut<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        index: usize,
    ) -> Option<&mut Column<T>> {
        self.columns.get_mut(index)?.as_any_mut().downcast_mut::<Column<T>>()
    }

    /// Splits the table into its occupancy data and mutable column list.
    ///
    /// Queries need the slot array and free set (to walk occupancy) while
    /// holding mutable borrows of several columns; returning the disjoint
    /// field borrows from one call satisfies the borrow checker without
    /// copying.
    pub(crate) fn occupancy_and_columns(
        &mut self,
    ) -> (&[EntityID], &BTreeSet<SlotID>, &mut [Box<dyn ColumnStorage>]) {
        (&self.slots, &self.free_slots, &mut self.columns)
    }

    /// Verifies the table's internal accounting.
    ///
    /// Diagnostic entry point, not part of normal control flow; the
    /// `verify` feature runs it automatically after structural mutations.
    pub fn check_invariants(&self) -> EcsResult<()> {
        if self.free_slots.len() > self.slots.len() {
            return Err(EcsError::Internal("more free slots than grown slots"));
        }
        for &free in &self.free_slots {
            if (free as usize) >= self.slots.len() {
                return Err(EcsError::Internal("free slot outside grown range"));
            }
            if self.slots[free as usize] != 0 {
                return Err(EcsError::Internal("free slot still stores an entity"));
            }
        }
        let occupied = self.occupied().count();
        if occupied != self.real_count() {
            return Err(EcsError::Internal("occupied walk disagrees with real count"));
        }
        for column in &self.columns {
            if column.capacity() < self.slots.len() {
                return Err(EcsError::Internal("column capacity below slot count"));
            }
        }
        Ok(())
    }
}

/// Returns pairwise-distinct mutable borrows of `count` columns.
///
/// ## Errors
/// `Internal` if any index repeats or is out of bounds.
///
/// ## Safety
/// The unsafe block hands out one `&mut` per index; the distinctness check
/// above it guarantees the borrows never alias.
pub(crate) fn columns_many_mut<'a, const N: usize>(
    columns: &'a mut [Box<dyn ColumnStorage>],
    indices: [usize; N],
) -> EcsResult<[&'a mut dyn ColumnStorage; N]> {
    for (i, &index) in indices.iter().enumerate() {
        if index >= columns.len() {
            return Err(EcsError::Internal("column index out of bounds"));
        }
        if indices[..i].contains(&index) {
            return Err(EcsError::Internal("duplicate column index in mutable borrow"));
        }
    }

    let base = columns.as_mut_ptr();
    Ok(indices.map(|index| {
        // SAFETY: every index is in bounds and pairwise distinct, so each
        // produced reference points at a different element.
        unsafe { &mut **base.add(index) }
    }))
}

/// Iterator over a table's occupied slots in index order.
///
/// Walks `[start, end)` and skips tombstoned slots by merging against the
/// sorted free set, yielding `(slot, entity)` pairs.
pub struct OccupiedSlots<'a> {
    slots: &'a [EntityID],
    free: std::iter::Peekable<std::collections::btree_set::Range<'a, SlotID>>,
    next: SlotID,
    end: SlotID,
}

impl<'a> OccupiedSlots<'a> {
    pub(crate) fn new(
        slots: &'a [EntityID],
        free_slots: &'a BTreeSet<SlotID>,
        start: SlotID,
        end: SlotID,
    ) -> Self {
        Self {
            slots,
            free: free_slots.range(start..end).peekable(),
            next: start,
            end,
        }
    }
}

impl<'a> Iterator for OccupiedSlots<'a> {
    type Item = (SlotID, EntityID);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.end {
            let slot = self.next;
            self.next += 1;

            if let Some(&&free) = self.free.peek() {
                if free == slot {
                    self.free.next();
                    continue;
                }
            }
            return Some((slot, self.slots[slot as usize]));
        }
        None
    }
}
