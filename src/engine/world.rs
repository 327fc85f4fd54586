//! The world: entity directory, ID allocator, and table router.
//!
//! A [`World`] owns every archetype table, the Signature→Table index that
//! deduplicates them, and the dense entity directory mapping each live
//! entity ID to its `(table, slot)` location. All structural mutation
//! (creating and destroying entities, adding and removing components) goes
//! through the world, which migrates entity rows between tables whenever a
//! signature changes.
//!
//! ## Handle validity
//!
//! An entity ID is valid only while the generation encoded in the handle
//! matches the generation stored in the directory record. Destroying an
//! entity queues its index for reuse; the next allocation of that index
//! bumps the generation byte, so handles to the destroyed entity fail
//! lookup instead of silently resolving to the new occupant.
//!
//! ## Concurrency
//!
//! ID allocation is an atomic counter plus a mutex-guarded reuse queue, so
//! concurrent allocations never hand out the same ID. Everything else takes
//! `&mut World`: structural mutation must be serialized against query
//! execution, and exclusive borrows are how this engine states that rule.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Index;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use log::{debug, trace};

use crate::engine::component::{
    component_id_of, is_tag, register_component, registered_component_count,
};
use crate::engine::error::{EcsError, EcsResult, StorageError};
use crate::engine::table::Table;
use crate::engine::types::{
    entity_generation, entity_index, make_entity_id, ComponentID, EntityID, SignatureKey, SlotID,
    TableID,
};

/// Identifier of the empty-signature table every entity starts in.
pub const EMPTY_TABLE: TableID = 0;

/// Per-entity directory record.
///
/// `id` repeats the full handle so lookups can validate the generation;
/// `table` and `slot` locate the entity's row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityRecord {
    /// The full entity handle, zero while the record is vacant.
    pub id: EntityID,
    /// The table currently storing this entity.
    pub table: TableID,
    /// The entity's slot within that table.
    pub slot: SlotID,
}

/// Allocates entity IDs: fresh indices from an atomic counter, recycled
/// indices from a guarded queue with a generation bump.
struct EntityAllocator {
    next_index: AtomicU32,
    reuse: Mutex<VecDeque<EntityID>>,
}

impl EntityAllocator {
    fn new() -> Self {
        Self {
            next_index: AtomicU32::new(0),
            reuse: Mutex::new(VecDeque::new()),
        }
    }

    /// Produces the next entity ID.
    ///
    /// Recycled IDs keep their index and advance the generation byte
    /// (wrapping), which is what invalidates stale handles.
    fn allocate(&self) -> EntityID {
        let recycled = self.reuse.lock().unwrap().pop_front();
        match recycled {
            Some(old) => {
                let generation = entity_generation(old).wrapping_add(1);
                make_entity_id(entity_index(old), generation)
            }
            None => {
                // Index 0 stays reserved; the first entity gets index 1.
                let index = self.next_index.fetch_add(1, Ordering::Relaxed) + 1;
                make_entity_id(index, 0)
            }
        }
    }

    fn recycle(&self, id: EntityID) {
        self.reuse.lock().unwrap().push_back(id);
    }

    fn reset(&self) {
        self.next_index.store(0, Ordering::Relaxed);
        self.reuse.lock().unwrap().clear();
    }
}

/// Per-world component state: which tables currently include the component.
///
/// Seeds the query engine's table search.
#[derive(Default)]
struct ComponentInfo {
    member_of: Vec<TableID>,
}

/// The entity directory and table router.
pub struct World {
    entities: Vec<EntityRecord>,
    allocator: EntityAllocator,
    tables: Vec<Table>,
    table_lookup: HashMap<SignatureKey, TableID>,
    components: Vec<ComponentInfo>,
}

impl World {
    /// Creates a world pre-sized for 1024 entity records.
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Creates a world pre-sized for `entity_capacity` records.
    ///
    /// The empty-signature table is created eagerly as table 0; every new
    /// entity starts there.
    pub fn with_capacity(entity_capacity: usize) -> Self {
        let mut entities = Vec::with_capacity(entity_capacity.max(1));
        entities.push(EntityRecord::default());

        let zero_table =
            Table::new(EMPTY_TABLE, Vec::new()).expect("empty signature needs no factories");
        let mut table_lookup = HashMap::new();
        table_lookup.insert(SignatureKey::default(), EMPTY_TABLE);

        Self {
            entities,
            allocator: EntityAllocator::new(),
            tables: vec![zero_table],
            table_lookup,
            components: Vec::new(),
        }
    }

    /// Registers component type `T` (idempotent) and sizes this world's
    /// per-component table lists to match the registry.
    ///
    /// ## Errors
    /// `CapacityExceeded` once the fixed component ID space is exhausted.
    pub fn register_component<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
    ) -> EcsResult<ComponentID> {
        let id = register_component::<T>()?;
        self.ensure_component_info();
        Ok(id)
    }

    fn ensure_component_info(&mut self) {
        let count = registered_component_count();
        if self.components.len() < count {
            self.components.resize_with(count, ComponentInfo::default);
        }
    }

    /// Returns the number of tables currently in the world.
    ///
    /// Queries compare this against the count they were built with to
    /// detect staleness; tables are never removed, so growth is the only
    /// change.
    #[inline]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Returns the table with the given ID.
    ///
    /// ## Panics
    /// Panics if the ID was not produced by this world.
    #[inline]
    pub fn table(&self, table_id: TableID) -> &Table {
        &self.tables[table_id as usize]
    }

    /// Returns the mutable table with the given ID.
    ///
    /// ## Panics
    /// Panics if the ID was not produced by this world.
    #[inline]
    pub fn table_mut(&mut self, table_id: TableID) -> &mut Table {
        &mut self.tables[table_id as usize]
    }

    /// Looks up the entity's directory record, validating the handle.
    ///
    /// ## Errors
    /// `StaleEntity` if the index is out of range, reserved, or the stored
    /// generation no longer matches the handle.
    pub fn record(&self, id: EntityID) -> EcsResult<&EntityRecord> {
        let index = entity_index(id) as usize;
        if index == 0 || index >= self.entities.len() {
            return Err(EcsError::StaleEntity { id });
        }
        let record = &self.entities[index];
        if record.id != id {
            return Err(EcsError::StaleEntity { id });
        }
        Ok(record)
    }

    /// Returns `true` if `id` refers to a live entity.
    pub fn is_alive(&self, id: EntityID) -> bool {
        self.record(id).is_ok()
    }

    /// Allocates a new entity and places it in the empty-signature table.
    pub fn create_entity(&mut self) -> EntityID {
        let id = self.allocator.allocate();
        let index = entity_index(id) as usize;

        if index >= self.entities.len() {
            self.entities.resize(index + 1, EntityRecord::default());
        }

        let slot = self.tables[EMPTY_TABLE as usize].add_slot(id);
        self.entities[index] = EntityRecord { id, table: EMPTY_TABLE, slot };
        id
    }

    /// Destroys an entity: releases its table slot, vacates its record, and
    /// queues its index for reuse.
    ///
    /// ## Errors
    /// `StaleEntity` if the handle is not live.
    pub fn destroy_entity(&mut self, id: EntityID) -> EcsResult<()> {
        let record = *self.record(id)?;
        self.tables[record.table as usize].remove_slot(record.slot)?;
        self.entities[entity_index(id) as usize] = EntityRecord::default();
        self.allocator.recycle(id);

        #[cfg(feature = "verify")]
        self.check_invariants()?;
        Ok(())
    }

    /// Returns the table whose signature is exactly `component_ids`
    /// (sorted, deduplicated), creating it on first sight.
    ///
    /// This is the single deduplication gate: a freshly created table is
    /// registered in every member component's table list and in the
    /// Signature→Table map before it is returned, so a signature can never
    /// map to two tables.
    pub fn table_for(&mut self, component_ids: &[ComponentID]) -> EcsResult<TableID> {
        let key = SignatureKey::from_ids(component_ids);
        if let Some(&table_id) = self.table_lookup.get(&key) {
            return Ok(table_id);
        }

        if self.tables.len() > TableID::MAX as usize {
            return Err(EcsError::Internal("table ID space exhausted"));
        }
        let table_id = self.tables.len() as TableID;
        let table = Table::new(table_id, component_ids.to_vec())?;

        self.ensure_component_info();
        for &component_id in component_ids {
            self.components[component_id as usize].member_of.push(table_id);
        }
        self.table_lookup.insert(key, table_id);
        self.tables.push(table);

        debug!(
            "created table {} for {} component(s)",
            table_id,
            component_ids.len()
        );
        Ok(table_id)
    }

    /// Returns the IDs of every table whose signature is a superset of
    /// `component_ids`, in ascending table order.
    ///
    /// Candidates are seeded from the member lists of the requested
    /// components, then confirmed with a signature-key superset check.
    pub fn tables_with(&self, component_ids: &[ComponentID]) -> Vec<TableID> {
        let mut candidates: BTreeSet<TableID> = BTreeSet::new();
        for &component_id in component_ids {
            if let Some(info) = self.components.get(component_id as usize) {
                candidates.extend(info.member_of.iter().copied());
            }
        }

        let required = SignatureKey::from_ids(component_ids);
        candidates
            .into_iter()
            .filter(|&table_id| self.tables[table_id as usize].key().contains_all(&required))
            .collect()
    }

    /// Moves an entity's row to `destination`, copying every shared
    /// component column and releasing the old slot.
    fn move_entity(&mut self, id: EntityID, destination: TableID) -> EcsResult<SlotID> {
        let record = *self.record(id)?;
        if record.table == destination {
            return Ok(record.slot);
        }

        let (source, target) = Self::table_pair_mut(&mut self.tables, record.table, destination);
        let destination_slot = target.add_slot(id);
        source.copy_components_to(record.slot, target, destination_slot)?;
        source.remove_slot(record.slot)?;

        self.entities[entity_index(id) as usize] =
            EntityRecord { id, table: destination, slot: destination_slot };

        trace!(
            "entity {:#x} migrated from table {} to table {}",
            id,
            record.table,
            destination
        );

        #[cfg(feature = "verify")]
        self.check_invariants()?;
        Ok(destination_slot)
    }

    /// Returns mutable references to two distinct tables.
    ///
    /// ## Panics
    /// Panics if `a == b`.
    fn table_pair_mut(tables: &mut [Table], a: TableID, b: TableID) -> (&mut Table, &mut Table) {
        assert!(a != b, "source and destination table must differ");
        let (low, high) = if a < b { (a, b) } else { (b, a) };

        let (head, tail) = tables.split_at_mut(high as usize);
        let left = &mut head[low as usize];
        let right = &mut tail[0];
        if a < b { (left, right) } else { (right, left) }
    }

    /// Computes the destination signature for adding one component.
    fn extended_table(&mut self, source: TableID, component_id: ComponentID) -> EcsResult<TableID> {
        let mut component_ids = self.tables[source as usize].component_ids().to_vec();
        if let Err(position) = component_ids.binary_search(&component_id) {
            component_ids.insert(position, component_id);
        }
        self.table_for(&component_ids)
    }

    /// Computes the destination signature for removing one component.
    fn reduced_table(&mut self, source: TableID, component_id: ComponentID) -> EcsResult<TableID> {
        let mut component_ids = self.tables[source as usize].component_ids().to_vec();
        if let Ok(position) = component_ids.binary_search(&component_id) {
            component_ids.remove(position);
        }
        self.table_for(&component_ids)
    }

    fn write_component<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        record: EntityRecord,
        component_id: ComponentID,
        value: T,
    ) -> EcsResult<()> {
        let table = &mut self.tables[record.table as usize];
        let index = table
            .column_index(component_id)
            .ok_or(EcsError::Internal("non-tag component without a column"))?;
        let actual = table.column_storage(index).element_type_name();
        let column = table.column_mut::<T>(index).ok_or(EcsError::Storage(
            StorageError::TypeMismatch { expected: std::any::type_name::<T>(), actual },
        ))?;
        column.write(record.slot, value)?;
        Ok(())
    }

    /// Inserts or updates component `T` on the entity.
    ///
    /// If the entity's signature does not yet include `T`, its row migrates
    /// to the matching table first. Tag values carry no data, so for tags
    /// this is a pure signature change.
    ///
    /// ## Errors
    /// `StaleEntity` for dead handles, `NotRegistered` if `T` was never
    /// registered.
    pub fn set_component<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        id: EntityID,
        value: T,
    ) -> EcsResult<()> {
        let component_id = component_id_of::<T>()?;
        let record = *self.record(id)?;
        let tag = is_tag(component_id);

        if self.tables[record.table as usize].has_component(component_id) {
            if tag {
                return Ok(());
            }
            return self.write_component(record, component_id, value);
        }

        let destination = self.extended_table(record.table, component_id)?;
        let slot = self.move_entity(id, destination)?;
        if !tag {
            self.write_component(EntityRecord { id, table: destination, slot }, component_id, value)?;
        }
        Ok(())
    }

    /// Ensures the entity carries component `T` and returns a mutable
    /// reference to its value.
    ///
    /// Newly inserted components start at `T::default()`: vacated and
    /// freshly grown slots always hold the default value.
    ///
    /// ## Errors
    /// `TagAccess` for zero-size tags (use [`World::set_component`], which
    /// accepts the tag value and performs the signature change).
    pub fn add_component<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        id: EntityID,
    ) -> EcsResult<&mut T> {
        let component_id = component_id_of::<T>()?;
        if is_tag(component_id) {
            return Err(EcsError::TagAccess { name: std::any::type_name::<T>() });
        }

        let record = *self.record(id)?;
        let record = if self.tables[record.table as usize].has_component(component_id) {
            record
        } else {
            let destination = self.extended_table(record.table, component_id)?;
            let slot = self.move_entity(id, destination)?;
            EntityRecord { id, table: destination, slot }
        };

        let table = &mut self.tables[record.table as usize];
        let index = table
            .column_index(component_id)
            .ok_or(EcsError::Internal("non-tag component without a column"))?;
        let actual = table.column_storage(index).element_type_name();
        let column = table.column_mut::<T>(index).ok_or(EcsError::Storage(
            StorageError::TypeMismatch { expected: std::any::type_name::<T>(), actual },
        ))?;
        column
            .value_mut(record.slot)
            .ok_or(EcsError::Internal("occupied slot outside column capacity"))
    }

    /// Removes component `T` from the entity.
    ///
    /// A no-op if the entity does not carry `T`. Fires the component's
    /// pre-removal hook (when one is installed) on the outgoing column
    /// before the value is discarded, then migrates the row. Removing the
    /// last component leaves the entity alive in the empty-signature table.
    pub fn remove_component<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        id: EntityID,
    ) -> EcsResult<()> {
        let component_id = component_id_of::<T>()?;
        let record = *self.record(id)?;

        let table = &self.tables[record.table as usize];
        if !table.has_component(component_id) {
            return Ok(());
        }

        if let Some(index) = table.column_index(component_id) {
            let column = table.column_storage(index);
            if column.has_removal_hook() {
                column.notify_removal(id, record.slot);
            }
        }

        let destination = self.reduced_table(record.table, component_id)?;
        self.move_entity(id, destination)?;
        Ok(())
    }

    /// Returns a copy of component `T` on the entity, or `None` if the
    /// entity's signature does not include it.
    ///
    /// ## Errors
    /// `StaleEntity` for dead handles; absence is `Ok(None)`, never an
    /// error.
    pub fn get_component<T: 'static + Send + Sync + Default + Clone>(
        &self,
        id: EntityID,
    ) -> EcsResult<Option<T>> {
        let component_id = component_id_of::<T>()?;
        let record = self.record(id)?;
        let table = &self.tables[record.table as usize];

        if !table.has_component(component_id) {
            return Ok(None);
        }
        if is_tag(component_id) {
            return Ok(Some(T::default()));
        }

        let index = table
            .column_index(component_id)
            .ok_or(EcsError::Internal("non-tag component without a column"))?;
        let actual = table.column_storage(index).element_type_name();
        let column = table.column_ref::<T>(index).ok_or(EcsError::Storage(
            StorageError::TypeMismatch { expected: std::any::type_name::<T>(), actual },
        ))?;
        Ok(column.value(record.slot).cloned())
    }

    /// Returns `true` if the entity's current signature includes `T`.
    pub fn has_component<T: 'static + Send + Sync + Default + Clone>(
        &self,
        id: EntityID,
    ) -> EcsResult<bool> {
        let component_id = component_id_of::<T>()?;
        let record = self.record(id)?;
        Ok(self.tables[record.table as usize].has_component(component_id))
    }

    /// Fallible form of [`World::component_ref`].
    pub fn try_component_ref<T: 'static + Send + Sync + Default + Clone>(
        &self,
        id: EntityID,
    ) -> EcsResult<&T> {
        let component_id = component_id_of::<T>()?;
        if is_tag(component_id) {
            return Err(EcsError::TagAccess { name: std::any::type_name::<T>() });
        }
        let record = self.record(id)?;
        let table = &self.tables[record.table as usize];
        let index = table
            .column_index(component_id)
            .ok_or(EcsError::MissingComponent { name: std::any::type_name::<T>() })?;
        let actual = table.column_storage(index).element_type_name();
        let column = table.column_ref::<T>(index).ok_or(EcsError::Storage(
            StorageError::TypeMismatch { expected: std::any::type_name::<T>(), actual },
        ))?;
        column
            .value(record.slot)
            .ok_or(EcsError::Internal("occupied slot outside column capacity"))
    }

    /// Fallible form of [`World::component_mut`].
    pub fn try_component_mut<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        id: EntityID,
    ) -> EcsResult<&mut T> {
        let component_id = component_id_of::<T>()?;
        if is_tag(component_id) {
            return Err(EcsError::TagAccess { name: std::any::type_name::<T>() });
        }
        let record = *self.record(id)?;
        let table = &mut self.tables[record.table as usize];
        let index = table
            .column_index(component_id)
            .ok_or(EcsError::MissingComponent { name: std::any::type_name::<T>() })?;
        let actual = table.column_storage(index).element_type_name();
        let column = table.column_mut::<T>(index).ok_or(EcsError::Storage(
            StorageError::TypeMismatch { expected: std::any::type_name::<T>(), actual },
        ))?;
        column
            .value_mut(record.slot)
            .ok_or(EcsError::Internal("occupied slot outside column capacity"))
    }

    /// Borrows component `T` on the entity.
    ///
    /// This is the fail-fast accessor: requesting a component the entity's
    /// signature does not include is a programmer error, distinct from the
    /// `Option`-returning [`World::get_component`].
    ///
    /// ## Panics
    /// Panics on stale handles and absent components.
    pub fn component_ref<T: 'static + Send + Sync + Default + Clone>(&self, id: EntityID) -> &T {
        match self.try_component_ref::<T>(id) {
            Ok(value) => value,
            Err(e) => panic!("component_ref::<{}>: {}", std::any::type_name::<T>(), e),
        }
    }

    /// Mutably borrows component `T` on the entity.
    ///
    /// ## Panics
    /// Panics on stale handles and absent components.
    pub fn component_mut<T: 'static + Send + Sync + Default + Clone>(
        &mut self,
        id: EntityID,
    ) -> &mut T {
        match self.try_component_mut::<T>(id) {
            Ok(value) => value,
            Err(e) => panic!("component_mut::<{}>: {}", std::any::type_name::<T>(), e),
        }
    }

    /// Empties every table and vacates every entity record.
    ///
    /// Tables, their pooled columns, and component registrations survive
    /// for reuse; all entity handles become stale.
    pub fn reset(&mut self) {
        for record in &mut self.entities {
            *record = EntityRecord::default();
        }
        for table in &mut self.tables {
            table.clear();
        }
        self.allocator.reset();
    }

    /// Verifies directory/table consistency.
    ///
    /// Diagnostic entry point, not part of normal control flow; the
    /// `verify` feature runs it automatically after structural mutations.
    pub fn check_invariants(&self) -> EcsResult<()> {
        for table in &self.tables {
            table.check_invariants()?;
            for (slot, entity) in table.occupied() {
                let record = self.record(entity)?;
                if record.table != table.table_id() || record.slot != slot {
                    return Err(EcsError::Internal("directory record disagrees with table slot"));
                }
            }
        }
        Ok(())
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<EntityID> for World {
    type Output = EntityRecord;

    /// Fail-fast record lookup.
    ///
    /// ## Panics
    /// Panics on stale or never-allocated handles; a destroyed-and-reused
    /// index never silently resolves to the new occupant.
    fn index(&self, id: EntityID) -> &EntityRecord {
        match self.record(id) {
            Ok(record) => record,
            Err(_) => panic!("invalid entity handle {:#x}", id),
        }
    }
}
