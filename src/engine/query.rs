//! Query construction and execution over matched tables.
//!
//! A [`Query`] resolves a required component-type set against the world:
//! every table whose signature is a superset of the requested set is
//! matched, and the column index of each requested component is cached per
//! table so iteration never re-resolves components in the hot loop.
//!
//! ## Staleness
//!
//! A query records the world's table count at construction. New archetypes
//! can appear between construction and use (tables are never removed), so
//! every entry point first compares the recorded count against the live
//! count and rebuilds the matched-table list on mismatch.
//!
//! ## Execution model
//!
//! - `each1`..`each4` iterate matched tables sequentially, invoking the
//!   callback with the entity ID and mutable references to the requested
//!   component values. Mutation is visible immediately.
//! - [`Query::iter_one`] adapts one component into a plain iterator of
//!   `(entity, &value)` pairs across matched tables.
//! - [`Query::par_transform`] fans contiguous slot ranges out over rayon's
//!   pool and writes each range's results into a disjoint, deterministic
//!   slice of one flat output vector. Workers never contend on output
//!   placement, and the reduction over the results is left to the caller.
//!
//! ## Concurrency
//!
//! Sequential iteration takes `&mut World`; the parallel transform takes
//! `&World` and read-only component access, making the fork-join sound
//! without locking. Structural mutation must not run concurrently with
//! either (exclusive borrows enforce this within one world).

use std::any::{type_name, TypeId};
use std::mem::MaybeUninit;

use rayon::prelude::*;

use crate::engine::component::component_id_of_type_id;
use crate::engine::error::{EcsError, EcsResult, StorageError};
use crate::engine::storage::{acquire_buffer, release_buffer, Column, ColumnStorage};
use crate::engine::table::{columns_many_mut, OccupiedSlots};
use crate::engine::types::{ComponentID, EntityID, SlotID, TableID};
use crate::engine::world::World;

/// One matched table and the cached column index of every requested
/// component (`None` marks a tag, which has no column).
struct QueryStep {
    table: TableID,
    column_indices: Vec<Option<usize>>,
}

/// A reusable view over every table whose signature covers a required
/// component set.
///
/// Queries hold pooled scratch arrays (the component ID list and per-step
/// column index lists); dropping the query returns them to the shared
/// buffer pool.
pub struct Query {
    types: Vec<TypeId>,
    component_ids: Vec<ComponentID>,
    steps: Vec<QueryStep>,
    made_with_table_count: usize,
}

impl Query {
    /// Builds a query over the given component types.
    ///
    /// ## Errors
    /// `NotRegistered` if any type was never registered as a component.
    pub fn new(world: &World, types: &[TypeId]) -> EcsResult<Self> {
        let mut query = Self {
            types: types.to_vec(),
            component_ids: Vec::new(),
            steps: Vec::new(),
            made_with_table_count: 0,
        };
        query.resolve(world)?;
        Ok(query)
    }

    /// Returns the component IDs this query requires.
    pub fn component_ids(&self) -> &[ComponentID] {
        &self.component_ids
    }

    /// Returns how many tables currently match this query.
    pub fn matched_table_count(&self) -> usize {
        self.steps.len()
    }

    fn release_scratch(&mut self) {
        release_buffer(std::mem::take(&mut self.component_ids));
        for mut step in self.steps.drain(..) {
            release_buffer(std::mem::take(&mut step.column_indices));
        }
    }

    /// Resolves the matched-table list and per-table column indices.
    fn resolve(&mut self, world: &World) -> EcsResult<()> {
        self.release_scratch();

        let mut component_ids = acquire_buffer::<ComponentID>();
        for &type_id in &self.types {
            component_ids.push(component_id_of_type_id(type_id)?);
        }

        let tables = world.tables_with(&component_ids);
        let mut steps = Vec::with_capacity(tables.len());
        for table_id in tables {
            let table = world.table(table_id);
            let mut column_indices = acquire_buffer::<Option<usize>>();
            for &component_id in &component_ids {
                column_indices.push(table.column_index(component_id));
            }
            steps.push(QueryStep { table: table_id, column_indices });
        }

        self.component_ids = component_ids;
        self.steps = steps;
        self.made_with_table_count = world.table_count();
        Ok(())
    }

    /// Rebuilds the matched-table list if tables were created since the
    /// last resolution.
    fn maybe_rebuild(&mut self, world: &World) -> EcsResult<()> {
        if self.made_with_table_count != world.table_count() {
            self.resolve(world)?;
        }
        Ok(())
    }

    fn position_of(&self, type_id: TypeId, name: &'static str) -> EcsResult<usize> {
        self.types
            .iter()
            .position(|&t| t == type_id)
            .ok_or(EcsError::ComponentNotInQuery { name })
    }

    fn column_of(step: &QueryStep, position: usize, name: &'static str) -> EcsResult<usize> {
        step.column_indices
            .get(position)
            .copied()
            .flatten()
            .ok_or(EcsError::TagAccess { name })
    }

    /// Sequentially iterates one component over every matched entity.
    ///
    /// The callback receives the entity ID and a mutable reference into the
    /// component column; writes land directly in table storage.
    pub fn each1<T1, F>(&mut self, world: &mut World, mut each: F) -> EcsResult<()>
    where
        T1: 'static + Send + Sync + Default + Clone,
        F: FnMut(EntityID, &mut T1),
    {
        self.maybe_rebuild(world)?;
        let position = self.position_of(TypeId::of::<T1>(), type_name::<T1>())?;

        for step in &self.steps {
            let column_index = Self::column_of(step, position, type_name::<T1>())?;
            let table = world.table_mut(step.table);
            let (slots, free_slots, columns) = table.occupancy_and_columns();

            let [raw] = columns_many_mut(columns, [column_index])?;
            let values = typed_column_mut::<T1>(raw)?.slice_mut(slots.len());

            for (slot, entity) in OccupiedSlots::new(slots, free_slots, 0, slots.len() as SlotID) {
                each(entity, &mut values[slot as usize]);
            }
        }
        Ok(())
    }

    /// Sequentially iterates two components over every matched entity.
    pub fn each2<T1, T2, F>(&mut self, world: &mut World, mut each: F) -> EcsResult<()>
    where
        T1: 'static + Send + Sync + Default + Clone,
        T2: 'static + Send + Sync + Default + Clone,
        F: FnMut(EntityID, &mut T1, &mut T2),
    {
        self.maybe_rebuild(world)?;
        let position_1 = self.position_of(TypeId::of::<T1>(), type_name::<T1>())?;
        let position_2 = self.position_of(TypeId::of::<T2>(), type_name::<T2>())?;

        for step in &self.steps {
            let index_1 = Self::column_of(step, position_1, type_name::<T1>())?;
            let index_2 = Self::column_of(step, position_2, type_name::<T2>())?;
            let table = world.table_mut(step.table);
            let (slots, free_slots, columns) = table.occupancy_and_columns();

            let [raw_1, raw_2] = columns_many_mut(columns, [index_1, index_2])?;
            let values_1 = typed_column_mut::<T1>(raw_1)?.slice_mut(slots.len());
            let values_2 = typed_column_mut::<T2>(raw_2)?.slice_mut(slots.len());

            for (slot, entity) in OccupiedSlots::new(slots, free_slots, 0, slots.len() as SlotID) {
                each(entity, &mut values_1[slot as usize], &mut values_2[slot as usize]);
            }
        }
        Ok(())
    }

    /// Sequentially iterates three components over every matched entity.
    pub fn each3<T1, T2, T3, F>(&mut self, world: &mut World, mut each: F) -> EcsResult<()>
    where
        T1: 'static + Send + Sync + Default + Clone,
        T2: 'static + Send + Sync + Default + Clone,
        T3: 'static + Send + Sync + Default + Clone,
        F: FnMut(EntityID, &mut T1, &mut T2, &mut T3),
    {
        self.maybe_rebuild(world)?;
        let position_1 = self.position_of(TypeId::of::<T1>(), type_name::<T1>())?;
        let position_2 = self.position_of(TypeId::of::<T2>(), type_name::<T2>())?;
        let position_3 = self.position_of(TypeId::of::<T3>(), type_name::<T3>())?;

        for step in &self.steps {
            let index_1 = Self::column_of(step, position_1, type_name::<T1>())?;
            let index_2 = Self::column_of(step, position_2, type_name::<T2>())?;
            let index_3 = Self::column_of(step, position_3, type_name::<T3>())?;
            let table = world.table_mut(step.table);
            let (slots, free_slots, columns) = table.occupancy_and_columns();

            let [raw_1, raw_2, raw_3] = columns_many_mut(columns, [index_1, index_2, index_3])?;
            let values_1 = typed_column_mut::<T1>(raw_1)?.slice_mut(slots.len());
            let values_2 = typed_column_mut::<T2>(raw_2)?.slice_mut(slots.len());
            let values_3 = typed_column_mut::<T3>(raw_3)?.slice_mut(slots.len());

            for (slot, entity) in OccupiedSlots::new(slots, free_slots, 0, slots.len() as SlotID) {
                let slot = slot as usize;
                each(entity, &mut values_1[slot], &mut values_2[slot], &mut values_3[slot]);
            }
        }
        Ok(())
    }

    /// Sequentially iterates four components over every matched entity.
    pub fn each4<T1, T2, T3, T4, F>(&mut self, world: &mut World, mut each: F) -> EcsResult<()>
    where
        T1: 'static + Send + Sync + Default + Clone,
        T2: 'static + Send + Sync + Default + Clone,
        T3: 'static + Send + Sync + Default + Clone,
        T4: 'static + Send + Sync + Default + Clone,
        F: FnMut(EntityID, &mut T1, &mut T2, &mut T3, &mut T4),
    {
        self.maybe_rebuild(world)?;
        let position_1 = self.position_of(TypeId::of::<T1>(), type_name::<T1>())?;
        let position_2 = self.position_of(TypeId::of::<T2>(), type_name::<T2>())?;
        let position_3 = self.position_of(TypeId::of::<T3>(), type_name::<T3>())?;
        let position_4 = self.position_of(TypeId::of::<T4>(), type_name::<T4>())?;

        for step in &self.steps {
            let index_1 = Self::column_of(step, position_1, type_name::<T1>())?;
            let index_2 = Self::column_of(step, position_2, type_name::<T2>())?;
            let index_3 = Self::column_of(step, position_3, type_name::<T3>())?;
            let index_4 = Self::column_of(step, position_4, type_name::<T4>())?;
            let table = world.table_mut(step.table);
            let (slots, free_slots, columns) = table.occupancy_and_columns();

            let [raw_1, raw_2, raw_3, raw_4] =
                columns_many_mut(columns, [index_1, index_2, index_3, index_4])?;
            let values_1 = typed_column_mut::<T1>(raw_1)?.slice_mut(slots.len());
            let values_2 = typed_column_mut::<T2>(raw_2)?.slice_mut(slots.len());
            let values_3 = typed_column_mut::<T3>(raw_3)?.slice_mut(slots.len());
            let values_4 = typed_column_mut::<T4>(raw_4)?.slice_mut(slots.len());

            for (slot, entity) in OccupiedSlots::new(slots, free_slots, 0, slots.len() as SlotID) {
                let slot = slot as usize;
                each(
                    entity,
                    &mut values_1[slot],
                    &mut values_2[slot],
                    &mut values_3[slot],
                    &mut values_4[slot],
                );
            }
        }
        Ok(())
    }

    /// Adapts one component into an iterator of `(entity, &value)` pairs
    /// across every matched table.
    pub fn iter_one<'w, T>(&'w mut self, world: &'w World) -> EcsResult<SingleTypeIter<'w, T>>
    where
        T: 'static + Send + Sync + Default + Clone,
    {
        self.maybe_rebuild(world)?;
        let position = self.position_of(TypeId::of::<T>(), type_name::<T>())?;

        let mut parts = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let column_index = Self::column_of(step, position, type_name::<T>())?;
            let table = world.table(step.table);
            let column = typed_column_ref::<T>(table.column_storage(column_index))?;
            parts.push(TablePart {
                occupied: table.occupied(),
                values: column.slice(table.slot_count()),
            });
        }

        let mut parts = parts.into_iter();
        let current = parts.next();
        Ok(SingleTypeIter { parts, current })
    }

    /// Transforms every matched entity in parallel, producing one result
    /// per entity in a single flat vector.
    ///
    /// The total occupied count is partitioned into contiguous per-table
    /// slot ranges of roughly `total / workers` entities, where `workers`
    /// is capped by both rayon's pool size and `max_workers`. A table whose
    /// occupied span exceeds one share is split into several ranges. Each
    /// range owns a deterministic disjoint slice of the output, so the
    /// result order is independent of worker scheduling; merging results is
    /// the caller's concern.
    pub fn par_transform<T, R, F>(
        &mut self,
        world: &World,
        max_workers: usize,
        transform: F,
    ) -> EcsResult<Vec<R>>
    where
        T: 'static + Send + Sync + Default + Clone,
        R: Send,
        F: Fn(EntityID, &T) -> R + Send + Sync,
    {
        self.maybe_rebuild(world)?;
        let position = self.position_of(TypeId::of::<T>(), type_name::<T>())?;

        // Resolve and type-check every matched column before fanning out so
        // the workers themselves cannot fail.
        let mut columns: Vec<&Column<T>> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let column_index = Self::column_of(step, position, type_name::<T>())?;
            columns.push(typed_column_ref::<T>(
                world.table(step.table).column_storage(column_index),
            )?);
        }

        let workers = rayon::current_num_threads().min(max_workers.max(1));
        let (total, ranges) = split_ranges(world, &self.steps, workers);

        let mut results: Vec<R> = Vec::with_capacity(total);
        let chunks = carve_output(results.spare_capacity_mut(), &ranges);

        chunks.into_par_iter().for_each(|(out, range)| {
            let step = &self.steps[range.step];
            let table = world.table(step.table);
            let values = columns[range.step].slice(table.slot_count());

            let mut cursor = 0;
            for (slot, entity) in table.occupied_range(range.start, range.end) {
                out[cursor].write(transform(entity, &values[slot as usize]));
                cursor += 1;
            }
            debug_assert_eq!(cursor, range.count);
        });

        // SAFETY: the split covers every occupied slot exactly once and the
        // carved chunks tile the spare capacity, so all `total` slots were
        // initialized by exactly one worker.
        unsafe { results.set_len(total) };
        Ok(results)
    }

    /// Two-component variant of [`Query::par_transform`].
    pub fn par_transform2<T1, T2, R, F>(
        &mut self,
        world: &World,
        max_workers: usize,
        transform: F,
    ) -> EcsResult<Vec<R>>
    where
        T1: 'static + Send + Sync + Default + Clone,
        T2: 'static + Send + Sync + Default + Clone,
        R: Send,
        F: Fn(EntityID, &T1, &T2) -> R + Send + Sync,
    {
        self.maybe_rebuild(world)?;
        let position_1 = self.position_of(TypeId::of::<T1>(), type_name::<T1>())?;
        let position_2 = self.position_of(TypeId::of::<T2>(), type_name::<T2>())?;

        let mut columns: Vec<(&Column<T1>, &Column<T2>)> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let index_1 = Self::column_of(step, position_1, type_name::<T1>())?;
            let index_2 = Self::column_of(step, position_2, type_name::<T2>())?;
            let table = world.table(step.table);
            columns.push((
                typed_column_ref::<T1>(table.column_storage(index_1))?,
                typed_column_ref::<T2>(table.column_storage(index_2))?,
            ));
        }

        let workers = rayon::current_num_threads().min(max_workers.max(1));
        let (total, ranges) = split_ranges(world, &self.steps, workers);

        let mut results: Vec<R> = Vec::with_capacity(total);
        let chunks = carve_output(results.spare_capacity_mut(), &ranges);

        chunks.into_par_iter().for_each(|(out, range)| {
            let step = &self.steps[range.step];
            let table = world.table(step.table);
            let (column_1, column_2) = columns[range.step];
            let values_1 = column_1.slice(table.slot_count());
            let values_2 = column_2.slice(table.slot_count());

            let mut cursor = 0;
            for (slot, entity) in table.occupied_range(range.start, range.end) {
                let slot = slot as usize;
                out[cursor].write(transform(entity, &values_1[slot], &values_2[slot]));
                cursor += 1;
            }
            debug_assert_eq!(cursor, range.count);
        });

        // SAFETY: as in `par_transform`, the ranges tile the output.
        unsafe { results.set_len(total) };
        Ok(results)
    }
}

impl Drop for Query {
    fn drop(&mut self) {
        self.release_scratch();
    }
}

fn typed_column_ref<T: 'static + Send + Sync + Default + Clone>(
    raw: &dyn ColumnStorage,
) -> EcsResult<&Column<T>> {
    let actual = raw.element_type_name();
    raw.as_any().downcast_ref::<Column<T>>().ok_or(EcsError::Storage(
        StorageError::TypeMismatch { expected: type_name::<T>(), actual },
    ))
}

fn typed_column_mut<T: 'static + Send + Sync + Default + Clone>(
    raw: &mut dyn ColumnStorage,
) -> EcsResult<&mut Column<T>> {
    let actual = raw.element_type_name();
    raw.as_any_mut().downcast_mut::<Column<T>>().ok_or(EcsError::Storage(
        StorageError::TypeMismatch { expected: type_name::<T>(), actual },
    ))
}

/// One contiguous occupied-slot range assigned to a worker.
///
/// `step` indexes the query's matched-table list; `[start, end)` bounds the
/// slot walk; `count` is the exact number of occupied slots inside, which
/// is also the length of the worker's output slice.
struct SplitRange {
    step: usize,
    start: SlotID,
    end: SlotID,
    count: usize,
}

/// Partitions the occupied entities of the matched tables into contiguous
/// ranges of roughly `total / workers` entities each.
///
/// Ranges never span tables; a table with more occupied slots than one
/// share is emitted as several ranges. Consuming the ranges in order while
/// carving the output sequentially yields a deterministic mapping from each
/// output slot to one `(table, entity)` pair, independent of the payload
/// type and of worker scheduling.
fn split_ranges(world: &World, steps: &[QueryStep], workers: usize) -> (usize, Vec<SplitRange>) {
    let total: usize = steps.iter().map(|s| world.table(s.table).real_count()).sum();
    if total == 0 {
        return (0, Vec::new());
    }
    let unit = (total / workers.max(1)).max(1);

    let mut ranges = Vec::new();
    for (step_index, step) in steps.iter().enumerate() {
        let table = world.table(step.table);
        let mut start: SlotID = 0;
        let mut end: SlotID = 0;
        let mut count = 0usize;

        for (slot, _) in table.occupied() {
            if count == 0 {
                start = slot;
            }
            count += 1;
            end = slot + 1;
            if count == unit {
                ranges.push(SplitRange { step: step_index, start, end, count });
                count = 0;
            }
        }
        if count > 0 {
            ranges.push(SplitRange { step: step_index, start, end, count });
        }
    }

    debug_assert_eq!(ranges.iter().map(|r| r.count).sum::<usize>(), total);
    (total, ranges)
}

/// Carves the output's spare capacity into one disjoint chunk per range,
/// in range order.
fn carve_output<'a, R>(
    mut spare: &'a mut [MaybeUninit<R>],
    ranges: &'a [SplitRange],
) -> Vec<(&'a mut [MaybeUninit<R>], &'a SplitRange)> {
    let mut chunks = Vec::with_capacity(ranges.len());
    for range in ranges {
        let (head, tail) = spare.split_at_mut(range.count);
        chunks.push((head, range));
        spare = tail;
    }
    chunks
}

struct TablePart<'w, T> {
    occupied: OccupiedSlots<'w>,
    values: &'w [T],
}

/// Iterator yielded by [`Query::iter_one`]: `(entity, &value)` pairs over
/// every matched table in turn.
pub struct SingleTypeIter<'w, T> {
    parts: std::vec::IntoIter<TablePart<'w, T>>,
    current: Option<TablePart<'w, T>>,
}

impl<'w, T> Iterator for SingleTypeIter<'w, T> {
    type Item = (EntityID, &'w T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let part = self.current.as_mut()?;
            if let Some((slot, entity)) = part.occupied.next() {
                let values = part.values;
                return Some((entity, &values[slot as usize]));
            }
            self.current = self.parts.next();
        }
    }
}
