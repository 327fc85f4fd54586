use std::mem::{align_of, size_of};
use std::sync::Once;

use archetable::engine::component::register_component;
use archetable::engine::storage::{pooled_buffer_count, Column, ColumnStorage};
use archetable::engine::types::{ComponentID, SignatureKey};
use archetable::{EcsError, StorageError, World};

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Velocity {
    dx: f32,
    dy: f32,
}

// Marker with no data; presence is the whole payload.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Frozen;

static INIT: Once = Once::new();

fn init_registry() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Velocity>().unwrap();
        register_component::<Frozen>().unwrap();
    });
}

#[test]
fn column_storage_is_contiguous_and_aligned() {
    init_registry();
    let mut column: Column<Position> = Column::default();
    column.ensure_capacity(128);
    assert!(column.capacity() >= 128);

    for i in 0..128u32 {
        column.write(i, Position { x: i as f32, y: 0.0 }).unwrap();
    }

    let slice = column.slice(128);
    assert_eq!(slice.len(), 128);
    assert_eq!((slice.as_ptr() as usize) % align_of::<Position>(), 0);

    let base = slice.as_ptr() as usize;
    for i in 0..128 {
        let here = unsafe { slice.as_ptr().add(i) } as usize;
        assert_eq!(here, base + i * size_of::<Position>(), "row {i} misplaced");
        assert_eq!(slice[i].x, i as f32);
    }
}

#[test]
fn column_growth_doubles_and_fills_defaults() {
    init_registry();
    let mut column: Column<Velocity> = Column::default();
    column.ensure_capacity(1);
    let first = column.capacity();
    assert!(first >= 1);

    column.ensure_capacity(first + 1);
    assert!(column.capacity() >= first * 2);

    for slot in 0..column.capacity() as u32 {
        assert_eq!(column.value(slot), Some(&Velocity::default()));
    }
}

#[test]
fn column_remove_resets_to_default() {
    init_registry();
    let mut column: Column<Position> = Column::default();
    column.ensure_capacity(4);
    column.write(2, Position { x: 9.0, y: 9.0 }).unwrap();

    column.remove(2).unwrap();
    assert_eq!(column.value(2), Some(&Position::default()));

    let out_of_range = column.remove(column.capacity() as u32);
    assert!(matches!(out_of_range, Err(StorageError::SlotOutOfBounds { .. })));
}

#[test]
fn move_between_columns_checks_types() {
    init_registry();
    let mut source: Column<Position> = Column::default();
    let mut target: Column<Position> = Column::default();
    let mut wrong: Column<Velocity> = Column::default();
    source.ensure_capacity(8);
    target.ensure_capacity(8);
    wrong.ensure_capacity(8);

    source.write(3, Position { x: 5.0, y: 6.0 }).unwrap();
    source.move_to(3, &mut target, 1).unwrap();
    assert_eq!(target.value(1), Some(&Position { x: 5.0, y: 6.0 }));

    let mismatch = source.move_to(3, &mut wrong, 1);
    assert!(matches!(
        mismatch,
        Err(StorageError::TypeMismatch { .. })
    ));
}

#[test]
fn tag_only_tables_have_zero_buffers() {
    init_registry();
    let mut world = World::new();
    world.register_component::<Frozen>().unwrap();

    let entity = world.create_entity();
    world.set_component(entity, Frozen).unwrap();

    assert_eq!(world.has_component::<Frozen>(entity), Ok(true));
    assert_eq!(world.get_component::<Frozen>(entity), Ok(Some(Frozen)));

    let record = world.record(entity).unwrap();
    let table = world.table(record.table);
    assert_eq!(table.component_ids().len(), 1);
    assert_eq!(table.column_count(), 0);

    // Tags never expose a stored value to borrow.
    assert!(matches!(
        world.try_component_ref::<Frozen>(entity),
        Err(EcsError::TagAccess { .. })
    ));
}

#[test]
fn dropped_world_returns_column_buffers_to_pool() {
    // A component type private to this test keeps the pool observation
    // isolated from the other tests in this binary.
    #[derive(Clone, Copy, Debug, PartialEq, Default)]
    struct Heavy {
        payload: [u64; 4],
    }

    register_component::<Heavy>().unwrap();

    {
        let mut world = World::new();
        world.register_component::<Heavy>().unwrap();
        let entity = world.create_entity();
        world
            .set_component(entity, Heavy { payload: [1, 2, 3, 4] })
            .unwrap();
        assert_eq!(pooled_buffer_count::<Heavy>(), 0);
    }

    // World teardown dropped the Heavy column and released its buffer.
    assert_eq!(pooled_buffer_count::<Heavy>(), 1);

    // A new column for the same type drains the pool again.
    let mut world = World::new();
    world.register_component::<Heavy>().unwrap();
    let entity = world.create_entity();
    world.set_component(entity, Heavy::default()).unwrap();
    assert_eq!(pooled_buffer_count::<Heavy>(), 0);
}

#[test]
fn signature_keys_compare_by_bits() {
    let a = SignatureKey::from_ids(&[1, 5, 200]);
    let b = SignatureKey::from_ids(&[200, 1, 5]);
    let c = SignatureKey::from_ids(&[1, 5]);

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert!(a.contains_all(&c));
    assert!(!c.contains_all(&a));

    let ids: Vec<ComponentID> = a.iter().collect();
    assert_eq!(ids, vec![1, 5, 200]);

    let mut d = a;
    d.clear(5);
    assert!(!d.has(5));
    assert!(d.has(1) && d.has(200));
    assert!(SignatureKey::default().is_empty());
}
