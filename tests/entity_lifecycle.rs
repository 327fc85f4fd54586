use std::sync::Once;

use archetable::engine::types::{entity_generation, entity_index, make_entity_id};
use archetable::{register_component, EcsError, World, EMPTY_TABLE};

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Health(i32);

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Armor(i32);

static INIT: Once = Once::new();

fn init_registry() {
    INIT.call_once(|| {
        register_component::<Health>().unwrap();
        register_component::<Armor>().unwrap();
    });
}

#[test]
fn entity_ids_pack_and_unpack() {
    let id = make_entity_id(0x00ab_cdef, 7);
    assert_eq!(entity_index(id), 0x00ab_cdef);
    assert_eq!(entity_generation(id), 7);
}

#[test]
fn fresh_entities_are_live_and_nonzero() {
    init_registry();
    let mut world = World::new();

    let first = world.create_entity();
    let second = world.create_entity();

    assert_ne!(first, 0, "index 0 is reserved; ids are never zero");
    assert_ne!(first, second);
    assert!(world.is_alive(first));
    assert!(world.is_alive(second));

    // Every entity starts in the empty-signature table.
    assert_eq!(world.record(first).unwrap().table, EMPTY_TABLE);
    assert_eq!(world.record(second).unwrap().table, EMPTY_TABLE);
}

#[test]
fn destroyed_handles_fail_lookup() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Health(10)).unwrap();
    world.destroy_entity(entity).unwrap();

    assert!(!world.is_alive(entity));
    assert_eq!(world.record(entity).err(), Some(EcsError::StaleEntity { id: entity }));
    assert!(matches!(
        world.get_component::<Health>(entity),
        Err(EcsError::StaleEntity { .. })
    ));
    assert!(world.destroy_entity(entity).is_err());
}

#[test]
fn reused_indices_bump_the_generation() {
    init_registry();
    let mut world = World::new();

    let keep_a = world.create_entity();
    let doomed = world.create_entity();
    let keep_b = world.create_entity();
    let doomed_slot = world.record(doomed).unwrap().slot;

    world.destroy_entity(doomed).unwrap();
    let recycled = world.create_entity();

    // Same directory index, next generation; the table slot is reused too
    // (lowest free index first).
    assert_eq!(entity_index(recycled), entity_index(doomed));
    assert_eq!(
        entity_generation(recycled),
        entity_generation(doomed).wrapping_add(1)
    );
    assert_eq!(world.record(recycled).unwrap().slot, doomed_slot);

    // The old handle must never resolve to the new occupant.
    assert!(!world.is_alive(doomed));
    assert!(world.record(doomed).is_err());
    assert!(world.is_alive(recycled));
    assert!(world.is_alive(keep_a) && world.is_alive(keep_b));
}

#[test]
fn never_allocated_handles_fail_lookup() {
    init_registry();
    let world = World::new();

    assert!(world.record(0).is_err());
    assert!(world.record(make_entity_id(99, 0)).is_err());
    assert!(world.record(make_entity_id(1, 3)).is_err());
}

#[test]
#[should_panic(expected = "invalid entity handle")]
fn indexing_with_a_stale_handle_panics() {
    init_registry();
    let mut world = World::new();
    let entity = world.create_entity();
    world.destroy_entity(entity).unwrap();
    let _ = world[entity];
}

#[test]
fn reset_empties_tables_and_invalidates_handles() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Health(3)).unwrap();
    world.set_component(entity, Armor(1)).unwrap();
    let table_count = world.table_count();

    world.reset();

    assert!(!world.is_alive(entity));
    assert_eq!(world.table_count(), table_count, "tables survive a reset");
    for table_id in 0..world.table_count() {
        assert_eq!(world.table(table_id as u16).real_count(), 0);
    }

    // The world is immediately usable again.
    let reborn = world.create_entity();
    world.set_component(reborn, Health(5)).unwrap();
    assert_eq!(world.get_component::<Health>(reborn), Ok(Some(Health(5))));

    world.check_invariants().unwrap();
}

#[test]
fn directory_stays_consistent_under_churn() {
    init_registry();
    let mut world = World::new();

    let mut live = Vec::new();
    for round in 0..10 {
        for i in 0..20 {
            let entity = world.create_entity();
            world.set_component(entity, Health(round * 100 + i)).unwrap();
            if i % 2 == 0 {
                world.set_component(entity, Armor(i)).unwrap();
            }
            live.push((entity, round * 100 + i));
        }
        // Destroy every third live entity.
        let mut index = 0;
        live.retain(|(entity, _)| {
            index += 1;
            if index % 3 == 0 {
                world.destroy_entity(*entity).unwrap();
                false
            } else {
                true
            }
        });
    }

    for (entity, expected) in &live {
        assert_eq!(
            world.get_component::<Health>(*entity),
            Ok(Some(Health(*expected)))
        );
    }
    world.check_invariants().unwrap();
}
