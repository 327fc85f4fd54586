use std::sync::{Mutex, Once};

use archetable::engine::component::register_component_with_removal_hook;
use archetable::{register_component, EcsError, EntityID, World, EMPTY_TABLE};

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Position {
    x: i32,
    y: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Velocity {
    dx: i32,
    dy: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Mass(u32);

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Selected;

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Audited(i32);

static REMOVED: Mutex<Vec<(EntityID, i32)>> = Mutex::new(Vec::new());

static INIT: Once = Once::new();

fn init_registry() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Velocity>().unwrap();
        register_component::<Mass>().unwrap();
        register_component::<Selected>().unwrap();
        register_component_with_removal_hook::<Audited, _>(|entity, value| {
            REMOVED.lock().unwrap().push((entity, value.0));
        })
        .unwrap();
    });
}

#[test]
fn registration_is_idempotent() {
    init_registry();
    let first = register_component::<Position>().unwrap();
    let second = register_component::<Position>().unwrap();
    assert_eq!(first, second);
}

#[test]
fn insertion_order_never_changes_the_table() {
    init_registry();
    let mut world = World::new();

    let forward = world.create_entity();
    world.set_component(forward, Position::default()).unwrap();
    world.set_component(forward, Velocity::default()).unwrap();
    world.set_component(forward, Mass(1)).unwrap();

    let backward = world.create_entity();
    world.set_component(backward, Mass(2)).unwrap();
    world.set_component(backward, Velocity::default()).unwrap();
    world.set_component(backward, Position::default()).unwrap();

    let forward_table = world.record(forward).unwrap().table;
    let backward_table = world.record(backward).unwrap().table;
    assert_eq!(forward_table, backward_table);

    // A third route: add and remove an extra component on the way.
    let detour = world.create_entity();
    world.set_component(detour, Velocity::default()).unwrap();
    world.set_component(detour, Selected).unwrap();
    world.set_component(detour, Position::default()).unwrap();
    world.set_component(detour, Mass(3)).unwrap();
    world.remove_component::<Selected>(detour).unwrap();

    assert_eq!(world.record(detour).unwrap().table, forward_table);
    world.check_invariants().unwrap();
}

#[test]
fn migration_preserves_unrelated_components() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Position { x: 3, y: 4 }).unwrap();
    world.set_component(entity, Velocity { dx: -1, dy: 2 }).unwrap();

    world.set_component(entity, Mass(9)).unwrap();
    assert_eq!(world.get_component::<Position>(entity), Ok(Some(Position { x: 3, y: 4 })));
    assert_eq!(world.get_component::<Velocity>(entity), Ok(Some(Velocity { dx: -1, dy: 2 })));
    assert_eq!(world.has_component::<Mass>(entity), Ok(true));

    world.remove_component::<Velocity>(entity).unwrap();
    assert_eq!(world.get_component::<Position>(entity), Ok(Some(Position { x: 3, y: 4 })));
    assert_eq!(world.get_component::<Mass>(entity), Ok(Some(Mass(9))));
    assert_eq!(world.get_component::<Velocity>(entity), Ok(None));

    world.check_invariants().unwrap();
}

#[test]
fn set_component_is_insert_or_update() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Mass(1)).unwrap();
    let table_after_insert = world.record(entity).unwrap().table;

    world.set_component(entity, Mass(2)).unwrap();
    assert_eq!(world.get_component::<Mass>(entity), Ok(Some(Mass(2))));
    // An update never migrates.
    assert_eq!(world.record(entity).unwrap().table, table_after_insert);
}

#[test]
fn add_component_defaults_then_returns_the_live_value() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    {
        let mass = world.add_component::<Mass>(entity).unwrap();
        assert_eq!(*mass, Mass::default());
        mass.0 = 42;
    }
    assert_eq!(world.get_component::<Mass>(entity), Ok(Some(Mass(42))));

    // Get-or-add: a second call sees the stored value.
    assert_eq!(*world.add_component::<Mass>(entity).unwrap(), Mass(42));

    // Tags have no stored value to borrow.
    assert!(matches!(
        world.add_component::<Selected>(entity),
        Err(EcsError::TagAccess { .. })
    ));
}

#[test]
fn removing_an_absent_component_is_a_no_op() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Position::default()).unwrap();
    let table = world.record(entity).unwrap().table;

    world.remove_component::<Mass>(entity).unwrap();
    assert_eq!(world.record(entity).unwrap().table, table);
}

#[test]
fn removing_the_last_component_returns_to_the_empty_table() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Position::default()).unwrap();
    assert_ne!(world.record(entity).unwrap().table, EMPTY_TABLE);

    world.remove_component::<Position>(entity).unwrap();
    assert!(world.is_alive(entity));
    assert_eq!(world.record(entity).unwrap().table, EMPTY_TABLE);
    assert_eq!(world.get_component::<Position>(entity), Ok(None));
}

#[test]
fn removal_hook_fires_once_with_the_outgoing_value() {
    init_registry();
    let mut world = World::new();

    let entity = world.create_entity();
    world.set_component(entity, Audited(77)).unwrap();
    world.set_component(entity, Position::default()).unwrap();

    REMOVED.lock().unwrap().clear();
    world.remove_component::<Audited>(entity).unwrap();

    let seen = REMOVED.lock().unwrap().clone();
    assert_eq!(seen, vec![(entity, 77)]);

    // Destruction discards values without firing the removal hook.
    let doomed = world.create_entity();
    world.set_component(doomed, Audited(5)).unwrap();
    REMOVED.lock().unwrap().clear();
    world.destroy_entity(doomed).unwrap();
    assert!(REMOVED.lock().unwrap().is_empty());
}

#[test]
fn fail_fast_accessors_panic_on_absent_components() {
    init_registry();
    let mut world = World::new();
    let entity = world.create_entity();
    world.set_component(entity, Position::default()).unwrap();

    assert!(matches!(
        world.try_component_ref::<Mass>(entity),
        Err(EcsError::MissingComponent { .. })
    ));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = world.component_ref::<Mass>(entity);
    }));
    assert!(result.is_err());
}
