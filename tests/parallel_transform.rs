use std::any::TypeId;
use std::sync::Once;

use archetable::{register_component, EntityID, Query, World};

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Position {
    x: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Velocity {
    x: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Default)]
struct Wealth(i64);

static INIT: Once = Once::new();

fn init_registry() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Velocity>().unwrap();
        register_component::<Wealth>().unwrap();
    });
}

/// Builds a world with several archetypes and tombstoned slots so the
/// splitter has to skip holes and cross table boundaries.
fn churned_world(count: i64) -> (World, Vec<EntityID>) {
    let mut world = World::new();
    let mut live = Vec::new();

    for i in 0..count {
        let entity = world.create_entity();
        world.set_component(entity, Position { x: i }).unwrap();
        if i % 2 == 0 {
            world.set_component(entity, Velocity { x: i * 10 }).unwrap();
        }
        if i % 3 == 0 {
            world.set_component(entity, Wealth(i)).unwrap();
        }
        live.push(entity);
    }

    // Punch holes: destroy every 7th entity.
    let mut index = 0;
    live.retain(|entity| {
        index += 1;
        if index % 7 == 0 {
            world.destroy_entity(*entity).unwrap();
            false
        } else {
            true
        }
    });

    (world, live)
}

#[test]
fn parallel_transform_matches_sequential_each() {
    init_registry();
    let (mut world, _live) = churned_world(500);

    let mut query = Query::new(&world, &[TypeId::of::<Position>()]).unwrap();

    let mut sequential: Vec<(EntityID, i64)> = Vec::new();
    query
        .each1::<Position, _>(&mut world, |entity, position| {
            sequential.push((entity, position.x * 2));
        })
        .unwrap();

    let parallel = query
        .par_transform::<Position, (EntityID, i64), _>(&world, usize::MAX, |entity, position| {
            (entity, position.x * 2)
        })
        .unwrap();

    assert_eq!(parallel.len(), sequential.len());

    let mut sequential_sorted = sequential.clone();
    let mut parallel_sorted = parallel.clone();
    sequential_sorted.sort_unstable();
    parallel_sorted.sort_unstable();
    assert_eq!(parallel_sorted, sequential_sorted);
}

#[test]
fn parallel_output_order_is_deterministic() {
    init_registry();
    let (world, _live) = churned_world(300);

    let mut query = Query::new(&world, &[TypeId::of::<Position>()]).unwrap();

    let first = query
        .par_transform::<Position, (EntityID, i64), _>(&world, 8, |entity, p| (entity, p.x))
        .unwrap();
    let second = query
        .par_transform::<Position, (EntityID, i64), _>(&world, 3, |entity, p| (entity, p.x))
        .unwrap();

    // The output slot of each (table, entity) pair does not depend on the
    // worker count or scheduling.
    assert_eq!(first, second);
}

#[test]
fn result_count_equals_occupied_count() {
    init_registry();
    let (world, live) = churned_world(200);

    let mut query = Query::new(&world, &[TypeId::of::<Position>()]).unwrap();
    let results = query
        .par_transform::<Position, i64, _>(&world, usize::MAX, |_, p| p.x)
        .unwrap();

    assert_eq!(results.len(), live.len());
}

#[test]
fn single_worker_cap_still_covers_everything() {
    init_registry();
    let (mut world, _live) = churned_world(100);

    let mut query = Query::new(
        &world,
        &[TypeId::of::<Position>(), TypeId::of::<Velocity>()],
    )
    .unwrap();

    let mut expected = 0i64;
    query
        .each2::<Position, Velocity, _>(&mut world, |_, p, v| {
            expected += p.x + v.x;
        })
        .unwrap();

    let results = query
        .par_transform2::<Position, Velocity, i64, _>(&world, 1, |_, p, v| p.x + v.x)
        .unwrap();
    assert_eq!(results.iter().sum::<i64>(), expected);
}

#[test]
fn empty_matches_produce_empty_results() {
    init_registry();
    let world = World::new();
    let mut query = Query::new(&world, &[TypeId::of::<Wealth>()]).unwrap();
    let results = query
        .par_transform::<Wealth, i64, _>(&world, 4, |_, w| w.0)
        .unwrap();
    assert!(results.is_empty());
}

#[test]
fn two_component_transform_reads_aligned_rows() {
    init_registry();
    let mut world = World::new();

    for i in 0..50 {
        let entity = world.create_entity();
        world.set_component(entity, Position { x: i }).unwrap();
        world.set_component(entity, Velocity { x: -i }).unwrap();
    }

    let mut query = Query::new(
        &world,
        &[TypeId::of::<Position>(), TypeId::of::<Velocity>()],
    )
    .unwrap();

    let sums = query
        .par_transform2::<Position, Velocity, i64, _>(&world, usize::MAX, |_, p, v| p.x + v.x)
        .unwrap();

    assert_eq!(sums.len(), 50);
    assert!(sums.iter().all(|&sum| sum == 0));
}
