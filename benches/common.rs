#![allow(dead_code)]

use std::any::TypeId;
use std::sync::Once;

use archetable::{register_component, Query, World};

#[derive(Clone, Copy, Debug, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Velocity {
    pub dx: f32,
    pub dy: f32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Wealth {
    pub value: f32,
}

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

static INIT: Once = Once::new();

pub fn init_components() {
    INIT.call_once(|| {
        register_component::<Position>().unwrap();
        register_component::<Velocity>().unwrap();
        register_component::<Wealth>().unwrap();
    });
}

pub fn make_world(capacity: usize) -> World {
    init_components();
    World::with_capacity(capacity)
}

/// Fills the world with movers; every second entity also carries Wealth so
/// queries span two archetypes.
pub fn populate(world: &mut World, count: usize) {
    for i in 0..count {
        let entity = world.create_entity();
        world
            .set_component(entity, Position { x: i as f32, y: 0.0 })
            .unwrap();
        world
            .set_component(entity, Velocity { dx: 1.0, dy: -1.0 })
            .unwrap();
        if i % 2 == 0 {
            world.set_component(entity, Wealth { value: 1.0 }).unwrap();
        }
    }
}

pub fn movement_query(world: &World) -> Query {
    Query::new(
        world,
        &[TypeId::of::<Position>(), TypeId::of::<Velocity>()],
    )
    .unwrap()
}
