//! Example of an entity-component store built on `RawPool`.
//!
//! Each component type lives in its own pool. Entities are plain ids that map to the handles of
//! their components, so components stay reachable even as the pools grow and move their storage.

use foldhash::HashMap;
use region_pool::{Handle, RawPool};

#[derive(Debug)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug)]
struct Velocity {
    dx: f32,
    dy: f32,
}

type EntityId = u32;

#[derive(Default)]
struct World {
    next_entity: EntityId,

    positions: RawPool<Position>,
    velocities: RawPool<Velocity>,

    position_of: HashMap<EntityId, Handle>,
    velocity_of: HashMap<EntityId, Handle>,
}

impl World {
    fn spawn(&mut self, position: Position, velocity: Option<Velocity>) -> EntityId {
        let entity = self.next_entity;
        self.next_entity = self
            .next_entity
            .checked_add(1)
            .expect("this example never spawns four billion entities");

        self.position_of
            .insert(entity, self.positions.allocate(position));

        if let Some(velocity) = velocity {
            self.velocity_of
                .insert(entity, self.velocities.allocate(velocity));
        }

        entity
    }

    fn despawn(&mut self, entity: EntityId) {
        if let Some(handle) = self.position_of.remove(&entity) {
            self.positions.free(handle);
        }

        if let Some(handle) = self.velocity_of.remove(&entity) {
            self.velocities.free(handle);
        }
    }

    fn step(&mut self) {
        for (entity, velocity_handle) in &self.velocity_of {
            let Some(velocity) = self.velocities.get(*velocity_handle) else {
                continue;
            };

            let Some(position) = self
                .position_of
                .get(entity)
                .and_then(|handle| self.positions.get_mut(*handle))
            else {
                continue;
            };

            position.x += velocity.dx;
            position.y += velocity.dy;
        }
    }
}

fn main() {
    let mut world = World::default();

    let player = world.spawn(
        Position { x: 0.0, y: 0.0 },
        Some(Velocity { dx: 1.0, dy: 0.5 }),
    );
    let tree = world.spawn(Position { x: 10.0, y: 3.0 }, None);
    let arrow = world.spawn(
        Position { x: 2.0, y: 2.0 },
        Some(Velocity { dx: 4.0, dy: 0.0 }),
    );

    for _ in 0..3 {
        world.step();
    }

    world.despawn(arrow);

    // The slot freed by the arrow is reused, but the arrow's handles stay dead.
    let rock = world.spawn(Position { x: -5.0, y: 1.0 }, None);

    for entity in [player, tree, arrow, rock] {
        let position = world
            .position_of
            .get(&entity)
            .and_then(|handle| world.positions.get(*handle));

        println!("entity {entity}: {position:?}");
    }

    println!(
        "{} positions, {} velocities",
        world.positions.len(),
        world.velocities.len()
    );

    for position in &world.positions {
        println!("stored position ({}, {})", position.x, position.y);
    }
}
