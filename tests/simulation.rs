//! End-to-end simulation: plain and polymorphic components mixed in views,
//! with behavior dispatched through the shared `Ticking` parent.

use std::mem::offset_of;

use polymorph_ecs::{polymorphic, Component, Entity, Every, EveryMut, Poly, Registry};

struct Transform {
    x: i64,
    y: i64,
}

impl Component for Transform {}

polymorphic! {
    pub struct Ticking {
        pub age: i32,
        pub tick_impl: fn(&mut Ticking, &mut Transform),
    }
}

impl Ticking {
    fn new(tick_impl: fn(&mut Ticking, &mut Transform)) -> Self {
        Self { age: 0, tick_impl }
    }

    fn tick(&mut self, transform: &mut Transform) {
        self.age += 1;
        let tick_impl = self.tick_impl;
        tick_impl(self, transform);
    }
}

polymorphic! {
    pub struct PhysicsBase {
        pub velocity: (i64, i64),
    }
}

polymorphic! {
    pub struct Physics: inherit(base: PhysicsBase, ticking: Ticking) {}
}

// Recovers the enclosing component from its embedded ticking part; the
// function is only ever installed on a Ticking living inside a Physics.
fn physics_tick(ticking: &mut Ticking, transform: &mut Transform) {
    let physics = unsafe {
        &mut *(ticking as *mut Ticking)
            .cast::<u8>()
            .sub(offset_of!(Physics, ticking))
            .cast::<Physics>()
    };
    transform.x += physics.base.velocity.0;
    transform.y += physics.base.velocity.1;
}

polymorphic! {
    pub struct Tracker: inherit(ticking: Ticking) {
        pub history: Vec<(i64, i64)>,
    }
}

fn tracker_tick(ticking: &mut Ticking, transform: &mut Transform) {
    let tracker = unsafe {
        &mut *(ticking as *mut Ticking)
            .cast::<u8>()
            .sub(offset_of!(Tracker, ticking))
            .cast::<Tracker>()
    };
    tracker.history.push((transform.x, transform.y));
}

const ENTITY_COUNT: usize = 10;
const TICK_COUNT: i64 = 100;

fn spawn_world(registry: &mut Registry) -> Vec<Entity> {
    (0..ENTITY_COUNT)
        .map(|_| {
            let entity = registry.create();
            registry
                .insert(entity, Transform { x: 0, y: 0 })
                .unwrap();
            registry
                .emplace(
                    entity,
                    Physics {
                        base: PhysicsBase { velocity: (2, 3) },
                        ticking: Ticking::new(physics_tick),
                    },
                )
                .unwrap();
            registry
                .emplace(
                    entity,
                    Tracker {
                        ticking: Ticking::new(tracker_tick),
                        history: Vec::new(),
                    },
                )
                .unwrap();
            entity
        })
        .collect()
}

#[test]
fn simulated_ticking_world() {
    let mut registry = Registry::new();
    let entities = spawn_world(&mut registry);

    for _ in 0..TICK_COUNT {
        registry
            .view::<(&mut Transform, EveryMut<Ticking>)>()
            .each(|_, (transform, tickings)| {
                for ticking in tickings {
                    ticking.tick(transform);
                }
            });
    }

    let mut visited = 0;
    registry
        .view::<(
            &Transform,
            Every<Ticking>,
            Poly<PhysicsBase>,
            Poly<Physics>,
            Poly<Tracker>,
        )>()
        .each(
            |_, (transform, tickings, physics_base, physics, tracker)| {
                assert_eq!(physics.base.velocity, (2, 3));
                assert_eq!(physics_base.velocity, physics.base.velocity);
                assert_eq!(transform.x, TICK_COUNT * physics_base.velocity.0);
                assert_eq!(transform.y, TICK_COUNT * physics_base.velocity.1);
                assert_eq!(tracker.history.len(), TICK_COUNT as usize);

                // Exactly two ticking identities: the physics component's and
                // the tracker's.
                let mut ticking_count = 0;
                for ticking in tickings.iter() {
                    assert_eq!(ticking.age, TICK_COUNT as i32);
                    ticking_count += 1;
                }
                assert_eq!(ticking_count, 2);
                visited += 1;
            },
        );
    assert_eq!(visited, ENTITY_COUNT);

    // Teardown: every entity destroys cleanly and all storages drain.
    for entity in entities {
        assert!(registry.destroy(entity));
    }
    assert_eq!(registry.entity_count(), 0);
    assert_eq!(registry.poly_storage::<Ticking>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<Physics>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<Tracker>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<PhysicsBase>().unwrap().len(), 0);
}

#[test]
#[should_panic(expected = "alias mutably")]
fn conflicting_view_parts_panic() {
    let mut registry = Registry::new();
    spawn_world(&mut registry);
    registry
        .view::<(EveryMut<Ticking>, Poly<Physics>)>()
        .each(|_, _| {});
}
