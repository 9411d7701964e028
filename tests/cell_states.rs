//! Container cell state machine, observed through storage diagnostics:
//! value/reference flags, list creation and collapse, and cell release on
//! emptiness.

use std::cell::Cell;
use std::rc::Rc;

use polymorph_ecs::{polymorphic, Entity, Polymorphic, Registry};

polymorphic! {
    #[derive(Debug)]
    pub struct Par {
        pub x: i32,
        pub dropped: Option<Rc<Cell<i32>>>,
    }
}

impl Drop for Par {
    fn drop(&mut self) {
        if let Some(counter) = &self.dropped {
            counter.set(counter.get() + 1);
        }
    }
}

polymorphic! {
    #[derive(Debug)]
    pub struct Child: inherit(par: Par) {}
}

polymorphic! {
    #[derive(Debug)]
    pub struct GrandA: inherit(child: Child) {}
}

polymorphic! {
    #[derive(Debug)]
    pub struct GrandB: inherit(child: Child) {}
}

fn bare_par() -> Par {
    Par {
        x: 1,
        dropped: None,
    }
}

fn counted_par(counter: &Rc<Cell<i32>>) -> Par {
    Par {
        x: 1,
        dropped: Some(counter.clone()),
    }
}

/// A list, when present, never holds fewer than two records.
fn assert_cell_invariant<U: Polymorphic>(registry: &Registry, entity: Entity) {
    if let Some(cell) = registry.poly_storage::<U>().and_then(|s| s.cell(entity)) {
        assert!(!cell.has_list() || cell.list_len() >= 2);
    }
}

fn assert_all_invariants(registry: &Registry, entity: Entity) {
    assert_cell_invariant::<Par>(registry, entity);
    assert_cell_invariant::<Child>(registry, entity);
    assert_cell_invariant::<GrandA>(registry, entity);
    assert_cell_invariant::<GrandB>(registry, entity);
}

#[test]
fn value_only_cell_has_no_list() {
    let mut registry = Registry::new();
    let entity = registry.create();
    registry.emplace(entity, bare_par()).unwrap();

    let cell = registry.poly_storage::<Par>().unwrap().cell(entity).unwrap();
    assert!(cell.holds_value());
    assert!(!cell.has_list());
    assert_eq!(cell.list_len(), 0);
    assert_eq!(cell.each().len(), 1);
}

#[test]
fn single_reference_cell_has_no_list() {
    let mut registry = Registry::new();
    let entity = registry.create();
    registry.emplace(entity, Child { par: bare_par() }).unwrap();

    let par_cell = registry.poly_storage::<Par>().unwrap().cell(entity).unwrap();
    assert!(!par_cell.holds_value());
    assert!(!par_cell.has_list());
    assert_eq!(par_cell.each().len(), 1);

    let child_cell = registry
        .poly_storage::<Child>()
        .unwrap()
        .cell(entity)
        .unwrap();
    assert!(child_cell.holds_value());
    assert!(!child_cell.has_list());
}

#[test]
fn second_reference_creates_a_list_and_removal_collapses_it() {
    let mut registry = Registry::new();
    let entity = registry.create();
    registry
        .emplace(entity, GrandA { child: Child { par: bare_par() } })
        .unwrap();
    registry
        .emplace(entity, GrandB { child: Child { par: bare_par() } })
        .unwrap();
    assert_all_invariants(&registry, entity);

    // Child's cell references both grandchildren, with no owned value.
    {
        let child_cell = registry
            .poly_storage::<Child>()
            .unwrap()
            .cell(entity)
            .unwrap();
        assert!(!child_cell.holds_value());
        assert!(child_cell.has_list());
        assert_eq!(child_cell.list_len(), 2);
        assert_eq!(child_cell.each().len(), 2);
    }

    // Removing one grandchild collapses the list back to a single
    // reference targeting the survivor.
    assert_eq!(registry.remove::<GrandA>(entity), 1);
    assert_all_invariants(&registry, entity);
    {
        let survivor = registry.try_get::<GrandB>(entity).unwrap();
        let expected = &survivor.child as *const Child;
        let child_cell = registry
            .poly_storage::<Child>()
            .unwrap()
            .cell(entity)
            .unwrap();
        assert!(!child_cell.holds_value());
        assert!(!child_cell.has_list());
        assert!(std::ptr::eq(child_cell.ref_value(), expected));
    }

    // Removing the last reference releases the cell entirely.
    assert_eq!(registry.remove::<GrandB>(entity), 1);
    assert_eq!(registry.poly_storage::<Child>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<Par>().unwrap().len(), 0);
}

#[test]
fn owned_value_and_references_share_a_list() {
    let mut registry = Registry::new();
    let entity = registry.create();
    registry.emplace(entity, Child { par: bare_par() }).unwrap();
    registry
        .emplace(entity, GrandA { child: Child { par: bare_par() } })
        .unwrap();
    assert_all_invariants(&registry, entity);

    // Child's cell owns its value and additionally references GrandA's
    // child subobject: the list carries the self-reference too.
    {
        let child_cell = registry
            .poly_storage::<Child>()
            .unwrap()
            .cell(entity)
            .unwrap();
        assert!(child_cell.holds_value());
        assert!(child_cell.has_list());
        assert_eq!(child_cell.list_len(), 2);
        assert_eq!(child_cell.each().len(), 2);
    }

    // Dropping the grandchild collapses back to the value-only state.
    assert_eq!(registry.remove::<GrandA>(entity), 1);
    {
        let child_cell = registry
            .poly_storage::<Child>()
            .unwrap()
            .cell(entity)
            .unwrap();
        assert!(child_cell.holds_value());
        assert!(!child_cell.has_list());
        assert_eq!(child_cell.each().len(), 1);
    }

    assert_eq!(registry.remove::<Child>(entity), 1);
    assert_eq!(registry.poly_storage::<Child>().unwrap().len(), 0);
}

#[test]
fn value_constructed_into_a_references_only_cell() {
    let mut registry = Registry::new();
    let entity = registry.create();
    registry
        .emplace(entity, GrandA { child: Child { par: bare_par() } })
        .unwrap();

    // Child's cell starts as a bare reference; installing an owned Child
    // value must keep the existing reference alongside it.
    registry.emplace(entity, Child { par: bare_par() }).unwrap();
    assert_all_invariants(&registry, entity);
    {
        let child_cell = registry
            .poly_storage::<Child>()
            .unwrap()
            .cell(entity)
            .unwrap();
        assert!(child_cell.holds_value());
        assert!(child_cell.has_list());
        assert_eq!(child_cell.list_len(), 2);
    }
    assert_eq!(registry.every::<Par>(entity).len(), 2);

    assert_eq!(registry.remove::<Par>(entity), 1);
    assert_eq!(registry.poly_storage::<Par>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<Child>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<GrandA>().unwrap().len(), 0);
}

#[test]
fn value_destroyed_while_its_references_remain() {
    let mut registry = Registry::new();
    let entity = registry.create();
    let counter_a = Rc::new(Cell::new(0));
    let counter_b = Rc::new(Cell::new(0));
    let counter_child = Rc::new(Cell::new(0));

    // Emplacement order puts the owned Child value at the top of Par's
    // reference list, so the cascade destroys it while both grandchild
    // references are still listed in Child's own cell.
    registry
        .emplace(
            entity,
            GrandA {
                child: Child {
                    par: counted_par(&counter_a),
                },
            },
        )
        .unwrap();
    registry
        .emplace(
            entity,
            GrandB {
                child: Child {
                    par: counted_par(&counter_b),
                },
            },
        )
        .unwrap();
    registry
        .emplace(
            entity,
            Child {
                par: counted_par(&counter_child),
            },
        )
        .unwrap();

    {
        let child_cell = registry
            .poly_storage::<Child>()
            .unwrap()
            .cell(entity)
            .unwrap();
        assert!(child_cell.holds_value());
        assert_eq!(child_cell.list_len(), 3);
    }

    assert_eq!(registry.remove::<Par>(entity), 1);
    assert_eq!(counter_a.get(), 1);
    assert_eq!(counter_b.get(), 1);
    assert_eq!(counter_child.get(), 1);
    assert_eq!(registry.poly_storage::<Par>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<Child>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<GrandA>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<GrandB>().unwrap().len(), 0);
}

polymorphic! {
    #[derive(Debug)]
    pub struct Marker {}
}

polymorphic! {
    #[derive(Debug)]
    pub struct Tagged: inherit(marker: Marker) {
        pub payload: u32,
    }
}

#[test]
fn empty_components_still_materialize_cells() {
    // The declaration macro forces the alignment the tag bits rely on, even
    // for field-less components.
    assert!(std::mem::align_of::<Marker>() >= 4);
    assert!(std::mem::align_of::<Tagged>() >= 4);

    let mut registry = Registry::new();
    let entity = registry.create();
    registry
        .emplace(
            entity,
            Tagged {
                marker: Marker {},
                payload: 7,
            },
        )
        .unwrap();

    assert!(registry.contains::<Marker>(entity));
    assert_eq!(registry.every::<Marker>(entity).len(), 1);
    assert_eq!(registry.poly_storage::<Marker>().unwrap().len(), 1);

    assert_eq!(registry.remove::<Marker>(entity), 1);
    assert!(!registry.contains::<Tagged>(entity));
    assert_eq!(registry.poly_storage::<Marker>().unwrap().len(), 0);
}

#[test]
fn empty_cells_free_their_slots_for_reuse() {
    let mut registry = Registry::new();
    let entity = registry.create();

    registry.emplace(entity, bare_par()).unwrap();
    let first = registry.try_get::<Par>(entity).unwrap() as *const Par;
    assert_eq!(registry.remove::<Par>(entity), 1);
    assert_eq!(registry.poly_storage::<Par>().unwrap().len(), 0);

    // The released slot is recycled for the next cell.
    registry.emplace(entity, bare_par()).unwrap();
    let second = registry.try_get::<Par>(entity).unwrap() as *const Par;
    assert_eq!(first, second);
}
