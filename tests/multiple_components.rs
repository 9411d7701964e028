//! Several polymorphic components on one entity: shared-ancestor fan-in,
//! flattened single views, and order-independence of insert/remove.

use std::cell::Cell;
use std::rc::Rc;

use polymorph_ecs::{is_same_or_parent_of, polymorphic, Entity, Poly, Polymorphic, Registry};

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
    pub struct CompA: inherit(par: Par) {}
}

polymorphic! {
    #[derive(Debug)]
    pub struct CompB: inherit(par: Par) {}
}

polymorphic! {
    #[derive(Debug)]
    pub struct Grand: inherit(a: CompA) {}
}

fn par(counter: &Rc<Cell<i32>>) -> Par {
    Par {
        x: 123,
        dropped: Some(counter.clone()),
    }
}

#[test]
fn metadata_matches_the_declared_hierarchy() {
    assert!(is_same_or_parent_of::<Par, Par>());
    assert!(is_same_or_parent_of::<Par, CompA>());
    assert!(is_same_or_parent_of::<Par, CompB>());
    assert!(is_same_or_parent_of::<Par, Grand>());
    assert!(is_same_or_parent_of::<CompA, Grand>());
    assert!(!is_same_or_parent_of::<CompB, Grand>());
    assert!(!is_same_or_parent_of::<CompA, CompB>());
    assert!(!is_same_or_parent_of::<Grand, CompA>());

    assert_eq!(Par::parents().len(), 0);
    assert_eq!(CompA::parents().len(), 1);
    assert_eq!(Grand::parents().len(), 2);
    assert!(!Grand::dedup_changed());
}

#[test]
fn siblings_under_a_shared_parent() {
    let mut registry = Registry::new();
    let entity = registry.create();
    let counter_a = Rc::new(Cell::new(0));
    let counter_b = Rc::new(Cell::new(0));

    let address_a = registry
        .emplace(entity, CompA { par: par(&counter_a) })
        .unwrap() as *const CompA as *const u8;
    let address_b = registry
        .emplace(entity, CompB { par: par(&counter_b) })
        .unwrap() as *const CompB as *const u8;

    // Both values fan in under Par.
    let sequence = registry.every::<Par>(entity);
    assert_eq!(sequence.len(), 2);
    let mut seen: Vec<*const u8> = sequence
        .iter()
        .map(|p| p as *const Par as *const u8)
        .collect();
    seen.sort();
    let mut expected = vec![address_a, address_b];
    expected.sort();
    assert_eq!(seen, expected);

    // A single-part view over the parent flattens: one row per value.
    let mut rows: Vec<(Entity, *const u8)> = Vec::new();
    registry
        .view::<Poly<Par>>()
        .each(|e, p| rows.push((e, p as *const Par as *const u8)));
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|(e, _)| *e == entity));

    // Removing by the parent destroys both, each exactly once, and empties
    // every storage involved.
    assert_eq!(registry.remove::<Par>(entity), 1);
    assert_eq!(counter_a.get(), 1);
    assert_eq!(counter_b.get(), 1);
    assert!(!registry.contains::<Par>(entity));
    assert!(!registry.contains::<CompA>(entity));
    assert!(!registry.contains::<CompB>(entity));
    assert_eq!(registry.poly_storage::<Par>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<CompA>().unwrap().len(), 0);
    assert_eq!(registry.poly_storage::<CompB>().unwrap().len(), 0);
}

// ── insert/remove order stress ──────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Kind {
    Par,
    A,
    B,
    Grand,
}

const KINDS: [Kind; 4] = [Kind::Par, Kind::A, Kind::B, Kind::Grand];

/// `viewed` sees `added` iff it is the same type or an ancestor of it.
fn satisfies(added: Kind, viewed: Kind) -> bool {
    added == viewed
        || match (added, viewed) {
            (Kind::A, Kind::Par) | (Kind::B, Kind::Par) => true,
            (Kind::Grand, Kind::A) | (Kind::Grand, Kind::Par) => true,
            _ => false,
        }
}

fn emplace_kind(registry: &mut Registry, entity: Entity, kind: Kind, counter: &Rc<Cell<i32>>) {
    match kind {
        Kind::Par => {
            registry.emplace(entity, par(counter)).unwrap();
        }
        Kind::A => {
            registry
                .emplace(entity, CompA { par: par(counter) })
                .unwrap();
        }
        Kind::B => {
            registry
                .emplace(entity, CompB { par: par(counter) })
                .unwrap();
        }
        Kind::Grand => {
            registry
                .emplace(
                    entity,
                    Grand {
                        a: CompA { par: par(counter) },
                    },
                )
                .unwrap();
        }
    }
}

fn remove_kind(registry: &mut Registry, entity: Entity, kind: Kind) -> usize {
    match kind {
        Kind::Par => registry.remove::<Par>(entity),
        Kind::A => registry.remove::<CompA>(entity),
        Kind::B => registry.remove::<CompB>(entity),
        Kind::Grand => registry.remove::<Grand>(entity),
    }
}

fn every_len(registry: &Registry, entity: Entity, viewed: Kind) -> usize {
    match viewed {
        Kind::Par => {
            let sequence = registry.every::<Par>(entity);
            assert!(sequence.iter().all(|p| p.x == 123));
            sequence.len()
        }
        Kind::A => {
            let sequence = registry.every::<CompA>(entity);
            assert!(sequence.iter().all(|a| a.par.x == 123));
            sequence.len()
        }
        Kind::B => {
            let sequence = registry.every::<CompB>(entity);
            assert!(sequence.iter().all(|b| b.par.x == 123));
            sequence.len()
        }
        Kind::Grand => {
            let sequence = registry.every::<Grand>(entity);
            assert!(sequence.iter().all(|g| g.a.par.x == 123));
            sequence.len()
        }
    }
}

fn is_present(registry: &Registry, entity: Entity, viewed: Kind) -> bool {
    match viewed {
        Kind::Par => registry.try_get::<Par>(entity).is_some(),
        Kind::A => registry.try_get::<CompA>(entity).is_some(),
        Kind::B => registry.try_get::<CompB>(entity).is_some(),
        Kind::Grand => registry.try_get::<Grand>(entity).is_some(),
    }
}

/// Asserts that every ancestor storage reflects exactly the live value set.
fn check_consistency(registry: &Registry, entity: Entity, live: &[Kind]) {
    for viewed in KINDS {
        let expected = live.iter().filter(|k| satisfies(**k, viewed)).count();
        assert_eq!(
            every_len(registry, entity, viewed),
            expected,
            "every<{viewed:?}> disagrees with live set {live:?}"
        );
        assert_eq!(
            is_present(registry, entity, viewed),
            expected > 0,
            "presence of {viewed:?} disagrees with live set {live:?}"
        );
    }
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    fn heap(items: &mut Vec<usize>, k: usize, out: &mut Vec<Vec<usize>>) {
        if k <= 1 {
            out.push(items.clone());
            return;
        }
        for i in 0..k {
            heap(items, k - 1, out);
            if k % 2 == 0 {
                items.swap(i, k - 1);
            } else {
                items.swap(0, k - 1);
            }
        }
    }
    let mut items: Vec<usize> = (0..n).collect();
    let mut out = Vec::new();
    heap(&mut items, n, &mut out);
    out
}

#[test]
fn insert_remove_order_stress() {
    for subset_mask in 1u32..(1 << KINDS.len()) {
        let subset: Vec<Kind> = KINDS
            .iter()
            .copied()
            .enumerate()
            .filter(|(i, _)| subset_mask & (1 << i) != 0)
            .map(|(_, kind)| kind)
            .collect();
        let orders = permutations(subset.len());

        for insert_order in &orders {
            for remove_order in &orders {
                let mut registry = Registry::new();
                let entity = registry.create();
                let counters: Vec<Rc<Cell<i32>>> =
                    subset.iter().map(|_| Rc::new(Cell::new(0))).collect();
                let mut live: Vec<Kind> = Vec::new();

                for &i in insert_order {
                    emplace_kind(&mut registry, entity, subset[i], &counters[i]);
                    live.push(subset[i]);
                    check_consistency(&registry, entity, &live);
                }

                for &i in remove_order {
                    let kind = subset[i];
                    // Removing under `kind` cascades into everything it sees.
                    let expect_cell = live.iter().any(|l| satisfies(*l, kind));
                    let removed = remove_kind(&mut registry, entity, kind);
                    assert_eq!(removed, usize::from(expect_cell));
                    live.retain(|l| !satisfies(*l, kind));
                    check_consistency(&registry, entity, &live);
                }

                assert!(live.is_empty());
                for (i, counter) in counters.iter().enumerate() {
                    assert_eq!(
                        counter.get(),
                        1,
                        "{:?} destroyed more or less than once (insert {:?}, remove {:?})",
                        subset[i],
                        insert_order,
                        remove_order
                    );
                }
            }
        }
    }
}
