use std::sync::{Arc, Mutex};

use crate::assessment::saga::{EntityRef, Saga};
use crate::assessment::store::StoreError;

#[test]
fn abort_runs_undos_newest_first() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut saga = Saga::new();
    for name in ["first", "second", "third"] {
        let log = Arc::clone(&order);
        saga.record(EntityRef::new(name, 1), move || {
            log.lock().expect("order mutex").push(name);
            Ok(())
        });
    }

    let attempted = saga.abort();
    assert_eq!(
        attempted,
        vec![
            EntityRef::new("third", 1),
            EntityRef::new("second", 1),
            EntityRef::new("first", 1),
        ]
    );
    assert_eq!(*order.lock().expect("order mutex"), vec!["third", "second", "first"]);
}

#[test]
fn abort_continues_past_a_failing_undo() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let mut saga = Saga::new();
    {
        let log = Arc::clone(&order);
        saga.record(EntityRef::new("survivor", 1), move || {
            log.lock().expect("order mutex").push("survivor");
            Ok(())
        });
    }
    saga.record(EntityRef::new("broken", 2), || {
        Err(StoreError::Unavailable("gone".into()))
    });

    let attempted = saga.abort();
    // The failing step is still reported, and the earlier one still runs.
    assert_eq!(attempted.len(), 2);
    assert_eq!(attempted[0], EntityRef::new("broken", 2));
    assert_eq!(*order.lock().expect("order mutex"), vec!["survivor"]);
}

#[test]
fn commit_discards_the_undo_log() {
    let ran = Arc::new(Mutex::new(false));
    let mut saga = Saga::new();
    let flag = Arc::clone(&ran);
    saga.record(EntityRef::new("row", 7), move || {
        *flag.lock().expect("flag mutex") = true;
        Ok(())
    });
    saga.commit();
    assert!(!*ran.lock().expect("flag mutex"));
}

#[test]
fn entity_refs_render_as_kind_and_id() {
    assert_eq!(EntityRef::new("unit", 42).to_string(), "unit#42");
}
