use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use conveyer::model::Work;
use conveyer::state::{MemoryState, ScopedState, State};

fn backing() -> Arc<MemoryState> {
    Arc::new(MemoryState::new())
}

#[test]
fn check_and_set_only_writes_absent_keys() {
    let state = MemoryState::new();

    assert!(!state.has("k"));
    assert_eq!(state.get("k"), None);

    assert!(state.check_and_set("k", "first"));
    assert!(!state.check_and_set("k", "second"));

    assert!(state.has("k"));
    assert_eq!(state.get("k").as_deref(), Some("first"));
    assert_eq!(state.len(), 1);
}

#[test]
fn scoped_view_prefixes_every_key() {
    let store = backing();
    let view = ScopedState::new(store.clone(), "alice", "build1");
    assert_eq!(view.prefix(), "alice/build1/");

    assert!(view.check_and_set("status", "green"));

    assert!(store.has("alice/build1/status"));
    assert!(!store.has("status"));
    assert_eq!(view.get("status").as_deref(), Some("green"));
    assert_eq!(view.has("status"), store.has("alice/build1/status"));
}

#[test]
fn views_of_different_units_never_see_each_other() {
    let store = backing();
    let build1 = ScopedState::for_work(store.clone(), &Work::new("alice", "build1"));
    let build2 = ScopedState::for_work(store.clone(), &Work::new("alice", "build2"));
    let bob = ScopedState::for_work(store.clone(), &Work::new("bob", "build1"));

    assert!(build1.check_and_set("status", "one"));
    assert!(!build2.has("status"));
    assert!(!bob.has("status"));

    assert!(build2.check_and_set("status", "two"));
    assert!(bob.check_and_set("status", "three"));

    assert_eq!(store.get("alice/build1/status").as_deref(), Some("one"));
    assert_eq!(store.get("alice/build2/status").as_deref(), Some("two"));
    assert_eq!(store.get("bob/build1/status").as_deref(), Some("three"));
    assert_eq!(store.len(), 3);
}

#[test]
fn views_of_the_same_unit_share_keys() {
    let store = backing();
    let first = ScopedState::new(store.clone(), "alice", "build1");
    let second = ScopedState::new(store.clone(), "alice", "build1");

    assert!(first.check_and_set("lock", "run-1"));
    assert!(second.has("lock"));
    assert!(!second.check_and_set("lock", "run-2"));
    assert_eq!(second.get("lock").as_deref(), Some("run-1"));
}

#[test]
fn concurrent_check_and_set_through_views_has_one_winner() {
    let store = backing();
    let winners = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..16)
        .map(|i| {
            let view = ScopedState::new(store.clone(), "alice", "build1");
            let winners = Arc::clone(&winners);
            std::thread::spawn(move || {
                if view.check_and_set("lock", &format!("thread-{i}")) {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(winners.load(Ordering::SeqCst), 1);
    let value = store.get("alice/build1/lock").unwrap();
    assert!(value.starts_with("thread-"));
}

#[test]
fn slashes_inside_owner_or_unit_cannot_merge_namespaces() {
    let store = backing();
    let left = ScopedState::new(store.clone(), "a/b", "c");
    let right = ScopedState::new(store.clone(), "a", "b/c");

    assert!(left.check_and_set("k", "from-left"));
    assert!(!right.has("k"));
    assert_eq!(right.get("k"), None);
    assert!(right.check_and_set("k", "from-right"));

    assert_eq!(left.get("k").as_deref(), Some("from-left"));
    assert_eq!(right.get("k").as_deref(), Some("from-right"));
    assert_eq!(store.len(), 2);
}

#[test]
fn escaped_prefixes_stay_distinct_from_literal_percent_names() {
    let store = backing();
    let encoded = ScopedState::new(store.clone(), "a%2Fb", "c");
    let slashed = ScopedState::new(store.clone(), "a/b", "c");

    assert_eq!(slashed.prefix(), "a%2Fb/c/");
    assert_eq!(encoded.prefix(), "a%252Fb/c/");
    assert!(slashed.check_and_set("k", "slashed"));
    assert!(!encoded.has("k"));
}
