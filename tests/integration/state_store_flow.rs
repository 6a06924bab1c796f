//! Integration tests for the durable state store
//!
//! Exercises value round-trips across reopen, provenance rules and the
//! consumer accessor against a real SQLite file.

use proptest::prelude::*;
use std::path::Path;
use tempfile::TempDir;
use trellis::data::{
    SqliteStateStore, StateAccessor, StateError, StateStore, StateValue, StoreOptions,
};

fn create_test_store() -> (SqliteStateStore, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = SqliteStateStore::open(dir.path().join("state.db")).expect("Failed to open store");
    (store, dir)
}

fn reopen(dir: &TempDir) -> SqliteStateStore {
    SqliteStateStore::open(dir.path().join("state.db")).expect("Failed to reopen store")
}

/// set, then increment without an author, keeps the last named updater
#[test]
fn test_increment_preserves_updater() {
    let (store, _dir) = create_test_store();

    store.set("x", StateValue::Int(5), Some("alice")).unwrap();
    assert_eq!(store.atomic_increment("x", 3, None).unwrap(), 8);

    let entry = store.get_entry("x").unwrap().unwrap();
    assert_eq!(entry.value, StateValue::Int(8));
    assert_eq!(entry.updated_by.as_deref(), Some("alice"));
    assert_eq!(entry.created_by.as_deref(), Some("alice"));
}

#[test]
fn test_values_survive_reopen() {
    let (store, dir) = create_test_store();
    let large = "x".repeat(150 * 1024);
    let binary: Vec<u8> = (0..=255).collect();

    store.set("large", large.clone().into(), None).unwrap();
    store.set("empty", "".into(), None).unwrap();
    store.set("binary", binary.clone().into(), None).unwrap();
    store.set("null", StateValue::Null, None).unwrap();
    store.set("float", 2.5.into(), None).unwrap();
    store.set("flag", false.into(), None).unwrap();
    drop(store);

    let store = reopen(&dir);
    assert_eq!(store.get("large").unwrap(), StateValue::Text(large));
    assert_eq!(store.get("empty").unwrap(), StateValue::Text(String::new()));
    assert_eq!(store.get("binary").unwrap(), StateValue::Bytes(binary));
    assert_eq!(store.get("null").unwrap(), StateValue::Null);
    assert_eq!(store.get("float").unwrap(), StateValue::Float(2.5));
    assert_eq!(store.get("flag").unwrap(), StateValue::Bool(false));
    assert_eq!(store.len().unwrap(), 6);
}

#[test]
fn test_reopen_is_non_destructive() {
    let (store, dir) = create_test_store();
    store.set("k", "v".into(), Some("a")).unwrap();
    let before = store.get_entry("k").unwrap().unwrap();
    drop(store);

    for _ in 0..3 {
        let store = reopen(&dir);
        assert_eq!(store.get_entry("k").unwrap().unwrap(), before);
    }
}

#[test]
fn test_delete_contains_consistency() {
    let (store, _dir) = create_test_store();
    store.set("k", 1.into(), None).unwrap();
    assert!(store.contains("k").unwrap());

    assert!(store.delete("k").unwrap());
    assert!(!store.contains("k").unwrap());
    assert!(matches!(store.get("k"), Err(StateError::KeyNotFound(_))));
    assert!(store.get_entry("k").unwrap().is_none());
    assert!(!store.delete("k").unwrap());
}

#[test]
fn test_non_numeric_values_increment_from_zero() {
    let (store, _dir) = create_test_store();
    store.set("text", "hello".into(), None).unwrap();
    store.set("bytes", vec![1u8, 2].into(), None).unwrap();
    store.set("null", StateValue::Null, None).unwrap();
    store.set("yes", true.into(), None).unwrap();
    store.set("float", (-2.9).into(), None).unwrap();

    assert_eq!(store.atomic_increment("text", 2, None).unwrap(), 2);
    assert_eq!(store.atomic_increment("bytes", 2, None).unwrap(), 2);
    assert_eq!(store.atomic_increment("null", 2, None).unwrap(), 2);
    assert_eq!(store.atomic_increment("yes", 2, None).unwrap(), 3);
    assert_eq!(store.atomic_increment("float", 2, None).unwrap(), 0);
    assert_eq!(store.get("text").unwrap(), StateValue::Int(2));
}

#[test]
fn test_named_table_and_invalid_identifiers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("dir").join("state.db");
    let options = |table: &str| StoreOptions {
        table: table.to_string(),
        ..StoreOptions::default()
    };

    let sessions = SqliteStateStore::open_with_options(&path, options("sessions")).unwrap();
    let projects = SqliteStateStore::open_with_options(&path, options("projects")).unwrap();
    sessions.set("k", 1.into(), None).unwrap();
    assert!(!projects.contains("k").unwrap());
    assert!(Path::new(&path).exists());

    for bad in ["", "a-b", "a;DROP TABLE state", "t'", "t\"", "x--", "a b", "1abc", "sqlite_master"] {
        assert!(
            matches!(
                SqliteStateStore::open_with_options(&path, options(bad)),
                Err(StateError::InvalidIdentifier(_))
            ),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_malformed_file_is_fatal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.db");
    std::fs::write(&path, b"definitely not a database, just some bytes that go on").unwrap();
    assert!(SqliteStateStore::open(&path).is_err());
}

#[test]
fn test_accessor_over_durable_store() {
    let (store, dir) = create_test_store();
    let session = StateAccessor::for_session(&store);

    session.set("phase", "plan").unwrap();
    let started = session.set_timestamp_if_absent("started_at").unwrap();
    assert_eq!(session.increment("turns", 1).unwrap(), 1);
    drop(store);

    let store = reopen(&dir);
    let session = StateAccessor::for_session(&store);
    assert_eq!(session.get("phase").unwrap(), Some(StateValue::from("plan")));
    assert_eq!(session.set_timestamp_if_absent("started_at").unwrap(), started);
    let entry = session.entry("turns").unwrap().unwrap();
    assert_eq!(entry.updated_by.as_deref(), Some("session"));
}

#[test]
fn test_keys_listing_is_restartable() {
    let (store, _dir) = create_test_store();
    for i in 0..600 {
        store.set(&format!("key-{i:04}"), i.into(), None).unwrap();
    }

    let first: Vec<String> = store.keys().collect::<Result<_, _>>().unwrap();
    assert_eq!(first.len(), 600);
    assert!(first.windows(2).all(|w| w[0] < w[1]));

    let partial: Vec<String> = store.keys().take(10).collect::<Result<_, _>>().unwrap();
    assert_eq!(partial, first[..10]);
}

fn state_value() -> impl Strategy<Value = StateValue> {
    prop_oneof![
        Just(StateValue::Null),
        any::<bool>().prop_map(StateValue::Bool),
        any::<i64>().prop_map(StateValue::Int),
        any::<f64>()
            .prop_filter("NaN is stored as NULL", |f| !f.is_nan())
            .prop_map(StateValue::Float),
        "\\PC{0,64}".prop_map(StateValue::Text),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(StateValue::Bytes),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_value_round_trips_across_reopen(key in "[a-z.]{1,16}", value in state_value()) {
        let (store, dir) = create_test_store();
        store.set(&key, value.clone(), None).unwrap();
        prop_assert_eq!(store.get(&key).unwrap(), value.clone());
        drop(store);

        let store = reopen(&dir);
        prop_assert_eq!(store.get(&key).unwrap(), value);
    }

    #[test]
    fn prop_provenance_follows_last_named_author(
        authors in prop::collection::vec(prop::option::of("[a-z]{1,6}"), 1..8)
    ) {
        let (store, _dir) = create_test_store();
        for (i, author) in authors.iter().enumerate() {
            store.set("k", StateValue::Int(i as i64), author.as_deref()).unwrap();
        }

        let entry = store.get_entry("k").unwrap().unwrap();
        let first = authors[0].clone();
        let last_named = authors.iter().rev().find_map(|a| a.clone());
        prop_assert_eq!(entry.created_by, first);
        prop_assert_eq!(entry.updated_by, last_named);
        prop_assert!(entry.created_at <= entry.updated_at);
    }
}
