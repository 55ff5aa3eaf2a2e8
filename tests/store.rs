use std::collections::BTreeMap;

use tempfile::TempDir;
use tsprocess::{CacheStore, Error};

#[test]
fn set_get_has_and_overwrite() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 16).unwrap();

    assert!(!store.has(&["EQ1", "S1", "k", "record"]));
    store.set(&["EQ1", "S1", "k", "record"], &vec![1.0, 2.5]).unwrap();
    assert!(store.has(&["EQ1", "S1", "k", "record"]));
    // containers are not values
    assert!(!store.has(&["EQ1", "S1"]));

    let got: Vec<f64> = store.get(&["EQ1", "S1", "k", "record"]).unwrap();
    assert_eq!(got, vec![1.0, 2.5]);

    store.set(&["EQ1", "S1", "k", "record"], &vec![3.0]).unwrap();
    let got: Vec<f64> = store.get(&["EQ1", "S1", "k", "record"]).unwrap();
    assert_eq!(got, vec![3.0]);
}

#[test]
fn missing_values_are_not_found() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 16).unwrap();
    let err = store.get::<String>(&["nothing", "here"]).unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(err, Error::NotFound { ref path } if path == "nothing/here"));
}

#[test]
fn empty_paths_and_segments_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 16).unwrap();
    assert!(store.set(&[], &1).is_err());
    assert!(store.set(&["a", "", "b"], &1).is_err());
    assert!(!store.has(&["a", ""]));
}

#[test]
fn delete_removes_everything_beneath_a_prefix() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 16).unwrap();
    store.set(&["EQ1", "S1", "k1", "record"], &1).unwrap();
    store.set(&["EQ1", "S1", "k1", "spectra", "fas"], &2).unwrap();
    store.set(&["EQ1", "S2", "k2", "record"], &3).unwrap();
    store.set(&["EQ10", "S1", "k1", "record"], &4).unwrap();
    // warm the in-memory cache
    let _: i32 = store.get(&["EQ1", "S1", "k1", "spectra", "fas"]).unwrap();

    store.delete(&["EQ1"]).unwrap();

    assert!(!store.has(&["EQ1", "S1", "k1", "record"]));
    assert!(store.get::<i32>(&["EQ1", "S1", "k1", "spectra", "fas"]).unwrap_err().is_not_found());
    assert!(!store.has(&["EQ1", "S2", "k2", "record"]));
    assert_eq!(store.get::<i32>(&["EQ10", "S1", "k1", "record"]).unwrap(), 4);

    // deleting something absent is fine
    store.delete(&["EQ1"]).unwrap();
}

#[test]
fn delete_of_a_value_also_drops_its_namesake_container() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 0).unwrap();
    store.set(&["a", "b"], &"value").unwrap();
    store.set(&["a", "b", "c"], &"nested").unwrap();
    store.delete(&["a", "b"]).unwrap();
    assert!(!store.has(&["a", "b"]));
    assert!(!store.has(&["a", "b", "c"]));
    assert!(store.children(&["a"]).unwrap().is_empty());
}

#[test]
fn children_lists_values_and_containers() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 16).unwrap();
    store.set(&["EQ2", "S1", "k", "record"], &1).unwrap();
    store.set(&["EQ1", "S1", "k", "record"], &1).unwrap();
    store.set(&["EQ1", "S2", "k", "record"], &1).unwrap();
    store.set(&["EQ1", "notes"], &"x").unwrap();

    assert_eq!(store.children(&[]).unwrap(), vec!["EQ1", "EQ2"]);
    assert_eq!(store.children(&["EQ1"]).unwrap(), vec!["S1", "S2", "notes"]);
    assert!(store.children(&["EQ3"]).unwrap().is_empty());
}

#[test]
fn arbitrary_segments_are_escaped() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 16).unwrap();
    let odd = ["../escape", "a/b", "x.json", "σ 1", "%2F"];
    for (i, seg) in odd.iter().enumerate() {
        store.set(&["root", *seg], &i).unwrap();
    }
    for (i, seg) in odd.iter().enumerate() {
        assert_eq!(store.get::<usize>(&["root", *seg]).unwrap(), i);
    }
    let mut expected: Vec<String> = odd.iter().map(|s| s.to_string()).collect();
    expected.sort();
    assert_eq!(store.children(&["root"]).unwrap(), expected);
    // nothing escaped the store directory
    assert!(!dir.path().parent().unwrap().join("escape.json").exists());
}

#[test]
fn values_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let mut map = BTreeMap::new();
    map.insert("fc".to_string(), 10.0);
    {
        let store = CacheStore::open(dir.path(), 16).unwrap();
        store.set(&["EQ1", "meta"], &map).unwrap();
    }
    let store = CacheStore::open(dir.path(), 16).unwrap();
    let got: BTreeMap<String, f64> = store.get(&["EQ1", "meta"]).unwrap();
    assert_eq!(got, map);
}

#[test]
fn second_writer_is_locked_out_until_the_first_is_dropped() {
    let dir = TempDir::new().unwrap();
    let first = CacheStore::open(dir.path(), 16).unwrap();
    assert!(matches!(
        CacheStore::open(dir.path(), 16),
        Err(Error::StoreLocked { .. })
    ));
    drop(first);
    assert!(CacheStore::open(dir.path(), 16).is_ok());
}

#[test]
fn floats_round_trip_exactly() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(dir.path(), 0).unwrap();
    let values = vec![0.1 + 0.2, 1.0 / 3.0, -1e-300, 123456.789012345];
    store.set(&["v"], &values).unwrap();
    let got: Vec<f64> = store.get(&["v"]).unwrap();
    assert_eq!(got, values);
}
