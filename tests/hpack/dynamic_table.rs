//! Tests for dynamic table eviction

use bytes::Bytes;
use h2_engine::hpack::table::{static_entry, DynamicTable};

fn insert(table: &mut DynamicTable, name: &'static str, value: &'static str) -> usize {
    table.insert(Bytes::from_static(name.as_bytes()), Bytes::from_static(value.as_bytes()))
}

#[test]
fn test_static_table_bounds() {
    assert_eq!(static_entry(1), Some((":authority", "")));
    assert_eq!(static_entry(61), Some(("www-authenticate", "")));
    assert_eq!(static_entry(0), None);
    assert_eq!(static_entry(62), None);
}

#[test]
fn test_oldest_entry_evicted_first() {
    // Room for exactly two 40-byte entries.
    let mut table = DynamicTable::new(80);
    assert_eq!(insert(&mut table, "aaaa", "1111"), 0);
    assert_eq!(insert(&mut table, "bbbb", "2222"), 0);
    assert_eq!(table.size(), 80);

    assert_eq!(insert(&mut table, "cccc", "3333"), 1);
    assert_eq!(table.len(), 2);
    assert_eq!(&table.get(0).unwrap().name[..], b"cccc");
    assert_eq!(&table.get(1).unwrap().name[..], b"bbbb");
    assert!(table.find(b"aaaa", b"1111").is_none());
}

#[test]
fn test_size_never_exceeds_bound() {
    let mut table = DynamicTable::new(200);
    let names = ["a", "bb", "ccc", "dddd", "eeeee", "ffffff", "ggggggg"];
    for name in names.iter().cycle().take(40) {
        insert(&mut table, name, "value");
        assert!(table.size() <= table.max_size());
        let total: usize = table.iter().map(|e| e.size()).sum();
        assert_eq!(total, table.size());
    }
}

#[test]
fn test_oversized_entry_empties_table() {
    let mut table = DynamicTable::new(64);
    insert(&mut table, "a", "b");
    assert_eq!(table.len(), 1);

    let big = "x".repeat(64);
    let evicted = table.insert(Bytes::from_static(b"name"), Bytes::from(big));
    assert_eq!(evicted, 1);
    assert!(table.is_empty());
    assert_eq!(table.size(), 0);
}

#[test]
fn test_shrinking_bound_evicts() {
    let mut table = DynamicTable::new(4096);
    insert(&mut table, "first", "1");
    insert(&mut table, "second", "2");
    insert(&mut table, "third", "3");

    table.set_max_size(40);
    assert_eq!(table.len(), 1);
    assert_eq!(&table.get(0).unwrap().name[..], b"third");
}
