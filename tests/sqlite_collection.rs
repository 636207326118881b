#![cfg(feature = "sqlite")]

use std::collections::HashSet;

use kvlite::{KvError, Result};
use serde_json::json;
use tempfile::TempDir;

#[test]
fn put_get_delete_count_one() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    docs.put("abc", &json!("hello"))?;
    assert_eq!(docs.get("abc")?, Some(json!("hello")));
    assert_eq!(docs.count()?, 1);

    docs.delete("abc")?;
    assert_eq!(docs.count()?, 0);
    assert_eq!(docs.get("abc")?, None);
    assert!(!docs.exists("abc")?);
    docs.close()
}

#[test]
fn put_get_many_generated_keys() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    let mut expected = Vec::new();
    for i in 0..100 {
        let key = docs.get_uuid()?;
        let value = json!({ "n": i });
        docs.put(&key, &value)?;
        expected.push((key, value));
    }
    assert_eq!(docs.count()?, 100);
    for (key, value) in &expected {
        assert_eq!(docs.get(key)?.as_ref(), Some(value));
    }
    docs.close()
}

#[test]
fn put_overwrites_existing_value() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    docs.put("k", &json!(1))?;
    docs.put("k", &json!(2))?;
    assert_eq!(docs.get("k")?, Some(json!(2)));
    assert_eq!(docs.count()?, 1);
    docs.close()
}

#[test]
fn deleting_an_absent_key_is_a_noop() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    docs.put("present", &json!(1))?;
    docs.delete("never-stored")?;
    assert_eq!(docs.count()?, 1);
    docs.close()
}

#[test]
fn keys_iterate_all_rows_in_insert_order_across_pages() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    // more than one page of one thousand rows
    let total = 1100;
    for i in 0..total {
        docs.put(&format!("key{:04}", i), &json!(i))?;
    }

    let keys = docs.keys()?.collect::<Result<Vec<_>>>()?;
    assert_eq!(keys.len(), total);
    for (i, key) in keys.iter().enumerate() {
        assert_eq!(key, &format!("key{:04}", i));
    }
    docs.close()
}

#[test]
fn items_iterate_pairs_in_insert_order_across_pages() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    let total = 1100;
    for i in 0..total {
        docs.put(&format!("key{:04}", i), &json!({ "n": i }))?;
    }

    let mut seen = 0;
    for item in docs.items()? {
        let (key, value) = item?;
        assert_eq!(key, format!("key{:04}", seen));
        assert_eq!(value, json!({ "n": seen }));
        seen += 1;
    }
    assert_eq!(seen, total);
    docs.close()
}

#[test]
fn empty_collection_iterates_nothing() -> Result<()> {
    let docs = kvlite::open("sqlite://memory:empty")?;
    assert_eq!(docs.keys()?.count(), 0);
    assert_eq!(docs.items()?.count(), 0);
    assert_eq!(docs.count()?, 0);
    Ok(())
}

#[test]
fn oversize_keys_are_rejected_before_any_write() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    let long_key = "k".repeat(41);

    let err = docs.put(&long_key, &json!("v")).unwrap_err();
    assert!(matches!(err, KvError::KeyTooLong { len: 41 }));
    assert_eq!(docs.count()?, 0, "no row may be created");

    assert!(matches!(docs.get(&long_key), Err(KvError::KeyTooLong { .. })));
    assert!(matches!(docs.delete(&long_key), Err(KvError::KeyTooLong { .. })));
    assert!(matches!(docs.exists(&long_key), Err(KvError::KeyTooLong { .. })));

    // exactly at the limit is fine
    let max_key = "k".repeat(40);
    docs.put(&max_key, &json!("v"))?;
    assert_eq!(docs.count()?, 1);
    docs.close()
}

#[test]
fn mixing_serializers_fails_to_decode() -> Result<()> {
    let dir = TempDir::new().expect("tempdir");
    let uri = format!("sqlite://{}:docs", dir.path().join("mix.db").display());

    let mut writer = kvlite::open_with_serializer(&uri, Box::new(kvlite::BinarySerializer))?;
    writer.put("shared", &json!({ "n": 1 }))?;
    writer.close()?;

    let reader =
        kvlite::open_with_serializer(&uri, Box::new(kvlite::CompressedJsonSerializer))?;
    match reader.get("shared") {
        Err(KvError::Deserialization { key, .. }) => assert_eq!(key, "shared"),
        other => panic!("expected a deserialization error, got {:?}", other),
    }

    // and the other way round
    let mut writer =
        kvlite::open_with_serializer(&uri, Box::new(kvlite::CompressedJsonSerializer))?;
    writer.put("zipped", &json!({ "n": 2 }))?;
    writer.close()?;

    let reader = kvlite::open_with_serializer(&uri, Box::new(kvlite::BinarySerializer))?;
    match reader.get("zipped") {
        Err(KvError::Deserialization { key, .. }) => assert_eq!(key, "zipped"),
        other => panic!("expected a deserialization error, got {:?}", other),
    }
    Ok(())
}

#[test]
fn each_serializer_round_trips_documents() -> Result<()> {
    let serializers: Vec<(&str, Box<dyn kvlite::Serializer>)> = vec![
        ("binary", Box::new(kvlite::BinarySerializer)),
        ("json", Box::new(kvlite::JsonSerializer)),
        ("compressed-json", Box::new(kvlite::CompressedJsonSerializer)),
    ];
    for (name, serializer) in serializers {
        let mut docs = kvlite::open_with_serializer("sqlite://memory:docs", serializer)?;
        let value = json!({
            "name": name,
            "nested": { "list": [1, 2.5, "three"], "flag": true },
            "unicode": "ключ 日本語",
        });
        docs.put("doc", &value)?;
        assert_eq!(docs.get("doc")?, Some(value), "serializer {}", name);
        assert_eq!(docs.count()?, 1, "serializer {}", name);
        docs.close()?;
    }
    Ok(())
}

#[test]
fn uuids_are_unique_and_forty_chars() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    let mut seen = HashSet::new();
    for _ in 0..250 {
        let id = docs.get_uuid()?;
        assert_eq!(id.len(), 40);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(seen.insert(id), "duplicate identifier handed out");
    }
    Ok(())
}

#[test]
fn operations_after_close_fail_and_close_is_idempotent() -> Result<()> {
    let mut docs = kvlite::open("sqlite://memory:docs")?;
    docs.put("k", &json!(1))?;
    docs.close()?;
    // closing twice is a no-op
    docs.close()?;

    assert!(matches!(docs.get("k"), Err(KvError::ClosedHandle)));
    assert!(matches!(docs.put("k", &json!(2)), Err(KvError::ClosedHandle)));
    assert!(matches!(docs.delete("k"), Err(KvError::ClosedHandle)));
    assert!(matches!(docs.exists("k"), Err(KvError::ClosedHandle)));
    assert!(matches!(docs.count(), Err(KvError::ClosedHandle)));
    assert!(matches!(docs.commit(), Err(KvError::ClosedHandle)));
    assert!(matches!(docs.get_uuid(), Err(KvError::ClosedHandle)));
    assert!(docs.keys().is_err());
    assert!(docs.items().is_err());
    Ok(())
}

#[test]
fn committed_writes_are_visible_to_a_second_connection() -> Result<()> {
    let dir = TempDir::new().expect("tempdir");
    let uri = format!("sqlite://{}:docs", dir.path().join("durable.db").display());

    let mut docs = kvlite::open(&uri)?;
    docs.put("k", &json!("v"))?;
    docs.commit()?;

    let other = kvlite::open(&uri)?;
    assert_eq!(other.get("k")?, Some(json!("v")));

    docs.close()
}

#[test]
fn dropping_an_open_handle_commits_pending_writes() -> Result<()> {
    let dir = TempDir::new().expect("tempdir");
    let uri = format!("sqlite://{}:docs", dir.path().join("scoped.db").display());

    {
        let mut docs = kvlite::open(&uri)?;
        docs.put("k", &json!("v"))?;
        // no explicit close; the drop path must commit
    }

    let docs = kvlite::open(&uri)?;
    assert_eq!(docs.get("k")?, Some(json!("v")));
    Ok(())
}

#[test]
fn collection_reports_its_name() -> Result<()> {
    let docs = kvlite::open("sqlite://memory:docs")?;
    assert_eq!(docs.name(), "docs");
    Ok(())
}
