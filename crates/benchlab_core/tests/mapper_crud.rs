use benchlab_core::{
    builtin_stores, prop_map, InstrumentRecord, PropertyValue, Rect, RowFilter, StoreError,
    StoreHost, WorkbenchItem, INSTRUMENT_RECORDS_STORE, WORKBENCH_ITEMS_STORE,
};
use serde_json::json;

#[test]
fn create_and_get_roundtrip() {
    let mut host = bench_host();

    let idn = json!({"vendor": "Keysight", "model": "34465A", "channels": [1, 2]});
    let id = host
        .transact("Add instrument", |h| {
            h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("dmm", idn.clone()))
        })
        .unwrap();

    let record: InstrumentRecord = host.get(id, false).unwrap();
    assert_eq!(record.id, id);
    assert_eq!(record.label, "dmm");
    assert_eq!(record.idn, idn, "serialized payloads round-trip untouched");
    assert!(!record.deleted);
}

#[test]
fn identifiers_are_assigned_in_creation_order() {
    let mut host = bench_host();

    let ids = host
        .transact("Add instruments", |h| {
            let first = h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("a", json!(null)))?;
            let second = h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("b", json!(null)))?;
            let third = h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("c", json!(null)))?;
            Ok((first, second, third))
        })
        .unwrap();

    assert_eq!(ids, (1, 2, 3));
}

#[test]
fn create_validates_before_anything_is_buffered() {
    let mut host = bench_host();
    host.begin("Validation probes").unwrap();

    // Unknown property.
    let err = host
        .create(INSTRUMENT_RECORDS_STORE, &prop_map([("nonsense", PropertyValue::from(1i64))]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // Reserved columns: the id is store-assigned, deleted is managed.
    for reserved in [
        prop_map([("id", PropertyValue::from(7i64))]),
        prop_map([("deleted", PropertyValue::from(true))]),
    ] {
        let err = host.create(INSTRUMENT_RECORDS_STORE, &reserved).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)), "got {err:?}");
    }

    // Transient properties are never writable.
    let mut with_transient = WorkbenchItem::props("instrument", 1, unit_rect()).unwrap();
    with_transient.insert("selected".to_string(), PropertyValue::from(true));
    let err = host.create(WORKBENCH_ITEMS_STORE, &with_transient).unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // Missing required property.
    let err = host
        .create(INSTRUMENT_RECORDS_STORE, &prop_map([("label", PropertyValue::from("dmm"))]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(message) if message.contains("required")));

    // Value form must match the declared kind.
    let err = host
        .create(
            INSTRUMENT_RECORDS_STORE,
            &prop_map([
                ("label", PropertyValue::from(3i64)),
                ("idn", PropertyValue::Json(json!(null))),
            ]),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(message) if message.contains("expects text")));

    // Nothing was buffered; the commit is empty and writes nothing.
    assert!(host.commit().unwrap().is_empty());
    assert!(host
        .list_props(INSTRUMENT_RECORDS_STORE, RowFilter::All)
        .unwrap()
        .is_empty());
}

#[test]
fn update_patches_only_the_listed_columns() {
    let mut host = bench_host();
    let id = host
        .transact("Add instrument", |h| {
            h.create(
                INSTRUMENT_RECORDS_STORE,
                &InstrumentRecord::props("dmm", json!({"serial": "X1"})),
            )
        })
        .unwrap();

    host.transact("Rename instrument", |h| {
        h.update(
            INSTRUMENT_RECORDS_STORE,
            id,
            &prop_map([("label", PropertyValue::from("bench dmm"))]),
        )
    })
    .unwrap();

    let record: InstrumentRecord = host.get(id, false).unwrap();
    assert_eq!(record.label, "bench dmm");
    assert_eq!(record.idn, json!({"serial": "X1"}), "unlisted columns stay untouched");
}

#[test]
fn update_rejects_empty_and_unknown_patches() {
    let mut host = bench_host();
    host.begin("Bad patches").unwrap();

    let err = host
        .update(INSTRUMENT_RECORDS_STORE, 1, &prop_map([]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    let err = host
        .update(INSTRUMENT_RECORDS_STORE, 1, &prop_map([("nonsense", PropertyValue::Null)]))
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    host.rollback().unwrap();
}

#[test]
fn unknown_stores_are_rejected_up_front() {
    let mut host = bench_host();
    host.begin("Ghost store").unwrap();
    let err = host
        .create("bench/ghosts", &prop_map([("label", PropertyValue::from("boo"))]))
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownStore(store) if store == "bench/ghosts"));
    host.rollback().unwrap();

    let err = host.get_props("bench/ghosts", 1, false).unwrap_err();
    assert!(matches!(err, StoreError::UnknownStore(_)));
}

#[test]
fn get_of_a_missing_id_is_not_found() {
    let host = bench_host();
    let err = host.get::<InstrumentRecord>(42, false).unwrap_err();
    assert!(
        matches!(err, StoreError::NotFound { store, id: 42 } if store == INSTRUMENT_RECORDS_STORE)
    );
}

#[test]
fn soft_delete_hides_undelete_recovers() {
    let mut host = bench_host();
    let id = host
        .transact("Add instrument", |h| {
            h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("dmm", json!(null)))
        })
        .unwrap();

    host.transact("Retire instrument", |h| h.delete(INSTRUMENT_RECORDS_STORE, id))
        .unwrap();

    // Hidden from default reads, visible to the recovery view.
    let err = host.get::<InstrumentRecord>(id, false).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
    let tombstone: InstrumentRecord = host.get(id, true).unwrap();
    assert!(tombstone.deleted);

    let active = host.list::<InstrumentRecord>(RowFilter::Active).unwrap();
    let recoverable = host.list::<InstrumentRecord>(RowFilter::Deleted).unwrap();
    assert!(active.is_empty());
    assert_eq!(recoverable.len(), 1);
    assert_eq!(recoverable[0].id, id);

    host.transact("Recover instrument", |h| h.undelete(INSTRUMENT_RECORDS_STORE, id))
        .unwrap();
    let recovered: InstrumentRecord = host.get(id, false).unwrap();
    assert!(!recovered.deleted);
    assert!(host.list::<InstrumentRecord>(RowFilter::Deleted).unwrap().is_empty());
}

#[test]
fn integer_and_serialized_columns_round_trip_exactly() {
    let mut host = bench_host();

    let rect = Rect {
        x: -12.5,
        y: 0.25,
        w: 310.0,
        h: 48.75,
    };
    let oid = host
        .transact("Add instrument", |h| {
            h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("psu", json!(null)))
        })
        .unwrap();
    let item_id = host
        .transact("Place item", |h| {
            h.create(WORKBENCH_ITEMS_STORE, &WorkbenchItem::props("instrument", oid, rect)?)
        })
        .unwrap();

    let item: WorkbenchItem = host.get(item_id, false).unwrap();
    assert_eq!(item.rect, rect);
    assert_eq!(item.oid, oid);
    assert_eq!(item.kind, "instrument");
    assert!(!item.selected, "transient fields materialize with their defaults");

    // i64 extremes survive the integer column unchanged.
    let extreme = host
        .transact("Extreme date", |h| {
            h.create(
                "activity/log",
                &prop_map([
                    ("date", PropertyValue::Integer(i64::MAX)),
                    ("oid", PropertyValue::Null),
                    ("type", PropertyValue::from("probe")),
                    ("message", PropertyValue::from("extremes")),
                    ("data", PropertyValue::Json(json!({"min": i64::MIN}))),
                ]),
            )
        })
        .unwrap();
    let row = host.get_props("activity/log", extreme, false).unwrap();
    assert_eq!(row.get("date"), Some(&PropertyValue::Integer(i64::MAX)));
    assert_eq!(
        row.get("data"),
        Some(&PropertyValue::Json(json!({"min": i64::MIN})))
    );
}

#[test]
fn foreign_keys_resolve_through_an_explicit_second_lookup() {
    let mut host = bench_host();

    let oid = host
        .transact("Add instrument", |h| {
            h.create(
                INSTRUMENT_RECORDS_STORE,
                &InstrumentRecord::props("scope", json!({"vendor": "Rigol"})),
            )
        })
        .unwrap();
    let item_id = host
        .transact("Place item", |h| {
            h.create(WORKBENCH_ITEMS_STORE, &WorkbenchItem::props("instrument", oid, unit_rect())?)
        })
        .unwrap();

    // The item carries a plain identifier, not the record itself.
    let item: WorkbenchItem = host.get(item_id, false).unwrap();
    let related: InstrumentRecord = host.get(item.oid, false).unwrap();
    assert_eq!(related.label, "scope");

    // Deleting the target leaves the item intact; resolution simply fails.
    host.transact("Retire instrument", |h| h.delete(INSTRUMENT_RECORDS_STORE, oid))
        .unwrap();
    let item: WorkbenchItem = host.get(item_id, false).unwrap();
    let err = host.get::<InstrumentRecord>(item.oid, false).unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));
}

#[test]
fn identifiers_survive_reopen_and_are_never_reused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.db");

    let mut host = StoreHost::open(&path).unwrap();
    host.register_store(benchlab_core::instrument_records_store()).unwrap();
    let first = host
        .transact("Add a", |h| {
            h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("a", json!(null)))
        })
        .unwrap();
    assert_eq!(first, 1);

    // Undo physically removes row 1; its identifier must stay burned
    // even for a fresh process.
    assert!(host.undo().unwrap());
    drop(host);

    let mut host = StoreHost::open(&path).unwrap();
    host.register_store(benchlab_core::instrument_records_store()).unwrap();
    let second = host
        .transact("Add b", |h| {
            h.create(INSTRUMENT_RECORDS_STORE, &InstrumentRecord::props("b", json!(null)))
        })
        .unwrap();
    assert_eq!(second, 2);
}

fn bench_host() -> StoreHost {
    let mut host = StoreHost::open_in_memory().unwrap();
    for definition in builtin_stores() {
        host.register_store(definition).unwrap();
    }
    host
}

fn unit_rect() -> Rect {
    Rect {
        x: 0.0,
        y: 0.0,
        w: 10.0,
        h: 10.0,
    }
}
