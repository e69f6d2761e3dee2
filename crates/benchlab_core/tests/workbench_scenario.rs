use benchlab_core::{
    builtin_stores, log_activity, ActivityLogEntry, DbError, InstrumentRecord, Rect, RowFilter,
    StoreHost, WorkbenchItem, INSTRUMENT_RECORDS_STORE, WORKBENCH_ITEMS_STORE,
};
use serde_json::json;

const HOME: Rect = Rect {
    x: 0.0,
    y: 0.0,
    w: 120.0,
    h: 80.0,
};
const MOVED: Rect = Rect {
    x: 300.0,
    y: 40.0,
    w: 120.0,
    h: 80.0,
};

#[test]
fn a_bench_session_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.db");

    let mut host = StoreHost::open(&path).unwrap();
    for definition in builtin_stores() {
        host.register_store(definition).unwrap();
    }
    let items = host.watch::<WorkbenchItem>(RowFilter::Active).unwrap();

    // Place a fresh instrument on the bench.
    host.begin("Add instrument").unwrap();
    let oid = host
        .create(
            INSTRUMENT_RECORDS_STORE,
            &InstrumentRecord::props("dmm", json!({"vendor": "Keysight"})),
        )
        .unwrap();
    let item = host
        .create(
            WORKBENCH_ITEMS_STORE,
            &WorkbenchItem::props("instrument", oid, HOME).unwrap(),
        )
        .unwrap();
    host.commit().unwrap();
    assert_eq!(items.ids(), vec![item]);

    // Journal entries never join the undo history.
    log_activity(&mut host, Some(oid), "instrument/added", "dmm added", json!(null)).unwrap();
    assert_eq!(host.undo_label(), Some("Add instrument"));

    host.begin("Move item").unwrap();
    host.update(
        WORKBENCH_ITEMS_STORE,
        item,
        &WorkbenchItem::rect_patch(MOVED).unwrap(),
    )
    .unwrap();
    host.commit().unwrap();
    assert_eq!(items.get(item).unwrap().rect, MOVED);

    host.begin("Remove item").unwrap();
    host.delete(WORKBENCH_ITEMS_STORE, item).unwrap();
    host.commit().unwrap();
    assert!(items.is_empty());

    // Walk the history backwards, then forwards again.
    assert_eq!(host.undo_label(), Some("Remove item"));
    assert!(host.undo().unwrap());
    assert_eq!(items.get(item).unwrap().rect, MOVED);
    assert!(host.undo().unwrap());
    assert_eq!(items.get(item).unwrap().rect, HOME);
    assert_eq!(host.redo_label(), Some("Move item"));
    assert!(host.redo().unwrap());
    assert_eq!(items.get(item).unwrap().rect, MOVED);
    host.assert_no_open_transaction().unwrap();

    drop(items);
    drop(host);

    // Committed state survives a restart; the undo history does not.
    let mut host = StoreHost::open(&path).unwrap();
    for definition in builtin_stores() {
        host.register_store(definition).unwrap();
    }
    let record: InstrumentRecord = host.get(oid, false).unwrap();
    assert_eq!(record.label, "dmm");
    let restored: WorkbenchItem = host.get(item, false).unwrap();
    assert_eq!(restored.rect, MOVED);
    assert!(!restored.selected);
    let journal: Vec<ActivityLogEntry> = host.list(RowFilter::Active).unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].oid, Some(oid));
    assert_eq!(journal[0].kind, "instrument/added");
    assert!(!host.can_undo(), "history is process-local");
    assert!(!host.can_redo());
}

#[test]
fn the_store_file_has_exactly_one_owner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bench.db");

    let owner = StoreHost::open(&path).unwrap();
    let err = StoreHost::open(&path).unwrap_err();
    assert!(matches!(err, DbError::StoreLocked));

    drop(owner);
    StoreHost::open(&path).expect("the lock dies with its owner");
}
