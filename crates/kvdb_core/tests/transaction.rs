//! Transaction lifecycle and isolation.

use kvdb_core::{
    runtime, CursorBinding, CursorFlags, Database, ErrorKind, Keyspace, PutFlags,
    TransactionState,
};
use std::sync::Arc;
use std::thread;

fn setup() -> (Database, Keyspace) {
    runtime::init(None, &[]).unwrap();
    let db = Database::open_in_memory(&[]).unwrap();
    db.create_keyspace("txn-test", &[]).unwrap();
    let kvs = db.open_keyspace("txn-test", &[]).unwrap();
    (db, kvs)
}

#[test]
fn state_transitions() {
    let (db, _kvs) = setup();
    let mut txn = db.txn_alloc().unwrap();
    assert_eq!(txn.state(), TransactionState::Invalid);

    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(txn.abort().unwrap_err().kind(), ErrorKind::InvalidState);

    txn.begin().unwrap();
    assert_eq!(txn.state(), TransactionState::Active);
    assert_eq!(txn.begin().unwrap_err().kind(), ErrorKind::InvalidState);

    txn.commit().unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(txn.commit().unwrap_err().kind(), ErrorKind::InvalidState);

    txn.begin().unwrap();
    txn.abort().unwrap();
    assert_eq!(txn.state(), TransactionState::Aborted);

    // reusable after abort too
    txn.begin().unwrap();
    assert_eq!(txn.state(), TransactionState::Active);
}

#[test]
fn free_aborts_and_is_idempotent() {
    let (db, kvs) = setup();
    let mut txn = db.txn_alloc().unwrap();
    txn.begin().unwrap();
    kvs.put(Some(&txn), b"k", b"v", PutFlags::NONE).unwrap();

    txn.free();
    assert_eq!(txn.state(), TransactionState::Aborted);
    txn.free();
    assert_eq!(txn.begin().unwrap_err().kind(), ErrorKind::InvalidState);
    assert_eq!(kvs.get(None, b"k").unwrap(), None);
}

#[test]
fn abort_discards_writes() {
    let (db, kvs) = setup();
    let mut txn = db.txn_alloc().unwrap();
    txn.begin().unwrap();
    kvs.put(Some(&txn), b"a", b"1", PutFlags::NONE).unwrap();
    kvs.prefix_delete(Some(&txn), b"a").unwrap();
    txn.abort().unwrap();

    assert_eq!(kvs.get(None, b"a").unwrap(), None);

    // the next cycle starts empty
    txn.begin().unwrap();
    assert_eq!(kvs.get(Some(&txn), b"a").unwrap(), None);
    txn.commit().unwrap();
    assert_eq!(kvs.get(None, b"a").unwrap(), None);
}

#[test]
fn transaction_does_not_see_later_commits() {
    let (db, kvs) = setup();
    let mut txn = db.txn_alloc().unwrap();
    txn.begin().unwrap();

    kvs.put(None, b"external", b"v", PutFlags::NONE).unwrap();

    assert_eq!(kvs.get(Some(&txn), b"external").unwrap(), None);
    let mut inside = kvs
        .cursor(None, CursorFlags::NONE, CursorBinding::Bound(&txn))
        .unwrap();
    assert_eq!(inside.read().unwrap(), None);

    let mut fresh = kvs.cursor(None, CursorFlags::NONE, CursorBinding::Free).unwrap();
    assert_eq!(
        fresh.read().unwrap(),
        Some((b"external".to_vec(), b"v".to_vec()))
    );
}

#[test]
fn prefix_delete_applies_before_puts() {
    let (db, kvs) = setup();
    kvs.put(None, b"key0", b"old", PutFlags::NONE).unwrap();

    let mut txn = db.txn_alloc().unwrap();
    txn.begin().unwrap();
    kvs.put(Some(&txn), b"key1", b"v", PutFlags::NONE).unwrap();
    kvs.prefix_delete(Some(&txn), b"key").unwrap();
    assert_eq!(kvs.get(Some(&txn), b"key1").unwrap(), None);
    assert_eq!(kvs.get(Some(&txn), b"key0").unwrap(), None);

    kvs.put(Some(&txn), b"key2", b"after", PutFlags::NONE).unwrap();
    txn.commit().unwrap();

    assert_eq!(kvs.get(None, b"key0").unwrap(), None);
    assert_eq!(kvs.get(None, b"key1").unwrap(), None);
    assert_eq!(kvs.get(None, b"key2").unwrap(), Some(b"after".to_vec()));
}

#[test]
fn commit_spans_keyspaces_atomically() {
    let (db, first) = setup();
    db.create_keyspace("second", &[]).unwrap();
    let second = db.open_keyspace("second", &[]).unwrap();

    let mut txn = db.txn_alloc().unwrap();
    txn.begin().unwrap();
    first.put(Some(&txn), b"k", b"1", PutFlags::NONE).unwrap();
    second.put(Some(&txn), b"k", b"2", PutFlags::NONE).unwrap();

    let mut reader = db.txn_alloc().unwrap();
    reader.begin().unwrap();
    txn.commit().unwrap();

    assert_eq!(first.get(Some(&reader), b"k").unwrap(), None);
    assert_eq!(second.get(Some(&reader), b"k").unwrap(), None);
    reader.commit().unwrap();

    reader.begin().unwrap();
    assert_eq!(first.get(Some(&reader), b"k").unwrap(), Some(b"1".to_vec()));
    assert_eq!(second.get(Some(&reader), b"k").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn later_commit_wins() {
    let (db, kvs) = setup();
    let mut a = db.txn_alloc().unwrap();
    let mut b = db.txn_alloc().unwrap();
    a.begin().unwrap();
    b.begin().unwrap();
    kvs.put(Some(&a), b"k", b"a", PutFlags::NONE).unwrap();
    kvs.put(Some(&b), b"k", b"b", PutFlags::NONE).unwrap();

    b.commit().unwrap();
    a.commit().unwrap();
    assert_eq!(kvs.get(None, b"k").unwrap(), Some(b"a".to_vec()));
}

#[test]
fn transactions_run_on_separate_threads() {
    let (db, kvs) = setup();
    let db = Arc::new(db);
    let kvs = Arc::new(kvs);

    let workers: Vec<_> = (0..4u8)
        .map(|t| {
            let db = Arc::clone(&db);
            let kvs = Arc::clone(&kvs);
            thread::spawn(move || {
                let mut txn = db.txn_alloc().unwrap();
                for i in 0..25u8 {
                    txn.begin().unwrap();
                    kvs.put(Some(&txn), &[t, i], &[i], PutFlags::NONE).unwrap();
                    txn.commit().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut cursor = kvs.cursor(None, CursorFlags::NONE, CursorBinding::Free).unwrap();
    let mut count = 0;
    while cursor.read().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 100);
}

#[test]
fn transaction_ids_are_distinct() {
    let (db, _kvs) = setup();
    let a = db.txn_alloc().unwrap();
    let b = db.txn_alloc().unwrap();
    assert_ne!(a.id(), b.id());
}
