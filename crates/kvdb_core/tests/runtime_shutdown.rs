//! Runtime lifecycle. Shutdown is process-wide and final, so this binary
//! holds a single test.

use kvdb_core::{runtime, Database, ErrorKind, Runtime};

#[test]
fn runtime_gates_databases() {
    // nothing works before init
    let err = Database::open_in_memory(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(!runtime::is_active());

    // runtime params become database defaults
    let err = Runtime::init(None, &["kvdb.no_such_param=1"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(!runtime::is_active());

    {
        let _runtime = Runtime::init(None, &["kvdb.compaction.lwm_pct=125"]).unwrap();
        assert!(runtime::is_active());

        let db = Database::open_in_memory(&[]).unwrap();
        assert_eq!(db.config().lwm_pct, 125);
        let db2 = Database::open_in_memory(&["kvdb.compaction.lwm_pct=130"]).unwrap();
        assert_eq!(db2.config().lwm_pct, 130);

        // repeated init keeps the first defaults
        runtime::init(None, &["kvdb.compaction.lwm_pct=101"]).unwrap();
        let db3 = Database::open_in_memory(&[]).unwrap();
        assert_eq!(db3.config().lwm_pct, 125);
    }

    assert!(!runtime::is_active());
    let err = Database::open_in_memory(&[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let err = runtime::init(None, &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    // shutting down twice is harmless
    runtime::shutdown();
}
