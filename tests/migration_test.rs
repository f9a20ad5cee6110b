mod helpers;

use tome::db;
use tome::db::migrations::{
    get_embedding_dimension, get_embedding_model, get_schema_version, run_migrations,
    CURRENT_SCHEMA_VERSION,
};
use tome::records::sync;
use tome::search::index::IndexBackend;

#[test]
fn manual_v1_db_upgrades_correctly() {
    db::load_sqlite_vec();
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(get_embedding_model(&conn).unwrap().is_none());

    run_migrations(&conn).unwrap();

    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert_eq!(get_embedding_dimension(&conn).unwrap(), Some(384));
}

#[test]
fn re_embedding_records_the_new_model() {
    let db = helpers::test_db();
    let config = helpers::test_config(IndexBackend::Native);
    let engine = helpers::open_engine(&db, &config);
    for i in 0..5 {
        sync::add_record(&db, &engine, &format!("note {i}"), "body", None).unwrap();
    }

    let n = sync::reembed_all(&db, &engine, "hash-fnv1a", |_| {}).unwrap();
    assert_eq!(n, 5);

    let conn = db.lock().unwrap();
    assert_eq!(get_embedding_model(&conn).unwrap().as_deref(), Some("hash-fnv1a"));
    drop(conn);
    assert_eq!(engine.stats().unwrap().indexed_vectors, 5);
}
