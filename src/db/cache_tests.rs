use super::*;
use crate::config::StoreConfig;
use crate::db::LiveDB;

fn test_db_with_ceiling(ceiling: usize) -> (tempfile::TempDir, LiveDB) {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        qa_cache_max: ceiling,
        ..StoreConfig::default()
    };
    let db = LiveDB::open_embedded(cfg).expect("embedded store");
    (dir, db)
}

fn test_db() -> (tempfile::TempDir, LiveDB) {
    test_db_with_ceiling(1000)
}

fn sid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn session(db: &LiveDB) -> String {
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));
    id
}

fn cache_count(dir: &tempfile::TempDir) -> i64 {
    let conn = rusqlite::Connection::open(dir.path().join("barker.sqlite3")).unwrap();
    conn.query_row("SELECT COUNT(*) FROM qa_cache", [], |r| r.get(0))
        .unwrap()
}

#[test]
fn roundtrip_with_phrasing_variants() {
    let (_dir, db) = test_db();
    let id = session(&db);

    assert!(db.cache_qa(&id, "多少钱？", "十二块五", None, None));

    // trailing particle / punctuation variants share the canonical form
    let hit = db.get_cached_answer(&id, "多少钱呀", None).expect("hit");
    assert_eq!(hit.answer, "十二块五");
    assert!(hit.audio_url.is_none());

    assert!(db.get_cached_answer(&id, "贵不贵", None).is_none());
}

#[test]
fn context_token_isolates_entries() {
    let (_dir, db) = test_db();
    let id = session(&db);

    assert!(db.cache_qa(&id, "哪里产的", "云南的", None, Some("云南")));

    assert!(db.get_cached_answer(&id, "哪里产的", Some("山东")).is_none());
    assert!(db.get_cached_answer(&id, "哪里产的", None).is_none());
    let hit = db.get_cached_answer(&id, "哪里产的", Some("云南")).expect("hit");
    assert_eq!(hit.answer, "云南的");
}

#[test]
fn sessions_do_not_share_entries() {
    let (_dir, db) = test_db();
    let a = session(&db);
    let b = session(&db);

    assert!(db.cache_qa(&a, "多少钱", "十块", None, None));
    assert!(db.get_cached_answer(&b, "多少钱", None).is_none());
}

#[test]
fn repeated_put_updates_in_place() {
    let (dir, db) = test_db();
    let id = session(&db);

    assert!(db.cache_qa(&id, "多少钱", "十块", None, None));
    assert!(db.cache_qa(&id, "多少钱！", "特价八块", None, None));

    assert_eq!(cache_count(&dir), 1);
    let hit = db.get_cached_answer(&id, "多少钱", None).expect("hit");
    assert_eq!(hit.answer, "特价八块");

    // insert counts 1, second put bumps it, the get above bumps again
    let conn = rusqlite::Connection::open(dir.path().join("barker.sqlite3")).unwrap();
    let hits: i64 = conn
        .query_row("SELECT hit_count FROM qa_cache", [], |r| r.get(0))
        .unwrap();
    assert_eq!(hits, 3);
}

#[test]
fn update_without_audio_keeps_existing_audio() {
    let (_dir, db) = test_db();
    let id = session(&db);

    assert!(db.cache_qa(&id, "多少钱", "十块", Some("/static/audio/a.wav"), None));
    assert!(db.cache_qa(&id, "多少钱", "八块", None, None));

    let hit = db.get_cached_answer(&id, "多少钱", None).expect("hit");
    assert_eq!(hit.answer, "八块");
    assert_eq!(hit.audio_url.as_deref(), Some("/static/audio/a.wav"));
}

#[test]
fn eviction_keeps_most_recent_within_ceiling() {
    let (dir, db) = test_db_with_ceiling(10);
    let id = session(&db);

    for i in 0..60 {
        assert!(db.cache_qa(&id, &format!("问题{i}"), &format!("答案{i}"), None, None));
    }

    assert_eq!(cache_count(&dir), 10);

    // the ten most recently written survive, the older fifty are gone
    for i in 50..60 {
        assert!(
            db.get_cached_answer(&id, &format!("问题{i}"), None).is_some(),
            "entry {i} should have survived"
        );
    }
    for i in 0..50 {
        assert!(
            db.get_cached_answer(&id, &format!("问题{i}"), None).is_none(),
            "entry {i} should have been evicted"
        );
    }
}

#[test]
fn eviction_is_global_across_sessions() {
    let (dir, db) = test_db_with_ceiling(5);
    let a = session(&db);
    let b = session(&db);

    for i in 0..4 {
        assert!(db.cache_qa(&a, &format!("a问题{i}"), "答", None, None));
    }
    for i in 0..4 {
        assert!(db.cache_qa(&b, &format!("b问题{i}"), "答", None, None));
    }

    assert_eq!(cache_count(&dir), 5);
}
