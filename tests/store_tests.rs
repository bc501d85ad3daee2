use barker::config::StoreConfig;
use barker::db::{Dialect, LiveDB, ProductInput, ProductType};
use barker::SharedDB;

fn embedded_cfg(dir: &tempfile::TempDir) -> StoreConfig {
    StoreConfig {
        data_dir: dir.path().to_path_buf(),
        ..StoreConfig::default()
    }
}

fn sid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn template_count(dir: &tempfile::TempDir) -> i64 {
    let conn = rusqlite::Connection::open(dir.path().join("barker.sqlite3")).unwrap();
    conn.query_row("SELECT COUNT(*) FROM faq_templates", [], |r| r.get(0))
        .unwrap()
}

#[test]
fn unreachable_primary_falls_back_to_embedded() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = StoreConfig {
        host: "127.0.0.1".into(),
        // nothing listens here, so the primary probe fails immediately
        port: 1,
        data_dir: dir.path().to_path_buf(),
        ..StoreConfig::default()
    };

    let db = LiveDB::open(cfg).expect("fallback open");
    assert_eq!(db.active_dialect(), Dialect::Sqlite);

    // exactly one provisioning pass ran against the fallback
    assert!(db.get_meta("schema_version").is_some());
    assert_eq!(template_count(&dir), 27);

    // subsequent calls are served by the fallback without re-attempting
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[ProductInput::new("苹果", 10.0)]));
    assert!(db.get_session(&id).is_some());
    assert_eq!(db.active_dialect(), Dialect::Sqlite);
}

#[test]
fn reprovisioning_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();

    let first = LiveDB::open_embedded(embedded_cfg(&dir)).unwrap();
    let version = first.get_meta("schema_version").expect("version recorded");
    assert_eq!(template_count(&dir), 27);
    drop(first);

    let second = LiveDB::open_embedded(embedded_cfg(&dir)).unwrap();
    assert_eq!(second.get_meta("schema_version"), Some(version));
    // seed templates are not duplicated on re-open
    assert_eq!(template_count(&dir), 27);
}

#[test]
fn downgrade_on_embedded_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let db = LiveDB::open_embedded(embedded_cfg(&dir)).unwrap();

    db.downgrade("simulated primary failure");
    db.downgrade("second call");

    assert_eq!(db.active_dialect(), Dialect::Sqlite);
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));
}

#[test]
fn session_creation_is_atomic_mid_product() {
    let dir = tempfile::tempdir().unwrap();
    let db = LiveDB::open_embedded(embedded_cfg(&dir)).unwrap();

    // force a failure on the third product insert
    let conn = rusqlite::Connection::open(dir.path().join("barker.sqlite3")).unwrap();
    conn.execute(
        "CREATE UNIQUE INDEX ux_products_name ON products (session_id, product_name)",
        [],
    )
    .unwrap();
    drop(conn);

    let id = sid();
    let products = vec![
        ProductInput::new("苹果", 10.0),
        ProductInput::new("梨", 8.0),
        ProductInput::new("苹果", 11.0),
        ProductInput::new("桃", 9.0),
    ];
    assert!(!db.create_session(&id, "host", "theme", &products));

    // neither the session row nor the first two products survived
    assert!(db.get_session(&id).is_none());
    let conn = rusqlite::Connection::open(dir.path().join("barker.sqlite3")).unwrap();
    let orphans: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM products WHERE session_id = ?1",
            [&id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn message_pipeline_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let db = LiveDB::open_embedded(embedded_cfg(&dir)).unwrap();
    let id = sid();

    let products =
        vec![ProductInput::new("烟台苹果", 12.5).product_type(ProductType::Fruit)];
    assert!(db.create_session(&id, "小李", "水果专场", &products));

    let values: std::collections::HashMap<String, String> =
        [("name", "烟台苹果"), ("sweetness", "9分甜")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
    assert_eq!(db.apply_faq_templates(&id, ProductType::Fruit, &values), 2);

    let message = "这个苹果甜不甜呀";

    // moderation: clean message from an unbanned user
    assert!(db.check_sensitive_words(message).is_empty());
    assert!(!db.is_blacklisted(&id, "路人", message));

    // curated answer wins before any generative call
    let curated = db.get_whitelist_answer(&id, message).expect("faq answer");
    assert_eq!(curated, "我们的烟台苹果甜度是9分甜，口感很好哦~");

    // an uncurated question misses, gets answered once, then caches
    let question = "能便宜点吗？";
    assert!(db.get_whitelist_answer(&id, question).is_none());
    assert!(db.get_cached_answer(&id, question, None).is_none());

    assert!(db.cache_qa(&id, question, "直播间已是最低价啦", None, None));
    assert!(db.save_conversation(&id, question, "直播间已是最低价啦", None));

    let hit = db
        .get_cached_answer(&id, "能便宜点", None)
        .expect("cache hit");
    assert_eq!(hit.answer, "直播间已是最低价啦");

    let session = db.get_session(&id).unwrap();
    assert_eq!(session.conversations.len(), 1);
}

#[tokio::test]
async fn db_call_bridges_async_hosts() {
    let dir = tempfile::tempdir().unwrap();
    let db: SharedDB = std::sync::Arc::new(LiveDB::open_embedded(embedded_cfg(&dir)).unwrap());

    let id = sid();
    let created = {
        let id = id.clone();
        barker::db_call(&db, move |db| db.create_session(&id, "host", "theme", &[]))
            .await
            .unwrap()
    };
    assert!(created);

    let loaded = {
        let id = id.clone();
        barker::db_call(&db, move |db| db.get_session(&id)).await.unwrap()
    };
    assert_eq!(loaded.unwrap().id, id);
}
