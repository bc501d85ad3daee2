use std::collections::HashMap;

use super::*;
use crate::config::StoreConfig;
use crate::db::{LiveDB, ProductInput};

fn test_db() -> (tempfile::TempDir, LiveDB) {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = StoreConfig {
        data_dir: dir.path().to_path_buf(),
        ..StoreConfig::default()
    };
    let db = LiveDB::open_embedded(cfg).expect("embedded store");
    (dir, db)
}

fn sid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn raw(dir: &tempfile::TempDir) -> rusqlite::Connection {
    rusqlite::Connection::open(dir.path().join("barker.sqlite3")).unwrap()
}

fn insert_entry(
    conn: &rusqlite::Connection,
    session_id: &str,
    pattern: &str,
    answer: &str,
    priority: i64,
    product_types: Option<&str>,
) {
    conn.execute(
        "INSERT INTO whitelist (session_id, pattern, answer, priority, product_types, hit_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        rusqlite::params![session_id, pattern, answer, priority, product_types],
    )
    .unwrap();
}

fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn render_substitutes_and_rejects_missing() {
    let vals = values(&[("name", "苹果"), ("sweetness", "9分甜")]);
    assert_eq!(
        render_template("{name}的甜度是{sweetness}！", &vals),
        Some("苹果的甜度是9分甜！".to_string())
    );
    assert_eq!(render_template("产自{origin}", &vals), None);
    assert_eq!(render_template("没有占位符", &vals), Some("没有占位符".to_string()));
}

#[test]
fn seeded_templates_listed_by_priority() {
    let (_dir, db) = test_db();
    let templates = db.get_faq_templates(ProductType::Fruit);
    assert_eq!(templates.len(), 6);
    assert!(templates.windows(2).all(|w| w[0].priority >= w[1].priority));
    assert!(templates.iter().all(|t| t.product_type == ProductType::Fruit));
}

#[test]
fn longer_pattern_wins_priority_tie() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "甜", "甜的答案", 5, None);
    insert_entry(&conn, &id, "甜度", "甜度的答案", 5, None);
    drop(conn);

    assert_eq!(
        db.get_whitelist_answer(&id, "这个甜度怎么样"),
        Some("甜度的答案".to_string())
    );
}

#[test]
fn higher_priority_beats_longer_pattern() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "发货时间", "明天发货", 1, None);
    insert_entry(&conn, &id, "发货", "今天发货", 9, None);
    drop(conn);

    assert_eq!(
        db.get_whitelist_answer(&id, "发货时间是什么时候"),
        Some("今天发货".to_string())
    );
}

#[test]
fn match_is_case_insensitive() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "VIP", "会员价9折", 0, None);
    drop(conn);

    assert_eq!(
        db.get_whitelist_answer(&id, "有没有vip优惠"),
        Some("会员价9折".to_string())
    );
}

#[test]
fn category_gate_blocks_foreign_entries() {
    let (dir, db) = test_db();
    let id = sid();
    let products = vec![ProductInput::new("土鸡", 88.0).product_type(ProductType::Meat)];
    assert!(db.create_session(&id, "host", "theme", &products));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "甜", "水果答案", 5, Some("fruit"));
    insert_entry(&conn, &id, "甜", "通用答案", 1, None);
    drop(conn);

    // fruit-only entry must not match a meat session even though the
    // substring matches; the untagged entry still applies
    assert_eq!(
        db.get_whitelist_answer(&id, "甜不甜"),
        Some("通用答案".to_string())
    );
}

#[test]
fn untyped_session_accepts_tagged_entries() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[ProductInput::new("神秘商品", 1.0)]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "甜", "水果答案", 5, Some("fruit"));
    drop(conn);

    assert_eq!(
        db.get_whitelist_answer(&id, "甜不甜"),
        Some("水果答案".to_string())
    );
}

#[test]
fn miss_is_none() {
    let (_dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));
    assert_eq!(db.get_whitelist_answer(&id, "完全无关的话"), None);
}

#[test]
fn table_hit_updates_statistics() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "价格", "十块", 0, None);
    drop(conn);

    assert!(db.get_whitelist_answer(&id, "价格多少").is_some());
    assert!(db.get_whitelist_answer(&id, "价格贵吗").is_some());

    let conn = raw(&dir);
    let (hits, last_hit): (i64, Option<String>) = conn
        .query_row(
            "SELECT hit_count, last_hit_at FROM whitelist WHERE session_id = ?1",
            [&id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(hits, 2);
    assert!(last_hit.is_some());
}

#[test]
fn overlay_tier_wins_without_bookkeeping() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "价格", "表里的答案", 0, None);
    drop(conn);

    let overlay = format!(
        r#"{{"{id}": [{{"pattern": "价格", "answer": "覆盖答案", "priority": 1}}]}}"#
    );
    std::fs::write(dir.path().join("whitelist.json"), overlay).unwrap();

    assert_eq!(
        db.get_whitelist_answer(&id, "价格多少"),
        Some("覆盖答案".to_string())
    );

    let conn = raw(&dir);
    let hits: i64 = conn
        .query_row(
            "SELECT hit_count FROM whitelist WHERE session_id = ?1",
            [&id],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(hits, 0);
}

#[test]
fn overlay_miss_falls_through_to_table() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "价格", "表里的答案", 0, None);
    drop(conn);

    let overlay = format!(r#"{{"{id}": [{{"pattern": "产地", "answer": "云南"}}]}}"#);
    std::fs::write(dir.path().join("whitelist.json"), overlay).unwrap();

    assert_eq!(
        db.get_whitelist_answer(&id, "价格多少"),
        Some("表里的答案".to_string())
    );
}

#[test]
fn apply_templates_partial_and_idempotent() {
    let (_dir, db) = test_db();
    let id = sid();
    let products = vec![ProductInput::new("苹果", 10.0).product_type(ProductType::Fruit)];
    assert!(db.create_session(&id, "host", "theme", &products));

    // fruit templates need name/sweetness/texture/origin/season; supplying
    // name+sweetness+origin satisfies 4 of the 6
    let vals = values(&[("name", "苹果"), ("sweetness", "9分甜"), ("origin", "山东")]);
    assert_eq!(db.apply_faq_templates(&id, ProductType::Fruit, &vals), 4);

    // re-application inserts nothing new
    assert_eq!(db.apply_faq_templates(&id, ProductType::Fruit, &vals), 0);

    // the instantiated entries resolve
    assert_eq!(
        db.get_whitelist_answer(&id, "你们这个哪里的"),
        Some("苹果来自山东，品质有保证！".to_string())
    );
}

#[test]
fn statistics_split_used_and_unused() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    let conn = raw(&dir);
    insert_entry(&conn, &id, "价格", "十块", 0, None);
    insert_entry(&conn, &id, "产地", "云南", 0, None);
    drop(conn);

    assert!(db.get_whitelist_answer(&id, "价格多少").is_some());

    let report = db.get_faq_statistics(Some(&id)).expect("report");
    assert_eq!(report.session_id.as_deref(), Some(id.as_str()));
    assert_eq!(report.totals.total_faqs, 2);
    assert_eq!(report.totals.total_hits, 1);
    assert_eq!(report.totals.used_faqs, 1);
    assert_eq!(report.totals.unused_faqs, 1);
    assert_eq!(report.hot_faqs.len(), 1);
    assert_eq!(report.hot_faqs[0].pattern, "价格");
    assert_eq!(report.unused_faqs.len(), 1);
    assert_eq!(report.unused_faqs[0].pattern, "产地");

    let overview = db.get_faq_statistics(None).expect("overview");
    assert!(overview.session_id.is_none());
    assert_eq!(overview.totals.sessions, 1);
    assert_eq!(overview.hot_faqs.len(), 1);
    assert_eq!(overview.hot_faqs[0].host_name.as_deref(), Some("host"));
}

#[test]
fn recommendations_skip_covered_questions() {
    let (dir, db) = test_db();
    let id = sid();
    assert!(db.create_session(&id, "host", "theme", &[]));

    assert!(db.cache_qa(&id, "多少钱一斤", "十块", None, None));
    assert!(db.cache_qa(&id, "怎么发货的", "顺丰", None, None));

    let conn = raw(&dir);
    conn.execute("UPDATE qa_cache SET hit_count = 15", []).unwrap();
    insert_entry(&conn, &id, "发货", "今天发", 0, None);
    drop(conn);

    let recs = db.get_faq_recommendations(&id, 10);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].question, "多少钱一斤");
    assert_eq!(recs[0].hit_count, 15);

    // below the threshold nothing qualifies
    assert!(db.get_faq_recommendations(&id, 20).is_empty());
}
