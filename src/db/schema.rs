//! Versioned schema provisioning.
//!
//! The stored `schema_version` in `barker_meta` gates an ordered migration
//! list, so column additions and index creation run at most once instead of
//! being re-probed on every startup. A crash mid-migration re-runs that
//! migration on the next start; the duplicate-column tolerance below makes
//! the re-run convergent. Databases that evolved before version tracking
//! existed converge the same way.

use tracing::{debug, info};

use super::dialect::{Dialect, StoreConn, Value};
use crate::error::BarkerError;

struct Migration {
    version: i64,
    mysql: &'static [&'static str],
    sqlite: &'static [&'static str],
}

const MYSQL_META: &str = "CREATE TABLE IF NOT EXISTS barker_meta (
    meta_key VARCHAR(64) PRIMARY KEY,
    meta_value TEXT NOT NULL
)";

const SQLITE_META: &str = "CREATE TABLE IF NOT EXISTS barker_meta (
    meta_key TEXT PRIMARY KEY,
    meta_value TEXT NOT NULL
)";

const MIGRATIONS: &[Migration] = &[
    // v1: original-era tables.
    Migration {
        version: 1,
        mysql: &[
            "CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(36) PRIMARY KEY,
                host_name VARCHAR(255) NOT NULL,
                live_theme VARCHAR(255) NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS products (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                product_name VARCHAR(255) NOT NULL,
                price DECIMAL(10,2) NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS conversations (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                user_message TEXT,
                ai_response TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS bullet_screen_queue (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                username VARCHAR(255),
                message TEXT NOT NULL,
                category VARCHAR(50) DEFAULT 'unknown',
                priority INT DEFAULT 0,
                is_processed BOOLEAN DEFAULT FALSE,
                confidence_score FLOAT DEFAULT 0.0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                processed_at TIMESTAMP NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                INDEX idx_session_processed (session_id, is_processed),
                INDEX idx_created (created_at)
            )",
            "CREATE TABLE IF NOT EXISTS blacklist (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                pattern VARCHAR(255) NOT NULL,
                type VARCHAR(20) DEFAULT 'message',
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                INDEX idx_session_type (session_id, type)
            )",
            "CREATE TABLE IF NOT EXISTS whitelist (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                pattern VARCHAR(255) NOT NULL,
                answer TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                INDEX idx_session_pattern (session_id)
            )",
            "CREATE TABLE IF NOT EXISTS faq_templates (
                id INT AUTO_INCREMENT PRIMARY KEY,
                product_type VARCHAR(50) NOT NULL,
                pattern VARCHAR(255) NOT NULL,
                answer_template VARCHAR(500) NOT NULL,
                placeholder VARCHAR(100),
                priority INT DEFAULT 80,
                is_active BOOLEAN DEFAULT TRUE,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                INDEX idx_product_type (product_type)
            )",
            "CREATE TABLE IF NOT EXISTS qa_cache (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                question TEXT NOT NULL,
                question_hash VARCHAR(64) NOT NULL,
                answer TEXT NOT NULL,
                hit_count INT DEFAULT 1,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                last_used_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                INDEX idx_session_hash (session_id, question_hash),
                INDEX idx_last_used (last_used_at)
            )",
            "CREATE TABLE IF NOT EXISTS product_info (
                id INT AUTO_INCREMENT PRIMARY KEY,
                session_id VARCHAR(36),
                product_id INT,
                product_name VARCHAR(255),
                info_key VARCHAR(100),
                info_value TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
                INDEX idx_session_product (session_id, product_name)
            )",
        ],
        sqlite: &[
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                host_name TEXT NOT NULL,
                live_theme TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            "CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                product_name TEXT NOT NULL,
                price REAL NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                user_message TEXT,
                ai_response TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE TABLE IF NOT EXISTS bullet_screen_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                username TEXT,
                message TEXT NOT NULL,
                category TEXT DEFAULT 'unknown',
                priority INTEGER DEFAULT 0,
                is_processed INTEGER DEFAULT 0,
                confidence_score REAL DEFAULT 0.0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                processed_at DATETIME,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_session_processed ON bullet_screen_queue (session_id, is_processed)",
            "CREATE INDEX IF NOT EXISTS idx_created ON bullet_screen_queue (created_at)",
            "CREATE TABLE IF NOT EXISTS blacklist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                pattern TEXT NOT NULL,
                type TEXT DEFAULT 'message',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_session_type ON blacklist (session_id, type)",
            "CREATE TABLE IF NOT EXISTS whitelist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                pattern TEXT NOT NULL,
                answer TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_session_pattern ON whitelist (session_id)",
            "CREATE TABLE IF NOT EXISTS faq_templates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                product_type TEXT NOT NULL,
                pattern TEXT NOT NULL,
                answer_template TEXT NOT NULL,
                placeholder TEXT,
                priority INTEGER DEFAULT 80,
                is_active INTEGER DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            "CREATE INDEX IF NOT EXISTS idx_product_type ON faq_templates (product_type)",
            "CREATE TABLE IF NOT EXISTS qa_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                question TEXT NOT NULL,
                question_hash TEXT NOT NULL,
                answer TEXT NOT NULL,
                hit_count INTEGER DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_used_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_session_hash ON qa_cache (session_id, question_hash)",
            "CREATE INDEX IF NOT EXISTS idx_last_used ON qa_cache (last_used_at)",
            "CREATE TABLE IF NOT EXISTS product_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT,
                product_id INTEGER,
                product_name TEXT,
                info_key TEXT,
                info_value TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )",
            "CREATE INDEX IF NOT EXISTS idx_session_product ON product_info (session_id, product_name)",
        ],
    },
    // v2: product catalog metadata.
    Migration {
        version: 2,
        mysql: &[
            "ALTER TABLE products ADD COLUMN unit VARCHAR(20) DEFAULT '元'",
            "ALTER TABLE products ADD COLUMN product_type VARCHAR(50)",
            "ALTER TABLE products ADD COLUMN attributes JSON",
        ],
        sqlite: &[
            "ALTER TABLE products ADD COLUMN unit TEXT DEFAULT '元'",
            "ALTER TABLE products ADD COLUMN product_type TEXT",
            "ALTER TABLE products ADD COLUMN attributes TEXT",
        ],
    },
    // v3: whitelist priority/targeting/hit telemetry.
    Migration {
        version: 3,
        mysql: &[
            "ALTER TABLE whitelist ADD COLUMN priority INT DEFAULT 0",
            "ALTER TABLE whitelist ADD COLUMN product_types VARCHAR(255)",
            "ALTER TABLE whitelist ADD COLUMN hit_count INT DEFAULT 0",
            "ALTER TABLE whitelist ADD COLUMN last_hit_at TIMESTAMP NULL",
            "CREATE INDEX idx_hit_count ON whitelist (hit_count)",
        ],
        sqlite: &[
            "ALTER TABLE whitelist ADD COLUMN priority INTEGER DEFAULT 0",
            "ALTER TABLE whitelist ADD COLUMN product_types TEXT",
            "ALTER TABLE whitelist ADD COLUMN hit_count INTEGER DEFAULT 0",
            "ALTER TABLE whitelist ADD COLUMN last_hit_at DATETIME",
            "CREATE INDEX IF NOT EXISTS idx_hit_count ON whitelist (hit_count)",
        ],
    },
    // v4: synthesized-audio references on conversations and the QA cache.
    Migration {
        version: 4,
        mysql: &[
            "ALTER TABLE conversations ADD COLUMN audio_url VARCHAR(255) NULL",
            "ALTER TABLE qa_cache ADD COLUMN audio_url VARCHAR(255) NULL",
        ],
        sqlite: &[
            "ALTER TABLE conversations ADD COLUMN audio_url TEXT",
            "ALTER TABLE qa_cache ADD COLUMN audio_url TEXT",
        ],
    },
];

pub(crate) const SCHEMA_VERSION: i64 = 4;

/// Curated answer templates seeded once per database:
/// (product_type, pattern, answer_template, placeholder description, priority).
const FAQ_TEMPLATE_SEED: &[(&str, &str, &str, &str, i64)] = &[
    ("fruit", "甜不甜", "我们的{name}甜度是{sweetness}，口感很好哦~", "甜度（如：9分甜）", 90),
    ("fruit", "甜度", "{name}的甜度是{sweetness}，非常适合喜欢吃甜的朋友！", "甜度（如：9分甜）", 90),
    ("fruit", "口感", "{name}的口感{texture}，吃起来特别满足！", "口感（如：多汁软糯）", 85),
    ("fruit", "产地", "我们的{name}来自{origin}，品质有保证！", "产地（如：云南）", 80),
    ("fruit", "哪里的", "{name}来自{origin}，品质有保证！", "产地（如：云南）", 80),
    ("fruit", "什么时候最好", "{name}在{season}最好吃，现在正是时候！", "季节（如：春季）", 75),
    ("vegetable", "新鲜吗", "绝对新鲜！{freshness}，当天采摘！", "新鲜度（如：当天现摘）", 90),
    ("vegetable", "怎么做", "这个{name}适合{cooking}，简单又好吃！", "烹饪方法（如：清炒或做汤）", 85),
    ("vegetable", "怎么吃", "推荐{cooking}，营养美味！", "烹饪方法（如：清炒或做汤）", 85),
    ("vegetable", "哪里的", "{name}来自{origin}，生态种植！", "产地（如：本地农场）", 80),
    ("vegetable", "产地", "来自{origin}，生态种植！", "产地（如：本地农场）", 80),
    ("meat", "怎么养的", "我们的{name}是{raising}，肉质鲜美！", "养殖方式（如：山地散养）", 90),
    ("meat", "养殖方式", "{raising}，保证品质！", "养殖方式（如：山地散养）", 90),
    ("meat", "肉质", "{name}的肉质{texture}，口感一流！", "肉质（如：紧实弹牙）", 85),
    ("meat", "口感", "肉质{texture}，口感一流！", "肉质（如：紧实弹牙）", 85),
    ("meat", "怎么煮", "建议{cooking_time}，味道最佳！", "烹饪时间（如：炖煮2小时）", 80),
    ("grain", "什么品种", "这是{variety}，品质优良！", "品种（如：东北大米）", 85),
    ("grain", "怎么吃", "{cooking}，营养健康！", "食用方法（如：煮粥或蒸饭）", 85),
    ("grain", "怎么做", "建议{cooking}，营养健康！", "食用方法（如：煮粥或蒸饭）", 85),
    ("grain", "哪里产的", "来自{origin}，原产地直供！", "产地（如：东北）", 80),
    ("grain", "产地", "{origin}，原产地直供！", "产地（如：东北）", 80),
    ("handicraft", "什么材料", "使用{material}材质，天然环保！", "材料（如：纯棉）", 85),
    ("handicraft", "怎么做的", "采用{craft}工艺，纯手工制作！", "工艺（如：传统编织）", 85),
    ("handicraft", "做多久", "每件需要{making_time}，匠心之作！", "制作时间（如：3天）", 80),
    ("processed", "什么原料", "原料是{ingredients}，健康放心！", "原料（如：纯天然水果）", 85),
    ("processed", "保质期", "保质期{shelf_life}，请放心购买！", "保质期（如：12个月）", 90),
    ("processed", "什么味道", "{flavor}风味，好吃不腻！", "风味（如：香甜可口）", 85),
];

// A database that evolved before version tracking existed may already carry
// a column or index a migration adds; treat that as already applied.
fn is_already_applied(err: &BarkerError) -> bool {
    let message = err.to_string().to_lowercase();
    message.contains("duplicate column") || message.contains("duplicate key name")
}

fn read_version(conn: &mut StoreConn) -> Result<i64, BarkerError> {
    let row = conn.query_one(
        "SELECT meta_value FROM barker_meta WHERE meta_key = 'schema_version'",
        &[],
    )?;
    Ok(row
        .and_then(|r| r.text("meta_value"))
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

fn write_version(conn: &mut StoreConn, version: i64) -> Result<(), BarkerError> {
    conn.execute(
        conn.dialect().upsert_meta(),
        &[Value::from("schema_version"), Value::from(version.to_string())],
    )?;
    Ok(())
}

fn seed_faq_templates(conn: &mut StoreConn) -> Result<(), BarkerError> {
    let count = conn
        .query_one("SELECT COUNT(*) AS cnt FROM faq_templates", &[])?
        .and_then(|r| r.i64("cnt"))
        .unwrap_or(0);
    if count > 0 {
        return Ok(());
    }

    for (product_type, pattern, answer_template, placeholder, priority) in FAQ_TEMPLATE_SEED {
        conn.execute(
            "INSERT INTO faq_templates (product_type, pattern, answer_template, placeholder, priority) \
             VALUES (?, ?, ?, ?, ?)",
            &[
                Value::from(*product_type),
                Value::from(*pattern),
                Value::from(*answer_template),
                Value::from(*placeholder),
                Value::from(*priority),
            ],
        )?;
    }
    info!(count = FAQ_TEMPLATE_SEED.len(), "seeded faq templates");
    Ok(())
}

/// Bring the connected database up to the current schema version and seed
/// the template catalog if empty. Additive and idempotent.
pub(crate) fn ensure_schema(conn: &mut StoreConn) -> Result<(), BarkerError> {
    let dialect = conn.dialect();
    if dialect == Dialect::Sqlite {
        conn.execute_raw("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    }
    conn.execute_raw(match dialect {
        Dialect::Mysql => MYSQL_META,
        Dialect::Sqlite => SQLITE_META,
    })?;

    let mut version = read_version(conn)?;
    if version < SCHEMA_VERSION {
        for migration in MIGRATIONS {
            if migration.version <= version {
                continue;
            }
            let statements = match dialect {
                Dialect::Mysql => migration.mysql,
                Dialect::Sqlite => migration.sqlite,
            };
            for sql in statements {
                if let Err(err) = conn.execute_raw(sql) {
                    if is_already_applied(&err) {
                        debug!(version = migration.version, "statement already applied, skipping");
                        continue;
                    }
                    return Err(err);
                }
            }
            write_version(conn, migration.version)?;
            version = migration.version;
            info!(version, "applied schema migration");
        }
    }

    seed_faq_templates(conn)
}
