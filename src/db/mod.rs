//! Failover store for the live-sales assistant.
//!
//! [`LiveDB`] prefers the configured MySQL primary and downgrades, once and
//! permanently for the process lifetime, to an embedded SQLite store on any
//! primary connection error. All business methods are written against the
//! neutral statement surface in [`dialect`], so the same code path serves
//! both engines.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub mod dialect;
mod schema;

mod cache;
mod faq;
mod screen;
mod session;

pub use dialect::{Dialect, Row, StoreConn, Value};
pub use faq::render_template;

use crate::config::StoreConfig;
use crate::error::BarkerError;

/// A structured attribute map as returned to callers.
pub type AttrMap = serde_json::Map<String, serde_json::Value>;

/// Closed set of product categories used for FAQ targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Fruit,
    Vegetable,
    Meat,
    Grain,
    Handicraft,
    Processed,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Fruit => "fruit",
            ProductType::Vegetable => "vegetable",
            ProductType::Meat => "meat",
            ProductType::Grain => "grain",
            ProductType::Handicraft => "handicraft",
            ProductType::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fruit" => Some(ProductType::Fruit),
            "vegetable" => Some(ProductType::Vegetable),
            "meat" => Some(ProductType::Meat),
            "grain" => Some(ProductType::Grain),
            "handicraft" => Some(ProductType::Handicraft),
            "processed" => Some(ProductType::Processed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub host_name: String,
    pub live_theme: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub products: Vec<Product>,
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: i64,
    pub product_name: String,
    pub price: f64,
    pub unit: String,
    pub product_type: Option<ProductType>,
    /// Always a valid structured map; malformed stored text reads as empty.
    pub attributes: AttrMap,
}

/// Boundary payload for one catalog product.
///
/// Accepts the legacy field spellings still sent by older clients: `type`
/// for the category, and the origin aliases (`产地`, `place_of_origin`,
/// `origin_place`, `product_origin`) which fold into the attributes map.
/// `attributes` may arrive as an object or as string-encoded JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, alias = "type")]
    pub product_type: Option<ProductType>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(
        default,
        alias = "产地",
        alias = "place_of_origin",
        alias = "origin_place",
        alias = "product_origin"
    )]
    pub origin: Option<String>,
}

impl ProductInput {
    pub fn new(name: impl Into<String>, price: f64) -> Self {
        Self {
            name: name.into(),
            price,
            ..Default::default()
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn product_type(mut self, t: ProductType) -> Self {
        self.product_type = Some(t);
        self
    }

    pub fn attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub user_message: Option<String>,
    pub ai_response: Option<String>,
    pub audio_url: Option<String>,
    pub created_at: Option<String>,
}

/// Reference to a product within a session, by row id or by catalog name.
#[derive(Debug, Clone)]
pub enum ProductRef {
    Id(i64),
    Name(String),
}

impl From<i64> for ProductRef {
    fn from(id: i64) -> Self {
        ProductRef::Id(id)
    }
}

impl From<&str> for ProductRef {
    fn from(name: &str) -> Self {
        ProductRef::Name(name.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub audio_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaqTemplate {
    pub product_type: ProductType,
    pub pattern: String,
    pub answer_template: String,
    pub placeholder: Option<String>,
    pub priority: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FaqTotals {
    pub total_faqs: i64,
    pub total_hits: i64,
    pub avg_hits: f64,
    pub max_hits: i64,
    pub used_faqs: i64,
    pub unused_faqs: i64,
    /// Distinct sessions with at least one entry; global report only.
    pub sessions: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaqUsage {
    pub pattern: String,
    pub answer: String,
    pub hit_count: i64,
    pub last_hit_at: Option<String>,
    pub product_types: Option<String>,
    pub host_name: Option<String>,
    pub live_theme: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaqReport {
    pub session_id: Option<String>,
    pub totals: FaqTotals,
    pub hot_faqs: Vec<FaqUsage>,
    pub unused_faqs: Vec<FaqUsage>,
}

/// A QA-cache entry hot enough to promote into the curated whitelist.
#[derive(Debug, Clone, Serialize)]
pub struct FaqRecommendation {
    pub question: String,
    pub answer: String,
    pub hit_count: i64,
    pub last_used_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulletMessage {
    pub id: i64,
    pub session_id: Option<String>,
    pub username: Option<String>,
    pub message: String,
    pub category: String,
    pub priority: i64,
    pub is_processed: bool,
    pub confidence_score: f64,
    pub created_at: Option<String>,
    pub processed_at: Option<String>,
}

pub(crate) fn validate_session_input(
    session_id: &str,
    products: &[ProductInput],
) -> Result<(), BarkerError> {
    if session_id.trim().is_empty() {
        return Err(BarkerError::Validation("session id must not be empty".into()));
    }
    for product in products {
        if !product.price.is_finite() || product.price < 0.0 {
            return Err(BarkerError::Validation(format!(
                "product '{}' has an invalid price",
                product.name
            )));
        }
    }
    Ok(())
}

enum Backend {
    Mysql(mysql::Pool),
    Sqlite,
}

/// The failover store. One instance per process, shared behind `Arc`.
pub struct LiveDB {
    backend: RwLock<Backend>,
    cfg: StoreConfig,
}

impl LiveDB {
    /// Open the store: try the primary engine, fall back to the embedded
    /// store on any primary error. Only fallback provisioning failures are
    /// fatal; an unreachable primary is an expected deployment mode.
    pub fn open(cfg: StoreConfig) -> Result<Self, BarkerError> {
        match Self::connect_primary(&cfg) {
            Ok(pool) => {
                info!(host = %cfg.host, database = %cfg.database, "primary engine pool created");
                let db = Self {
                    backend: RwLock::new(Backend::Mysql(pool)),
                    cfg,
                };
                if let Err(err) = db.provision_primary() {
                    warn!(error = %err, "primary schema provisioning failed");
                    db.downgrade(&err.to_string());
                }
                Ok(db)
            }
            Err(err) => {
                warn!(error = %err, "primary engine unreachable, using embedded fallback");
                let db = Self {
                    backend: RwLock::new(Backend::Sqlite),
                    cfg,
                };
                db.provision_sqlite()?;
                Ok(db)
            }
        }
    }

    /// Open directly against the embedded store, skipping the primary.
    pub fn open_embedded(cfg: StoreConfig) -> Result<Self, BarkerError> {
        let db = Self {
            backend: RwLock::new(Backend::Sqlite),
            cfg,
        };
        db.provision_sqlite()?;
        Ok(db)
    }

    fn connect_primary(cfg: &StoreConfig) -> Result<mysql::Pool, BarkerError> {
        let constraints = mysql::PoolConstraints::new(1, cfg.pool_size.max(1))
            .ok_or_else(|| BarkerError::Internal("invalid pool size".into()))?;
        let opts = mysql::OptsBuilder::new()
            .ip_or_hostname(Some(cfg.host.clone()))
            .tcp_port(cfg.port)
            .user(Some(cfg.user.clone()))
            .pass(Some(cfg.password.clone()))
            .db_name(Some(cfg.database.clone()))
            .pool_opts(mysql::PoolOpts::default().with_constraints(constraints));
        let pool = mysql::Pool::new(opts)?;
        // Probe one connection so an unreachable primary is detected here,
        // not on the first business call.
        drop(pool.get_conn()?);
        Ok(pool)
    }

    fn provision_primary(&self) -> Result<(), BarkerError> {
        let pool = match &*self.backend.read() {
            Backend::Mysql(pool) => pool.clone(),
            Backend::Sqlite => return Ok(()),
        };
        let mut conn = StoreConn::Mysql(pool.get_conn()?);
        schema::ensure_schema(&mut conn)
    }

    fn provision_sqlite(&self) -> Result<(), BarkerError> {
        let path = self.cfg.sqlite_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| BarkerError::Unavailable(format!("cannot create data dir: {e}")))?;
        }
        let mut conn = StoreConn::Sqlite(self.sqlite_conn()?);
        schema::ensure_schema(&mut conn)?;
        info!(path = %path.display(), "embedded fallback store ready");
        Ok(())
    }

    fn sqlite_conn(&self) -> Result<rusqlite::Connection, BarkerError> {
        let conn = rusqlite::Connection::open(self.cfg.sqlite_path())?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    /// Permanently switch to the embedded fallback. Idempotent; provisioning
    /// happens inside the backend write lock so exactly one pass runs no
    /// matter how many failing calls race here.
    pub fn downgrade(&self, reason: &str) {
        let mut guard = self.backend.write();
        if matches!(*guard, Backend::Sqlite) {
            return;
        }
        warn!(%reason, "downgrading to embedded fallback for the rest of the process");
        if let Err(err) = self.provision_sqlite() {
            error!(error = %err, "fallback provisioning failed");
        }
        *guard = Backend::Sqlite;
    }

    /// Which engine calls are currently served by.
    pub fn active_dialect(&self) -> Dialect {
        match &*self.backend.read() {
            Backend::Mysql(_) => Dialect::Mysql,
            Backend::Sqlite => Dialect::Sqlite,
        }
    }

    /// Acquire a connection for one logical operation. A primary failure
    /// here triggers the one-shot downgrade and the call is served by the
    /// fallback instead.
    pub(crate) fn conn(&self) -> Result<StoreConn, BarkerError> {
        loop {
            let pool = match &*self.backend.read() {
                Backend::Mysql(pool) => Some(pool.clone()),
                Backend::Sqlite => None,
            };
            match pool {
                Some(pool) => match pool.get_conn() {
                    Ok(conn) => return Ok(StoreConn::Mysql(conn)),
                    Err(err) => {
                        error!(error = %err, "primary connection acquisition failed");
                        self.downgrade(&err.to_string());
                    }
                },
                None => return self.sqlite_conn().map(StoreConn::Sqlite),
            }
        }
    }

    pub(crate) fn qa_cache_max(&self) -> usize {
        self.cfg.qa_cache_max
    }

    pub(crate) fn blacklist_file(&self) -> std::path::PathBuf {
        self.cfg.blacklist_file()
    }

    pub(crate) fn whitelist_file(&self) -> std::path::PathBuf {
        self.cfg.whitelist_file()
    }

    pub fn get_meta(&self, key: &str) -> Option<String> {
        let mut conn = self.conn().ok()?;
        conn.query_one(
            "SELECT meta_value FROM barker_meta WHERE meta_key = ?",
            &[Value::from(key)],
        )
        .ok()?
        .and_then(|row| row.text("meta_value"))
    }

    pub fn set_meta(&self, key: &str, value: &str) -> bool {
        let result = self.conn().and_then(|mut conn| {
            let sql = conn.dialect().upsert_meta();
            conn.execute(sql, &[Value::from(key), Value::from(value)])
                .map(|_| ())
        });
        match result {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, "failed to write meta entry");
                false
            }
        }
    }

    /// Union of the session's product categories, used for FAQ gating.
    pub(crate) fn session_product_types(&self, session_id: &str) -> HashSet<String> {
        self.get_session(session_id)
            .map(|session| {
                session
                    .products
                    .iter()
                    .filter_map(|p| p.product_type.map(|t| t.as_str().to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod meta_tests {
    use super::*;

    #[test]
    fn meta_get_set() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let db = LiveDB::open_embedded(cfg).unwrap();

        assert_eq!(db.get_meta("nonexistent"), None);
        assert!(db.set_meta("last_export", "2026-01-01"));
        assert_eq!(db.get_meta("last_export"), Some("2026-01-01".to_string()));
        assert!(db.set_meta("last_export", "2026-02-01"));
        assert_eq!(db.get_meta("last_export"), Some("2026-02-01".to_string()));
    }

    #[test]
    fn schema_version_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig {
            data_dir: dir.path().to_path_buf(),
            ..StoreConfig::default()
        };
        let db = LiveDB::open_embedded(cfg).unwrap();
        assert_eq!(
            db.get_meta("schema_version"),
            Some(schema::SCHEMA_VERSION.to_string())
        );
    }
}
