//! Environment-sourced store configuration.
//!
//! Every setting has a documented default; missing primary-engine
//! credentials are not an error here; they only surface when a connection
//! attempt is actually made.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Primary engine host.
    pub host: String,
    /// Primary engine port.
    pub port: u16,
    /// Primary engine user.
    pub user: String,
    /// Primary engine password.
    pub password: String,
    /// Primary engine database name.
    pub database: String,
    /// Primary engine pool size.
    pub pool_size: usize,
    /// Directory holding the fallback store file and overlay files.
    pub data_dir: PathBuf,
    /// Global QA-cache population ceiling.
    pub qa_cache_max: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("DB_HOST", "localhost"),
            port: env_or("DB_PORT", "3306").parse().unwrap_or(3306),
            user: env_or("DB_USER", "root"),
            password: env_or("DB_PASSWORD", ""),
            database: env_or("DB_NAME", "live_assistant"),
            pool_size: env_or("DB_POOL_SIZE", "5").parse().unwrap_or(5),
            data_dir: PathBuf::from(env_or("BARKER_DATA_DIR", "data")),
            qa_cache_max: env_or("BARKER_CACHE_MAX", "1000").parse().unwrap_or(1000),
        }
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("barker.sqlite3")
    }

    pub fn blacklist_file(&self) -> PathBuf {
        self.data_dir.join("blacklist.json")
    }

    pub fn whitelist_file(&self) -> PathBuf {
        self.data_dir.join("whitelist.json")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 3306,
            user: "root".into(),
            password: String::new(),
            database: "live_assistant".into(),
            pool_size: 5,
            data_dir: PathBuf::from("data"),
            qa_cache_max: 1000,
        }
    }
}
