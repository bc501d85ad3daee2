//! barker: data and matching engine for a live-stream sales chat assistant.
//!
//! Stores per-session product catalogs and conversation history, answers
//! repeat questions from curated patterns before the host falls back to a
//! generative call, and caches generative answers so the same question is
//! never paid for twice. Storage runs against a MySQL primary and downgrades
//! permanently to an embedded SQLite store when the primary is unreachable.
//!
//! The intended call order for an incoming message: sensitive-word and
//! blacklist checks, then the whitelist resolver, then the QA cache; a fresh
//! generative answer is written back through [`db::LiveDB::cache_qa`] and
//! [`db::LiveDB::save_conversation`]. The HTTP layer and the generative/TTS
//! clients live outside this crate.

pub mod config;
pub mod db;
pub mod error;
pub mod merge;
pub mod normalize;
pub mod overlay;

use std::sync::Arc;

pub type SharedDB = Arc<db::LiveDB>;

/// Run a blocking store operation on tokio's blocking thread pool.
///
/// All synchronous LiveDB calls in async context MUST go through this
/// to avoid starving async worker threads.
pub async fn db_call<F, T>(db: &SharedDB, f: F) -> Result<T, error::BarkerError>
where
    F: FnOnce(&db::LiveDB) -> T + Send + 'static,
    T: Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| error::BarkerError::Internal(e.to_string()))
}
