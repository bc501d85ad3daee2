//! Question-answer cache.
//!
//! Generative answers are expensive; repeat questions within a session are
//! served from here instead. Entries are keyed by the content address of the
//! normalized question (plus the disambiguating context token), upserted so
//! a (session, key) pair never duplicates, and the global population is
//! capped by evicting the least-recently-used tail after every write.

use tracing::{error, info, warn};

use super::dialect::Value;
use super::{CachedAnswer, LiveDB};
use crate::error::BarkerError;
use crate::normalize::cache_key;

impl LiveDB {
    /// Look up a cached answer. A hit bumps the entry's hit count and
    /// last-used time; a bookkeeping failure is logged but does not
    /// suppress the answer.
    pub fn get_cached_answer(
        &self,
        session_id: &str,
        question: &str,
        context: Option<&str>,
    ) -> Option<CachedAnswer> {
        match self.try_get_cached_answer(session_id, question, context) {
            Ok(hit) => hit,
            Err(err) => {
                error!(error = %err, session = session_id, "qa cache lookup failed");
                None
            }
        }
    }

    fn try_get_cached_answer(
        &self,
        session_id: &str,
        question: &str,
        context: Option<&str>,
    ) -> Result<Option<CachedAnswer>, BarkerError> {
        let key = cache_key(question, context);
        let mut conn = self.conn()?;
        let Some(row) = conn.query_one(
            "SELECT id, answer, audio_url FROM qa_cache \
             WHERE session_id = ? AND question_hash = ? \
             ORDER BY last_used_at DESC LIMIT 1",
            &[Value::from(session_id), Value::from(key.as_str())],
        )?
        else {
            return Ok(None);
        };

        if let Some(id) = row.i64("id") {
            let now = conn.dialect().now();
            let sql = format!(
                "UPDATE qa_cache SET hit_count = hit_count + 1, last_used_at = {now} WHERE id = ?"
            );
            if let Err(err) = conn.execute(&sql, &[Value::from(id)]) {
                warn!(error = %err, id, "failed to update qa cache hit statistics");
            }
        }

        info!(session = session_id, "qa cache hit");
        Ok(Some(CachedAnswer {
            answer: row.text("answer").unwrap_or_default(),
            audio_url: row.text("audio_url"),
        }))
    }

    /// Store (or refresh) the answer for a question. At most one live entry
    /// exists per (session, key): a repeated write overwrites the answer and
    /// bumps the hit count instead of inserting a duplicate. Eviction runs
    /// after every write.
    pub fn cache_qa(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        audio_url: Option<&str>,
        context: Option<&str>,
    ) -> bool {
        match self.try_cache_qa(session_id, question, answer, audio_url, context) {
            Ok(()) => {
                self.clean_qa_cache();
                true
            }
            Err(err) => {
                error!(error = %err, session = session_id, "failed to cache qa entry");
                false
            }
        }
    }

    fn try_cache_qa(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
        audio_url: Option<&str>,
        context: Option<&str>,
    ) -> Result<(), BarkerError> {
        let key = cache_key(question, context);
        let mut conn = self.conn()?;

        let existing = conn
            .query_one(
                "SELECT id FROM qa_cache WHERE session_id = ? AND question_hash = ?",
                &[Value::from(session_id), Value::from(key.as_str())],
            )?
            .and_then(|row| row.i64("id"));

        match existing {
            Some(id) => {
                let now = conn.dialect().now();
                if let Some(audio) = audio_url {
                    let sql = format!(
                        "UPDATE qa_cache SET answer = ?, audio_url = ?, \
                         hit_count = hit_count + 1, last_used_at = {now} WHERE id = ?"
                    );
                    conn.execute(
                        &sql,
                        &[Value::from(answer), Value::from(audio), Value::from(id)],
                    )?;
                } else {
                    let sql = format!(
                        "UPDATE qa_cache SET answer = ?, \
                         hit_count = hit_count + 1, last_used_at = {now} WHERE id = ?"
                    );
                    conn.execute(&sql, &[Value::from(answer), Value::from(id)])?;
                }
            }
            None => {
                conn.execute(
                    "INSERT INTO qa_cache (session_id, question, question_hash, answer, audio_url) \
                     VALUES (?, ?, ?, ?, ?)",
                    &[
                        Value::from(session_id),
                        Value::from(question),
                        Value::from(key.as_str()),
                        Value::from(answer),
                        Value::from(audio_url),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// Enforce the global population ceiling: keep the ceiling-many most
    /// recently used entries (id breaks last-used ties within a timestamp
    /// granule) and delete the rest.
    fn clean_qa_cache(&self) {
        let ceiling = self.qa_cache_max();
        let result = self.conn().and_then(|mut conn| {
            let count = conn
                .query_one("SELECT COUNT(*) AS cnt FROM qa_cache", &[])?
                .and_then(|row| row.i64("cnt"))
                .unwrap_or(0);
            if count <= ceiling as i64 {
                return Ok(0);
            }
            let outcome = conn.execute(
                "DELETE FROM qa_cache WHERE id NOT IN ( \
                     SELECT id FROM ( \
                         SELECT id FROM qa_cache \
                         ORDER BY last_used_at DESC, id DESC LIMIT ? \
                     ) AS keep \
                 )",
                &[Value::from(ceiling)],
            )?;
            Ok(outcome.affected)
        });
        match result {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, ceiling, "qa cache trimmed to ceiling"),
            Err(err) => warn!(error = %err, "qa cache cleanup failed"),
        }
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod cache_tests;
