//! Spectator-message queue and moderation checks.

use tracing::{debug, error};

use super::dialect::{Row, Value};
use super::{BulletMessage, LiveDB};
use crate::error::BarkerError;
use crate::overlay::{self, BlacklistFile};

fn row_to_bullet(row: &Row) -> BulletMessage {
    BulletMessage {
        id: row.i64("id").unwrap_or(0),
        session_id: row.text("session_id"),
        username: row.text("username"),
        message: row.text("message").unwrap_or_default(),
        category: row.text("category").unwrap_or_else(|| "unknown".to_string()),
        priority: row.i64("priority").unwrap_or(0),
        is_processed: row.flag("is_processed"),
        confidence_score: row.f64("confidence_score").unwrap_or(0.0),
        created_at: row.text("created_at"),
        processed_at: row.text("processed_at"),
    }
}

impl LiveDB {
    /// Queue one spectator message; returns the new row id.
    pub fn add_bullet_screen(
        &self,
        session_id: &str,
        username: &str,
        message: &str,
        category: &str,
        priority: i64,
    ) -> Option<i64> {
        let result = self.conn().and_then(|mut conn| {
            conn.execute(
                "INSERT INTO bullet_screen_queue (session_id, username, message, category, priority) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    Value::from(session_id),
                    Value::from(username),
                    Value::from(message),
                    Value::from(category),
                    Value::from(priority),
                ],
            )
        });
        match result {
            Ok(outcome) => outcome.last_insert_id,
            Err(err) => {
                error!(error = %err, session = session_id, "failed to queue spectator message");
                None
            }
        }
    }

    /// Unprocessed queue entries, highest priority first, oldest first
    /// within a priority.
    pub fn get_pending_bullet_screens(&self, session_id: &str, limit: usize) -> Vec<BulletMessage> {
        let result = self.conn().and_then(|mut conn| {
            conn.query(
                "SELECT id, session_id, username, message, category, priority, is_processed, \
                        confidence_score, created_at, processed_at \
                 FROM bullet_screen_queue \
                 WHERE session_id = ? AND is_processed = 0 \
                 ORDER BY priority DESC, created_at ASC LIMIT ?",
                &[Value::from(session_id), Value::from(limit)],
            )
        });
        match result {
            Ok(rows) => rows.iter().map(row_to_bullet).collect(),
            Err(err) => {
                error!(error = %err, session = session_id, "failed to load pending spectator messages");
                Vec::new()
            }
        }
    }

    /// Mark a batch of queue entries processed.
    pub fn mark_bullet_screens_processed(&self, ids: &[i64]) -> bool {
        if ids.is_empty() {
            return true;
        }
        let result = self.conn().and_then(|mut conn| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let now = conn.dialect().now();
            let sql = format!(
                "UPDATE bullet_screen_queue SET is_processed = 1, processed_at = {now} \
                 WHERE id IN ({placeholders})"
            );
            let params: Vec<Value> = ids.iter().map(|id| Value::from(*id)).collect();
            conn.execute(&sql, &params)
        });
        match result {
            Ok(_) => true,
            Err(err) => {
                error!(error = %err, "failed to mark spectator messages processed");
                false
            }
        }
    }

    /// Whether a (user, message) pair is banned for the session. The file
    /// overlay is consulted first; the database rules always apply.
    pub fn is_blacklisted(&self, session_id: &str, username: &str, message: &str) -> bool {
        let file: BlacklistFile = overlay::load(&self.blacklist_file());
        if let Some(rules) = file.sessions.get(session_id) {
            let message_lower = message.to_lowercase();
            for rule in rules {
                if rule.pattern.is_empty() {
                    continue;
                }
                match rule.kind.as_str() {
                    "username" if rule.pattern == username => return true,
                    "message" if message_lower.contains(&rule.pattern.to_lowercase()) => {
                        return true
                    }
                    _ => {}
                }
            }
        }

        match self.try_is_blacklisted(session_id, username, message) {
            Ok(banned) => banned,
            Err(err) => {
                error!(error = %err, session = session_id, "blacklist check failed");
                false
            }
        }
    }

    fn try_is_blacklisted(
        &self,
        session_id: &str,
        username: &str,
        message: &str,
    ) -> Result<bool, BarkerError> {
        let mut conn = self.conn()?;

        let banned_user = conn
            .query_one(
                "SELECT COUNT(*) AS cnt FROM blacklist \
                 WHERE session_id = ? AND type = 'username' AND pattern = ?",
                &[Value::from(session_id), Value::from(username)],
            )?
            .and_then(|row| row.i64("cnt"))
            .unwrap_or(0)
            > 0;
        if banned_user {
            return Ok(true);
        }

        let message_lower = message.to_lowercase();
        let rows = conn.query(
            "SELECT pattern FROM blacklist WHERE session_id = ? AND type = 'message'",
            &[Value::from(session_id)],
        )?;
        for row in &rows {
            if let Some(pattern) = row.text("pattern") {
                if !pattern.is_empty() && message_lower.contains(&pattern.to_lowercase()) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Process-wide sensitive terms from the overlay's `_global` list that
    /// occur in the message. Empty means the message is clean.
    pub fn check_sensitive_words(&self, message: &str) -> Vec<String> {
        if message.is_empty() {
            return Vec::new();
        }
        let file: BlacklistFile = overlay::load(&self.blacklist_file());
        let message_lower = message.to_lowercase();
        let matched: Vec<String> = file
            .global_sensitive
            .iter()
            .filter(|word| {
                let trimmed = word.trim();
                !trimmed.is_empty() && message_lower.contains(&trimmed.to_lowercase())
            })
            .cloned()
            .collect();
        if !matched.is_empty() {
            debug!(count = matched.len(), "sensitive words matched");
        }
        matched
    }
}

#[cfg(test)]
#[path = "screen_tests.rs"]
mod screen_tests;
