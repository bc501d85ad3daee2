//! Curated FAQ resolution and maintenance.
//!
//! Resolution walks an ordered chain of lookup tiers (the file overlay
//! first, then the database table) and both tiers feed the same pure
//! candidate-selection function, so the matching semantics cannot drift
//! between them.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use super::dialect::{Row, Value};
use super::{FaqRecommendation, FaqReport, FaqTemplate, FaqTotals, FaqUsage, LiveDB, ProductType};
use crate::error::BarkerError;
use crate::overlay::{self, WhitelistFile};

struct FaqCandidate {
    id: Option<i64>,
    pattern: String,
    answer: String,
    priority: i64,
    product_types: Option<String>,
}

/// An entry with declared category tags only applies when the session sells
/// at least one of them. No declared tags, or no known session categories,
/// means "always applicable".
fn type_gate(declared: Option<&str>, session_types: &HashSet<String>) -> bool {
    match declared {
        None => true,
        Some(tags) if tags.trim().is_empty() => true,
        Some(tags) => {
            if session_types.is_empty() {
                return true;
            }
            tags.split(',')
                .map(str::trim)
                .any(|tag| !tag.is_empty() && session_types.contains(tag))
        }
    }
}

/// Select the winning candidate: case-insensitive substring match, then the
/// lexicographically greatest (priority, pattern length) pair. Length counts
/// characters so a longer CJK pattern beats a shorter one at equal priority.
fn pick_best<'a>(
    candidates: &'a [FaqCandidate],
    message: &str,
    session_types: &HashSet<String>,
) -> Option<&'a FaqCandidate> {
    let message = message.to_lowercase();
    let mut best: Option<(&FaqCandidate, (i64, usize))> = None;
    for candidate in candidates {
        if candidate.pattern.is_empty() {
            continue;
        }
        if !type_gate(candidate.product_types.as_deref(), session_types) {
            continue;
        }
        if !message.contains(&candidate.pattern.to_lowercase()) {
            continue;
        }
        let score = (candidate.priority, candidate.pattern.chars().count());
        if best.as_ref().map_or(true, |(_, top)| score > *top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(candidate, _)| candidate)
}

/// One tier in the resolution chain. A tier that errors internally reports
/// no match and the chain moves on.
trait FaqTier {
    fn name(&self) -> &'static str;
    fn lookup(
        &self,
        db: &LiveDB,
        session_id: &str,
        message: &str,
        session_types: &HashSet<String>,
    ) -> Option<String>;
}

struct OverlayTier;

impl FaqTier for OverlayTier {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn lookup(
        &self,
        db: &LiveDB,
        session_id: &str,
        message: &str,
        session_types: &HashSet<String>,
    ) -> Option<String> {
        let file: WhitelistFile = overlay::load(&db.whitelist_file());
        let entries = file.sessions.get(session_id)?;
        let candidates: Vec<FaqCandidate> = entries
            .iter()
            .map(|entry| FaqCandidate {
                id: None,
                pattern: entry.pattern.clone(),
                answer: entry.answer.clone(),
                priority: entry.priority,
                product_types: entry.product_types.clone(),
            })
            .collect();
        pick_best(&candidates, message, session_types).map(|c| c.answer.clone())
    }
}

struct TableTier;

impl FaqTier for TableTier {
    fn name(&self) -> &'static str {
        "table"
    }

    fn lookup(
        &self,
        db: &LiveDB,
        session_id: &str,
        message: &str,
        session_types: &HashSet<String>,
    ) -> Option<String> {
        match table_lookup(db, session_id, message, session_types) {
            Ok(answer) => answer,
            Err(err) => {
                error!(error = %err, session = session_id, "whitelist table lookup failed");
                None
            }
        }
    }
}

fn table_lookup(
    db: &LiveDB,
    session_id: &str,
    message: &str,
    session_types: &HashSet<String>,
) -> Result<Option<String>, BarkerError> {
    let mut conn = db.conn()?;
    let rows = conn.query(
        "SELECT id, pattern, answer, priority, product_types FROM whitelist WHERE session_id = ?",
        &[Value::from(session_id)],
    )?;
    let candidates: Vec<FaqCandidate> = rows
        .iter()
        .map(|row| FaqCandidate {
            id: row.i64("id"),
            pattern: row.text("pattern").unwrap_or_default(),
            answer: row.text("answer").unwrap_or_default(),
            priority: row.i64("priority").unwrap_or(0),
            product_types: row.text("product_types"),
        })
        .collect();

    let Some(best) = pick_best(&candidates, message, session_types) else {
        return Ok(None);
    };

    // Advisory telemetry: a failed update must not suppress the answer.
    if let Some(id) = best.id {
        let now = conn.dialect().now();
        let sql =
            format!("UPDATE whitelist SET hit_count = hit_count + 1, last_hit_at = {now} WHERE id = ?");
        match conn.execute(&sql, &[Value::from(id)]) {
            Ok(_) => debug!(id, "faq hit recorded"),
            Err(err) => warn!(error = %err, id, "failed to update faq hit statistics"),
        }
    }
    Ok(Some(best.answer.clone()))
}

/// Substitute `{placeholder}` tokens from `values`. Returns `None` when any
/// referenced placeholder is absent, so the caller can skip that template.
pub fn render_template(template: &str, values: &HashMap<String, String>) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push('{');
            rest = after;
            continue;
        };
        out.push_str(values.get(&after[..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Some(out)
}

fn row_to_usage(row: &Row) -> FaqUsage {
    FaqUsage {
        pattern: row.text("pattern").unwrap_or_default(),
        answer: row.text("answer").unwrap_or_default(),
        hit_count: row.i64("hit_count").unwrap_or(0),
        last_hit_at: row.text("last_hit_at"),
        product_types: row.text("product_types"),
        host_name: row.text("host_name"),
        live_theme: row.text("live_theme"),
    }
}

impl LiveDB {
    /// Resolve a message against the session's curated patterns. `None` is
    /// the normal miss outcome, not an error.
    pub fn get_whitelist_answer(&self, session_id: &str, message: &str) -> Option<String> {
        let session_types = self.session_product_types(session_id);
        let tiers: [&dyn FaqTier; 2] = [&OverlayTier, &TableTier];
        for tier in tiers {
            if let Some(answer) = tier.lookup(self, session_id, message, &session_types) {
                debug!(tier = tier.name(), session = session_id, "whitelist matched");
                return Some(answer);
            }
        }
        None
    }

    /// Active answer templates for one category, highest priority first.
    pub fn get_faq_templates(&self, product_type: ProductType) -> Vec<FaqTemplate> {
        let result = self.conn().and_then(|mut conn| {
            conn.query(
                "SELECT product_type, pattern, answer_template, placeholder, priority \
                 FROM faq_templates WHERE product_type = ? AND is_active <> 0 \
                 ORDER BY priority DESC",
                &[Value::from(product_type.as_str())],
            )
        });
        match result {
            Ok(rows) => rows
                .iter()
                .filter_map(|row| {
                    Some(FaqTemplate {
                        product_type: ProductType::parse(&row.text("product_type")?)?,
                        pattern: row.text("pattern")?,
                        answer_template: row.text("answer_template")?,
                        placeholder: row.text("placeholder"),
                        priority: row.i64("priority").unwrap_or(80),
                    })
                })
                .collect(),
            Err(err) => {
                error!(error = %err, "failed to load faq templates");
                Vec::new()
            }
        }
    }

    /// Instantiate every active template of the category for this session.
    /// Templates with unsatisfied placeholders, and patterns the session
    /// already has, are skipped; partial application is the expected case.
    /// Returns the number of newly inserted whitelist entries.
    pub fn apply_faq_templates(
        &self,
        session_id: &str,
        product_type: ProductType,
        values: &HashMap<String, String>,
    ) -> usize {
        match self.try_apply_faq_templates(session_id, product_type, values) {
            Ok(applied) => applied,
            Err(err) => {
                error!(error = %err, session = session_id, "failed to apply faq templates");
                0
            }
        }
    }

    fn try_apply_faq_templates(
        &self,
        session_id: &str,
        product_type: ProductType,
        values: &HashMap<String, String>,
    ) -> Result<usize, BarkerError> {
        let mut conn = self.conn()?;
        let templates = conn.query(
            "SELECT pattern, answer_template, priority FROM faq_templates \
             WHERE product_type = ? AND is_active <> 0",
            &[Value::from(product_type.as_str())],
        )?;

        let mut applied = 0usize;
        let mut skipped = 0usize;
        for template in &templates {
            let Some(pattern) = template.text("pattern") else {
                continue;
            };
            let Some(body) = template.text("answer_template") else {
                continue;
            };
            let Some(answer) = render_template(&body, values) else {
                skipped += 1;
                debug!(%pattern, "template placeholder unsatisfied, skipped");
                continue;
            };

            let exists = conn
                .query_one(
                    "SELECT COUNT(*) AS cnt FROM whitelist WHERE session_id = ? AND pattern = ?",
                    &[Value::from(session_id), Value::from(pattern.as_str())],
                )?
                .and_then(|row| row.i64("cnt"))
                .unwrap_or(0)
                > 0;
            if exists {
                continue;
            }

            conn.execute(
                "INSERT INTO whitelist (session_id, pattern, answer, priority, product_types) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    Value::from(session_id),
                    Value::from(pattern),
                    Value::from(answer),
                    Value::from(template.i64("priority").unwrap_or(80)),
                    Value::from(product_type.as_str()),
                ],
            )?;
            applied += 1;
        }

        info!(session = session_id, applied, skipped, "faq templates applied");
        Ok(applied)
    }

    /// Hit statistics: per-session totals with hot/unused entry lists, or
    /// the cross-session overview when no session is given.
    pub fn get_faq_statistics(&self, session_id: Option<&str>) -> Option<FaqReport> {
        match self.try_get_faq_statistics(session_id) {
            Ok(report) => Some(report),
            Err(err) => {
                error!(error = %err, "failed to collect faq statistics");
                None
            }
        }
    }

    fn try_get_faq_statistics(&self, session_id: Option<&str>) -> Result<FaqReport, BarkerError> {
        let mut conn = self.conn()?;

        if let Some(sid) = session_id {
            let totals = conn
                .query_one(
                    "SELECT COUNT(*) AS total_faqs, \
                            COALESCE(SUM(hit_count), 0) AS total_hits, \
                            COALESCE(AVG(hit_count), 0) AS avg_hits, \
                            COALESCE(MAX(hit_count), 0) AS max_hits, \
                            COUNT(CASE WHEN hit_count > 0 THEN 1 END) AS used_faqs, \
                            COUNT(CASE WHEN hit_count = 0 THEN 1 END) AS unused_faqs \
                     FROM whitelist WHERE session_id = ?",
                    &[Value::from(sid)],
                )?
                .map(|row| FaqTotals {
                    total_faqs: row.i64("total_faqs").unwrap_or(0),
                    total_hits: row.i64("total_hits").unwrap_or(0),
                    avg_hits: row.f64("avg_hits").unwrap_or(0.0),
                    max_hits: row.i64("max_hits").unwrap_or(0),
                    used_faqs: row.i64("used_faqs").unwrap_or(0),
                    unused_faqs: row.i64("unused_faqs").unwrap_or(0),
                    sessions: 0,
                })
                .unwrap_or_default();

            let hot_faqs = conn
                .query(
                    "SELECT pattern, answer, hit_count, last_hit_at, product_types \
                     FROM whitelist WHERE session_id = ? AND hit_count > 0 \
                     ORDER BY hit_count DESC LIMIT 10",
                    &[Value::from(sid)],
                )?
                .iter()
                .map(row_to_usage)
                .collect();

            let unused_faqs = conn
                .query(
                    "SELECT pattern, answer, hit_count, last_hit_at, product_types \
                     FROM whitelist WHERE session_id = ? AND hit_count = 0 \
                     ORDER BY created_at DESC LIMIT 10",
                    &[Value::from(sid)],
                )?
                .iter()
                .map(row_to_usage)
                .collect();

            return Ok(FaqReport {
                session_id: Some(sid.to_string()),
                totals,
                hot_faqs,
                unused_faqs,
            });
        }

        let totals = conn
            .query_one(
                "SELECT COUNT(*) AS total_faqs, \
                        COALESCE(SUM(hit_count), 0) AS total_hits, \
                        COALESCE(AVG(hit_count), 0) AS avg_hits, \
                        COALESCE(MAX(hit_count), 0) AS max_hits, \
                        COUNT(CASE WHEN hit_count > 0 THEN 1 END) AS used_faqs, \
                        COUNT(CASE WHEN hit_count = 0 THEN 1 END) AS unused_faqs, \
                        COUNT(DISTINCT session_id) AS sessions \
                 FROM whitelist",
                &[],
            )?
            .map(|row| FaqTotals {
                total_faqs: row.i64("total_faqs").unwrap_or(0),
                total_hits: row.i64("total_hits").unwrap_or(0),
                avg_hits: row.f64("avg_hits").unwrap_or(0.0),
                max_hits: row.i64("max_hits").unwrap_or(0),
                used_faqs: row.i64("used_faqs").unwrap_or(0),
                unused_faqs: row.i64("unused_faqs").unwrap_or(0),
                sessions: row.i64("sessions").unwrap_or(0),
            })
            .unwrap_or_default();

        let hot_faqs = conn
            .query(
                "SELECT w.pattern, w.answer, w.hit_count, w.last_hit_at, w.product_types, \
                        s.host_name, s.live_theme \
                 FROM whitelist w LEFT JOIN sessions s ON w.session_id = s.id \
                 WHERE w.hit_count > 0 ORDER BY w.hit_count DESC LIMIT 20",
                &[],
            )?
            .iter()
            .map(row_to_usage)
            .collect();

        Ok(FaqReport {
            session_id: None,
            totals,
            hot_faqs,
            unused_faqs: Vec::new(),
        })
    }

    /// Promotion candidates: cached answers with at least `min_hit_count`
    /// hits whose question is not already covered by a whitelist pattern.
    pub fn get_faq_recommendations(
        &self,
        session_id: &str,
        min_hit_count: i64,
    ) -> Vec<FaqRecommendation> {
        match self.try_get_faq_recommendations(session_id, min_hit_count) {
            Ok(recommendations) => recommendations,
            Err(err) => {
                error!(error = %err, session = session_id, "failed to load faq recommendations");
                Vec::new()
            }
        }
    }

    fn try_get_faq_recommendations(
        &self,
        session_id: &str,
        min_hit_count: i64,
    ) -> Result<Vec<FaqRecommendation>, BarkerError> {
        let mut conn = self.conn()?;
        let covered = conn.dialect().like_contains("LOWER(w.pattern)");
        let sql = format!(
            "SELECT q.question, q.answer, q.hit_count, q.last_used_at FROM qa_cache q \
             WHERE q.session_id = ? AND q.hit_count >= ? \
               AND NOT EXISTS (SELECT 1 FROM whitelist w \
                               WHERE w.session_id = q.session_id \
                                 AND LOWER(q.question) LIKE {covered}) \
             ORDER BY q.hit_count DESC LIMIT 20"
        );
        let rows = conn.query(
            &sql,
            &[Value::from(session_id), Value::from(min_hit_count)],
        )?;
        Ok(rows
            .iter()
            .map(|row| FaqRecommendation {
                question: row.text("question").unwrap_or_default(),
                answer: row.text("answer").unwrap_or_default(),
                hit_count: row.i64("hit_count").unwrap_or(0),
                last_used_at: row.text("last_used_at"),
            })
            .collect())
    }
}

#[cfg(test)]
#[path = "faq_tests.rs"]
mod faq_tests;
