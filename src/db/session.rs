//! Session, product, and conversation storage, plus the append-only
//! product-info disclosure log.

use serde_json::Value as Json;
use tracing::{debug, error, info};

use super::dialect::{Row, StoreConn, Value};
use super::{
    validate_session_input, AttrMap, Conversation, LiveDB, Product, ProductInput, ProductRef,
    ProductType, Session,
};
use crate::error::BarkerError;
use crate::merge::deep_merge;

/// Fold a boundary product payload into one attributes map: parse the map
/// (object or string-encoded JSON), then let a legacy top-level origin alias
/// fill `origin` if the map does not already carry one.
fn normalize_attributes(product: &ProductInput) -> AttrMap {
    let mut attrs = match &product.attributes {
        Json::Object(map) => map.clone(),
        Json::String(raw) if !raw.trim().is_empty() => serde_json::from_str::<Json>(raw)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => AttrMap::new(),
    };
    if let Some(origin) = product.origin.as_deref().filter(|o| !o.is_empty()) {
        attrs
            .entry("origin".to_string())
            .or_insert_with(|| Json::String(origin.to_string()));
    }
    attrs
}

/// Stored attribute text → structured map; malformed text reads as empty.
fn parse_attr_map(raw: Option<String>) -> AttrMap {
    match raw {
        Some(text) if !text.trim().is_empty() => match serde_json::from_str::<Json>(&text) {
            Ok(Json::Object(map)) => map,
            _ => {
                debug!("malformed stored attributes, defaulting to empty map");
                AttrMap::new()
            }
        },
        _ => AttrMap::new(),
    }
}

/// Textual storage form of a disclosure value. Structured values serialize
/// to JSON; strings that themselves carry JSON are re-serialized so the
/// stored form is uniform.
fn encode_info_value(value: &Json) -> String {
    match value {
        Json::String(s) => {
            let trimmed = s.trim();
            let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
                || (trimmed.starts_with('[') && trimmed.ends_with(']'));
            if looks_structured {
                match serde_json::from_str::<Json>(trimmed) {
                    Ok(parsed) => parsed.to_string(),
                    Err(_) => s.clone(),
                }
            } else {
                s.clone()
            }
        }
        Json::Object(_) | Json::Array(_) => value.to_string(),
        other => other.to_string(),
    }
}

/// Stored disclosure text → value for merging (structured text re-parses).
fn decode_info_value(raw: &str) -> Json {
    let trimmed = raw.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_structured {
        serde_json::from_str(trimmed).unwrap_or_else(|_| Json::String(raw.to_string()))
    } else {
        Json::String(raw.to_string())
    }
}

/// Merge one disclosure into an attributes map: object-into-object merges
/// recursively, anything else is last-writer-wins.
fn merge_attr(attrs: &mut AttrMap, key: &str, incoming: Json) {
    let mergeable = incoming.is_object() && attrs.get(key).map_or(false, Json::is_object);
    if mergeable {
        if let Some(slot) = attrs.get_mut(key) {
            deep_merge(slot, incoming);
        }
    } else {
        attrs.insert(key.to_string(), incoming);
    }
}

fn row_to_product(row: &Row) -> Product {
    Product {
        id: row.i64("id").unwrap_or(0),
        product_name: row.text("product_name").unwrap_or_default(),
        price: row.f64("price").unwrap_or(0.0),
        unit: row.text("unit").unwrap_or_else(|| "元".to_string()),
        product_type: row.text("product_type").as_deref().and_then(ProductType::parse),
        attributes: parse_attr_map(row.text("attributes")),
    }
}

fn row_to_conversation(row: &Row) -> Conversation {
    Conversation {
        id: row.i64("id").unwrap_or(0),
        user_message: row.text("user_message"),
        ai_response: row.text("ai_response"),
        audio_url: row.text("audio_url"),
        created_at: row.text("created_at"),
    }
}

fn write_session(
    conn: &mut StoreConn,
    session_id: &str,
    host_name: &str,
    live_theme: &str,
    products: &[ProductInput],
) -> Result<(), BarkerError> {
    conn.execute(
        "INSERT INTO sessions (id, host_name, live_theme) VALUES (?, ?, ?)",
        &[
            Value::from(session_id),
            Value::from(host_name),
            Value::from(live_theme),
        ],
    )?;

    for product in products {
        let attributes = Json::Object(normalize_attributes(product)).to_string();
        conn.execute(
            "INSERT INTO products (session_id, product_name, price, unit, product_type, attributes) \
             VALUES (?, ?, ?, ?, ?, ?)",
            &[
                Value::from(session_id),
                Value::from(product.name.as_str()),
                Value::from(product.price),
                Value::from(product.unit.clone().unwrap_or_else(|| "元".to_string())),
                Value::from(product.product_type.map(ProductType::as_str)),
                Value::from(attributes),
            ],
        )?;
    }
    Ok(())
}

impl LiveDB {
    /// Create a session with its full product catalog in one transaction.
    /// Fails atomically: either the session and every product land, or
    /// nothing does.
    pub fn create_session(
        &self,
        session_id: &str,
        host_name: &str,
        live_theme: &str,
        products: &[ProductInput],
    ) -> bool {
        match self.try_create_session(session_id, host_name, live_theme, products) {
            Ok(()) => {
                info!(session = session_id, products = products.len(), "session created");
                true
            }
            Err(err) => {
                error!(error = %err, session = session_id, "failed to create session");
                false
            }
        }
    }

    fn try_create_session(
        &self,
        session_id: &str,
        host_name: &str,
        live_theme: &str,
        products: &[ProductInput],
    ) -> Result<(), BarkerError> {
        validate_session_input(session_id, products)?;
        let mut conn = self.conn()?;
        conn.begin()?;
        match write_session(&mut conn, session_id, host_name, live_theme, products) {
            Ok(()) => conn.commit(),
            Err(err) => {
                let _ = conn.rollback();
                Err(err)
            }
        }
    }

    /// Load a session with its products (attributes materialized) and full
    /// conversation history in chronological order.
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        match self.try_get_session(session_id) {
            Ok(session) => session,
            Err(err) => {
                error!(error = %err, session = session_id, "failed to load session");
                None
            }
        }
    }

    fn try_get_session(&self, session_id: &str) -> Result<Option<Session>, BarkerError> {
        let mut conn = self.conn()?;
        let Some(row) = conn.query_one(
            "SELECT id, host_name, live_theme, created_at, updated_at FROM sessions WHERE id = ?",
            &[Value::from(session_id)],
        )?
        else {
            return Ok(None);
        };

        let products = conn
            .query(
                "SELECT id, product_name, price, unit, product_type, attributes \
                 FROM products WHERE session_id = ? ORDER BY id",
                &[Value::from(session_id)],
            )?
            .iter()
            .map(row_to_product)
            .collect();

        let conversations = conn
            .query(
                "SELECT id, user_message, ai_response, audio_url, created_at \
                 FROM conversations WHERE session_id = ? ORDER BY created_at, id",
                &[Value::from(session_id)],
            )?
            .iter()
            .map(row_to_conversation)
            .collect();

        Ok(Some(Session {
            id: row.text("id").unwrap_or_else(|| session_id.to_string()),
            host_name: row.text("host_name").unwrap_or_default(),
            live_theme: row.text("live_theme").unwrap_or_default(),
            created_at: row.text("created_at"),
            updated_at: row.text("updated_at"),
            products,
            conversations,
        }))
    }

    /// Append one exchange to the session's conversation history.
    pub fn save_conversation(
        &self,
        session_id: &str,
        user_message: &str,
        ai_response: &str,
        audio_url: Option<&str>,
    ) -> bool {
        let result = self.conn().and_then(|mut conn| {
            conn.execute(
                "INSERT INTO conversations (session_id, user_message, ai_response, audio_url) \
                 VALUES (?, ?, ?, ?)",
                &[
                    Value::from(session_id),
                    Value::from(user_message),
                    Value::from(ai_response),
                    Value::from(audio_url),
                ],
            )
        });
        match result {
            Ok(_) => {
                debug!(session = session_id, "conversation saved");
                true
            }
            Err(err) => {
                error!(error = %err, session = session_id, "failed to save conversation");
                false
            }
        }
    }

    /// Record one incremental attribute disclosure. The entry is always
    /// appended to the log; when the product resolves, the disclosure is
    /// also merged into its stored attributes.
    pub fn save_product_info(
        &self,
        session_id: &str,
        product: &ProductRef,
        info_key: &str,
        info_value: &Json,
    ) -> bool {
        match self.try_save_product_info(session_id, product, info_key, info_value) {
            Ok(product_id) => {
                info!(
                    session = session_id,
                    product_id, key = info_key, "product info saved"
                );
                true
            }
            Err(err) => {
                error!(error = %err, session = session_id, "failed to save product info");
                false
            }
        }
    }

    fn try_save_product_info(
        &self,
        session_id: &str,
        product: &ProductRef,
        info_key: &str,
        info_value: &Json,
    ) -> Result<Option<i64>, BarkerError> {
        if session_id.trim().is_empty() || info_key.trim().is_empty() {
            return Err(BarkerError::Validation(
                "session id and info key must not be empty".into(),
            ));
        }

        let mut conn = self.conn()?;
        let product_row = resolve_product(&mut conn, session_id, product)?;
        let product_id = product_row.as_ref().and_then(|r| r.i64("id"));
        let store_value = encode_info_value(info_value);
        let name_param = match product {
            ProductRef::Name(name) => Value::from(name.as_str()),
            ProductRef::Id(_) => Value::Null,
        };

        conn.begin()?;
        let result = (|| -> Result<(), BarkerError> {
            conn.execute(
                "INSERT INTO product_info (session_id, product_id, product_name, info_key, info_value) \
                 VALUES (?, ?, ?, ?, ?)",
                &[
                    Value::from(session_id),
                    Value::from(product_id),
                    name_param.clone(),
                    Value::from(info_key),
                    Value::from(store_value.as_str()),
                ],
            )?;

            if let (Some(id), Some(row)) = (product_id, product_row.as_ref()) {
                let mut attrs = parse_attr_map(row.text("attributes"));
                merge_attr(&mut attrs, info_key, decode_info_value(&store_value));
                conn.execute(
                    "UPDATE products SET attributes = ? WHERE id = ?",
                    &[
                        Value::from(Json::Object(attrs).to_string()),
                        Value::from(id),
                    ],
                )?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                conn.commit()?;
                Ok(product_id)
            }
            Err(err) => {
                let _ = conn.rollback();
                Err(err)
            }
        }
    }

    /// Merged view of a product's attributes: the stored map overlaid with
    /// every disclosure from the log in chronological order, so later
    /// disclosures win leaf conflicts while nested siblings accumulate.
    pub fn get_product_info(&self, session_id: &str, product: &ProductRef) -> AttrMap {
        match self.try_get_product_info(session_id, product) {
            Ok(attrs) => attrs,
            Err(err) => {
                error!(error = %err, session = session_id, "failed to load product info");
                AttrMap::new()
            }
        }
    }

    fn try_get_product_info(
        &self,
        session_id: &str,
        product: &ProductRef,
    ) -> Result<AttrMap, BarkerError> {
        if session_id.trim().is_empty() {
            return Ok(AttrMap::new());
        }

        let mut conn = self.conn()?;
        let product_row = resolve_product(&mut conn, session_id, product)?;
        let product_id = match product {
            ProductRef::Id(id) => Some(*id),
            ProductRef::Name(_) => product_row.as_ref().and_then(|r| r.i64("id")),
        };

        let mut attrs = product_row
            .as_ref()
            .map(|r| parse_attr_map(r.text("attributes")))
            .unwrap_or_default();

        let Some(product_id) = product_id else {
            return Ok(attrs);
        };

        let log = conn.query(
            "SELECT info_key, info_value FROM product_info \
             WHERE session_id = ? AND product_id = ? ORDER BY created_at, id",
            &[Value::from(session_id), Value::from(product_id)],
        )?;
        for entry in &log {
            let Some(key) = entry.text("info_key") else {
                continue;
            };
            let Some(raw) = entry.text("info_value") else {
                continue;
            };
            merge_attr(&mut attrs, &key, decode_info_value(&raw));
        }
        Ok(attrs)
    }
}

fn resolve_product(
    conn: &mut StoreConn,
    session_id: &str,
    product: &ProductRef,
) -> Result<Option<Row>, BarkerError> {
    match product {
        ProductRef::Id(id) => conn.query_one(
            "SELECT id, attributes FROM products WHERE id = ? AND session_id = ?",
            &[Value::from(*id), Value::from(session_id)],
        ),
        ProductRef::Name(name) => conn.query_one(
            "SELECT id, attributes FROM products WHERE product_name = ? AND session_id = ? LIMIT 1",
            &[Value::from(name.as_str()), Value::from(session_id)],
        ),
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
