//! Dialect adapter over the two backing engines.
//!
//! Statements are authored once against a neutral surface: `?` placeholders
//! (native to both drivers) with typed [`Value`] parameters. The fragments
//! that genuinely diverge between engines (the current-timestamp function,
//! `LIKE` pattern concatenation, the meta-table upsert form, DDL) are
//! produced by [`Dialect`] methods or per-dialect statement lists, never by
//! rewriting SQL text.

use std::sync::Arc;

use mysql::prelude::Queryable;

use crate::error::BarkerError;

/// The active engine's SQL flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Mysql,
    Sqlite,
}

impl Dialect {
    /// Current-timestamp function usable in DML.
    pub fn now(self) -> &'static str {
        match self {
            Dialect::Mysql => "NOW()",
            Dialect::Sqlite => "CURRENT_TIMESTAMP",
        }
    }

    /// A `LIKE` pattern matching rows where `expr` occurs as a substring.
    pub fn like_contains(self, expr: &str) -> String {
        match self {
            Dialect::Mysql => format!("CONCAT('%', {expr}, '%')"),
            Dialect::Sqlite => format!("'%' || {expr} || '%'"),
        }
    }

    /// Upsert statement for the key/value meta table (two text params).
    pub fn upsert_meta(self) -> &'static str {
        match self {
            Dialect::Mysql => {
                "INSERT INTO barker_meta (meta_key, meta_value) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE meta_value = VALUES(meta_value)"
            }
            Dialect::Sqlite => {
                "INSERT OR REPLACE INTO barker_meta (meta_key, meta_value) VALUES (?, ?)"
            }
        }
    }
}

/// Backend-neutral statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn to_mysql(&self) -> mysql::Value {
        match self {
            Value::Null => mysql::Value::NULL,
            Value::Int(i) => mysql::Value::Int(*i),
            Value::Float(f) => mysql::Value::Double(*f),
            Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        }
    }

    fn from_mysql(value: mysql::Value) -> Self {
        match value {
            mysql::Value::NULL => Value::Null,
            mysql::Value::Bytes(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
            mysql::Value::Int(i) => Value::Int(i),
            mysql::Value::UInt(u) => Value::Int(u as i64),
            mysql::Value::Float(f) => Value::Float(f64::from(f)),
            mysql::Value::Double(d) => Value::Float(d),
            mysql::Value::Date(y, mo, d, h, mi, s, _) => {
                Value::Text(format!("{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"))
            }
            mysql::Value::Time(neg, days, h, mi, s, _) => {
                let sign = if neg { "-" } else { "" };
                Value::Text(format!("{sign}{:02}:{mi:02}:{s:02}", u32::from(h) + days * 24))
            }
        }
    }

    fn from_sqlite(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl rusqlite::types::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, ValueRef};
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Int(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(i64::from(b))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Null, Into::into)
    }
}

/// One result row: a shared column header plus neutral cells.
///
/// Typed accessors absorb engine representation quirks: MySQL `DECIMAL` and
/// `TIMESTAMP` cells arrive as text and are parsed on demand.
#[derive(Debug, Clone)]
pub struct Row {
    cols: Arc<Vec<String>>,
    vals: Vec<Value>,
}

impl Row {
    fn index_of(&self, name: &str) -> Option<usize> {
        self.cols.iter().position(|c| c == name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.index_of(name).map(|i| &self.vals[i])
    }

    pub fn text(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            Value::Text(s) => Some(s.clone()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Null => None,
        }
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.value(name)? {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        match self.value(name)? {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Boolean column (stored as `BOOLEAN`/`INTEGER` depending on engine).
    pub fn flag(&self, name: &str) -> bool {
        self.i64(name).unwrap_or(0) != 0
    }
}

/// Outcome of a mutating statement.
#[derive(Debug, Clone, Copy)]
pub struct ExecResult {
    pub affected: u64,
    pub last_insert_id: Option<i64>,
}

/// A live connection to whichever engine is active.
///
/// Primary connections come from the pool; fallback connections are fresh
/// per-call handles. Either way the handle is released on drop, so every
/// exit path, including `?` returns, gives the connection back.
pub enum StoreConn {
    Mysql(mysql::PooledConn),
    Sqlite(rusqlite::Connection),
}

impl StoreConn {
    pub fn dialect(&self) -> Dialect {
        match self {
            StoreConn::Mysql(_) => Dialect::Mysql,
            StoreConn::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Run a mutating statement with neutral parameters.
    pub fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecResult, BarkerError> {
        match self {
            StoreConn::Mysql(conn) => {
                let bound: Vec<mysql::Value> = params.iter().map(Value::to_mysql).collect();
                let result = conn.exec_iter(sql, bound)?;
                Ok(ExecResult {
                    affected: result.affected_rows(),
                    last_insert_id: result.last_insert_id().map(|id| id as i64),
                })
            }
            StoreConn::Sqlite(conn) => {
                let affected =
                    conn.execute(sql, rusqlite::params_from_iter(params.iter()))? as u64;
                let rowid = conn.last_insert_rowid();
                Ok(ExecResult {
                    affected,
                    last_insert_id: (rowid != 0).then_some(rowid),
                })
            }
        }
    }

    /// Run a statement with no parameters and no result set (DDL, pragmas,
    /// transaction control). Uses the text protocol on the primary so DDL
    /// never passes through the prepared-statement path.
    pub fn execute_raw(&mut self, sql: &str) -> Result<(), BarkerError> {
        match self {
            StoreConn::Mysql(conn) => conn.query_drop(sql).map_err(Into::into),
            StoreConn::Sqlite(conn) => conn.execute_batch(sql).map_err(Into::into),
        }
    }

    /// Run a query and materialize every row.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BarkerError> {
        match self {
            StoreConn::Mysql(conn) => {
                let bound: Vec<mysql::Value> = params.iter().map(Value::to_mysql).collect();
                let rows: Vec<mysql::Row> = conn.exec(sql, bound)?;
                let mut out = Vec::with_capacity(rows.len());
                let mut header: Option<Arc<Vec<String>>> = None;
                for row in rows {
                    let cols = header
                        .get_or_insert_with(|| {
                            Arc::new(
                                row.columns_ref()
                                    .iter()
                                    .map(|c| c.name_str().into_owned())
                                    .collect(),
                            )
                        })
                        .clone();
                    let vals = row.unwrap().into_iter().map(Value::from_mysql).collect();
                    out.push(Row { cols, vals });
                }
                Ok(out)
            }
            StoreConn::Sqlite(conn) => {
                let mut stmt = conn.prepare(sql)?;
                let cols: Arc<Vec<String>> = Arc::new(
                    stmt.column_names()
                        .iter()
                        .map(|c| c.to_string())
                        .collect(),
                );
                let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut vals = Vec::with_capacity(cols.len());
                    for i in 0..cols.len() {
                        vals.push(Value::from_sqlite(row.get_ref(i)?));
                    }
                    out.push(Row {
                        cols: Arc::clone(&cols),
                        vals,
                    });
                }
                Ok(out)
            }
        }
    }

    /// Run a query expected to yield at most one row.
    pub fn query_one(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>, BarkerError> {
        Ok(self.query(sql, params)?.into_iter().next())
    }

    pub fn begin(&mut self) -> Result<(), BarkerError> {
        match self {
            StoreConn::Mysql(_) => self.execute_raw("START TRANSACTION"),
            StoreConn::Sqlite(_) => self.execute_raw("BEGIN"),
        }
    }

    pub fn commit(&mut self) -> Result<(), BarkerError> {
        self.execute_raw("COMMIT")
    }

    pub fn rollback(&mut self) -> Result<(), BarkerError> {
        self.execute_raw("ROLLBACK")
    }
}
