#[derive(Debug, thiserror::Error)]
pub enum BarkerError {
    #[error("primary engine error: {0}")]
    Mysql(#[from] mysql::Error),

    #[error("fallback engine error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid stored json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}
