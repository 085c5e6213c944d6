use thiserror::Error;

/// Unified error type for event-store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection failed (authentication, network, etc.)
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Invalid query syntax or parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Row decoding failed
    #[error("Row decode error: {0}")]
    RowDecode(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create an invalid query error with custom message
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        StoreError::InvalidQuery(msg.into())
    }
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(e) => StoreError::ConnectionFailed(e.to_string()),
            sea_orm::DbErr::TryIntoErr { .. } | sea_orm::DbErr::Type(_) => {
                StoreError::RowDecode(err.to_string())
            }
            other => StoreError::QueryFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
