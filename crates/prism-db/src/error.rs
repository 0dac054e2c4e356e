//! Database error types

use thiserror::Error;

/// Database operation result type
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Database-specific error types
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for DatabaseError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::ConnectionAcquire(_) => {
                DatabaseError::Connection("failed to acquire database connection".to_string())
            }
            sea_orm::DbErr::RecordNotFound(msg) => DatabaseError::NotFound(msg),
            sea_orm::DbErr::Query(query_err) => DatabaseError::Query(query_err.to_string()),
            sea_orm::DbErr::Exec(exec_err) => DatabaseError::Query(exec_err.to_string()),
            sea_orm::DbErr::Conn(conn_err) => DatabaseError::Connection(conn_err.to_string()),
            _ => DatabaseError::Internal(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_not_found_maps_to_not_found() {
        let err: DatabaseError = sea_orm::DbErr::RecordNotFound("message x".to_string()).into();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }
}
