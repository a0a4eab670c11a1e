use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;

/// SQLSTATE / SQLite result codes that mean "retry the transaction".
const RETRYABLE_CODES: &[&str] = &["40001", "40P01", "5", "6", "517"];

/// Errors returned by the closure-table APIs.
#[derive(Debug, Error)]
pub enum ClosureTreeError {
    #[error("closure-table supports PostgreSQL and SQLite connections only")]
    UnsupportedBackend,

    #[error("database error: {0}")]
    Database(DbErr),

    #[error("transaction aborted, safe to retry: {0}")]
    TransactionAbort(DbErr),

    #[error("query builder error: {0}")]
    Query(#[from] sea_orm::sea_query::error::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("{parent} cannot become the parent of {node}: it would create a cycle")]
    Cycle { node: String, parent: String },

    #[error("closure-table integrity violation: {0}")]
    Integrity(String),

    #[error("no node kind is configured for type tag `{0}`")]
    UnknownKind(String),

    #[error("node {0} does not exist")]
    NodeNotFound(String),

    #[error("path cannot be empty")]
    EmptyPath,
}

impl ClosureTreeError {
    pub fn integrity(detail: impl Into<String>) -> Self {
        Self::Integrity(detail.into())
    }

    pub fn cycle(node: impl ToString, parent: impl ToString) -> Self {
        Self::Cycle {
            node: node.to_string(),
            parent: parent.to_string(),
        }
    }

    /// Whether the caller may retry the whole operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionAbort(_))
    }
}

impl From<DbErr> for ClosureTreeError {
    fn from(err: DbErr) -> Self {
        if is_transaction_conflict(&err) {
            Self::TransactionAbort(err)
        } else {
            Self::Database(err)
        }
    }
}

fn is_transaction_conflict(err: &DbErr) -> bool {
    let runtime = match err {
        DbErr::Exec(runtime) | DbErr::Query(runtime) | DbErr::Conn(runtime) => runtime,
        _ => return false,
    };

    match runtime {
        RuntimeErr::SqlxError(sqlx::Error::Database(db_err)) => db_err
            .code()
            .map(|code| RETRYABLE_CODES.iter().any(|known| *known == code))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::error::Error as StdError;

    use sqlx::error::{DatabaseError, ErrorKind};

    use super::*;

    #[derive(Debug, Error)]
    #[error("{message}")]
    struct CodedError {
        code: &'static str,
        message: &'static str,
    }

    impl DatabaseError for CodedError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn coded(code: &'static str) -> DbErr {
        let err = CodedError {
            code,
            message: "could not serialize access",
        };
        DbErr::Exec(RuntimeErr::SqlxError(sqlx::Error::Database(Box::new(err))))
    }

    #[test]
    fn conflict_codes_become_transaction_aborts() {
        for code in ["40001", "40P01", "5", "6", "517"] {
            let err = ClosureTreeError::from(coded(code));
            assert!(
                matches!(err, ClosureTreeError::TransactionAbort(_)),
                "code {code}"
            );
            assert!(err.is_retryable(), "code {code}");
        }
    }

    #[test]
    fn constraint_codes_stay_database_errors() {
        let err = ClosureTreeError::from(coded("23505"));
        assert!(matches!(err, ClosureTreeError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn plain_database_errors_are_not_retryable() {
        let err = ClosureTreeError::from(DbErr::Custom("boom".into()));
        assert!(matches!(err, ClosureTreeError::Database(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn internal_runtime_errors_are_not_conflicts() {
        let err = DbErr::Exec(RuntimeErr::Internal("closed".into()));
        assert!(!is_transaction_conflict(&err));
    }

    #[test]
    fn cycle_message_names_both_nodes() {
        let err = ClosureTreeError::cycle("Project#1", "Task#7");
        assert_eq!(
            err.to_string(),
            "Task#7 cannot become the parent of Project#1: it would create a cycle"
        );
    }
}
