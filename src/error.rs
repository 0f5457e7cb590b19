//! Error taxonomy for the unlock transaction

use std::collections::BTreeMap;

use thiserror::Error;

pub const ORDERING_MESSAGE: &str = "Hints have to be unlocked in cost order";
pub const ALREADY_UNLOCKED_MESSAGE: &str = "You have already unlocked this hint";
pub const INSUFFICIENT_BALANCE_MESSAGE: &str = "You do not have enough points to unlock this hint";

#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("{what} not found")]
    NotFound { field: &'static str, what: String },

    #[error("{}", ORDERING_MESSAGE)]
    OrderingViolation,

    #[error("{}", ALREADY_UNLOCKED_MESSAGE)]
    AlreadyUnlocked,

    #[error("{}", INSUFFICIENT_BALANCE_MESSAGE)]
    InsufficientBalance { cost: i64, score: i64 },

    #[error("Invalid request: {0:?}")]
    ValidationFailure(BTreeMap<String, String>),

    #[error("Concurrent purchase conflicted at commit")]
    PersistenceConflict,

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Short machine-readable name of an error kind, used in logs and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    OrderingViolation,
    AlreadyUnlocked,
    InsufficientBalance,
    ValidationFailure,
    PersistenceConflict,
    Storage,
}

impl UnlockError {
    pub fn not_found(field: &'static str, what: impl Into<String>) -> Self {
        Self::NotFound {
            field,
            what: what.into(),
        }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.into());
        Self::ValidationFailure(errors)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::OrderingViolation => ErrorKind::OrderingViolation,
            Self::AlreadyUnlocked => ErrorKind::AlreadyUnlocked,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::ValidationFailure(_) => ErrorKind::ValidationFailure,
            Self::PersistenceConflict => ErrorKind::PersistenceConflict,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Commit-time races are the only failures worth re-running
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceConflict)
    }

    /// HTTP-equivalent status code
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::OrderingViolation
            | Self::AlreadyUnlocked
            | Self::InsufficientBalance { .. }
            | Self::ValidationFailure(_) => 400,
            Self::PersistenceConflict => 409,
            Self::Storage(_) => 500,
        }
    }

    /// Field-scoped messages for the `errors` object of a failed response
    pub fn field_errors(&self) -> BTreeMap<String, String> {
        match self {
            Self::ValidationFailure(errors) => errors.clone(),
            Self::NotFound { field, .. } => single(field, self.to_string()),
            Self::OrderingViolation | Self::AlreadyUnlocked | Self::InsufficientBalance { .. } => {
                single("score", self.to_string())
            }
            Self::PersistenceConflict => single("target", self.to_string()),
            // Storage details stay in the logs
            Self::Storage(_) => single("internal", "Internal server error".to_string()),
        }
    }
}

fn single(field: &str, message: String) -> BTreeMap<String, String> {
    let mut errors = BTreeMap::new();
    errors.insert(field.to_string(), message);
    errors
}

/// Translate a write failure into a conflict when a concurrent purchase beat us
pub(crate) fn classify_write_error(err: rusqlite::Error) -> UnlockError {
    if let rusqlite::Error::SqliteFailure(ref failure, _) = err {
        let unique = failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY;
        let busy = matches!(
            failure.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        );
        if unique || busy {
            return UnlockError::PersistenceConflict;
        }
    }
    UnlockError::Storage(err)
}
