//! Typed persistence failures.
//!
//! Every `sqlx::Error` that leaves the `db` module is classified into a
//! [`DbError`] so the HTTP boundary can translate it without knowing driver
//! details.

use sqlx::error::{DatabaseError, ErrorKind};
use thiserror::Error;

/// Postgres `too_many_connections`.
const TOO_MANY_CONNECTIONS: &str = "53300";
/// Postgres `query_canceled`, raised when `statement_timeout` fires.
const QUERY_CANCELED: &str = "57014";

#[derive(Debug, Error)]
pub enum DbError {
    /// Pool exhaustion or statement timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The pool was closed or never opened.
    #[error("resource closed")]
    ResourceClosed,

    #[error("too many connections: {0}")]
    TooManyConnections(String),

    /// Constraint violation. `cause` keeps the driver's rendering of the
    /// root cause, prefixed by the error's repr and the `> : ` delimiter.
    #[error("{cause}")]
    Integrity { unique: bool, cause: String },

    /// Transport level failure between us and the server.
    #[error("{0}")]
    Interface(String),

    /// Any other error reported by the driver or the server.
    #[error("{0}")]
    Api(String),
}

impl DbError {
    pub fn is_overload(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::ResourceClosed | Self::TooManyConnections(_)
        )
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Integrity { unique: true, .. })
    }

    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            Self::Integrity { .. } | Self::Interface(_) | Self::Api(_)
        )
    }

    /// Text of the underlying cause, as the driver rendered it.
    pub fn root_cause(&self) -> String {
        match self {
            Self::Integrity { cause, .. } => cause.clone(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                Self::Timeout("timed out waiting for a pooled connection".to_string())
            }
            sqlx::Error::PoolClosed => Self::ResourceClosed,
            sqlx::Error::Database(db_err) => classify_database_error(db_err.as_ref()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => Self::Interface(err.to_string()),
            other => Self::Api(other.to_string()),
        }
    }
}

fn classify_database_error(db_err: &dyn DatabaseError) -> DbError {
    let code = db_err.code().map(|c| c.into_owned());
    let message = db_err.message().to_string();

    match code.as_deref() {
        Some(TOO_MANY_CONNECTIONS) => return DbError::TooManyConnections(message),
        Some(QUERY_CANCELED) => return DbError::Timeout(message),
        _ => {}
    }

    let repr = |kind: &str| match &code {
        Some(code) => format!("<{kind} {code}> : {message}"),
        None => format!("<{kind}> : {message}"),
    };

    match db_err.kind() {
        ErrorKind::UniqueViolation => DbError::Integrity {
            unique: true,
            cause: repr("UniqueViolation"),
        },
        ErrorKind::ForeignKeyViolation => DbError::Integrity {
            unique: false,
            cause: repr("ForeignKeyViolation"),
        },
        ErrorKind::NotNullViolation => DbError::Integrity {
            unique: false,
            cause: repr("NotNullViolation"),
        },
        ErrorKind::CheckViolation => DbError::Integrity {
            unique: false,
            cause: repr("CheckViolation"),
        },
        _ => DbError::Api(message),
    }
}
