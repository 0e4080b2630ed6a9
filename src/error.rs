//! Error types.

use derive_more::{Display, From};

use crate::models::ThreadRef;
use crate::validate::{ValidationError, ValidationErrors};

/// Our error type.
#[derive(Debug, Display, From)]
pub enum Error {
    #[display(fmt = "{}", _0)]
    #[from]
    Invalid(ValidationErrors),
    #[display(fmt = "Board {} not found", board)]
    BoardNotFound { board: String },
    #[display(fmt = "No default board is configured")]
    NoDefaultBoard,
    #[display(fmt = "A board with slug {} already exists", slug)]
    BoardExists { slug: String },
    #[display(fmt = "Thread {} not found", thread)]
    ThreadNotFound { thread: ThreadRef },
    #[display(fmt = "The in-memory store lock was poisoned")]
    StoreLockPoisoned,
    #[display(fmt = "Config file {} has an invalid {}: {}", path, key, reason)]
    ConfigInvalid {
        path: String,
        key: String,
        reason: String,
    },
    #[display(fmt = "Database error: {}", _0)]
    #[from]
    DatabaseError(diesel::result::Error),
    #[display(fmt = "Database connection pool error: {}", _0)]
    #[from]
    R2d2Error(r2d2::Error),
    #[display(fmt = "Couldn't connect to the PostgreSQL database: {}", _0)]
    #[from]
    ConnectionError(diesel::ConnectionError),
    #[display(fmt = "Database migration error: {}", _0)]
    DatabaseMigrationError(String),
    #[display(fmt = "YAML error: {}", _0)]
    #[from]
    YamlError(serde_yaml::Error),
    #[display(fmt = "JSON error: {}", _0)]
    #[from]
    JsonError(serde_json::Error),
    #[display(fmt = "Couldn't initialize logging: {}", _0)]
    #[from]
    LogError(log::SetLoggerError),
    #[display(fmt = "I/O error: {}", _0)]
    #[from]
    IoError(std::io::Error),
    #[display(fmt = "I/O error: {}: {}", msg, cause)]
    IoErrorMsg { cause: std::io::Error, msg: String },
}

impl Error {
    pub fn from_io_error<S>(cause: std::io::Error, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::IoErrorMsg {
            cause,
            msg: msg.into(),
        }
    }

    /// The caller asked for a board or thread that doesn't exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BoardNotFound { .. }
                | Error::NoDefaultBoard
                | Error::ThreadNotFound { .. }
                | Error::DatabaseError(diesel::result::Error::NotFound)
        )
    }

    /// One or more submitted fields failed validation.
    pub fn is_invalid(&self) -> bool {
        matches!(self, Error::Invalid(..))
    }

    /// The backing store failed. These are never retried here.
    pub fn is_storage(&self) -> bool {
        match self {
            Error::DatabaseError(e) => {
                !matches!(e, diesel::result::Error::NotFound)
            }
            Error::R2d2Error(..)
            | Error::ConnectionError(..)
            | Error::DatabaseMigrationError(..)
            | Error::StoreLockPoisoned => true,
            _ => false,
        }
    }

    /// The field failures, if this is a validation error.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Error::Invalid(errors) => Some(errors),
            _ => None,
        }
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Error {
        Error::Invalid(ValidationErrors::from(err))
    }
}

impl std::error::Error for Error {}

/// Our result type.
pub type Result<T> = std::result::Result<T, Error>;
