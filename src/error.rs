//! Error types for the ieddata library.
//!
//! All fallible operations return a [`Result<T>`], which is an alias for
//! `Result<T, Error>`. Every variant carries one sentence of context for the
//! layer that produced it and wraps the underlying cause, if any.
//!
//! # Error Categories
//!
//! [`Error::kind`] sorts the variants into the categories callers usually act
//! on:
//!
//! - [`ErrorKind::NotFound`]: [`ContainerNotFound`], [`NoSuchProcess`],
//!   [`DirectoryNotFound`], [`FileNotFound`]
//! - [`ErrorKind::Invalid`]: [`InvalidPid`], [`InvalidDbName`], [`Closed`]
//! - [`ErrorKind::Unavailable`]: [`Unavailable`], [`PermissionDenied`]
//! - [`ErrorKind::DataIntegrity`]: [`DataIntegrity`]
//! - [`ErrorKind::Internal`]: everything else
//!
//! [`ContainerNotFound`]: Error::ContainerNotFound
//! [`NoSuchProcess`]: Error::NoSuchProcess
//! [`DirectoryNotFound`]: Error::DirectoryNotFound
//! [`FileNotFound`]: Error::FileNotFound
//! [`InvalidPid`]: Error::InvalidPid
//! [`InvalidDbName`]: Error::InvalidDbName
//! [`Closed`]: Error::Closed
//! [`Unavailable`]: Error::Unavailable
//! [`PermissionDenied`]: Error::PermissionDenied
//! [`DataIntegrity`]: Error::DataIntegrity

use std::path::PathBuf;

use crate::engine::EngineError;

/// Result type alias for operations that may return an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Container, process, directory or file absent.
    NotFound,
    /// Malformed request, such as a zero process id or a closed handle.
    Invalid,
    /// The database could not be opened or probed.
    Unavailable,
    /// The database opened fine but holds the wrong data.
    DataIntegrity,
    /// Unexpected failure of a collaborator.
    Internal,
}

/// Errors returned by ieddata operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No running container with the requested name.
    #[error("no {0:?} runtime container present")]
    ContainerNotFound(String),

    /// Zero or out-of-range process id.
    #[error("invalid process id {0}")]
    InvalidPid(u64),

    /// The database name does not name a file once sanitized.
    #[error("invalid database name {0:?}")]
    InvalidDbName(String),

    /// The process (and with it its mount namespace) is gone.
    #[error("no such process/mount namespace for PID {pid} at {}", path.display())]
    NoSuchProcess {
        pid: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The mount namespace of the process cannot be accessed.
    #[error("cannot access mount namespace of PID {pid} at {}{hint}", path.display())]
    PermissionDenied {
        pid: u32,
        path: PathBuf,
        hint: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A directory along the database path is missing.
    #[error("no database directory {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// The database file itself is missing.
    #[error("no database file {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Symlink resolution did not terminate.
    #[error("too many levels of symbolic links resolving {}", path.display())]
    SymlinkLoop { path: PathBuf },

    /// Resolving the database path failed for another reason.
    #[error("cannot determine full database path {}", path.display())]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Making the private copy of the database failed.
    #[error("unable to copy database {}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The database engine refused to open or probe the copy.
    #[error("unable to open database {}", path.display())]
    Unavailable {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// The database handle has already been closed.
    #[error("database has already been closed")]
    Closed,

    /// A mandatory field came out empty: most probably the wrong database.
    #[error("{0}")]
    DataIntegrity(String),

    /// A column value could not be converted into its record field.
    #[error("cannot convert column {column:?}")]
    Projection {
        column: String,
        #[source]
        source: rusqlite::types::FromSqlError,
    },

    /// Querying the database failed.
    #[error("database query failed")]
    Query(#[from] rusqlite::Error),

    /// Closing the read-only connection failed.
    #[error("unable to close database connection")]
    CloseConnection(#[source] rusqlite::Error),

    /// Removing the private copy failed.
    #[error("unable to remove database copy {}", path.display())]
    RemoveCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container engine failed while locating the runtime container.
    #[error("container engine failure")]
    Engine(#[from] EngineError),

    /// The workload watcher task panicked or was aborted.
    #[error("workload watcher task failed")]
    Watcher(#[from] tokio::task::JoinError),
}

impl Error {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ContainerNotFound(_)
            | Error::NoSuchProcess { .. }
            | Error::DirectoryNotFound { .. }
            | Error::FileNotFound { .. } => ErrorKind::NotFound,
            Error::InvalidPid(_) | Error::InvalidDbName(_) | Error::Closed => ErrorKind::Invalid,
            Error::Unavailable { .. } | Error::PermissionDenied { .. } => ErrorKind::Unavailable,
            Error::DataIntegrity(_) => ErrorKind::DataIntegrity,
            Error::SymlinkLoop { .. }
            | Error::Resolve { .. }
            | Error::Copy { .. }
            | Error::Projection { .. }
            | Error::Query(_)
            | Error::CloseConnection(_)
            | Error::RemoveCopy { .. }
            | Error::Engine(_)
            | Error::Watcher(_) => ErrorKind::Internal,
        }
    }
}
