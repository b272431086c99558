//! Read-only access to a private copy of an app engine database.
//!
//! The live database belongs to the runtime container, which may write to it
//! at any time. Instead of opening it in place through the mount namespace,
//! [`AppEngineDb`] copies the database file, plus its write-ahead log if
//! there is one, into a private temporary directory and opens the copy
//! read-only. The copy is removed when the handle is closed or dropped.

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;
use rusqlite::{Connection, OpenFlags};
use tempfile::TempDir;

use crate::config::Config;
use crate::engine::DockerEngine;
use crate::error::{Error, Result};
use crate::locate::locate;
use crate::procfs::{NamespaceFileRef, ProcRoot};
use crate::projector::{self, Record};
use crate::sanitize::sanitize;

/// An open, read-only app engine database.
///
/// All methods take `&self`; the handle can be shared between threads.
/// Queries are serialized.
pub struct AppEngineDb {
    source: NamespaceFileRef,
    state: Mutex<Option<OpenDb>>,
}

struct OpenDb {
    // Declared first so the connection is dropped before the copy is removed.
    conn: Connection,
    copy: DatabaseCopy,
}

/// A private copy of a database file and its write-ahead log.
struct DatabaseCopy {
    dir: TempDir,
    path: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(path);
    path.push(suffix);
    path.into()
}

impl DatabaseCopy {
    fn create(root: &ProcRoot, file: &NamespaceFileRef, temp_dir: Option<&Path>) -> Result<Self> {
        let copy_err = |source| Error::Copy {
            path: file.host_path().to_path_buf(),
            source,
        };
        let mut builder = tempfile::Builder::new();
        builder.prefix("temp-db-copy-");
        let dir = match temp_dir {
            Some(temp_dir) => builder.tempdir_in(temp_dir),
            None => builder.tempdir(),
        }
        .map_err(copy_err)?;

        let name = file
            .resolved_path()
            .file_name()
            .map(Path::new)
            .unwrap_or(Path::new("app_engine.db"));
        let path = dir.path().join(name);
        let size = copy_file(root, file, &path)?;
        debug!(
            "copied {} ({size} bytes) to {}",
            file.host_path().display(),
            path.display()
        );

        let wal = with_suffix(file.resolved_path(), "-wal");
        match root.resolve(&wal) {
            Ok(wal) => {
                let size = copy_file(root, &wal, &with_suffix(&path, "-wal"))?;
                debug!("copied write-ahead log ({size} bytes)");
            }
            Err(Error::FileNotFound { .. }) => {}
            Err(err) => return Err(err),
        }

        Ok(Self { dir, path })
    }

    fn remove(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .map_err(|source| Error::RemoveCopy { path, source })
    }
}

fn copy_file(root: &ProcRoot, file: &NamespaceFileRef, dest: &Path) -> Result<u64> {
    let copy_err = |source| Error::Copy {
        path: file.host_path().to_path_buf(),
        source,
    };
    let mut source = root.open_file(file).map_err(copy_err)?;
    let mut dest = File::create(dest).map_err(copy_err)?;
    io::copy(&mut source, &mut dest).map_err(copy_err)
}

fn connect(path: &Path) -> Result<Connection> {
    let unavailable = |source| Error::Unavailable {
        path: path.to_path_buf(),
        source,
    };
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(unavailable)?;
    // Opening is lazy; only the first read tells whether this is a database.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
        row.get::<_, i64>(0)
    })
    .map_err(unavailable)?;
    Ok(conn)
}

impl AppEngineDb {
    /// Opens the database `dbname` of the runtime container, using the
    /// default [`Config`].
    pub async fn open(dbname: &str) -> Result<Self> {
        Self::open_with(&Config::default(), dbname).await
    }

    /// Locates the runtime container through the container engine, then
    /// opens its database `dbname`.
    pub async fn open_with(config: &Config, dbname: &str) -> Result<Self> {
        let engine = DockerEngine::new(&config.docker_host)?;
        let pid = locate(engine, &config.container_name).await?;
        Self::open_in_pid_with(config, dbname, pid)
    }

    /// Opens the database `dbname` in the mount namespace of process `pid`,
    /// using the default [`Config`].
    pub fn open_in_pid(dbname: &str, pid: u32) -> Result<Self> {
        Self::open_in_pid_with(&Config::default(), dbname, pid)
    }

    /// Opens the database `dbname` in the mount namespace of process `pid`.
    ///
    /// `dbname` is sanitized before it is looked up in the database
    /// directory, so it can never name a file outside of it. Names that
    /// sanitize to the directory itself are rejected.
    pub fn open_in_pid_with(config: &Config, dbname: &str, pid: u32) -> Result<Self> {
        let name = sanitize(dbname);
        if name.is_empty() || name == "." {
            return Err(Error::InvalidDbName(dbname.to_string()));
        }
        let path = config.db_base_dir.join(name);
        Self::open_path_with(config, pid, &path)
    }

    /// Opens the database at the absolute `path` in the mount namespace of
    /// process `pid`.
    ///
    /// Unlike the other constructors this does not sanitize anything.
    pub fn open_at(pid: u32, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_at_with(&Config::default(), pid, path)
    }

    /// Like [`AppEngineDb::open_at`], with the procfs mount point and
    /// temporary directory taken from `config`.
    pub fn open_at_with(config: &Config, pid: u32, path: impl AsRef<Path>) -> Result<Self> {
        Self::open_path_with(config, pid, path.as_ref())
    }

    fn open_path_with(config: &Config, pid: u32, path: &Path) -> Result<Self> {
        let root = ProcRoot::open(&config.proc_root, pid)?;
        let source = root.resolve(path)?;
        let copy = DatabaseCopy::create(&root, &source, config.temp_dir.as_deref())?;
        let conn = match connect(&copy.path) {
            Ok(conn) => conn,
            Err(err) => {
                if let Err(remove) = copy.remove() {
                    debug!("{remove}");
                }
                return Err(err);
            }
        };
        debug!("opened {}", source.host_path().display());
        Ok(Self {
            source,
            state: Mutex::new(Some(OpenDb { conn, copy })),
        })
    }

    /// The database file as resolved in the mount namespace it was copied
    /// from.
    pub fn source(&self) -> &NamespaceFileRef {
        &self.source
    }

    /// Path of the private copy, or `None` once closed.
    pub fn copy_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|db| db.copy.path.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Closes the connection and removes the private copy.
    ///
    /// Closing more than once, including concurrently, is fine; only the
    /// first call does any work. Both steps are always attempted; a failure
    /// to close the connection is reported in preference to a failure to
    /// remove the copy.
    pub fn close(&self) -> Result<()> {
        let Some(OpenDb { conn, copy }) = self.lock().take() else {
            return Ok(());
        };
        let closed = conn
            .close()
            .map_err(|(_, source)| Error::CloseConnection(source));
        let removed = copy.remove();
        debug!("closed {}", self.source.host_path().display());
        closed.and(removed)
    }

    /// Runs `f` with the connection, holding it exclusively.
    ///
    /// Fails with [`Error::Closed`] once the database has been closed.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let state = self.lock();
        let db = state.as_ref().ok_or(Error::Closed)?;
        f(&db.conn)
    }

    /// Runs `sql` and projects every result row onto an `R`.
    pub fn query_records<R: Record>(&self, sql: &str) -> Result<Vec<R>> {
        self.with_connection(|conn| projector::query(conn, sql))
    }

    fn lock(&self) -> MutexGuard<'_, Option<OpenDb>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AppEngineDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppEngineDb")
            .field("source", &self.source)
            .field("copy", &self.copy_path())
            .finish()
    }
}
