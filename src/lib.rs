//! Read-only access to the app engine databases of an Industrial Edge device.
//!
//! The app engine keeps its state in SQLite databases inside the
//! `edge-iot-core` runtime container. This crate finds that container through
//! the container engine, reaches into its mount namespace via
//! `/proc/<pid>/root`, and opens a private, read-only copy of a database:
//!
//! ```no_run
//! # async fn example() -> ieddata::Result<()> {
//! let db = ieddata::AppEngineDb::open(ieddata::PLATFORM_BOX_DB).await?;
//! for app in db.apps()? {
//!     println!("{} {}", app.title, app.version);
//! }
//! db.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! Reading another process's mount namespace takes root or
//! `CAP_SYS_PTRACE`, as well as sharing the host PID namespace.

pub mod apps;
pub mod config;
pub mod database;
pub mod device;
pub mod engine;
pub mod error;
pub mod locate;
pub mod procfs;
pub mod projector;
pub mod sanitize;
pub mod watcher;


pub use apps::App;
pub use config::{Config, DB_BASE_DIR, EDGE_IOT_CORE_CONTAINER_NAME, PLATFORM_BOX_DB};
pub use database::AppEngineDb;
pub use engine::{Container, ContainerEngine, DockerEngine};
pub use error::{Error, ErrorKind, Result};
pub use locate::locate;
pub use procfs::{NamespaceFileRef, ProcRoot};
pub use projector::{FromColumn, Record};
pub use sanitize::{first_lower, sanitize};
pub use watcher::Watcher;
