//! Container engine access.
//!
//! The [`ContainerEngine`] trait is the seam between workload discovery and a
//! concrete engine. [`DockerEngine`] talks to the Docker Engine API; tests
//! substitute scripted engines.

use futures::stream::BoxStream;

mod docker;

pub use docker::DockerEngine;

/// A running container and the PID of its initial process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    /// Container name without the leading `/` the Docker API reports.
    pub name: String,
    /// Zero when the container currently has no running process.
    pub pid: u32,
}

/// A change to the set of containers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    /// The container with this ID was started, renamed or otherwise changed
    /// and needs to be inspected again.
    Changed(String),
    /// The container with this ID stopped running.
    Removed(String),
}

/// Container lifecycle events as they arrive.
pub type EventStream = BoxStream<'static, Result<ContainerEvent, EngineError>>;

/// Errors talking to a container engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unsupported container engine host {0:?}, expected unix://<path>")]
    UnsupportedHost(String),

    #[error("cannot connect to container engine at {}", path.display())]
    Connect {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("container engine connection failed")]
    Http(#[from] hyper::Error),

    #[error("invalid container engine request")]
    Request(#[from] hyper::http::Error),

    #[error("container engine request {path} failed with status {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("cannot decode container engine response")]
    Decode(#[from] serde_json::Error),

    #[error("cannot read container engine event stream")]
    Lines(#[from] tokio_util::codec::LinesCodecError),

    #[error("container engine event stream ended")]
    StreamClosed,
}

/// The part of a container engine that workload discovery needs.
#[async_trait::async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Lists all containers that currently run a process.
    async fn containers(&self) -> Result<Vec<Container>, EngineError>;

    /// Inspects a single container; `None` when it does not exist or does
    /// not run.
    async fn container(&self, id: &str) -> Result<Option<Container>, EngineError>;

    /// Subscribes to container lifecycle events. Only events after the
    /// subscription are delivered.
    async fn events(&self) -> Result<EventStream, EngineError>;
}
