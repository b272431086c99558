//! Configuration for locating the edge runtime and its databases.
//!
//! All settings have defaults matching a stock Industrial Edge device, so most
//! callers never need a configuration at all. When they do, a TOML document
//! can override individual settings:
//!
//! ```toml
//! docker_host = "unix:///run/docker.sock"
//! container_name = "edge-iot-core"
//! db_base_dir = "/data/app_engine/db"
//! proc_root = "/host/proc"
//! temp_dir = "/var/tmp"
//! ```
//!
//! Environment variables take precedence over the document when
//! [`Config::with_env_overrides`] is applied:
//!
//! - `IEDDATA_DOCKER_HOST` overrides `docker_host`
//! - `HOST_PROC` overrides `proc_root`
//! - `IEDDATA_TEMP_DIR` overrides `temp_dir`

use std::env;
use std::path::PathBuf;

use serde::Deserialize;

/// Name of the edge runtime container.
pub const EDGE_IOT_CORE_CONTAINER_NAME: &str = "edge-iot-core";

/// File name of the platform box database.
pub const PLATFORM_BOX_DB: &str = "platformbox.db";

/// Location of the app engine SQLite database files inside the runtime
/// container.
pub const DB_BASE_DIR: &str = "/data/app_engine/db";

/// Docker API endpoint as seen through the initial mount namespace, so that
/// it is also reachable from inside a container with the host PID namespace.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///proc/1/root/run/docker.sock";

/// Settings for discovery, path resolution, and copying.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Container engine API endpoint; only `unix://` URLs are supported.
    pub docker_host: String,

    /// Name of the container holding the databases.
    pub container_name: String,

    /// Database directory inside the container.
    pub db_base_dir: PathBuf,

    /// Host procfs mount point.
    pub proc_root: PathBuf,

    /// Where private database copies are made; the system default temporary
    /// directory when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            container_name: EDGE_IOT_CORE_CONTAINER_NAME.to_string(),
            db_base_dir: PathBuf::from(DB_BASE_DIR),
            proc_root: PathBuf::from("/proc"),
            temp_dir: None,
        }
    }
}

impl Config {
    /// Parse a configuration from TOML content; missing keys keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML content is invalid or has unknown keys.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply the `IEDDATA_DOCKER_HOST`, `HOST_PROC`, and `IEDDATA_TEMP_DIR`
    /// environment variables on top of this configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = env::var("IEDDATA_DOCKER_HOST") {
            self.docker_host = host;
        }
        if let Some(proc_root) = env::var_os("HOST_PROC") {
            self.proc_root = proc_root.into();
        }
        if let Some(temp_dir) = env::var_os("IEDDATA_TEMP_DIR") {
            self.temp_dir = Some(temp_dir.into());
        }
        self
    }
}
